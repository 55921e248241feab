// This file is part of Aiops Bundler.
//
// Aiops Bundler is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Aiops Bundler is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Aiops Bundler.
// If not, see https://www.gnu.org/licenses/.

use std::sync::Arc;

use tracing::debug;

use crate::{IngressCtx, ValidationError};

/// One stage of the ingress pipeline. Handlers share a single call
/// signature and are composed into an ordered list at startup; the first
/// failure aborts the run.
#[async_trait::async_trait]
pub trait IngressHandler: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run this stage against the shared context.
    async fn handle(&self, ctx: &mut IngressCtx) -> Result<(), ValidationError>;
}

/// An ordered list of ingress handlers.
#[derive(Clone, Default)]
pub struct IngressPipeline {
    handlers: Vec<Arc<dyn IngressHandler>>,
}

impl IngressPipeline {
    /// Compose a pipeline from handlers, run in the given order.
    pub fn new(handlers: Vec<Arc<dyn IngressHandler>>) -> Self {
        Self { handlers }
    }

    /// Run every handler in order, stopping at the first failure.
    pub async fn run(&self, ctx: &mut IngressCtx) -> Result<(), ValidationError> {
        for handler in &self.handlers {
            if let Err(error) = handler.handle(ctx).await {
                debug!(
                    handler = handler.name(),
                    sender = ?ctx.op.sender,
                    nonce = %ctx.op.nonce,
                    %error,
                    "ingress handler rejected op"
                );
                return Err(error);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for IngressPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}
