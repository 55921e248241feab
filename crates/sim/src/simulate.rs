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

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use aiops_provider::{AiMiddleware, NodeProvider, SimulateValidationError};
use anyhow::anyhow;

use crate::{IngressCtx, IngressHandler, SimulationViolation, ValidationError};

// An op whose validity ends within this window is not worth bundling.
const MIN_VALID_UNTIL_BUFFER_SECS: u64 = 30;

/// Step 4: static-call `simulateValidation` and recover the validation
/// result envelope.
#[derive(Debug)]
pub struct SimulateOp<M> {
    middleware: Arc<M>,
}

impl<M> SimulateOp<M> {
    /// Create the simulation stage.
    pub fn new(middleware: Arc<M>) -> Self {
        Self { middleware }
    }
}

#[async_trait::async_trait]
impl<M: AiMiddleware> IngressHandler for SimulateOp<M> {
    fn name(&self) -> &'static str {
        "simulate"
    }

    async fn handle(&self, ctx: &mut IngressCtx) -> Result<(), ValidationError> {
        let result = match self.middleware.simulate_validation(&ctx.op).await {
            Ok(result) => result,
            Err(SimulateValidationError::FailedOp(failed_op)) => {
                return Err(ValidationError::Rejected(failed_op))
            }
            Err(SimulateValidationError::UnexpectedRevert(reason)) => {
                return Err(ValidationError::Internal(anyhow!(
                    "unexpected simulateValidation revert: {reason}"
                )))
            }
            Err(SimulateValidationError::Other(err)) => {
                return Err(ValidationError::Internal(err))
            }
        };

        if result.return_info.sig_failed {
            return Err(SimulationViolation::SignatureFailed.into());
        }

        let now = unix_now();
        let valid_until = result.return_info.valid_until;
        if valid_until != 0 && valid_until < now + MIN_VALID_UNTIL_BUFFER_SECS {
            return Err(ValidationError::ShortValid { valid_until, now });
        }

        ctx.validation = Some(result);
        Ok(())
    }
}

/// Step 6: record the aggregate code hash of every contract touched during
/// simulation, so batch assembly can detect state drift.
#[derive(Debug)]
pub struct SnapshotCodeHashes<P> {
    provider: Arc<P>,
}

impl<P> SnapshotCodeHashes<P> {
    /// Create the snapshot stage.
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl<P: NodeProvider> IngressHandler for SnapshotCodeHashes<P> {
    fn name(&self) -> &'static str {
        "code-hashes"
    }

    async fn handle(&self, ctx: &mut IngressCtx) -> Result<(), ValidationError> {
        let hash = self
            .provider
            .code_hash(ctx.touched.clone())
            .await
            .map_err(ValidationError::Internal)?;
        ctx.code_hash = Some(hash);
        Ok(())
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
