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

//! `debug_bundler_` namespace: test hooks for driving the bundler from a
//! conformance suite. Only mounted when debug mode is on.

use std::sync::Arc;

use aiops_builder::Bundler;
use aiops_pool::{Mempool, ReputationStore};
use aiops_provider::NodeProvider;
use aiops_types::{AiOperation, Reputation, ReputationOverride};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};

use crate::error::EthRpcError;

/// `debug_` namespace of the bundler.
#[rpc(server, namespace = "debug")]
pub trait DebugApi {
    /// Clear the mempool and reputation state.
    #[method(name = "bundler_clearState")]
    async fn bundler_clear_state(&self) -> RpcResult<String>;

    /// Dump the mempool of a middleware in arrival order.
    #[method(name = "bundler_dumpMempool")]
    async fn bundler_dump_mempool(&self, middleware: Address) -> RpcResult<Vec<AiOperation>>;

    /// Build and submit a bundle right now.
    #[method(name = "bundler_sendBundleNow")]
    async fn bundler_send_bundle_now(&self) -> RpcResult<H256>;

    /// Switch between the ticker loop ("auto") and manual bundling.
    #[method(name = "bundler_setBundlingMode")]
    async fn bundler_set_bundling_mode(&self, mode: String) -> RpcResult<String>;

    /// Override reputation counters verbatim.
    #[method(name = "bundler_setReputation")]
    async fn bundler_set_reputation(
        &self,
        entries: Vec<ReputationOverride>,
        middleware: Address,
    ) -> RpcResult<String>;

    /// Dump tracked reputations.
    #[method(name = "bundler_dumpReputation")]
    async fn bundler_dump_reputation(&self, middleware: Address) -> RpcResult<Vec<Reputation>>;
}

/// `debug_` namespace implementation.
pub struct DebugApi<P> {
    provider: Arc<P>,
    mempool: Mempool,
    reputation: ReputationStore,
    bundler: Arc<Bundler<P>>,
}

impl<P> DebugApi<P> {
    /// Create the debug API over the shared runtime objects.
    pub fn new(
        provider: Arc<P>,
        mempool: Mempool,
        reputation: ReputationStore,
        bundler: Arc<Bundler<P>>,
    ) -> Self {
        Self {
            provider,
            mempool,
            reputation,
            bundler,
        }
    }
}

#[async_trait]
impl<P: NodeProvider> DebugApiServer for DebugApi<P> {
    async fn bundler_clear_state(&self) -> RpcResult<String> {
        self.mempool.clear().map_err(EthRpcError::from)?;
        self.reputation
            .clear()
            .map_err(EthRpcError::Internal)?;
        Ok("ok".to_string())
    }

    async fn bundler_dump_mempool(&self, middleware: Address) -> RpcResult<Vec<AiOperation>> {
        let records = self.mempool.dump(middleware).map_err(EthRpcError::from)?;
        Ok(records.into_iter().map(|r| r.op).collect())
    }

    async fn bundler_send_bundle_now(&self) -> RpcResult<H256> {
        let hash = self
            .bundler
            .send_bundle_now()
            .await
            .map_err(EthRpcError::Internal)?;
        Ok(hash.unwrap_or_default())
    }

    async fn bundler_set_bundling_mode(&self, mode: String) -> RpcResult<String> {
        match mode.as_str() {
            "manual" => self.bundler.stop(),
            "auto" => self.bundler.run(),
            other => {
                return Err(
                    EthRpcError::InvalidParams(format!("unrecognized mode {other}")).into(),
                )
            }
        }
        Ok("ok".to_string())
    }

    async fn bundler_set_reputation(
        &self,
        entries: Vec<ReputationOverride>,
        middleware: Address,
    ) -> RpcResult<String> {
        let block_number = self
            .provider
            .block_number()
            .await
            .map_err(EthRpcError::Internal)?;
        self.reputation
            .override_reputation(middleware, &entries, block_number)
            .map_err(EthRpcError::Internal)?;
        Ok("ok".to_string())
    }

    async fn bundler_dump_reputation(&self, middleware: Address) -> RpcResult<Vec<Reputation>> {
        Ok(self
            .reputation
            .dump_reputation(middleware)
            .map_err(EthRpcError::Internal)?)
    }
}
