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

use aiops_pool::AiOpPool;
use aiops_provider::{abi, AiMiddleware, NodeProvider, SimulateValidationError};
use aiops_types::AiOperation;
use anyhow::Context;
use async_trait::async_trait;
use ethers::{
    types::{Address, H256, U256, U64},
    utils::to_checksum,
};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use tracing::debug;

use crate::{
    error::{EthResult, EthRpcError},
    types::{RpcAiOperationByHash, RpcAiOperationReceipt, RpcGasEstimate},
};

/// `eth_` namespace of the bundler.
#[rpc(server, namespace = "eth")]
pub trait EthApi {
    /// Validate an aiOp and admit it to the mempool; returns its hash.
    #[method(name = "sendAiOperation")]
    async fn send_ai_operation(&self, op: AiOperation, middleware: Address) -> RpcResult<H256>;

    /// Estimate the gas fields of an aiOp without admitting it.
    #[method(name = "estimateAiOperationGas")]
    async fn estimate_ai_operation_gas(
        &self,
        op: AiOperation,
        middleware: Address,
    ) -> RpcResult<RpcGasEstimate>;

    /// Receipt of an included aiOp, or null.
    #[method(name = "getAiOperationReceipt")]
    async fn get_ai_operation_receipt(
        &self,
        op_hash: H256,
    ) -> RpcResult<Option<RpcAiOperationReceipt>>;

    /// An aiOp by hash with its inclusion coordinates, or null.
    #[method(name = "getAiOperationByHash")]
    async fn get_ai_operation_by_hash(
        &self,
        op_hash: H256,
    ) -> RpcResult<Option<RpcAiOperationByHash>>;

    /// The middleware contracts this bundler serves.
    #[method(name = "supportedAiMiddlewares")]
    async fn supported_ai_middlewares(&self) -> RpcResult<Vec<String>>;

    /// Chain id of the service.
    #[method(name = "chainId")]
    async fn chain_id(&self) -> RpcResult<U64>;
}

/// Settings of the `eth_` namespace.
#[derive(Clone, Copy, Debug)]
pub struct EthApiSettings {
    /// How many past blocks inclusion lookups may scan
    pub op_lookup_limit: u64,
}

/// `eth_` namespace implementation over one pool per middleware.
pub struct EthApi<P, M> {
    provider: Arc<P>,
    pools: Vec<Arc<AiOpPool<P, M>>>,
    chain_id: u64,
    settings: EthApiSettings,
}

impl<P: NodeProvider, M: AiMiddleware> EthApi<P, M> {
    /// Create the API over the given pools.
    pub fn new(
        provider: Arc<P>,
        pools: Vec<Arc<AiOpPool<P, M>>>,
        chain_id: u64,
        settings: EthApiSettings,
    ) -> Self {
        Self {
            provider,
            pools,
            chain_id,
            settings,
        }
    }

    fn pool_for(&self, middleware: Address) -> EthResult<&Arc<AiOpPool<P, M>>> {
        self.pools
            .iter()
            .find(|p| p.middleware_address() == middleware)
            .ok_or_else(|| {
                EthRpcError::InvalidParams(format!("unsupported middleware: {middleware:?}"))
            })
    }

    async fn estimate(
        &self,
        op: AiOperation,
        middleware: Address,
    ) -> EthResult<RpcGasEstimate> {
        let pool = self.pool_for(middleware)?;

        let pre_verification_gas = pool
            .overhead()
            .pre_verification_gas_with_buffer(&op)
            .await
            .map_err(EthRpcError::Internal)?;

        let validation = match pool.middleware().simulate_validation(&op).await {
            Ok(validation) => validation,
            Err(SimulateValidationError::FailedOp(failed)) => {
                return Err(EthRpcError::RejectedByEpOrAccount(failed.reason))
            }
            Err(SimulateValidationError::UnexpectedRevert(reason)) => {
                return Err(EthRpcError::RejectedByEpOrAccount(reason))
            }
            Err(SimulateValidationError::Other(e)) => return Err(EthRpcError::Internal(e)),
        };
        let verification_gas_limit = validation
            .return_info
            .pre_op_gas
            .saturating_sub(op.pre_verification_gas);

        let call_gas_limit = if op.call_data.is_empty() {
            U256::zero()
        } else {
            self.provider
                .estimate_gas(middleware, op.sender, op.call_data.clone())
                .await
                .map_err(EthRpcError::Internal)?
        };

        Ok(RpcGasEstimate {
            pre_verification_gas,
            verification_gas_limit,
            call_gas_limit,
        })
    }

    async fn receipt(&self, op_hash: H256) -> EthResult<Option<RpcAiOperationReceipt>> {
        for pool in &self.pools {
            let event = pool
                .middleware()
                .query_op_event(op_hash, self.settings.op_lookup_limit)
                .await
                .map_err(EthRpcError::Internal)?;
            if let Some(event) = event {
                return Ok(Some(event.into()));
            }
        }
        Ok(None)
    }

    async fn by_hash(&self, op_hash: H256) -> EthResult<Option<RpcAiOperationByHash>> {
        // Pending ops come straight from the pool.
        for pool in &self.pools {
            if let Some(record) = pool.get_op_by_hash(op_hash)? {
                return Ok(Some(RpcAiOperationByHash {
                    ai_operation: record.op,
                    middleware: pool.middleware_address(),
                    transaction_hash: None,
                    block_number: None,
                    block_hash: None,
                }));
            }
        }

        // Included ops are recovered from their enclosing transaction.
        for pool in &self.pools {
            let middleware = pool.middleware_address();
            let Some(event) = pool
                .middleware()
                .query_op_event(op_hash, self.settings.op_lookup_limit)
                .await
                .map_err(EthRpcError::Internal)?
            else {
                continue;
            };
            let Some(tx) = self
                .provider
                .transaction_by_hash(event.transaction_hash)
                .await
                .map_err(EthRpcError::Internal)?
            else {
                continue;
            };
            let (ops, _) = abi::decode_handle_ops_calldata(&tx.input)
                .context("included transaction should carry handleOps calldata")
                .map_err(EthRpcError::Internal)?;
            let Some(op) = ops
                .into_iter()
                .find(|op| op.op_hash(middleware, self.chain_id) == op_hash)
            else {
                continue;
            };
            return Ok(Some(RpcAiOperationByHash {
                ai_operation: op,
                middleware,
                transaction_hash: Some(event.transaction_hash),
                block_number: Some(event.block_number.into()),
                block_hash: Some(event.block_hash),
            }));
        }
        Ok(None)
    }
}

#[async_trait]
impl<P: NodeProvider, M: AiMiddleware> EthApiServer for EthApi<P, M> {
    async fn send_ai_operation(&self, op: AiOperation, middleware: Address) -> RpcResult<H256> {
        debug!(sender = ?op.sender, nonce = %op.nonce, "eth_sendAiOperation");
        let pool = self.pool_for(middleware)?;
        let hash = pool
            .add_op(op)
            .await
            .map_err(EthRpcError::from)?;
        Ok(hash)
    }

    async fn estimate_ai_operation_gas(
        &self,
        op: AiOperation,
        middleware: Address,
    ) -> RpcResult<RpcGasEstimate> {
        Ok(self.estimate(op, middleware).await?)
    }

    async fn get_ai_operation_receipt(
        &self,
        op_hash: H256,
    ) -> RpcResult<Option<RpcAiOperationReceipt>> {
        Ok(self.receipt(op_hash).await?)
    }

    async fn get_ai_operation_by_hash(
        &self,
        op_hash: H256,
    ) -> RpcResult<Option<RpcAiOperationByHash>> {
        Ok(self.by_hash(op_hash).await?)
    }

    async fn supported_ai_middlewares(&self) -> RpcResult<Vec<String>> {
        Ok(self
            .pools
            .iter()
            .map(|p| to_checksum(&p.middleware_address(), None))
            .collect())
    }

    async fn chain_id(&self) -> RpcResult<U64> {
        Ok(self.chain_id.into())
    }
}
