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

use aiops_types::{AiOpEvent, AiOperation, DepositInfo, ValidationResult};
use anyhow::{anyhow, Context};
use ethers::{
    providers::{
        Http, JsonRpcClient, Middleware, Provider as EthersProvider, ProviderError, RpcError,
    },
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes,
        Eip1559TransactionRequest, Filter, Transaction, TransactionReceipt, H256, U256,
    },
    utils::keccak256,
};

use crate::{
    abi, error::HandleOpsEstimateError, AiMiddleware, CollectorTrace, NodeProvider,
    SimulateValidationError,
};

/// Connect to an Ethereum node over HTTP.
pub fn connect(url: &str) -> anyhow::Result<Arc<EthersProvider<Http>>> {
    Ok(Arc::new(
        EthersProvider::<Http>::try_from(url).context("should parse node HTTP url")?,
    ))
}

/// [`NodeProvider`] backed by an ethers JSON-RPC provider.
#[derive(Debug)]
pub struct EthNodeProvider<C: JsonRpcClient>(Arc<EthersProvider<C>>);

impl<C: JsonRpcClient> EthNodeProvider<C> {
    /// Wrap an ethers provider.
    pub fn new(inner: Arc<EthersProvider<C>>) -> Self {
        Self(inner)
    }
}

#[async_trait::async_trait]
impl<C: JsonRpcClient + 'static> NodeProvider for EthNodeProvider<C> {
    async fn chain_id(&self) -> anyhow::Result<u64> {
        Ok(self
            .0
            .get_chainid()
            .await
            .context("should get chain id")?
            .as_u64())
    }

    async fn block_number(&self) -> anyhow::Result<u64> {
        Ok(self
            .0
            .get_block_number()
            .await
            .context("should get block number")?
            .as_u64())
    }

    async fn base_fee(&self) -> anyhow::Result<Option<U256>> {
        let block = self
            .0
            .get_block(BlockNumber::Latest)
            .await
            .context("should get latest block")?
            .context("latest block should exist")?;
        Ok(block.base_fee_per_gas)
    }

    async fn suggest_gas_tip(&self) -> anyhow::Result<U256> {
        self.0
            .request("eth_maxPriorityFeePerGas", ())
            .await
            .context("should get suggested priority fee")
    }

    async fn get_code(&self, address: Address) -> anyhow::Result<Bytes> {
        self.0
            .get_code(address, None)
            .await
            .context("should load code")
    }

    async fn transaction_count(&self, address: Address) -> anyhow::Result<U256> {
        self.0
            .get_transaction_count(address, None)
            .await
            .context("should get transaction count")
    }

    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> anyhow::Result<U256> {
        let tx: TypedTransaction = Eip1559TransactionRequest {
            from: Some(from),
            to: Some(to.into()),
            data: Some(data),
            ..Default::default()
        }
        .into();
        self.0
            .estimate_gas(&tx, None)
            .await
            .context("should estimate gas")
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<H256> {
        let pending = self
            .0
            .send_raw_transaction(raw)
            .await
            .context("should send raw transaction")?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> anyhow::Result<Option<TransactionReceipt>> {
        self.0
            .get_transaction_receipt(hash)
            .await
            .context("should look up receipt")
    }

    async fn transaction_by_hash(&self, hash: H256) -> anyhow::Result<Option<Transaction>> {
        self.0
            .get_transaction(hash)
            .await
            .context("should look up transaction")
    }

    async fn code_hash(&self, mut addresses: Vec<Address>) -> anyhow::Result<H256> {
        addresses.sort();
        addresses.dedup();
        let mut digest = Vec::with_capacity(addresses.len() * 32);
        for address in addresses {
            let code = self
                .0
                .get_code(address, None)
                .await
                .context("should load code for hash")?;
            digest.extend(keccak256(&code));
        }
        Ok(keccak256(digest).into())
    }
}

/// [`AiMiddleware`] backed by raw eth_call / debug_traceCall requests against
/// a deployed middleware contract.
#[derive(Debug)]
pub struct AiMiddlewareContract<C: JsonRpcClient> {
    inner: Arc<EthersProvider<C>>,
    address: Address,
    tracer: String,
}

impl<C: JsonRpcClient> AiMiddlewareContract<C> {
    /// Bind to the middleware deployed at `address`, tracing with the named
    /// node-side tracer.
    pub fn new(inner: Arc<EthersProvider<C>>, address: Address, tracer: String) -> Self {
        Self {
            inner,
            address,
            tracer,
        }
    }

    fn call_tx(&self, data: Bytes) -> TypedTransaction {
        Eip1559TransactionRequest {
            to: Some(self.address.into()),
            data: Some(data),
            ..Default::default()
        }
        .into()
    }
}

#[async_trait::async_trait]
impl<C: JsonRpcClient + 'static> AiMiddleware for AiMiddlewareContract<C> {
    fn address(&self) -> Address {
        self.address
    }

    async fn simulate_validation(
        &self,
        op: &AiOperation,
    ) -> Result<ValidationResult, SimulateValidationError> {
        let tx = self.call_tx(abi::simulate_validation_calldata(op));
        let error = match self.inner.call(&tx, None).await {
            Ok(ret) => {
                return Err(SimulateValidationError::Other(anyhow!(
                    "simulateValidation did not revert, returned 0x{}",
                    ethers::utils::hex::encode(ret)
                )))
            }
            Err(error) => error,
        };
        let Some(revert) = revert_bytes(&error) else {
            return Err(SimulateValidationError::Other(
                anyhow::Error::new(error).context("simulateValidation call failed"),
            ));
        };
        match abi::decode_simulate_validation_revert(&revert) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(failed_op)) => Err(SimulateValidationError::FailedOp(failed_op)),
            Err(err) => Err(SimulateValidationError::UnexpectedRevert(err.to_string())),
        }
    }

    async fn trace_simulate_validation(
        &self,
        op: &AiOperation,
    ) -> anyhow::Result<CollectorTrace> {
        let req = serde_json::json!({
            "from": Address::zero(),
            "to": self.address,
            "data": abi::simulate_validation_calldata(op),
            "maxFeePerGas": op.max_fee_per_gas,
        });
        let opts = serde_json::json!({ "tracer": self.tracer });
        self.inner
            .request("debug_traceCall", (req, "latest", opts))
            .await
            .context("should trace simulateValidation")
    }

    async fn deposit_info(&self, address: Address) -> anyhow::Result<DepositInfo> {
        let tx = self.call_tx(abi::get_deposit_info_calldata(address));
        let out = self
            .inner
            .call(&tx, None)
            .await
            .context("should call getDepositInfo")?;
        abi::decode_deposit_info(&out)
    }

    async fn estimate_handle_ops_gas(
        &self,
        from: Address,
        ops: &[AiOperation],
        beneficiary: Address,
    ) -> Result<U256, HandleOpsEstimateError> {
        let tx: TypedTransaction = Eip1559TransactionRequest {
            from: Some(from),
            to: Some(self.address.into()),
            data: Some(abi::handle_ops_calldata(ops, beneficiary)),
            ..Default::default()
        }
        .into();
        match self.inner.estimate_gas(&tx, None).await {
            Ok(gas) => Ok(gas),
            Err(error) => {
                if let Some(failed_op) =
                    revert_bytes(&error).and_then(|data| abi::try_decode_failed_op(&data))
                {
                    Err(HandleOpsEstimateError::FailedOp(failed_op))
                } else {
                    Err(HandleOpsEstimateError::Other(
                        anyhow::Error::new(error).context("handleOps estimate failed"),
                    ))
                }
            }
        }
    }

    async fn query_op_event(
        &self,
        op_hash: H256,
        lookup_range: u64,
    ) -> anyhow::Result<Option<AiOpEvent>> {
        let head = self
            .inner
            .get_block_number()
            .await
            .context("should get block number for event scan")?
            .as_u64();
        let filter = Filter::new()
            .address(self.address)
            .topic0(abi::AI_OPERATION_EVENT_TOPIC)
            .topic1(op_hash)
            .from_block(head.saturating_sub(lookup_range));
        let logs = self
            .inner
            .get_logs(&filter)
            .await
            .context("should query inclusion logs")?;
        logs.into_iter().next().map(abi::parse_op_event).transpose()
    }
}

// Revert payload of a call, when the node reported one.
fn revert_bytes(error: &ProviderError) -> Option<Bytes> {
    let ProviderError::JsonRpcClientError(dyn_error) = error else {
        return None;
    };
    let jsonrpc_error = dyn_error.as_error_response()?;
    jsonrpc_error.as_revert_data()
}
