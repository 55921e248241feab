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

use aiops_types::{AiOpEvent, AiOperation, DepositInfo, ValidationResult};
use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, H256, U256};
#[cfg(any(test, feature = "test-utils"))]
use mockall::automock;

use crate::{error::HandleOpsEstimateError, CollectorTrace, SimulateValidationError};

/// Access to the Ethereum node backing the bundler.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait::async_trait]
pub trait NodeProvider: Send + Sync + 'static {
    /// Chain id the node is serving.
    async fn chain_id(&self) -> anyhow::Result<u64>;

    /// Latest block number.
    async fn block_number(&self) -> anyhow::Result<u64>;

    /// Base fee of the latest block; `None` on pre-EIP-1559 networks.
    async fn base_fee(&self) -> anyhow::Result<Option<U256>>;

    /// Suggested priority fee.
    async fn suggest_gas_tip(&self) -> anyhow::Result<U256>;

    /// Deployed code at an address, empty for EOAs and empty accounts.
    async fn get_code(&self, address: Address) -> anyhow::Result<Bytes>;

    /// Next transaction nonce of an account.
    async fn transaction_count(&self, address: Address) -> anyhow::Result<U256>;

    /// Estimate gas of a call.
    async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
    ) -> anyhow::Result<U256>;

    /// Broadcast a raw signed transaction, returning its hash.
    async fn send_raw_transaction(&self, raw: Bytes) -> anyhow::Result<H256>;

    /// Receipt of a transaction, once mined.
    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> anyhow::Result<Option<TransactionReceipt>>;

    /// A transaction by hash, if known to the node.
    async fn transaction_by_hash(&self, hash: H256) -> anyhow::Result<Option<Transaction>>;

    /// Keccak of the deployed code at each address, folded (over the sorted
    /// address list) into a single digest. Used for the code-hash snapshot.
    async fn code_hash(&self, addresses: Vec<Address>) -> anyhow::Result<H256>;
}

/// Access to one deployed AiMiddleware contract.
#[cfg_attr(any(test, feature = "test-utils"), automock)]
#[async_trait::async_trait]
pub trait AiMiddleware: Send + Sync + 'static {
    /// Address of the contract.
    fn address(&self) -> Address;

    /// Static-call `simulateValidation(op)` and recover the
    /// `ValidationResult` envelope it reverts with.
    async fn simulate_validation(
        &self,
        op: &AiOperation,
    ) -> Result<ValidationResult, SimulateValidationError>;

    /// `debug_traceCall` of `simulateValidation(op)` under the
    /// bundler-collector tracer.
    async fn trace_simulate_validation(
        &self,
        op: &AiOperation,
    ) -> anyhow::Result<CollectorTrace>;

    /// Deposit and stake of an entity.
    async fn deposit_info(&self, address: Address) -> anyhow::Result<DepositInfo>;

    /// Estimate gas of `handleOps(ops, beneficiary)` from the given sender.
    async fn estimate_handle_ops_gas(
        &self,
        from: Address,
        ops: &[AiOperation],
        beneficiary: Address,
    ) -> Result<U256, HandleOpsEstimateError>;

    /// Find the inclusion event of an operation, scanning back at most
    /// `lookup_range` blocks from the head.
    async fn query_op_event(
        &self,
        op_hash: H256,
        lookup_range: u64,
    ) -> anyhow::Result<Option<AiOpEvent>>;
}
