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

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// Successful outcome of `simulateValidation`, recovered from the
/// middleware's `ValidationResult` revert envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Aggregate gas/deadline information of the validation phase
    pub return_info: ReturnInfo,
    /// Stake of the sender
    pub sender_info: StakeInfo,
    /// Stake of the factory, zeroed when absent
    pub factory_info: StakeInfo,
    /// Stake of the paymaster, zeroed when absent
    pub paymaster_info: StakeInfo,
}

/// Gas and validity information returned by the validation phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnInfo {
    /// Gas consumed before the execution phase, including verification
    pub pre_op_gas: U256,
    /// Wei the payer must be able to cover
    pub prefund: U256,
    /// Whether the account or paymaster signature failed
    pub sig_failed: bool,
    /// Operation is invalid before this unix timestamp
    pub valid_after: u64,
    /// Operation is invalid after this unix timestamp, zero for no deadline
    pub valid_until: u64,
    /// Context blob returned by the paymaster's validation
    pub paymaster_context: Bytes,
}

/// A (stake, unstakeDelaySec) pair from the validation result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakeInfo {
    /// Wei locked as stake
    pub stake: U256,
    /// Delay before the stake can be withdrawn, in seconds
    pub unstake_delay_sec: U256,
}

/// `FailedOp` revert payload: the middleware rejected an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("FailedOp({op_index}): {reason}")]
pub struct FailedOp {
    /// Index of the offending operation within the submitted batch
    pub op_index: usize,
    /// Middleware-provided rejection reason
    pub reason: String,
}

/// Decoded `AiOperationEvent` log emitted by the middleware on inclusion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiOpEvent {
    /// Hash of the included operation
    pub ai_op_hash: H256,
    /// Sender of the operation
    pub sender: Address,
    /// Paymaster of the operation, zero when self-funded
    pub paymaster: Address,
    /// Nonce of the operation
    pub nonce: U256,
    /// Whether the execution phase succeeded
    pub success: bool,
    /// Wei actually charged
    pub actual_gas_cost: U256,
    /// Gas actually used
    pub actual_gas_used: U256,
    /// Hash of the enclosing transaction
    pub transaction_hash: H256,
    /// Number of the enclosing block
    pub block_number: u64,
    /// Hash of the enclosing block
    pub block_hash: H256,
}
