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

//! Wire types of the `eth_` namespace. Numeric fields use hex quantities,
//! byte fields hex strings; aiOps themselves serialize with their canonical
//! field names.

use aiops_types::{AiOpEvent, AiOperation};
use ethers::types::{Address, H256, U256, U64};
use serde::{Deserialize, Serialize};

/// Receipt of an included aiOp.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAiOperationReceipt {
    /// Hash of the operation
    pub ai_op_hash: H256,
    /// Sender of the operation
    pub sender: Address,
    /// Nonce of the operation
    pub nonce: U256,
    /// Paymaster, zero when self-funded
    pub paymaster: Address,
    /// Wei actually charged
    pub actual_gas_cost: U256,
    /// Gas actually used
    pub actual_gas_used: U256,
    /// Whether the execution phase succeeded
    pub success: bool,
    /// Hash of the enclosing transaction
    pub transaction_hash: H256,
    /// Number of the enclosing block
    pub block_number: U64,
    /// Hash of the enclosing block
    pub block_hash: H256,
}

impl From<AiOpEvent> for RpcAiOperationReceipt {
    fn from(event: AiOpEvent) -> Self {
        Self {
            ai_op_hash: event.ai_op_hash,
            sender: event.sender,
            nonce: event.nonce,
            paymaster: event.paymaster,
            actual_gas_cost: event.actual_gas_cost,
            actual_gas_used: event.actual_gas_used,
            success: event.success,
            transaction_hash: event.transaction_hash,
            block_number: event.block_number.into(),
            block_hash: event.block_hash,
        }
    }
}

/// An aiOp with its inclusion coordinates, when known. Pending ops carry
/// null coordinates.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAiOperationByHash {
    /// The operation itself
    pub ai_operation: AiOperation,
    /// The middleware it targets
    pub middleware: Address,
    /// Enclosing transaction, null while pending
    pub transaction_hash: Option<H256>,
    /// Enclosing block number, null while pending
    pub block_number: Option<U64>,
    /// Enclosing block hash, null while pending
    pub block_hash: Option<H256>,
}

/// Response of `eth_estimateAiOperationGas`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcGasEstimate {
    /// Bundler overhead compensation
    pub pre_verification_gas: U256,
    /// Gas for the validation phase
    pub verification_gas_limit: U256,
    /// Gas for the execution phase
    pub call_gas_limit: U256,
}
