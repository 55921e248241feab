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

//! Wire types of the bundler-collector tracer attached to
//! `debug_traceCall(simulateValidation)`. The tracer itself runs inside the
//! node; this module only mirrors its JSON report.

use std::collections::HashMap;

use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Full tracer report for one simulated validation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorTrace {
    /// One entry per top-level call made by the middleware during
    /// validation (factory, account, paymaster phases)
    #[serde(default)]
    pub calls_from_middleware: Vec<EntityCallInfo>,
    /// Hex-encoded pre-images of every keccak256 observed during the trace
    #[serde(default)]
    pub keccak: Vec<String>,
    /// Flat list of call frames in execution order
    #[serde(default)]
    pub calls: Vec<CallFrame>,
}

/// Aggregated information about one top-level validation call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCallInfo {
    /// Address the middleware called into
    pub top_level_target_address: Address,
    /// 4-byte selector of the top-level call, hex encoded
    #[serde(default)]
    pub top_level_method_sig: String,
    /// Storage accesses per touched address
    #[serde(default)]
    pub access: HashMap<Address, AccessInfo>,
    /// Opcode usage counts within this phase
    #[serde(default)]
    pub opcodes: HashMap<String, u64>,
    /// Deployed-code size of every address targeted by a call-like opcode
    #[serde(default)]
    pub contract_size: HashMap<Address, ContractSizeInfo>,
    /// EXTCODE* opcodes used per accessed address
    #[serde(default)]
    pub ext_code_access_info: HashMap<Address, String>,
    /// Whether this phase ran out of gas
    #[serde(default)]
    pub oog: bool,
}

/// Storage slots read and written at one address.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccessInfo {
    /// Slot to value-before-access
    #[serde(default)]
    pub reads: HashMap<U256, String>,
    /// Slot to write count
    #[serde(default)]
    pub writes: HashMap<U256, u64>,
}

/// Code-size probe result for a call target.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSizeInfo {
    /// Length of deployed code at the target
    pub contract_size: u64,
    /// The opcode that touched the target
    #[serde(default)]
    pub opcode: String,
}

/// One call frame observed during the trace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Caller of the frame
    pub from: Address,
    /// Target of the frame
    pub to: Address,
    /// 4-byte selector of the frame's calldata, hex encoded
    #[serde(default)]
    pub method: String,
    /// Return data of the frame, when captured
    #[serde(default, rename = "return")]
    pub ret: Option<Bytes>,
    /// Wei transferred with the call
    #[serde(default)]
    pub value: Option<U256>,
}
