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

use aiops_types::{Entity, EntityType, FailedOp};
use ethers::types::{Address, U256};

/// Error of one ingress pipeline run. The first failing handler aborts the
/// pipeline and this is what the RPC layer maps onto the numeric taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// An entity of the op is banned
    #[error("banned entity: {0}")]
    Banned(Entity),
    /// An entity of the op is throttled and at its pending-op allowance
    #[error("throttled entity: {0}")]
    Throttled(Entity),
    /// An unstaked entity has reached its pending-op allowance
    #[error("unstaked entity: {0} exceeds pending ops limit of {1}")]
    UnstakedEntityLimit(Entity, usize),
    /// A structural check failed
    #[error("{0}")]
    Check(CheckViolation),
    /// The middleware rejected the op during simulation
    #[error("{}", .0.reason)]
    Rejected(FailedOp),
    /// A trace-based rule failed
    #[error("{0}")]
    Simulation(SimulationViolation),
    /// The op's validity window ends too soon to be bundled
    #[error("operation expires too soon: validUntil {valid_until}, now {now}")]
    ShortValid {
        /// Deadline reported by validation
        valid_until: u64,
        /// Current unix time
        now: u64,
    },
    /// Anything else; surfaces as an internal error
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Structural violations found before any simulation.
#[derive(Clone, Debug, Eq, PartialEq, parse_display::Display)]
pub enum CheckViolation {
    /// The sender is the zero address.
    #[display("sender must not be the zero address")]
    SenderIsZero,
    /// initCode is present but too short to contain a factory address.
    #[display("initCode must start with a 20-byte factory address, but was only {0} bytes")]
    InitCodeTooShort(usize),
    /// initCode is present but carries the zero factory address.
    #[display("initCode: does not contain a valid address")]
    FactoryIsZero,
    /// paymasterAndData is present but too short to contain an address.
    #[display("paymasterAndData must start with a 20-byte paymaster address, but was only {0} bytes")]
    PaymasterTooShort(usize),
    /// The paymaster has no deployed code.
    #[display("paymaster is not a deployed contract: {0:?}")]
    PaymasterIsNotContract(Address),
    /// The paymaster deposit cannot cover the op's max prefund.
    #[display("paymaster deposit is {0} but must be at least {1} to cover the max prefund")]
    PaymasterDepositTooLow(U256, U256),
    /// verificationGasLimit exceeds the configured cap.
    #[display("verificationGasLimit is {0} but must be at most {1}")]
    VerificationGasLimitTooHigh(U256, U256),
    /// callGasLimit is below the intrinsic call cost.
    #[display("callGasLimit is {0} but must be at least {1}")]
    CallGasLimitTooLow(U256, U256),
    /// maxFeePerGas is below maxPriorityFeePerGas.
    #[display("maxFeePerGas ({0}) must be equal to or greater than maxPriorityFeePerGas ({1})")]
    PriorityFeeOverFeeCap(U256, U256),
    /// maxFeePerGas cannot cover the current base fee.
    #[display("maxFeePerGas is {0} but must be at least the current base fee {1}")]
    MaxFeePerGasTooLow(U256, U256),
    /// On a legacy network the two fee fields must match.
    #[display("legacy fee mode: maxPriorityFeePerGas must equal maxFeePerGas")]
    LegacyFeesMismatch,
    /// preVerificationGas is below the static overhead.
    #[display("preVerificationGas is {0} but must be at least {1}")]
    PreVerificationGasTooLow(U256, U256),
}

/// Violations of the trace-based opcode, call, and storage rules.
#[derive(Clone, Debug, Eq, PartialEq, parse_display::Display)]
pub enum SimulationViolation {
    /// A validation phase ran out of gas.
    #[display("{0} OOG")]
    OutOfGas(EntityType),
    /// An entity inspected the middleware's code.
    #[display("{0} has forbidden EXTCODE* access to the AiMiddleware")]
    ForbiddenExtCodeAccess(EntityType),
    /// An entity used an opcode from the banned set.
    #[display("{0} uses banned opcode: {1}")]
    UsedBannedOpcode(EntityType, String),
    /// An unstaked entity used an opcode banned for unstaked entities.
    #[display("unstaked {0} uses banned opcode: {1}")]
    UnstakedUsedBannedOpcode(EntityType, String),
    /// The factory used CREATE2 more than its single allowed time.
    #[display("factory with too many CREATE2")]
    FactoryUsedCreate2Twice,
    /// The account or paymaster used CREATE2.
    #[display("{0} uses banned opcode: CREATE2")]
    UsedCreate2(EntityType),
    /// An entity called an address with no deployed code.
    #[display("{0} uses {1} on an address with no deployed code: {2:?}")]
    AccessedUndeployedContract(EntityType, String, Address),
    /// An entity touched storage it may never touch.
    #[display("{0} has forbidden {1} to {2} slot {3:#x}")]
    ForbiddenStorageAccess(EntityType, String, String, U256),
    /// Storage access that requires the entity to be staked, but it is not.
    #[display("unstaked {0} accessed {1} slot {2:#x}")]
    UnstakedStorageAccess(EntityType, String, U256),
    /// An inner call transferred value to something other than the middleware.
    #[display("{0} has a forbidden value transfer to {1}")]
    CallHadValue(String, String),
    /// An entity called balanceOf on the middleware.
    #[display("{0} cannot call balanceOf on AiMiddleware")]
    CalledBalanceOf(String),
    /// The paymaster returned a validation context while unstaked.
    #[display("unstaked paymaster must not return context")]
    UnstakedPaymasterContext,
    /// The account or paymaster signature did not verify.
    #[display("invalid account or paymaster signature")]
    SignatureFailed,
}

impl From<CheckViolation> for ValidationError {
    fn from(violation: CheckViolation) -> Self {
        Self::Check(violation)
    }
}

impl From<SimulationViolation> for ValidationError {
    fn from(violation: SimulationViolation) -> Self {
        Self::Simulation(violation)
    }
}

impl ValidationError {
    /// Whether the failure concerns the paymaster, for the RPC taxonomy.
    pub fn is_paymaster_fault(&self) -> bool {
        match self {
            Self::Check(
                CheckViolation::PaymasterTooShort(_)
                | CheckViolation::PaymasterIsNotContract(_)
                | CheckViolation::PaymasterDepositTooLow(_, _),
            ) => true,
            Self::Simulation(SimulationViolation::UnstakedPaymasterContext) => true,
            _ => false,
        }
    }
}
