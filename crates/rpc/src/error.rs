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

use aiops_pool::{AddOpError, MempoolError};
use aiops_sim::ValidationError;
use jsonrpsee::types::{
    error::{INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE},
    ErrorObjectOwned,
};

// ERC-4337-style numeric error codes.
const REJECTED_BY_EP_OR_ACCOUNT_CODE: i32 = -32500;
const PAYMASTER_REJECTED_CODE: i32 = -32501;
const BANNED_OR_THROTTLED_CODE: i32 = -32502;
const SHORT_VALID_CODE: i32 = -32503;
const INVALID_ENTITY_STAKE_CODE: i32 = -32504;
const UNSUPPORTED_AGGREGATOR_CODE: i32 = -32505;

pub(crate) type EthResult<T> = Result<T, EthRpcError>;

/// Error returned by the RPC server, mapped onto the numeric taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum EthRpcError {
    /// Malformed op or parameters
    #[error("{0}")]
    InvalidParams(String),
    /// The middleware or the account rejected the op during validation
    #[error("{0}")]
    RejectedByEpOrAccount(String),
    /// The paymaster rejected the op, or failed its own validation rules
    #[error("{0}")]
    PaymasterRejected(String),
    /// An entity of the op is banned or throttled
    #[error("{0}")]
    BannedOrThrottled(String),
    /// The op expires too soon to be bundled
    #[error("{0}")]
    ShortValid(String),
    /// An unstaked entity exceeded what unstaked entities are allowed
    #[error("{0}")]
    InvalidEntityStake(String),
    /// The op names an aggregator this bundler does not support
    #[error("unsupported aggregator: {0}")]
    UnsupportedAggregator(String),
    /// Everything else
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<AddOpError> for EthRpcError {
    fn from(error: AddOpError) -> Self {
        match error {
            AddOpError::Validation(validation) => validation.into(),
            AddOpError::Mempool(MempoolError::DuplicateUnderpriced(_, _)) => {
                Self::InvalidParams(error.to_string())
            }
            AddOpError::Mempool(MempoolError::Database(e)) => Self::Internal(e),
            AddOpError::Internal(e) => Self::Internal(e),
        }
    }
}

impl From<ValidationError> for EthRpcError {
    fn from(error: ValidationError) -> Self {
        if let ValidationError::Internal(e) = error {
            return Self::Internal(e);
        }
        let message = error.to_string();
        let paymaster_fault = error.is_paymaster_fault();
        match error {
            ValidationError::Banned(_) | ValidationError::Throttled(_) => {
                Self::BannedOrThrottled(message)
            }
            ValidationError::UnstakedEntityLimit(_, _) => Self::InvalidEntityStake(message),
            ValidationError::ShortValid { .. } => Self::ShortValid(message),
            ValidationError::Rejected(_) => Self::RejectedByEpOrAccount(message),
            ValidationError::Check(_) if paymaster_fault => Self::PaymasterRejected(message),
            ValidationError::Check(_) => Self::InvalidParams(message),
            ValidationError::Simulation(_) if paymaster_fault => Self::PaymasterRejected(message),
            ValidationError::Simulation(_) => Self::RejectedByEpOrAccount(message),
            ValidationError::Internal(e) => Self::Internal(e),
        }
    }
}

impl From<MempoolError> for EthRpcError {
    fn from(error: MempoolError) -> Self {
        match error {
            MempoolError::DuplicateUnderpriced(_, _) => Self::InvalidParams(error.to_string()),
            MempoolError::Database(e) => Self::Internal(e),
        }
    }
}

impl From<EthRpcError> for ErrorObjectOwned {
    fn from(error: EthRpcError) -> Self {
        let msg = error.to_string();
        let code = match &error {
            EthRpcError::InvalidParams(_) => INVALID_PARAMS_CODE,
            EthRpcError::RejectedByEpOrAccount(_) => REJECTED_BY_EP_OR_ACCOUNT_CODE,
            EthRpcError::PaymasterRejected(_) => PAYMASTER_REJECTED_CODE,
            EthRpcError::BannedOrThrottled(_) => BANNED_OR_THROTTLED_CODE,
            EthRpcError::ShortValid(_) => SHORT_VALID_CODE,
            EthRpcError::InvalidEntityStake(_) => INVALID_ENTITY_STAKE_CODE,
            EthRpcError::UnsupportedAggregator(_) => UNSUPPORTED_AGGREGATOR_CODE,
            EthRpcError::Internal(_) => INTERNAL_ERROR_CODE,
        };
        ErrorObjectOwned::owned(code, msg, None::<()>)
    }
}

#[cfg(test)]
mod tests {
    use aiops_sim::{CheckViolation, SimulationViolation};
    use aiops_types::{Entity, FailedOp};
    use ethers::types::Address;

    use super::*;

    #[test]
    fn test_banned_entity_maps_to_32502() {
        let err: EthRpcError =
            ValidationError::Banned(Entity::paymaster(Address::repeat_byte(1))).into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), -32502);
    }

    #[test]
    fn test_throttled_entity_maps_to_32502() {
        let err: EthRpcError =
            ValidationError::Throttled(Entity::account(Address::repeat_byte(1))).into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), -32502);
    }

    #[test]
    fn test_stake_limit_maps_to_32504() {
        let err: EthRpcError =
            ValidationError::UnstakedEntityLimit(Entity::account(Address::repeat_byte(1)), 10)
                .into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), -32504);
    }

    #[test]
    fn test_failed_op_maps_to_32500() {
        let err: EthRpcError = ValidationError::Rejected(FailedOp {
            op_index: 0,
            reason: "AA23 reverted".to_string(),
        })
        .into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), -32500);
        assert!(obj.message().contains("AA23"));
    }

    #[test]
    fn test_trace_violation_maps_to_32500() {
        let err: EthRpcError = ValidationError::Simulation(SimulationViolation::UsedBannedOpcode(
            aiops_types::EntityType::Account,
            "TIMESTAMP".to_string(),
        ))
        .into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), -32500);
    }

    #[test]
    fn test_paymaster_faults_map_to_32501() {
        let err: EthRpcError =
            ValidationError::Simulation(SimulationViolation::UnstakedPaymasterContext).into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), -32501);

        let err: EthRpcError = ValidationError::Check(CheckViolation::PaymasterDepositTooLow(
            1.into(),
            2.into(),
        ))
        .into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), -32501);
    }

    #[test]
    fn test_short_valid_maps_to_32503() {
        let err: EthRpcError = ValidationError::ShortValid {
            valid_until: 10,
            now: 5,
        }
        .into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), -32503);
    }

    #[test]
    fn test_structural_check_maps_to_invalid_params() {
        let err: EthRpcError = ValidationError::Check(CheckViolation::SenderIsZero).into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), INVALID_PARAMS_CODE);
    }

    #[test]
    fn test_replacement_underpriced_maps_to_invalid_params() {
        let err: EthRpcError =
            MempoolError::DuplicateUnderpriced(1.into(), 2.into()).into();
        let obj: ErrorObjectOwned = err.into();
        assert_eq!(obj.code(), INVALID_PARAMS_CODE);
    }
}
