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

//! Hand-rolled ABI stubs for the AiMiddleware contract: method selectors,
//! calldata builders, and revert-envelope decoders.

use aiops_types::{
    AiOpEvent, AiOperation, DepositInfo, FailedOp, ReturnInfo, StakeInfo, ValidationResult,
};
use anyhow::{bail, Context};
use ethers::{
    abi::{decode, encode, ParamType, Token},
    types::{Address, Bytes, Log, H256, U256},
};

/// `simulateValidation(AiOperation)`
pub const SIMULATE_VALIDATION_SELECTOR: [u8; 4] = [0xee, 0x21, 0x94, 0x23];
/// `handleOps(AiOperation[],address)`
pub const HANDLE_OPS_SELECTOR: [u8; 4] = [0x1f, 0xad, 0x94, 0x8c];
/// `getDepositInfo(address)`
pub const GET_DEPOSIT_INFO_SELECTOR: [u8; 4] = [0x52, 0x87, 0xce, 0x12];
/// `createSender(bytes)`, hex form as reported by the tracer
pub const CREATE_SENDER_SELECTOR: &str = "0x570e1a36";
/// `validatePaymasterAiOp(AiOperation,bytes32,uint256)`, hex form
pub const VALIDATE_PAYMASTER_AI_OP_SELECTOR: &str = "0x49480d68";
/// `balanceOf(address)`, hex form
pub const BALANCE_OF_SELECTOR: &str = "0x70a08231";

/// `FailedOp(uint256,string)` revert
const FAILED_OP_SELECTOR: [u8; 4] = [0x22, 0x02, 0x66, 0xb6];
/// `ValidationResult(...)` revert
const VALIDATION_RESULT_SELECTOR: [u8; 4] = [0xe0, 0xcf, 0xf0, 0x5f];
/// Solidity `Error(string)` revert
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// keccak256 topic of `AiOperationEvent(bytes32,address,address,uint256,bool,uint256,uint256)`
pub const AI_OPERATION_EVENT_TOPIC: H256 = H256([
    0x7b, 0x59, 0x2a, 0x4f, 0x68, 0x4d, 0x03, 0x25, 0x78, 0xf7, 0x5d, 0xff, 0x2c, 0xa3, 0xd3,
    0xd2, 0xae, 0xc9, 0x81, 0xa6, 0xd0, 0xa7, 0x82, 0xe1, 0xd1, 0x27, 0x59, 0x5a, 0x65, 0x11,
    0xa4, 0xf1,
]);

fn op_token(op: &AiOperation) -> Token {
    Token::Tuple(vec![
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::Bytes(op.init_code.to_vec()),
        Token::Bytes(op.call_data.to_vec()),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        Token::Bytes(op.paymaster_and_data.to_vec()),
        Token::Bytes(op.signature.to_vec()),
    ])
}

fn call_data_of(selector: [u8; 4], args: &[Token]) -> Bytes {
    let mut data = selector.to_vec();
    data.extend(encode(args));
    data.into()
}

/// Calldata for `simulateValidation(op)`.
pub fn simulate_validation_calldata(op: &AiOperation) -> Bytes {
    call_data_of(SIMULATE_VALIDATION_SELECTOR, &[op_token(op)])
}

/// Calldata for `handleOps(ops, beneficiary)`.
pub fn handle_ops_calldata(ops: &[AiOperation], beneficiary: Address) -> Bytes {
    call_data_of(
        HANDLE_OPS_SELECTOR,
        &[
            Token::Array(ops.iter().map(op_token).collect()),
            Token::Address(beneficiary),
        ],
    )
}

/// Calldata for `getDepositInfo(address)`.
pub fn get_deposit_info_calldata(address: Address) -> Bytes {
    call_data_of(GET_DEPOSIT_INFO_SELECTOR, &[Token::Address(address)])
}

/// Decode `handleOps` calldata back into its batch and beneficiary. Used to
/// recover an included op from its enclosing transaction.
pub fn decode_handle_ops_calldata(data: &[u8]) -> anyhow::Result<(Vec<AiOperation>, Address)> {
    if data.len() < 4 || data[..4] != HANDLE_OPS_SELECTOR {
        bail!("calldata is not a handleOps call");
    }
    let tokens = decode(
        &[
            ParamType::Array(Box::new(op_param_type())),
            ParamType::Address,
        ],
        &data[4..],
    )
    .context("should decode handleOps calldata")?;
    let mut it = tokens.into_iter();
    let ops = match it.next() {
        Some(Token::Array(elements)) => elements
            .into_iter()
            .map(op_from_token)
            .collect::<anyhow::Result<Vec<_>>>()?,
        other => bail!("handleOps batch is not an array: {other:?}"),
    };
    let beneficiary = match it.next() {
        Some(Token::Address(address)) => address,
        other => bail!("handleOps beneficiary is not an address: {other:?}"),
    };
    Ok((ops, beneficiary))
}

fn op_param_type() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Bytes,
        ParamType::Bytes,
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Bytes,
        ParamType::Bytes,
    ])
}

fn op_from_token(token: Token) -> anyhow::Result<AiOperation> {
    let Token::Tuple(fields) = token else {
        bail!("aiOp is not a tuple: {token:?}");
    };
    let mut it = fields.into_iter();
    let sender = match it.next() {
        Some(Token::Address(address)) => address,
        other => bail!("aiOp sender is not an address: {other:?}"),
    };
    let bytes_field = |name: &str, token: Option<Token>| -> anyhow::Result<Bytes> {
        match token {
            Some(Token::Bytes(b)) => Ok(b.into()),
            other => bail!("aiOp {name} is not bytes: {other:?}"),
        }
    };
    Ok(AiOperation {
        sender,
        nonce: uint(it.next(), "nonce")?,
        init_code: bytes_field("initCode", it.next())?,
        call_data: bytes_field("callData", it.next())?,
        call_gas_limit: uint(it.next(), "callGasLimit")?,
        verification_gas_limit: uint(it.next(), "verificationGasLimit")?,
        pre_verification_gas: uint(it.next(), "preVerificationGas")?,
        max_fee_per_gas: uint(it.next(), "maxFeePerGas")?,
        max_priority_fee_per_gas: uint(it.next(), "maxPriorityFeePerGas")?,
        paymaster_and_data: bytes_field("paymasterAndData", it.next())?,
        signature: bytes_field("signature", it.next())?,
    })
}

/// Decode the output of `getDepositInfo`.
pub fn decode_deposit_info(data: &[u8]) -> anyhow::Result<DepositInfo> {
    let tokens = decode(
        &[ParamType::Tuple(vec![
            ParamType::Uint(112),
            ParamType::Bool,
            ParamType::Uint(112),
            ParamType::Uint(32),
            ParamType::Uint(48),
        ])],
        data,
    )
    .context("should decode getDepositInfo output")?;
    let Some(Token::Tuple(fields)) = tokens.into_iter().next() else {
        bail!("getDepositInfo output is not a tuple");
    };
    let mut it = fields.into_iter();
    Ok(DepositInfo {
        deposit: uint(it.next(), "deposit")?,
        staked: matches!(it.next(), Some(Token::Bool(true))),
        stake: uint(it.next(), "stake")?,
        unstake_delay_sec: uint(it.next(), "unstakeDelaySec")?,
        withdraw_time: uint(it.next(), "withdrawTime")?,
    })
}

/// Classify a `simulateValidation` revert payload.
///
/// A successful simulation reverts with `ValidationResult`; a rejection
/// reverts with `FailedOp`. Anything else is unexpected.
pub fn decode_simulate_validation_revert(
    data: &[u8],
) -> anyhow::Result<Result<ValidationResult, FailedOp>> {
    if data.len() < 4 {
        bail!("revert data too short: 0x{}", ethers::utils::hex::encode(data));
    }
    let (selector, args) = data.split_at(4);
    if selector == VALIDATION_RESULT_SELECTOR {
        Ok(Ok(decode_validation_result(args)?))
    } else if selector == FAILED_OP_SELECTOR {
        Ok(Err(decode_failed_op(args)?))
    } else if let Some(reason) = decode_error_string(data) {
        bail!("simulateValidation reverted: {reason}");
    } else {
        bail!(
            "unrecognized simulateValidation revert: 0x{}",
            ethers::utils::hex::encode(data)
        );
    }
}

/// Decode the arguments of a `FailedOp` revert (after the selector).
pub fn decode_failed_op(args: &[u8]) -> anyhow::Result<FailedOp> {
    let tokens = decode(&[ParamType::Uint(256), ParamType::String], args)
        .context("should decode FailedOp revert")?;
    let mut it = tokens.into_iter();
    Ok(FailedOp {
        op_index: uint(it.next(), "opIndex")?.as_usize(),
        reason: match it.next() {
            Some(Token::String(s)) => s,
            other => bail!("FailedOp reason is not a string: {other:?}"),
        },
    })
}

/// Decode a `FailedOp` out of raw revert data including the selector, if it
/// is one.
pub fn try_decode_failed_op(data: &[u8]) -> Option<FailedOp> {
    if data.len() < 4 || data[..4] != FAILED_OP_SELECTOR {
        return None;
    }
    decode_failed_op(&data[4..]).ok()
}

/// Decode a standard solidity `Error(string)` revert.
pub fn decode_error_string(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    match decode(&[ParamType::String], &data[4..])
        .ok()?
        .into_iter()
        .next()
    {
        Some(Token::String(s)) => Some(s),
        _ => None,
    }
}

/// Decode the output of `validatePaymasterAiOp`: `(bytes context, uint256
/// validationData)`.
pub fn decode_validate_paymaster_return(data: &[u8]) -> anyhow::Result<(Bytes, U256)> {
    let tokens = decode(&[ParamType::Bytes, ParamType::Uint(256)], data)
        .context("should decode validatePaymasterAiOp output")?;
    let mut it = tokens.into_iter();
    let context = match it.next() {
        Some(Token::Bytes(b)) => b.into(),
        other => bail!("paymaster context is not bytes: {other:?}"),
    };
    Ok((context, uint(it.next(), "validationData")?))
}

/// Decode an `AiOperationEvent` log into its event form.
pub fn parse_op_event(log: Log) -> anyhow::Result<AiOpEvent> {
    if log.topics.len() != 4 {
        bail!("AiOperationEvent log should carry 4 topics");
    }
    let tokens = decode(
        &[
            ParamType::Uint(256),
            ParamType::Bool,
            ParamType::Uint(256),
            ParamType::Uint(256),
        ],
        &log.data,
    )
    .context("should decode AiOperationEvent data")?;
    let mut it = tokens.into_iter();
    Ok(AiOpEvent {
        ai_op_hash: log.topics[1],
        sender: Address::from_slice(&log.topics[2][12..]),
        paymaster: Address::from_slice(&log.topics[3][12..]),
        nonce: uint(it.next(), "nonce")?,
        success: matches!(it.next(), Some(Token::Bool(true))),
        actual_gas_cost: uint(it.next(), "actualGasCost")?,
        actual_gas_used: uint(it.next(), "actualGasUsed")?,
        transaction_hash: log.transaction_hash.unwrap_or_default(),
        block_number: log.block_number.unwrap_or_default().as_u64(),
        block_hash: log.block_hash.unwrap_or_default(),
    })
}

fn decode_validation_result(args: &[u8]) -> anyhow::Result<ValidationResult> {
    let stake_info = || ParamType::Tuple(vec![ParamType::Uint(256), ParamType::Uint(256)]);
    let tokens = decode(
        &[
            ParamType::Tuple(vec![
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Bool,
                ParamType::Uint(48),
                ParamType::Uint(48),
                ParamType::Bytes,
            ]),
            stake_info(),
            stake_info(),
            stake_info(),
        ],
        args,
    )
    .context("should decode ValidationResult revert")?;
    let mut it = tokens.into_iter();

    let Some(Token::Tuple(ri)) = it.next() else {
        bail!("ValidationResult returnInfo is not a tuple");
    };
    let mut ri = ri.into_iter();
    let return_info = ReturnInfo {
        pre_op_gas: uint(ri.next(), "preOpGas")?,
        prefund: uint(ri.next(), "prefund")?,
        sig_failed: matches!(ri.next(), Some(Token::Bool(true))),
        valid_after: uint(ri.next(), "validAfter")?.as_u64(),
        valid_until: uint(ri.next(), "validUntil")?.as_u64(),
        paymaster_context: match ri.next() {
            Some(Token::Bytes(b)) => b.into(),
            other => bail!("paymasterContext is not bytes: {other:?}"),
        },
    };

    let mut next_stake = move || -> anyhow::Result<StakeInfo> {
        let Some(Token::Tuple(si)) = it.next() else {
            bail!("ValidationResult stake info is not a tuple");
        };
        let mut si = si.into_iter();
        Ok(StakeInfo {
            stake: uint(si.next(), "stake")?,
            unstake_delay_sec: uint(si.next(), "unstakeDelaySec")?,
        })
    };

    Ok(ValidationResult {
        return_info,
        sender_info: next_stake()?,
        factory_info: next_stake()?,
        paymaster_info: next_stake()?,
    })
}

fn uint(token: Option<Token>, name: &str) -> anyhow::Result<U256> {
    match token {
        Some(Token::Uint(u)) => Ok(u),
        other => bail!("{name} is not a uint: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_validation_calldata() {
        let data = simulate_validation_calldata(&AiOperation::default());
        assert_eq!(&data[..4], SIMULATE_VALIDATION_SELECTOR);
        // selector + offset word + 480-byte zeroed op encoding
        assert_eq!(data.len(), 4 + 32 + 480);
    }

    #[test]
    fn test_handle_ops_calldata_round_trip() {
        let ops = vec![
            AiOperation {
                sender: Address::repeat_byte(1),
                nonce: 7.into(),
                call_data: vec![0xde, 0xad].into(),
                max_fee_per_gas: 1_000.into(),
                ..Default::default()
            },
            AiOperation::default(),
        ];
        let beneficiary = Address::repeat_byte(7);
        let data = handle_ops_calldata(&ops, beneficiary);
        assert_eq!(&data[..4], HANDLE_OPS_SELECTOR);

        let (decoded_ops, decoded_beneficiary) = decode_handle_ops_calldata(&data).unwrap();
        assert_eq!(decoded_ops, ops);
        assert_eq!(decoded_beneficiary, beneficiary);

        assert!(decode_handle_ops_calldata(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn test_failed_op_round_trip() {
        let args = encode(&[
            Token::Uint(3.into()),
            Token::String("AA25 invalid account nonce".to_string()),
        ]);
        let failed = decode_failed_op(&args).unwrap();
        assert_eq!(failed.op_index, 3);
        assert_eq!(failed.reason, "AA25 invalid account nonce");

        let mut raw = FAILED_OP_SELECTOR.to_vec();
        raw.extend(args);
        assert!(try_decode_failed_op(&raw).is_some());
        let decoded = decode_simulate_validation_revert(&raw).unwrap();
        assert!(decoded.is_err());
    }

    #[test]
    fn test_validation_result_round_trip() {
        let args = encode(&[
            Token::Tuple(vec![
                Token::Uint(50_000.into()),
                Token::Uint(1_000_000.into()),
                Token::Bool(false),
                Token::Uint(0.into()),
                Token::Uint(1_700_000_000u64.into()),
                Token::Bytes(vec![]),
            ]),
            Token::Tuple(vec![Token::Uint(1.into()), Token::Uint(2.into())]),
            Token::Tuple(vec![Token::Uint(0.into()), Token::Uint(0.into())]),
            Token::Tuple(vec![Token::Uint(3.into()), Token::Uint(4.into())]),
        ]);
        let mut raw = VALIDATION_RESULT_SELECTOR.to_vec();
        raw.extend(args);

        let result = decode_simulate_validation_revert(&raw).unwrap().unwrap();
        assert_eq!(result.return_info.pre_op_gas, U256::from(50_000));
        assert_eq!(result.return_info.valid_until, 1_700_000_000);
        assert!(!result.return_info.sig_failed);
        assert_eq!(result.sender_info.stake, U256::from(1));
        assert_eq!(result.paymaster_info.unstake_delay_sec, U256::from(4));
    }

    #[test]
    fn test_decode_error_string() {
        let mut raw = ERROR_STRING_SELECTOR.to_vec();
        raw.extend(encode(&[Token::String("nope".to_string())]));
        assert_eq!(decode_error_string(&raw).as_deref(), Some("nope"));
        assert!(decode_simulate_validation_revert(&raw).is_err());
    }
}
