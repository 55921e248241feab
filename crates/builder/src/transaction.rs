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

//! `handleOps` transaction assembly shared by both submitters: the
//! estimate-and-trim loop and EIP-1559 signing.

use std::time::Duration;

use aiops_provider::{abi, AiMiddleware, HandleOpsEstimateError, NodeProvider};
use anyhow::anyhow;
use ethers::{
    signers::Signer,
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, Eip1559TransactionRequest, H256,
        U256,
    },
};
use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::{BatchCtx, SubmitError};

// How often the post-submission receipt poll fires.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Parameters of a signed `handleOps` transaction.
#[derive(Clone, Debug)]
pub struct TxParams {
    /// Beneficiary of the gas refund
    pub beneficiary: Address,
    /// Transaction nonce of the submitting EOA
    pub nonce: U256,
    /// Gas limit, from the estimate loop
    pub gas_limit: U256,
    /// EIP-1559 fee cap
    pub max_fee_per_gas: U256,
    /// EIP-1559 tip cap
    pub max_priority_fee_per_gas: U256,
}

/// Iteratively estimate gas for `handleOps(batch, beneficiary)`. Each
/// `FailedOp` revert evicts the offending op and the estimate is retried;
/// any other failure aborts the tick. Returns `None` once the batch is
/// empty.
pub async fn estimate_and_trim<M: AiMiddleware>(
    ctx: &mut BatchCtx,
    middleware: &M,
    from: Address,
    beneficiary: Address,
) -> anyhow::Result<Option<U256>> {
    while !ctx.batch.is_empty() {
        let ops: Vec<_> = ctx.batch.iter().map(|r| r.op.clone()).collect();
        match middleware
            .estimate_handle_ops_gas(from, &ops, beneficiary)
            .await
        {
            Ok(gas) => return Ok(Some(gas)),
            Err(HandleOpsEstimateError::FailedOp(failed_op)) => {
                warn!(
                    op_index = failed_op.op_index,
                    reason = %failed_op.reason,
                    "dropping op that reverts handleOps estimation"
                );
                ctx.mark_op_for_removal(failed_op.op_index, &failed_op.reason);
            }
            Err(HandleOpsEstimateError::Other(error)) => return Err(error),
        }
    }
    Ok(None)
}

/// Build and sign the EIP-1559 `handleOps` transaction for the batch.
/// Returns the raw transaction bytes and their hash.
pub async fn build_handle_ops_tx<S: Signer>(
    signer: &S,
    ctx: &BatchCtx,
    params: &TxParams,
) -> anyhow::Result<(Bytes, H256)> {
    let ops: Vec<_> = ctx.batch.iter().map(|r| r.op.clone()).collect();
    let request = Eip1559TransactionRequest {
        from: Some(signer.address()),
        to: Some(ctx.middleware.into()),
        data: Some(abi::handle_ops_calldata(&ops, params.beneficiary)),
        nonce: Some(params.nonce),
        gas: Some(params.gas_limit),
        max_fee_per_gas: Some(params.max_fee_per_gas),
        max_priority_fee_per_gas: Some(params.max_priority_fee_per_gas),
        chain_id: Some(ctx.chain_id.into()),
        ..Default::default()
    };
    let tx: TypedTransaction = request.into();
    let signature = signer
        .sign_transaction(&tx)
        .await
        .map_err(|e| anyhow!("should sign handleOps transaction: {e}"))?;
    let raw = tx.rlp_signed(&signature);
    let hash = H256::from(ethers::utils::keccak256(&raw));
    Ok((raw, hash))
}

/// Wait for the transaction to mine with a success status. A zero timeout
/// skips the wait entirely.
pub async fn wait_for_receipt<P: NodeProvider>(
    provider: &P,
    hash: H256,
    timeout: Duration,
) -> Result<(), SubmitError> {
    if timeout.is_zero() {
        return Ok(());
    }
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(receipt) = provider
            .transaction_receipt(hash)
            .await
            .map_err(SubmitError::Other)?
        {
            return if receipt.status == Some(1u64.into()) {
                Ok(())
            } else {
                Err(SubmitError::TransactionFailed(hash))
            };
        }
        if Instant::now() >= deadline {
            return Err(SubmitError::InclusionTimeout(hash));
        }
        sleep(RECEIPT_POLL_INTERVAL.min(deadline - Instant::now())).await;
    }
}

#[cfg(test)]
mod tests {
    use aiops_pool::OpRecord;
    use aiops_provider::MockAiMiddleware;
    use aiops_types::{AiOperation, FailedOp};
    use ethers::{signers::LocalWallet, types::TransactionReceipt};

    use super::*;

    #[tokio::test]
    async fn test_estimate_trims_failing_ops() {
        let mut middleware = MockAiMiddleware::new();
        let mut first = true;
        middleware
            .expect_estimate_handle_ops_gas()
            .returning(move |_, ops, _| {
                if first && ops.len() == 3 {
                    first = false;
                    Err(HandleOpsEstimateError::FailedOp(FailedOp {
                        op_index: 1,
                        reason: "AA23 reverted".to_string(),
                    }))
                } else {
                    Ok(500_000.into())
                }
            });

        let mut ctx = ctx(3);
        let gas = estimate_and_trim(&mut ctx, &middleware, Address::zero(), Address::zero())
            .await
            .unwrap();
        assert_eq!(gas, Some(500_000.into()));
        assert_eq!(ctx.batch.len(), 2);
        assert_eq!(ctx.pending_removal.len(), 1);
        assert_eq!(ctx.pending_removal[0].record.op.nonce, U256::one());
    }

    #[tokio::test]
    async fn test_estimate_empty_batch() {
        let middleware = MockAiMiddleware::new();
        let mut ctx = ctx(0);
        let gas = estimate_and_trim(&mut ctx, &middleware, Address::zero(), Address::zero())
            .await
            .unwrap();
        assert_eq!(gas, None);
    }

    #[tokio::test]
    async fn test_estimate_drains_batch() {
        let mut middleware = MockAiMiddleware::new();
        middleware
            .expect_estimate_handle_ops_gas()
            .returning(|_, _, _| {
                Err(HandleOpsEstimateError::FailedOp(FailedOp {
                    op_index: 0,
                    reason: "AA10 sender already constructed".to_string(),
                }))
            });
        let mut ctx = ctx(2);
        let gas = estimate_and_trim(&mut ctx, &middleware, Address::zero(), Address::zero())
            .await
            .unwrap();
        assert_eq!(gas, None);
        assert!(ctx.batch.is_empty());
        assert_eq!(ctx.pending_removal.len(), 2);
    }

    #[tokio::test]
    async fn test_build_and_sign() {
        let wallet: LocalWallet =
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
                .parse()
                .unwrap();
        let wallet = wallet.with_chain_id(1u64);
        let ctx = ctx(1);
        let params = TxParams {
            beneficiary: Address::repeat_byte(7),
            nonce: 3.into(),
            gas_limit: 1_000_000.into(),
            max_fee_per_gas: 40.into(),
            max_priority_fee_per_gas: 2.into(),
        };
        let (raw, hash) = build_handle_ops_tx(&wallet, &ctx, &params).await.unwrap();
        assert!(!raw.is_empty());
        assert_eq!(hash, H256::from(ethers::utils::keccak256(&raw)));
    }

    #[tokio::test]
    async fn test_wait_for_receipt_success() {
        use aiops_provider::MockNodeProvider;
        let mut provider = MockNodeProvider::new();
        provider.expect_transaction_receipt().returning(|_| {
            Ok(Some(TransactionReceipt {
                status: Some(1u64.into()),
                ..Default::default()
            }))
        });
        wait_for_receipt(&provider, H256::zero(), Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_receipt_failed_status() {
        use aiops_provider::MockNodeProvider;
        let mut provider = MockNodeProvider::new();
        provider.expect_transaction_receipt().returning(|_| {
            Ok(Some(TransactionReceipt {
                status: Some(0u64.into()),
                ..Default::default()
            }))
        });
        assert!(matches!(
            wait_for_receipt(&provider, H256::zero(), Duration::from_secs(5)).await,
            Err(SubmitError::TransactionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_for_receipt_zero_timeout_skips() {
        use aiops_provider::MockNodeProvider;
        let provider = MockNodeProvider::new();
        wait_for_receipt(&provider, H256::zero(), Duration::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_receipt_times_out() {
        use aiops_provider::MockNodeProvider;
        let mut provider = MockNodeProvider::new();
        provider
            .expect_transaction_receipt()
            .returning(|_| Ok(None));
        assert!(matches!(
            wait_for_receipt(&provider, H256::zero(), Duration::from_secs(30)).await,
            Err(SubmitError::InclusionTimeout(_))
        ));
    }

    fn ctx(n: usize) -> BatchCtx {
        let batch = (0..n)
            .map(|i| OpRecord {
                op: AiOperation {
                    sender: Address::repeat_byte(1),
                    nonce: i.into(),
                    ..Default::default()
                },
                added_at_ms: 0,
                code_hash: None,
                touched: Vec::new(),
                alt_mempool_ids: Vec::new(),
            })
            .collect();
        BatchCtx::new(
            batch,
            Address::repeat_byte(0xee),
            1,
            100,
            Some(10.into()),
            U256::one(),
        )
    }
}
