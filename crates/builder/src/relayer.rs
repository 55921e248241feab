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

//! Direct submission: the batch goes out as a regular signed EOA
//! transaction to the public mempool. Private bundlers only; this path is
//! frontrunnable and must not be used where ops are gossiped.

use std::{sync::Arc, time::Duration};

use aiops_provider::{AiMiddleware, NodeProvider};
use ethers::{signers::Signer, types::Address};
use tracing::info;

use crate::{
    transaction::{build_handle_ops_tx, estimate_and_trim, wait_for_receipt, TxParams},
    BatchCtx, BatchHandler,
};

/// Default time to wait for the relayed transaction to mine.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// The direct-mode submitter.
pub struct Relayer<P, M, S> {
    provider: Arc<P>,
    middleware: Arc<M>,
    signer: S,
    beneficiary: Address,
    wait_timeout: Duration,
}

impl<P, M, S> Relayer<P, M, S> {
    /// Create a relayer submitting from `signer`, refunding `beneficiary`.
    pub fn new(provider: Arc<P>, middleware: Arc<M>, signer: S, beneficiary: Address) -> Self {
        Self {
            provider,
            middleware,
            signer,
            beneficiary,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    /// Total time to wait for inclusion; zero skips the wait.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl<P, M, S> BatchHandler for Relayer<P, M, S>
where
    P: NodeProvider,
    M: AiMiddleware,
    S: Signer + 'static,
{
    fn name(&self) -> &'static str {
        "relayer"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        let Some(gas_limit) = estimate_and_trim(
            ctx,
            self.middleware.as_ref(),
            self.signer.address(),
            self.beneficiary,
        )
        .await?
        else {
            return Ok(());
        };

        // EIP-1559 fees: twice the current base fee plus the tip absorbs a
        // few blocks of fee growth.
        let base_fee = ctx.base_fee.unwrap_or_default();
        let params = TxParams {
            beneficiary: self.beneficiary,
            nonce: self
                .provider
                .transaction_count(self.signer.address())
                .await?,
            gas_limit,
            max_fee_per_gas: base_fee * 2 + ctx.tip,
            max_priority_fee_per_gas: ctx.tip,
        };
        let (raw, _) = build_handle_ops_tx(&self.signer, ctx, &params).await?;

        let sent_hash = self.provider.send_raw_transaction(raw).await?;
        ctx.txn_hash = Some(sent_hash);
        info!(txn_hash = ?sent_hash, ops = ctx.batch.len(), "relayed handleOps transaction");

        wait_for_receipt(self.provider.as_ref(), sent_hash, self.wait_timeout).await?;
        Ok(())
    }
}
