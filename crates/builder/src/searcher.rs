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

//! Searcher submission: instead of the public mempool, the signed
//! `handleOps` transaction is broadcast as a sealed bundle to block-builder
//! APIs for each of the next few target blocks.

use std::{sync::Arc, time::Duration};

use aiops_provider::{AiMiddleware, NodeProvider};
use anyhow::{anyhow, Context};
use ethers::{
    signers::Signer,
    types::{Address, Bytes, U256},
};
use tracing::{info, warn};
use url::Url;

use crate::{
    transaction::{build_handle_ops_tx, estimate_and_trim, wait_for_receipt, TxParams},
    BatchCtx, BatchHandler, SubmitError,
};

/// Default time to wait for on-chain inclusion of a broadcast bundle.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(72);

/// Per-block base fee escalator: each future block may raise the base fee
/// by at most 12.5%.
const BASE_FEE_NUMERATOR: u64 = 1_125;
const BASE_FEE_DENOMINATOR: u64 = 1_000;

/// The maximum base fee after `blocks_in_future` worst-case increases, plus
/// one wei of headroom. The ratio is applied at full precision, in chunks
/// small enough that the numerator cannot overflow.
pub fn projected_base_fee(base_fee: U256, blocks_in_future: u64) -> U256 {
    const CHUNK: u64 = 10;
    let mut fee = base_fee;
    let mut remaining = blocks_in_future;
    while remaining > 0 {
        let steps = remaining.min(CHUNK);
        let numerator = U256::from(BASE_FEE_NUMERATOR).pow(steps.into());
        let denominator = U256::from(BASE_FEE_DENOMINATOR).pow(steps.into());
        fee = fee * numerator / denominator;
        remaining -= steps;
    }
    fee + 1
}

/// One block-builder endpoint accepting `eth_sendBundle`.
#[async_trait::async_trait]
pub trait BundleSender: Send + Sync + 'static {
    /// Endpoint label used in logs and aggregated errors.
    fn endpoint(&self) -> &str;

    /// Submit a one-transaction bundle targeting `block_number`.
    async fn send_bundle(&self, raw_tx: &Bytes, block_number: u64) -> anyhow::Result<()>;
}

/// [`BundleSender`] speaking JSON-RPC over HTTP.
#[derive(Debug)]
pub struct HttpBundleSender {
    url: Url,
    client: reqwest::Client,
}

impl HttpBundleSender {
    /// Create a sender for one builder URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl BundleSender for HttpBundleSender {
    fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    async fn send_bundle(&self, raw_tx: &Bytes, block_number: u64) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_sendBundle",
            "params": [{
                "txs": [raw_tx],
                "blockNumber": format!("{block_number:#x}"),
            }],
            "id": 1,
        });
        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("should reach builder {}", self.url))?;
        let parsed: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("should decode builder response from {}", self.url))?;
        if let Some(error) = parsed.get("error") {
            return Err(anyhow!("builder {} rejected bundle: {error}", self.url));
        }
        Ok(())
    }
}

/// The searcher-mode submitter.
pub struct Searcher<P, M, S> {
    provider: Arc<P>,
    middleware: Arc<M>,
    signer: S,
    beneficiary: Address,
    builders: Vec<Arc<dyn BundleSender>>,
    blocks_in_future: u64,
    wait_timeout: Duration,
}

impl<P, M, S> Searcher<P, M, S> {
    /// Create a searcher broadcasting to the given builder endpoints.
    pub fn new(
        provider: Arc<P>,
        middleware: Arc<M>,
        signer: S,
        beneficiary: Address,
        builders: Vec<Arc<dyn BundleSender>>,
        blocks_in_future: u64,
    ) -> Self {
        Self {
            provider,
            middleware,
            signer,
            beneficiary,
            builders,
            blocks_in_future,
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
impl<P, M, S> BatchHandler for Searcher<P, M, S>
where
    P: NodeProvider,
    M: AiMiddleware,
    S: Signer + 'static,
{
    fn name(&self) -> &'static str {
        "searcher"
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

        // Price the no-send transaction for the worst-case base fee of the
        // furthest targeted block.
        let max_fee = projected_base_fee(ctx.base_fee.unwrap_or_default(), self.blocks_in_future);
        let params = TxParams {
            beneficiary: self.beneficiary,
            nonce: self
                .provider
                .transaction_count(self.signer.address())
                .await?,
            gas_limit,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: ctx.tip.min(max_fee),
        };
        let (raw, hash) = build_handle_ops_tx(&self.signer, ctx, &params).await?;

        // Fan the bundle out to every builder for every target block; the
        // submission fails only when no call at all went through.
        let next_block = self.provider.block_number().await? + 1;
        let mut any_success = false;
        let mut errors: Vec<String> = Vec::new();
        for offset in 0..self.blocks_in_future {
            let target = next_block + offset;
            for builder in &self.builders {
                match builder.send_bundle(&raw, target).await {
                    Ok(()) => any_success = true,
                    Err(error) => {
                        warn!(
                            builder = builder.endpoint(),
                            target_block = target,
                            %error,
                            "bundle broadcast failed"
                        );
                        errors.push(format!("{}@{target}: {error}", builder.endpoint()));
                    }
                }
            }
        }
        if !any_success {
            return Err(SubmitError::FlashbotsBroadcastBundle(errors.join("; ")).into());
        }

        ctx.txn_hash = Some(hash);
        info!(
            txn_hash = ?hash,
            ops = ctx.batch.len(),
            builders = self.builders.len(),
            failed_broadcasts = errors.len(),
            "broadcast handleOps bundle"
        );

        wait_for_receipt(self.provider.as_ref(), hash, self.wait_timeout).await?;
        Ok(())
    }
}
