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

//! The loop driver: a once-per-second ticker that drains the mempool
//! through the batch pipeline for each supported middleware in turn.
//! Stopping closes the done signal; an in-flight tick completes first.

use std::{sync::Arc, time::Duration};

use aiops_pool::Mempool;
use aiops_provider::NodeProvider;
use ethers::types::{Address, H256, U256};
use parking_lot::Mutex;
use tokio::{
    sync::watch,
    time::{interval_at, Instant},
};
use tracing::{error, info};

use crate::{BatchCtx, BatchHandler};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// The ordered batch pipeline of one middleware.
pub struct MiddlewarePipeline {
    /// The middleware address
    pub middleware: Address,
    /// Stages run in order on every tick
    pub handlers: Vec<Arc<dyn BatchHandler>>,
}

#[derive(Default)]
struct LoopState {
    running: bool,
    stop: Option<watch::Sender<bool>>,
}

/// The bundler loop. Middlewares are processed sequentially within a tick,
/// never overlapping.
pub struct Bundler<P> {
    provider: Arc<P>,
    mempool: Mempool,
    pipelines: Vec<MiddlewarePipeline>,
    chain_id: u64,
    max_batch: usize,
    state: Mutex<LoopState>,
}

impl<P: NodeProvider> Bundler<P> {
    /// Create a bundler over the given per-middleware pipelines.
    /// `max_batch` of zero means unlimited.
    pub fn new(
        provider: Arc<P>,
        mempool: Mempool,
        pipelines: Vec<MiddlewarePipeline>,
        chain_id: u64,
        max_batch: usize,
    ) -> Self {
        Self {
            provider,
            mempool,
            pipelines,
            chain_id,
            max_batch,
            state: Mutex::new(LoopState::default()),
        }
    }

    /// Whether the ticker loop is live.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Start the ticker loop. Idempotent.
    pub fn run(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.running {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        state.running = true;
        state.stop = Some(stop_tx);
        drop(state);

        let bundler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => bundler.tick().await,
                }
            }
        });
    }

    /// Signal the loop to stop. An in-flight tick finishes first. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        if let Some(stop) = state.stop.take() {
            let _ = stop.send(true);
        }
    }

    /// Run one batch pipeline pass for every middleware right now,
    /// regardless of the loop state. Returns the last submitted hash.
    pub async fn send_bundle_now(&self) -> anyhow::Result<Option<H256>> {
        let mut last_hash = None;
        for pipeline in &self.pipelines {
            if let Some(ctx) = self.process(pipeline.middleware).await? {
                if ctx.txn_hash.is_some() {
                    last_hash = ctx.txn_hash;
                }
            }
        }
        Ok(last_hash)
    }

    /// Build, submit, and clean one batch for `middleware`.
    pub async fn process(&self, middleware: Address) -> anyhow::Result<Option<BatchCtx>> {
        let Some(pipeline) = self
            .pipelines
            .iter()
            .find(|p| p.middleware == middleware)
        else {
            anyhow::bail!("unsupported middleware {middleware:?}");
        };

        let started = std::time::Instant::now();
        let mut records = self.mempool.dump(middleware)?;
        if records.is_empty() {
            return Ok(None);
        }
        if self.max_batch > 0 && records.len() > self.max_batch {
            records.truncate(self.max_batch);
        }

        let block_number = self.provider.block_number().await?;
        let base_fee = self.provider.base_fee().await?;
        let tip = if base_fee.is_some() {
            self.provider.suggest_gas_tip().await?
        } else {
            U256::zero()
        };

        let mut ctx = BatchCtx::new(records, middleware, self.chain_id, block_number, base_fee, tip);
        for handler in &pipeline.handlers {
            if let Err(err) = handler.handle(&mut ctx).await {
                error!(handler = handler.name(), middleware = ?middleware, %err, "bundler run error");
                return Err(err);
            }
        }

        // Submitted ops and pending removals both leave the mempool; anything
        // a stage merely excluded from the batch stays for the next tick.
        let mut remove: Vec<_> = ctx.batch.iter().map(|r| r.op.clone()).collect();
        remove.extend(ctx.pending_removal.iter().map(|p| p.record.op.clone()));
        self.mempool.remove_ops(middleware, &remove)?;

        let batch_hashes: Vec<H256> = ctx
            .batch
            .iter()
            .map(|r| r.op.op_hash(middleware, self.chain_id))
            .collect();
        let dropped_hashes: Vec<H256> = ctx
            .pending_removal
            .iter()
            .map(|p| p.record.op.op_hash(middleware, self.chain_id))
            .collect();
        let dropped_reasons: Vec<&str> = ctx
            .pending_removal
            .iter()
            .map(|p| p.reason.as_str())
            .collect();
        info!(
            middleware = ?middleware,
            chain_id = self.chain_id,
            batch_aiop_hashes = ?batch_hashes,
            dropped_aiop_hashes = ?dropped_hashes,
            dropped_aiop_reasons = ?dropped_reasons,
            txn_hash = ?ctx.txn_hash,
            duration_ms = started.elapsed().as_millis() as u64,
            "bundler run ok"
        );

        let pool_size = self.mempool.dump(middleware)?.len();
        metrics::gauge!(
            "bundler_mempool_size",
            pool_size as f64,
            "middleware" => format!("{middleware:?}")
        );
        metrics::counter!(
            "bundler_ops_submitted",
            ctx.batch.len() as u64,
            "middleware" => format!("{middleware:?}")
        );

        Ok(Some(ctx))
    }

    async fn tick(&self) {
        for pipeline in &self.pipelines {
            // Failures are logged in process; everything still pooled is
            // retried next tick.
            let _ = self.process(pipeline.middleware).await;
        }
    }
}
