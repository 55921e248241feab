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

use aiops_pool::OpRecord;
use ethers::types::{Address, H256, U256};

/// Shared context of one batch pipeline run. Stages shrink `batch` as ops
/// are excluded; ops evicted for cause move to `pending_removal` so the
/// final cleanup drops them from the mempool, with the reason logged.
#[derive(Clone, Debug)]
pub struct BatchCtx {
    /// Candidate batch, in the order the current stage left it
    pub batch: Vec<OpRecord>,
    /// The middleware this batch targets
    pub middleware: Address,
    /// Chain id of the service
    pub chain_id: u64,
    /// Block number at the start of the run
    pub block_number: u64,
    /// Base fee of the latest block, `None` on legacy networks
    pub base_fee: Option<U256>,
    /// Suggested priority fee
    pub tip: U256,
    /// Ops evicted by stages, with reasons
    pub pending_removal: Vec<PendingRemoval>,
    /// Hash of the submitted transaction, set by the submitter
    pub txn_hash: Option<H256>,
}

/// An op evicted from the batch for cause.
#[derive(Clone, Debug)]
pub struct PendingRemoval {
    /// The evicted record
    pub record: OpRecord,
    /// Why it was evicted
    pub reason: String,
}

impl BatchCtx {
    /// Create a context over a dumped batch.
    pub fn new(
        batch: Vec<OpRecord>,
        middleware: Address,
        chain_id: u64,
        block_number: u64,
        base_fee: Option<U256>,
        tip: U256,
    ) -> Self {
        Self {
            batch,
            middleware,
            chain_id,
            block_number,
            base_fee,
            tip,
            pending_removal: Vec::new(),
            txn_hash: None,
        }
    }

    /// Evict the op at `index` from the batch, recording the reason. The
    /// final cleanup removes it from the mempool.
    pub fn mark_op_for_removal(&mut self, index: usize, reason: &str) {
        if index >= self.batch.len() {
            return;
        }
        let record = self.batch.remove(index);
        self.pending_removal.push(PendingRemoval {
            record,
            reason: reason.to_string(),
        });
    }
}

/// One stage of the batch pipeline. Stages share a single call signature
/// and are composed into an ordered list at startup. A stage error aborts
/// the tick; everything still pooled is retried on the next one.
#[async_trait::async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Run this stage against the shared context.
    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use aiops_types::AiOperation;

    use super::*;

    #[test]
    fn test_mark_op_for_removal() {
        let records: Vec<OpRecord> = (0..3)
            .map(|i| OpRecord {
                op: AiOperation {
                    nonce: i.into(),
                    ..Default::default()
                },
                added_at_ms: 0,
                code_hash: None,
                touched: Vec::new(),
                alt_mempool_ids: Vec::new(),
            })
            .collect();
        let mut ctx = BatchCtx::new(records, Address::zero(), 1, 0, None, U256::zero());

        ctx.mark_op_for_removal(1, "expired");
        assert_eq!(ctx.batch.len(), 2);
        assert_eq!(ctx.pending_removal.len(), 1);
        assert_eq!(ctx.pending_removal[0].reason, "expired");
        assert_eq!(ctx.pending_removal[0].record.op.nonce, U256::one());

        // out of range is a no-op
        ctx.mark_op_for_removal(9, "nope");
        assert_eq!(ctx.batch.len(), 2);
        assert_eq!(ctx.pending_removal.len(), 1);
    }
}
