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

//! Batch pipeline stages between the mempool dump and the submitter.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use aiops_pool::ReputationStore;
use aiops_provider::{AiMiddleware, NodeProvider};
use aiops_sim::{
    IngressCtx, IngressHandler, Overhead, SimulateOp, TraceSettings, TraceValidate,
    ValidationError,
};
use ethers::types::{Address, U256};
use tracing::warn;

use crate::{BatchCtx, BatchHandler};

/// Evict ops that sat in the mempool longer than the configured TTL.
#[derive(Debug)]
pub struct DropExpired {
    ttl: Duration,
}

impl DropExpired {
    /// Stage dropping ops older than `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

#[async_trait::async_trait]
impl BatchHandler for DropExpired {
    fn name(&self) -> &'static str {
        "drop-expired"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let ttl_ms = self.ttl.as_millis() as u64;
        let expired: Vec<usize> = ctx
            .batch
            .iter()
            .enumerate()
            .filter(|(_, r)| now_ms.saturating_sub(r.added_at_ms) > ttl_ms)
            .map(|(i, _)| i)
            .collect();
        for index in expired.into_iter().rev() {
            ctx.mark_op_for_removal(index, "expired");
        }
        Ok(())
    }
}

/// Sort the batch by effective gas price, best-paying first. The sort is
/// stable, so FIFO order is preserved among equal bids.
#[derive(Debug, Default)]
pub struct SortByGasPrice;

#[async_trait::async_trait]
impl BatchHandler for SortByGasPrice {
    fn name(&self) -> &'static str {
        "sort-by-gas-price"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        let base_fee = ctx.base_fee;
        ctx.batch
            .sort_by(|a, b| {
                b.op
                    .effective_gas_price(base_fee)
                    .cmp(&a.op.effective_gas_price(base_fee))
            });
        Ok(())
    }
}

/// Exclude ops whose effective gas price cannot cover the current base fee.
/// They stay in the mempool and are reconsidered next tick.
#[derive(Debug, Default)]
pub struct FilterUnderpriced;

#[async_trait::async_trait]
impl BatchHandler for FilterUnderpriced {
    fn name(&self) -> &'static str {
        "filter-underpriced"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        let Some(base_fee) = ctx.base_fee else {
            return Ok(());
        };
        ctx.batch
            .retain(|r| r.op.effective_gas_price(Some(base_fee)) >= base_fee);
        Ok(())
    }
}

/// Regroup the batch per sender with ascending nonces, keeping sender
/// groups in the order their best op already achieved.
#[derive(Debug, Default)]
pub struct SortByNonce;

#[async_trait::async_trait]
impl BatchHandler for SortByNonce {
    fn name(&self) -> &'static str {
        "sort-by-nonce"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        let mut order: Vec<Address> = Vec::new();
        let mut by_sender: HashMap<Address, Vec<aiops_pool::OpRecord>> = HashMap::new();
        for record in ctx.batch.drain(..) {
            let sender = record.op.sender;
            if !by_sender.contains_key(&sender) {
                order.push(sender);
            }
            by_sender.entry(sender).or_default().push(record);
        }
        for sender in order {
            let mut group = by_sender.remove(&sender).unwrap_or_default();
            group.sort_by(|a, b| a.op.nonce.cmp(&b.op.nonce));
            ctx.batch.extend(group);
        }
        Ok(())
    }
}

/// Truncate the batch so its total gas stays within the configured cap.
#[derive(Debug)]
pub struct MaintainGasLimit {
    max_batch_gas: U256,
    overhead: Arc<Overhead>,
}

impl MaintainGasLimit {
    /// Stage enforcing `max_batch_gas` over the whole batch.
    pub fn new(max_batch_gas: U256, overhead: Arc<Overhead>) -> Self {
        Self {
            max_batch_gas,
            overhead,
        }
    }
}

#[async_trait::async_trait]
impl BatchHandler for MaintainGasLimit {
    fn name(&self) -> &'static str {
        "maintain-gas-limit"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        let mut sum = U256::zero();
        let mut keep = 0usize;
        for record in &ctx.batch {
            let static_pvg = self.overhead.static_pvg(&record.op);
            let term = record.op.max_gas_available() - record.op.pre_verification_gas + static_pvg;
            sum = sum + term;
            if sum > self.max_batch_gas {
                break;
            }
            keep += 1;
        }
        ctx.batch.truncate(keep);
        Ok(())
    }
}

/// Re-fetch the code hashes of each op's touched contracts; drop ops whose
/// chain state drifted since validation.
#[derive(Debug)]
pub struct CodeHashes<P> {
    provider: Arc<P>,
}

impl<P> CodeHashes<P> {
    /// Stage verifying the ingress code-hash snapshots.
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

#[async_trait::async_trait]
impl<P: NodeProvider> BatchHandler for CodeHashes<P> {
    fn name(&self) -> &'static str {
        "code-hashes"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        let mut changed: Vec<usize> = Vec::new();
        for (index, record) in ctx.batch.iter().enumerate() {
            let Some(expected) = record.code_hash else {
                continue;
            };
            let current = self.provider.code_hash(record.touched.clone()).await?;
            if current != expected {
                changed.push(index);
            }
        }
        for index in changed.into_iter().rev() {
            ctx.mark_op_for_removal(index, "code-changed");
        }
        Ok(())
    }
}

/// Ensure each paymaster's deposit covers the summed prefund of its ops,
/// dropping ops from the tail until it does.
#[derive(Debug)]
pub struct PaymasterDeposit<M> {
    middleware: Arc<M>,
}

impl<M> PaymasterDeposit<M> {
    /// Stage enforcing paymaster deposits over the batch.
    pub fn new(middleware: Arc<M>) -> Self {
        Self { middleware }
    }
}

#[async_trait::async_trait]
impl<M: AiMiddleware> BatchHandler for PaymasterDeposit<M> {
    fn name(&self) -> &'static str {
        "paymaster-deposit"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        let mut by_paymaster: Vec<(Address, Vec<usize>)> = Vec::new();
        for (index, record) in ctx.batch.iter().enumerate() {
            let Some(paymaster) = record.op.paymaster() else {
                continue;
            };
            match by_paymaster.iter_mut().find(|(p, _)| *p == paymaster) {
                Some((_, indexes)) => indexes.push(index),
                None => by_paymaster.push((paymaster, vec![index])),
            }
        }

        let mut drops: Vec<usize> = Vec::new();
        for (paymaster, mut indexes) in by_paymaster {
            let deposit = self.middleware.deposit_info(paymaster).await?.deposit;
            let mut required: U256 = indexes
                .iter()
                .map(|&i| ctx.batch[i].op.max_prefund())
                .fold(U256::zero(), |acc, p| acc + p);
            while required > deposit {
                let Some(last) = indexes.pop() else {
                    break;
                };
                required = required - ctx.batch[last].op.max_prefund();
                drops.push(last);
            }
        }

        drops.sort_unstable();
        for index in drops.into_iter().rev() {
            ctx.mark_op_for_removal(index, "insufficient paymaster deposit");
        }
        Ok(())
    }
}

/// Re-run simulation and trace validation against current chain state just
/// before submission; any op that no longer validates is evicted.
pub struct SimulateBatch<M> {
    middleware: Arc<M>,
    simulate: SimulateOp<M>,
    trace: TraceValidate<M>,
}

impl<M: AiMiddleware> SimulateBatch<M> {
    /// Stage re-validating every op in the batch.
    pub fn new(middleware: Arc<M>, trace_settings: TraceSettings) -> Self {
        Self {
            simulate: SimulateOp::new(middleware.clone()),
            trace: TraceValidate::new(middleware.clone(), trace_settings),
            middleware,
        }
    }
}

#[async_trait::async_trait]
impl<M: AiMiddleware> BatchHandler for SimulateBatch<M> {
    fn name(&self) -> &'static str {
        "simulate-batch"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        let mut drops: Vec<(usize, String)> = Vec::new();
        for (index, record) in ctx.batch.iter().enumerate() {
            let mut ictx = IngressCtx::new(
                record.op.clone(),
                ctx.middleware,
                ctx.chain_id,
                ctx.block_number,
                ctx.base_fee,
            );
            ictx.sender.deposit = self
                .middleware
                .deposit_info(ictx.sender.entity.address)
                .await?;
            if let Some(factory) = ictx.factory.as_mut() {
                factory.deposit = self.middleware.deposit_info(factory.entity.address).await?;
            }
            if let Some(paymaster) = ictx.paymaster.as_mut() {
                paymaster.deposit = self
                    .middleware
                    .deposit_info(paymaster.entity.address)
                    .await?;
            }

            let result = match self.simulate.handle(&mut ictx).await {
                Ok(()) => self.trace.handle(&mut ictx).await,
                Err(error) => Err(error),
            };
            match result {
                Ok(()) => {}
                Err(ValidationError::Internal(error)) => return Err(error),
                Err(error) => drops.push((index, error.to_string())),
            }
        }
        for (index, reason) in drops.into_iter().rev() {
            warn!(%reason, "dropping op that failed batch re-simulation");
            ctx.mark_op_for_removal(index, &reason);
        }
        Ok(())
    }
}

/// Credit opsIncluded for every entity of the submitted batch. Runs after
/// the submitter, once per appearance.
#[derive(Debug)]
pub struct IncOpsIncluded {
    reputation: ReputationStore,
}

impl IncOpsIncluded {
    /// Stage crediting inclusion counters.
    pub fn new(reputation: ReputationStore) -> Self {
        Self { reputation }
    }
}

#[async_trait::async_trait]
impl BatchHandler for IncOpsIncluded {
    fn name(&self) -> &'static str {
        "inc-ops-included"
    }

    async fn handle(&self, ctx: &mut BatchCtx) -> anyhow::Result<()> {
        if ctx.batch.is_empty() {
            return Ok(());
        }
        let mut counts: HashMap<Address, u64> = HashMap::new();
        for record in &ctx.batch {
            for entity in record.op.entities() {
                *counts.entry(entity.address).or_insert(0) += 1;
            }
        }
        self.reputation
            .inc_ops_included(ctx.middleware, &counts, ctx.block_number)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use aiops_pool::{Db, OpRecord};
    use aiops_provider::{MockAiMiddleware, MockNodeProvider};
    use aiops_sim::Directory;
    use aiops_types::{AiOperation, DepositInfo, ReputationConstants};
    use ethers::types::H256;

    use super::*;

    const MW: Address = ethers::types::H160([0xee; 20]);

    #[tokio::test]
    async fn test_drop_expired() {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let mut ctx = ctx(vec![
            record_at(op(1, 0, 100), now_ms.saturating_sub(200_000)),
            record_at(op(2, 0, 100), now_ms),
        ]);
        DropExpired::new(Duration::from_secs(180))
            .handle(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.batch.len(), 1);
        assert_eq!(ctx.batch[0].op.sender, addr(2));
        assert_eq!(ctx.pending_removal.len(), 1);
        assert_eq!(ctx.pending_removal[0].reason, "expired");
    }

    #[tokio::test]
    async fn test_sort_by_gas_price_desc() {
        let mut ctx = ctx(vec![
            record(op(1, 0, 100)),
            record(op(2, 0, 300)),
            record(op(3, 0, 200)),
        ]);
        SortByGasPrice.handle(&mut ctx).await.unwrap();
        let senders: Vec<Address> = ctx.batch.iter().map(|r| r.op.sender).collect();
        assert_eq!(senders, vec![addr(2), addr(3), addr(1)]);
    }

    #[tokio::test]
    async fn test_filter_underpriced() {
        let mut ctx = ctx(vec![record(op(1, 0, 5)), record(op(2, 0, 100))]);
        ctx.base_fee = Some(10.into());
        FilterUnderpriced.handle(&mut ctx).await.unwrap();
        assert_eq!(ctx.batch.len(), 1);
        assert_eq!(ctx.batch[0].op.sender, addr(2));
        // underpriced ops are not evicted from the mempool
        assert!(ctx.pending_removal.is_empty());
    }

    #[tokio::test]
    async fn test_sort_by_nonce_groups_senders() {
        // gas-price order: b(300), a(200-ish group), b's second op later
        let mut ctx = ctx(vec![
            record(op(2, 5, 300)),
            record(op(1, 1, 200)),
            record(op(2, 4, 150)),
            record(op(1, 0, 120)),
        ]);
        SortByNonce.handle(&mut ctx).await.unwrap();
        let keys: Vec<(Address, U256)> = ctx
            .batch
            .iter()
            .map(|r| (r.op.sender, r.op.nonce))
            .collect();
        assert_eq!(
            keys,
            vec![
                (addr(2), 4.into()),
                (addr(2), 5.into()),
                (addr(1), 0.into()),
                (addr(1), 1.into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_maintain_gas_limit_five_ops() {
        let overhead = Arc::new(Overhead::default());
        // five ops contributing 5M each against an 18M cap: three fit
        let records: Vec<OpRecord> = (0..5)
            .map(|i| record(op_with_gas_term(i + 1, 5_000_000, &overhead)))
            .collect();
        let mut ctx = ctx(records);
        MaintainGasLimit::new(18_000_000.into(), overhead)
            .handle(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.batch.len(), 3);
    }

    #[tokio::test]
    async fn test_maintain_gas_limit_ten_ops() {
        let overhead = Arc::new(Overhead::default());
        // ten ops of 2M each against an 18M cap: nine fit exactly
        let records: Vec<OpRecord> = (0..10)
            .map(|i| record(op_with_gas_term(i + 1, 2_000_000, &overhead)))
            .collect();
        let mut ctx = ctx(records);
        MaintainGasLimit::new(18_000_000.into(), overhead)
            .handle(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.batch.len(), 9);
    }

    #[tokio::test]
    async fn test_code_hashes_drop_changed() {
        let mut provider = MockNodeProvider::new();
        provider
            .expect_code_hash()
            .returning(|_| Ok(H256::repeat_byte(0x22)));

        let mut stale = record(op(1, 0, 100));
        stale.code_hash = Some(H256::repeat_byte(0x11));
        stale.touched = vec![addr(9)];
        let mut fresh = record(op(2, 0, 100));
        fresh.code_hash = Some(H256::repeat_byte(0x22));
        fresh.touched = vec![addr(9)];

        let mut ctx = ctx(vec![stale, fresh]);
        CodeHashes::new(Arc::new(provider))
            .handle(&mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.batch.len(), 1);
        assert_eq!(ctx.batch[0].op.sender, addr(2));
        assert_eq!(ctx.pending_removal[0].reason, "code-changed");
    }

    #[tokio::test]
    async fn test_paymaster_deposit_drops_from_tail() {
        let paymaster = addr(0xcc);
        let mut middleware = MockAiMiddleware::new();
        // deposit covers two of the three ops
        middleware.expect_deposit_info().returning(move |_| {
            Ok(DepositInfo {
                deposit: 2_000_000u64.into(),
                ..Default::default()
            })
        });

        let mk = |sender: u8, nonce: u64| {
            let mut op = op(sender, nonce, 1);
            op.paymaster_and_data = paymaster.as_bytes().to_vec().into();
            // max_prefund = (cgl + 3*vgl + pvg) * fee = 900_000 * 1
            op.call_gas_limit = 900_000.into();
            op.verification_gas_limit = 0.into();
            op.pre_verification_gas = 0.into();
            record(op)
        };
        let mut ctx = ctx(vec![mk(1, 0), mk(2, 0), mk(3, 0)]);
        PaymasterDeposit::new(Arc::new(middleware))
            .handle(&mut ctx)
            .await
            .unwrap();

        let senders: Vec<Address> = ctx.batch.iter().map(|r| r.op.sender).collect();
        assert_eq!(senders, vec![addr(1), addr(2)]);
        assert_eq!(ctx.pending_removal.len(), 1);
        assert_eq!(ctx.pending_removal[0].record.op.sender, addr(3));
    }

    #[tokio::test]
    async fn test_simulate_batch_drops_failing_op() {
        use aiops_provider::SimulateValidationError;
        use aiops_types::{FailedOp, ValidationResult};

        let bad_sender = addr(2);
        let mut middleware = MockAiMiddleware::new();
        middleware
            .expect_deposit_info()
            .returning(|_| Ok(DepositInfo::default()));
        middleware
            .expect_simulate_validation()
            .returning(move |op| {
                if op.sender == bad_sender {
                    Err(SimulateValidationError::FailedOp(FailedOp {
                        op_index: 0,
                        reason: "AA25 invalid account nonce".to_string(),
                    }))
                } else {
                    Ok(ValidationResult::default())
                }
            });
        middleware
            .expect_trace_simulate_validation()
            .returning(|_| Ok(Default::default()));

        let stage = SimulateBatch::new(
            Arc::new(middleware),
            TraceSettings {
                is_rip7212_supported: false,
                constants: Arc::new(ReputationConstants::default()),
                directory: Arc::new(Directory::default()),
            },
        );
        let mut ctx = ctx(vec![record(op(1, 0, 100)), record(op(2, 0, 100))]);
        stage.handle(&mut ctx).await.unwrap();
        assert_eq!(ctx.batch.len(), 1);
        assert_eq!(ctx.batch[0].op.sender, addr(1));
        assert_eq!(ctx.pending_removal.len(), 1);
    }

    #[tokio::test]
    async fn test_inc_ops_included_counts_entities() {
        use aiops_types::{ReputationOverride, ReputationStatus};

        let db = Arc::new(Db::open().unwrap());
        let constants = Arc::new(ReputationConstants::default());
        let reputation = ReputationStore::new(db, constants);

        // one inclusion short of escaping the ban; the sender appears twice
        // in the submitted batch, so the stage credits two
        reputation
            .override_reputation(
                MW,
                &[ReputationOverride {
                    address: addr(1),
                    ops_seen: 1000,
                    ops_included: 49,
                }],
                100,
            )
            .unwrap();
        assert_eq!(
            reputation.status(MW, addr(1), 100).unwrap(),
            ReputationStatus::Banned
        );

        let mut ctx = ctx(vec![record(op(1, 0, 100)), record(op(1, 1, 100))]);
        IncOpsIncluded::new(reputation.clone())
            .handle(&mut ctx)
            .await
            .unwrap();
        assert_eq!(
            reputation.status(MW, addr(1), 100).unwrap(),
            ReputationStatus::Throttled
        );
    }

    fn ctx(batch: Vec<OpRecord>) -> BatchCtx {
        BatchCtx::new(batch, MW, 1, 100, Some(10.into()), U256::one())
    }

    fn addr(b: u8) -> Address {
        ethers::types::H160([b; 20])
    }

    fn op(sender: u8, nonce: u64, fee: u64) -> AiOperation {
        AiOperation {
            sender: addr(sender),
            nonce: nonce.into(),
            max_fee_per_gas: fee.into(),
            max_priority_fee_per_gas: fee.into(),
            ..Default::default()
        }
    }

    fn op_with_gas_term(sender: u8, term: u64, overhead: &Overhead) -> AiOperation {
        let mut op = op(sender, 0, 1_000);
        let static_pvg = overhead.static_pvg(&op).as_u64();
        // with no paymaster: term = callGasLimit + verificationGasLimit + staticPVG
        op.call_gas_limit = (term - static_pvg).into();
        op.verification_gas_limit = 0.into();
        op
    }

    fn record(op: AiOperation) -> OpRecord {
        record_at(op, 0)
    }

    fn record_at(op: AiOperation, added_at_ms: u64) -> OpRecord {
        OpRecord {
            op,
            added_at_ms,
            code_hash: None,
            touched: Vec::new(),
            alt_mempool_ids: Vec::new(),
        }
    }
}
