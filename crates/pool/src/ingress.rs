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

//! The pool object tying ingress together: it snapshots mempool and
//! reputation state into an [`IngressCtx`], runs the canonical validation
//! pipeline, and on success inserts the op with its validation artifacts
//! and bumps opsSeen.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use aiops_provider::{AiMiddleware, NodeProvider};
use aiops_sim::{
    CheckSettings, Directory, EntityState, IngressCtx, IngressPipeline, Overhead,
    ReputationRules, SimulateOp, SnapshotCodeHashes, StructuralChecks, TraceSettings,
    TraceValidate,
};
use aiops_types::{AiOperation, DepositInfo, ReputationConstants, ReputationStatus};
use anyhow::Context;
use ethers::types::{Address, H256, U256};
use tracing::info;

use crate::{AddOpError, Mempool, OpRecord, ReputationStore};

/// Settings of the pool and its validation pipeline.
#[derive(Clone, Debug)]
pub struct PoolSettings {
    /// Cap on an op's verificationGasLimit
    pub max_verification_gas: U256,
    /// Whether the RIP-7212 precompile may be called during validation
    pub is_rip7212_supported: bool,
    /// Reputation and stake constants
    pub constants: Arc<ReputationConstants>,
    /// Alt-mempool directory
    pub directory: Arc<Directory>,
}

/// One middleware's pool: validation pipeline plus mempool and reputation
/// writes.
pub struct AiOpPool<P, M> {
    provider: Arc<P>,
    middleware: Arc<M>,
    mempool: Mempool,
    reputation: ReputationStore,
    overhead: Arc<Overhead>,
    pipeline: IngressPipeline,
    chain_id: u64,
}

impl<P: NodeProvider, M: AiMiddleware> AiOpPool<P, M> {
    /// Build a pool, composing the canonical handler order at startup.
    pub fn new(
        provider: Arc<P>,
        middleware: Arc<M>,
        mempool: Mempool,
        reputation: ReputationStore,
        overhead: Arc<Overhead>,
        chain_id: u64,
        settings: PoolSettings,
    ) -> Self {
        let pipeline = IngressPipeline::new(vec![
            Arc::new(ReputationRules::new(settings.constants.clone())),
            Arc::new(StructuralChecks::new(
                CheckSettings {
                    max_verification_gas: settings.max_verification_gas,
                },
                overhead.clone(),
            )),
            Arc::new(SimulateOp::new(middleware.clone())),
            Arc::new(TraceValidate::new(
                middleware.clone(),
                TraceSettings {
                    is_rip7212_supported: settings.is_rip7212_supported,
                    constants: settings.constants.clone(),
                    directory: settings.directory.clone(),
                },
            )),
            Arc::new(SnapshotCodeHashes::new(provider.clone())),
        ]);
        Self {
            provider,
            middleware,
            mempool,
            reputation,
            overhead,
            pipeline,
            chain_id,
        }
    }

    /// Validate an inbound op and admit it to the mempool. Returns its hash.
    pub async fn add_op(&self, op: AiOperation) -> Result<H256, AddOpError> {
        let middleware = self.middleware.address();
        let hash = op.op_hash(middleware, self.chain_id);

        let block_number = self
            .provider
            .block_number()
            .await
            .map_err(AddOpError::Internal)?;
        let base_fee = self
            .provider
            .base_fee()
            .await
            .map_err(AddOpError::Internal)?;

        let mut ctx = IngressCtx::new(op, middleware, self.chain_id, block_number, base_fee);
        self.snapshot_entities(&mut ctx, block_number)
            .await
            .map_err(AddOpError::Internal)?;

        self.pipeline.run(&mut ctx).await?;

        let record = OpRecord {
            op: ctx.op.clone(),
            added_at_ms: unix_now_ms(),
            code_hash: ctx.code_hash,
            touched: ctx.touched.clone(),
            alt_mempool_ids: ctx.alt_mempool_ids.clone(),
        };
        self.mempool.add_op(middleware, record)?;

        let addresses: Vec<Address> = ctx.entities().iter().map(|e| e.entity.address).collect();
        self.reputation
            .inc_ops_seen(middleware, &addresses, block_number)
            .map_err(AddOpError::Internal)?;

        info!(op_hash = ?hash, sender = ?ctx.op.sender, nonce = %ctx.op.nonce, "aiOp added to mempool");
        Ok(hash)
    }

    /// The middleware this pool serves.
    pub fn middleware_address(&self) -> Address {
        self.middleware.address()
    }

    /// Handle to the middleware contract binding.
    pub fn middleware(&self) -> &Arc<M> {
        &self.middleware
    }

    /// The pool's mempool handle.
    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// The pool's reputation store handle.
    pub fn reputation(&self) -> &ReputationStore {
        &self.reputation
    }

    /// The gas overhead model used by validation and estimation.
    pub fn overhead(&self) -> &Arc<Overhead> {
        &self.overhead
    }

    /// Find a pooled record by op hash.
    pub fn get_op_by_hash(&self, hash: H256) -> Result<Option<OpRecord>, AddOpError> {
        let middleware = self.middleware.address();
        let records = self.mempool.dump(middleware)?;
        Ok(records
            .into_iter()
            .find(|r| r.op.op_hash(middleware, self.chain_id) == hash))
    }

    // Fill in pending counts, statuses, deposits, and code presence for each
    // entity the op names.
    async fn snapshot_entities(
        &self,
        ctx: &mut IngressCtx,
        block_number: u64,
    ) -> anyhow::Result<()> {
        let middleware = self.middleware.address();

        let sender = ctx.sender.entity.address;
        fill_state(
            &mut ctx.sender,
            self.mempool.get_by_sender(middleware, sender)?.len(),
            self.reputation.status(middleware, sender, block_number)?,
            self.middleware.deposit_info(sender).await?,
            false,
        );

        if let Some(factory_state) = ctx.factory.as_mut() {
            let factory = factory_state.entity.address;
            fill_state(
                factory_state,
                self.mempool.get_by_factory(middleware, factory)?.len(),
                self.reputation.status(middleware, factory, block_number)?,
                self.middleware.deposit_info(factory).await?,
                false,
            );
        }

        if let Some(paymaster_state) = ctx.paymaster.as_mut() {
            let paymaster = paymaster_state.entity.address;
            let has_code = !self
                .provider
                .get_code(paymaster)
                .await
                .context("should check paymaster code")?
                .is_empty();
            fill_state(
                paymaster_state,
                self.mempool.get_by_paymaster(middleware, paymaster)?.len(),
                self.reputation.status(middleware, paymaster, block_number)?,
                self.middleware.deposit_info(paymaster).await?,
                has_code,
            );
        }
        Ok(())
    }
}

fn fill_state(
    state: &mut EntityState,
    pending_ops: usize,
    status: ReputationStatus,
    deposit: DepositInfo,
    has_code: bool,
) {
    state.pending_ops = pending_ops;
    state.status = status;
    state.deposit = deposit;
    state.has_code = has_code;
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use aiops_provider::{CollectorTrace, MockAiMiddleware, MockNodeProvider};
    use aiops_sim::ValidationError;
    use aiops_types::{DepositInfo, ReputationOverride, ValidationResult};
    use ethers::types::Bytes;

    use super::*;
    use crate::Db;

    const MW: Address = ethers::types::H160([0xee; 20]);

    #[tokio::test]
    async fn test_add_op_happy_path() {
        let pool = pool();
        let hash = pool.add_op(valid_op()).await.unwrap();

        let dumped = pool.mempool().dump(MW).unwrap();
        assert_eq!(dumped.len(), 1);
        assert_eq!(dumped[0].op, valid_op());
        assert_eq!(dumped[0].code_hash, Some(H256::repeat_byte(0x11)));
        assert_eq!(hash, valid_op().op_hash(MW, 1));
    }

    #[tokio::test]
    async fn test_unstaked_sender_hits_pending_limit() {
        let pool = pool();
        pool.add_op(valid_op()).await.unwrap();

        // drive the sender to its unstaked cap via repeated submissions of
        // fresh nonces; the eleventh attempt must hit the limit
        for nonce in 1..10u64 {
            let mut op = valid_op();
            op.nonce = nonce.into();
            pool.add_op(op).await.unwrap();
        }
        let mut op = valid_op();
        op.nonce = 10.into();
        assert!(matches!(
            pool.add_op(op).await,
            Err(AddOpError::Validation(ValidationError::UnstakedEntityLimit(_, 10)))
        ));
    }

    #[tokio::test]
    async fn test_add_op_banned_paymaster() {
        let pool = pool();
        let paymaster = Address::repeat_byte(0x42);
        pool.reputation()
            .override_reputation(
                MW,
                &[ReputationOverride {
                    address: paymaster,
                    ops_seen: 1000,
                    ops_included: 0,
                }],
                100,
            )
            .unwrap();

        let mut op = valid_op();
        op.paymaster_and_data = paymaster.as_bytes().to_vec().into();
        assert!(matches!(
            pool.add_op(op).await,
            Err(AddOpError::Validation(ValidationError::Banned(_)))
        ));
        assert!(pool.mempool().dump(MW).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_op_by_hash() {
        let pool = pool();
        let hash = pool.add_op(valid_op()).await.unwrap();
        assert!(pool.get_op_by_hash(hash).unwrap().is_some());
        assert!(pool.get_op_by_hash(H256::zero()).unwrap().is_none());
    }

    fn pool() -> AiOpPool<MockNodeProvider, MockAiMiddleware> {
        let mut provider = MockNodeProvider::new();
        provider.expect_block_number().returning(|| Ok(100));
        provider.expect_base_fee().returning(|| Ok(Some(10.into())));
        provider
            .expect_get_code()
            .returning(|_| Ok(Bytes::from(vec![0x60])));
        provider
            .expect_code_hash()
            .returning(|_| Ok(H256::repeat_byte(0x11)));

        let db = Arc::new(Db::open().unwrap());
        let constants = Arc::new(ReputationConstants::default());
        AiOpPool::new(
            Arc::new(provider),
            Arc::new(default_middleware()),
            Mempool::new(db.clone()),
            ReputationStore::new(db, constants.clone()),
            Arc::new(Overhead::default()),
            1,
            PoolSettings {
                max_verification_gas: 5_000_000.into(),
                is_rip7212_supported: false,
                constants,
                directory: Arc::new(Directory::default()),
            },
        )
    }

    fn default_middleware() -> MockAiMiddleware {
        let mut middleware = MockAiMiddleware::new();
        middleware.expect_address().return_const(MW);
        middleware
            .expect_deposit_info()
            .returning(|_| Ok(DepositInfo {
                deposit: U256::MAX,
                ..Default::default()
            }));
        middleware
            .expect_simulate_validation()
            .returning(|_| Ok(ValidationResult::default()));
        middleware
            .expect_trace_simulate_validation()
            .returning(|_| Ok(CollectorTrace::default()));
        middleware
    }

    fn valid_op() -> AiOperation {
        AiOperation {
            sender: Address::repeat_byte(0x01),
            call_gas_limit: 50_000.into(),
            verification_gas_limit: 150_000.into(),
            pre_verification_gas: 60_000.into(),
            max_fee_per_gas: 1_000.into(),
            max_priority_fee_per_gas: 100.into(),
            ..Default::default()
        }
    }
}
