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

use aiops_provider::CollectorTrace;
use aiops_types::{
    AiOperation, DepositInfo, Entity, EntityType, ReputationStatus, ValidationResult,
};
use ethers::types::{Address, H256, U256};

/// Everything the ingress pipeline knows about one entity of the op,
/// snapshotted by the pool before the pipeline runs.
#[derive(Clone, Debug)]
pub struct EntityState {
    /// The entity itself
    pub entity: Entity,
    /// Number of its ops currently pending in the mempool
    pub pending_ops: usize,
    /// Its derived reputation status
    pub status: ReputationStatus,
    /// Its middleware deposit and stake
    pub deposit: DepositInfo,
    /// Whether it has deployed code
    pub has_code: bool,
}

impl EntityState {
    /// A fresh state for an entity nothing is known about.
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            pending_ops: 0,
            status: ReputationStatus::Ok,
            deposit: DepositInfo::default(),
            has_code: false,
        }
    }
}

/// Shared context of one ingress pipeline invocation. Handlers read the
/// snapshot fields and fill in the outputs as the op advances.
#[derive(Clone, Debug)]
pub struct IngressCtx {
    /// The operation under validation
    pub op: AiOperation,
    /// The middleware it targets
    pub middleware: Address,
    /// Chain id of the service
    pub chain_id: u64,
    /// Block number the snapshot was taken at
    pub block_number: u64,
    /// Base fee of the latest block, `None` on legacy networks
    pub base_fee: Option<U256>,
    /// State of the sender
    pub sender: EntityState,
    /// State of the factory, when the op deploys its sender
    pub factory: Option<EntityState>,
    /// State of the paymaster, when present
    pub paymaster: Option<EntityState>,

    /// Output of `simulateValidation`, set by the simulation handler
    pub validation: Option<ValidationResult>,
    /// Tracer report, set by the trace handler
    pub trace: Option<CollectorTrace>,
    /// Contract addresses touched during simulation
    pub touched: Vec<Address>,
    /// Aggregate code hash over `touched`, set by the snapshot handler
    pub code_hash: Option<H256>,
    /// Alt-mempool ids this op is restricted to, when storage exceptions fired
    pub alt_mempool_ids: Vec<String>,
}

impl IngressCtx {
    /// Build a context for an op; entity snapshots start empty and are
    /// filled in by the pool before the pipeline runs.
    pub fn new(
        op: AiOperation,
        middleware: Address,
        chain_id: u64,
        block_number: u64,
        base_fee: Option<U256>,
    ) -> Self {
        let sender = EntityState::new(Entity::account(op.sender));
        let factory = op.factory().map(|f| EntityState::new(Entity::factory(f)));
        let paymaster = op
            .paymaster()
            .map(|p| EntityState::new(Entity::paymaster(p)));
        Self {
            op,
            middleware,
            chain_id,
            block_number,
            base_fee,
            sender,
            factory,
            paymaster,
            validation: None,
            trace: None,
            touched: Vec::new(),
            code_hash: None,
            alt_mempool_ids: Vec::new(),
        }
    }

    /// Entity states present on this op, sender first.
    pub fn entities(&self) -> Vec<&EntityState> {
        let mut out = vec![&self.sender];
        out.extend(self.factory.as_ref());
        out.extend(self.paymaster.as_ref());
        out
    }

    /// The snapshotted state of the entity filling `kind`, if the op has one.
    pub fn entity_state(&self, kind: EntityType) -> Option<&EntityState> {
        match kind {
            EntityType::Account => Some(&self.sender),
            EntityType::Factory => self.factory.as_ref(),
            EntityType::Paymaster => self.paymaster.as_ref(),
        }
    }

    /// Human label of an address relative to this op's entities.
    pub fn entity_label(&self, address: Address) -> String {
        if address == self.sender.entity.address {
            "account".to_string()
        } else if self.op.factory() == Some(address) {
            "factory".to_string()
        } else if self.op.paymaster() == Some(address) {
            "paymaster".to_string()
        } else {
            format!("{address:?}")
        }
    }
}
