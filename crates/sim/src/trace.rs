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

//! Step 5 of the ingress pipeline: rules over the bundler-collector trace of
//! `simulateValidation`. Opcode bans, CREATE2 accounting, undeployed-code
//! calls, inner value transfers, and the storage slot matrix all live here.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use aiops_provider::{abi, AiMiddleware, CollectorTrace, EntityCallInfo};
use aiops_types::{EntityType, ReputationConstants};
use anyhow::{anyhow, Context};
use ethers::{
    types::{Address, H160, U256},
    utils::keccak256,
};

use crate::{Directory, IngressCtx, IngressHandler, SimulationViolation, ValidationError};

const BANNED_OPCODES: &[&str] = &[
    "GASPRICE",
    "GASLIMIT",
    "DIFFICULTY",
    "TIMESTAMP",
    "BASEFEE",
    "BLOCKHASH",
    "NUMBER",
    "SELFBALANCE",
    "BALANCE",
    "ORIGIN",
    "GAS",
    "CREATE",
    "COINBASE",
    "SELFDESTRUCT",
];

const CREATE2: &str = "CREATE2";

// Associated storage covers [slot, slot + 128] of any observed keccak of a
// padded entity address.
const ASSOCIATED_SLOT_OFFSET: u64 = 128;

// RIP-7212 secp256r1 signature verification precompile.
const RIP7212_PRECOMPILE: Address = H160([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x00,
]);

/// Settings of the trace rules.
#[derive(Clone, Debug)]
pub struct TraceSettings {
    /// Whether calls to the RIP-7212 precompile are allowed
    pub is_rip7212_supported: bool,
    /// Stake minimums used to qualify entities as staked
    pub constants: Arc<ReputationConstants>,
    /// Alt-mempool storage exceptions
    pub directory: Arc<Directory>,
}

/// The trace validation stage.
#[derive(Debug)]
pub struct TraceValidate<M> {
    middleware: Arc<M>,
    settings: TraceSettings,
}

impl<M> TraceValidate<M> {
    /// Create the trace validation stage.
    pub fn new(middleware: Arc<M>, settings: TraceSettings) -> Self {
        Self {
            middleware,
            settings,
        }
    }
}

#[async_trait::async_trait]
impl<M: AiMiddleware> IngressHandler for TraceValidate<M> {
    fn name(&self) -> &'static str {
        "trace"
    }

    async fn handle(&self, ctx: &mut IngressCtx) -> Result<(), ValidationError> {
        let trace = self
            .middleware
            .trace_simulate_validation(&ctx.op)
            .await
            .map_err(ValidationError::Internal)?;
        self.validate(ctx, &trace)?;
        ctx.trace = Some(trace);
        Ok(())
    }
}

impl<M> TraceValidate<M> {
    fn validate(&self, ctx: &mut IngressCtx, trace: &CollectorTrace) -> Result<(), ValidationError> {
        let empty = EntityCallInfo::default();
        let entities = known_entities(ctx, trace, &empty, &self.settings.constants);

        // Opcode and access rules per entity, and the touched-contract set.
        let mut touched: HashSet<Address> = HashSet::new();
        for entity in &entities {
            if entity.info.oog {
                return Err(SimulationViolation::OutOfGas(entity.kind).into());
            }
            if entity.info.ext_code_access_info.contains_key(&ctx.middleware) {
                return Err(SimulationViolation::ForbiddenExtCodeAccess(entity.kind).into());
            }
            for opcode in entity.info.opcodes.keys() {
                if BANNED_OPCODES.contains(&opcode.as_str()) {
                    return Err(
                        SimulationViolation::UsedBannedOpcode(entity.kind, opcode.clone()).into(),
                    );
                }
                if !entity.staked
                    && opcode == CREATE2
                    && entity.kind != EntityType::Factory
                {
                    return Err(SimulationViolation::UnstakedUsedBannedOpcode(
                        entity.kind,
                        opcode.clone(),
                    )
                    .into());
                }
            }
            if entity.address != Address::zero() {
                touched.insert(entity.address);
            }
            touched.extend(entity.info.contract_size.keys().copied());
        }

        // CREATE2 may appear once, in the factory phase, and only when the
        // op actually deploys its sender.
        for entity in &entities {
            let count = entity.info.opcodes.get(CREATE2).copied().unwrap_or(0);
            match entity.kind {
                EntityType::Factory => {
                    if count > 1 || (count > 0 && ctx.op.init_code.is_empty()) {
                        return Err(SimulationViolation::FactoryUsedCreate2Twice.into());
                    }
                }
                _ => {
                    if count > 0 {
                        return Err(SimulationViolation::UsedCreate2(entity.kind).into());
                    }
                }
            }
        }

        // Storage slot rules.
        let slots_by_entity = associated_slots_by_entity(&entities, &trace.keccak);
        let empty_slots = BTreeSet::new();
        let sender_slots = slots_by_entity
            .get(&ctx.op.sender)
            .unwrap_or(&empty_slots);
        let factory_staked = entities
            .iter()
            .find(|e| e.kind == EntityType::Factory)
            .map(|e| e.staked)
            .unwrap_or(false);
        let mut alt_mempool_ids: Vec<String> = Vec::new();
        for entity in &entities {
            let entity_slots = slots_by_entity
                .get(&entity.address)
                .unwrap_or(&empty_slots);
            self.validate_storage(
                ctx,
                entity,
                sender_slots,
                entity_slots,
                factory_staked,
                &mut alt_mempool_ids,
            )?;
        }

        // Call frame rules: the paymaster context rule, balanceOf on the
        // middleware, and inner value transfers.
        let paymaster_staked = entities
            .iter()
            .find(|e| e.kind == EntityType::Paymaster)
            .map(|e| e.staked)
            .unwrap_or(false);
        for call in &trace.calls {
            if call
                .method
                .eq_ignore_ascii_case(abi::VALIDATE_PAYMASTER_AI_OP_SELECTOR)
            {
                let ret = call.ret.as_ref().map(|b| b.as_ref()).unwrap_or_default();
                let (context, _) = abi::decode_validate_paymaster_return(ret)
                    .with_context(|| {
                        format!(
                            "unexpected tracing result for op {:?}",
                            ctx.op.op_hash(ctx.middleware, ctx.chain_id)
                        )
                    })
                    .map_err(ValidationError::Internal)?;
                if !context.is_empty() && !paymaster_staked {
                    return Err(SimulationViolation::UnstakedPaymasterContext.into());
                }
            } else if call.to == ctx.middleware
                && call.method.eq_ignore_ascii_case(abi::BALANCE_OF_SELECTOR)
            {
                return Err(
                    SimulationViolation::CalledBalanceOf(ctx.entity_label(call.from)).into(),
                );
            } else if call.to != ctx.middleware
                && call.value.unwrap_or_default() > U256::zero()
            {
                return Err(SimulationViolation::CallHadValue(
                    ctx.entity_label(call.from),
                    ctx.entity_label(call.to),
                )
                .into());
            }
        }

        let mut touched: Vec<Address> = touched.into_iter().collect();
        touched.sort();
        ctx.touched = touched;
        alt_mempool_ids.sort();
        alt_mempool_ids.dedup();
        ctx.alt_mempool_ids = alt_mempool_ids;
        Ok(())
    }

    fn validate_storage(
        &self,
        ctx: &IngressCtx,
        entity: &KnownEntity<'_>,
        sender_slots: &BTreeSet<U256>,
        entity_slots: &BTreeSet<U256>,
        factory_staked: bool,
        alt_mempool_ids: &mut Vec<String>,
    ) -> Result<(), ValidationError> {
        // Calls into addresses with no deployed code are forbidden, except
        // the RIP-7212 precompile where supported.
        for (address, size_info) in &entity.info.contract_size {
            if *address != ctx.op.sender
                && size_info.contract_size == 0
                && !(self.settings.is_rip7212_supported && *address == RIP7212_PRECOMPILE)
            {
                return Err(SimulationViolation::AccessedUndeployedContract(
                    entity.kind,
                    size_info.opcode.clone(),
                    *address,
                )
                .into());
            }
        }

        let deploying = !ctx.op.init_code.is_empty();
        for (address, access) in &entity.info.access {
            if *address == ctx.op.sender || *address == ctx.middleware {
                continue;
            }
            let mut must_stake_slot: Option<U256> = None;
            let modes: [(&str, Vec<U256>); 2] = [
                ("read", access.reads.keys().copied().collect()),
                ("write", access.writes.keys().copied().collect()),
            ];
            for (mode, slots) in modes {
                for slot in slots {
                    if is_associated(sender_slots, slot) {
                        // Sender-associated storage is free game, except
                        // during deployment where the factory (or the
                        // accessing entity itself) must be staked.
                        if deploying && (!factory_staked || entity.address != ctx.op.sender) {
                            must_stake_slot = Some(slot);
                        }
                        continue;
                    }
                    let exceptions = self.settings.directory.invalid_storage_access_exceptions(
                        entity.kind.to_str(),
                        &ctx.entity_label(*address),
                        slot,
                    );
                    if (is_associated(entity_slots, slot) || mode == "read")
                        && exceptions.is_empty()
                    {
                        must_stake_slot = Some(slot);
                    } else if !exceptions.is_empty() {
                        alt_mempool_ids.extend(exceptions);
                    } else {
                        return Err(SimulationViolation::ForbiddenStorageAccess(
                            entity.kind,
                            mode.to_string(),
                            ctx.entity_label(*address),
                            slot,
                        )
                        .into());
                    }
                }
            }
            if let Some(slot) = must_stake_slot {
                if !entity.staked {
                    return Err(SimulationViolation::UnstakedStorageAccess(
                        entity.kind,
                        ctx.entity_label(*address),
                        slot,
                    )
                    .into());
                }
            }
        }
        Ok(())
    }
}

struct KnownEntity<'a> {
    kind: EntityType,
    address: Address,
    info: &'a EntityCallInfo,
    staked: bool,
}

// Classify the trace's top-level phases into the op's three roles: the
// account phase targets the sender, the paymaster phase targets the
// paymaster, and any other phase entered through createSender is the
// factory's.
fn known_entities<'a>(
    ctx: &IngressCtx,
    trace: &'a CollectorTrace,
    empty: &'a EntityCallInfo,
    constants: &ReputationConstants,
) -> Vec<KnownEntity<'a>> {
    let paymaster = ctx.op.paymaster();
    let mut account_info = empty;
    let mut factory_info = empty;
    let mut paymaster_info = empty;
    for phase in &trace.calls_from_middleware {
        if phase.top_level_target_address == ctx.op.sender {
            account_info = phase;
        } else if Some(phase.top_level_target_address) == paymaster {
            paymaster_info = phase;
        } else if phase
            .top_level_method_sig
            .eq_ignore_ascii_case(abi::CREATE_SENDER_SELECTOR)
        {
            factory_info = phase;
        }
    }

    let staked = |kind: EntityType| {
        ctx.entity_state(kind)
            .map(|s| s.deposit.is_staked(constants))
            .unwrap_or(false)
    };
    let mut out = vec![KnownEntity {
        kind: EntityType::Account,
        address: ctx.op.sender,
        info: account_info,
        staked: staked(EntityType::Account),
    }];
    if let Some(factory) = ctx.op.factory() {
        out.push(KnownEntity {
            kind: EntityType::Factory,
            address: factory,
            info: factory_info,
            staked: staked(EntityType::Factory),
        });
    }
    if let Some(paymaster) = paymaster {
        out.push(KnownEntity {
            kind: EntityType::Paymaster,
            address: paymaster,
            info: paymaster_info,
            staked: staked(EntityType::Paymaster),
        });
    }
    out
}

// Associated slots per entity: for every observed keccak pre-image that
// starts with the 32-byte padded entity address, the hash value roots an
// associated slot range.
fn associated_slots_by_entity(
    entities: &[KnownEntity<'_>],
    keccak_preimages: &[String],
) -> HashMap<Address, BTreeSet<U256>> {
    let mut out: HashMap<Address, BTreeSet<U256>> = HashMap::new();
    for preimage in keccak_preimages {
        let Ok(bytes) = decode_hex(preimage) else {
            continue;
        };
        if bytes.len() < 32 {
            continue;
        }
        let value = U256::from_big_endian(&keccak256(&bytes));
        for entity in entities {
            if entity.address == Address::zero() {
                continue;
            }
            let mut padded = [0u8; 32];
            padded[12..].copy_from_slice(entity.address.as_bytes());
            if bytes[..32] == padded {
                out.entry(entity.address).or_default().insert(value);
            }
        }
    }
    out
}

fn is_associated(slots: &BTreeSet<U256>, slot: U256) -> bool {
    let Some(&root) = slots.range(..=slot).next_back() else {
        return false;
    };
    slot - root <= U256::from(ASSOCIATED_SLOT_OFFSET)
}

fn decode_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    ethers::utils::hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| anyhow!("invalid hex in tracer keccak list: {e}"))
}

#[cfg(test)]
mod tests {
    use aiops_provider::{AccessInfo, CallFrame, ContractSizeInfo, MockAiMiddleware};
    use aiops_types::AiOperation;
    use ethers::abi::{encode, Token};

    use super::*;
    use crate::{AltMempool, StorageException};

    const SENDER: Address = H160([0x11; 20]);
    const MIDDLEWARE: Address = H160([0xee; 20]);
    const SENDER_CREATOR: Address = H160([0x55; 20]);

    #[tokio::test]
    async fn test_banned_opcode_rejected() {
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            opcodes: HashMap::from([("TIMESTAMP".to_string(), 1)]),
            ..Default::default()
        });

        match run(trace, simple_op()).await {
            Err(ValidationError::Simulation(SimulationViolation::UsedBannedOpcode(
                EntityType::Account,
                opcode,
            ))) => assert_eq!(opcode, "TIMESTAMP"),
            other => panic!("expected banned opcode violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oog_rejected() {
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            oog: true,
            ..Default::default()
        });
        assert!(matches!(
            run(trace, simple_op()).await,
            Err(ValidationError::Simulation(SimulationViolation::OutOfGas(EntityType::Account)))
        ));
    }

    #[tokio::test]
    async fn test_extcode_on_middleware_rejected() {
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            ext_code_access_info: HashMap::from([(MIDDLEWARE, "EXTCODEHASH".to_string())]),
            ..Default::default()
        });
        assert!(matches!(
            run(trace, simple_op()).await,
            Err(ValidationError::Simulation(SimulationViolation::ForbiddenExtCodeAccess(_)))
        ));
    }

    #[tokio::test]
    async fn test_account_create2_rejected() {
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            opcodes: HashMap::from([("CREATE2".to_string(), 1)]),
            ..Default::default()
        });
        // account is staked so the unstaked rule does not fire first
        let mut op = simple_op();
        op.init_code = factory_init_code();
        assert!(matches!(
            run_with(trace, op, true).await,
            Err(ValidationError::Simulation(SimulationViolation::UsedCreate2(
                EntityType::Account
            )))
        ));
    }

    #[tokio::test]
    async fn test_factory_single_create2_allowed() {
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER_CREATOR,
            top_level_method_sig: abi::CREATE_SENDER_SELECTOR.to_string(),
            opcodes: HashMap::from([("CREATE2".to_string(), 1)]),
            ..Default::default()
        });
        let mut op = simple_op();
        op.init_code = factory_init_code();
        run(trace, op).await.unwrap();
    }

    #[tokio::test]
    async fn test_factory_double_create2_rejected() {
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER_CREATOR,
            top_level_method_sig: abi::CREATE_SENDER_SELECTOR.to_string(),
            opcodes: HashMap::from([("CREATE2".to_string(), 2)]),
            ..Default::default()
        });
        let mut op = simple_op();
        op.init_code = factory_init_code();
        assert!(matches!(
            run(trace, op).await,
            Err(ValidationError::Simulation(
                SimulationViolation::FactoryUsedCreate2Twice
            ))
        ));
    }

    #[tokio::test]
    async fn test_undeployed_call_rejected() {
        let target = Address::repeat_byte(0x77);
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            contract_size: HashMap::from([(
                target,
                ContractSizeInfo {
                    contract_size: 0,
                    opcode: "CALL".to_string(),
                },
            )]),
            ..Default::default()
        });
        assert!(matches!(
            run(trace, simple_op()).await,
            Err(ValidationError::Simulation(
                SimulationViolation::AccessedUndeployedContract(EntityType::Account, _, _)
            ))
        ));
    }

    #[tokio::test]
    async fn test_sender_associated_storage_allowed() {
        let other = Address::repeat_byte(0x99);
        // keccak pre-image starting with the padded sender address roots the
        // sender's associated slots
        let mut preimage = [0u8; 64];
        preimage[12..32].copy_from_slice(SENDER.as_bytes());
        let root = U256::from_big_endian(&keccak256(preimage));

        let mut trace = CollectorTrace::default();
        trace.keccak = vec![format!("0x{}", ethers::utils::hex::encode(preimage))];
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            access: HashMap::from([(
                other,
                AccessInfo {
                    reads: HashMap::new(),
                    writes: HashMap::from([(root + 5, 1)]),
                },
            )]),
            ..Default::default()
        });
        run(trace, simple_op()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unassociated_write_rejected() {
        let other = Address::repeat_byte(0x99);
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            access: HashMap::from([(
                other,
                AccessInfo {
                    reads: HashMap::new(),
                    writes: HashMap::from([(U256::from(7), 1)]),
                },
            )]),
            ..Default::default()
        });
        assert!(matches!(
            run(trace, simple_op()).await,
            Err(ValidationError::Simulation(
                SimulationViolation::ForbiddenStorageAccess(EntityType::Account, _, _, _)
            ))
        ));
    }

    #[tokio::test]
    async fn test_unstaked_read_requires_stake() {
        let other = Address::repeat_byte(0x99);
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            access: HashMap::from([(
                other,
                AccessInfo {
                    reads: HashMap::from([(U256::from(7), "0x0".to_string())]),
                    writes: HashMap::new(),
                },
            )]),
            ..Default::default()
        });
        // plain reads are tolerated only for staked entities
        assert!(matches!(
            run(trace.clone(), simple_op()).await,
            Err(ValidationError::Simulation(
                SimulationViolation::UnstakedStorageAccess(EntityType::Account, _, _)
            ))
        ));
        run_with(trace, simple_op(), true).await.unwrap();
    }

    #[tokio::test]
    async fn test_alt_mempool_downgrades_violation() {
        let other = Address::repeat_byte(0x99);
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            access: HashMap::from([(
                other,
                AccessInfo {
                    reads: HashMap::new(),
                    writes: HashMap::from([(U256::from(7), 1)]),
                },
            )]),
            ..Default::default()
        });

        let directory = Directory::new(vec![AltMempool {
            id: "QmPool".to_string(),
            allowed_invalid_storage_access: vec![StorageException {
                entity: "account".to_string(),
                contract: format!("{other:?}"),
                slot: "*".to_string(),
            }],
        }]);
        let mut middleware = MockAiMiddleware::new();
        middleware
            .expect_trace_simulate_validation()
            .returning(move |_| Ok(trace.clone()));
        let handler = TraceValidate::new(
            Arc::new(middleware),
            TraceSettings {
                is_rip7212_supported: false,
                constants: Arc::new(ReputationConstants::default()),
                directory: Arc::new(directory),
            },
        );
        let mut ctx = ctx_for(simple_op(), false);
        handler.handle(&mut ctx).await.unwrap();
        assert_eq!(ctx.alt_mempool_ids, vec!["QmPool".to_string()]);
    }

    #[tokio::test]
    async fn test_value_transfer_rejected() {
        let mut trace = CollectorTrace::default();
        trace.calls.push(CallFrame {
            from: SENDER,
            to: Address::repeat_byte(0x88),
            method: "0x00000000".to_string(),
            ret: None,
            value: Some(U256::one()),
        });
        assert!(matches!(
            run(trace, simple_op()).await,
            Err(ValidationError::Simulation(SimulationViolation::CallHadValue(_, _)))
        ));
    }

    #[tokio::test]
    async fn test_value_transfer_to_middleware_allowed() {
        let mut trace = CollectorTrace::default();
        trace.calls.push(CallFrame {
            from: SENDER,
            to: MIDDLEWARE,
            method: "0xb760faf9".to_string(),
            ret: None,
            value: Some(U256::one()),
        });
        run(trace, simple_op()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unstaked_paymaster_context_rejected() {
        let paymaster = Address::repeat_byte(0x42);
        let ret = encode(&[
            Token::Bytes(vec![0x01]),
            Token::Uint(U256::zero()),
        ]);
        let mut trace = CollectorTrace::default();
        trace.calls.push(CallFrame {
            from: MIDDLEWARE,
            to: paymaster,
            method: abi::VALIDATE_PAYMASTER_AI_OP_SELECTOR.to_string(),
            ret: Some(ret.into()),
            value: None,
        });
        let mut op = simple_op();
        op.paymaster_and_data = paymaster.as_bytes().to_vec().into();
        assert!(matches!(
            run(trace, op).await,
            Err(ValidationError::Simulation(
                SimulationViolation::UnstakedPaymasterContext
            ))
        ));
    }

    #[tokio::test]
    async fn test_balance_of_on_middleware_rejected() {
        let mut trace = CollectorTrace::default();
        trace.calls.push(CallFrame {
            from: SENDER,
            to: MIDDLEWARE,
            method: abi::BALANCE_OF_SELECTOR.to_string(),
            ret: None,
            value: None,
        });
        assert!(matches!(
            run(trace, simple_op()).await,
            Err(ValidationError::Simulation(SimulationViolation::CalledBalanceOf(_)))
        ));
    }

    #[tokio::test]
    async fn test_touched_contracts_collected() {
        let contract = Address::repeat_byte(0x77);
        let mut trace = CollectorTrace::default();
        trace.calls_from_middleware.push(EntityCallInfo {
            top_level_target_address: SENDER,
            contract_size: HashMap::from([(
                contract,
                ContractSizeInfo {
                    contract_size: 100,
                    opcode: "CALL".to_string(),
                },
            )]),
            ..Default::default()
        });
        let mut middleware = MockAiMiddleware::new();
        middleware
            .expect_trace_simulate_validation()
            .returning(move |_| Ok(trace.clone()));
        let handler = handler(middleware);
        let mut ctx = ctx_for(simple_op(), false);
        handler.handle(&mut ctx).await.unwrap();
        assert!(ctx.touched.contains(&SENDER));
        assert!(ctx.touched.contains(&contract));
    }

    async fn run(trace: CollectorTrace, op: AiOperation) -> Result<(), ValidationError> {
        run_with(trace, op, false).await
    }

    async fn run_with(
        trace: CollectorTrace,
        op: AiOperation,
        sender_staked: bool,
    ) -> Result<(), ValidationError> {
        let mut middleware = MockAiMiddleware::new();
        middleware
            .expect_trace_simulate_validation()
            .returning(move |_| Ok(trace.clone()));
        let handler = handler(middleware);
        let mut ctx = ctx_for(op, sender_staked);
        handler.handle(&mut ctx).await
    }

    fn handler(middleware: MockAiMiddleware) -> TraceValidate<MockAiMiddleware> {
        TraceValidate::new(
            Arc::new(middleware),
            TraceSettings {
                is_rip7212_supported: false,
                constants: Arc::new(ReputationConstants::default()),
                directory: Arc::new(Directory::default()),
            },
        )
    }

    fn ctx_for(op: AiOperation, sender_staked: bool) -> IngressCtx {
        let mut ctx = IngressCtx::new(op, MIDDLEWARE, 1, 100, Some(1.into()));
        ctx.sender.deposit.staked = sender_staked;
        ctx
    }

    fn simple_op() -> AiOperation {
        AiOperation {
            sender: SENDER,
            ..Default::default()
        }
    }

    fn factory_init_code() -> ethers::types::Bytes {
        let mut code = vec![0x22u8; 20];
        code.extend([0xaa, 0xbb]);
        code.into()
    }
}
