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

use std::sync::Arc;

use aiops_types::{EntityType, ReputationConstants, ReputationStatus};
use ethers::types::{Address, U256};

use crate::{
    gas::{intrinsic_call_gas, Overhead},
    CheckViolation, EntityState, IngressCtx, IngressHandler, ValidationError,
};

/// Steps 1–2 of the canonical pipeline: reject ops from banned entities,
/// rate-limit throttled ones, and cap pending ops of unstaked entities.
#[derive(Debug)]
pub struct ReputationRules {
    constants: Arc<ReputationConstants>,
}

impl ReputationRules {
    /// Create the reputation enforcement stage.
    pub fn new(constants: Arc<ReputationConstants>) -> Self {
        Self { constants }
    }

    fn check_status(&self, state: &EntityState) -> Result<(), ValidationError> {
        match state.status {
            ReputationStatus::Ok => Ok(()),
            ReputationStatus::Banned => Err(ValidationError::Banned(state.entity)),
            ReputationStatus::Throttled => {
                if state.pending_ops >= self.constants.throttled_entity_mempool_count {
                    Err(ValidationError::Throttled(state.entity))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn check_limit(&self, state: &EntityState) -> Result<(), ValidationError> {
        let limit = match state.entity.kind {
            EntityType::Account => self.constants.same_sender_mempool_count,
            EntityType::Factory | EntityType::Paymaster => {
                self.constants.same_unstaked_entity_mempool_count
            }
        };
        // An unstaked entity is rejected once it sits exactly at the limit;
        // >= also covers counts that overshot through races.
        if !state.deposit.is_staked(&self.constants) && state.pending_ops >= limit {
            return Err(ValidationError::UnstakedEntityLimit(state.entity, limit));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IngressHandler for ReputationRules {
    fn name(&self) -> &'static str {
        "reputation"
    }

    async fn handle(&self, ctx: &mut IngressCtx) -> Result<(), ValidationError> {
        for state in ctx.entities() {
            self.check_status(state)?;
        }
        for state in ctx.entities() {
            self.check_limit(state)?;
        }
        Ok(())
    }
}

/// Step 3: structural and fee checks that need no simulation.
#[derive(Debug)]
pub struct StructuralChecks {
    settings: CheckSettings,
    overhead: Arc<Overhead>,
}

/// Settings of the structural checks.
#[derive(Clone, Debug)]
pub struct CheckSettings {
    /// Cap on an op's verificationGasLimit
    pub max_verification_gas: U256,
}

impl StructuralChecks {
    /// Create the structural check stage.
    pub fn new(settings: CheckSettings, overhead: Arc<Overhead>) -> Self {
        Self { settings, overhead }
    }

    fn check_sender(&self, ctx: &IngressCtx) -> Result<(), CheckViolation> {
        if ctx.op.sender == Address::zero() {
            return Err(CheckViolation::SenderIsZero);
        }
        Ok(())
    }

    fn check_init_code(&self, ctx: &IngressCtx) -> Result<(), CheckViolation> {
        let init_code = &ctx.op.init_code;
        if init_code.is_empty() {
            return Ok(());
        }
        if init_code.len() < 20 {
            return Err(CheckViolation::InitCodeTooShort(init_code.len()));
        }
        match ctx.op.factory() {
            Some(factory) if factory != Address::zero() => Ok(()),
            _ => Err(CheckViolation::FactoryIsZero),
        }
    }

    fn check_paymaster(&self, ctx: &IngressCtx) -> Result<(), CheckViolation> {
        let pmd = &ctx.op.paymaster_and_data;
        if pmd.is_empty() {
            return Ok(());
        }
        if pmd.len() < 20 {
            return Err(CheckViolation::PaymasterTooShort(pmd.len()));
        }
        let Some(state) = ctx.paymaster.as_ref() else {
            return Err(CheckViolation::PaymasterTooShort(pmd.len()));
        };
        if !state.has_code {
            return Err(CheckViolation::PaymasterIsNotContract(
                state.entity.address,
            ));
        }
        let prefund = ctx.op.max_prefund();
        if state.deposit.deposit < prefund {
            return Err(CheckViolation::PaymasterDepositTooLow(
                state.deposit.deposit,
                prefund,
            ));
        }
        Ok(())
    }

    fn check_gas(&self, ctx: &IngressCtx) -> Result<(), CheckViolation> {
        let op = &ctx.op;
        if op.verification_gas_limit > self.settings.max_verification_gas {
            return Err(CheckViolation::VerificationGasLimitTooHigh(
                op.verification_gas_limit,
                self.settings.max_verification_gas,
            ));
        }
        let min_call_gas = intrinsic_call_gas(op.call_data.len());
        if op.call_gas_limit < min_call_gas {
            return Err(CheckViolation::CallGasLimitTooLow(
                op.call_gas_limit,
                min_call_gas,
            ));
        }
        let min_pvg = self.overhead.static_pvg(op);
        if op.pre_verification_gas < min_pvg {
            return Err(CheckViolation::PreVerificationGasTooLow(
                op.pre_verification_gas,
                min_pvg,
            ));
        }
        Ok(())
    }

    fn check_fees(&self, ctx: &IngressCtx) -> Result<(), CheckViolation> {
        let op = &ctx.op;
        let Some(base_fee) = ctx.base_fee else {
            // Legacy network: the two fee fields must agree.
            if op.max_priority_fee_per_gas != op.max_fee_per_gas {
                return Err(CheckViolation::LegacyFeesMismatch);
            }
            return Ok(());
        };
        if op.max_priority_fee_per_gas > op.max_fee_per_gas {
            return Err(CheckViolation::PriorityFeeOverFeeCap(
                op.max_fee_per_gas,
                op.max_priority_fee_per_gas,
            ));
        }
        if op.max_fee_per_gas < base_fee {
            return Err(CheckViolation::MaxFeePerGasTooLow(
                op.max_fee_per_gas,
                base_fee,
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IngressHandler for StructuralChecks {
    fn name(&self) -> &'static str {
        "checks"
    }

    async fn handle(&self, ctx: &mut IngressCtx) -> Result<(), ValidationError> {
        self.check_sender(ctx)?;
        self.check_init_code(ctx)?;
        self.check_paymaster(ctx)?;
        self.check_gas(ctx)?;
        self.check_fees(ctx)?;
        Ok(())
    }
}
