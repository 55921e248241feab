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

//! Gas overhead model: the bundler's compensation for calldata and batch
//! overhead not metered by the middleware.

use std::sync::Arc;

use aiops_types::AiOperation;
use aiops_utils::math;
use ethers::types::U256;
use futures_util::future::BoxFuture;

/// Chain-specific pre-verification-gas component. Given the (sanitized) op
/// and the static overhead, returns the full PVG, or `None` to fall back to
/// the static value. Used to fold in L1 data fees on rollups.
pub type CalcPvgFn =
    Arc<dyn Fn(AiOperation, U256) -> BoxFuture<'static, anyhow::Result<Option<U256>>> + Send + Sync>;

/// Helper for calculating gas limits based on pre-defined parameters.
#[derive(Clone)]
pub struct Overhead {
    intrinsic_fixed: u64,
    per_ai_op_fixed: u64,
    per_ai_op_multiplier: u64,
    zero_byte: u64,
    non_zero_byte: u64,
    min_bundle_size: u64,
    sanitized_pvg: U256,
    sanitized_vgl: U256,
    sanitized_cgl: U256,
    calc_pvg_fn: Option<CalcPvgFn>,
    pvg_buffer_factor: u32,
}

impl Default for Overhead {
    fn default() -> Self {
        Self {
            intrinsic_fixed: 21_000,
            per_ai_op_fixed: 22_874,
            per_ai_op_multiplier: 25,
            zero_byte: 4,
            non_zero_byte: 16,
            min_bundle_size: 1,
            sanitized_pvg: 100_000.into(),
            sanitized_vgl: 1_000_000.into(),
            sanitized_cgl: 1_000_000.into(),
            calc_pvg_fn: None,
            pvg_buffer_factor: 0,
        }
    }
}

impl Overhead {
    /// Install a chain-specific PVG component (e.g. an L1 data-fee call).
    pub fn with_calc_pvg_fn(mut self, f: CalcPvgFn) -> Self {
        self.calc_pvg_fn = Some(f);
        self
    }

    /// Percentage added on top of estimates to absorb variability between
    /// estimation and submission.
    pub fn with_pvg_buffer_factor(mut self, factor: u32) -> Self {
        self.pvg_buffer_factor = factor;
        self
    }

    /// The static expected gas cost of processing this op as part of a batch.
    ///
    /// Gas fields and the signature are sanitized to fixed values first so
    /// the result does not swing with values that are still being estimated.
    pub fn static_pvg(&self, op: &AiOperation) -> U256 {
        let packed = self.sanitize(op).pack();
        let batch_overhead = self.intrinsic_fixed / self.min_bundle_size
            + self.calldata_cost(&packed);
        let words = (packed.len() as u64 + 31) / 32;
        let per_op = self.per_ai_op_multiplier * words + self.per_ai_op_fixed;
        U256::from(batch_overhead + per_op)
    }

    /// Full pre-verification gas: the static value plus the chain-specific
    /// component when one is installed.
    pub async fn pre_verification_gas(&self, op: &AiOperation) -> anyhow::Result<U256> {
        let static_pvg = self.static_pvg(op);
        if let Some(calc) = &self.calc_pvg_fn {
            if let Some(pvg) = calc(self.sanitize(op), static_pvg).await? {
                return Ok(pvg);
            }
        }
        Ok(static_pvg)
    }

    /// [`Self::pre_verification_gas`] increased by the buffer factor, for
    /// estimation responses.
    pub async fn pre_verification_gas_with_buffer(
        &self,
        op: &AiOperation,
    ) -> anyhow::Result<U256> {
        let pvg = self.pre_verification_gas(op).await?;
        Ok(math::increase_by_percent(pvg, self.pvg_buffer_factor))
    }

    fn calldata_cost(&self, packed: &[u8]) -> u64 {
        packed
            .iter()
            .map(|&b| {
                if b == 0 {
                    self.zero_byte
                } else {
                    self.non_zero_byte
                }
            })
            .sum()
    }

    // Fixes the gas fields and signature content to remove variability due
    // to values that differ between estimation and submission.
    fn sanitize(&self, op: &AiOperation) -> AiOperation {
        AiOperation {
            pre_verification_gas: self.sanitized_pvg,
            verification_gas_limit: self.sanitized_vgl,
            call_gas_limit: self.sanitized_cgl,
            signature: vec![1u8; op.signature.len()].into(),
            ..op.clone()
        }
    }
}

impl std::fmt::Debug for Overhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overhead")
            .field("intrinsic_fixed", &self.intrinsic_fixed)
            .field("per_ai_op_fixed", &self.per_ai_op_fixed)
            .field("per_ai_op_multiplier", &self.per_ai_op_multiplier)
            .field("min_bundle_size", &self.min_bundle_size)
            .field("pvg_buffer_factor", &self.pvg_buffer_factor)
            .finish_non_exhaustive()
    }
}

/// The intrinsic gas a call must at least carry: the fixed transaction cost
/// less the part already paid for by calldata, floored at zero.
pub fn intrinsic_call_gas(call_data_len: usize) -> U256 {
    U256::from(21_000u64.saturating_sub(call_data_len as u64))
}
