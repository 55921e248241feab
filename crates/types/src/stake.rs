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

use ethers::types::U256;
use serde::{Deserialize, Serialize};

use crate::ReputationConstants;

/// Deposit and stake of an entity, as reported by the middleware's
/// `getDepositInfo`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositInfo {
    /// Wei deposited with the middleware to pay for operations
    pub deposit: U256,
    /// Whether the middleware considers the entity staked
    pub staked: bool,
    /// Wei locked as stake
    pub stake: U256,
    /// Delay before the stake can be withdrawn, in seconds
    pub unstake_delay_sec: U256,
    /// Time at which a started withdrawal unlocks, zero if none
    pub withdraw_time: U256,
}

impl DepositInfo {
    /// Whether this entity counts as staked under the bundler's minimums.
    /// The on-chain flag alone is not sufficient: relaxed validation rules
    /// only apply above the configured stake and unstake-delay floors.
    pub fn is_staked(&self, constants: &ReputationConstants) -> bool {
        self.staked
            && self.stake >= constants.min_stake_value
            && self.unstake_delay_sec >= constants.min_unstake_delay
    }
}
