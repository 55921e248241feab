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

use ethers::types::{Address, U256};
use parse_display::Display;
use serde::{Deserialize, Serialize};

/// Derived standing of an entity, computed from its counters.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReputationStatus {
    /// Entity is in good standing
    Ok,
    /// Entity has a poor inclusion rate and is rate limited
    Throttled,
    /// Entity has an abysmal inclusion rate and is rejected outright
    Banned,
}

/// Reputation counters of a single entity.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reputation {
    /// The entity's address
    pub address: Address,
    /// Number of times the entity was seen in a validated aiOp
    pub ops_seen: u64,
    /// Number of times the entity appeared in a submitted batch
    pub ops_included: u64,
}

/// Explicit counter override, applied verbatim via the debug API.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationOverride {
    /// The entity's address
    pub address: Address,
    /// Replacement value for opsSeen
    pub ops_seen: u64,
    /// Replacement value for opsIncluded
    pub ops_included: u64,
}

/// Tunable constants of the reputation and throttling engine.
#[derive(Debug, Clone)]
pub struct ReputationConstants {
    /// Minimum stake, in wei, for an entity to count as staked
    pub min_stake_value: U256,
    /// Minimum unstake delay, in seconds, for an entity to count as staked
    pub min_unstake_delay: U256,
    /// Max pending ops for an unstaked sender
    pub same_sender_mempool_count: usize,
    /// Max pending ops for an unstaked factory or paymaster
    pub same_unstaked_entity_mempool_count: usize,
    /// Max pending ops for a throttled entity
    pub throttled_entity_mempool_count: usize,
    /// Blocks a throttled entity's op may stay pooled
    pub throttled_entity_live_blocks: u64,
    /// Batches per throttled entity
    pub throttled_entity_bundle_count: u64,
    /// Divisor turning opsSeen into the minimum expected inclusions
    pub min_inclusion_rate_denominator: u64,
    /// Slack before an underperforming entity is throttled
    pub throttling_slack: u64,
    /// Slack before an underperforming entity is banned
    pub ban_slack: u64,
}

impl Default for ReputationConstants {
    fn default() -> Self {
        Self {
            min_stake_value: U256::zero(),
            min_unstake_delay: U256::zero(),
            same_sender_mempool_count: 10,
            same_unstaked_entity_mempool_count: 11,
            throttled_entity_mempool_count: 4,
            throttled_entity_live_blocks: 10,
            throttled_entity_bundle_count: 10,
            min_inclusion_rate_denominator: 10,
            throttling_slack: 10,
            ban_slack: 50,
        }
    }
}
