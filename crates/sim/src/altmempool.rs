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

//! Directory of alternative mempool policies. An alt-mempool may whitelist
//! specific storage accesses that the canonical rules reject; a matching
//! exception downgrades the rejection to an annotation restricting the op to
//! those mempool ids.

use ethers::types::U256;
use serde::Deserialize;

/// One alternative mempool definition, usually fetched from IPFS by id.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AltMempool {
    /// Identifier of the mempool (its IPFS CID)
    pub id: String,
    /// Storage accesses this mempool tolerates
    #[serde(default)]
    pub allowed_invalid_storage_access: Vec<StorageException>,
}

/// A whitelisted (entity, contract, slot) storage access.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageException {
    /// Accessing entity role: "account", "factory", or "paymaster"
    pub entity: String,
    /// Accessed contract: a role label or a hex address
    pub contract: String,
    /// Hex slot, or "*" for any slot
    #[serde(default = "any_slot")]
    pub slot: String,
}

fn any_slot() -> String {
    "*".to_string()
}

/// The set of alt mempools this bundler recognizes.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    mempools: Vec<AltMempool>,
}

impl Directory {
    /// Build a directory from resolved alt-mempool definitions.
    pub fn new(mempools: Vec<AltMempool>) -> Self {
        Self { mempools }
    }

    /// Ids of every alt mempool whitelisting the given storage access.
    /// Empty means the access stays a violation.
    pub fn invalid_storage_access_exceptions(
        &self,
        entity: &str,
        contract: &str,
        slot: U256,
    ) -> Vec<String> {
        self.mempools
            .iter()
            .filter(|mp| {
                mp.allowed_invalid_storage_access.iter().any(|ex| {
                    ex.entity == entity
                        && ex.contract.eq_ignore_ascii_case(contract)
                        && (ex.slot == "*"
                            || U256::from_str_radix(ex.slot.trim_start_matches("0x"), 16)
                                .map(|s| s == slot)
                                .unwrap_or(false))
                })
            })
            .map(|mp| mp.id.clone())
            .collect()
    }
}
