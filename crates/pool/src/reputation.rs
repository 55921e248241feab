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

//! Per-entity reputation counters and their derived status.
//!
//! Counters decay lazily: each elapsed day's worth of blocks replaces both
//! counters with ⌊x·23/24⌋, the hourly moving-average step mandated for
//! bundlers, applied when a record is next read or written.

use std::{collections::HashMap, sync::Arc};

use aiops_types::{Reputation, ReputationConstants, ReputationOverride, ReputationStatus};
use anyhow::Context;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::{db::Txn, Db};

const REPUTATION: u8 = b'r'; // REPUTATION ++ middleware ++ address -> RepRecord json

/// Blocks per 24 hours at a 12-second cadence; one decay step per interval.
pub const DEFAULT_DECAY_BLOCK_INTERVAL: u64 = 7_200;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepRecord {
    ops_seen: u64,
    ops_included: u64,
    last_updated_block: u64,
}

impl RepRecord {
    // Apply every full decay interval elapsed since the last touch.
    fn decayed(mut self, block: u64, interval: u64) -> Self {
        if interval == 0 {
            return self;
        }
        while block.saturating_sub(self.last_updated_block) >= interval {
            self.ops_seen = self.ops_seen * 23 / 24;
            self.ops_included = self.ops_included * 23 / 24;
            self.last_updated_block += interval;
        }
        if self.last_updated_block > block {
            self.last_updated_block = block;
        }
        self
    }
}

/// Store of reputation counters, keyed by (middleware, address).
#[derive(Clone, Debug)]
pub struct ReputationStore {
    db: Arc<Db>,
    constants: Arc<ReputationConstants>,
    decay_block_interval: u64,
}

impl ReputationStore {
    /// Create a store over the shared db.
    pub fn new(db: Arc<Db>, constants: Arc<ReputationConstants>) -> Self {
        Self {
            db,
            constants,
            decay_block_interval: DEFAULT_DECAY_BLOCK_INTERVAL,
        }
    }

    /// Override the number of blocks that make up one decay interval.
    pub fn with_decay_block_interval(mut self, interval: u64) -> Self {
        self.decay_block_interval = interval;
        self
    }

    /// Status of an address as of `block`.
    pub fn status(
        &self,
        middleware: Address,
        address: Address,
        block: u64,
    ) -> anyhow::Result<ReputationStatus> {
        let record = self
            .db
            .view(|view| {
                Ok(match view.get(&rep_key(middleware, address)) {
                    Some(raw) => decode(&raw)?,
                    None => RepRecord {
                        last_updated_block: block,
                        ..Default::default()
                    },
                })
            })?
            .decayed(block, self.decay_block_interval);
        Ok(self.derive_status(&record))
    }

    /// Bump opsSeen once for each address; called after an op passes
    /// validation, once per role its addresses fill.
    pub fn inc_ops_seen(
        &self,
        middleware: Address,
        addresses: &[Address],
        block: u64,
    ) -> anyhow::Result<()> {
        self.db.update(|txn| {
            for &address in addresses {
                let mut record = load(txn, middleware, address, block, self.decay_block_interval)?;
                record.ops_seen += 1;
                store(txn, middleware, address, &record)?;
            }
            Ok(())
        })
    }

    /// Bump opsIncluded by the number of times each address appeared in a
    /// submitted batch.
    pub fn inc_ops_included(
        &self,
        middleware: Address,
        counts: &HashMap<Address, u64>,
        block: u64,
    ) -> anyhow::Result<()> {
        self.db.update(|txn| {
            for (&address, &count) in counts {
                let mut record = load(txn, middleware, address, block, self.decay_block_interval)?;
                record.ops_included += count;
                store(txn, middleware, address, &record)?;
            }
            Ok(())
        })
    }

    /// Replace counters verbatim (debug surface).
    pub fn override_reputation(
        &self,
        middleware: Address,
        entries: &[ReputationOverride],
        block: u64,
    ) -> anyhow::Result<()> {
        self.db.update(|txn| {
            for entry in entries {
                let record = RepRecord {
                    ops_seen: entry.ops_seen,
                    ops_included: entry.ops_included,
                    last_updated_block: block,
                };
                store(txn, middleware, entry.address, &record)?;
            }
            Ok(())
        })
    }

    /// Dump of all tracked reputations.
    // TODO: enumerate the reputation prefix once a consumer needs more than
    // the debug endpoint's placeholder response.
    pub fn dump_reputation(&self, _middleware: Address) -> anyhow::Result<Vec<Reputation>> {
        Ok(Vec::new())
    }

    /// Drop all reputation records.
    pub fn clear(&self) -> anyhow::Result<()> {
        self.db.update(|txn| {
            txn.delete_prefix(&[REPUTATION]);
            Ok(())
        })
    }

    fn derive_status(&self, record: &RepRecord) -> ReputationStatus {
        let min_expected_included =
            record.ops_seen / self.constants.min_inclusion_rate_denominator;
        if record.ops_included + self.constants.ban_slack < min_expected_included {
            ReputationStatus::Banned
        } else if record.ops_included + self.constants.throttling_slack < min_expected_included {
            ReputationStatus::Throttled
        } else {
            ReputationStatus::Ok
        }
    }
}

fn rep_key(middleware: Address, address: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(REPUTATION);
    key.extend(middleware.as_bytes());
    key.extend(address.as_bytes());
    key
}

fn load(
    txn: &Txn<'_>,
    middleware: Address,
    address: Address,
    block: u64,
    interval: u64,
) -> anyhow::Result<RepRecord> {
    let record = match txn.get(&rep_key(middleware, address)) {
        Some(raw) => decode(&raw)?,
        None => RepRecord {
            last_updated_block: block,
            ..Default::default()
        },
    };
    Ok(record.decayed(block, interval))
}

fn store(
    txn: &mut Txn<'_>,
    middleware: Address,
    address: Address,
    record: &RepRecord,
) -> anyhow::Result<()> {
    let raw = serde_json::to_vec(record).context("should encode reputation record")?;
    txn.set(rep_key(middleware, address), raw);
    Ok(())
}

fn decode(raw: &[u8]) -> anyhow::Result<RepRecord> {
    serde_json::from_slice(raw).context("should decode reputation record")
}

#[cfg(test)]
mod tests {
    use aiops_types::ReputationOverride;

    use super::*;

    const MW: Address = ethers::types::H160([0xee; 20]);

    #[test]
    fn test_status_thresholds() {
        let store = store();
        let addr = addr(1);

        // seen=1000, included=0 -> banned
        store.set(addr, 1000, 0);
        assert_eq!(store.status(MW, addr, 0).unwrap(), ReputationStatus::Banned);

        // seen=1000, included=60 -> throttled
        store.set(addr, 1000, 60);
        assert_eq!(
            store.status(MW, addr, 0).unwrap(),
            ReputationStatus::Throttled
        );

        // seen=1000, included=95 -> ok
        store.set(addr, 1000, 95);
        assert_eq!(store.status(MW, addr, 0).unwrap(), ReputationStatus::Ok);
    }

    #[test]
    fn test_unknown_address_is_ok() {
        let store = store();
        assert_eq!(
            store.status(MW, addr(9), 100).unwrap(),
            ReputationStatus::Ok
        );
    }

    #[test]
    fn test_counters_accumulate() {
        let store = store();
        let addr = addr(1);
        for _ in 0..3 {
            store.inc_ops_seen(MW, &[addr], 0).unwrap();
        }
        store
            .inc_ops_included(MW, &HashMap::from([(addr, 2)]), 0)
            .unwrap();
        let record = store.get(addr);
        assert_eq!(record.ops_seen, 3);
        assert_eq!(record.ops_included, 2);
    }

    #[test]
    fn test_decay_step_values() {
        // one interval elapsed: x -> floor(x * 23 / 24)
        for (input, expected) in [(24u64, 23u64), (100, 95), (1, 0)] {
            let record = RepRecord {
                ops_seen: input,
                ops_included: input,
                last_updated_block: 0,
            };
            let decayed = record.decayed(DEFAULT_DECAY_BLOCK_INTERVAL, DEFAULT_DECAY_BLOCK_INTERVAL);
            assert_eq!(decayed.ops_seen, expected, "seen {input}");
            assert_eq!(decayed.ops_included, expected, "included {input}");
            assert_eq!(decayed.last_updated_block, DEFAULT_DECAY_BLOCK_INTERVAL);
        }
    }

    #[test]
    fn test_decay_applies_per_interval() {
        let record = RepRecord {
            ops_seen: 100,
            ops_included: 0,
            last_updated_block: 0,
        };
        // two intervals: 100 -> 95 -> 91
        let decayed = record.decayed(2 * DEFAULT_DECAY_BLOCK_INTERVAL, DEFAULT_DECAY_BLOCK_INTERVAL);
        assert_eq!(decayed.ops_seen, 91);

        // a partial interval does not decay
        let fresh = record.decayed(DEFAULT_DECAY_BLOCK_INTERVAL - 1, DEFAULT_DECAY_BLOCK_INTERVAL);
        assert_eq!(fresh.ops_seen, 100);
    }

    #[test]
    fn test_decay_applies_on_status_read() {
        let store = store();
        let addr = addr(1);
        // banned as of block 0, enough decay turns the status around
        store.set(addr, 1000, 0);
        assert_eq!(store.status(MW, addr, 0).unwrap(), ReputationStatus::Banned);
        let much_later = 100 * DEFAULT_DECAY_BLOCK_INTERVAL;
        assert_eq!(
            store.status(MW, addr, much_later).unwrap(),
            ReputationStatus::Ok
        );
    }

    #[test]
    fn test_override_replaces_counters() {
        let store = store();
        let addr = addr(1);
        store.inc_ops_seen(MW, &[addr], 0).unwrap();
        store
            .override_reputation(
                MW,
                &[ReputationOverride {
                    address: addr,
                    ops_seen: 1000,
                    ops_included: 0,
                }],
                0,
            )
            .unwrap();
        assert_eq!(store.status(MW, addr, 0).unwrap(), ReputationStatus::Banned);
    }

    #[test]
    fn test_dump_reputation_is_stubbed() {
        let store = store();
        store.inc_ops_seen(MW, &[addr(1)], 0).unwrap();
        assert!(store.dump_reputation(MW).unwrap().is_empty());
    }

    impl ReputationStore {
        fn set(&self, address: Address, seen: u64, included: u64) {
            self.override_reputation(
                MW,
                &[ReputationOverride {
                    address,
                    ops_seen: seen,
                    ops_included: included,
                }],
                0,
            )
            .unwrap();
        }

        fn get(&self, address: Address) -> RepRecord {
            self.db
                .view(|view| {
                    Ok(view
                        .get(&rep_key(MW, address))
                        .map(|raw| decode(&raw).unwrap())
                        .unwrap_or_default())
                })
                .unwrap()
        }
    }

    fn store() -> ReputationStore {
        ReputationStore::new(
            Arc::new(Db::open().unwrap()),
            Arc::new(ReputationConstants::default()),
        )
    }

    fn addr(b: u8) -> Address {
        ethers::types::H160([b; 20])
    }
}
