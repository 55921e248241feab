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

//! Persistent ordered mempool of pending aiOps.
//!
//! Insertion order is encoded in the primary key (a per-middleware sequence
//! number) so range scans reproduce FIFO arrival order across restarts.
//! Factory and paymaster indexes hold primary keys only; the record itself
//! is stored once.

use std::sync::Arc;

use aiops_types::AiOperation;
use aiops_utils::math;
use anyhow::{anyhow, Context};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::{db::Txn, Db, MempoolError};

// Key space: one prefix byte per table.
const OPS: u8 = b'o'; // OPS ++ middleware ++ seq_be       -> OpRecord json
const LOOKUP: u8 = b'l'; // LOOKUP ++ middleware ++ sender ++ nonce_be -> seq_be
const FACTORY_IDX: u8 = b'f'; // ... ++ factory ++ sender ++ nonce_be -> seq_be
const PAYMASTER_IDX: u8 = b'p'; // ... ++ paymaster ++ sender ++ nonce_be -> seq_be
const SEQ: u8 = b's'; // SEQ ++ middleware -> next seq_be

// Replacing a pooled (sender, nonce) requires both fee fields to grow by
// this percentage.
const REPLACEMENT_FEE_INCREASE_PERCENT: u32 = 10;

/// A pooled operation together with its validation artifacts.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpRecord {
    /// The operation
    pub op: AiOperation,
    /// Arrival time, unix milliseconds; drives the TTL expiry
    pub added_at_ms: u64,
    /// Aggregate code hash over `touched` at validation time
    #[serde(default)]
    pub code_hash: Option<H256>,
    /// Contracts touched during validation
    #[serde(default)]
    pub touched: Vec<Address>,
    /// Alt mempools this op is restricted to, if any
    #[serde(default)]
    pub alt_mempool_ids: Vec<String>,
}

/// The mempool. All operations are single atomic transactions against the
/// backing store; concurrent dumps observe consistent snapshots.
#[derive(Clone, Debug)]
pub struct Mempool {
    db: Arc<Db>,
}

impl Mempool {
    /// Create a mempool over the given store.
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Insert an op, or replace the pooled op with the same (sender, nonce).
    /// Replacement is refused unless both maxPriorityFeePerGas and
    /// maxFeePerGas are at least 110% of the incumbent's.
    pub fn add_op(&self, middleware: Address, record: OpRecord) -> Result<(), MempoolError> {
        self.db
            .update(|txn| {
                let lookup_key = lookup_key(middleware, record.op.sender, record.op.nonce);
                if let Some(seq_bytes) = txn.get(&lookup_key) {
                    let seq = decode_seq(&seq_bytes)?;
                    let incumbent = read_record(txn, middleware, seq)?;
                    let min_priority_fee = math::increase_by_percent(
                        incumbent.op.max_priority_fee_per_gas,
                        REPLACEMENT_FEE_INCREASE_PERCENT,
                    );
                    let min_fee = math::increase_by_percent(
                        incumbent.op.max_fee_per_gas,
                        REPLACEMENT_FEE_INCREASE_PERCENT,
                    );
                    if record.op.max_priority_fee_per_gas < min_priority_fee
                        || record.op.max_fee_per_gas < min_fee
                    {
                        return Ok(Err(MempoolError::DuplicateUnderpriced(
                            min_priority_fee,
                            min_fee,
                        )));
                    }
                    delete_record(txn, middleware, seq, &incumbent.op);
                }

                let seq = next_seq(txn, middleware)?;
                write_record(txn, middleware, seq, &record)?;
                Ok(Ok(()))
            })
            .map_err(MempoolError::Database)?
    }

    /// Remove the pooled entries matching the given ops, primary and index
    /// rows in one transaction. Ops that are not pooled are skipped.
    pub fn remove_ops(&self, middleware: Address, ops: &[AiOperation]) -> Result<(), MempoolError> {
        self.db
            .update(|txn| {
                for op in ops {
                    let lookup_key = lookup_key(middleware, op.sender, op.nonce);
                    let Some(seq_bytes) = txn.get(&lookup_key) else {
                        continue;
                    };
                    let seq = decode_seq(&seq_bytes)?;
                    let record = read_record(txn, middleware, seq)?;
                    delete_record(txn, middleware, seq, &record.op);
                }
                Ok(())
            })
            .map_err(MempoolError::Database)
    }

    /// Drop every entry of every middleware.
    pub fn clear(&self) -> Result<(), MempoolError> {
        self.db
            .update(|txn| {
                for prefix in [OPS, LOOKUP, FACTORY_IDX, PAYMASTER_IDX, SEQ] {
                    txn.delete_prefix(&[prefix]);
                }
                Ok(())
            })
            .map_err(MempoolError::Database)
    }

    /// All pending records for a middleware in FIFO arrival order.
    pub fn dump(&self, middleware: Address) -> Result<Vec<OpRecord>, MempoolError> {
        self.db
            .view(|view| {
                view.scan_prefix(&table_prefix(OPS, middleware))
                    .into_iter()
                    .map(|(_, v)| decode_record(&v))
                    .collect()
            })
            .map_err(MempoolError::Database)
    }

    /// Pending records of a sender, newest nonce first.
    pub fn get_by_sender(
        &self,
        middleware: Address,
        sender: Address,
    ) -> Result<Vec<OpRecord>, MempoolError> {
        self.get_indexed(LOOKUP, middleware, sender)
    }

    /// Pending records deployed through a factory, newest nonce first.
    pub fn get_by_factory(
        &self,
        middleware: Address,
        factory: Address,
    ) -> Result<Vec<OpRecord>, MempoolError> {
        self.get_indexed(FACTORY_IDX, middleware, factory)
    }

    /// Pending records sponsored by a paymaster, newest nonce first.
    pub fn get_by_paymaster(
        &self,
        middleware: Address,
        paymaster: Address,
    ) -> Result<Vec<OpRecord>, MempoolError> {
        self.get_indexed(PAYMASTER_IDX, middleware, paymaster)
    }

    fn get_indexed(
        &self,
        table: u8,
        middleware: Address,
        address: Address,
    ) -> Result<Vec<OpRecord>, MempoolError> {
        self.db
            .view(|view| {
                let mut prefix = table_prefix(table, middleware);
                prefix.extend(address.as_bytes());
                let mut records: Vec<OpRecord> = view
                    .scan_prefix(&prefix)
                    .into_iter()
                    .map(|(_, seq_bytes)| {
                        let seq = decode_seq(&seq_bytes)?;
                        let raw = view
                            .get(&op_key(middleware, seq))
                            .with_context(|| format!("dangling index entry for seq {seq}"))?;
                        decode_record(&raw)
                    })
                    .collect::<anyhow::Result<_>>()?;
                records.sort_by(|a, b| b.op.nonce.cmp(&a.op.nonce));
                Ok(records)
            })
            .map_err(MempoolError::Database)
    }
}

fn table_prefix(table: u8, middleware: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(table);
    key.extend(middleware.as_bytes());
    key
}

fn op_key(middleware: Address, seq: u64) -> Vec<u8> {
    let mut key = table_prefix(OPS, middleware);
    key.extend(seq.to_be_bytes());
    key
}

fn lookup_key(middleware: Address, sender: Address, nonce: U256) -> Vec<u8> {
    let mut key = table_prefix(LOOKUP, middleware);
    key.extend(sender.as_bytes());
    key.extend(nonce_bytes(nonce));
    key
}

fn index_key(
    table: u8,
    middleware: Address,
    entity: Address,
    sender: Address,
    nonce: U256,
) -> Vec<u8> {
    let mut key = table_prefix(table, middleware);
    key.extend(entity.as_bytes());
    key.extend(sender.as_bytes());
    key.extend(nonce_bytes(nonce));
    key
}

fn nonce_bytes(nonce: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    nonce.to_big_endian(&mut out);
    out
}

fn next_seq(txn: &mut Txn<'_>, middleware: Address) -> anyhow::Result<u64> {
    let key = table_prefix(SEQ, middleware);
    let seq = match txn.get(&key) {
        Some(bytes) => decode_seq(&bytes)?,
        None => 0,
    };
    txn.set(key, (seq + 1).to_be_bytes().to_vec());
    Ok(seq)
}

fn decode_seq(bytes: &[u8]) -> anyhow::Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow!("malformed sequence value"))?;
    Ok(u64::from_be_bytes(arr))
}

fn read_record(txn: &Txn<'_>, middleware: Address, seq: u64) -> anyhow::Result<OpRecord> {
    let raw = txn
        .get(&op_key(middleware, seq))
        .with_context(|| format!("missing op record for seq {seq}"))?;
    decode_record(&raw)
}

fn decode_record(raw: &[u8]) -> anyhow::Result<OpRecord> {
    serde_json::from_slice(raw).context("should decode op record")
}

fn write_record(
    txn: &mut Txn<'_>,
    middleware: Address,
    seq: u64,
    record: &OpRecord,
) -> anyhow::Result<()> {
    let raw = serde_json::to_vec(record).context("should encode op record")?;
    let seq_bytes = seq.to_be_bytes().to_vec();
    txn.set(op_key(middleware, seq), raw);
    txn.set(
        lookup_key(middleware, record.op.sender, record.op.nonce),
        seq_bytes.clone(),
    );
    if let Some(factory) = record.op.factory() {
        txn.set(
            index_key(FACTORY_IDX, middleware, factory, record.op.sender, record.op.nonce),
            seq_bytes.clone(),
        );
    }
    if let Some(paymaster) = record.op.paymaster() {
        txn.set(
            index_key(
                PAYMASTER_IDX,
                middleware,
                paymaster,
                record.op.sender,
                record.op.nonce,
            ),
            seq_bytes,
        );
    }
    Ok(())
}

fn delete_record(txn: &mut Txn<'_>, middleware: Address, seq: u64, op: &AiOperation) {
    txn.delete(op_key(middleware, seq));
    txn.delete(lookup_key(middleware, op.sender, op.nonce));
    if let Some(factory) = op.factory() {
        txn.delete(index_key(FACTORY_IDX, middleware, factory, op.sender, op.nonce));
    }
    if let Some(paymaster) = op.paymaster() {
        txn.delete(index_key(
            PAYMASTER_IDX,
            middleware,
            paymaster,
            op.sender,
            op.nonce,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MW: Address = ethers::types::H160([0xee; 20]);

    #[test]
    fn test_add_and_dump_fifo() {
        let pool = pool();
        let ops: Vec<AiOperation> = (0..5).map(|i| op(addr(i as u8 + 1), 0, 100)).collect();
        for op in &ops {
            pool.add_op(MW, record(op.clone())).unwrap();
        }
        let dumped = pool.dump(MW).unwrap();
        assert_eq!(
            dumped.iter().map(|r| r.op.sender).collect::<Vec<_>>(),
            ops.iter().map(|o| o.sender).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_one_entry_per_sender_nonce() {
        let pool = pool();
        let sender = addr(1);
        pool.add_op(MW, record(op(sender, 7, 100))).unwrap();
        // same key, both fees bumped 10% -> replaces, pool still holds one
        pool.add_op(MW, record(op(sender, 7, 110))).unwrap();
        let dumped = pool.dump(MW).unwrap();
        assert_eq!(dumped.len(), 1);
        assert_eq!(dumped[0].op.max_fee_per_gas, U256::from(110));
    }

    #[test]
    fn test_replacement_underpriced() {
        let pool = pool();
        let sender = addr(1);
        pool.add_op(MW, record(op(sender, 7, 100))).unwrap();

        // equal fees are not enough
        match pool.add_op(MW, record(op(sender, 7, 100))) {
            Err(MempoolError::DuplicateUnderpriced(min_priority, min_fee)) => {
                assert_eq!(min_priority, U256::from(110));
                assert_eq!(min_fee, U256::from(110));
            }
            other => panic!("expected underpriced error, got {other:?}"),
        }

        // one fee raised, the other not: still refused
        let mut half_raised = op(sender, 7, 110);
        half_raised.max_priority_fee_per_gas = 100.into();
        assert!(matches!(
            pool.add_op(MW, record(half_raised)),
            Err(MempoolError::DuplicateUnderpriced(_, _))
        ));

        // pool is unchanged
        assert_eq!(pool.dump(MW).unwrap().len(), 1);
        assert_eq!(
            pool.dump(MW).unwrap()[0].op.max_fee_per_gas,
            U256::from(100)
        );
    }

    #[test]
    fn test_replacement_moves_to_tail() {
        let pool = pool();
        let (a, b) = (addr(1), addr(2));
        pool.add_op(MW, record(op(a, 0, 100))).unwrap();
        pool.add_op(MW, record(op(b, 0, 100))).unwrap();
        pool.add_op(MW, record(op(a, 0, 110))).unwrap();
        let order: Vec<Address> = pool.dump(MW).unwrap().iter().map(|r| r.op.sender).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn test_remove_ops() {
        let pool = pool();
        let ops: Vec<AiOperation> = (0..3).map(|i| op(addr(i as u8 + 1), 0, 100)).collect();
        for op in &ops {
            pool.add_op(MW, record(op.clone())).unwrap();
        }
        pool.remove_ops(MW, &ops[..2]).unwrap();
        let dumped = pool.dump(MW).unwrap();
        assert_eq!(dumped.len(), 1);
        assert_eq!(dumped[0].op.sender, ops[2].sender);
        // removing something already gone is fine
        pool.remove_ops(MW, &ops[..1]).unwrap();
    }

    #[test]
    fn test_clear() {
        let pool = pool();
        pool.add_op(MW, record(op(addr(1), 0, 100))).unwrap();
        pool.clear().unwrap();
        assert!(pool.dump(MW).unwrap().is_empty());
    }

    #[test]
    fn test_get_by_sender_reverse_nonce() {
        let pool = pool();
        let sender = addr(1);
        for nonce in [0u64, 1, 2] {
            pool.add_op(MW, record(op(sender, nonce, 100))).unwrap();
        }
        let nonces: Vec<U256> = pool
            .get_by_sender(MW, sender)
            .unwrap()
            .iter()
            .map(|r| r.op.nonce)
            .collect();
        assert_eq!(nonces, vec![2.into(), 1.into(), 0.into()]);
        assert!(pool.get_by_sender(MW, addr(9)).unwrap().is_empty());
    }

    #[test]
    fn test_get_by_factory_and_paymaster() {
        let pool = pool();
        let factory = addr(0xfa);
        let paymaster = addr(0xcc);
        for nonce in [0u64, 1] {
            let mut o = op(addr(1), nonce, 100);
            o.init_code = factory.as_bytes().to_vec().into();
            o.paymaster_and_data = paymaster.as_bytes().to_vec().into();
            pool.add_op(MW, record(o)).unwrap();
        }

        let by_factory = pool.get_by_factory(MW, factory).unwrap();
        assert_eq!(by_factory.len(), 2);
        assert_eq!(by_factory[0].op.nonce, U256::from(1));

        let by_paymaster = pool.get_by_paymaster(MW, paymaster).unwrap();
        assert_eq!(by_paymaster.len(), 2);

        // indexes follow removals
        pool.remove_ops(MW, &[by_factory[0].op.clone()]).unwrap();
        assert_eq!(pool.get_by_factory(MW, factory).unwrap().len(), 1);
        assert_eq!(pool.get_by_paymaster(MW, paymaster).unwrap().len(), 1);
    }

    #[test]
    fn test_middlewares_are_disjoint() {
        let pool = pool();
        let other: Address = ethers::types::H160([0xdd; 20]);
        pool.add_op(MW, record(op(addr(1), 0, 100))).unwrap();
        assert!(pool.dump(other).unwrap().is_empty());
    }

    fn pool() -> Mempool {
        Mempool::new(Arc::new(Db::open().unwrap()))
    }

    fn addr(b: u8) -> Address {
        ethers::types::H160([b; 20])
    }

    fn op(sender: Address, nonce: u64, fee: u64) -> AiOperation {
        AiOperation {
            sender,
            nonce: nonce.into(),
            max_fee_per_gas: fee.into(),
            max_priority_fee_per_gas: fee.into(),
            ..Default::default()
        }
    }

    fn record(op: AiOperation) -> OpRecord {
        OpRecord {
            op,
            added_at_ms: 0,
            code_hash: None,
            touched: Vec::new(),
            alt_mempool_ids: Vec::new(),
        }
    }
}
