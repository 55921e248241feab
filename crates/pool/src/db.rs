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

//! Ordered byte store with a small transaction API. All shared bundler
//! state (mempool entries, indexes, reputation counters) lives behind this
//! seam; readers always observe a consistent snapshot and an update either
//! commits fully or not at all.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{bail, Context};
use parking_lot::RwLock;

const SCHEMA_VERSION_KEY: &[u8] = b"schema/version";
const SCHEMA_VERSION: u8 = 1;
const VERSION_FILE: &str = "VERSION";

/// The store. In-memory, ordered, transactional.
#[derive(Debug, Default)]
pub struct Db {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Db {
    /// Open a store, tagging it with the current schema version. Opening
    /// state written by an incompatible schema is an error.
    pub fn open() -> anyhow::Result<Self> {
        let db = Self::default();
        db.update(|txn| {
            match txn.get(SCHEMA_VERSION_KEY) {
                None => txn.set(SCHEMA_VERSION_KEY.to_vec(), vec![SCHEMA_VERSION]),
                Some(v) if v == [SCHEMA_VERSION] => {}
                Some(v) => bail!("incompatible state schema version {v:?}, expected {SCHEMA_VERSION}"),
            }
            Ok(())
        })?;
        Ok(db)
    }

    /// Open a store anchored to a state directory. The directory carries a
    /// schema version tag; opening one written by an incompatible version
    /// fails so upgrades are detected instead of misread.
    pub fn open_at(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("should create state directory {}", dir.display()))?;
        let version_file = dir.join(VERSION_FILE);
        if version_file.exists() {
            let tagged = fs::read_to_string(&version_file)
                .context("should read state schema version tag")?;
            if tagged.trim() != SCHEMA_VERSION.to_string() {
                bail!(
                    "state directory {} has incompatible schema version {}, expected {SCHEMA_VERSION}",
                    dir.display(),
                    tagged.trim()
                );
            }
        } else {
            fs::write(&version_file, SCHEMA_VERSION.to_string())
                .context("should write state schema version tag")?;
        }
        Self::open()
    }

    /// Run a read-write transaction. Writes are staged and committed only
    /// when the closure returns `Ok`.
    pub fn update<T>(&self, f: impl FnOnce(&mut Txn<'_>) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let mut guard = self.inner.write();
        let mut txn = Txn {
            base: &*guard,
            stage: BTreeMap::new(),
        };
        let out = f(&mut txn)?;
        let stage = txn.stage;
        for (key, value) in stage {
            match value {
                Some(value) => {
                    guard.insert(key, value);
                }
                None => {
                    guard.remove(&key);
                }
            }
        }
        Ok(out)
    }

    /// Run a read-only transaction over a consistent snapshot.
    pub fn view<T>(&self, f: impl FnOnce(&View<'_>) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let guard = self.inner.read();
        f(&View { base: &*guard })
    }
}

/// A read-write transaction. Uncommitted writes shadow the base state.
pub struct Txn<'a> {
    base: &'a BTreeMap<Vec<u8>, Vec<u8>>,
    stage: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Txn<'_> {
    /// Value at `key`, observing staged writes.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.stage.get(key) {
            Some(staged) => staged.clone(),
            None => self.base.get(key).cloned(),
        }
    }

    /// Stage a write.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.stage.insert(key, Some(value));
    }

    /// Stage a deletion.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.stage.insert(key, None);
    }

    /// All live entries whose key starts with `prefix`, in key order,
    /// observing staged writes.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<&[u8], Option<&Vec<u8>>> = self
            .base
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_slice(), Some(v)))
            .collect();
        for (k, v) in self
            .stage
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            merged.insert(k.as_slice(), v.as_ref());
        }
        merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k.to_vec(), v.clone())))
            .collect()
    }

    /// Delete every entry whose key starts with `prefix`.
    pub fn delete_prefix(&mut self, prefix: &[u8]) {
        let keys: Vec<Vec<u8>> = self.scan_prefix(prefix).into_iter().map(|(k, _)| k).collect();
        for key in keys {
            self.delete(key);
        }
    }
}

/// A read-only transaction.
pub struct View<'a> {
    base: &'a BTreeMap<Vec<u8>, Vec<u8>>,
}

impl View<'_> {
    /// Value at `key`.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.base.get(key).cloned()
    }

    /// All entries whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.base
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_update_commits() {
        let db = Db::open().unwrap();
        db.update(|txn| {
            txn.set(b"a/1".to_vec(), vec![1]);
            txn.set(b"a/2".to_vec(), vec![2]);
            Ok(())
        })
        .unwrap();
        let got = db
            .view(|view| Ok(view.scan_prefix(b"a/")))
            .unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], (b"a/1".to_vec(), vec![1]));
    }

    #[test]
    fn test_failed_update_rolls_back() {
        let db = Db::open().unwrap();
        let res: anyhow::Result<()> = db.update(|txn| {
            txn.set(b"a/1".to_vec(), vec![1]);
            Err(anyhow!("boom"))
        });
        assert!(res.is_err());
        assert_eq!(db.view(|view| Ok(view.get(b"a/1"))).unwrap(), None);
    }

    #[test]
    fn test_scan_sees_staged_writes() {
        let db = Db::open().unwrap();
        db.update(|txn| {
            txn.set(b"k/1".to_vec(), vec![1]);
            Ok(())
        })
        .unwrap();
        db.update(|txn| {
            txn.set(b"k/2".to_vec(), vec![2]);
            txn.delete(b"k/1".to_vec());
            let scanned = txn.scan_prefix(b"k/");
            assert_eq!(scanned, vec![(b"k/2".to_vec(), vec![2])]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_prefix() {
        let db = Db::open().unwrap();
        db.update(|txn| {
            txn.set(b"x/1".to_vec(), vec![1]);
            txn.set(b"x/2".to_vec(), vec![2]);
            txn.set(b"y/1".to_vec(), vec![3]);
            Ok(())
        })
        .unwrap();
        db.update(|txn| {
            txn.delete_prefix(b"x/");
            Ok(())
        })
        .unwrap();
        assert!(db.view(|v| Ok(v.scan_prefix(b"x/").is_empty())).unwrap());
        assert_eq!(db.view(|v| Ok(v.get(b"y/1"))).unwrap(), Some(vec![3]));
    }
}
