//! LMDB storage backend for the Veil wallet.
//!
//! One LMDB environment holds one database per object store plus one per
//! secondary index, all created up front from the schema. Index entries
//! use the composite key `u32_be(len(index_key)) ++ index_key ++ pk`,
//! so equal index keys are an exact prefix range and variable-length
//! index keys cannot collide.

pub mod error;

use std::collections::HashMap;
use std::ops::Bound;
use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::debug;

use veil_store::{Backend, ReadOps, StoreError, StoreSchema, WriteOps};

pub use error::LmdbError;

const DEFAULT_MAP_SIZE: usize = 1 << 30;

fn index_db_name(store: &str, index: &str) -> String {
    format!("{store}/{index}")
}

fn composite_index_key(index_key: &[u8], primary_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + index_key.len() + primary_key.len());
    key.extend_from_slice(&(index_key.len() as u32).to_be_bytes());
    key.extend_from_slice(index_key);
    key.extend_from_slice(primary_key);
    key
}

fn index_prefix(index_key: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + index_key.len());
    prefix.extend_from_slice(&(index_key.len() as u32).to_be_bytes());
    prefix.extend_from_slice(index_key);
    prefix
}

/// Turn a prefix into the smallest byte string greater than every key
/// carrying that prefix, for use as an exclusive upper bound.
fn increment_prefix(prefix: &mut Vec<u8>) {
    while let Some(last) = prefix.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return;
        }
        prefix.pop();
    }
    // All 0xFF: the range is unbounded above; an empty upper bound never
    // occurs in practice because index keys are non-empty.
    prefix.push(0xFF);
    prefix.push(0xFF);
}

pub struct LmdbBackend {
    env: Env,
    stores: HashMap<String, Database<Bytes, Bytes>>,
    indexes: HashMap<String, Database<Bytes, Bytes>>,
}

impl LmdbBackend {
    /// Open or create the environment at `path` and every database the
    /// schema declares.
    pub fn open(path: &Path, schema: &StoreSchema) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path).map_err(|e| LmdbError::Heed(e.to_string()))?;
        let db_count: usize = schema.stores.iter().map(|s| 1 + s.indexes.len()).sum();
        let env = unsafe {
            EnvOpenOptions::new()
                .max_dbs(db_count as u32)
                .map_size(DEFAULT_MAP_SIZE)
                .open(path)?
        };

        let mut stores = HashMap::new();
        let mut indexes = HashMap::new();
        let mut wtxn = env.write_txn()?;
        for def in &schema.stores {
            let db = env.create_database(&mut wtxn, Some(def.name))?;
            stores.insert(def.name.to_string(), db);
            for idx in &def.indexes {
                let name = index_db_name(def.name, idx);
                let db = env.create_database(&mut wtxn, Some(name.as_str()))?;
                indexes.insert(name, db);
            }
        }
        wtxn.commit()?;
        debug!(path = %path.display(), databases = db_count, "opened wallet database");

        Ok(Self {
            env,
            stores,
            indexes,
        })
    }

    fn store_db(&self, store: &str) -> Result<Database<Bytes, Bytes>, StoreError> {
        self.stores
            .get(store)
            .copied()
            .ok_or_else(|| StoreError::UnknownStore(store.into()))
    }

    fn index_db(&self, store: &str, index: &str) -> Result<Database<Bytes, Bytes>, StoreError> {
        self.indexes
            .get(&index_db_name(store, index))
            .copied()
            .ok_or_else(|| StoreError::UnknownIndex(index_db_name(store, index)))
    }
}

impl Backend for LmdbBackend {
    fn begin_read(&self) -> Result<Box<dyn ReadOps + '_>, StoreError> {
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        Ok(Box::new(LmdbReadOps {
            backend: self,
            rtxn,
        }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteOps + '_>, StoreError> {
        let wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        Ok(Box::new(LmdbWriteOps {
            backend: self,
            wtxn,
        }))
    }
}

fn read_index(
    rtxn: &heed::RoTxn<'_>,
    db: Database<Bytes, Bytes>,
    index_key: &[u8],
) -> Result<Vec<Vec<u8>>, StoreError> {
    let lower = index_prefix(index_key);
    let mut upper = lower.clone();
    increment_prefix(&mut upper);
    let bounds = (
        Bound::Included(lower.as_slice()),
        Bound::Excluded(upper.as_slice()),
    );
    let mut pks = Vec::new();
    for entry in db.range(rtxn, &bounds).map_err(LmdbError::from)? {
        let (_key, pk) = entry.map_err(LmdbError::from)?;
        pks.push(pk.to_vec());
    }
    Ok(pks)
}

fn read_scan(
    rtxn: &heed::RoTxn<'_>,
    db: Database<Bytes, Bytes>,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
    let mut out = Vec::new();
    for entry in db.iter(rtxn).map_err(LmdbError::from)? {
        let (k, v) = entry.map_err(LmdbError::from)?;
        out.push((k.to_vec(), v.to_vec()));
    }
    Ok(out)
}

struct LmdbReadOps<'a> {
    backend: &'a LmdbBackend,
    rtxn: heed::RoTxn<'a>,
}

impl ReadOps for LmdbReadOps<'_> {
    fn get(&self, store: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let db = self.backend.store_db(store)?;
        Ok(db
            .get(&self.rtxn, key)
            .map_err(LmdbError::from)?
            .map(|v| v.to_vec()))
    }

    fn scan(&self, store: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        read_scan(&self.rtxn, self.backend.store_db(store)?)
    }

    fn index_get(
        &self,
        store: &str,
        index: &str,
        index_key: &[u8],
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        read_index(&self.rtxn, self.backend.index_db(store, index)?, index_key)
    }
}

struct LmdbWriteOps<'a> {
    backend: &'a LmdbBackend,
    wtxn: heed::RwTxn<'a>,
}

impl ReadOps for LmdbWriteOps<'_> {
    fn get(&self, store: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let db = self.backend.store_db(store)?;
        Ok(db
            .get(&self.wtxn, key)
            .map_err(LmdbError::from)?
            .map(|v| v.to_vec()))
    }

    fn scan(&self, store: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        read_scan(&self.wtxn, self.backend.store_db(store)?)
    }

    fn index_get(
        &self,
        store: &str,
        index: &str,
        index_key: &[u8],
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        read_index(&self.wtxn, self.backend.index_db(store, index)?, index_key)
    }
}

impl WriteOps for LmdbWriteOps<'_> {
    fn put(&mut self, store: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let db = self.backend.store_db(store)?;
        db.put(&mut self.wtxn, key, value)
            .map_err(LmdbError::from)?;
        Ok(())
    }

    fn delete(&mut self, store: &str, key: &[u8]) -> Result<bool, StoreError> {
        let db = self.backend.store_db(store)?;
        Ok(db.delete(&mut self.wtxn, key).map_err(LmdbError::from)?)
    }

    fn index_put(
        &mut self,
        store: &str,
        index: &str,
        index_key: &[u8],
        primary_key: &[u8],
    ) -> Result<(), StoreError> {
        let db = self.backend.index_db(store, index)?;
        let key = composite_index_key(index_key, primary_key);
        db.put(&mut self.wtxn, &key, primary_key)
            .map_err(LmdbError::from)?;
        Ok(())
    }

    fn index_delete(
        &mut self,
        store: &str,
        index: &str,
        index_key: &[u8],
        primary_key: &[u8],
    ) -> Result<(), StoreError> {
        let db = self.backend.index_db(store, index)?;
        let key = composite_index_key(index_key, primary_key);
        db.delete(&mut self.wtxn, &key).map_err(LmdbError::from)?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.wtxn.commit().map_err(LmdbError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use veil_store::{Db, Entity, IndexDef, StoreDef, TxAction};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        topic: String,
    }

    impl Entity for Note {
        const STORE_NAME: &'static str = "notes";

        fn primary_key(&self) -> Vec<u8> {
            self.id.as_bytes().to_vec()
        }

        fn indexes() -> &'static [IndexDef<Self>] {
            &[IndexDef {
                name: "by_topic",
                key: |n| Some(n.topic.as_bytes().to_vec()),
            }]
        }
    }

    fn test_schema() -> StoreSchema {
        StoreSchema {
            stores: vec![StoreDef {
                name: "notes",
                indexes: vec!["by_topic"],
            }],
        }
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let schema = test_schema();
        {
            let db = Db::new(Box::new(LmdbBackend::open(dir.path(), &schema).unwrap()));
            db.with_write(|tx| {
                tx.put(&Note {
                    id: "n1".into(),
                    topic: "fees".into(),
                })?;
                Ok(TxAction::Commit(()))
            })
            .unwrap();
        }
        let db = Db::new(Box::new(LmdbBackend::open(dir.path(), &schema).unwrap()));
        let got: Note = db.read().unwrap().get(b"n1").unwrap().unwrap();
        assert_eq!(got.topic, "fees");
    }

    #[test]
    fn abort_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::new(Box::new(
            LmdbBackend::open(dir.path(), &test_schema()).unwrap(),
        ));
        db.with_write(|tx| {
            tx.put(&Note {
                id: "n1".into(),
                topic: "x".into(),
            })?;
            Ok(TxAction::Abort(()))
        })
        .unwrap();
        let got: Option<Note> = db.read().unwrap().get(b"n1").unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn variable_length_index_keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::new(Box::new(
            LmdbBackend::open(dir.path(), &test_schema()).unwrap(),
        ));
        // "ab" followed by pk starting with 'c' must not match topic "abc".
        db.with_write(|tx| {
            tx.put(&Note {
                id: "c1".into(),
                topic: "ab".into(),
            })?;
            tx.put(&Note {
                id: "z1".into(),
                topic: "abc".into(),
            })?;
            Ok(TxAction::Commit(()))
        })
        .unwrap();
        let ab: Vec<Note> = db.read().unwrap().get_by_index("by_topic", b"ab").unwrap();
        assert_eq!(ab.len(), 1);
        assert_eq!(ab[0].id, "c1");
    }

    #[test]
    fn index_follows_updates() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::new(Box::new(
            LmdbBackend::open(dir.path(), &test_schema()).unwrap(),
        ));
        db.with_write(|tx| {
            tx.put(&Note {
                id: "n1".into(),
                topic: "old".into(),
            })?;
            Ok(TxAction::Commit(()))
        })
        .unwrap();
        db.with_write(|tx| {
            tx.put(&Note {
                id: "n1".into(),
                topic: "new".into(),
            })?;
            Ok(TxAction::Commit(()))
        })
        .unwrap();
        let old: Vec<Note> = db.read().unwrap().get_by_index("by_topic", b"old").unwrap();
        let new: Vec<Note> = db.read().unwrap().get_by_index("by_topic", b"new").unwrap();
        assert!(old.is_empty());
        assert_eq!(new.len(), 1);
    }

    #[test]
    fn prefix_increment_handles_trailing_ff() {
        let mut p = vec![0x61, 0xFF];
        increment_prefix(&mut p);
        assert_eq!(p, vec![0x62]);
    }
}
