//! In-memory backend for tests and ephemeral wallets.
//!
//! Writes accumulate in an overlay (with tombstones) that is applied to
//! the base tables only on commit, so an aborted transaction leaves no
//! trace. A writer mutex serializes write transactions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::{Backend, ReadOps, StoreError, StoreSchema, WriteOps};

type StoreTable = BTreeMap<Vec<u8>, Vec<u8>>;
/// Index entries keyed `(index_key, primary_key)` so equal index keys
/// group together under range scans.
type IndexTable = BTreeMap<(Vec<u8>, Vec<u8>), ()>;

struct Tables {
    stores: HashMap<String, StoreTable>,
    indexes: HashMap<String, IndexTable>,
}

fn index_table_name(store: &str, index: &str) -> String {
    format!("{store}/{index}")
}

pub struct MemoryBackend {
    tables: RwLock<Tables>,
    writer: Mutex<()>,
}

impl MemoryBackend {
    pub fn new(schema: &StoreSchema) -> Self {
        let mut stores = HashMap::new();
        let mut indexes = HashMap::new();
        for def in &schema.stores {
            stores.insert(def.name.to_string(), StoreTable::new());
            for idx in &def.indexes {
                indexes.insert(index_table_name(def.name, idx), IndexTable::new());
            }
        }
        Self {
            tables: RwLock::new(Tables { stores, indexes }),
            writer: Mutex::new(()),
        }
    }
}

impl Backend for MemoryBackend {
    fn begin_read(&self) -> Result<Box<dyn ReadOps + '_>, StoreError> {
        let guard = self
            .tables
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".into()))?;
        Ok(Box::new(MemoryReadOps { tables: guard }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteOps + '_>, StoreError> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| StoreError::Backend("poisoned writer lock".into()))?;
        Ok(Box::new(MemoryWriteOps {
            backend: self,
            _writer: writer,
            store_overlay: HashMap::new(),
            index_overlay: HashMap::new(),
        }))
    }
}

struct MemoryReadOps<'a> {
    tables: std::sync::RwLockReadGuard<'a, Tables>,
}

fn store_get(tables: &Tables, store: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
    tables
        .stores
        .get(store)
        .ok_or_else(|| StoreError::UnknownStore(store.into()))
        .map(|t| t.get(key).cloned())
}

fn index_scan(
    tables: &Tables,
    store: &str,
    index: &str,
    index_key: &[u8],
) -> Result<Vec<Vec<u8>>, StoreError> {
    let table = tables
        .indexes
        .get(&index_table_name(store, index))
        .ok_or_else(|| StoreError::UnknownIndex(format!("{store}/{index}")))?;
    Ok(table
        .range((index_key.to_vec(), Vec::new())..)
        .take_while(|((k, _), _)| k == index_key)
        .map(|((_, pk), _)| pk.clone())
        .collect())
}

impl ReadOps for MemoryReadOps<'_> {
    fn get(&self, store: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        store_get(&self.tables, store, key)
    }

    fn scan(&self, store: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.tables
            .stores
            .get(store)
            .ok_or_else(|| StoreError::UnknownStore(store.into()))
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn index_get(
        &self,
        store: &str,
        index: &str,
        index_key: &[u8],
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        index_scan(&self.tables, store, index, index_key)
    }
}

struct MemoryWriteOps<'a> {
    backend: &'a MemoryBackend,
    _writer: MutexGuard<'a, ()>,
    /// `None` value marks a tombstone.
    store_overlay: HashMap<String, BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    /// `true` adds the entry, `false` removes it.
    index_overlay: HashMap<String, BTreeMap<(Vec<u8>, Vec<u8>), bool>>,
}

impl MemoryWriteOps<'_> {
    fn with_base<R>(
        &self,
        f: impl FnOnce(&Tables) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let tables = self
            .backend
            .tables
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".into()))?;
        f(&tables)
    }
}

impl ReadOps for MemoryWriteOps<'_> {
    fn get(&self, store: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(overlay) = self.store_overlay.get(store) {
            if let Some(entry) = overlay.get(key) {
                return Ok(entry.clone());
            }
        }
        self.with_base(|t| store_get(t, store, key))
    }

    fn scan(&self, store: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = self.with_base(|t| {
            t.stores
                .get(store)
                .ok_or_else(|| StoreError::UnknownStore(store.into()))
                .map(|table| {
                    table
                        .iter()
                        .map(|(k, v)| (k.clone(), Some(v.clone())))
                        .collect()
                })
        })?;
        if let Some(overlay) = self.store_overlay.get(store) {
            for (k, v) in overlay {
                merged.insert(k.clone(), v.clone());
            }
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect())
    }

    fn index_get(
        &self,
        store: &str,
        index: &str,
        index_key: &[u8],
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut pks: BTreeMap<Vec<u8>, bool> = self
            .with_base(|t| index_scan(t, store, index, index_key))?
            .into_iter()
            .map(|pk| (pk, true))
            .collect();
        if let Some(overlay) = self.index_overlay.get(&index_table_name(store, index)) {
            for ((k, pk), present) in overlay {
                if k == index_key {
                    pks.insert(pk.clone(), *present);
                }
            }
        }
        Ok(pks
            .into_iter()
            .filter_map(|(pk, present)| present.then_some(pk))
            .collect())
    }
}

impl WriteOps for MemoryWriteOps<'_> {
    fn put(&mut self, store: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.with_base(|t| {
            t.stores
                .get(store)
                .map(|_| ())
                .ok_or_else(|| StoreError::UnknownStore(store.into()))
        })?;
        self.store_overlay
            .entry(store.to_string())
            .or_default()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, store: &str, key: &[u8]) -> Result<bool, StoreError> {
        let existed = self.get(store, key)?.is_some();
        self.store_overlay
            .entry(store.to_string())
            .or_default()
            .insert(key.to_vec(), None);
        Ok(existed)
    }

    fn index_put(
        &mut self,
        store: &str,
        index: &str,
        index_key: &[u8],
        primary_key: &[u8],
    ) -> Result<(), StoreError> {
        self.index_overlay
            .entry(index_table_name(store, index))
            .or_default()
            .insert((index_key.to_vec(), primary_key.to_vec()), true);
        Ok(())
    }

    fn index_delete(
        &mut self,
        store: &str,
        index: &str,
        index_key: &[u8],
        primary_key: &[u8],
    ) -> Result<(), StoreError> {
        self.index_overlay
            .entry(index_table_name(store, index))
            .or_default()
            .insert((index_key.to_vec(), primary_key.to_vec()), false);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tables = self
            .backend
            .tables
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".into()))?;
        for (store, overlay) in &self.store_overlay {
            let table = tables
                .stores
                .get_mut(store)
                .ok_or_else(|| StoreError::UnknownStore(store.clone()))?;
            for (k, v) in overlay {
                match v {
                    Some(v) => {
                        table.insert(k.clone(), v.clone());
                    }
                    None => {
                        table.remove(k);
                    }
                }
            }
        }
        for (name, overlay) in &self.index_overlay {
            let table = tables
                .indexes
                .get_mut(name)
                .ok_or_else(|| StoreError::UnknownIndex(name.clone()))?;
            for (entry, present) in overlay {
                if *present {
                    table.insert(entry.clone(), ());
                } else {
                    table.remove(entry);
                }
            }
        }
        Ok(())
    }
}
