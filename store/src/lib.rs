//! Abstract object storage for the Veil wallet.
//!
//! Records are serialized with bincode and stored under a primary key;
//! each record type may declare secondary indexes as plain data. Backends
//! (LMDB, in-memory for testing) implement the byte-level [`Backend`]
//! trait; the rest of the codebase goes through the typed [`Db`] layer,
//! which handles serialization and index maintenance.
//!
//! All writes happen inside an explicit transaction closure that either
//! commits or aborts as a whole.

pub mod entities;
pub mod error;
pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use entities::schema;
pub use error::StoreError;

/// A storable record type.
pub trait Entity: Serialize + DeserializeOwned + 'static {
    /// Name of the object store holding this type.
    const STORE_NAME: &'static str;

    /// Primary key bytes for this record.
    fn primary_key(&self) -> Vec<u8>;

    /// Secondary indexes over this store. Declared as data so backends
    /// can create them without knowing the record type.
    fn indexes() -> &'static [IndexDef<Self>]
    where
        Self: Sized,
    {
        &[]
    }
}

/// One secondary index: a name and a key extractor. A `None` key means
/// the record is absent from the index.
pub struct IndexDef<T> {
    pub name: &'static str,
    pub key: fn(&T) -> Option<Vec<u8>>,
}

/// Declarative description of every store and index, used by backends to
/// set up their namespaces.
#[derive(Clone, Debug)]
pub struct StoreSchema {
    pub stores: Vec<StoreDef>,
}

#[derive(Clone, Debug)]
pub struct StoreDef {
    pub name: &'static str,
    pub indexes: Vec<&'static str>,
}

impl StoreSchema {
    pub fn store_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stores.iter().map(|s| s.name)
    }
}

/// Byte-level read operations inside a transaction.
pub trait ReadOps {
    fn get(&self, store: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// All `(primary_key, value)` pairs in a store, in key order.
    fn scan(&self, store: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Primary keys of all records whose index key equals `index_key`.
    fn index_get(
        &self,
        store: &str,
        index: &str,
        index_key: &[u8],
    ) -> Result<Vec<Vec<u8>>, StoreError>;
}

/// Byte-level write operations. Index maintenance is the typed layer's
/// job; backends only store the entries they are told to.
pub trait WriteOps: ReadOps {
    fn put(&mut self, store: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError>;
    fn delete(&mut self, store: &str, key: &[u8]) -> Result<bool, StoreError>;
    fn index_put(
        &mut self,
        store: &str,
        index: &str,
        index_key: &[u8],
        primary_key: &[u8],
    ) -> Result<(), StoreError>;
    fn index_delete(
        &mut self,
        store: &str,
        index: &str,
        index_key: &[u8],
        primary_key: &[u8],
    ) -> Result<(), StoreError>;
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// A storage backend: hands out transactions over its keyspace.
pub trait Backend: Send + Sync {
    fn begin_read(&self) -> Result<Box<dyn ReadOps + '_>, StoreError>;
    fn begin_write(&self) -> Result<Box<dyn WriteOps + '_>, StoreError>;
}

fn decode<T: Entity>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

fn index_keys<T: Entity>(record: &T) -> Vec<(&'static str, Option<Vec<u8>>)> {
    T::indexes()
        .iter()
        .map(|idx| (idx.name, (idx.key)(record)))
        .collect()
}

/// Typed read-only transaction.
pub struct ReadTx<'a> {
    ops: Box<dyn ReadOps + 'a>,
}

impl ReadTx<'_> {
    pub fn get<T: Entity>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.ops.get(T::STORE_NAME, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn iter<T: Entity>(&self) -> Result<Vec<T>, StoreError> {
        self.ops
            .scan(T::STORE_NAME)?
            .iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    pub fn get_by_index<T: Entity>(
        &self,
        index: &str,
        index_key: &[u8],
    ) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for pk in self.ops.index_get(T::STORE_NAME, index, index_key)? {
            // A dangling index entry is a store bug, not a missing record.
            let bytes = self
                .ops
                .get(T::STORE_NAME, &pk)?
                .ok_or_else(|| StoreError::Corruption(format!("dangling index {index}")))?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }
}

/// Typed read-write transaction. Keeps secondary indexes consistent by
/// diffing the stored record against the incoming one on every put.
pub struct WriteTx<'a> {
    ops: Box<dyn WriteOps + 'a>,
}

impl WriteTx<'_> {
    pub fn get<T: Entity>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.ops.get(T::STORE_NAME, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn iter<T: Entity>(&self) -> Result<Vec<T>, StoreError> {
        self.ops
            .scan(T::STORE_NAME)?
            .iter()
            .map(|(_, v)| decode(v))
            .collect()
    }

    pub fn get_by_index<T: Entity>(
        &self,
        index: &str,
        index_key: &[u8],
    ) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for pk in self.ops.index_get(T::STORE_NAME, index, index_key)? {
            let bytes = self
                .ops
                .get(T::STORE_NAME, &pk)?
                .ok_or_else(|| StoreError::Corruption(format!("dangling index {index}")))?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn put<T: Entity>(&mut self, record: &T) -> Result<(), StoreError> {
        let pk = record.primary_key();
        let old_keys = match self.ops.get(T::STORE_NAME, &pk)? {
            Some(bytes) => index_keys(&decode::<T>(&bytes)?),
            None => Vec::new(),
        };
        let new_keys = index_keys(record);

        for (name, old) in &old_keys {
            let unchanged = new_keys
                .iter()
                .any(|(n, k)| n == name && k == old);
            if let (Some(key), false) = (old, unchanged) {
                self.ops.index_delete(T::STORE_NAME, name, key, &pk)?;
            }
        }
        for (name, new) in &new_keys {
            let unchanged = old_keys.iter().any(|(n, k)| n == name && k == new);
            if let (Some(key), false) = (new, unchanged) {
                self.ops.index_put(T::STORE_NAME, name, key, &pk)?;
            }
        }

        let bytes = bincode::serialize(record)?;
        self.ops.put(T::STORE_NAME, &pk, &bytes)
    }

    pub fn delete<T: Entity>(&mut self, key: &[u8]) -> Result<bool, StoreError> {
        if let Some(bytes) = self.ops.get(T::STORE_NAME, key)? {
            for (name, idx_key) in index_keys(&decode::<T>(&bytes)?) {
                if let Some(idx_key) = idx_key {
                    self.ops.index_delete(T::STORE_NAME, name, &idx_key, key)?;
                }
            }
        }
        self.ops.delete(T::STORE_NAME, key)
    }
}

/// Outcome of a write closure: commit the transaction and return a
/// value, or roll everything back and return a value anyway.
pub enum TxAction<R> {
    Commit(R),
    Abort(R),
}

/// Typed database handle over an arbitrary backend.
pub struct Db {
    backend: Box<dyn Backend>,
}

impl Db {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn read(&self) -> Result<ReadTx<'_>, StoreError> {
        Ok(ReadTx {
            ops: self.backend.begin_read()?,
        })
    }

    /// Run a closure inside a write transaction. The closure decides
    /// whether its effects commit or abort; an `Err` always aborts.
    pub fn with_write<R>(
        &self,
        f: impl FnOnce(&mut WriteTx<'_>) -> Result<TxAction<R>, StoreError>,
    ) -> Result<R, StoreError> {
        let mut tx = WriteTx {
            ops: self.backend.begin_write()?,
        };
        match f(&mut tx)? {
            TxAction::Commit(r) => {
                tx.ops.commit()?;
                Ok(r)
            }
            TxAction::Abort(r) => Ok(r),
        }
    }
}
