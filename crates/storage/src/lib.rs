//! Column-family key/value storage shared by the header store and the wallet datastore.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod memory;

#[cfg(feature = "fjall")]
pub mod fjall;

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
    Closed,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => f.write_str(message),
            StoreError::Closed => f.write_str("store is closed"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Logical tables. The discriminant doubles as the backend partition index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u8)]
pub enum Column {
    HeaderIndex = 0,
    HeightIndex = 1,
    Utxo = 2,
    Stxo = 3,
    Txn = 4,
    Proof = 5,
    Address = 6,
    Meta = 7,
}

pub const COLUMN_COUNT: usize = 8;

impl Column {
    pub const ALL: [Column; COLUMN_COUNT] = [
        Column::HeaderIndex,
        Column::HeightIndex,
        Column::Utxo,
        Column::Stxo,
        Column::Txn,
        Column::Proof,
        Column::Address,
        Column::Meta,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::HeaderIndex => "header_index",
            Column::HeightIndex => "height_index",
            Column::Utxo => "utxo",
            Column::Stxo => "stxo",
            Column::Txn => "txn",
            Column::Proof => "proof",
            Column::Address => "address",
            Column::Meta => "meta",
        }
    }
}

/// Inline up to an outpoint key; encoded records spill to the heap.
pub type Bytes = SmallVec<[u8; 40]>;

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        column: Column,
        key: Bytes,
        value: Bytes,
    },
    Delete {
        column: Column,
        key: Bytes,
    },
}

impl WriteOp {
    pub fn column(&self) -> Column {
        match self {
            WriteOp::Put { column, .. } | WriteOp::Delete { column, .. } => *column,
        }
    }
}

/// Ordered writes that a backend applies all-or-nothing.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.ops.push(WriteOp::Put {
            column,
            key: Bytes::from_slice(key.as_ref()),
            value: Bytes::from_slice(value.as_ref()),
        });
    }

    pub fn delete(&mut self, column: Column, key: impl AsRef<[u8]>) {
        self.ops.push(WriteOp::Delete {
            column,
            key: Bytes::from_slice(key.as_ref()),
        });
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl<'a> IntoIterator for &'a WriteBatch {
    type Item = &'a WriteOp;
    type IntoIter = std::slice::Iter<'a, WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;
pub type PrefixVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError> + 'a;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError>;

    /// Visits every entry whose key starts with `prefix`, in key order.
    /// An error from the visitor stops the walk and is returned.
    fn for_each_prefix(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'_>,
    ) -> Result<(), StoreError>;

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let mut entries = Vec::new();
        self.for_each_prefix(column, prefix, &mut |key, value| {
            entries.push((key.to_vec(), value.to_vec()));
            Ok(())
        })?;
        Ok(entries)
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(column, key)
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        (**self).put(column, key, value)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        (**self).delete(column, key)
    }

    fn for_each_prefix(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'_>,
    ) -> Result<(), StoreError> {
        (**self).for_each_prefix(column, prefix, visitor)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        (**self).write_batch(batch)
    }
}
