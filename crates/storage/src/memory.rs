//! In-memory backend for tests and throwaway wallets.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{PoisonError, RwLock};

use crate::{Column, COLUMN_COUNT, KeyValueStore, PrefixVisitor, StoreError, WriteBatch, WriteOp};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

pub struct MemoryStore {
    tables: RwLock<[Table; COLUMN_COUNT]>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(std::array::from_fn(|_| Table::new())),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held in `column`.
    pub fn len(&self, column: Column) -> usize {
        self.with_table(column, Table::len)
    }

    fn with_table<R>(&self, column: Column, f: impl FnOnce(&Table) -> R) -> R {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f(&tables[column.index()])
    }

    fn apply(&self, ops: &[(Column, &[u8], Option<&[u8]>)]) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        for (column, key, value) in ops {
            let table = &mut tables[column.index()];
            match value {
                Some(value) => {
                    table.insert(key.to_vec(), value.to_vec());
                }
                None => {
                    table.remove(*key);
                }
            }
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.with_table(column, |table| table.get(key).cloned()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.apply(&[(column, key, Some(value))]);
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.apply(&[(column, key, None)]);
        Ok(())
    }

    fn for_each_prefix(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'_>,
    ) -> Result<(), StoreError> {
        // Snapshot first so a visitor may write back into the store.
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self.with_table(column, |table| {
            table
                .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        });
        for (key, value) in &entries {
            visitor(key, value)?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let ops: Vec<(Column, &[u8], Option<&[u8]>)> = batch
            .iter()
            .map(|op| match op {
                WriteOp::Put { column, key, value } => {
                    (*column, key.as_slice(), Some(value.as_slice()))
                }
                WriteOp::Delete { column, key } => (*column, key.as_slice(), None),
            })
            .collect();
        self.apply(&ops);
        Ok(())
    }
}
