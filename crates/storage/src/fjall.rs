//! On-disk backend: a fjall keyspace with one partition per column.

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::{Column, KeyValueStore, PrefixVisitor, StoreError, WriteBatch, WriteOp, COLUMN_COUNT};

const SLOW_COMMIT: Duration = Duration::from_millis(500);
const SLOW_COMMIT_QUIET: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Default)]
pub struct FjallOptions {
    pub cache_bytes: Option<u64>,
    pub memtable_bytes: Option<u32>,
    pub fsync_ms: Option<u16>,
    /// Sync every batch to disk instead of leaving it in the OS buffer.
    pub sync_writes: bool,
}

pub struct FjallStore {
    keyspace: Keyspace,
    partitions: [PartitionHandle; COLUMN_COUNT],
    persist: PersistMode,
    last_slow_warn: Mutex<Option<Instant>>,
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_options(path, FjallOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: FjallOptions,
    ) -> Result<Self, StoreError> {
        let mut config = Config::new(path);
        if let Some(bytes) = options.cache_bytes {
            config = config.cache_size(bytes);
        }
        if let Some(ms) = options.fsync_ms {
            config = config.fsync_ms(Some(ms));
        }
        let keyspace = config.open().map_err(backend)?;

        let mut create = PartitionCreateOptions::default();
        if let Some(bytes) = options.memtable_bytes {
            create = create.max_memtable_size(bytes);
        }
        let mut partitions = Vec::with_capacity(COLUMN_COUNT);
        for column in Column::ALL {
            partitions.push(
                keyspace
                    .open_partition(column.as_str(), create.clone())
                    .map_err(backend)?,
            );
        }
        let partitions = partitions
            .try_into()
            .map_err(|_| StoreError::Backend("partition count mismatch".to_string()))?;

        spvd_log::log_debug!(
            "opened fjall keyspace with {} partitions (sync_writes {})",
            COLUMN_COUNT,
            options.sync_writes
        );
        Ok(Self {
            keyspace,
            partitions,
            persist: if options.sync_writes {
                PersistMode::SyncAll
            } else {
                PersistMode::Buffer
            },
            last_slow_warn: Mutex::new(None),
        })
    }

    fn partition(&self, column: Column) -> &PartitionHandle {
        &self.partitions[column.index()]
    }

    fn note_commit(&self, elapsed: Duration, ops: usize) {
        if elapsed < SLOW_COMMIT {
            return;
        }
        let Ok(mut last) = self.last_slow_warn.try_lock() else {
            return;
        };
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < SLOW_COMMIT_QUIET) {
            return;
        }
        *last = Some(now);
        spvd_log::log_warn!(
            "slow fjall batch commit: {}ms for {} ops ({} journals)",
            elapsed.as_millis(),
            ops,
            self.keyspace.journal_count(),
        );
    }
}

impl KeyValueStore for FjallStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.partition(column).get(key).map_err(backend)?;
        Ok(value.map(|slice| slice.to_vec()))
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.partition(column).insert(key, value).map_err(backend)
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.partition(column).remove(key).map_err(backend)
    }

    fn for_each_prefix(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'_>,
    ) -> Result<(), StoreError> {
        for entry in self.partition(column).prefix(prefix) {
            let (key, value) = entry.map_err(backend)?;
            visitor(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut commit = self.keyspace.batch().durability(Some(self.persist));
        for op in batch {
            let partition = self.partition(op.column());
            match op {
                WriteOp::Put { key, value, .. } => {
                    commit.insert(partition, key.as_slice(), value.as_slice())
                }
                WriteOp::Delete { key, .. } => commit.remove(partition, key.as_slice()),
            }
        }

        let started = Instant::now();
        commit.commit().map_err(backend)?;
        self.note_commit(started.elapsed(), batch.len());
        Ok(())
    }
}

fn backend(err: fjall::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}
