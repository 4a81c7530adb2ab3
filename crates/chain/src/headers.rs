//! Header chain storage.

use std::sync::atomic::{AtomicBool, Ordering};

use spvd_consensus::Hash256;
use spvd_primitives::block::BlockHeader;
use spvd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

const TIP_KEY: &[u8] = b"headers.tip";

/// The linear header chain the wallet follows.
pub trait Headers: Send + Sync {
    fn tip(&self) -> Result<Option<BlockHeader>, StoreError>;
    fn header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, StoreError>;
    fn previous(&self, header: &BlockHeader) -> Result<Option<BlockHeader>, StoreError> {
        self.header(&header.previous)
    }
    /// Stores `header` and makes it the tip.
    fn add(&self, header: &BlockHeader) -> Result<(), StoreError>;
    /// Removes the tip and returns it; `None` once the chain is empty.
    fn rollback(&self) -> Result<Option<BlockHeader>, StoreError>;
    fn close(&self) -> Result<(), StoreError>;
}

/// [`Headers`] over a key/value store: headers by hash, hashes by height and
/// the tip hash under a meta key. Writers are expected to be serialized by
/// the caller.
pub struct KvHeaders<S> {
    store: S,
    closed: AtomicBool,
}

impl<S> KvHeaders<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl<S: KeyValueStore> KvHeaders<S> {
    /// Hash of the header stored at `height` on the current chain.
    pub fn hash_at(&self, height: u32) -> Result<Option<Hash256>, StoreError> {
        self.ensure_open()?;
        self.store
            .get(Column::HeightIndex, &height.to_be_bytes())?
            .map(|bytes| hash_from_bytes(&bytes))
            .transpose()
    }

    fn tip_hash(&self) -> Result<Option<Hash256>, StoreError> {
        self.store
            .get(Column::Meta, TIP_KEY)?
            .map(|bytes| hash_from_bytes(&bytes))
            .transpose()
    }
}

impl<S: KeyValueStore> Headers for KvHeaders<S> {
    fn tip(&self) -> Result<Option<BlockHeader>, StoreError> {
        self.ensure_open()?;
        match self.tip_hash()? {
            Some(hash) => self.header(&hash),
            None => Ok(None),
        }
    }

    fn header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, StoreError> {
        self.ensure_open()?;
        match self.store.get(Column::HeaderIndex, hash)? {
            Some(bytes) => BlockHeader::consensus_decode(&bytes)
                .map(Some)
                .map_err(|err| StoreError::Backend(err.to_string())),
            None => Ok(None),
        }
    }

    fn add(&self, header: &BlockHeader) -> Result<(), StoreError> {
        self.ensure_open()?;
        let hash = header.hash();
        let mut batch = WriteBatch::new();
        batch.put(Column::HeaderIndex, hash, header.consensus_encode());
        batch.put(Column::HeightIndex, header.height.to_be_bytes(), hash);
        batch.put(Column::Meta, TIP_KEY, hash);
        self.store.write_batch(&batch)
    }

    fn rollback(&self) -> Result<Option<BlockHeader>, StoreError> {
        let Some(removed) = self.tip()? else {
            return Ok(None);
        };

        let mut batch = WriteBatch::new();
        batch.delete(Column::HeaderIndex, removed.hash());
        batch.delete(Column::HeightIndex, removed.height.to_be_bytes());
        if self.header(&removed.previous)?.is_some() {
            batch.put(Column::Meta, TIP_KEY, removed.previous);
        } else {
            batch.delete(Column::Meta, TIP_KEY);
        }
        self.store.write_batch(&batch)?;
        Ok(Some(removed))
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

fn hash_from_bytes(bytes: &[u8]) -> Result<Hash256, StoreError> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Backend(format!("invalid hash length {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spvd_storage::memory::MemoryStore;

    fn chain(len: u32) -> Vec<BlockHeader> {
        let mut previous = [0u8; 32];
        (0..len)
            .map(|height| {
                let header = BlockHeader {
                    previous,
                    height,
                    nonce: height,
                    ..BlockHeader::default()
                };
                previous = header.hash();
                header
            })
            .collect()
    }

    #[test]
    fn add_moves_tip_and_indexes_height() {
        let headers = KvHeaders::new(MemoryStore::new());
        assert!(headers.tip().expect("tip").is_none());

        let blocks = chain(3);
        for header in &blocks {
            headers.add(header).expect("add");
        }
        assert_eq!(headers.tip().expect("tip").as_ref(), blocks.last());
        assert_eq!(headers.hash_at(1).expect("height"), Some(blocks[1].hash()));
        assert_eq!(
            headers.previous(&blocks[2]).expect("previous").as_ref(),
            Some(&blocks[1])
        );
    }

    #[test]
    fn rollback_pops_until_empty() {
        let headers = KvHeaders::new(MemoryStore::new());
        let blocks = chain(2);
        for header in &blocks {
            headers.add(header).expect("add");
        }

        assert_eq!(headers.rollback().expect("rollback"), Some(blocks[1].clone()));
        assert!(headers.header(&blocks[1].hash()).expect("header").is_none());
        assert_eq!(headers.tip().expect("tip"), Some(blocks[0].clone()));

        assert_eq!(headers.rollback().expect("rollback"), Some(blocks[0].clone()));
        assert!(headers.tip().expect("tip").is_none());
        assert!(headers.rollback().expect("rollback").is_none());
    }

    #[test]
    fn closed_store_refuses_access() {
        let headers = KvHeaders::new(MemoryStore::new());
        headers.close().expect("close");
        assert!(matches!(headers.tip(), Err(StoreError::Closed)));
        assert!(matches!(
            headers.add(&BlockHeader::default()),
            Err(StoreError::Closed)
        ));
    }
}
