//! Wallet tables: watched addresses, UTXOs, STXOs, transactions, proofs and
//! the persisted chain height.

use std::sync::atomic::{AtomicBool, Ordering};

use spvd_consensus::Hash256;
use spvd_primitives::address::ProgramHash;
use spvd_primitives::encoding::DecodeError;
use spvd_primitives::outpoint::OutPoint;
use spvd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::records::{Proof, Stxo, Txn, Utxo};

const CHAIN_HEIGHT_KEY: &[u8] = b"wallet.chain_height";

pub trait DataStore: Send + Sync {
    fn add_addr(&self, address: &ProgramHash) -> Result<(), StoreError>;
    fn contains_addr(&self, address: &ProgramHash) -> Result<bool, StoreError>;
    fn addrs(&self) -> Result<Vec<ProgramHash>, StoreError>;

    fn put_utxo(&self, utxo: &Utxo) -> Result<(), StoreError>;
    fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError>;
    fn utxos(&self) -> Result<Vec<Utxo>, StoreError>;

    /// Moves the UTXO at `outpoint` into the STXO table in one write.
    /// Returns `false`, writing nothing, when no such UTXO exists.
    fn spend_utxo(
        &self,
        outpoint: &OutPoint,
        spend_txid: &Hash256,
        spend_height: u32,
    ) -> Result<bool, StoreError>;
    fn stxo(&self, outpoint: &OutPoint) -> Result<Option<Stxo>, StoreError>;
    fn stxos(&self) -> Result<Vec<Stxo>, StoreError>;

    fn put_txn(&self, txn: &Txn) -> Result<(), StoreError>;
    fn txn(&self, txid: &Hash256) -> Result<Option<Txn>, StoreError>;
    fn txns(&self) -> Result<Vec<Txn>, StoreError>;

    fn put_proof(&self, proof: &Proof) -> Result<(), StoreError>;
    fn proof(&self, block_hash: &Hash256) -> Result<Option<Proof>, StoreError>;

    fn chain_height(&self) -> Result<u32, StoreError>;
    fn save_chain_height(&self, height: u32) -> Result<(), StoreError>;

    /// Undoes everything recorded at or above `height`: spends return to the
    /// UTXO set, outputs and transactions created there are removed.
    fn rollback(&self, height: u32) -> Result<(), StoreError>;
    fn close(&self) -> Result<(), StoreError>;
}

pub struct KvDataStore<S> {
    store: S,
    closed: AtomicBool,
}

impl<S> KvDataStore<S> {
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

impl<S: KeyValueStore> KvDataStore<S> {
    fn get_decoded<T>(
        &self,
        column: Column,
        key: &[u8],
        decode: impl Fn(&[u8]) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, StoreError> {
        self.ensure_open()?;
        match self.store.get(column, key)? {
            Some(bytes) => decode(&bytes).map(Some).map_err(corrupt),
            None => Ok(None),
        }
    }

    fn scan_decoded<T>(
        &self,
        column: Column,
        decode: impl Fn(&[u8]) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, StoreError> {
        self.ensure_open()?;
        let mut out = Vec::new();
        self.store.for_each_prefix(column, &[], &mut |_, value| {
            out.push(decode(value).map_err(corrupt)?);
            Ok(())
        })?;
        Ok(out)
    }
}

impl<S: KeyValueStore> DataStore for KvDataStore<S> {
    fn add_addr(&self, address: &ProgramHash) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store.put(Column::Address, address, &[])
    }

    fn contains_addr(&self, address: &ProgramHash) -> Result<bool, StoreError> {
        self.ensure_open()?;
        Ok(self.store.get(Column::Address, address)?.is_some())
    }

    fn addrs(&self) -> Result<Vec<ProgramHash>, StoreError> {
        self.ensure_open()?;
        let mut out: Vec<ProgramHash> = Vec::new();
        self.store.for_each_prefix(Column::Address, &[], &mut |key, _| {
            let address: ProgramHash = key
                .try_into()
                .map_err(|_| StoreError::Backend("invalid address key".to_string()))?;
            out.push(address);
            Ok(())
        })?;
        Ok(out)
    }

    fn put_utxo(&self, utxo: &Utxo) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store
            .put(Column::Utxo, &utxo.outpoint.to_key(), &utxo.encode())
    }

    fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Utxo>, StoreError> {
        self.get_decoded(Column::Utxo, &outpoint.to_key(), Utxo::decode)
    }

    fn utxos(&self) -> Result<Vec<Utxo>, StoreError> {
        self.scan_decoded(Column::Utxo, Utxo::decode)
    }

    fn spend_utxo(
        &self,
        outpoint: &OutPoint,
        spend_txid: &Hash256,
        spend_height: u32,
    ) -> Result<bool, StoreError> {
        let Some(utxo) = self.utxo(outpoint)? else {
            return Ok(false);
        };
        let key = outpoint.to_key();
        let stxo = Stxo {
            utxo,
            spend_txid: *spend_txid,
            spend_height,
        };
        let mut batch = WriteBatch::new();
        batch.delete(Column::Utxo, key);
        batch.put(Column::Stxo, key, stxo.encode());
        self.store.write_batch(&batch)?;
        Ok(true)
    }

    fn stxo(&self, outpoint: &OutPoint) -> Result<Option<Stxo>, StoreError> {
        self.get_decoded(Column::Stxo, &outpoint.to_key(), Stxo::decode)
    }

    fn stxos(&self) -> Result<Vec<Stxo>, StoreError> {
        self.scan_decoded(Column::Stxo, Stxo::decode)
    }

    fn put_txn(&self, txn: &Txn) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store.put(Column::Txn, &txn.txid, &txn.encode())
    }

    fn txn(&self, txid: &Hash256) -> Result<Option<Txn>, StoreError> {
        self.get_decoded(Column::Txn, txid, Txn::decode)
    }

    fn txns(&self) -> Result<Vec<Txn>, StoreError> {
        self.scan_decoded(Column::Txn, Txn::decode)
    }

    fn put_proof(&self, proof: &Proof) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store
            .put(Column::Proof, &proof.block_hash, &proof.encode())
    }

    fn proof(&self, block_hash: &Hash256) -> Result<Option<Proof>, StoreError> {
        self.get_decoded(Column::Proof, block_hash, Proof::decode)
    }

    fn chain_height(&self) -> Result<u32, StoreError> {
        self.ensure_open()?;
        match self.store.get(Column::Meta, CHAIN_HEIGHT_KEY)? {
            Some(bytes) => {
                let bytes: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Backend("invalid chain height".to_string()))?;
                Ok(u32::from_le_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    fn save_chain_height(&self, height: u32) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.store
            .put(Column::Meta, CHAIN_HEIGHT_KEY, &height.to_le_bytes())
    }

    fn rollback(&self, height: u32) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();

        for utxo in self.utxos()? {
            if utxo.at_height >= height {
                batch.delete(Column::Utxo, utxo.outpoint.to_key());
            }
        }

        for stxo in self.stxos()? {
            if stxo.spend_height < height {
                continue;
            }
            let key = stxo.outpoint().to_key();
            batch.delete(Column::Stxo, key);
            if stxo.utxo.at_height < height {
                batch.put(Column::Utxo, key, stxo.utxo.encode());
            }
        }

        for txn in self.txns()? {
            if txn.height >= height {
                batch.delete(Column::Txn, txn.txid);
            }
        }

        self.store.for_each_prefix(Column::Proof, &[], &mut |key, value| {
            let proof = Proof::decode(value).map_err(corrupt)?;
            if proof.height >= height {
                batch.delete(Column::Proof, key);
            }
            Ok(())
        })?;

        self.store.write_batch(&batch)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

fn corrupt(err: DecodeError) -> StoreError {
    StoreError::Backend(format!("corrupt wallet record: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spvd_storage::memory::MemoryStore;

    fn utxo(tag: u8, at_height: u32) -> Utxo {
        Utxo {
            outpoint: OutPoint::new([tag; 32], 0),
            value: i64::from(tag),
            lock_time: 0,
            at_height,
            address: [0x21; 21],
        }
    }

    #[test]
    fn spend_moves_utxo_to_stxo() {
        let store = KvDataStore::new(MemoryStore::new());
        let coin = utxo(1, 3);
        store.put_utxo(&coin).expect("put");

        assert!(store.spend_utxo(&coin.outpoint, &[9u8; 32], 4).expect("spend"));
        assert!(store.utxo(&coin.outpoint).expect("utxo").is_none());
        let stxo = store.stxo(&coin.outpoint).expect("stxo").expect("present");
        assert_eq!(stxo.utxo, coin);
        assert_eq!(stxo.spend_height, 4);

        assert!(!store.spend_utxo(&coin.outpoint, &[9u8; 32], 4).expect("spend"));
        assert!(!store
            .spend_utxo(&OutPoint::new([2u8; 32], 0), &[9u8; 32], 4)
            .expect("spend"));
    }

    #[test]
    fn rollback_reverses_heights_at_or_above() {
        let store = KvDataStore::new(MemoryStore::new());
        let old = utxo(1, 2);
        let spent_old = utxo(2, 2);
        let new = utxo(3, 5);
        let spent_new = utxo(4, 5);
        for coin in [&old, &spent_old, &new, &spent_new] {
            store.put_utxo(coin).expect("put");
        }
        store.spend_utxo(&spent_old.outpoint, &[7u8; 32], 5).expect("spend");
        store.spend_utxo(&spent_new.outpoint, &[7u8; 32], 6).expect("spend");
        store
            .put_txn(&Txn {
                txid: [7u8; 32],
                height: 5,
                raw: Vec::new(),
            })
            .expect("txn");
        store
            .put_txn(&Txn {
                txid: [6u8; 32],
                height: 2,
                raw: Vec::new(),
            })
            .expect("txn");

        store.rollback(5).expect("rollback");

        let mut utxos = store.utxos().expect("utxos");
        utxos.sort_by_key(|utxo| utxo.outpoint);
        assert_eq!(utxos, vec![old, spent_old]);
        assert!(store.stxos().expect("stxos").is_empty());
        assert!(store.txn(&[7u8; 32]).expect("txn").is_none());
        assert!(store.txn(&[6u8; 32]).expect("txn").is_some());
    }

    #[test]
    fn addresses_and_height_marker() {
        let store = KvDataStore::new(MemoryStore::new());
        assert_eq!(store.chain_height().expect("height"), 0);
        store.save_chain_height(12).expect("save");
        assert_eq!(store.chain_height().expect("height"), 12);

        store.add_addr(&[0x21; 21]).expect("addr");
        assert!(store.contains_addr(&[0x21; 21]).expect("contains"));
        assert!(!store.contains_addr(&[0x12; 21]).expect("contains"));
        assert_eq!(store.addrs().expect("addrs"), vec![[0x21; 21]]);
    }
}
