//! The wallet's view of the chain.
//!
//! One reader/writer lock guards the header chain, the wallet tables and the
//! sync state. Every mutation (commit, rollback, close) runs under the write
//! lock; notifications are queued once it has been released.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use spvd_consensus::constants::{
    BLOOM_FALSE_POSITIVE_RATE, COINBASE_MATURITY, LOCATOR_STEP_DOUBLING_INTERVAL,
    MAX_BLOCK_LOCATOR_HASHES, UNCONFIRMED_HEIGHT,
};
use spvd_consensus::{ChainParams, Hash256};
use spvd_primitives::address::ProgramHash;
use spvd_primitives::block::BlockHeader;
use spvd_primitives::bloom::BloomFilter;
use spvd_primitives::hash::hash256_to_hex;
use spvd_primitives::outpoint::OutPoint;
use spvd_primitives::transaction::Transaction;
use spvd_pow::PowError;
use spvd_storage::KeyValueStore;

use crate::datastore::{DataStore, KvDataStore};
use crate::error::ChainError;
use crate::headers::{Headers, KvHeaders};
use crate::notify::{ChainEvent, ChainListener, Notifier};
use crate::records::{Proof, Stxo, Txn, Utxo};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChainSyncState {
    Syncing,
    Waiting,
}

struct ChainInner<H, D> {
    headers: H,
    datastore: D,
    state: ChainSyncState,
    closed: bool,
}

pub struct Blockchain<H, D> {
    inner: RwLock<ChainInner<H, D>>,
    notifier: Notifier,
    params: ChainParams,
}

impl<S: KeyValueStore + Clone> Blockchain<KvHeaders<S>, KvDataStore<S>> {
    /// Opens a chain whose headers and wallet tables share one store.
    pub fn open(
        store: S,
        listener: Arc<dyn ChainListener>,
        params: ChainParams,
    ) -> Result<Self, ChainError> {
        Self::new(
            KvHeaders::new(store.clone()),
            KvDataStore::new(store),
            listener,
            params,
        )
    }
}

impl<H: Headers, D: DataStore> Blockchain<H, D> {
    pub fn new(
        headers: H,
        datastore: D,
        listener: Arc<dyn ChainListener>,
        params: ChainParams,
    ) -> Result<Self, ChainError> {
        let notifier = Notifier::spawn(listener).map_err(ChainError::Spawn)?;
        Ok(Self {
            inner: RwLock::new(ChainInner {
                headers,
                datastore,
                state: ChainSyncState::Waiting,
                closed: false,
            }),
            notifier,
            params,
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ChainInner<H, D>>, ChainError> {
        self.inner.read().map_err(|_| ChainError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ChainInner<H, D>>, ChainError> {
        self.inner.write().map_err(|_| ChainError::LockPoisoned)
    }

    /// Height of the tip; 0 for an empty chain or when the store fails.
    pub fn height(&self) -> u32 {
        let Ok(inner) = self.read() else {
            return 0;
        };
        match inner.headers.tip() {
            Ok(Some(tip)) => {
                spvd_log::log_trace!("chain height {}", tip.height);
                tip.height
            }
            _ => 0,
        }
    }

    /// The tip header, or an all-zero header for an empty chain.
    pub fn chain_tip(&self) -> BlockHeader {
        self.read()
            .ok()
            .and_then(|inner| inner.headers.tip().ok().flatten())
            .unwrap_or_default()
    }

    pub fn is_known_block(&self, hash: &Hash256) -> bool {
        self.read()
            .map(|inner| matches!(inner.headers.header(hash), Ok(Some(_))))
            .unwrap_or(false)
    }

    pub fn is_syncing(&self) -> bool {
        self.read()
            .map(|inner| inner.state == ChainSyncState::Syncing)
            .unwrap_or(false)
    }

    pub fn set_chain_state(&self, state: ChainSyncState) {
        if let Ok(mut inner) = self.write() {
            inner.state = state;
        }
    }

    pub fn add_address(&self, address: &ProgramHash) -> Result<(), ChainError> {
        let inner = self.write()?;
        inner.ensure_open()?;
        inner.datastore.add_addr(address)?;
        Ok(())
    }

    /// Filter matching every watched address and every wallet outpoint, spent
    /// or not, with a fresh random tweak.
    pub fn bloom_filter(&self) -> Result<BloomFilter, ChainError> {
        let inner = self.read()?;
        let addrs = inner.datastore.addrs()?;
        let utxos = inner.datastore.utxos()?;
        let stxos = inner.datastore.stxos()?;

        let elements = u32::try_from(addrs.len() + utxos.len() + stxos.len()).unwrap_or(u32::MAX);
        let mut filter = BloomFilter::new(elements, rand::random(), BLOOM_FALSE_POSITIVE_RATE);
        for address in &addrs {
            filter.insert(address);
        }
        for utxo in &utxos {
            filter.add_outpoint(&utxo.outpoint);
        }
        for stxo in &stxos {
            filter.add_outpoint(stxo.outpoint());
        }
        Ok(filter)
    }

    /// Hashes walking back from the tip: one step at a time for the first
    /// hashes, doubling the step after every few, until the walk leaves the
    /// stored chain or the locator is full.
    pub fn block_locator_hashes(&self) -> Vec<Hash256> {
        let mut hashes = Vec::new();
        let Ok(inner) = self.read() else {
            return hashes;
        };
        let Ok(Some(mut current)) = inner.headers.tip() else {
            return hashes;
        };

        let mut step = 1usize;
        let mut emitted_at_step = 0usize;
        'walk: loop {
            if emitted_at_step >= LOCATOR_STEP_DOUBLING_INTERVAL {
                step *= 2;
                emitted_at_step = 0;
            }
            hashes.push(current.hash());
            if hashes.len() >= MAX_BLOCK_LOCATOR_HASHES {
                break;
            }
            for _ in 0..step {
                match inner.headers.previous(&current) {
                    Ok(Some(previous)) => current = previous,
                    _ => break 'walk,
                }
            }
            emitted_at_step += 1;
        }
        hashes
    }

    /// Commits a transaction seen outside a block. Returns whether it turned
    /// out to be a bloom false positive.
    pub fn commit_unconfirmed_txn(&self, tx: &Transaction) -> Result<bool, ChainError> {
        let mut events = Vec::new();
        let result = self.write().and_then(|inner| {
            inner.ensure_open()?;
            inner.commit_txn(UNCONFIRMED_HEIGHT, tx, &mut events)
        });
        self.flush(events);
        result
    }

    /// Commits a block with its matched transactions, first rolling back to
    /// the block's parent when it forks below the current tip. Returns the
    /// number of false-positive transactions.
    pub fn commit_block(
        &self,
        header: BlockHeader,
        proof: Proof,
        txns: Vec<Transaction>,
    ) -> Result<usize, ChainError> {
        let mut events = Vec::new();
        let result = self.write().and_then(|inner| {
            inner.ensure_open()?;
            inner.commit_block(&header, &proof, &txns, &mut events)
        });
        if result.is_ok() {
            events.push(ChainEvent::BlockCommitted {
                header,
                proof,
                txns,
            });
        }
        self.flush(events);
        result
    }

    pub fn check_proof_of_work(&self, header: &BlockHeader) -> Result<(), PowError> {
        spvd_pow::check_proof_of_work(header, &self.params)
    }

    /// Closes both stores. Later mutations fail with [`ChainError::Closed`].
    pub fn close(&self) -> Result<(), ChainError> {
        let mut inner = self.write()?;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner.headers.close()?;
        inner.datastore.close()?;
        Ok(())
    }

    pub fn utxos(&self) -> Result<Vec<Utxo>, ChainError> {
        Ok(self.read()?.datastore.utxos()?)
    }

    pub fn stxos(&self) -> Result<Vec<Stxo>, ChainError> {
        Ok(self.read()?.datastore.stxos()?)
    }

    pub fn txn(&self, txid: &Hash256) -> Result<Option<Txn>, ChainError> {
        Ok(self.read()?.datastore.txn(txid)?)
    }

    pub fn proof(&self, block_hash: &Hash256) -> Result<Option<Proof>, ChainError> {
        Ok(self.read()?.datastore.proof(block_hash)?)
    }

    /// Chain height as last persisted in the wallet tables.
    pub fn chain_height_marker(&self) -> Result<u32, ChainError> {
        Ok(self.read()?.datastore.chain_height()?)
    }

    fn flush(&self, events: Vec<ChainEvent>) {
        for event in events {
            self.notifier.notify(event);
        }
    }
}

impl<H: Headers, D: DataStore> ChainInner<H, D> {
    fn ensure_open(&self) -> Result<(), ChainError> {
        if self.closed {
            return Err(ChainError::Closed);
        }
        Ok(())
    }

    fn commit_block(
        &self,
        header: &BlockHeader,
        proof: &Proof,
        txns: &[Transaction],
        events: &mut Vec<ChainEvent>,
    ) -> Result<usize, ChainError> {
        if let Some(tip) = self.headers.tip()? {
            if header.height < tip.height {
                spvd_log::log_debug!(
                    "blockchain rollback to {}",
                    hash256_to_hex(&header.previous)
                );
                self.rollback_to(&header.previous, events)?;
            }
        }

        let mut false_positives = 0;
        for tx in txns {
            if self.commit_txn(header.height, tx, events)? {
                false_positives += 1;
            }
        }

        self.datastore.put_proof(proof)?;
        self.headers.add(header)?;
        self.datastore.save_chain_height(header.height)?;
        Ok(false_positives)
    }

    /// Returns `true` when nothing in `tx` concerns the wallet.
    fn commit_txn(
        &self,
        height: u32,
        tx: &Transaction,
        events: &mut Vec<ChainEvent>,
    ) -> Result<bool, ChainError> {
        let txid = tx.txid();
        let mut hits = 0usize;

        for (output, index) in tx.outputs.iter().zip(0u16..) {
            if !self.datastore.contains_addr(&output.program_hash)? {
                continue;
            }
            let lock_time = if tx.is_coinbase() {
                height.saturating_add(COINBASE_MATURITY)
            } else {
                0
            };
            self.datastore.put_utxo(&Utxo {
                outpoint: OutPoint::new(txid, index),
                value: output.value,
                lock_time,
                at_height: height,
                address: output.program_hash,
            })?;
            hits += 1;
        }

        for input in &tx.inputs {
            if self.datastore.spend_utxo(&input.previous, &txid, height)? {
                hits += 1;
            }
        }

        if hits == 0 {
            return Ok(true);
        }

        self.datastore.put_txn(&Txn::from_transaction(tx, height))?;
        events.push(ChainEvent::TxCommitted(tx.clone()));
        Ok(false)
    }

    fn rollback_to(
        &self,
        fork_point: &Hash256,
        events: &mut Vec<ChainEvent>,
    ) -> Result<(), ChainError> {
        loop {
            let Some(removed) = self.headers.rollback()? else {
                spvd_log::log_error!(
                    "header chain exhausted before reaching fork point {}",
                    hash256_to_hex(fork_point)
                );
                return Err(ChainError::ForkPointNotFound);
            };

            if let Err(err) = self.datastore.rollback(removed.height) {
                spvd_log::log_error!(
                    "rollback database failed, height: {}, error: {}",
                    removed.height,
                    err
                );
                return Err(err.into());
            }
            events.push(ChainEvent::RolledBack(removed.height));

            if &removed.previous == fork_point {
                let height = removed.height.saturating_sub(1);
                self.datastore.save_chain_height(height)?;
                spvd_log::log_debug!("blockchain rollback finished, current height: {}", height);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopListener;
    use spvd_consensus::{chain_params, Network};
    use spvd_storage::memory::MemoryStore;

    fn open() -> Blockchain<KvHeaders<Arc<MemoryStore>>, KvDataStore<Arc<MemoryStore>>> {
        Blockchain::open(
            Arc::new(MemoryStore::new()),
            Arc::new(NoopListener),
            chain_params(Network::Regtest),
        )
        .expect("open")
    }

    fn header(previous: Hash256, height: u32, tag: u32) -> BlockHeader {
        BlockHeader {
            previous,
            height,
            nonce: tag,
            ..BlockHeader::default()
        }
    }

    #[test]
    fn empty_chain_defaults() {
        let chain = open();
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.chain_tip(), BlockHeader::default());
        assert!(chain.block_locator_hashes().is_empty());
        assert!(!chain.is_known_block(&[1u8; 32]));
    }

    #[test]
    fn sync_state_starts_waiting() {
        let chain = open();
        assert!(!chain.is_syncing());
        chain.set_chain_state(ChainSyncState::Syncing);
        assert!(chain.is_syncing());
        chain.set_chain_state(ChainSyncState::Waiting);
        assert!(!chain.is_syncing());
    }

    #[test]
    fn close_rejects_commits() {
        let chain = open();
        chain.close().expect("close");
        let result = chain.commit_block(header([0u8; 32], 0, 0), Proof::default(), Vec::new());
        assert!(matches!(result, Err(ChainError::Closed)));
        assert_eq!(chain.height(), 0);
        chain.close().expect("second close");
    }

    #[test]
    fn rollback_without_fork_point_is_fatal() {
        let chain = open();
        let genesis = header([0u8; 32], 0, 0);
        let one = header(genesis.hash(), 1, 1);
        let two = header(one.hash(), 2, 2);
        for block in [&genesis, &one, &two] {
            chain
                .commit_block(block.clone(), Proof::default(), Vec::new())
                .expect("commit");
        }

        // Parent is unknown, so popping never reaches it.
        let stray = header([0xee; 32], 1, 9);
        let result = chain.commit_block(stray, Proof::default(), Vec::new());
        assert!(matches!(result, Err(ChainError::ForkPointNotFound)));
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.chain_tip(), BlockHeader::default());
    }
}
