//! Three-stage fetch pipeline: hash intake, block requests, transaction groups.
//!
//! The sync driver pushes wanted block hashes into a bounded intake channel of
//! twice the queue size. A worker promotes them to block requests, at most
//! `size` in flight; each received block with matched transactions becomes a
//! transaction group, again at most `size` in flight. A full stage blocks its
//! producer. A received block keeps its block slot until its group gets a
//! group slot, so slow transactions hold back block requests and intake.
//! Every completed unit is added to the finished pool, which is handed to the
//! handler.
//!
//! Block requests and transaction groups sit behind two separate locks, never
//! held together. A stage's slot channel is only touched under its own lock,
//! so its length always equals the number of registered requests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use spvd_consensus::constants::DEFAULT_REQUEST_TIMEOUT_SECS;
use spvd_consensus::Hash256;
use spvd_primitives::hash::hash256_to_hex;
use spvd_primitives::merkleblock::MerkleBlock;
use spvd_primitives::transaction::Transaction;

use crate::block_txs::BlockTxsRequest;
use crate::config::SyncConfig;
use crate::error::RequestError;
use crate::pool::FinishedReqPool;
use crate::request::{Request, RequestKind};
use crate::timer::RequestTimer;

const SLOT_WAIT: Duration = Duration::from_millis(50);

/// Callbacks from the queue. `on_send_request` runs while the queue holds a
/// request lock, so it must hand the work off rather than deliver into the
/// queue synchronously.
pub trait RequestQueueHandler: Send + Sync + 'static {
    type Peer: Clone + Send + Sync + 'static;

    fn on_send_request(&self, peer: &Self::Peer, kind: RequestKind, hash: &Hash256);
    fn on_request_error(&self, error: RequestError);
    /// Called with the whole pool after every completion; the handler decides
    /// what to take out of it.
    fn on_request_finished(&self, pool: &mut FinishedReqPool);
}

/// Bounded slot channel for one stage plus a wake-up signal for waiters.
struct Stage {
    slots: Sender<Hash256>,
    taken: Receiver<Hash256>,
    freed_tx: Sender<()>,
    freed_rx: Receiver<()>,
}

impl Stage {
    fn new(size: usize) -> Self {
        let (slots, taken) = bounded(size);
        let (freed_tx, freed_rx) = bounded(1);
        Self {
            slots,
            taken,
            freed_tx,
            freed_rx,
        }
    }

    fn try_take(&self, hash: Hash256) -> bool {
        self.slots.try_send(hash).is_ok()
    }

    fn release(&self) {
        if self.taken.try_recv().is_ok() {
            let _ = self.freed_tx.try_send(());
        }
    }

    fn drain(&self) {
        while self.taken.try_recv().is_ok() {}
        let _ = self.freed_tx.try_send(());
    }

    fn wait_freed(&self) {
        let _ = self.freed_rx.recv_timeout(SLOT_WAIT);
    }

    fn in_use(&self) -> usize {
        self.taken.len()
    }
}

struct PendingBlock<P> {
    peer: P,
    request: Request,
}

struct DeferredGroup<P> {
    peer: P,
    block: MerkleBlock,
    txids: Vec<Hash256>,
    /// Epoch of the block slot this entry still holds.
    epoch: u64,
}

struct Groups<P> {
    pending: HashMap<Hash256, BlockTxsRequest>,
    /// txid -> hash of the block whose group requested it
    tx_index: HashMap<Hash256, Hash256>,
    /// Received blocks waiting for a group slot, each holding its block
    /// slot, so never more than `size` entries.
    deferred: VecDeque<DeferredGroup<P>>,
}

impl<P> Default for Groups<P> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
            tx_index: HashMap::new(),
            deferred: VecDeque::new(),
        }
    }
}

struct Shared<H: RequestQueueHandler> {
    size: usize,
    timeout: Duration,
    handler: Arc<H>,
    peer: Mutex<Option<H::Peer>>,
    intake: Receiver<(u64, Hash256)>,
    block_stage: Stage,
    group_stage: Stage,
    blocks: Mutex<HashMap<Hash256, PendingBlock<H::Peer>>>,
    groups: Mutex<Groups<H::Peer>>,
    finished: Mutex<FinishedReqPool>,
    /// Bumped by `clear`, under the block lock; work tagged with an older
    /// epoch is dropped.
    epoch: AtomicU64,
    shutdown: AtomicBool,
    timer: RequestTimer,
}

pub struct RequestQueue<H: RequestQueueHandler> {
    shared: Arc<Shared<H>>,
    intake: Option<Sender<(u64, Hash256)>>,
    worker: Option<JoinHandle<()>>,
}

impl<H: RequestQueueHandler> RequestQueue<H> {
    pub fn new(size: usize, handler: H) -> std::io::Result<Self> {
        Self::with_timeout(
            size,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            handler,
        )
    }

    pub fn with_config(config: &SyncConfig, handler: H) -> std::io::Result<Self> {
        Self::with_timeout(config.queue_size, config.request_timeout, handler)
    }

    pub fn with_timeout(size: usize, timeout: Duration, handler: H) -> std::io::Result<Self> {
        let size = size.max(1);
        let (intake_tx, intake_rx) = bounded(size * 2);
        let shared = Arc::new(Shared {
            size,
            timeout,
            handler: Arc::new(handler),
            peer: Mutex::new(None),
            intake: intake_rx,
            block_stage: Stage::new(size),
            group_stage: Stage::new(size),
            blocks: Mutex::new(HashMap::new()),
            groups: Mutex::new(Groups::default()),
            finished: Mutex::new(FinishedReqPool::new()),
            epoch: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            timer: RequestTimer::spawn()?,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("request-queue".to_string())
            .spawn(move || worker_shared.run())?;

        Ok(Self {
            shared,
            intake: Some(intake_tx),
            worker: Some(worker),
        })
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    /// Records `peer` as the active peer and queues `hashes` for block
    /// requests. Blocks while the intake channel is full.
    pub fn push_hashes(&self, peer: H::Peer, hashes: &[Hash256]) {
        *lock(&self.shared.peer) = Some(peer);
        let Some(intake) = &self.intake else {
            return;
        };
        for hash in hashes {
            let epoch = self.shared.epoch.load(Ordering::Acquire);
            if intake.send((epoch, *hash)).is_err() {
                break;
            }
        }
    }

    /// Starts a block request unless `hash` is already pending. Blocks while
    /// every block slot is taken.
    pub fn start_block_request(&self, peer: &H::Peer, hash: Hash256) {
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        self.shared.start_block_request(epoch, peer, hash);
    }

    /// Requests the matched transactions of `block` unless it already has a
    /// group. Blocks while every group slot is taken.
    pub fn start_block_txs_request(&self, peer: &H::Peer, block: MerkleBlock, txids: Vec<Hash256>) {
        let epoch = self.shared.epoch.load(Ordering::Acquire);
        self.shared.start_block_txs_request(epoch, peer, block, txids);
    }

    /// Handles a filtered block from the network. Never blocks on a slot.
    pub fn on_block_received(&self, block: MerkleBlock, txids: Vec<Hash256>) {
        self.shared.on_block_received(block, txids);
    }

    pub fn on_tx_received(&self, tx: Transaction) -> Result<(), RequestError> {
        self.shared.on_tx_received(tx)
    }

    /// Whether any stage still holds work.
    pub fn is_running(&self) -> bool {
        !self.shared.intake.is_empty()
            || self.shared.block_stage.in_use() > 0
            || self.shared.group_stage.in_use() > 0
    }

    pub fn pending_blocks(&self) -> usize {
        lock(&self.shared.blocks).len()
    }

    pub fn pending_groups(&self) -> usize {
        lock(&self.shared.groups).pending.len()
    }

    /// Drops queued hashes and cancels every pending block request and
    /// transaction group. The finished pool is left as is.
    pub fn clear(&self) {
        self.shared.clear();
    }
}

impl<H: RequestQueueHandler> Drop for RequestQueue<H> {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.intake.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<H: RequestQueueHandler> Shared<H> {
    fn run(&self) {
        for (epoch, hash) in self.intake.iter() {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let peer = lock(&self.peer).clone();
            let Some(peer) = peer else {
                spvd_log::log_warn!("no active peer for block {}", hash256_to_hex(&hash));
                continue;
            };
            self.start_block_request(epoch, &peer, hash);
        }
    }

    fn stale(&self, epoch: u64) -> bool {
        self.shutdown.load(Ordering::Acquire) || self.epoch.load(Ordering::Acquire) != epoch
    }

    fn start_block_request(&self, epoch: u64, peer: &H::Peer, hash: Hash256) {
        loop {
            {
                let mut blocks = lock(&self.blocks);
                if self.stale(epoch) || blocks.contains_key(&hash) {
                    return;
                }
                if self.block_stage.try_take(hash) {
                    let mut request = Request::new(RequestKind::Block, hash);
                    self.start(&mut request, peer);
                    blocks.insert(
                        hash,
                        PendingBlock {
                            peer: peer.clone(),
                            request,
                        },
                    );
                    return;
                }
            }
            self.block_stage.wait_freed();
        }
    }

    fn start_block_txs_request(
        &self,
        epoch: u64,
        peer: &H::Peer,
        block: MerkleBlock,
        txids: Vec<Hash256>,
    ) {
        let hash = block.block_hash();
        loop {
            {
                let mut groups = lock(&self.groups);
                if self.stale(epoch) || groups.has_group(&hash) {
                    return;
                }
                if self.group_stage.try_take(hash) {
                    self.register_group(&mut groups, peer, block, txids);
                    return;
                }
            }
            self.group_stage.wait_freed();
        }
    }

    fn start(&self, request: &mut Request, peer: &H::Peer) {
        let handler = Arc::clone(&self.handler);
        request.start(
            |kind, hash| self.handler.on_send_request(peer, kind, hash),
            self.timer.handle(),
            self.timeout,
            move |kind, hash| {
                spvd_log::log_warn!("{} request {} timed out", kind, hash256_to_hex(&hash));
                handler.on_request_error(RequestError::Timeout { kind, hash });
            },
        );
    }

    fn register_group(
        &self,
        groups: &mut Groups<H::Peer>,
        peer: &H::Peer,
        block: MerkleBlock,
        txids: Vec<Hash256>,
    ) {
        let block_hash = block.block_hash();
        let mut requests = HashMap::with_capacity(txids.len());
        for txid in &txids {
            if requests.contains_key(txid) {
                continue;
            }
            groups.tx_index.insert(*txid, block_hash);
            let mut request = Request::new(RequestKind::Transaction, *txid);
            self.start(&mut request, peer);
            requests.insert(*txid, request);
        }
        groups
            .pending
            .insert(block_hash, BlockTxsRequest::new(block, txids, requests));
    }

    fn on_block_received(&self, block: MerkleBlock, txids: Vec<Hash256>) {
        let hash = block.block_hash();
        let (peer, epoch) = {
            let mut blocks = lock(&self.blocks);
            let Some(mut pending) = blocks.remove(&hash) else {
                spvd_log::log_warn!("unknown block received: {}", hash256_to_hex(&hash));
                return;
            };
            pending.request.finish();
            if txids.is_empty() {
                self.block_stage.release();
            }
            (pending.peer, self.epoch.load(Ordering::Acquire))
        };

        if txids.is_empty() {
            self.complete(BlockTxsRequest::without_transactions(block));
            return;
        }

        {
            let mut groups = lock(&self.groups);
            if self.stale(epoch) {
                return;
            }
            if !groups.has_group(&hash) {
                if !self.group_stage.try_take(hash) {
                    spvd_log::log_debug!(
                        "transaction group slots full, deferring block {}",
                        hash256_to_hex(&hash)
                    );
                    groups.deferred.push_back(DeferredGroup {
                        peer,
                        block,
                        txids,
                        epoch,
                    });
                    return;
                }
                self.register_group(&mut groups, &peer, block, txids);
            }
        }
        self.release_block_slot(epoch);
    }

    /// Gives back a block slot taken in `epoch`. A `clear` since then has
    /// already drained it.
    fn release_block_slot(&self, epoch: u64) {
        let _blocks = lock(&self.blocks);
        if self.epoch.load(Ordering::Acquire) == epoch {
            self.block_stage.release();
        }
    }

    fn on_tx_received(&self, tx: Transaction) -> Result<(), RequestError> {
        let txid = tx.txid();
        let (completed, promoted) = {
            let mut groups = lock(&self.groups);
            let Some(block_hash) = groups.tx_index.remove(&txid) else {
                spvd_log::log_warn!("unknown transaction received: {}", hash256_to_hex(&txid));
                return Ok(());
            };
            let Some(group) = groups.pending.get_mut(&block_hash) else {
                return Err(RequestError::UnknownGroup(block_hash));
            };
            if !group.on_tx_received(tx)? {
                return Ok(());
            }
            let completed = groups.pending.remove(&block_hash);
            self.group_stage.release();
            let promoted = self.promote_deferred(&mut groups);
            (completed, promoted)
        };

        for epoch in promoted {
            self.release_block_slot(epoch);
        }
        if let Some(group) = completed {
            self.complete(group);
        }
        Ok(())
    }

    /// Moves deferred blocks into free group slots. Returns the epochs of the
    /// block slots they held, to be released once the group lock is dropped.
    fn promote_deferred(&self, groups: &mut Groups<H::Peer>) -> Vec<u64> {
        let mut promoted = Vec::new();
        while let Some(next) = groups.deferred.pop_front() {
            let hash = next.block.block_hash();
            if groups.pending.contains_key(&hash) {
                promoted.push(next.epoch);
                continue;
            }
            if !self.group_stage.try_take(hash) {
                groups.deferred.push_front(next);
                break;
            }
            promoted.push(next.epoch);
            self.register_group(groups, &next.peer, next.block, next.txids);
        }
        promoted
    }

    fn complete(&self, request: BlockTxsRequest) {
        let mut pool = lock(&self.finished);
        pool.add(request);
        self.handler.on_request_finished(&mut pool);
    }

    fn clear(&self) {
        while self.intake.try_recv().is_ok() {}

        {
            let mut blocks = lock(&self.blocks);
            self.epoch.fetch_add(1, Ordering::AcqRel);
            self.block_stage.drain();
            for (_, mut pending) in blocks.drain() {
                pending.request.finish();
            }
        }

        {
            let mut groups = lock(&self.groups);
            self.group_stage.drain();
            for (_, mut group) in groups.pending.drain() {
                group.finish();
            }
            groups.tx_index.clear();
            groups.deferred.clear();
        }
        spvd_log::log_debug!("request queue cleared");
    }
}

impl<P> Groups<P> {
    fn has_group(&self, hash: &Hash256) -> bool {
        self.pending.contains_key(hash)
            || self
                .deferred
                .iter()
                .any(|deferred| &deferred.block.block_hash() == hash)
    }
}

/// Request maps stay usable after a handler panic poisoned their lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
