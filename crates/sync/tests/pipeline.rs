use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use spvd_chain::{Blockchain, KvDataStore, KvHeaders, NoopListener, Proof};
use spvd_consensus::{chain_params, Hash256, Network};
use spvd_primitives::address::{program_hash, ProgramHash, PREFIX_STANDARD};
use spvd_primitives::block::BlockHeader;
use spvd_primitives::merkleblock::{merkle_root, MerkleBlock};
use spvd_primitives::outpoint::OutPoint;
use spvd_primitives::transaction::{Transaction, TxIn, TxOut, TRANSFER_ASSET_TX_TYPE};
use spvd_storage::memory::MemoryStore;
use spvd_sync::{
    FinishedReqPool, RequestError, RequestKind, RequestQueue, RequestQueueHandler, SyncConfig,
};

type MemoryChain = Blockchain<KvHeaders<Arc<MemoryStore>>, KvDataStore<Arc<MemoryStore>>>;

/// Commits finished units in chain order as soon as they connect to the tip.
struct ChainFeeder {
    chain: Arc<MemoryChain>,
    sent: Sender<(RequestKind, Hash256)>,
    errors: Sender<RequestError>,
    committed: Sender<(u32, usize)>,
}

impl RequestQueueHandler for ChainFeeder {
    type Peer = u8;

    fn on_send_request(&self, _peer: &u8, kind: RequestKind, hash: &Hash256) {
        let _ = self.sent.send((kind, *hash));
    }

    fn on_request_error(&self, error: RequestError) {
        let _ = self.errors.send(error);
    }

    fn on_request_finished(&self, pool: &mut FinishedReqPool) {
        loop {
            let tip = self.chain.chain_tip().hash();
            let Some(unit) = pool.next(&tip) else {
                break;
            };
            let (block, txns) = unit.into_parts();
            let proof = Proof::from_merkle_block(&block);
            let height = block.header.height;
            let false_positives = self
                .chain
                .commit_block(block.header, proof, txns)
                .expect("commit");
            let _ = self.committed.send((height, false_positives));
        }
    }
}

fn wallet() -> ProgramHash {
    program_hash(PREFIX_STANDARD, b"pipeline-wallet")
}

fn payment(from: OutPoint, to: ProgramHash, value: i64) -> Transaction {
    Transaction {
        tx_type: TRANSFER_ASSET_TX_TYPE,
        inputs: vec![TxIn {
            previous: from,
            sequence: 0,
        }],
        outputs: vec![TxOut {
            asset_id: [0xa1; 32],
            value,
            output_lock: 0,
            program_hash: to,
        }],
        ..Transaction::default()
    }
}

fn filtered(previous: Hash256, height: u32, txs: &[Transaction], matches: &[bool]) -> MerkleBlock {
    let txids: Vec<Hash256> = txs.iter().map(Transaction::txid).collect();
    let header = BlockHeader {
        previous,
        height,
        merkle_root: merkle_root(&txids),
        ..BlockHeader::default()
    };
    MerkleBlock::from_txids(header, &txids, matches).expect("merkle block")
}

#[test]
fn completed_units_commit_in_chain_order() {
    let chain: Arc<MemoryChain> = Arc::new(
        Blockchain::open(
            Arc::new(MemoryStore::new()),
            Arc::new(NoopListener),
            chain_params(Network::Regtest),
        )
        .expect("chain"),
    );
    chain.add_address(&wallet()).expect("address");
    let genesis = BlockHeader::default();
    chain
        .commit_block(genesis.clone(), Proof::default(), Vec::new())
        .expect("genesis");

    let merchant = program_hash(PREFIX_STANDARD, b"merchant");
    let noise = |tag: u8| payment(OutPoint::new([tag; 32], 0), merchant, 1);
    let incoming = payment(OutPoint::new([0x70; 32], 2), wallet(), 900);
    let outgoing = payment(OutPoint::new(incoming.txid(), 0), merchant, 899);

    let first = filtered(genesis.hash(), 1, &[noise(1)], &[false]);
    let second = filtered(
        first.block_hash(),
        2,
        &[incoming.clone(), noise(2)],
        &[true, false],
    );
    let third = filtered(second.block_hash(), 3, &[outgoing.clone()], &[true]);

    let blocks: HashMap<Hash256, MerkleBlock> = [&first, &second, &third]
        .into_iter()
        .map(|block| (block.block_hash(), block.clone()))
        .collect();
    let txs: HashMap<Hash256, Transaction> = [&incoming, &outgoing]
        .into_iter()
        .map(|tx| (tx.txid(), tx.clone()))
        .collect();

    let (sent_tx, sent_rx) = unbounded();
    let (errors_tx, errors_rx) = unbounded();
    let (committed_tx, committed_rx) = unbounded();
    let mut config = SyncConfig::for_network(Network::Regtest);
    config.request_timeout = Duration::from_secs(60);
    let queue = RequestQueue::with_config(
        &config,
        ChainFeeder {
            chain: Arc::clone(&chain),
            sent: sent_tx,
            errors: errors_tx,
            committed: committed_tx,
        },
    )
    .expect("queue");
    assert_eq!(queue.size(), 2);

    queue.push_hashes(
        7,
        &[first.block_hash(), second.block_hash(), third.block_hash()],
    );

    let mut committed = Vec::new();
    while committed.len() < 3 {
        let (kind, hash) = sent_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("request");
        match kind {
            RequestKind::Block => {
                let block = blocks.get(&hash).expect("requested block").clone();
                let matched = block.matched_txids().expect("matched txids");
                queue.on_block_received(block, matched);
            }
            RequestKind::Transaction => {
                let tx = txs.get(&hash).expect("requested tx").clone();
                queue.on_tx_received(tx).expect("tx receipt");
            }
        }
        committed.extend(committed_rx.try_iter());
    }

    assert_eq!(committed, vec![(1, 0), (2, 0), (3, 0)]);
    assert!(!queue.is_running());
    assert!(errors_rx.try_recv().is_err());

    assert_eq!(chain.height(), 3);
    assert_eq!(chain.chain_tip(), third.header);
    assert!(chain.utxos().expect("utxos").is_empty());
    let stxos = chain.stxos().expect("stxos");
    assert_eq!(stxos.len(), 1);
    assert_eq!(stxos[0].spend_txid, outgoing.txid());
    assert_eq!(stxos[0].spend_height, 3);
    assert_eq!(
        chain.proof(&second.block_hash()).expect("proof"),
        Some(Proof::from_merkle_block(&second))
    );
}
