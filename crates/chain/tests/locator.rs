use std::sync::Arc;

use spvd_chain::{Blockchain, KvDataStore, KvHeaders, NoopListener, Proof};
use spvd_consensus::constants::MAX_BLOCK_LOCATOR_HASHES;
use spvd_consensus::{chain_params, Hash256, Network};
use spvd_primitives::block::BlockHeader;
use spvd_storage::memory::MemoryStore;

type MemoryChain = Blockchain<KvHeaders<Arc<MemoryStore>>, KvDataStore<Arc<MemoryStore>>>;

fn build(tip_height: u32) -> (MemoryChain, Vec<Hash256>) {
    let chain = Blockchain::open(
        Arc::new(MemoryStore::new()),
        Arc::new(NoopListener),
        chain_params(Network::Regtest),
    )
    .expect("open");
    let mut hashes = Vec::new();
    let mut previous = [0u8; 32];
    for height in 0..=tip_height {
        let block = BlockHeader {
            previous,
            height,
            timestamp: height,
            ..BlockHeader::default()
        };
        previous = block.hash();
        hashes.push(previous);
        chain
            .commit_block(block, Proof::default(), Vec::new())
            .expect("commit");
    }
    (chain, hashes)
}

fn heights(locator: &[Hash256], hashes: &[Hash256]) -> Vec<usize> {
    locator
        .iter()
        .map(|hash| hashes.iter().position(|known| known == hash).expect("known hash"))
        .collect()
}

#[test]
fn locator_doubles_step_every_nine_hashes() {
    let (chain, hashes) = build(299);
    let locator = chain.block_locator_hashes();
    let found = heights(&locator, &hashes);

    assert_eq!(found[0], 299);
    assert_eq!(found.len(), 46);
    assert_eq!(*found.last().expect("last"), 20);

    let gaps: Vec<usize> = found.windows(2).map(|pair| pair[0] - pair[1]).collect();
    let mut expected = Vec::new();
    for step in [1, 2, 4, 8, 16] {
        expected.extend(std::iter::repeat(step).take(9));
    }
    assert_eq!(gaps, expected);
}

#[test]
fn short_chain_locator_lists_every_block() {
    let (chain, hashes) = build(5);
    let locator = chain.block_locator_hashes();
    let expected: Vec<Hash256> = hashes.iter().rev().copied().collect();
    assert_eq!(locator, expected);
}

#[test]
fn locator_is_bounded_and_unique() {
    let (chain, hashes) = build(600);
    let locator = chain.block_locator_hashes();
    assert!(locator.len() <= MAX_BLOCK_LOCATOR_HASHES);
    assert_eq!(locator[0], chain.chain_tip().hash());

    let found = heights(&locator, &hashes);
    assert!(found.windows(2).all(|pair| pair[0] > pair[1]));
}
