//! Completed units waiting for the chain to consume them.
//!
//! The queue only ever adds. Units are keyed by the previous hash of their
//! block, so a consumer at tip `T` asks for `next(T)` and walks forward
//! regardless of the order in which units completed.

use std::collections::HashMap;

use spvd_consensus::Hash256;
use spvd_primitives::hash::hash256_to_hex;

use crate::block_txs::BlockTxsRequest;

#[derive(Debug, Default)]
pub struct FinishedReqPool {
    requests: HashMap<Hash256, BlockTxsRequest>,
}

impl FinishedReqPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, request: BlockTxsRequest) {
        let previous = request.block().header.previous;
        if let Some(replaced) = self.requests.insert(previous, request) {
            spvd_log::log_debug!(
                "finished block {} replaced a sibling on parent {}",
                hash256_to_hex(&replaced.block_hash()),
                hash256_to_hex(&previous)
            );
        }
    }

    /// Takes the unit whose block builds on `tip_hash`.
    pub fn next(&mut self, tip_hash: &Hash256) -> Option<BlockTxsRequest> {
        self.requests.remove(tip_hash)
    }

    pub fn contains(&self, block_hash: &Hash256) -> bool {
        self.requests
            .values()
            .any(|request| &request.block_hash() == block_hash)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn drain(&mut self) -> Vec<BlockTxsRequest> {
        self.requests.drain().map(|(_, request)| request).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spvd_primitives::block::BlockHeader;
    use spvd_primitives::merkleblock::MerkleBlock;

    fn unit(previous: Hash256, height: u32) -> BlockTxsRequest {
        let header = BlockHeader {
            previous,
            height,
            ..BlockHeader::default()
        };
        let block = MerkleBlock::from_txids(header, &[[height as u8; 32]], &[false]).expect("block");
        BlockTxsRequest::without_transactions(block)
    }

    #[test]
    fn walks_forward_from_tip() {
        let first = unit([0u8; 32], 1);
        let second = unit(first.block_hash(), 2);
        let third = unit(second.block_hash(), 3);
        let hashes = [first.block_hash(), second.block_hash(), third.block_hash()];

        let mut pool = FinishedReqPool::new();
        pool.add(third);
        pool.add(first);
        pool.add(second);
        assert_eq!(pool.len(), 3);
        assert!(pool.contains(&hashes[1]));

        let mut tip = [0u8; 32];
        let mut walked = Vec::new();
        while let Some(next) = pool.next(&tip) {
            tip = next.block_hash();
            walked.push(tip);
        }
        assert_eq!(walked, hashes.to_vec());
        assert!(pool.is_empty());
    }

    #[test]
    fn next_on_unknown_tip_leaves_pool_untouched() {
        let mut pool = FinishedReqPool::new();
        pool.add(unit([5u8; 32], 1));
        assert!(pool.next(&[6u8; 32]).is_none());
        assert_eq!(pool.drain().len(), 1);
        assert!(pool.is_empty());
    }
}
