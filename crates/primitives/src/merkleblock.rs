//! Filtered blocks: a header plus a partial merkle tree proving which of the
//! block's transactions matched the peer's bloom filter.

use spvd_consensus::constants::MAX_BLOCK_SIZE;
use spvd_consensus::Hash256;

use crate::block::BlockHeader;
use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;

const MIN_SERIALIZED_TX_SIZE: u32 = 60;
const MAX_TRANSACTIONS: u32 = MAX_BLOCK_SIZE / MIN_SERIALIZED_TX_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    NoTransactions,
    TooManyTransactions,
    LengthMismatch,
    /// Flag bits or hashes ran out, or were left over, while walking the tree.
    Malformed,
    /// Two identical sibling hashes (CVE-2012-2459 style duplication).
    DuplicateSibling,
    RootMismatch,
}

impl std::fmt::Display for MerkleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MerkleError::NoTransactions => write!(f, "merkle tree has no transactions"),
            MerkleError::TooManyTransactions => write!(f, "merkle tree has too many transactions"),
            MerkleError::LengthMismatch => write!(f, "txids and match flags differ in length"),
            MerkleError::Malformed => write!(f, "malformed partial merkle tree"),
            MerkleError::DuplicateSibling => write!(f, "duplicate sibling hash in merkle tree"),
            MerkleError::RootMismatch => write!(f, "merkle root does not match header"),
        }
    }
}

impl std::error::Error for MerkleError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialMerkleTree {
    pub n_transactions: u32,
    pub hashes: Vec<Hash256>,
    /// Depth-first traversal flags, one per visited node.
    pub flags: Vec<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleBlock {
    pub header: BlockHeader,
    pub tree: PartialMerkleTree,
}

impl MerkleBlock {
    /// Builds the filtered view of a block whose transactions are `txids`,
    /// revealing the ones flagged in `matches`.
    pub fn from_txids(
        header: BlockHeader,
        txids: &[Hash256],
        matches: &[bool],
    ) -> Result<Self, MerkleError> {
        let tree = PartialMerkleTree::from_txids(txids, matches)?;
        Ok(Self { header, tree })
    }

    pub fn block_hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Txids proven by the tree, in block order, after checking the computed
    /// root against the header.
    pub fn matched_txids(&self) -> Result<Vec<Hash256>, MerkleError> {
        let (root, matched) = self.tree.extract_matches()?;
        if root != self.header.merkle_root {
            return Err(MerkleError::RootMismatch);
        }
        Ok(matched)
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }
}

impl Encodable for MerkleBlock {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        Encodable::consensus_encode(&self.header, encoder);
        self.tree.consensus_encode(encoder);
    }
}

impl Decodable for MerkleBlock {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = <BlockHeader as Decodable>::consensus_decode(decoder)?;
        let tree = PartialMerkleTree::consensus_decode(decoder)?;
        Ok(Self { header, tree })
    }
}

/// Node counts per level of a merkle tree over `n_transactions` leaves.
#[derive(Clone, Copy)]
struct Shape {
    n_transactions: u32,
}

impl Shape {
    fn width(self, height: u32) -> u32 {
        let n = u64::from(self.n_transactions);
        ((n + (1u64 << height) - 1) >> height) as u32
    }

    fn root_height(self) -> u32 {
        let mut height = 0;
        while self.width(height) > 1 {
            height += 1;
        }
        height
    }

    fn has_right(self, height: u32, pos: u32) -> bool {
        pos * 2 + 1 < self.width(height - 1)
    }
}

impl PartialMerkleTree {
    pub fn from_txids(txids: &[Hash256], matches: &[bool]) -> Result<Self, MerkleError> {
        if txids.len() != matches.len() {
            return Err(MerkleError::LengthMismatch);
        }
        if txids.is_empty() {
            return Err(MerkleError::NoTransactions);
        }
        let n_transactions =
            u32::try_from(txids.len()).map_err(|_| MerkleError::TooManyTransactions)?;
        if n_transactions > MAX_TRANSACTIONS {
            return Err(MerkleError::TooManyTransactions);
        }

        let mut tree = Self {
            n_transactions,
            hashes: Vec::new(),
            flags: Vec::new(),
        };
        let shape = Shape { n_transactions };
        tree.build(shape, shape.root_height(), 0, txids, matches);
        Ok(tree)
    }

    /// Returns the computed merkle root and the matched txids.
    pub fn extract_matches(&self) -> Result<(Hash256, Vec<Hash256>), MerkleError> {
        if self.n_transactions == 0 {
            return Err(MerkleError::NoTransactions);
        }
        if self.n_transactions > MAX_TRANSACTIONS {
            return Err(MerkleError::TooManyTransactions);
        }
        if self.hashes.len() > self.n_transactions as usize || self.flags.len() < self.hashes.len()
        {
            return Err(MerkleError::Malformed);
        }

        let shape = Shape {
            n_transactions: self.n_transactions,
        };
        let mut walk = Extraction {
            tree: self,
            shape,
            flags_used: 0,
            hashes_used: 0,
            matched: Vec::new(),
        };
        let root = walk.visit(shape.root_height(), 0)?;

        if (walk.flags_used + 7) / 8 != (self.flags.len() + 7) / 8
            || walk.hashes_used != self.hashes.len()
        {
            return Err(MerkleError::Malformed);
        }
        Ok((root, walk.matched))
    }

    fn build(&mut self, shape: Shape, height: u32, pos: u32, txids: &[Hash256], matches: &[bool]) {
        let start = (pos as usize) << height;
        let end = ((pos as usize + 1) << height).min(txids.len());
        let parent_of_match = matches[start..end].iter().any(|matched| *matched);
        self.flags.push(parent_of_match);

        if height == 0 || !parent_of_match {
            self.hashes.push(subtree_hash(shape, height, pos, txids));
            return;
        }
        self.build(shape, height - 1, pos * 2, txids, matches);
        if shape.has_right(height, pos) {
            self.build(shape, height - 1, pos * 2 + 1, txids, matches);
        }
    }
}

struct Extraction<'a> {
    tree: &'a PartialMerkleTree,
    shape: Shape,
    flags_used: usize,
    hashes_used: usize,
    matched: Vec<Hash256>,
}

impl Extraction<'_> {
    fn visit(&mut self, height: u32, pos: u32) -> Result<Hash256, MerkleError> {
        let parent_of_match = *self
            .tree
            .flags
            .get(self.flags_used)
            .ok_or(MerkleError::Malformed)?;
        self.flags_used += 1;

        if height == 0 || !parent_of_match {
            let hash = *self
                .tree
                .hashes
                .get(self.hashes_used)
                .ok_or(MerkleError::Malformed)?;
            self.hashes_used += 1;
            if height == 0 && parent_of_match {
                self.matched.push(hash);
            }
            return Ok(hash);
        }

        let left = self.visit(height - 1, pos * 2)?;
        let right = if self.shape.has_right(height, pos) {
            let right = self.visit(height - 1, pos * 2 + 1)?;
            if right == left {
                return Err(MerkleError::DuplicateSibling);
            }
            right
        } else {
            left
        };
        Ok(hash_pair(&left, &right))
    }
}

fn subtree_hash(shape: Shape, height: u32, pos: u32, txids: &[Hash256]) -> Hash256 {
    if height == 0 {
        return txids[pos as usize];
    }
    let left = subtree_hash(shape, height - 1, pos * 2, txids);
    let right = if shape.has_right(height, pos) {
        subtree_hash(shape, height - 1, pos * 2 + 1, txids)
    } else {
        left
    };
    hash_pair(&left, &right)
}

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

/// Merkle root over a full list of txids, duplicating the last node of odd
/// levels.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return [0u8; 32];
    }
    let mut level = txids.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level[0]
}

impl Encodable for PartialMerkleTree {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.n_transactions);
        encoder.write_hashes(&self.hashes);

        let mut flag_bytes = vec![0u8; (self.flags.len() + 7) / 8];
        for (idx, _) in self.flags.iter().enumerate().filter(|(_, flag)| **flag) {
            flag_bytes[idx / 8] |= 1u8 << (idx % 8);
        }
        encoder.write_var_bytes(&flag_bytes);
    }
}

impl Decodable for PartialMerkleTree {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let n_transactions = decoder.read_u32_le()?;
        if n_transactions > MAX_TRANSACTIONS {
            return Err(DecodeError::InvalidData("too many transactions in merkle tree"));
        }
        let hashes = decoder.read_hashes()?;
        if hashes.len() > n_transactions as usize {
            return Err(DecodeError::InvalidData("too many hashes in merkle tree"));
        }
        let flag_bytes = decoder.read_var_bytes()?;
        if flag_bytes.len() > (n_transactions as usize * 2 + 7) / 8 {
            return Err(DecodeError::InvalidData("too many flag bytes in merkle tree"));
        }
        let flags = flag_bytes
            .iter()
            .flat_map(|byte| (0..8u8).map(move |bit| byte & (1u8 << bit) != 0))
            .collect();
        Ok(Self {
            n_transactions,
            hashes,
            flags,
        })
    }
}
