//! Wire types for the SPV client: transactions, aux-pow headers, merkle
//! blocks and the bloom filter a wallet loads into its peer.

pub mod address;
pub mod block;
pub mod bloom;
pub mod encoding;
pub mod hash;
pub mod merkleblock;
pub mod outpoint;
pub mod transaction;

pub use address::{program_hash, program_hash_to_hex, ProgramHash};
pub use block::{AuxPow, BlockHeader, ParentBlockHeader};
pub use bloom::BloomFilter;
pub use hash::{hash160, hash256_to_hex, sha256, sha256d};
pub use merkleblock::{MerkleBlock, MerkleError, PartialMerkleTree};
pub use outpoint::OutPoint;
pub use transaction::{Program, Transaction, TxAttribute, TxIn, TxOut};
