//! Merge-mined block headers.
//!
//! A header carries the aux-pow proof that ties it to a parent-chain block.
//! The header hash covers only the native fields; proof-of-work is checked
//! against the parent block's hash.

use spvd_consensus::Hash256;

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;

pub const PARENT_HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParentBlockHeader {
    pub version: i32,
    pub previous: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl ParentBlockHeader {
    pub fn hash(&self) -> Hash256 {
        sha256d(&encode(self))
    }
}

impl Encodable for ParentBlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.previous);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.timestamp);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for ParentBlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            previous: decoder.read_hash_le()?,
            merkle_root: decoder.read_hash_le()?,
            timestamp: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuxPow {
    pub aux_merkle_branch: Vec<Hash256>,
    pub aux_merkle_index: i32,
    /// Raw parent-chain coinbase transaction committing to this chain.
    pub parent_coinbase: Vec<u8>,
    pub parent_coinbase_merkle: Vec<Hash256>,
    pub parent_merkle_index: i32,
    pub parent_header: ParentBlockHeader,
    pub parent_hash: Hash256,
}

impl AuxPow {
    pub fn parent_block_hash(&self) -> Hash256 {
        self.parent_header.hash()
    }
}

impl Encodable for AuxPow {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_bytes(&self.parent_coinbase);
        encoder.write_hash_le(&self.parent_hash);
        encoder.write_hashes(&self.parent_coinbase_merkle);
        encoder.write_i32_le(self.parent_merkle_index);
        encoder.write_hashes(&self.aux_merkle_branch);
        encoder.write_i32_le(self.aux_merkle_index);
        self.parent_header.consensus_encode(encoder);
    }
}

impl Decodable for AuxPow {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let parent_coinbase = decoder.read_var_bytes()?;
        let parent_hash = decoder.read_hash_le()?;
        let parent_coinbase_merkle = decoder.read_hashes()?;
        let parent_merkle_index = decoder.read_i32_le()?;
        let aux_merkle_branch = decoder.read_hashes()?;
        let aux_merkle_index = decoder.read_i32_le()?;
        let parent_header = ParentBlockHeader::consensus_decode(decoder)?;
        Ok(Self {
            aux_merkle_branch,
            aux_merkle_index,
            parent_coinbase,
            parent_coinbase_merkle,
            parent_merkle_index,
            parent_header,
            parent_hash,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub previous: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: u32,
    pub aux_pow: AuxPow,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash256 {
        let mut encoder = Encoder::with_capacity(88);
        self.encode_native(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    fn encode_native(&self, encoder: &mut Encoder) {
        encoder.write_u32_le(self.version);
        encoder.write_hash_le(&self.previous);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.timestamp);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        encoder.write_u32_le(self.height);
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.encode_native(encoder);
        self.aux_pow.consensus_encode(encoder);
        // Trailing marker byte; always 1 on the wire.
        encoder.write_u8(1);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_u32_le()?;
        let previous = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let timestamp = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        let height = decoder.read_u32_le()?;
        let aux_pow = AuxPow::consensus_decode(decoder)?;
        if decoder.read_u8()? != 1 {
            return Err(DecodeError::InvalidData("bad header marker"));
        }
        Ok(Self {
            version,
            previous,
            merkle_root,
            timestamp,
            bits,
            nonce,
            height,
            aux_pow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BlockHeader {
        BlockHeader {
            version: 0,
            previous: [1u8; 32],
            merkle_root: [2u8; 32],
            timestamp: 1_500_000_000,
            bits: 0x1d00ffff,
            nonce: 42,
            height: 7,
            aux_pow: AuxPow {
                aux_merkle_branch: vec![[4u8; 32]],
                aux_merkle_index: 0,
                parent_coinbase: vec![0xde, 0xad],
                parent_coinbase_merkle: vec![[5u8; 32], [6u8; 32]],
                parent_merkle_index: 0,
                parent_header: ParentBlockHeader {
                    version: 0x2000_0000,
                    bits: 0x1d00ffff,
                    ..ParentBlockHeader::default()
                },
                parent_hash: [7u8; 32],
            },
        }
    }

    #[test]
    fn parent_header_is_eighty_bytes() {
        assert_eq!(encode(&ParentBlockHeader::default()).len(), PARENT_HEADER_SIZE);
    }

    #[test]
    fn hash_excludes_aux_pow() {
        let original = header();
        let mut altered = original.clone();
        altered.aux_pow.parent_header.nonce = 99;
        assert_eq!(original.hash(), altered.hash());
        assert_ne!(
            original.aux_pow.parent_block_hash(),
            altered.aux_pow.parent_block_hash()
        );

        altered.height += 1;
        assert_ne!(original.hash(), altered.hash());
    }

    #[test]
    fn header_round_trips() {
        let original = header();
        let bytes = original.consensus_encode();
        assert_eq!(BlockHeader::consensus_decode(&bytes).expect("decode"), original);

        let mut bad_marker = bytes.clone();
        if let Some(last) = bad_marker.last_mut() {
            *last = 0;
        }
        assert!(BlockHeader::consensus_decode(&bad_marker).is_err());
    }
}
