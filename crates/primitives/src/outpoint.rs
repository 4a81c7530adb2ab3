//! Transaction outpoint type.

use spvd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

pub const OUTPOINT_KEY_LEN: usize = 34;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u16,
}

impl OutPoint {
    pub fn new(hash: Hash256, index: u16) -> Self {
        Self { hash, index }
    }

    /// Fixed-width key: txid followed by the little-endian index. This is also
    /// the byte string inserted into bloom filters.
    pub fn to_key(&self) -> [u8; OUTPOINT_KEY_LEN] {
        let mut key = [0u8; OUTPOINT_KEY_LEN];
        key[..32].copy_from_slice(&self.hash);
        key[32..].copy_from_slice(&self.index.to_le_bytes());
        key
    }

    pub fn from_key(key: &[u8]) -> Result<Self, DecodeError> {
        if key.len() != OUTPOINT_KEY_LEN {
            return Err(DecodeError::InvalidData("outpoint key length"));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&key[..32]);
        Ok(Self {
            hash,
            index: u16::from_le_bytes([key[32], key[33]]),
        })
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.hash);
        encoder.write_u16_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash_le()?;
        let index = decoder.read_u16_le()?;
        Ok(Self { hash, index })
    }
}
