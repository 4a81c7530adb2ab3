//! Wallet records and their storage encodings.

use spvd_consensus::Hash256;
use spvd_primitives::address::ProgramHash;
use spvd_primitives::encoding::{DecodeError, Decoder, Encoder};
use spvd_primitives::merkleblock::{MerkleBlock, PartialMerkleTree};
use spvd_primitives::outpoint::OutPoint;
use spvd_primitives::transaction::{Transaction, TxIn};

/// An output paying a watched address that has not been spent yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: i64,
    /// Height before which the output may not be spent (coinbase maturity).
    pub lock_time: u32,
    pub at_height: u32,
    pub address: ProgramHash,
}

impl Utxo {
    /// Input spending this output; the sequence carries the lock time.
    pub fn to_input(&self) -> TxIn {
        TxIn {
            previous: self.outpoint,
            sequence: self.lock_time,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(73);
        self.encode_into(&mut encoder);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let utxo = Self::decode_from(&mut decoder)?;
        finish(&decoder)?;
        Ok(utxo)
    }

    fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_bytes(&self.outpoint.to_key());
        encoder.write_i64_le(self.value);
        encoder.write_u32_le(self.lock_time);
        encoder.write_u32_le(self.at_height);
        encoder.write_bytes(&self.address);
    }

    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let outpoint = OutPoint::from_key(&decoder.read_fixed::<34>()?)?;
        Ok(Self {
            outpoint,
            value: decoder.read_i64_le()?,
            lock_time: decoder.read_u32_le()?,
            at_height: decoder.read_u32_le()?,
            address: decoder.read_fixed()?,
        })
    }
}

/// A wallet output that has been spent, kept so a rollback can restore it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stxo {
    pub utxo: Utxo,
    pub spend_txid: Hash256,
    pub spend_height: u32,
}

impl Stxo {
    pub fn outpoint(&self) -> &OutPoint {
        &self.utxo.outpoint
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(109);
        self.utxo.encode_into(&mut encoder);
        encoder.write_hash_le(&self.spend_txid);
        encoder.write_u32_le(self.spend_height);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let utxo = Utxo::decode_from(&mut decoder)?;
        let spend_txid = decoder.read_hash_le()?;
        let spend_height = decoder.read_u32_le()?;
        finish(&decoder)?;
        Ok(Self {
            utxo,
            spend_txid,
            spend_height,
        })
    }
}

/// A committed wallet transaction in its unsigned serialization.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Txn {
    pub txid: Hash256,
    pub height: u32,
    pub raw: Vec<u8>,
}

impl Txn {
    pub fn from_transaction(tx: &Transaction, height: u32) -> Self {
        Self {
            txid: tx.txid(),
            height,
            raw: tx.serialize_unsigned(),
        }
    }

    pub fn transaction(&self) -> Result<Transaction, DecodeError> {
        Transaction::deserialize_unsigned(&self.raw)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(40 + self.raw.len());
        encoder.write_hash_le(&self.txid);
        encoder.write_u32_le(self.height);
        encoder.write_var_bytes(&self.raw);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let txid = decoder.read_hash_le()?;
        let height = decoder.read_u32_le()?;
        let raw = decoder.read_var_bytes()?;
        finish(&decoder)?;
        Ok(Self { txid, height, raw })
    }
}

/// Merkle proof of the wallet transactions in one block.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Proof {
    pub block_hash: Hash256,
    pub height: u32,
    pub transactions: u32,
    pub hashes: Vec<Hash256>,
    /// Traversal flags packed eight per byte, least significant bit first.
    pub flags: Vec<u8>,
}

impl Proof {
    pub fn from_merkle_block(block: &MerkleBlock) -> Self {
        let mut flags = vec![0u8; (block.tree.flags.len() + 7) / 8];
        for (idx, _) in block.tree.flags.iter().enumerate().filter(|(_, flag)| **flag) {
            flags[idx / 8] |= 1 << (idx % 8);
        }
        Self {
            block_hash: block.block_hash(),
            height: block.header.height,
            transactions: block.tree.n_transactions,
            hashes: block.tree.hashes.clone(),
            flags,
        }
    }

    pub fn partial_tree(&self) -> PartialMerkleTree {
        PartialMerkleTree {
            n_transactions: self.transactions,
            hashes: self.hashes.clone(),
            flags: self
                .flags
                .iter()
                .flat_map(|byte| (0..8u8).map(move |bit| byte & (1u8 << bit) != 0))
                .collect(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_hash_le(&self.block_hash);
        encoder.write_u32_le(self.height);
        encoder.write_u32_le(self.transactions);
        encoder.write_hashes(&self.hashes);
        encoder.write_var_bytes(&self.flags);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let block_hash = decoder.read_hash_le()?;
        let height = decoder.read_u32_le()?;
        let transactions = decoder.read_u32_le()?;
        let hashes = decoder.read_hashes()?;
        let flags = decoder.read_var_bytes()?;
        finish(&decoder)?;
        Ok(Self {
            block_hash,
            height,
            transactions,
            hashes,
            flags,
        })
    }
}

fn finish(decoder: &Decoder) -> Result<(), DecodeError> {
    if decoder.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::TrailingBytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spvd_primitives::block::BlockHeader;
    use spvd_primitives::merkleblock::merkle_root;

    fn utxo() -> Utxo {
        Utxo {
            outpoint: OutPoint::new([4u8; 32], 9),
            value: 1_000,
            lock_time: 101,
            at_height: 1,
            address: [0x21; 21],
        }
    }

    #[test]
    fn stxo_encoding_embeds_utxo() {
        let stxo = Stxo {
            utxo: utxo(),
            spend_txid: [8u8; 32],
            spend_height: 5,
        };
        assert_eq!(Stxo::decode(&stxo.encode()).expect("decode"), stxo);
        assert_eq!(Utxo::decode(&utxo().encode()).expect("decode"), utxo());
        assert!(Utxo::decode(&stxo.encode()).is_err());
    }

    #[test]
    fn spending_input_carries_lock_time() {
        let input = utxo().to_input();
        assert_eq!(input.previous, utxo().outpoint);
        assert_eq!(input.sequence, 101);
    }

    #[test]
    fn proof_keeps_merkle_tree() {
        let txids: Vec<Hash256> = (1u8..=5).map(|i| [i; 32]).collect();
        let header = BlockHeader {
            merkle_root: merkle_root(&txids),
            height: 3,
            ..BlockHeader::default()
        };
        let block = MerkleBlock::from_txids(header, &txids, &[false, false, true, false, true])
            .expect("merkle block");
        let proof = Proof::from_merkle_block(&block);
        assert_eq!(proof.height, 3);
        assert_eq!(proof.block_hash, block.block_hash());

        let decoded = Proof::decode(&proof.encode()).expect("decode");
        let (root, matched) = decoded.partial_tree().extract_matches().expect("extract");
        assert_eq!(root, block.header.merkle_root);
        assert_eq!(matched, vec![txids[2], txids[4]]);
    }
}
