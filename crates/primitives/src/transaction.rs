//! Transaction types and serialization.
//!
//! The txid commits to the unsigned form: everything except the trailing
//! programs (signature scripts).

use spvd_consensus::Hash256;

use crate::address::ProgramHash;
use crate::encoding::{decode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

pub const COINBASE_TX_TYPE: u8 = 0x00;
pub const REGISTER_ASSET_TX_TYPE: u8 = 0x01;
pub const TRANSFER_ASSET_TX_TYPE: u8 = 0x02;
pub const RECORD_TX_TYPE: u8 = 0x03;

const MIN_INPUT_SIZE: usize = 38;
const MIN_OUTPUT_SIZE: usize = 65;
const MIN_ATTRIBUTE_SIZE: usize = 2;
const MIN_PROGRAM_SIZE: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxAttribute {
    pub usage: u8,
    pub data: Vec<u8>,
}

impl Encodable for TxAttribute {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.usage);
        encoder.write_var_bytes(&self.data);
    }
}

impl Decodable for TxAttribute {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let usage = decoder.read_u8()?;
        let data = decoder.read_var_bytes()?;
        Ok(Self { usage, data })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub previous: OutPoint,
    pub sequence: u32,
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.previous.consensus_encode(encoder);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let previous = OutPoint::consensus_decode(decoder)?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self { previous, sequence })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub asset_id: Hash256,
    pub value: i64,
    pub output_lock: u32,
    pub program_hash: ProgramHash,
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.asset_id);
        encoder.write_i64_le(self.value);
        encoder.write_u32_le(self.output_lock);
        encoder.write_bytes(&self.program_hash);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let asset_id = decoder.read_hash_le()?;
        let value = decoder.read_i64_le()?;
        let output_lock = decoder.read_u32_le()?;
        let program_hash = decoder.read_fixed()?;
        Ok(Self {
            asset_id,
            value,
            output_lock,
            program_hash,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    pub code: Vec<u8>,
    pub parameter: Vec<u8>,
}

impl Encodable for Program {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_bytes(&self.parameter);
        encoder.write_var_bytes(&self.code);
    }
}

impl Decodable for Program {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let parameter = decoder.read_var_bytes()?;
        let code = decoder.read_var_bytes()?;
        Ok(Self { code, parameter })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    pub tx_type: u8,
    pub payload_version: u8,
    pub payload: Vec<u8>,
    pub attributes: Vec<TxAttribute>,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    pub programs: Vec<Program>,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.tx_type == COINBASE_TX_TYPE
    }

    pub fn txid(&self) -> Hash256 {
        sha256d(&self.serialize_unsigned())
    }

    pub fn serialize_unsigned(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.encode_unsigned(&mut encoder);
        encoder.into_inner()
    }

    /// Parses the form produced by [`Transaction::serialize_unsigned`]; the
    /// result carries no programs.
    pub fn deserialize_unsigned(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx = Self::decode_unsigned(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(tx)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }

    fn encode_unsigned(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.tx_type);
        encoder.write_u8(self.payload_version);
        encoder.write_var_bytes(&self.payload);
        write_list(encoder, &self.attributes);
        write_list(encoder, &self.inputs);
        write_list(encoder, &self.outputs);
        encoder.write_u32_le(self.lock_time);
    }

    fn decode_unsigned(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let tx_type = decoder.read_u8()?;
        let payload_version = decoder.read_u8()?;
        let payload = decoder.read_var_bytes()?;
        let attributes = read_list(decoder, MIN_ATTRIBUTE_SIZE)?;
        let inputs = read_list(decoder, MIN_INPUT_SIZE)?;
        let outputs = read_list(decoder, MIN_OUTPUT_SIZE)?;
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            tx_type,
            payload_version,
            payload,
            attributes,
            inputs,
            outputs,
            lock_time,
            programs: Vec::new(),
        })
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.encode_unsigned(encoder);
        write_list(encoder, &self.programs);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let mut tx = Self::decode_unsigned(decoder)?;
        tx.programs = read_list(decoder, MIN_PROGRAM_SIZE)?;
        Ok(tx)
    }
}

fn write_list<T: Encodable>(encoder: &mut Encoder, items: &[T]) {
    encoder.write_varint(items.len() as u64);
    for item in items {
        item.consensus_encode(encoder);
    }
}

fn read_list<T: Decodable>(decoder: &mut Decoder, min_item_size: usize) -> Result<Vec<T>, DecodeError> {
    let count = decoder.read_count(min_item_size)?;
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(T::consensus_decode(decoder)?);
    }
    Ok(items)
}
