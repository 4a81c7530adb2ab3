//! Bitcoin-style serialization: little-endian integers, CompactSize counts
//! and raw 32-byte hashes.

use std::fmt;

use spvd_consensus::Hash256;

/// Largest count or length a CompactSize may carry.
const MAX_SIZE: u64 = 0x0200_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEof,
    NonCanonicalVarInt,
    SizeTooLarge,
    InvalidData(&'static str),
    TrailingBytes,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            DecodeError::UnexpectedEof => "input ended early",
            DecodeError::NonCanonicalVarInt => "CompactSize is not minimally encoded",
            DecodeError::SizeTooLarge => "CompactSize above the size limit",
            DecodeError::InvalidData(message) => *message,
            DecodeError::TrailingBytes => "bytes left over after decoding",
        };
        f.write_str(message)
    }
}

impl std::error::Error for DecodeError {}

#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

pub struct Decoder<'a> {
    rest: &'a [u8],
}

macro_rules! le_int {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        impl Encoder {
            $(
                pub fn $write(&mut self, value: $ty) {
                    self.buf.extend_from_slice(&value.to_le_bytes());
                }
            )*
        }

        impl Decoder<'_> {
            $(
                pub fn $read(&mut self) -> Result<$ty, DecodeError> {
                    self.read_fixed().map(<$ty>::from_le_bytes)
                }
            )*
        }
    };
}

le_int! {
    u16 => write_u16_le, read_u16_le;
    u32 => write_u32_le, read_u32_le;
    i32 => write_i32_le, read_i32_le;
    u64 => write_u64_le, read_u64_le;
    i64 => write_i64_le, read_i64_le;
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// CompactSize: one byte below 0xfd, otherwise a marker and 2, 4 or 8 bytes.
    pub fn write_varint(&mut self, value: u64) {
        if value < 0xfd {
            self.write_u8(value as u8);
        } else if let Ok(short) = u16::try_from(value) {
            self.write_u8(0xfd);
            self.write_u16_le(short);
        } else if let Ok(word) = u32::try_from(value) {
            self.write_u8(0xfe);
            self.write_u32_le(word);
        } else {
            self.write_u8(0xff);
            self.write_u64_le(value);
        }
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn write_hash_le(&mut self, hash: &Hash256) {
        self.write_bytes(hash);
    }

    pub fn write_hashes(&mut self, hashes: &[Hash256]) {
        self.write_varint(hashes.len() as u64);
        hashes.iter().for_each(|hash| self.write_hash_le(hash));
    }
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { rest: input }
    }

    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.rest.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    pub fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.take(1).map(|byte| byte[0])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        self.take(len).map(<[u8]>::to_vec)
    }

    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let marker = self.read_u8()?;
        let (value, floor) = match marker {
            0xfd => (u64::from(self.read_u16_le()?), 0xfd),
            0xfe => (u64::from(self.read_u32_le()?), 0x1_0000),
            0xff => (self.read_u64_le()?, 0x1_0000_0000),
            small => return Ok(u64::from(small)),
        };
        if value < floor {
            Err(DecodeError::NonCanonicalVarInt)
        } else if value > MAX_SIZE {
            Err(DecodeError::SizeTooLarge)
        } else {
            Ok(value)
        }
    }

    /// A CompactSize count that must fit in what is left of the input at
    /// `min_item_size` bytes per item.
    pub fn read_count(&mut self, min_item_size: usize) -> Result<usize, DecodeError> {
        let count = usize::try_from(self.read_varint()?).map_err(|_| DecodeError::SizeTooLarge)?;
        match count.checked_mul(min_item_size.max(1)) {
            Some(needed) if needed <= self.remaining() => Ok(count),
            _ => Err(DecodeError::UnexpectedEof),
        }
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_count(1)?;
        self.read_bytes(len)
    }

    pub fn read_hash_le(&mut self) -> Result<Hash256, DecodeError> {
        self.read_fixed()
    }

    pub fn read_hashes(&mut self) -> Result<Vec<Hash256>, DecodeError> {
        let count = self.read_count(32)?;
        (0..count).map(|_| self.read_hash_le()).collect()
    }
}

pub trait Encodable {
    fn consensus_encode(&self, encoder: &mut Encoder);
}

pub trait Decodable: Sized {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError>;
}

pub fn encode<T: Encodable + ?Sized>(value: &T) -> Vec<u8> {
    let mut encoder = Encoder::new();
    value.consensus_encode(&mut encoder);
    encoder.into_inner()
}

/// Decodes exactly one `T`; leftover input is an error.
pub fn decode<T: Decodable>(bytes: &[u8]) -> Result<T, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let value = T::consensus_decode(&mut decoder)?;
    match decoder.is_empty() {
        true => Ok(value),
        false => Err(DecodeError::TrailingBytes),
    }
}
