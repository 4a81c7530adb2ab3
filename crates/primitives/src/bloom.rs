//! BIP37 bloom filter describing which addresses and outpoints a wallet
//! wants relayed.

use spvd_consensus::constants::{MAX_BLOOM_FILTER_SIZE, MAX_BLOOM_HASH_FUNCS};

use crate::encoding::{Encodable, Encoder};
use crate::outpoint::OutPoint;

const LN2: f64 = std::f64::consts::LN_2;
const LN2_SQUARED: f64 = LN2 * LN2;
const HASH_SEED_STEP: u32 = 0xfba4_c795;

/// Peers must not add matched outputs to the filter.
const BLOOM_UPDATE_NONE: u8 = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    data: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    flags: u8,
}

impl BloomFilter {
    /// Sizes the filter for `elements` entries at the given false-positive
    /// rate, capped at the BIP37 limits. An empty wallet still gets a
    /// one-byte filter with one hash function.
    pub fn new(elements: u32, tweak: u32, fp_rate: f64) -> Self {
        let elements = f64::from(elements.max(1));
        let fp_rate = fp_rate.clamp(1e-9, 1.0);

        let max_bits = (MAX_BLOOM_FILTER_SIZE * 8) as f64;
        let bits = (-elements * fp_rate.ln() / LN2_SQUARED).min(max_bits);
        let len = ((bits / 8.0) as usize).max(1);
        let hash_funcs = ((len * 8) as f64 / elements * LN2) as u32;

        Self {
            data: vec![0u8; len],
            hash_funcs: hash_funcs.clamp(1, MAX_BLOOM_HASH_FUNCS),
            tweak,
            flags: BLOOM_UPDATE_NONE,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn hash_funcs(&self) -> u32 {
        self.hash_funcs
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    pub fn insert(&mut self, bytes: &[u8]) {
        for n in 0..self.hash_funcs {
            let bit = self.bit_index(n, bytes);
            self.data[bit >> 3] |= 1 << (bit & 7);
        }
    }

    pub fn contains(&self, bytes: &[u8]) -> bool {
        (0..self.hash_funcs).all(|n| {
            let bit = self.bit_index(n, bytes);
            self.data[bit >> 3] & (1 << (bit & 7)) != 0
        })
    }

    pub fn add_outpoint(&mut self, outpoint: &OutPoint) {
        self.insert(&outpoint.to_key());
    }

    pub fn contains_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.contains(&outpoint.to_key())
    }

    fn bit_index(&self, n: u32, bytes: &[u8]) -> usize {
        let seed = n.wrapping_mul(HASH_SEED_STEP).wrapping_add(self.tweak);
        murmur3(seed, bytes) as usize % (self.data.len() * 8)
    }
}

impl Encodable for BloomFilter {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_var_bytes(&self.data);
        encoder.write_u32_le(self.hash_funcs);
        encoder.write_u32_le(self.tweak);
        encoder.write_u8(self.flags);
    }
}

/// MurmurHash3 (x86, 32-bit).
pub fn murmur3(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mix = |k: u32| k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

    let mut hash = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        hash ^= mix(k);
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let k = tail
            .iter()
            .rev()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
        hash ^= mix(k);
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^ (hash >> 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spvd_consensus::constants::BLOOM_FALSE_POSITIVE_RATE;

    #[test]
    fn murmur3_reference_values() {
        assert_eq!(murmur3(0, b""), 0);
        assert_eq!(murmur3(1, b""), 0x514e_28b7);
        assert_eq!(murmur3(0xffff_ffff, b""), 0x81f1_6f39);
        assert_eq!(murmur3(0x9747_b28c, b"Hello, world!"), 0x2488_4cba);
    }

    #[test]
    fn inserted_items_are_found() {
        let mut filter = BloomFilter::new(3, 12345, BLOOM_FALSE_POSITIVE_RATE);
        let outpoint = OutPoint::new([0x11; 32], 3);
        filter.insert(&[0x21; 21]);
        filter.add_outpoint(&outpoint);

        assert!(filter.contains(&[0x21; 21]));
        assert!(filter.contains_outpoint(&outpoint));
        assert!(!filter.contains_outpoint(&OutPoint::new([0x11; 32], 4)));
    }

    #[test]
    fn filterload_layout() {
        let mut filter = BloomFilter::new(1, 0x0102_0304, BLOOM_FALSE_POSITIVE_RATE);
        filter.insert(b"watched");
        let bytes = crate::encoding::encode(&filter);

        let len = filter.data().len();
        assert_eq!(usize::from(bytes[0]), len);
        assert_eq!(&bytes[1..1 + len], filter.data());
        assert_eq!(&bytes[1 + len..5 + len], &filter.hash_funcs().to_le_bytes());
        assert_eq!(&bytes[5 + len..9 + len], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[9 + len..], [BLOOM_UPDATE_NONE]);
    }

    #[test]
    fn size_is_capped() {
        let filter = BloomFilter::new(10_000_000, 0, BLOOM_FALSE_POSITIVE_RATE);
        assert_eq!(filter.data().len(), MAX_BLOOM_FILTER_SIZE);
        assert!(filter.hash_funcs() >= 1);

        let empty = BloomFilter::new(0, 0, BLOOM_FALSE_POSITIVE_RATE);
        assert!(!empty.data().is_empty());
        assert!(empty.hash_funcs() <= MAX_BLOOM_HASH_FUNCS);
    }
}
