//! Compact ("bits") target encoding.
//!
//! A compact value packs a base-256 exponent in the top byte, a sign in
//! bit 23 and a 23-bit mantissa below it.

use std::cmp::Ordering;

use primitive_types::U256;
use spvd_consensus::Hash256;

const MANTISSA_MASK: u32 = 0x007f_ffff;
const SIGN_BIT: u32 = 0x0080_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

/// Signed, unbounded view of a decoded compact target.
///
/// Magnitudes wider than 256 bits keep `overflow` set instead of being
/// truncated, so comparisons against a limit stay exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigTarget {
    pub negative: bool,
    pub magnitude: U256,
    pub overflow: bool,
}

impl BigTarget {
    pub fn is_zero(&self) -> bool {
        !self.overflow && self.magnitude.is_zero()
    }

    pub fn signum(&self) -> i8 {
        if self.is_zero() {
            0
        } else if self.negative {
            -1
        } else {
            1
        }
    }

    pub fn cmp_u256(&self, other: &U256) -> Ordering {
        match self.signum() {
            0 if other.is_zero() => Ordering::Equal,
            0 | -1 => Ordering::Less,
            _ if self.overflow => Ordering::Greater,
            _ => self.magnitude.cmp(other),
        }
    }

    pub fn to_u256(&self) -> Result<U256, CompactError> {
        if self.negative && !self.is_zero() {
            return Err(CompactError::Negative);
        }
        if self.overflow {
            return Err(CompactError::Overflow);
        }
        Ok(self.magnitude)
    }
}

pub fn compact_to_big(compact: u32) -> BigTarget {
    let mut mantissa = compact & MANTISSA_MASK;
    let negative = compact & SIGN_BIT != 0;
    let exponent = compact >> 24;

    let (magnitude, overflow) = if exponent <= 3 {
        mantissa >>= 8 * (3 - exponent);
        (U256::from(mantissa), false)
    } else {
        let shift = 8 * (exponent - 3) as usize;
        let width = 32 - mantissa.leading_zeros() as usize;
        if mantissa != 0 && width + shift > 256 {
            (U256::zero(), true)
        } else if mantissa == 0 {
            (U256::zero(), false)
        } else {
            (U256::from(mantissa) << shift, false)
        }
    };

    BigTarget {
        negative,
        magnitude,
        overflow,
    }
}

pub fn compact_to_u256(compact: u32) -> Result<U256, CompactError> {
    compact_to_big(compact).to_u256()
}

/// Inverse of [`compact_to_big`] for non-negative targets.
pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact = if size <= 3 {
        value.low_u32() << (8 * (3 - size))
    } else {
        (value >> (8 * (size - 3))).low_u32()
    };

    // Keep the sign bit clear by moving one byte into the exponent.
    if compact & SIGN_BIT != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & MANTISSA_MASK)
}

/// Hashes are stored little-endian; read the reversed bytes as a big-endian
/// integer.
pub fn hash_to_big(hash: &Hash256) -> U256 {
    U256::from_little_endian(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_exponent_shifts_right() {
        let target = compact_to_big(0x0112_3456);
        assert_eq!(target.magnitude, U256::from(0x12u32));
        let target = compact_to_big(0x0200_8000);
        assert_eq!(target.magnitude, U256::from(0x80u32));
        assert_eq!(compact_to_big(0x0300_0000).signum(), 0);
    }

    #[test]
    fn sign_bit_negates() {
        let target = compact_to_big(0x04923456);
        assert!(target.negative);
        assert_eq!(target.signum(), -1);
        assert_eq!(target.magnitude, U256::from(0x1234_5600u64));
        assert_eq!(target.cmp_u256(&U256::zero()), Ordering::Less);
    }

    #[test]
    fn negative_zero_is_zero() {
        let target = compact_to_big(0x0180_0000);
        assert_eq!(target.signum(), 0);
        assert_eq!(target.to_u256(), Ok(U256::zero()));
    }

    #[test]
    fn oversized_exponent_overflows() {
        let target = compact_to_big(0xff12_3456);
        assert!(target.overflow);
        assert_eq!(target.signum(), 1);
        assert_eq!(target.cmp_u256(&U256::MAX), Ordering::Greater);
        assert_eq!(target.to_u256(), Err(CompactError::Overflow));

        // 0x7fffff << 8*29 needs exactly 255 bits.
        assert!(!compact_to_big(0x207f_ffff).overflow);
        assert!(compact_to_big(0x2180_0000 | 0x0001_0000).overflow);
    }

    #[test]
    fn hash_reads_reversed() {
        let mut hash = [0u8; 32];
        hash[0] = 1;
        assert_eq!(hash_to_big(&hash), U256::one());
        hash[31] = 0x80;
        assert!(hash_to_big(&hash).bit(255));
    }
}
