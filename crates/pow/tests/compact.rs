use std::cmp::Ordering;

use primitive_types::U256;
use spvd_pow::difficulty::{compact_to_big, compact_to_u256, u256_to_compact, CompactError};

#[test]
fn compact_round_trips_through_u256() {
    for bits in [0x1d00ffffu32, 0x207fffff, 0x1b0404cb, 0x0312_3456] {
        let value = compact_to_u256(bits).expect("target");
        assert_eq!(u256_to_compact(value), bits, "bits {bits:#010x}");
    }
}

#[test]
fn regtest_limit_layout() {
    let value = compact_to_u256(0x207fffff).expect("target");
    let bytes = value.to_little_endian();
    assert!(bytes[..29].iter().all(|b| *b == 0));
    assert_eq!(&bytes[29..], &[0xff, 0xff, 0x7f]);
}

#[test]
fn sign_bit_moves_into_exponent() {
    assert_eq!(u256_to_compact(U256::from(0x80u32)), 0x0200_8000);
    assert_eq!(u256_to_compact(U256::zero()), 0);
}

#[test]
fn negative_targets_are_rejected_by_strict_decode() {
    assert_eq!(compact_to_u256(0x0192_0000), Err(CompactError::Negative));
    assert_eq!(
        compact_to_big(0x0192_0000).cmp_u256(&U256::one()),
        Ordering::Less
    );
}
