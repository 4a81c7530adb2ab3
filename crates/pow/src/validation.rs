use std::cmp::Ordering;

use primitive_types::U256;
use spvd_consensus::ChainParams;
use spvd_primitives::block::BlockHeader;

use crate::difficulty::{compact_to_big, hash_to_big};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowError {
    TargetNotPositive,
    TargetAboveLimit,
    HashAboveTarget,
}

impl std::fmt::Display for PowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowError::TargetNotPositive => write!(f, "block target difficulty is too low"),
            PowError::TargetAboveLimit => {
                write!(f, "block target difficulty is higher than max of limit")
            }
            PowError::HashAboveTarget => {
                write!(f, "block hash is higher than expected difficulty")
            }
        }
    }
}

impl std::error::Error for PowError {}

/// Checks the header's claimed target against the limit, then the aux-pow
/// parent block hash against that target.
pub fn check_proof_of_work(header: &BlockHeader, params: &ChainParams) -> Result<(), PowError> {
    let target = compact_to_big(header.bits);
    if target.signum() <= 0 {
        return Err(PowError::TargetNotPositive);
    }

    let pow_limit = U256::from_little_endian(&params.pow_limit);
    if target.cmp_u256(&pow_limit) == Ordering::Greater {
        return Err(PowError::TargetAboveLimit);
    }

    let hash = hash_to_big(&header.aux_pow.parent_block_hash());
    if target.cmp_u256(&hash) == Ordering::Less {
        return Err(PowError::HashAboveTarget);
    }

    Ok(())
}
