//! Compact difficulty targets and the aux-pow proof-of-work check.

pub mod difficulty;
pub mod validation;

pub use difficulty::{compact_to_big, hash_to_big, u256_to_compact, BigTarget, CompactError};
pub use validation::{check_proof_of_work, PowError};
