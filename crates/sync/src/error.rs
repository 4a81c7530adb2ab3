use spvd_consensus::Hash256;
use spvd_primitives::hash::hash256_to_hex;

use crate::request::RequestKind;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestError {
    Timeout { kind: RequestKind, hash: Hash256 },
    /// A transaction mapped to a block whose group is gone.
    UnknownGroup(Hash256),
    UnknownTransaction(Hash256),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Timeout { kind, hash } => {
                write!(f, "{kind} request timeout with hash {}", hash256_to_hex(hash))
            }
            RequestError::UnknownGroup(hash) => {
                write!(f, "no transaction request group for block {}", hash256_to_hex(hash))
            }
            RequestError::UnknownTransaction(hash) => {
                write!(f, "transaction {} was not requested", hash256_to_hex(hash))
            }
        }
    }
}

impl std::error::Error for RequestError {}
