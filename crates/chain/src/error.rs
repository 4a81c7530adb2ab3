use spvd_primitives::encoding::DecodeError;
use spvd_storage::StoreError;

#[derive(Debug)]
pub enum ChainError {
    Store(StoreError),
    Decode(DecodeError),
    /// The headers store ran out while rolling back to a fork point. The
    /// header chain and the wallet tables no longer describe a common chain.
    ForkPointNotFound,
    Closed,
    LockPoisoned,
    Spawn(std::io::Error),
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Store(err) => write!(f, "{err}"),
            ChainError::Decode(err) => write!(f, "{err}"),
            ChainError::ForkPointNotFound => {
                write!(f, "rollback exhausted the header chain without reaching the fork point")
            }
            ChainError::Closed => write!(f, "blockchain is closed"),
            ChainError::LockPoisoned => write!(f, "blockchain lock poisoned"),
            ChainError::Spawn(err) => write!(f, "failed to start notifier thread: {err}"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> Self {
        ChainError::Store(err)
    }
}

impl From<DecodeError> for ChainError {
    fn from(err: DecodeError) -> Self {
        ChainError::Decode(err)
    }
}
