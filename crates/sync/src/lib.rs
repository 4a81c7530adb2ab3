//! Block and transaction request pipeline for filtered-block sync.

pub mod block_txs;
pub mod config;
pub mod error;
pub mod pool;
pub mod queue;
pub mod request;
pub mod timer;

pub use block_txs::BlockTxsRequest;
pub use config::{ConfigError, SyncConfig};
pub use error::RequestError;
pub use pool::FinishedReqPool;
pub use queue::{RequestQueue, RequestQueueHandler};
pub use request::{Request, RequestKind, RequestState};
pub use timer::{RequestTimer, TimerHandle, TimerToken};
