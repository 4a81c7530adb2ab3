//! Chain state for an SPV wallet: header chain, wallet UTXO/STXO sets,
//! fork handling and commit notifications.

pub mod blockchain;
pub mod datastore;
pub mod error;
pub mod headers;
pub mod notify;
pub mod records;

pub use blockchain::{Blockchain, ChainSyncState};
pub use datastore::{DataStore, KvDataStore};
pub use error::ChainError;
pub use headers::{Headers, KvHeaders};
pub use notify::{ChainEvent, ChainListener, NoopListener, Notifier};
pub use records::{Proof, Stxo, Txn, Utxo};
