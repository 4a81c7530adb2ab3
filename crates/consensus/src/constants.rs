//! Constants shared by the chain manager and the sync pipeline.

/// Coinbase outputs are locked until this many blocks after their creation height.
pub const COINBASE_MATURITY: u32 = 100;
/// Height assigned to transactions committed outside of a block.
pub const UNCONFIRMED_HEIGHT: u32 = 0;
/// Upper bound on the number of hashes in a block locator.
pub const MAX_BLOCK_LOCATOR_HASHES: usize = 200;
/// Number of locator hashes emitted before the backwards step doubles.
pub const LOCATOR_STEP_DOUBLING_INTERVAL: usize = 9;

/// Default bound on in-flight block requests (intake holds twice this).
pub const DEFAULT_REQUEST_QUEUE_SIZE: usize = 10;
/// Default per-request timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Target false-positive rate for the wallet bloom filter.
pub const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.0001;
/// Largest serialized bloom filter accepted by peers, in bytes.
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;
/// Largest number of bloom hash functions accepted by peers.
pub const MAX_BLOOM_HASH_FUNCS: u32 = 50;

/// Maximum allowed size for a serialized block, in bytes (network rule).
pub const MAX_BLOCK_SIZE: u32 = 8_000_000;
