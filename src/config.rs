//! Configuration inputs (`spec.md` §6, "Configuration inputs").

use std::thread::available_parallelism;

use serde::Deserialize;

/// The index-name conventions for the two pools created at startup
/// (`spec.md` §4.A, "Startup contract").
pub const SEARCH_POOL_NAME: &str = "search";
pub const INDEX_POOL_NAME: &str = "index";

/// A document batch is worth waking the indexing worker early for once it
/// reaches this many entries; below that, the worker only wakes on its
/// timed interval. Chosen to sit in the same order of magnitude as
/// [`Config::default`]'s `interval_ms`, so a lightly loaded index is never
/// woken more often than its own batches warrant.
const DEFAULT_INDEX_BATCH_SIZE: usize = 1000;
const DEFAULT_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of threads in the search pool.
    pub search_pool_size: usize,
    /// Number of threads in the index pool when auto-sizing is disabled or
    /// CPU detection fails.
    pub index_pool_size: usize,
    /// Disables CPU auto-detection for the index pool.
    pub pool_size_no_auto: bool,
    /// `AsyncIndexQueue` polling interval, in milliseconds.
    pub interval_ms: u64,
    /// `AsyncIndexQueue` batch size that triggers an early wake-up.
    pub index_batch_size: usize,
}

impl Config {
    /// The index pool's thread count, honoring `pool_size_no_auto` the way
    /// `spec.md` §4.A's startup contract describes: auto-detect unless
    /// forbidden, falling back to `index_pool_size` either way detection
    /// fails or auto-sizing is off.
    pub fn resolved_index_pool_size(&self) -> usize {
        if self.pool_size_no_auto {
            return self.index_pool_size;
        }
        available_parallelism().map(|n| n.get()).unwrap_or(self.index_pool_size)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            search_pool_size: available_parallelism().map(|n| n.get()).unwrap_or(4),
            index_pool_size: 4,
            pool_size_no_auto: false,
            interval_ms: DEFAULT_INTERVAL_MS,
            index_batch_size: DEFAULT_INDEX_BATCH_SIZE,
        }
    }
}
