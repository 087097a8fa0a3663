//! Process-wide runtime singleton (`spec.md` §9, "Global mutable state").
//!
//! `spec.md` names two process-global items: the pool registry and the
//! AsyncIndexQueue. This module bundles both into one value constructed
//! once at startup and torn down in a fixed order — the queue before the
//! pools, since the queue's own worker thread is joined on drop and nothing
//! about pool teardown can block on it, while the reverse isn't true if a
//! pool job is itself blocked submitting to the queue.

use std::sync::Arc;

use crate::config::{Config, INDEX_POOL_NAME, SEARCH_POOL_NAME};
use crate::host::Host;
use crate::pool::{PoolId, ThreadPoolRegistry};
use crate::queue::{AsyncIndexQueue, IndexSpec, QueueConfig};

/// One process-wide object owning the thread pools and the indexing queue
/// (`spec.md` §9). Build once at startup from a [`Config`], hand out as an
/// `Arc`, and let it drop at process exit — or drop it explicitly for an
/// orderly shutdown in tests.
pub struct Runtime<H: Host, S: IndexSpec> {
    /// Declared first so it drops first — struct fields drop in
    /// declaration order, giving the queue-before-pools teardown order this
    /// module's doc comment describes.
    queue: AsyncIndexQueue<H, S>,
    pools: ThreadPoolRegistry,
    search_pool: PoolId,
    index_pool: PoolId,
}

impl<H: Host, S: IndexSpec> Runtime<H, S> {
    /// Create the two well-known pools (`spec.md` §4.A, "Startup contract")
    /// and the singleton `AsyncIndexQueue`.
    pub fn new(host: Arc<H>, config: &Config) -> Self {
        let pools = ThreadPoolRegistry::new();
        let search_pool = pools.create_pool(SEARCH_POOL_NAME, config.search_pool_size);
        let index_pool = pools.create_pool(INDEX_POOL_NAME, config.resolved_index_pool_size());

        let queue = AsyncIndexQueue::new(
            host,
            QueueConfig { interval: std::time::Duration::from_millis(config.interval_ms), index_batch_size: config.index_batch_size },
        );

        Runtime { queue, pools, search_pool, index_pool }
    }

    pub fn pools(&self) -> &ThreadPoolRegistry {
        &self.pools
    }

    pub fn search_pool(&self) -> PoolId {
        self.search_pool
    }

    pub fn index_pool(&self) -> PoolId {
        self.index_pool
    }

    pub fn queue(&self) -> &AsyncIndexQueue<H, S> {
        &self.queue
    }
}
