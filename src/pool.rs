//! ThreadPool Registry (`spec.md` §4.A).
//!
//! A small set of named, fixed-size worker pools, each backed by one
//! `crossbeam_channel::unbounded` queue feeding `N` dedicated OS threads.
//! Submission pushes a boxed closure onto the channel and returns; it never
//! blocks, matching `spec.md`'s "unbounded in queue depth; submission never
//! blocks." This is the same channel-fed fixed-pool shape as conduwuit's
//! `database::Pool` (a production Matrix homeserver's blocking-I/O
//! offload pool), adapted from a per-shard topology to the
//! one-queue-per-named-pool model this spec calls for.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Opaque reference to one worker pool (`spec.md` §3, "Pool handle").
///
/// The identifier space is append-only for the registry's lifetime:
/// [`ThreadPoolRegistry::create_pool`] only ever hands out the next value of
/// an internal counter, never reuses one, even if pools could be removed
/// (they can't — there is no removal API, per `spec.md` §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PoolId(u32);

struct Pool {
    name: String,
    sender: Sender<Job>,
    // Kept only so the registry's `Drop` has something to observe; the
    // pool has no graceful-drain API, so these are never joined.
    _workers: Vec<JoinHandle<()>>,
}

/// Owns a small set of named, fixed-size worker pools.
pub struct ThreadPoolRegistry {
    pools: RwLock<Vec<Pool>>,
    next_id: AtomicU32,
}

impl ThreadPoolRegistry {
    pub fn new() -> Self {
        ThreadPoolRegistry { pools: RwLock::new(Vec::new()), next_id: AtomicU32::new(0) }
    }

    /// Create a pool of `num_threads` threads, named `name` for logging and
    /// thread-name purposes, and return its identifier.
    pub fn create_pool(&self, name: &str, num_threads: usize) -> PoolId {
        let (sender, receiver) = unbounded::<Job>();
        let id = PoolId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let workers = (0..num_threads)
            .map(|i| {
                let receiver = receiver.clone();
                let pool_name = name.to_string();
                std::thread::Builder::new()
                    .name(format!("{pool_name}-worker-{i}"))
                    .spawn(move || worker_loop(&pool_name, i, receiver))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        self.pools.write().unwrap().push(Pool { name: name.to_string(), sender, _workers: workers });
        id
    }

    /// Submit a work item to the pool identified by `id`. Never blocks.
    ///
    /// Per `spec.md` §4.A, an out-of-range pool id is a programmer error: in
    /// debug builds this asserts, in release builds it returns
    /// [`Error::PoolNotFound`].
    pub fn submit(&self, id: PoolId, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let pools = self.pools.read().unwrap();
        let pool = pools.get(id.0 as usize);
        debug_assert!(pool.is_some(), "submit to unregistered pool id {id:?}");
        let pool = pool.ok_or(Error::PoolNotFound(id))?;
        // An unbounded sender only errs once every receiver has been
        // dropped, i.e. at registry teardown; allocation failure on the
        // submission path itself is fatal per `spec.md` §4.A and is left to
        // abort the process rather than be converted into a `Result`.
        pool.sender.send(Box::new(job)).expect("worker threads outlive the registry");
        Ok(())
    }

    pub fn current_num_threads(&self, id: PoolId) -> Option<usize> {
        self.pools.read().unwrap().get(id.0 as usize).map(|p| p._workers.len())
    }

    pub fn name_of(&self, id: PoolId) -> Option<String> {
        self.pools.read().unwrap().get(id.0 as usize).map(|p| p.name.clone())
    }
}

impl Default for ThreadPoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_loop(pool_name: &str, thread_index: usize, receiver: crossbeam_channel::Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!(pool = pool_name, thread = thread_index, "worker job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn submissions_in_a_pool_run_in_fifo_start_order() {
        let registry = ThreadPoolRegistry::new();
        let id = registry.create_pool("search", 1);

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..20 {
            let order = Arc::clone(&order);
            registry.submit(id, move || order.lock().unwrap().push(i)).unwrap();
        }

        // One worker thread: completion order must equal submission order.
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn n_submissions_yield_exactly_n_completions() {
        let registry = ThreadPoolRegistry::new();
        let id = registry.create_pool("search", 2);
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let completed = Arc::clone(&completed);
            registry
                .submit(id, move || {
                    std::thread::sleep(Duration::from_millis(50));
                    completed.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(completed.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn a_panicking_job_does_not_kill_the_worker() {
        let registry = ThreadPoolRegistry::new();
        let id = registry.create_pool("search", 1);

        registry.submit(id, || panic!("boom")).unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        let completed2 = Arc::clone(&completed);
        registry.submit(id, move || { completed2.store(1, Ordering::SeqCst); }).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn current_num_threads_is_none_for_an_unregistered_id() {
        let registry = ThreadPoolRegistry::new();
        registry.create_pool("search", 1);
        assert_eq!(registry.current_num_threads(PoolId(99)), None);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "unregistered pool id"))]
    fn submit_to_unknown_pool_id() {
        let registry = ThreadPoolRegistry::new();
        registry.create_pool("search", 1);
        let result = registry.submit(PoolId(99), || {});
        // Reached only in release builds, where `debug_assert!` compiles
        // out and the `Result::Err` fallback is live.
        assert!(matches!(result, Err(Error::PoolNotFound(PoolId(99)))));
    }
}
