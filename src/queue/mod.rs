//! AsyncIndexQueue (`spec.md` §4.D).
//!
//! A single dedicated worker thread drains per-index batches of queued
//! document mutations. Shared by every index in the process; submitters
//! never block on anything but the queue's own mutex (never on the
//! condition variable), and the worker is the only thread that ever removes
//! a [`SpecQueue`] from the pending list.
//!
//! The wake-up primitive is `synchronoise::SignalEvent` in auto-reset mode —
//! the same primitive the teacher's own `Scheduler` uses for its run-loop —
//! which gives the "timed wait with an absolute deadline, tolerant of
//! spurious wakeups" semantics `spec.md` calls for without hand-rolling a
//! condvar predicate loop.

mod spec_queue;

use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use synchronoise::SignalEvent;

pub use spec_queue::IndexableDocument;
use spec_queue::SpecQueue;

use crate::host::Host;

/// The external document-analysis pipeline this queue drains into
/// (`spec.md` §1: `Indexer`, `AddDocumentCtx` — named out of scope, realized
/// here as the trait boundary a host binding implements once per index
/// type it supports).
pub trait IndexSpec: Send + Sync + 'static {
    /// A document key, unique within one index.
    type Key: Clone + Eq + Hash + Send;
    /// The attribute set computed by the matching phase.
    type Attrs: Send;
    /// An in-progress per-document indexing context (`AddDocumentCtx`).
    type AddDocumentCtx: Send;
    /// The batch-scoped indexer object mutations accumulate into.
    type Indexer: Send;

    /// Has this index been deleted? Checked between every drained entry and
    /// once more before the final commit/discard.
    fn is_deleted(&self) -> bool;

    /// Start a new batch-scoped indexer.
    fn new_indexer(&self) -> Self::Indexer;

    /// Initialize an `AddDocumentCtx` for `key`/`attrs`. Must be called
    /// while the host lock is held. `None` means the per-item failure path
    /// (`spec.md` §7: "logged via the item's error channel, item dropped").
    fn init_add_document(&self, key: &Self::Key, attrs: &Self::Attrs) -> Option<Self::AddDocumentCtx>;

    /// Hand a document context to the batch indexer. `false` means the item
    /// failed and should be dropped (the context is already consumed).
    fn add_document(&self, indexer: &mut Self::Indexer, ctx: Self::AddDocumentCtx) -> bool;

    /// Commit the batch. Called while the host lock is held, only when the
    /// index was not deleted during the drain.
    fn commit(&self, indexer: Self::Indexer);

    /// Discard the batch via the indexer's iterate-and-free path. Called
    /// while the host lock is held, when the index was deleted mid-drain.
    fn discard(&self, indexer: Self::Indexer);
}

/// Configuration `AsyncIndexQueue` is constructed with (`spec.md` §3).
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub interval: Duration,
    pub index_batch_size: usize,
}

/// Identity of a spec's queue, independent of whether anything still holds a
/// strong reference to the spec itself.
///
/// This is deliberately a non-owning pointer key, not an `Arc<S>`: the
/// owning reference that keeps a queued spec alive lives in
/// [`SpecQueue::retained`] instead, held only while `pending || processing`.
/// Keeping the map key itself non-owning means a fully-drained, idle queue
/// can stay in [`State::queues`] — so [`AsyncIndexQueue::pending_count`] can
/// still answer `0` for it — without that entry pinning the spec alive
/// forever. `-1` ("no queue") is reserved for a spec that was never
/// submitted at all.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct SpecKey<S>(usize, PhantomData<fn() -> S>);

impl<S> SpecKey<S> {
    fn of(spec: &Arc<S>) -> Self {
        SpecKey(Arc::as_ptr(spec) as usize, PhantomData)
    }
}

struct State<S: IndexSpec> {
    cancelled: bool,
    /// Every spec ever submitted, whether its queue is currently pending,
    /// processing, idle-but-drained, or all three in sequence. Entries are
    /// never removed — see [`SpecKey`]'s doc comment for why that's safe.
    queues: HashMap<SpecKey<S>, SpecQueue<S, S::Key, S::Attrs>>,
    /// The global pending list. Every member also has `queues[key].pending
    /// == true`, and vice versa (`spec.md` §3 invariant).
    pending: Vec<SpecKey<S>>,
}

struct Shared<H, S: IndexSpec> {
    host: Arc<H>,
    config: QueueConfig,
    signal: SignalEvent,
    state: Mutex<State<S>>,
}

/// A dedicated indexing worker with its own condition-variable-driven loop
/// (`spec.md` §4.D).
pub struct AsyncIndexQueue<H: Host, S: IndexSpec> {
    shared: Arc<Shared<H, S>>,
    worker: Option<JoinHandle<()>>,
}

impl<H: Host, S: IndexSpec> AsyncIndexQueue<H, S> {
    pub fn new(host: Arc<H>, config: QueueConfig) -> Self {
        let shared = Arc::new(Shared {
            host,
            config,
            signal: SignalEvent::auto(false),
            state: Mutex::new(State { cancelled: false, queues: HashMap::new(), pending: Vec::new() }),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("async-index-queue".to_string())
            .spawn(move || worker_loop(worker_shared))
            .expect("failed to spawn async index queue worker");

        AsyncIndexQueue { shared, worker: Some(worker) }
    }

    /// Submit a document mutation for `spec` (`spec.md` §4.D, "Submit").
    /// Typically called under the host lock by the matching phase, but this
    /// queue's own mutex is the only one it actually needs.
    pub fn submit(&self, spec: Arc<S>, key: S::Key, attrs: S::Attrs) {
        let key_for_map = SpecKey::of(&spec);
        let mut state = self.shared.state.lock();

        let entry = state.queues.entry(key_for_map).or_insert_with(SpecQueue::new);

        let was_idle = entry.is_idle();
        let doc_key = key.clone();
        match entry.dict.entry(doc_key) {
            std::collections::hash_map::Entry::Occupied(mut o) => {
                // The last observed attribute set wins (`spec.md` §5); the
                // previously queued mutation for this key hasn't been
                // drained yet, so it is superseded rather than left to win.
                o.get_mut().attrs = attrs;
                tracing::debug!("duplicate submission superseded a not-yet-drained entry");
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(IndexableDocument { key, attrs });
            }
        };

        if was_idle {
            entry.pending = true;
            entry.retained = Some(spec);
            state.pending.push(key_for_map);
        }

        let should_signal = !entry.processing && entry.dict.len() >= self.shared.config.index_batch_size;
        drop(state);
        if should_signal {
            self.shared.signal.signal();
        }
    }

    /// `nactive + size(live_dict)` for `spec`'s queue, or `-1` if `spec` has
    /// no queue (`spec.md` §4.D, "Pending-count query").
    pub fn pending_count(&self, spec: &Arc<S>) -> i64 {
        let state = self.shared.state.lock();
        match state.queues.get(&SpecKey::of(spec)) {
            Some(q) => q.pending_count() as i64,
            None => -1,
        }
    }

    /// Best-effort flush: block until the pending list is empty and no
    /// queue is mid-drain. Not called by `Drop` — see `DESIGN.md` §4.D.2.
    pub fn drain_blocking(&self) {
        loop {
            {
                let state = self.shared.state.lock();
                if state.pending.is_empty() && state.queues.values().all(|q| !q.processing) {
                    return;
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl<H: Host, S: IndexSpec> Drop for AsyncIndexQueue<H, S> {
    fn drop(&mut self) {
        self.shared.state.lock().cancelled = true;
        self.shared.signal.signal();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Find the deepest pending queue and remove it from the pending list.
/// `spec.md` describes this as "sort ascending, pick last"; a single
/// max-by-key pass plus `swap_remove` is an equivalent O(n) realization of
/// the same depth-priority policy (`spec.md` §9 Design Notes: "A priority
/// heap is an equivalent choice with the same observable policy").
fn pick_deepest<S: IndexSpec>(state: &mut State<S>) -> Option<SpecKey<S>> {
    let (idx, _) = state
        .pending
        .iter()
        .enumerate()
        .max_by_key(|(_, key)| state.queues.get(key).map(|q| q.dict.len()).unwrap_or(0))?;
    Some(state.pending.swap_remove(idx))
}

fn worker_loop<H: Host, S: IndexSpec>(shared: Arc<Shared<H, S>>) {
    loop {
        let selected = {
            let mut state = shared.state.lock();
            loop {
                if state.cancelled {
                    return;
                }
                if !state.pending.is_empty() {
                    break;
                }
                drop(state);
                shared.signal.wait_timeout(shared.config.interval);
                state = shared.state.lock();
            }

            let key = match pick_deepest(&mut state) {
                Some(k) => k,
                None => continue,
            };
            let queue = state.queues.get_mut(&key).expect("pending entry always has a live SpecQueue");
            let old_dict = std::mem::take(&mut queue.dict);
            queue.nactive = old_dict.len();
            queue.pending = false;
            queue.processing = true;
            let spec = queue.retained.clone().expect("a pending/processing queue always retains its spec");
            tracing::debug!(depth = queue.nactive, "selected deepest pending index for drain");
            (key, spec, old_dict)
        };

        let (key, spec, old_dict) = selected;
        drain_batch(&shared, spec.as_ref(), old_dict.into_values());

        let mut state = shared.state.lock();
        let requeue = if let Some(queue) = state.queues.get_mut(&key) {
            queue.processing = false;
            queue.nactive = 0;
            let has_new_work = !queue.dict.is_empty();
            if has_new_work {
                queue.pending = true;
                // Still queued: the reference taken at submit time is kept.
            } else {
                // Fully drained with nothing new: release the reference
                // taken at submit time. The entry itself stays in `queues`,
                // idle, so `pending_count` keeps resolving it to `0` rather
                // than falling back to "never submitted."
                queue.retained = None;
            }
            has_new_work
        } else {
            false
        };
        if requeue {
            state.pending.push(key);
        }
    }
}

/// Drain one swapped-out batch for a single index (`spec.md` §4.D,
/// "Draining a batch").
fn drain_batch<H: Host, S: IndexSpec>(
    shared: &Shared<H, S>,
    spec: &S,
    docs: impl Iterator<Item = IndexableDocument<S::Key, S::Attrs>>,
) {
    let mut indexer = spec.new_indexer();

    for doc in docs {
        if spec.is_deleted() {
            // Remaining queued records are freed via the discard path once
            // the loop below notices the deletion; stop handing more work
            // to an indexer whose target index is gone (`spec.md` §7).
            break;
        }
        shared.host.lock();
        let ctx = spec.init_add_document(&doc.key, &doc.attrs);
        shared.host.unlock();

        let Some(ctx) = ctx else {
            tracing::error!("failed to initialize add-document context; item dropped");
            continue;
        };
        if !spec.add_document(&mut indexer, ctx) {
            tracing::error!("indexer rejected document; item dropped");
        }
        // `doc`'s key and attrs are dropped here, releasing the retained
        // key string and the queued record (`spec.md` §4.D step 4).
    }

    shared.host.lock();
    if spec.is_deleted() {
        spec.discard(indexer);
    } else {
        spec.commit(indexer);
    }
    shared.host.unlock();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use big_s::S;
    use maplit::hashmap;

    use super::*;
    use crate::host::LocalHost;

    /// Process-wide, so two `FakeIndex`es in the same test can be stamped
    /// with a shared commit order.
    static NEXT_COMMIT_SEQ: AtomicUsize = AtomicUsize::new(1);

    struct FakeIndex {
        deleted: AtomicBool,
        committed: AtomicUsize,
        discarded: AtomicUsize,
        added: AtomicUsize,
        /// The value of `NEXT_COMMIT_SEQ` at the moment this index last
        /// committed, or 0 if it never has. Lets a test observe *which of
        /// two indexes committed first*, not just that both eventually did.
        commit_seq: AtomicUsize,
        /// The attrs values handed to the most recently committed batch, in
        /// drain order.
        last_batch: Mutex<Vec<u32>>,
    }

    impl FakeIndex {
        fn new() -> Arc<Self> {
            Arc::new(FakeIndex {
                deleted: AtomicBool::new(false),
                committed: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
                added: AtomicUsize::new(0),
                commit_seq: AtomicUsize::new(0),
                last_batch: Mutex::new(Vec::new()),
            })
        }
    }

    impl IndexSpec for FakeIndex {
        type Key = String;
        type Attrs = u32;
        type AddDocumentCtx = u32;
        type Indexer = Vec<u32>;

        fn is_deleted(&self) -> bool {
            self.deleted.load(Ordering::SeqCst)
        }

        fn new_indexer(&self) -> Self::Indexer {
            Vec::new()
        }

        fn init_add_document(&self, _key: &Self::Key, attrs: &Self::Attrs) -> Option<Self::AddDocumentCtx> {
            Some(*attrs)
        }

        fn add_document(&self, indexer: &mut Self::Indexer, ctx: Self::AddDocumentCtx) -> bool {
            indexer.push(ctx);
            self.added.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn commit(&self, indexer: Self::Indexer) {
            self.committed.fetch_add(indexer.len(), Ordering::SeqCst);
            self.commit_seq.store(NEXT_COMMIT_SEQ.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
            *self.last_batch.lock() = indexer;
        }

        fn discard(&self, _indexer: Self::Indexer) {
            self.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn queue(batch: usize) -> AsyncIndexQueue<LocalHost, FakeIndex> {
        let host = LocalHost::new();
        AsyncIndexQueue::new(host, QueueConfig { interval: Duration::from_millis(50), index_batch_size: batch })
    }

    #[test]
    fn duplicate_submission_before_drain_collapses_to_one_entry() {
        let q = queue(100);
        let spec = FakeIndex::new();
        q.submit(Arc::clone(&spec), S("k1"), 1);
        q.submit(Arc::clone(&spec), S("k1"), 2);
        assert_eq!(q.pending_count(&spec), 1);
    }

    #[test]
    fn duplicate_submission_before_drain_keeps_the_last_observed_attrs() {
        // spec.md §5: "the last observed attribute set wins at indexing
        // time." A second submit for the same key before drain must
        // supersede the first, not be discarded by it. Batch size > 1 so
        // the first submit alone can't trigger an early drain before the
        // second one lands (a duplicate key never grows the dict past 1
        // entry, so the drain here only ever fires on the timed interval).
        let q = queue(5);
        let spec = FakeIndex::new();
        q.submit(Arc::clone(&spec), "k1".to_string(), 1);
        q.submit(Arc::clone(&spec), "k1".to_string(), 2);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(spec.committed.load(Ordering::SeqCst), 1);
        assert_eq!(*spec.last_batch.lock(), vec![2], "the later submit's attrs must win, not the earlier one");
    }

    #[test]
    fn fixture_batch_matches_expected_keys() {
        let fixture: HashMap<String, u32> = hashmap! { S("a") => 1, S("b") => 2, S("c") => 3 };
        let q = queue(1000);
        let spec = FakeIndex::new();
        for (k, v) in &fixture {
            q.submit(Arc::clone(&spec), k.clone(), *v);
        }
        assert_eq!(q.pending_count(&spec) as usize, fixture.len());
    }

    #[test]
    fn pending_count_is_minus_one_for_unknown_spec() {
        let q = queue(100);
        let spec = FakeIndex::new();
        assert_eq!(q.pending_count(&spec), -1);
    }

    #[test]
    fn reaching_batch_size_wakes_the_worker_and_drains() {
        let q = queue(3);
        let spec = FakeIndex::new();
        q.submit(Arc::clone(&spec), "a".to_string(), 1);
        q.submit(Arc::clone(&spec), "b".to_string(), 2);
        q.submit(Arc::clone(&spec), "c".to_string(), 3);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(q.pending_count(&spec), 0);
        assert_eq!(spec.committed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn deepest_queue_is_selected_before_a_shallower_one() {
        // A batch size high enough that neither queue self-wakes the
        // worker; both specs sit in the pending list together until the
        // worker's first timed wake, so the only thing that can determine
        // which commits first is the depth-priority policy itself
        // (`spec.md` §8 scenario 6: "Worker selects S1 first").
        let q = AsyncIndexQueue::<LocalHost, FakeIndex>::new(
            LocalHost::new(),
            QueueConfig { interval: Duration::from_millis(80), index_batch_size: 1000 },
        );
        let deep = FakeIndex::new();
        let shallow = FakeIndex::new();

        for i in 0..5 {
            q.submit(Arc::clone(&deep), format!("k{i}"), i);
        }
        q.submit(Arc::clone(&shallow), "only".to_string(), 0);
        assert_eq!(q.pending_count(&deep), 5, "both queues must still be pending before the first timed wake");
        assert_eq!(q.pending_count(&shallow), 1);

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(deep.committed.load(Ordering::SeqCst), 5);
        assert_eq!(shallow.committed.load(Ordering::SeqCst), 1);

        let deep_seq = deep.commit_seq.load(Ordering::SeqCst);
        let shallow_seq = shallow.commit_seq.load(Ordering::SeqCst);
        assert!(deep_seq > 0 && shallow_seq > 0, "both must have committed");
        assert!(deep_seq < shallow_seq, "the deeper queue (5 pending) must be drained before the shallower one (1 pending)");

        // A fully-drained-and-idle spec is still a *known* spec, not an
        // unsubmitted one: its pending count is 0, never -1.
        assert_eq!(q.pending_count(&deep), 0);
        assert_eq!(q.pending_count(&shallow), 0);
    }

    #[test]
    fn deleted_index_discards_instead_of_committing() {
        let q = queue(1000);
        let spec = FakeIndex::new();
        q.submit(Arc::clone(&spec), "k1".to_string(), 1);
        spec.deleted.store(true, Ordering::SeqCst);

        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(spec.discarded.load(Ordering::SeqCst), 1);
        assert_eq!(spec.committed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_cancels_and_joins_without_hanging() {
        let q = queue(1000);
        let spec = FakeIndex::new();
        q.submit(Arc::clone(&spec), "k1".to_string(), 1);
        drop(q);
        // Reaching this line without a hung join is the assertion.
    }
}
