//! Per-index sub-queue (`spec.md` §3, "SpecDocQueue").
//!
//! Plain data, no locking of its own: every field here is only ever touched
//! while the owning [`super::AsyncIndexQueue`]'s single mutex is held, per
//! `SPEC_FULL.md` §4.D's collapse of the spec's two nested mutexes into one.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A queued mutation: the retained document key and the attribute set
/// computed by the matching phase (`spec.md` §3, "RuleIndexableDocument").
#[derive(Debug, Clone)]
pub struct IndexableDocument<K, A> {
    pub key: K,
    pub attrs: A,
}

/// `spec.md` describes this as holding "a pointer to its owning IndexSpec".
/// This queue's entry in [`super::State::queues`] is keyed by the spec's
/// pointer identity alone (non-owning, so a fully-drained-and-idle queue
/// doesn't have to be dropped from the map just to release the spec) — the
/// actual owning reference lives here, in `retained`, held only while the
/// queue is `pending` or `processing` (`spec.md` §4.D step 4: "take a
/// reference on the spec so it cannot be freed while queued").
pub(crate) struct SpecQueue<S, K, A> {
    pub(crate) dict: HashMap<K, IndexableDocument<K, A>>,
    pub(crate) pending: bool,
    pub(crate) processing: bool,
    pub(crate) nactive: usize,
    pub(crate) retained: Option<Arc<S>>,
}

impl<S, K: Eq + Hash, A> SpecQueue<S, K, A> {
    pub(crate) fn new() -> Self {
        SpecQueue { dict: HashMap::new(), pending: false, processing: false, nactive: 0, retained: None }
    }

    /// `nactive + size(live dict)`, matching `SchemaRules_GetPendingCount`
    /// (`spec.md` §4.D, "Pending-count query").
    pub(crate) fn pending_count(&self) -> usize {
        self.nactive + self.dict.len()
    }

    /// This queue belongs in the global pending list iff it carries the
    /// `PENDING` state (`spec.md` §3, SpecDocQueue invariants).
    pub(crate) fn is_idle(&self) -> bool {
        !self.pending && !self.processing
    }
}
