//! SearchContext — cooperative lock-yielding (`spec.md` §4.C).
//!
//! The hard contract: a background task holds the host lock while touching
//! host state, and must periodically release it so the event loop can make
//! progress. Releasing the lock invalidates every host handle the task has
//! opened, so every such handle is tracked here and is reopened, via a
//! caller-supplied callback, on relock.
//!
//! Tracked entries use the tagged-variant model `spec.md` §9's Design Notes
//! recommend (`Owned`/`Borrowed`/`Closed`) instead of a raw handle plus a
//! `SHARED_HANDLE` boolean, which makes "handle is null while unlocked"
//! unrepresentable rather than merely documented.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::host::{Host, KeyFlags};

/// The fixed time budget a `SearchContext` lets a task hold the host lock
/// before yielding (`spec.md` §6, "Tunable constants").
pub const YIELD_BUDGET: Duration = Duration::from_nanos(100_000_000);

enum HandleState<H: Host> {
    Owned(H::Handle),
    Borrowed(H::Handle),
    Closed,
}

impl<H: Host> HandleState<H> {
    fn handle(&self) -> Option<&H::Handle> {
        match self {
            HandleState::Owned(h) | HandleState::Borrowed(h) => Some(h),
            HandleState::Closed => None,
        }
    }
}

type ReopenCallback<H> =
    Box<dyn FnMut(Option<&<H as Host>::Handle>, &mut (dyn Any + Send)) + Send>;
type PrivateDataDestructor = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

struct TrackedHandle<H: Host> {
    state: HandleState<H>,
    key_name: H::Str,
    flags: KeyFlags,
    reopen: ReopenCallback<H>,
    private_data: Box<dyn Any + Send>,
    destructor: Option<PrivateDataDestructor>,
    shared_key_name: bool,
}

/// A caller-facing reference to one tracked handle, stable across lock
/// cycles (`spec.md` §9: "an index/token that user code presents to the
/// SearchContext to dereference the current handle on demand").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackedHandleId(usize);

/// Per-entry options at insertion time (`spec.md` §3, "Tracked handle
/// entry").
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackOptions {
    /// This context does not own the handle; `unlock` must not close it.
    pub shared_handle: bool,
    /// `key_name` is not owned by this context; teardown must not free it.
    pub shared_key_name: bool,
}

/// Tracks host handles opened during a background task and enforces the
/// close-on-yield / reopen-on-resume protocol.
///
/// Owned by exactly one worker thread at a time; never shared across
/// threads (`spec.md` §3).
pub struct SearchContext<H: Host> {
    host: Arc<H>,
    ctx: H::Context,
    locked: bool,
    tracked: Vec<TrackedHandle<H>>,
    last_lock: Instant,
    ticks: u64,
}

impl<H: Host> SearchContext<H> {
    /// Initialize against a host context. Starts unlocked, with an empty
    /// tracked-handle list and the clock reset to now.
    pub fn new(host: Arc<H>, ctx: H::Context) -> Self {
        SearchContext { host, ctx, locked: false, tracked: Vec::new(), last_lock: Instant::now(), ticks: 0 }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Acquire the host lock and reopen every tracked handle.
    ///
    /// It is a programmer error to call this while already locked
    /// (`spec.md` §4.C, "Invariants").
    pub fn lock(&mut self) -> Result<()> {
        debug_assert!(!self.locked, "SearchContext::lock called while already locked");
        if self.locked {
            return Err(Error::AlreadyLocked);
        }
        self.host.lock();
        self.locked = true;
        self.reopen_all();
        Ok(())
    }

    /// Close every tracked handle whose state is `Owned` (not `Borrowed`),
    /// then release the host lock.
    pub fn unlock(&mut self) {
        for entry in &mut self.tracked {
            if let HandleState::Owned(_) = entry.state {
                if let HandleState::Owned(handle) =
                    std::mem::replace(&mut entry.state, HandleState::Closed)
                {
                    self.host.close_key(&self.ctx, handle);
                }
            }
        }
        self.host.unlock();
        self.locked = false;
    }

    /// Record the current monotonic time and zero the tick counter.
    pub fn reset_clock(&mut self) {
        self.last_lock = Instant::now();
        self.ticks = 0;
    }

    /// Track a freshly opened handle. Must be called while locked.
    pub fn track_handle(
        &mut self,
        handle: H::Handle,
        key_name: H::Str,
        flags: KeyFlags,
        reopen: impl FnMut(Option<&H::Handle>, &mut (dyn Any + Send)) + Send + 'static,
        private_data: Box<dyn Any + Send>,
        destructor: Option<PrivateDataDestructor>,
        options: TrackOptions,
    ) -> Result<TrackedHandleId> {
        debug_assert!(self.locked, "SearchContext::track_handle called while unlocked");
        if !self.locked {
            return Err(Error::NotLocked);
        }
        let state = if options.shared_handle { HandleState::Borrowed(handle) } else { HandleState::Owned(handle) };
        self.tracked.push(TrackedHandle {
            state,
            key_name,
            flags,
            reopen: Box::new(reopen),
            private_data,
            destructor,
            shared_key_name: options.shared_key_name,
        });
        Ok(TrackedHandleId(self.tracked.len() - 1))
    }

    /// The handle currently backing `id`, or `None` if unlocked, the entry
    /// was closed, or its key was missing at last reopen.
    pub fn handle(&self, id: TrackedHandleId) -> Option<&H::Handle> {
        if !self.locked {
            return None;
        }
        self.tracked.get(id.0).and_then(|e| e.state.handle())
    }

    /// Compute elapsed time since the last reset; if it has exceeded
    /// [`YIELD_BUDGET`], unlock then immediately relock (reopening every
    /// tracked handle), reset the clock, and report `yielded = true`.
    ///
    /// Must only be called while locked.
    pub fn check_timer(&mut self) -> Result<bool> {
        debug_assert!(self.locked, "SearchContext::check_timer called while unlocked");
        if !self.locked {
            return Err(Error::NotLocked);
        }
        self.ticks += 1;
        if self.last_lock.elapsed() >= YIELD_BUDGET {
            self.unlock();
            // `lock()` would double-check `!self.locked` and fail if we'd
            // somehow left it true; it is false here by construction.
            self.host.lock();
            self.locked = true;
            self.reopen_all();
            self.reset_clock();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn reopen_all(&mut self) {
        for entry in &mut self.tracked {
            let reopened = self.host.open_key(&self.ctx, &entry.key_name, entry.flags);
            match reopened {
                Some(h) => {
                    (entry.reopen)(Some(&h), entry.private_data.as_mut());
                    entry.state = HandleState::Owned(h);
                }
                None => {
                    (entry.reopen)(None, entry.private_data.as_mut());
                    entry.state = HandleState::Closed;
                }
            }
        }
    }
}

impl<H: Host> Drop for SearchContext<H> {
    fn drop(&mut self) {
        if self.locked {
            for entry in &mut self.tracked {
                if let HandleState::Owned(_) = entry.state {
                    if let HandleState::Owned(handle) = std::mem::replace(&mut entry.state, HandleState::Closed) {
                        self.host.close_key(&self.ctx, handle);
                    }
                }
            }
        }
        for entry in self.tracked.drain(..) {
            if !entry.shared_key_name {
                self.host.free_string(&self.ctx, entry.key_name);
            }
            if let Some(destructor) = entry.destructor {
                destructor(entry.private_data);
            }
        }
    }
}
