//! The abstract host surface this crate is built against (§6 of the design).
//!
//! Everything in this module is a boundary: the embedding server owns the
//! real implementation, and this crate only ever sees it through the [`Host`]
//! trait. [`LocalHost`] is an in-process mock used by the test suites of the
//! other modules in this crate; it is not meant to model a real server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lock_api::RawMutex as _;
use parking_lot::RawMutex;

/// Open-mode flags passed to [`Host::open_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFlags {
    pub write: bool,
}

impl KeyFlags {
    pub const READ: KeyFlags = KeyFlags { write: false };
    pub const WRITE: KeyFlags = KeyFlags { write: true };
}

/// The abstract host API consumed by this crate (`spec.md` §6).
///
/// A host binding implements this once, against whatever FFI surface its
/// embedding server actually exposes. The four associated types are opaque
/// to this crate: it clones, stores and compares them, but never inspects
/// their contents.
pub trait Host: Send + Sync + 'static {
    /// A host key handle. Valid only while the host lock is held.
    type Handle: Send + 'static;
    /// A thread-safe context derived from a blocked client.
    type Context: Send + Sync + Clone + 'static;
    /// An opaque token naming a suspended client.
    type BlockedClient: Send + 'static;
    /// An owned, host-managed string.
    type Str: Send + Sync + Clone + 'static;

    /// Acquire the host's global lock. Blocks until available.
    fn lock(&self);
    /// Release the host's global lock. Caller must currently hold it.
    fn unlock(&self);

    /// Suspend the calling client, returning a token used to resume it.
    fn block_client(&self) -> Self::BlockedClient;
    /// Resume the client named by `client`.
    fn unblock_client(&self, client: Self::BlockedClient);

    /// Derive a thread-safe context usable from any thread from a blocked
    /// client token.
    fn context_from_blocked_client(&self, client: &Self::BlockedClient) -> Self::Context;
    /// Release a context obtained from [`Host::context_from_blocked_client`].
    fn free_context(&self, ctx: Self::Context);

    /// Open a key by name. Must be called while the host lock is held.
    fn open_key(&self, ctx: &Self::Context, name: &Self::Str, flags: KeyFlags) -> Option<Self::Handle>;
    /// Close a previously opened key handle.
    fn close_key(&self, ctx: &Self::Context, handle: Self::Handle);

    /// Deep-copy `src` into a new host-owned string bound to `ctx`.
    fn new_string(&self, ctx: &Self::Context, src: &[u8]) -> Self::Str;
    /// Release a string created with [`Host::new_string`] (or retained via
    /// [`Host::retain_string`]).
    fn free_string(&self, ctx: &Self::Context, s: Self::Str);
    /// Take a new reference on an existing string.
    fn retain_string(&self, s: &Self::Str) -> Self::Str;
    /// Borrow the raw bytes behind a string.
    fn string_bytes<'a>(&self, s: &'a Self::Str) -> &'a [u8];
}

/// An in-process [`Host`] used by this crate's own test suites.
///
/// Modeled after the teacher's `IndexMapper`: a name-keyed map of resources
/// behind a lock, plus a raw host-lock primitive (`parking_lot::RawMutex`)
/// used exactly the way `SearchContext::lock`/`unlock` need it — as a pair
/// of calls not tied to a guard's lifetime, since the lock is held across
/// several separate method invocations on `self`, not across one scope.
pub struct LocalHost {
    lock: RawMutex,
    keys: parking_lot::Mutex<HashMap<String, u64>>,
    next_handle: AtomicU64,
    next_client: AtomicU64,
    /// Names that were deleted while unlocked, to exercise `check_timer`'s
    /// "tracked key may have been deleted" scenario in tests.
    deleted: parking_lot::Mutex<std::collections::HashSet<String>>,
}

impl LocalHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: RawMutex::INIT,
            keys: parking_lot::Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            next_client: AtomicU64::new(1),
            deleted: parking_lot::Mutex::new(std::collections::HashSet::new()),
        })
    }

    /// Test helper: mark `name` deleted, so the next [`Host::open_key`]
    /// against it returns `None`.
    pub fn delete_key(&self, name: &str) {
        self.deleted.lock().insert(name.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalBlockedClient(pub u64);

#[derive(Debug, Clone)]
pub struct LocalContext;

#[derive(Debug, Clone)]
pub struct LocalStr(pub Arc<Vec<u8>>);

impl Host for LocalHost {
    type Handle = LocalHandle;
    type Context = LocalContext;
    type BlockedClient = LocalBlockedClient;
    type Str = LocalStr;

    fn lock(&self) {
        self.lock.lock();
    }

    fn unlock(&self) {
        // Safety: `SearchContext` and `AsyncIndexQueue` never call `unlock`
        // without having called `lock` first — that invariant is this
        // crate's contract with its `Host`, not something `LocalHost` can
        // check on its own.
        unsafe { self.lock.unlock() };
    }

    fn block_client(&self) -> Self::BlockedClient {
        LocalBlockedClient(self.next_client.fetch_add(1, Ordering::Relaxed))
    }

    fn unblock_client(&self, _client: Self::BlockedClient) {}

    fn context_from_blocked_client(&self, _client: &Self::BlockedClient) -> Self::Context {
        LocalContext
    }

    fn free_context(&self, _ctx: Self::Context) {}

    fn open_key(&self, _ctx: &Self::Context, name: &Self::Str, _flags: KeyFlags) -> Option<Self::Handle> {
        let name = String::from_utf8_lossy(&name.0).into_owned();
        if self.deleted.lock().contains(&name) {
            return None;
        }
        let mut keys = self.keys.lock();
        let handle = *keys
            .entry(name)
            .or_insert_with(|| self.next_handle.fetch_add(1, Ordering::Relaxed));
        Some(LocalHandle(handle))
    }

    fn close_key(&self, _ctx: &Self::Context, _handle: Self::Handle) {}

    fn new_string(&self, _ctx: &Self::Context, src: &[u8]) -> Self::Str {
        LocalStr(Arc::new(src.to_vec()))
    }

    fn free_string(&self, _ctx: &Self::Context, _s: Self::Str) {}

    fn retain_string(&self, s: &Self::Str) -> Self::Str {
        LocalStr(Arc::clone(&s.0))
    }

    fn string_bytes<'a>(&self, s: &'a Self::Str) -> &'a [u8] {
        &s.0
    }
}
