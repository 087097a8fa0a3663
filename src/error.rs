//! Error taxonomy (`spec.md` §7).
//!
//! Flat enum, one variant per failure mode the core itself can report. Most
//! of the taxonomy in `spec.md` §7 is *not* in this enum: programmer errors
//! are assertions (they abort, they don't return `Err`), and per-item
//! indexing failures / duplicate submissions are logged-and-continued
//! inside `AsyncIndexQueue`'s drain loop, never surfaced to a caller.

use crate::pool::PoolId;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// A `PoolId` that does not name a registered pool.
    ///
    /// `spec.md` §4.A calls this a programmer error ("assertion"); in debug
    /// builds `ThreadPoolRegistry::submit` asserts before this variant could
    /// ever be constructed. In release builds, where `debug_assert!` is
    /// compiled out, this is the real fallback path.
    #[error("no pool registered with id {0:?}")]
    PoolNotFound(PoolId),

    /// [`crate::context::SearchContext::lock`] called while already locked.
    #[error("SearchContext is already locked")]
    AlreadyLocked,

    /// An operation that requires the lock to be held
    /// ([`crate::context::SearchContext::check_timer`],
    /// [`crate::context::SearchContext::track_handle`]) was called while
    /// unlocked.
    #[error("SearchContext is not locked")]
    NotLocked,

    /// A host allocation or host-API call failed during dispatch.
    ///
    /// Per `spec.md` §4.B, this is the only failure the dispatcher reports
    /// synchronously; everything else is the handler's responsibility to
    /// report through the host context.
    #[error("host allocation failed while dispatching a command")]
    HostAllocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        insta::assert_snapshot!(Error::PoolNotFound(PoolId::default()).to_string(), @"no pool registered with id PoolId(0)");
        insta::assert_snapshot!(Error::AlreadyLocked.to_string(), @"SearchContext is already locked");
        insta::assert_snapshot!(Error::NotLocked.to_string(), @"SearchContext is not locked");
        insta::assert_snapshot!(Error::HostAllocation.to_string(), @"host allocation failed while dispatching a command");
    }
}
