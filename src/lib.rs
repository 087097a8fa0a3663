//! Concurrent execution core for an embedded search/indexing extension.
//!
//! Four components, leaves-first:
//!
//! - [`pool`] — a fixed-size worker-pool registry (`spec.md` §4.A).
//! - [`dispatch`] — blocked-command dispatch onto a pool (`spec.md` §4.B).
//! - [`context`] — [`context::SearchContext`], the cooperative
//!   lock-yielding protocol (`spec.md` §4.C).
//! - [`queue`] — [`queue::AsyncIndexQueue`], the asynchronous per-index
//!   indexing queue (`spec.md` §4.D).
//!
//! [`host`] is the abstract host surface every other module is generic
//! over; [`runtime`] bundles the pool registry and the indexing queue into
//! the single process-wide object a host binding constructs at startup.
//! None of this crate's code spawns an HTTP server, parses a query
//! language, or touches on-disk index storage — those are the embedding
//! host's job (`spec.md` §1).

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod pool;
pub mod queue;
pub mod runtime;

pub use config::Config;
pub use context::{SearchContext, TrackOptions, TrackedHandleId};
pub use dispatch::{dispatch, BlockedCommand, DispatchOptions};
pub use error::{Error, Result};
pub use host::{Host, KeyFlags};
pub use pool::{PoolId, ThreadPoolRegistry};
pub use queue::{AsyncIndexQueue, IndexSpec, IndexableDocument, QueueConfig};
pub use runtime::Runtime;
