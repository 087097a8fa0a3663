//! Blocked-Command Dispatcher (`spec.md` §4.B).
//!
//! Wraps an incoming host command, detaches the client, deep-copies its
//! arguments into a new context, and hands execution off to a named pool.
//! The worker-side protocol (host-lock acquire/release gated by
//! `NO_HOST_LOCK`, context release gated by `KEEP_HOST_CONTEXT`,
//! unconditional unblock) runs entirely inside the boxed job submitted to
//! [`crate::pool::ThreadPoolRegistry`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::host::Host;
use crate::pool::{PoolId, ThreadPoolRegistry};

/// Options drawn from `spec.md` §3's `{KEEP_HOST_CONTEXT, NO_HOST_LOCK}` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Do not release the thread-safe host context when the handler
    /// returns; a downstream owner (e.g. a streaming reply) has taken it
    /// over and is responsible for releasing it.
    pub keep_host_context: bool,
    /// Do not acquire the host lock before calling the handler.
    pub no_host_lock: bool,
}

/// Handed to the handler so it can opt into [`DispatchOptions::keep_host_context`]
/// from inside its own body (`spec.md` §4.B: "The option is opt-in from
/// inside the handler via a setter exposed on the record").
pub struct BlockedCommand {
    keep_context: Arc<AtomicBool>,
}

impl BlockedCommand {
    /// Mark the thread-safe context as owned by a downstream consumer; the
    /// dispatcher will not release it after the handler returns.
    pub fn keep_host_context(&self) {
        self.keep_context.store(true, Ordering::Relaxed);
    }
}

/// Handle a host command asynchronously (`spec.md` §4.B).
///
/// Deep-copies `args` into a new context bound to a fresh blocked-client
/// token, submits a record to `pool`, and returns immediately; the caller
/// is free to destroy `args` (and the context it came from) as soon as this
/// returns. The handler runs on a worker thread and is given the owned
/// argument copies plus a [`BlockedCommand`] it can use to keep the host
/// context alive past its own return.
pub fn dispatch<H, F>(
    registry: &ThreadPoolRegistry,
    pool: PoolId,
    host: Arc<H>,
    options: DispatchOptions,
    args: &[&[u8]],
    handler: F,
) -> Result<()>
where
    H: Host,
    F: FnOnce(&H::Context, &[H::Str], &BlockedCommand) + Send + 'static,
{
    let blocked_client = host.block_client();
    let ctx = host.context_from_blocked_client(&blocked_client);
    // Deep copy: each argument is turned into a new host-owned string bound
    // to `ctx`, independent of whatever buffer the caller's `args` slice
    // points into. The caller may free `args` the instant `dispatch` returns.
    let owned_args: Vec<H::Str> = args.iter().map(|a| host.new_string(&ctx, a)).collect();

    registry.submit(pool, move || {
        let keep_context = Arc::new(AtomicBool::new(options.keep_host_context));
        let command = BlockedCommand { keep_context: Arc::clone(&keep_context) };

        if !options.no_host_lock {
            host.lock();
        }
        handler(&ctx, &owned_args, &command);
        if !options.no_host_lock {
            host.unlock();
        }

        if !keep_context.load(Ordering::Relaxed) {
            host.free_context(ctx);
        }
        host.unblock_client(blocked_client);
        // `owned_args` is dropped here, releasing each argument string; a
        // real `Host` binding would free each one explicitly in `Drop`, but
        // this crate models strings as plain owned Rust values so `Vec`'s
        // own drop glue suffices.
    })
}
