//! A BEAM/Erlang-style actor runtime: arena-backed processes, an M:N
//! work-stealing scheduler, lock-free mailboxes with selective receive,
//! link/monitor supervision, a name registry, and timers, all running on a
//! fixed pool of OS threads.
//!
//! Grounded on the teacher's top-level `actor` crate: a small set of free
//! functions (`spawn`, `send`, `receive`, ...) backed by a single
//! process-lifetime global scheduler reached through a `OnceLock`, rather
//! than a handle threaded through every call site. Call [`init`] once at
//! startup; every other function in this crate panics if called before that
//! (or after [`shutdown`]).

mod api;
mod arena;
mod config;
mod context;
mod error;
mod link;
mod mailbox;
mod message;
mod pid;
mod process;
mod registry;
mod runqueue;
mod scheduler;
mod tags;
mod timer;

use std::sync::{Arc, OnceLock};

use scheduler::Scheduler;

pub use api::{
    cancel_timer, demonitor, exit, link as link_process, monitor, process_kill, receive_any,
    receive_tagged, register, self_pid, send, send_after, send_named, send_tagged, set_trap_exit,
    spawn, spawn_link, spawn_opts, unlink, unregister, whereis, yield_now, INFINITE,
};
pub use config::RuntimeConfig;
pub use error::{LinkError, RegisterError, SpawnError};
pub use message::{Message, SignalPayload};
pub use pid::ProcessId;
pub use process::{ExitReason, Priority};
pub use tags as reserved_tags;

static RUNTIME: OnceLock<Arc<Scheduler>> = OnceLock::new();

pub(crate) fn runtime() -> &'static Arc<Scheduler> {
    RUNTIME.get().expect("swarmrt::init was not called")
}

/// Start the runtime with default tunables (see [`RuntimeConfig`]) and adopt
/// the calling OS thread as a process. Returns that process's pid.
///
/// Panics if called more than once.
pub fn init() -> ProcessId {
    init_with(RuntimeConfig::default())
}

/// Start the runtime with a custom [`RuntimeConfig`] and adopt the calling
/// OS thread as a process, returning its pid.
///
/// Panics if called more than once.
pub fn init_with(config: RuntimeConfig) -> ProcessId {
    let scheduler = Scheduler::new(config);
    RUNTIME
        .set(Arc::clone(&scheduler))
        .unwrap_or_else(|_| panic!("swarmrt::init called more than once"));
    scheduler.adopt_host_thread()
}

/// Stop accepting new work, let every scheduler worker and the timer thread
/// drain, and join them. Blocks until shutdown completes.
pub fn shutdown() {
    runtime().shutdown_and_wait();
}

/// Number of live processes (spawned, not yet reaped).
pub fn process_count() -> usize {
    runtime().active_count()
}
