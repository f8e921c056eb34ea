//! Public, safe surface: everything a process actually calls. Grounded on
//! the teacher's `actor` module's free functions (`actor::spawn`,
//! `actor::send`, `actor::receive`) — a thin, panic-on-misuse wrapper around
//! the scheduler, rather than a trait object or builder API, matching the
//! teacher's preference for free functions over a client struct.

use std::any::Any;
use std::time::{Duration, Instant};

use crate::context;
use crate::error::{LinkError, RegisterError, SpawnError};
use crate::mailbox::Mailbox;
use crate::message::Message;
use crate::pid::ProcessId;
use crate::process::{Priority, Process, ProcessState};
use crate::tags;

fn self_proc() -> std::sync::Arc<Process> {
    let pid = self_pid();
    crate::runtime()
        .get_process(pid)
        .expect("current process missing from the process table")
}

/// The PID of the currently running process (or the host thread, once
/// [`crate::init`] has been called on it).
pub fn self_pid() -> ProcessId {
    context::current_pid().expect("swarmrt API called outside a running process")
}

/// Spawn a new process at [`Priority::Normal`], linked to nothing.
pub fn spawn<F>(entry: F) -> Result<ProcessId, SpawnError>
where
    F: FnOnce() + Send + 'static,
{
    crate::runtime().spawn(Priority::Normal, context::current_pid(), entry)
}

/// Spawn a new process at the given priority.
pub fn spawn_opts<F>(priority: Priority, entry: F) -> Result<ProcessId, SpawnError>
where
    F: FnOnce() + Send + 'static,
{
    crate::runtime().spawn(priority, context::current_pid(), entry)
}

/// Spawn a new process and atomically link it to the caller, so neither can
/// miss the other's exit between spawn and link (spec.md §4.6).
pub fn spawn_link<F>(entry: F) -> Result<ProcessId, SpawnError>
where
    F: FnOnce() + Send + 'static,
{
    let me = self_proc();
    let pid = crate::runtime().spawn(Priority::Normal, Some(me.pid), entry)?;
    let child = crate::runtime()
        .get_process(pid)
        .expect("just-spawned process missing from the process table");
    crate::runtime().links.link(&me, &child);
    Ok(pid)
}

/// Yield the current process back to the scheduler, letting other runnable
/// processes on this worker (or a thief) get a turn. Panics if called from
/// the host thread, which has no coroutine to suspend.
pub fn yield_now() {
    context::yield_now();
}

/// Request that `pid` terminate with the given reason. Idempotent; a no-op
/// if `pid` is already gone. If `pid` is already marked to die with a
/// different reason, the first reason wins.
pub fn process_kill(pid: ProcessId, reason: crate::process::ExitReason) {
    if let Some(proc) = crate::runtime().get_process(pid) {
        let mut inner = proc.inner.lock();
        if inner.exit_reason.is_none() {
            inner.exit_reason = Some(reason);
        }
    }
    crate::runtime().kill(pid);
}

/// Terminate the calling process with the given reason. Never returns.
pub fn exit(reason: crate::process::ExitReason) -> ! {
    let proc = self_proc();
    proc.inner.lock().exit_reason = Some(reason);
    loop {
        context::yield_now();
    }
}

/// Send an untagged message. Returns `false` if `target` no longer exists.
pub fn send(target: ProcessId, payload: Box<dyn Any + Send>) -> bool {
    send_tagged(target, tags::NONE, payload)
}

/// Send a tagged message, for use with [`receive_tagged`]'s selective
/// receive. Returns `false` if `target` no longer exists.
pub fn send_tagged(target: ProcessId, tag: u64, payload: Box<dyn Any + Send>) -> bool {
    crate::runtime().send(target, tag, self_pid(), payload)
}

/// Look up `name` in the registry and send it a tagged message. Returns
/// `false` if no process holds that name.
pub fn send_named(name: &str, tag: u64, payload: Box<dyn Any + Send>) -> bool {
    match crate::runtime().registry.whereis(name) {
        Some(pid) => send_tagged(pid, tag, payload),
        None => false,
    }
}

/// Wait forever for a matching message, regardless of timeout arguments
/// elsewhere in this module (spec.md §4.3: `UINT64_MAX` means wait forever).
pub const INFINITE: u64 = u64::MAX;

/// Wait for a message tagged `tag`, skipping over (and leaving in place) any
/// other messages ahead of it — selective receive, spec.md §4.2. `timeout_ms
/// == 0` polls without blocking; `timeout_ms == INFINITE` waits forever.
/// Returns `None` on timeout.
pub fn receive_tagged(tag: u64, timeout_ms: u64) -> Option<Message> {
    block_until(timeout_ms, move |mb| mb.receive_tagged(tag))
}

/// Wait for any message, taking the oldest one regardless of tag. Same
/// timeout contract as [`receive_tagged`].
pub fn receive_any(timeout_ms: u64) -> Option<Message> {
    block_until(timeout_ms, |mb| mb.receive_any())
}

/// The double-check-before-parking loop shared by every flavor of `receive`:
/// try the mailbox, mark `Waiting` under the process lock, try once more in
/// case a message landed in between (closing the lost-wakeup window), then
/// actually block — by yielding the coroutine for a scheduled process, or by
/// waiting on the host condvar for the thread that called [`crate::init`].
/// A finite timeout arms a silent wakeup timer so a process with no
/// matching message ever arriving still returns instead of parking forever.
fn block_until<F>(timeout_ms: u64, mut try_take: F) -> Option<Message>
where
    F: FnMut(&Mailbox) -> Option<Message>,
{
    let proc = self_proc();
    if let Some(msg) = try_take(&proc.mailbox) {
        return Some(msg);
    }
    if timeout_ms == 0 {
        return None;
    }
    let deadline = (timeout_ms != INFINITE).then(|| Instant::now() + Duration::from_millis(timeout_ms));
    let mut wake_ref: Option<u64> = None;

    loop {
        if let Some(msg) = try_take(&proc.mailbox) {
            if let Some(r) = wake_ref.take() {
                crate::runtime().cancel_wake(r);
            }
            return Some(msg);
        }
        let mut inner = proc.inner.lock();
        inner.state = ProcessState::Waiting;
        if let Some(msg) = try_take(&proc.mailbox) {
            inner.state = ProcessState::Running;
            drop(inner);
            if let Some(r) = wake_ref.take() {
                crate::runtime().cancel_wake(r);
            }
            return Some(msg);
        }
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                inner.state = ProcessState::Running;
                return None;
            }
            if wake_ref.is_none() {
                wake_ref = Some(crate::runtime().wake_after(deadline - now, proc.pid));
            }
        }
        if proc.is_host {
            inner = proc.block_on_host(inner);
            inner.state = ProcessState::Running;
            drop(inner);
        } else {
            drop(inner);
            context::yield_now();
        }
    }
}

/// Create a bidirectional link between the caller and `pid`.
pub fn link(pid: ProcessId) -> Result<(), LinkError> {
    let me = self_proc();
    let other = crate::runtime()
        .get_process(pid)
        .ok_or(LinkError::NoSuchProcess)?;
    crate::runtime().links.link(&me, &other);
    Ok(())
}

/// Remove a link. A no-op if it didn't exist or `pid` is already gone.
pub fn unlink(pid: ProcessId) {
    let me = self_proc();
    if let Some(other) = crate::runtime().get_process(pid) {
        crate::runtime().links.unlink(&me, &other);
    }
}

/// Start a one-shot monitor: the caller will receive a `DOWN` message tagged
/// with the returned ref when `pid` exits.
pub fn monitor(pid: ProcessId) -> Result<u64, LinkError> {
    let me = self_proc();
    let target = crate::runtime()
        .get_process(pid)
        .ok_or(LinkError::NoSuchProcess)?;
    Ok(crate::runtime().links.monitor(&me, &target))
}

/// Cancel a monitor before it fires. Returns `false` if the ref is unknown.
pub fn demonitor(monitor_ref: u64) -> bool {
    let me = self_proc();
    crate::runtime()
        .links
        .demonitor(&me, monitor_ref, |pid| crate::runtime().get_process(pid))
}

/// Bind `name` to the caller. A process may hold at most one name.
pub fn register(name: &str) -> Result<(), RegisterError> {
    crate::runtime().registry.register(name, self_pid())
}

/// Remove the calling process's registered name, if any. Returns `true` if
/// a binding existed.
pub fn unregister(name: &str) -> bool {
    crate::runtime().registry.unregister(name)
}

/// Look up the pid currently registered under `name`.
pub fn whereis(name: &str) -> Option<ProcessId> {
    crate::runtime().registry.whereis(name)
}

/// Schedule `payload` to be delivered to `target`, tagged `TIMER`, after
/// `delay`. Returns a ref usable with [`cancel_timer`].
pub fn send_after(delay: Duration, target: ProcessId, payload: Box<dyn Any + Send>) -> u64 {
    crate::runtime().timers().send_after(delay, target, payload)
}

/// Cancel a pending timer. Returns `false` if it already fired or never
/// existed.
pub fn cancel_timer(timer_ref: u64) -> bool {
    crate::runtime().timers().cancel(timer_ref)
}

/// Set whether the caller traps exits (receives linked peers' deaths as
/// ordinary `EXIT` messages instead of crashing). Returns the previous
/// value.
pub fn set_trap_exit(trap: bool) -> bool {
    let proc = self_proc();
    let mut inner = proc.inner.lock();
    let old = inner.flags.trap_exit;
    inner.flags.trap_exit = trap;
    old
}
