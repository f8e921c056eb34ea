//! Timers: `send_after`/`cancel_timer`, delivered as ordinary tagged
//! messages (spec.md §3, §6 `TIMER` tag).
//!
//! Nothing in the teacher's `actor` module implements timers directly, but
//! the shape here follows the same pattern as its background machinery
//! (`actor::scheduler`'s worker threads): a dedicated OS thread owns a
//! `parking_lot::Mutex` + `Condvar`-guarded sorted queue and parks until the
//! next deadline or a wakeup, rather than busy-polling. A fired timer is
//! delivered exactly like any other send: pushed onto the target's mailbox,
//! and the target woken if it was parked in `receive`.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::pid::ProcessId;
use crate::process::Process;
use crate::tags;

struct TimerEntry {
    timer_ref: u64,
    deadline: Instant,
    target: ProcessId,
    /// `None` for a "silent" entry: used internally by timed `receive` to
    /// wake a parked process at a deadline without delivering a spurious
    /// `TIMER` message into its mailbox.
    payload: Option<Box<dyn Any + Send>>,
}

struct TimerState {
    entries: Vec<TimerEntry>,
    shutdown: bool,
}

/// Owns the sorted timer queue and the background thread that drains it.
pub struct Timers {
    state: Mutex<TimerState>,
    condvar: Condvar,
    next_ref: AtomicU64,
    running: AtomicBool,
}

impl Timers {
    fn new() -> Arc<Self> {
        Arc::new(Timers {
            state: Mutex::new(TimerState {
                entries: Vec::new(),
                shutdown: false,
            }),
            condvar: Condvar::new(),
            next_ref: AtomicU64::new(1),
            running: AtomicBool::new(true),
        })
    }

    /// Construct the timer subsystem and start its background thread.
    /// `get_process` resolves a pid to its live `Process`, mirroring the
    /// lookup pattern used by [`crate::link::LinkTable`]. `wake` is called
    /// with the target pid after delivery, so the scheduler — the only
    /// party that knows whether the target is host-thread-blocked or
    /// sitting in a run queue — can rouse it the right way.
    pub fn spawn<F, W>(get_process: F, wake: W) -> (Arc<Self>, JoinHandle<()>)
    where
        F: Fn(ProcessId) -> Option<Arc<Process>> + Send + Sync + 'static,
        W: Fn(ProcessId) + Send + Sync + 'static,
    {
        let timers = Timers::new();
        let worker = {
            let timers = Arc::clone(&timers);
            std::thread::Builder::new()
                .name("swarmrt-timer".into())
                .spawn(move || run_loop(timers, get_process, wake))
                .expect("failed to spawn timer thread")
        };
        (timers, worker)
    }

    /// Schedule `payload` to be delivered to `target` tagged `TIMER` after
    /// `delay`. Returns a ref usable with [`Timers::cancel`].
    pub fn send_after(&self, delay: Duration, target: ProcessId, payload: Box<dyn Any + Send>) -> u64 {
        self.schedule(delay, target, Some(payload))
    }

    /// Schedule a wakeup for `target` after `delay` with no mailbox message
    /// — the deadline half of a timed `receive`. The target is still woken
    /// via the scheduler's `wake` callback when this fires.
    pub fn wake_after(&self, delay: Duration, target: ProcessId) -> u64 {
        self.schedule(delay, target, None)
    }

    fn schedule(&self, delay: Duration, target: ProcessId, payload: Option<Box<dyn Any + Send>>) -> u64 {
        let timer_ref = self.next_ref.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;
        let mut state = self.state.lock();
        let pos = state
            .entries
            .binary_search_by(|e| e.deadline.cmp(&deadline))
            .unwrap_or_else(|p| p);
        state.entries.insert(
            pos,
            TimerEntry {
                timer_ref,
                deadline,
                target,
                payload,
            },
        );
        let is_earliest = pos == 0;
        drop(state);
        if is_earliest {
            self.condvar.notify_one();
        }
        timer_ref
    }

    /// Cancel a pending timer. Returns `false` if it already fired or never
    /// existed.
    pub fn cancel(&self, timer_ref: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.timer_ref != timer_ref);
        state.entries.len() != before
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.state.lock().shutdown = true;
        self.condvar.notify_all();
    }

    /// Number of timers still pending, for diagnostics/tests.
    pub fn pending_count(&self) -> usize {
        self.state.lock().entries.len()
    }
}

fn run_loop<F, W>(timers: Arc<Timers>, get_process: F, wake: W)
where
    F: Fn(ProcessId) -> Option<Arc<Process>>,
    W: Fn(ProcessId),
{
    loop {
        let mut state = timers.state.lock();
        if state.shutdown {
            return;
        }
        let now = Instant::now();
        while let Some(first) = state.entries.first() {
            if first.deadline > now {
                break;
            }
            let entry = state.entries.remove(0);
            parking_lot::MutexGuard::unlocked(&mut state, || {
                let target = entry.target;
                entry.deliver_into(&get_process);
                wake(target);
            });
        }
        if state.shutdown {
            return;
        }
        match state.entries.first() {
            Some(first) => {
                let wait = first.deadline.saturating_duration_since(Instant::now());
                timers.condvar.wait_for(&mut state, wait);
            }
            None => {
                timers.condvar.wait(&mut state);
            }
        }
    }
}

impl TimerEntry {
    /// Push the payload onto the target's mailbox, if any. Does not touch
    /// process state; the caller's `wake` callback decides how to rouse the
    /// target.
    fn deliver_into<F>(self, get_process: &F)
    where
        F: Fn(ProcessId) -> Option<Arc<Process>>,
    {
        if let Some(payload) = self.payload {
            if let Some(proc) = get_process(self.target) {
                proc.mailbox.push(tags::TIMER, self.target, payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::SlotIndex;
    use crate::process::Priority;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    fn make() -> Arc<Process> {
        Arc::new(Process::new(ProcessId::next(), SlotIndex(0), Priority::Normal, 100, None))
    }

    #[test]
    fn test_fires_after_delay() {
        let target = make();
        let table: Arc<StdMutex<HashMap<ProcessId, Arc<Process>>>> =
            Arc::new(StdMutex::new(HashMap::new()));
        table.lock().unwrap().insert(target.pid, Arc::clone(&target));
        let table2 = Arc::clone(&table);
        let (timers, _handle) =
            Timers::spawn(move |pid| table2.lock().unwrap().get(&pid).cloned(), |_| {});

        timers.send_after(Duration::from_millis(20), target.pid, Box::new(7u32));
        std::thread::sleep(Duration::from_millis(100));
        assert!(target.mailbox.has_tag(tags::TIMER));
        timers.shutdown();
    }

    #[test]
    fn test_cancel_before_fire_prevents_delivery() {
        let target = make();
        let table: Arc<StdMutex<HashMap<ProcessId, Arc<Process>>>> =
            Arc::new(StdMutex::new(HashMap::new()));
        table.lock().unwrap().insert(target.pid, Arc::clone(&target));
        let table2 = Arc::clone(&table);
        let (timers, _handle) =
            Timers::spawn(move |pid| table2.lock().unwrap().get(&pid).cloned(), |_| {});

        let r = timers.send_after(Duration::from_millis(200), target.pid, Box::new(1u32));
        assert!(timers.cancel(r));
        std::thread::sleep(Duration::from_millis(260));
        assert!(!target.mailbox.has_tag(tags::TIMER));
        timers.shutdown();
    }

    #[test]
    fn test_pending_count() {
        let target = make();
        let (timers, _handle) = Timers::spawn(move |_| None, |_| {});
        assert_eq!(timers.pending_count(), 0);
        timers.send_after(Duration::from_secs(5), target.pid, Box::new(1u32));
        assert_eq!(timers.pending_count(), 1);
        timers.shutdown();
    }
}
