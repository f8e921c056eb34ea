//! Process control block (PCB).
//!
//! Grounded on the teacher's `actor::process::Process`, split into two
//! pieces the teacher didn't need to split: a lock-free outer `ProcessCell`
//! (identity, the intrusive run-queue link, and the mailbox's lock-free
//! signal stack) and a `parking_lot::Mutex`-guarded `ProcessInner` for
//! everything that doesn't need to survive without a lock (state, priority,
//! reductions, links, monitors, the process-local mailbox FIFO). The split
//! exists because spec.md requires the run queue and the mailbox's signal
//! stack to be genuinely lock-free — the teacher's single
//! `Arc<Mutex<Process>>` would serialize exactly the cross-thread paths
//! (wake-on-send, steal-on-empty) those structures exist to keep parallel.

use std::collections::HashSet;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::arena::{BlockIndex, SlotIndex};
use crate::config::DEFAULT_REDUCTIONS;
use crate::context::CoroutineHandle;
use crate::mailbox::Mailbox;
use crate::pid::ProcessId;

/// Scheduling priority class. Ordered `High` > `Normal` > `Low`, matching
/// the `max, high, normal, low` classes of spec.md §3 minus the reserved
/// `max` class (not exposed to user spawns; reserved for runtime-internal
/// work such as timer delivery).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Max,
    High,
    Normal,
    Low,
}

impl Priority {
    /// All four classes, in scheduling precedence order.
    pub const ALL: [Priority; 4] = [Priority::Max, Priority::High, Priority::Normal, Priority::Low];

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Priority::Max => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Execution state of a process (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Freshly spawned or rescheduled; sitting in a run queue.
    Runnable,
    /// Currently executing on a scheduler thread.
    Running,
    /// Blocked in `receive` with no matching message.
    Waiting,
    /// Kill requested or about to die; scheduler will run the death routine.
    Suspended,
    /// Terminated; cleanup is in progress or complete.
    Exiting,
    /// Arena slot has been returned; this value is never observed by user
    /// code (the `Process` is dropped once it is reached), kept only so
    /// `ProcessState` documents the full lifecycle spec.md §4.4 names.
    Free,
}

/// Why a process terminated (spec.md §7 error taxonomy + §4.7).
#[derive(Debug, Clone, PartialEq)]
pub enum ExitReason {
    /// Entry function returned normally. Wire code `0`.
    Normal,
    /// `process_kill` was called. Wire code `-1`.
    Killed,
    /// The process panicked or raised an application error. Wire code `-2`.
    Error(String),
    /// A linked peer died and this process does not trap exits, so the
    /// peer's reason propagated. Wire code mirrors the inner reason.
    Linked(ProcessId, Box<ExitReason>),
    /// Caller-supplied reason via `process_kill(pid, reason)` variants that
    /// carry a custom code.
    Custom(i32, String),
}

impl ExitReason {
    /// The `i32` wire code spec.md §6 assigns to EXIT/DOWN signal payloads.
    /// `0` is normal; everything else is abnormal.
    pub fn code(&self) -> i32 {
        match self {
            ExitReason::Normal => 0,
            ExitReason::Killed => -1,
            ExitReason::Error(_) => -2,
            ExitReason::Linked(_, inner) => inner.code(),
            ExitReason::Custom(code, _) => *code,
        }
    }

    /// Whether this reason counts as "normal" for link-propagation purposes
    /// (spec.md §4.7: only reason ≠ normal crashes a non-trapping peer).
    pub fn is_normal(&self) -> bool {
        self.code() == 0
    }
}

/// Per-process flags settable via [`crate::process_flag`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessFlags {
    pub trap_exit: bool,
}

/// The lock-guarded portion of a process's state.
pub(crate) struct ProcessInner {
    pub state: ProcessState,
    pub priority: Priority,
    /// Signed reduction budget; reaching `<= 0` triggers preemption.
    pub reductions: i64,
    pub flags: ProcessFlags,
    /// Bidirectional link peers (spec.md §3 Link invariant).
    pub links: HashSet<ProcessId>,
    /// Refs this process allocated by monitoring others: ref -> watched.
    pub my_monitors: FxHashMap<u64, ProcessId>,
    /// Refs allocated by others monitoring this process: ref -> watcher.
    pub monitors_me: FxHashMap<u64, ProcessId>,
    pub exit_reason: Option<ExitReason>,
    pub parent: Option<ProcessId>,
    pub registered_name: Option<String>,
    pub heap_block: Option<BlockIndex>,
    pub owning_scheduler: usize,
    /// Present whenever the process is not currently executing: taken by
    /// the worker thread for the duration of a `resume()` call, put back if
    /// the process yielded rather than finished.
    pub coroutine: Option<CoroutineHandle>,
}

impl ProcessInner {
    fn new(priority: Priority, reductions: u32, parent: Option<ProcessId>) -> Self {
        ProcessInner {
            state: ProcessState::Runnable,
            priority,
            reductions: reductions as i64,
            flags: ProcessFlags::default(),
            links: HashSet::new(),
            my_monitors: FxHashMap::default(),
            monitors_me: FxHashMap::default(),
            exit_reason: None,
            parent,
            registered_name: None,
            heap_block: None,
            owning_scheduler: 0,
            coroutine: None,
        }
    }
}

/// The process control block.
///
/// Stored once per live process, reference-counted (`Arc<Process>`) so the
/// lock-free run queue can hold a strong owning pointer via
/// `Arc::into_raw`/`Arc::from_raw` without a second allocation.
pub struct Process {
    pub pid: ProcessId,
    pub(crate) slot: SlotIndex,
    /// Intrusive run-queue link (spec.md §3: "intrusive rq_next atomic
    /// pointer used by the scheduler's MPSC run queue"). Null when not
    /// enqueued. Only ever touched by [`crate::runqueue`].
    pub(crate) rq_next: AtomicPtr<Process>,
    /// `true` while this process is linked into some run queue, guarding
    /// the "at most one run queue at a time" invariant without needing to
    /// inspect `rq_next` (which is also used as the queue's internal
    /// "is this the tail" sentinel value).
    pub(crate) enqueued: AtomicBool,
    /// Kill request flag; observed at the next scheduler entry (spec.md §5).
    pub(crate) kill_flag: AtomicBool,
    /// Snapshot of priority, readable lock-free by the scheduler's pick-next
    /// step without contending with the process itself.
    pub(crate) priority_hint: AtomicU32,
    pub mailbox: Mailbox,
    /// `true` for the OS thread that called [`crate::init`] (and any other
    /// thread adopted via the same path), which runs as a process without
    /// ever being wrapped in a coroutine. Such a process blocks on
    /// `wait_cond` instead of yielding when it calls `receive`.
    pub(crate) is_host: bool,
    pub(crate) wait_cond: parking_lot::Condvar,
    pub(crate) inner: Mutex<ProcessInner>,
}

// `rq_next` is a raw pointer but is only ever dereferenced by the run queue
// module under its documented single-consumer discipline; see runqueue.rs.
unsafe impl Send for Process {}
unsafe impl Sync for Process {}

impl Process {
    pub(crate) fn new(
        pid: ProcessId,
        slot: SlotIndex,
        priority: Priority,
        reductions: u32,
        parent: Option<ProcessId>,
    ) -> Self {
        Process {
            pid,
            slot,
            rq_next: AtomicPtr::new(ptr::null_mut()),
            enqueued: AtomicBool::new(false),
            kill_flag: AtomicBool::new(false),
            priority_hint: AtomicU32::new(priority.index() as u32),
            mailbox: Mailbox::new(),
            is_host: false,
            wait_cond: parking_lot::Condvar::new(),
            inner: Mutex::new(ProcessInner::new(priority, reductions, parent)),
        }
    }

    /// Build the pseudo-process representing the OS thread that called
    /// [`crate::init`]. It starts `Running` and is never driven by a
    /// coroutine or the scheduler's run queues.
    pub(crate) fn new_host(pid: ProcessId, slot: SlotIndex) -> Self {
        let mut proc = Process::new(pid, slot, Priority::Normal, DEFAULT_REDUCTIONS, None);
        proc.is_host = true;
        proc.inner.lock().state = ProcessState::Running;
        proc
    }

    /// Block the calling (host) thread until woken by [`Process::wake_host`]
    /// or a matching message arrives. Caller must already hold `inner`'s
    /// lock with `state == Waiting`; returns with the lock re-acquired.
    pub(crate) fn block_on_host<'a>(
        &self,
        mut guard: parking_lot::MutexGuard<'a, ProcessInner>,
    ) -> parking_lot::MutexGuard<'a, ProcessInner> {
        self.wait_cond.wait(&mut guard);
        guard
    }

    pub(crate) fn wake_host(&self) {
        self.wait_cond.notify_all();
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.inner.lock().priority
    }

    #[inline]
    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        !matches!(
            self.inner.lock().state,
            ProcessState::Exiting | ProcessState::Free
        )
    }

    /// Request termination. Idempotent: killing an already-dead process
    /// (or one already marked for death) is a no-op (spec.md §8 boundary
    /// behavior).
    pub(crate) fn request_kill(&self) {
        self.kill_flag.store(true, Ordering::Release);
    }

    pub(crate) fn kill_requested(&self) -> bool {
        self.kill_flag.load(Ordering::Acquire)
    }

    /// Decrement the reduction counter by one, returning `true` if the
    /// budget is exhausted and the process should yield.
    pub(crate) fn consume_reduction(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.reductions -= 1;
        inner.reductions <= 0
    }

    pub(crate) fn reset_reductions(&self, budget: u32) {
        self.inner.lock().reductions = budget as i64;
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("state", &inner.state)
            .field("priority", &inner.priority)
            .field("reductions", &inner.reductions)
            .field("links", &inner.links)
            .field("mailbox_len", &self.mailbox.len())
            .finish()
    }
}
