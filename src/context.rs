//! Stackful context switch.
//!
//! spec.md's Design Notes explicitly allow substituting a vetted stackful
//! coroutine crate for a hand-rolled register-context-switch, since getting
//! the latter right across target architectures is its own research
//! project. The teacher already made exactly that substitution
//! (`actor::stack::CoroutineHandle`, built on `corosensei`); this module
//! keeps its shape almost unchanged: a thread-local current-yielder pointer
//! that gets reinstalled on every resume (because a different process's
//! coroutine may run on this thread between one `yield_now` and the next),
//! and a thread-local current PID for `self()`.
//!
//! spec.md §4.2 also describes a `stack_base`/`stack_limit` comparison for
//! detecting stack overflow. Neither the teacher's `actor::stack` (which
//! only ever captures a stack base, for conservative GC root scanning that
//! this crate has no counterpart of — its heap is reclaimed whole at
//! process death, not scanned) nor `corosensei`'s `DefaultStack` exposes a
//! mid-coroutine stack pointer a scheduler thread could read to perform
//! that comparison; `DefaultStack` instead maps a guard page below the
//! stack, so a real overflow traps at the OS level rather than going
//! silently undetected. This module does not carry a vestigial
//! stack-base/stack-limit hook with no reader.

use std::cell::Cell;
use std::ptr;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult};

use crate::config::DEFAULT_STACK_SIZE;
use crate::pid::ProcessId;

thread_local! {
    static CURRENT_YIELDER: Cell<*const ()> = Cell::new(ptr::null());
    static CURRENT_PID: Cell<Option<ProcessId>> = Cell::new(None);
}

/// Suspend the currently running process's coroutine, returning control to
/// the scheduler thread that resumed it. Panics if called outside a running
/// process coroutine (a programmer error: `yield_now` has no meaning on the
/// scheduler's own stack).
pub fn yield_now() {
    let yielder_ptr = CURRENT_YIELDER.with(|c| c.get());
    assert!(
        !yielder_ptr.is_null(),
        "yield_now called outside a process context"
    );
    let yielder = unsafe { &*(yielder_ptr as *const corosensei::Yielder<(), ()>) };
    yielder.suspend(());
    // Another coroutine may have run on this OS thread while we were
    // suspended and clobbered the thread-local; reinstall our own pointer
    // now that we're back.
    CURRENT_YIELDER.with(|c| c.set(yielder_ptr));
}

pub fn current_pid() -> Option<ProcessId> {
    CURRENT_PID.with(|c| c.get())
}

pub(crate) fn set_current_pid(pid: Option<ProcessId>) {
    CURRENT_PID.with(|c| c.set(pid));
}

/// A suspended or runnable process coroutine.
pub struct CoroutineHandle {
    coroutine: Coroutine<(), (), ()>,
}

impl CoroutineHandle {
    /// Build a coroutine that will invoke `entry` with `args` when first
    /// resumed. `entry` must itself call [`yield_now`] (indirectly, via
    /// reduction-count preemption or a blocking receive) rather than run to
    /// completion in one slice, or it will starve its scheduler thread.
    pub fn new<F>(entry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = DefaultStack::new(DEFAULT_STACK_SIZE).expect("failed to allocate coroutine stack");
        let coroutine = Coroutine::with_stack(stack, move |yielder, ()| {
            let yielder_ptr = yielder as *const corosensei::Yielder<(), ()> as *const ();
            CURRENT_YIELDER.with(|c| c.set(yielder_ptr));
            entry();
            CURRENT_YIELDER.with(|c| c.set(ptr::null()));
        });
        CoroutineHandle { coroutine }
    }

    /// Resume the coroutine. Returns `true` if it yielded (still runnable
    /// later), `false` if it ran to completion.
    pub fn resume(&mut self) -> bool {
        match self.coroutine.resume(()) {
            CoroutineResult::Yield(()) => true,
            CoroutineResult::Return(()) => false,
        }
    }

    pub fn done(&self) -> bool {
        self.coroutine.done()
    }
}
