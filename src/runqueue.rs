//! Lock-free intrusive MPSC run queue.
//!
//! Any thread must be able to push a woken process onto another scheduler's
//! run queue (spec.md §4.3: "wake" and "steal" are both cross-thread
//! pushes). That rules out the teacher's `crossbeam_deque::Worker`/
//! `Injector` pair, which is single-producer on the owning side. This is the
//! intrusive queue described by Dmitry Vyukov ("Non-intrusive MPSC
//! node-based queue"), adapted to be genuinely intrusive: the link field
//! lives directly on [`crate::process::Process`] (`rq_next`) instead of a
//! wrapper node, so enqueuing a process costs no allocation. The teacher's
//! own comfort with this shape of unsafe code is `actor::heap::GcHeader`'s
//! intrusive free list and `actor::scheduler::SpawnRequest`'s `unsafe impl
//! Send`; this module follows the same discipline: small, documented
//! `unsafe` blocks around raw pointers, with the invariants spelled out.
//!
//! Vyukov's original algorithm assumes a single consumer; the scheduler's
//! work-stealing policy (spec.md §4.3) needs a sibling scheduler to be able
//! to pop from a queue it doesn't own when its own queues run dry. Rather
//! than inventing an unsound multi-consumer lock-free pop, `pop` is guarded
//! by a small `parking_lot::Mutex` — contended only between a queue's owner
//! and an occasional thief, never on the push side, which is the path
//! spec.md actually requires to be lock-free (every message send and every
//! exit signal pushes; stealing is comparatively rare).
//!
//! `head`/`tail` are [`crossbeam_utils::CachePadded`] so the consumer-only
//! head pointer and the multi-producer tail pointer never share a cache
//! line — the teacher's own dependency on `crossbeam-utils`, used here for
//! the purpose its docs name first.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::pid::ProcessId;
use crate::process::Process;

/// A single MPSC queue of runnable processes.
///
/// # Safety invariants
/// - `push` may be called concurrently from any number of threads, lock-free.
/// - `pop` may be called from more than one thread (owner or a thief); the
///   internal `pop_lock` serializes them so the consumer-side head pointer
///   is never read by two threads at once.
/// - A `Process` must not be pushed onto more than one run queue at once;
///   callers check/set `Process::enqueued` before pushing and clear it
///   after popping.
pub struct RunQueue {
    head: CachePadded<std::cell::UnsafeCell<*mut Process>>,
    tail: CachePadded<AtomicPtr<Process>>,
    stub: Box<Process>,
    pop_lock: Mutex<()>,
}

unsafe impl Send for RunQueue {}
unsafe impl Sync for RunQueue {}

impl RunQueue {
    pub fn new() -> Self {
        let stub = Box::new(Process::new(
            ProcessId::next(),
            crate::arena::SlotIndex(usize::MAX),
            crate::process::Priority::Low,
            0,
            None,
        ));
        let stub_ptr = stub.as_ref() as *const Process as *mut Process;
        RunQueue {
            head: CachePadded::new(std::cell::UnsafeCell::new(stub_ptr)),
            tail: CachePadded::new(AtomicPtr::new(stub_ptr)),
            stub,
            pop_lock: Mutex::new(()),
        }
    }

    fn stub_ptr(&self) -> *mut Process {
        self.stub.as_ref() as *const Process as *mut Process
    }

    /// Enqueue a process. Safe to call from any thread.
    pub fn push(&self, proc: Arc<Process>) {
        let node_ptr = Arc::into_raw(proc) as *mut Process;
        unsafe {
            (*node_ptr).rq_next.store(ptr::null_mut(), Ordering::Relaxed);
        }
        let prev = self.tail.swap(node_ptr, Ordering::AcqRel);
        unsafe {
            (*prev).rq_next.store(node_ptr, Ordering::Release);
        }
    }

    fn push_stub(&self) {
        let stub_ptr = self.stub_ptr();
        unsafe {
            (*stub_ptr).rq_next.store(ptr::null_mut(), Ordering::Relaxed);
        }
        let prev = self.tail.swap(stub_ptr, Ordering::AcqRel);
        unsafe {
            (*prev).rq_next.store(stub_ptr, Ordering::Release);
        }
    }

    /// Dequeue the oldest runnable process, if any.
    ///
    /// May spuriously return `None` for a brief window while a concurrent
    /// `push` is between its tail-swap and its predecessor-link-store; the
    /// caller (the scheduler's pick-next loop) already falls back to
    /// stealing/parking on an empty result, so this is harmless.
    pub fn pop(&self) -> Option<Arc<Process>> {
        let _guard = self.pop_lock.lock();
        unsafe {
            let head_cell = self.head.get();
            let mut head = *head_cell;
            let stub_ptr = self.stub_ptr();
            let mut next = (*head).rq_next.load(Ordering::Acquire);

            if head == stub_ptr {
                if next.is_null() {
                    return None;
                }
                *head_cell = next;
                head = next;
                next = (*head).rq_next.load(Ordering::Acquire);
            }

            if !next.is_null() {
                *head_cell = next;
                return Some(Arc::from_raw(head));
            }

            let tail = self.tail.load(Ordering::Acquire);
            if head != tail {
                // Producer is mid-push: tail has moved but the predecessor
                // link hasn't landed yet. Treat as empty for now.
                return None;
            }

            self.push_stub();
            next = (*head).rq_next.load(Ordering::Acquire);
            if !next.is_null() {
                *head_cell = next;
                return Some(Arc::from_raw(head));
            }
            None
        }
    }

    /// Best-effort emptiness check. Racy against concurrent pushes, same as
    /// every lock-free queue's `is_empty` — only meaningful as a hint.
    pub fn is_empty(&self) -> bool {
        unsafe {
            let head = *self.head.get();
            head == self.stub_ptr() && (*head).rq_next.load(Ordering::Acquire).is_null()
        }
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RunQueue {
    fn drop(&mut self) {
        // Drain remaining real (non-stub) nodes so their Arc refcounts are
        // released instead of leaking.
        while let Some(proc) = self.pop() {
            drop(proc);
        }
    }
}
