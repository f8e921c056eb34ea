//! Per-process mailbox: a lock-free MPSC signal stack feeding a private
//! FIFO, supporting selective receive by tag.
//!
//! The teacher's `actor::mailbox::Mailbox` is a `Mutex<VecDeque<Message>>` —
//! correct, but not what spec.md §4.2 asks for ("genuinely lock-free
//! multi-producer push; a process that never receives must not block a
//! sender"). This module keeps the teacher's two-layer shape (an
//! unordered arrival structure feeding an ordered delivery structure) but
//! makes the arrival side a real lock-free Treiber stack: senders CAS a new
//! node onto the head, and only the owning process ever drains it, reversing
//! the LIFO arrival order back into FIFO before splicing it onto the private
//! queue. That private queue is where selective receive by tag scans: it
//! removes the first matching message and leaves every other message in its
//! original relative order, exactly as spec.md §4.2 requires.

use std::collections::VecDeque;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::message::Message;
use crate::pid::ProcessId;

struct Node {
    msg: Message,
    next: AtomicPtr<Node>,
}

/// A process's mailbox.
pub struct Mailbox {
    signal_head: AtomicPtr<Node>,
    /// Only touched while draining/receiving, which the scheduler guarantees
    /// happens on at most one thread at a time for a given process (the
    /// thread currently running it). Still a real mutex, not an UnsafeCell,
    /// because the public `len()`/`is_empty()` diagnostics may be called
    /// from any thread.
    local: Mutex<VecDeque<Message>>,
    pending: AtomicUsize,
}

unsafe impl Send for Mailbox {}
unsafe impl Sync for Mailbox {}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox {
            signal_head: AtomicPtr::new(ptr::null_mut()),
            local: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
        }
    }

    /// Enqueue a message. Lock-free; safe to call from any thread,
    /// including concurrently with the owning process draining/receiving.
    pub fn push(&self, tag: u64, from: ProcessId, payload: Box<dyn std::any::Any + Send>) {
        let node = Box::into_raw(Box::new(Node {
            msg: Message::new(tag, from, payload),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        loop {
            let head = self.signal_head.load(Ordering::Acquire);
            unsafe {
                (*node).next.store(head, Ordering::Relaxed);
            }
            if self
                .signal_head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Move every pending signal into the private FIFO, oldest first.
    fn drain(&self) {
        let head = self.signal_head.swap(ptr::null_mut(), Ordering::AcqRel);
        if head.is_null() {
            return;
        }
        // The arrival stack is LIFO; reverse the chain in place so splicing
        // it onto the back of `local` preserves actual arrival order.
        let mut prev: *mut Node = ptr::null_mut();
        let mut cur = head;
        let mut count = 0usize;
        while !cur.is_null() {
            let next = unsafe { (*cur).next.load(Ordering::Relaxed) };
            unsafe {
                (*cur).next.store(prev, Ordering::Relaxed);
            }
            prev = cur;
            cur = next;
            count += 1;
        }
        let mut local = self.local.lock();
        let mut node = prev;
        while !node.is_null() {
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Relaxed);
            local.push_back(boxed.msg);
        }
        self.pending.fetch_sub(count, Ordering::AcqRel);
    }

    /// Receive the oldest message with the given tag, leaving all other
    /// messages in their original relative order.
    pub fn receive_tagged(&self, tag: u64) -> Option<Message> {
        self.drain();
        let mut local = self.local.lock();
        let pos = local.iter().position(|m| m.tag() == tag)?;
        local.remove(pos)
    }

    /// Receive the oldest message regardless of tag.
    pub fn receive_any(&self) -> Option<Message> {
        self.drain();
        self.local.lock().pop_front()
    }

    /// Peek whether a message with the given tag is currently available,
    /// without removing it. Used by the scheduler's receive-with-timeout
    /// poll loop to decide whether to re-park or return it.
    pub fn has_tag(&self, tag: u64) -> bool {
        self.drain();
        self.local.lock().iter().any(|m| m.tag() == tag)
    }

    pub fn len(&self) -> usize {
        self.drain();
        self.local.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.drain();
    }
}
