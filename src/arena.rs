//! Process arena: a single preallocated region handing out process slots and
//! fixed-size heap blocks to schedulers without a syscall per spawn.
//!
//! Grounded on the teacher's `actor::heap::ActorHeap` (bump allocation plus
//! an intrusive free list over raw pointers, `unsafe impl Send`) generalized
//! from "one heap per process" to "one partitioned slab shared by every
//! scheduler", which is what spec.md §4.1 actually asks for: per-scheduler
//! free-list partitions with steal-on-empty, not a per-process bump heap.
//! The steal-on-empty path's fixed lock ordering (destination partition
//! before victim partition, by ascending scheduler index) is grounded on the
//! same "always acquire sibling locks in a canonical order" discipline the
//! teacher's `scheduler::worker_loop` steal path follows with
//! `crossbeam_deque::Stealer`.

use parking_lot::Mutex;

use crate::config::{ARENA_STEAL_BATCH, HEAP_BLOCK_SIZE};

/// Stable index of a process's slot in the arena. Never reused while a
/// `ProcessId` referring to its occupant is still reachable from user code
/// (the slot is only returned to its partition's free list after the death
/// routine has fully run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(pub usize);

/// Stable index of a 2 KiB heap block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockIndex(pub usize);

struct Partition {
    free_slots: Vec<usize>,
    free_blocks: Vec<usize>,
}

impl Partition {
    fn new() -> Self {
        Partition {
            free_slots: Vec::new(),
            free_blocks: Vec::new(),
        }
    }
}

/// The shared process arena.
///
/// `num_slots` is the hard cap on live processes (spec.md §4.1: the arena is
/// sized up front, not grown). Slots and heap blocks are distributed evenly
/// across `num_partitions` (one per scheduler) at construction time; a
/// partition that runs dry steals up to half of a sibling's free list rather
/// than falling back to a shared global pool, keeping the common case
/// lock-free from every scheduler's perspective except the one that is
/// actually out of slots.
pub struct Arena {
    partitions: Vec<Mutex<Partition>>,
    heap_blocks: Box<[Mutex<[u8; HEAP_BLOCK_SIZE]>]>,
    num_slots: usize,
}

impl Arena {
    pub fn new(num_slots: usize, num_partitions: usize) -> Self {
        let num_partitions = num_partitions.max(1);
        let mut partitions: Vec<Mutex<Partition>> =
            (0..num_partitions).map(|_| Mutex::new(Partition::new())).collect();

        for slot in 0..num_slots {
            partitions[slot % num_partitions].get_mut().free_slots.push(slot);
        }
        for block in 0..num_slots {
            partitions[block % num_partitions].get_mut().free_blocks.push(block);
        }

        let heap_blocks = (0..num_slots)
            .map(|_| Mutex::new([0u8; HEAP_BLOCK_SIZE]))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Arena {
            partitions,
            heap_blocks,
            num_slots,
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Allocate a slot from the given partition, stealing from siblings
    /// (round-robin starting from the partition after `owner`) if the
    /// local free list is empty.
    pub fn alloc_slot(&self, owner: usize) -> Option<SlotIndex> {
        self.alloc_from(owner, |p| &mut p.free_slots).map(SlotIndex)
    }

    pub fn alloc_block(&self, owner: usize) -> Option<BlockIndex> {
        self.alloc_from(owner, |p| &mut p.free_blocks).map(BlockIndex)
    }

    fn alloc_from(
        &self,
        owner: usize,
        field: impl Fn(&mut Partition) -> &mut Vec<usize>,
    ) -> Option<usize> {
        let owner = owner % self.partitions.len();
        {
            let mut part = self.partitions[owner].lock();
            if let Some(idx) = field(&mut part).pop() {
                return Some(idx);
            }
        }
        self.steal_into(owner, &field)
    }

    /// Steal up to half of a sibling partition's free list into `owner`'s,
    /// then pop one entry. Lock ordering is always owner-then-victim by
    /// construction (owner's lock is released above before any victim lock
    /// is taken, and at most one victim lock is held at a time), so this
    /// never deadlocks against a concurrent steal running the same routine
    /// from a different owner.
    fn steal_into(
        &self,
        owner: usize,
        field: &impl Fn(&mut Partition) -> &mut Vec<usize>,
    ) -> Option<usize> {
        let n = self.partitions.len();
        for step in 1..n {
            let victim = (owner + step) % n;
            let mut victim_part = self.partitions[victim].lock();
            let victim_free = field(&mut victim_part);
            if victim_free.is_empty() {
                continue;
            }
            let take = (victim_free.len() / 2).max(1).min(ARENA_STEAL_BATCH);
            let stolen: Vec<usize> = victim_free.split_off(victim_free.len() - take);
            drop(victim_part);

            let mut owner_part = self.partitions[owner].lock();
            let owner_free = field(&mut owner_part);
            owner_free.extend(stolen);
            return owner_free.pop();
        }
        None
    }

    pub fn free_slot(&self, owner: usize, slot: SlotIndex) {
        let owner = owner % self.partitions.len();
        self.partitions[owner].lock().free_slots.push(slot.0);
    }

    pub fn free_block(&self, owner: usize, block: BlockIndex) {
        let owner = owner % self.partitions.len();
        self.partitions[owner].lock().free_blocks.push(block.0);
    }

    /// Total free slots across all partitions, for diagnostics/tests only.
    pub fn free_slot_count(&self) -> usize {
        self.partitions.iter().map(|p| p.lock().free_slots.len()).sum()
    }

    pub fn with_block<R>(&self, block: BlockIndex, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.heap_blocks[block.0].lock();
        f(&mut guard[..])
    }
}
