//! Runtime-wide tunables.
//!
//! The teacher crate this runtime is grounded on scatters its constants next
//! to the structs they govern (`DEFAULT_REDUCTIONS` in `process.rs`,
//! `ACTOR_PAGE_SIZE` in `heap.rs`, and so on). `swarmrt` keeps those same
//! defaults as module-level constants for callers that don't need to
//! customize anything, but also collects them here so `init()` can be
//! parameterized without a long positional argument list.

/// Default number of reductions a process is granted per scheduling slice.
///
/// Matches BEAM's preemptive-reduction-counting approach: small enough that
/// a runaway process cannot monopolize a scheduler for long, large enough
/// that context-switch overhead stays a small fraction of useful work.
pub const DEFAULT_REDUCTIONS: u32 = 2000;

/// Default coroutine stack size per process: 64 KiB.
///
/// Virtual memory lazily commits pages, so tens of thousands of processes
/// each holding a 64 KiB virtual stack is feasible on modern systems.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Size in bytes of each arena-backed per-process heap block.
pub const HEAP_BLOCK_SIZE: usize = 2 * 1024;

/// Default maximum number of scheduler threads.
pub const DEFAULT_MAX_SCHEDULERS: usize = 64;

/// Default maximum number of live processes the arena can hold at once.
pub const DEFAULT_MAX_PROCESSES: usize = 100_000;

/// Default number of buckets in the name registry's hash table.
pub const DEFAULT_REGISTRY_BUCKETS: usize = 4096;

/// Maximum length, in bytes, of a registered process name.
pub const MAX_NAME_LEN: usize = 64;

/// Ceiling on how many free-list entries a single steal operation moves.
pub const ARENA_STEAL_BATCH: usize = 64;

/// How long an idle scheduler parks on its condvar before re-checking for
/// work. Bounds the staleness of a missed wakeup.
pub const SCHEDULER_PARK_TIMEOUT_MICROS: u64 = 500;

/// One in every this-many scheduling decisions may service the `Low`
/// priority class even when higher classes have runnable work, preventing
/// starvation inversion without starving higher-priority processes.
pub const LOW_PRIORITY_STEP_DOWN: u32 = 8;

/// Tunable parameters for [`crate::Runtime::init`].
///
/// Every field defaults to the module-level constant of the same purpose;
/// callers typically only override `num_schedulers`.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Number of OS scheduler threads. `0` means "one per available core".
    pub num_schedulers: usize,
    /// Maximum number of live processes the arena can hold.
    pub max_processes: usize,
    /// Reduction budget granted per scheduling slice.
    pub reductions_per_slice: u32,
    /// Coroutine stack size per process, in bytes.
    pub stack_size: usize,
    /// Number of buckets in the name registry.
    pub registry_buckets: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            num_schedulers: 0,
            max_processes: DEFAULT_MAX_PROCESSES,
            reductions_per_slice: DEFAULT_REDUCTIONS,
            stack_size: DEFAULT_STACK_SIZE,
            registry_buckets: DEFAULT_REGISTRY_BUCKETS,
        }
    }
}

impl RuntimeConfig {
    /// Start from defaults with the given number of scheduler threads.
    pub fn with_schedulers(num_schedulers: usize) -> Self {
        RuntimeConfig {
            num_schedulers,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.num_schedulers, 0);
        assert_eq!(cfg.max_processes, DEFAULT_MAX_PROCESSES);
        assert_eq!(cfg.reductions_per_slice, DEFAULT_REDUCTIONS);
    }

    #[test]
    fn test_with_schedulers() {
        let cfg = RuntimeConfig::with_schedulers(4);
        assert_eq!(cfg.num_schedulers, 4);
        assert_eq!(cfg.max_processes, DEFAULT_MAX_PROCESSES);
    }
}
