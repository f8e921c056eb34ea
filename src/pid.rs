//! Process identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a process.
///
/// PIDs are assigned sequentially from a global atomic counter, guaranteeing
/// uniqueness within a single runtime instance for the lifetime of that
/// instance (the counter is never reset, so a freed arena slot can be reused
/// by a later process without ever repeating a PID — spec.md §4.1 invariant
/// ii).
///
/// The 64-bit value is bit-packed `[16-bit node_id | 8-bit creation | 40-bit
/// local_id]`. Distribution is out of scope for this crate, so `node_id` is
/// always `0` and `creation` is always `0` for PIDs this runtime issues; the
/// layout is kept anyway so a future distributed layer can address remote
/// processes without changing this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub(crate) u64);

const LOCAL_ID_MASK: u64 = 0x0000_00FF_FFFF_FFFF;

impl ProcessId {
    /// Generate a fresh, globally unique local PID.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ProcessId(COUNTER.fetch_add(1, Ordering::Relaxed) & LOCAL_ID_MASK)
    }

    /// Raw numeric value.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// 16-bit node identifier (bits 63..48). `0` means the local node.
    #[inline]
    pub fn node_id(self) -> u16 {
        (self.0 >> 48) as u16
    }

    /// 40-bit local process identifier (bits 39..0).
    #[inline]
    pub fn local_id(self) -> u64 {
        self.0 & LOCAL_ID_MASK
    }

    /// Whether this PID belongs to the local node.
    #[inline]
    pub fn is_local(self) -> bool {
        self.node_id() == 0
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<0.{}>", self.local_id())
    }
}
