//! Reserved message tags (spec.md §6).
//!
//! These numeric values are a stable contract with out-of-scope external
//! collaborators (an I/O subsystem, hot code reload, distribution) that are
//! not part of this crate but are expected to interoperate with it by
//! tagging messages the same way. `swarmrt` itself only emits `EXIT`,
//! `DOWN`, and `TIMER`; the rest are reserved and must not be reused for
//! user messages.

/// No tag / unset.
pub const NONE: u64 = 0;
/// Exit signal delivered to a linked, trapping process.
pub const EXIT: u64 = 1;
/// Monitor notification: the watched process has died.
pub const DOWN: u64 = 2;
/// Timer fire, delivered by [`crate::send_after`].
pub const TIMER: u64 = 3;
/// Synchronous call request (reserved for an external service layer).
pub const CALL: u64 = 10;
/// Asynchronous cast (reserved for an external service layer).
pub const CAST: u64 = 11;
/// Stop request (reserved for an external service layer).
pub const STOP: u64 = 12;
/// Task result delivery (reserved for an external task layer).
pub const TASK_RESULT: u64 = 13;
/// Hot code reload notification (reserved; out of scope here).
pub const CODE_CHANGE: u64 = 14;
/// Message arriving from a remote node (reserved; distribution is out of scope).
pub const REMOTE_MSG: u64 = 16;
/// Port data delivery (reserved for an external I/O subsystem).
pub const PORT_DATA: u64 = 20;
/// Port accept notification (reserved for an external I/O subsystem).
pub const PORT_ACCEPT: u64 = 21;
/// Port closed notification (reserved for an external I/O subsystem).
pub const PORT_CLOSED: u64 = 22;

/// Lowest tag value available for user-defined messages.
///
/// Tags below this are reserved by the table above.
pub const USER_TAG_MIN: u64 = 1000;
