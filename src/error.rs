//! Runtime error types.
//!
//! No error-handling crate (`thiserror`, `anyhow`) appears anywhere in the
//! corpus this runtime is grounded on; its own idiom is a small hand-written
//! enum or struct with a manual `Display` impl (see
//! `mesh_common::error::LexError`, `actor::registry::NameAlreadyRegistered`).
//! This module follows that idiom rather than reaching for an external
//! crate spec.md §7 doesn't call for.

use std::fmt;

use crate::pid::ProcessId;

/// Failure returned by [`crate::spawn`] and friends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// The arena has no free process slots or heap blocks left.
    ArenaExhausted,
    /// The runtime has not been initialized, or has already been shut down.
    NotRunning,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArenaExhausted => write!(f, "arena exhausted: no free process slots"),
            Self::NotRunning => write!(f, "runtime is not running"),
        }
    }
}

impl std::error::Error for SpawnError {}

/// Failure returned by [`crate::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// The name is already bound to a live process.
    NameTaken(ProcessId),
    /// The calling process already holds a different registered name.
    AlreadyRegistered,
    /// The name exceeds [`crate::config::MAX_NAME_LEN`] bytes.
    NameTooLong,
    /// The target process does not exist (already exited).
    NoSuchProcess,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameTaken(pid) => write!(f, "name already registered to {pid}"),
            Self::AlreadyRegistered => write!(f, "process already holds a registered name"),
            Self::NameTooLong => write!(f, "name exceeds maximum registered name length"),
            Self::NoSuchProcess => write!(f, "no such process"),
        }
    }
}

impl std::error::Error for RegisterError {}

/// Failure returned by [`crate::link`] and [`crate::monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The target process does not exist (already exited).
    NoSuchProcess,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchProcess => write!(f, "no such process"),
        }
    }
}

impl std::error::Error for LinkError {}
