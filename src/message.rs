//! Messages exchanged between processes.
//!
//! spec.md models a message's payload as an opaque pointer, because the
//! original system is the target of a compiler whose generated code already
//! knows how to interpret the bytes on the other end. `swarmrt` is consumed
//! directly by Rust programs, so the idiomatic equivalent of "opaque
//! pointer, interpreted by agreement between sender and receiver" is
//! `Box<dyn Any + Send>`, downcast by the receiver. This keeps the same
//! "isolation is the sender's responsibility, not the mailbox's" contract
//! spec.md §9 describes (deep-copy-on-send is explicitly optional there).

use std::any::Any;
use std::fmt;

use crate::pid::ProcessId;

/// A single message sitting in (or passing through) a mailbox.
pub struct Message {
    pub(crate) tag: u64,
    pub(crate) from: ProcessId,
    pub(crate) payload: Box<dyn Any + Send>,
}

impl Message {
    pub(crate) fn new(tag: u64, from: ProcessId, payload: Box<dyn Any + Send>) -> Self {
        Message { tag, from, payload }
    }

    /// The message's type tag. See [`crate::tags`] for the reserved range.
    #[inline]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// The PID of the process that sent this message.
    #[inline]
    pub fn from(&self) -> ProcessId {
        self.from
    }

    /// Borrow the payload as `T`, or `None` if it was sent as a different type.
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Consume the message, returning the payload as `T`.
    ///
    /// Returns `Err(self)` if the payload is not actually a `T`, so the
    /// caller can try a different type or re-queue the message.
    pub fn into_payload<T: 'static>(self) -> Result<T, Message> {
        match self.payload.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(payload) => Err(Message {
                tag: self.tag,
                from: self.from,
                payload,
            }),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("tag", &self.tag)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

/// Payload carried by `EXIT` and `DOWN` signals (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalPayload {
    /// PID of the process that exited.
    pub pid: ProcessId,
    /// Monitor reference (`0` for `EXIT`, since links are unreferenced).
    pub monitor_ref: u64,
    /// Exit reason code: `0` is normal, non-zero is abnormal (spec.md §7).
    pub reason: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        let msg = Message::new(42, ProcessId::next(), Box::new("hello".to_string()));
        assert_eq!(msg.payload::<String>().unwrap(), "hello");
        assert!(msg.payload::<u32>().is_none());
    }

    #[test]
    fn test_into_payload_wrong_type_returns_message() {
        let msg = Message::new(1, ProcessId::next(), Box::new(7u32));
        let msg = msg.into_payload::<String>().unwrap_err();
        assert_eq!(*msg.payload::<u32>().unwrap(), 7);
    }
}
