//! Name registry: a process can claim a unique name, and other processes
//! can look it up without knowing its PID.
//!
//! Grounded on the teacher's `actor::registry::ProcessRegistry`: twin maps
//! (name -> pid, pid -> names) under `parking_lot::RwLock`, so lookups
//! (read-heavy: `whereis`) don't contend with each other, only with the much
//! rarer `register`/`unregister`/`cleanup_process` writers.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::MAX_NAME_LEN;
use crate::error::RegisterError;
use crate::pid::ProcessId;

pub struct Registry {
    names: RwLock<FxHashMap<String, ProcessId>>,
    pid_names: RwLock<FxHashMap<ProcessId, String>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            names: RwLock::new(FxHashMap::default()),
            pid_names: RwLock::new(FxHashMap::default()),
        }
    }

    /// Bind `name` to `pid`. A process may hold at most one registered name
    /// (spec.md §3 Registry invariant); a name may be bound to at most one
    /// live process at a time.
    pub fn register(&self, name: &str, pid: ProcessId) -> Result<(), RegisterError> {
        if name.len() > MAX_NAME_LEN {
            return Err(RegisterError::NameTooLong);
        }
        if self.pid_names.read().contains_key(&pid) {
            return Err(RegisterError::AlreadyRegistered);
        }
        let mut names = self.names.write();
        if let Some(&existing) = names.get(name) {
            if existing != pid {
                return Err(RegisterError::NameTaken(existing));
            }
            return Ok(());
        }
        names.insert(name.to_string(), pid);
        self.pid_names.write().insert(pid, name.to_string());
        Ok(())
    }

    pub fn whereis(&self, name: &str) -> Option<ProcessId> {
        self.names.read().get(name).copied()
    }

    /// Remove `name`'s binding, returning `true` if it existed.
    pub fn unregister(&self, name: &str) -> bool {
        if let Some(pid) = self.names.write().remove(name) {
            self.pid_names.write().remove(&pid);
            true
        } else {
            false
        }
    }

    /// Remove any binding held by `pid`. Called by the scheduler's death
    /// routine (spec.md §4.7 step 6); a no-op if `pid` never registered a
    /// name.
    pub fn cleanup_process(&self, pid: ProcessId) {
        if let Some(name) = self.pid_names.write().remove(&pid) {
            self.names.write().remove(&name);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_whereis() {
        let reg = Registry::new();
        let pid = ProcessId::next();
        reg.register("alice", pid).unwrap();
        assert_eq!(reg.whereis("alice"), Some(pid));
    }

    #[test]
    fn test_duplicate_name_fails() {
        let reg = Registry::new();
        let pid1 = ProcessId::next();
        let pid2 = ProcessId::next();
        reg.register("bob", pid1).unwrap();
        let err = reg.register("bob", pid2).unwrap_err();
        assert_eq!(err, RegisterError::NameTaken(pid1));
    }

    #[test]
    fn test_process_already_registered_fails() {
        let reg = Registry::new();
        let pid = ProcessId::next();
        reg.register("one", pid).unwrap();
        let err = reg.register("two", pid).unwrap_err();
        assert_eq!(err, RegisterError::AlreadyRegistered);
    }

    #[test]
    fn test_unregister_then_idempotent() {
        let reg = Registry::new();
        let pid = ProcessId::next();
        reg.register("carol", pid).unwrap();
        assert!(reg.unregister("carol"));
        assert!(!reg.unregister("carol"));
        assert_eq!(reg.whereis("carol"), None);
    }

    #[test]
    fn test_cleanup_process_removes_binding() {
        let reg = Registry::new();
        let pid = ProcessId::next();
        reg.register("dave", pid).unwrap();
        reg.cleanup_process(pid);
        assert_eq!(reg.whereis("dave"), None);
        // Idempotent.
        reg.cleanup_process(pid);
    }

    #[test]
    fn test_register_after_cleanup_succeeds() {
        let reg = Registry::new();
        let pid1 = ProcessId::next();
        reg.register("eve", pid1).unwrap();
        reg.cleanup_process(pid1);
        let pid2 = ProcessId::next();
        reg.register("eve", pid2).unwrap();
        assert_eq!(reg.whereis("eve"), Some(pid2));
    }

    #[test]
    fn test_name_too_long_rejected() {
        let reg = Registry::new();
        let pid = ProcessId::next();
        let long_name = "x".repeat(MAX_NAME_LEN + 1);
        assert_eq!(reg.register(&long_name, pid), Err(RegisterError::NameTooLong));
    }

    #[test]
    fn test_concurrent_register_and_whereis() {
        use std::sync::Arc;

        let reg = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    let pid = ProcessId::next();
                    let name = format!("proc-{i}");
                    reg.register(&name, pid).unwrap();
                    assert_eq!(reg.whereis(&name), Some(pid));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
