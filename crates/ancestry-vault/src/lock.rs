//! Per-vault execution locks
//!
//! An operation that moves funds out of (or into) a vault holds the vault's
//! lock until it returns. A second acquisition while held fails; callers
//! surface that as `VaultError::ExecutionLocked` and do not retry.

use crate::record::VaultId;
use std::cell::RefCell;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct ExecutionLocks {
    held: RefCell<BTreeSet<VaultId>>,
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `vault`, or `None` if it is already held.
    pub fn acquire(&self, vault: VaultId) -> Option<ExecutionGuard<'_>> {
        if !self.held.borrow_mut().insert(vault) {
            return None;
        }
        Some(ExecutionGuard { locks: self, vault })
    }

    pub fn is_locked(&self, vault: VaultId) -> bool {
        self.held.borrow().contains(&vault)
    }
}

/// Releases the lock when dropped, on success, error or unwind.
#[derive(Debug)]
pub struct ExecutionGuard<'a> {
    locks: &'a ExecutionLocks,
    vault: VaultId,
}

impl ExecutionGuard<'_> {
    #[cfg(test)]
    pub fn vault(&self) -> VaultId {
        self.vault
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.borrow_mut().remove(&self.vault);
    }
}
