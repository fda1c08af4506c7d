//! Role-based access control
//!
//! Each component instance (the ledger, every vault engine, the factory)
//! owns its own [`AccessControl`] value. There is no shared or inherited
//! registry: a role held on the ledger grants nothing on a vault.
//!
//! `DefaultAdmin` administers every role, including itself.

use crate::address::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Account {account} is missing role {role}")]
    MissingRole { account: Address, role: Role },

    #[error("Account {caller} cannot renounce a role on behalf of {account}")]
    RenounceForOther { caller: Address, account: Address },
}

/// Privileges checked before privileged entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Grants and revokes roles; configures the instance.
    DefaultAdmin,
    /// Ledger genesis and capped minting.
    Minter,
    /// One-way ledger activation.
    Activator,
    /// May trigger and distribute inheritance on a vault engine.
    Executor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::DefaultAdmin => "DEFAULT_ADMIN_ROLE",
            Role::Minter => "MINTER_ROLE",
            Role::Activator => "ACTIVATOR_ROLE",
            Role::Executor => "EXECUTOR_ROLE",
        };
        f.write_str(name)
    }
}

/// Role → members registry for one component instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControl {
    members: BTreeMap<Role, BTreeSet<Address>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry where `admin` holds `DefaultAdmin` plus any extra roles.
    pub fn with_admin(admin: Address, extra: &[Role]) -> Self {
        let mut acl = Self::new();
        acl.insert(Role::DefaultAdmin, admin);
        for role in extra {
            acl.insert(*role, admin);
        }
        acl
    }

    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        self.members
            .get(&role)
            .is_some_and(|set| set.contains(account))
    }

    pub fn check_role(&self, role: Role, account: &Address) -> Result<(), AccessError> {
        if self.has_role(role, account) {
            Ok(())
        } else {
            Err(AccessError::MissingRole {
                account: *account,
                role,
            })
        }
    }

    /// Grant `role` to `account`. Caller must hold `DefaultAdmin`.
    ///
    /// Returns `true` if the account did not already hold the role.
    pub fn grant_role(
        &mut self,
        caller: &Address,
        role: Role,
        account: Address,
    ) -> Result<bool, AccessError> {
        self.check_role(Role::DefaultAdmin, caller)?;
        Ok(self.insert(role, account))
    }

    /// Revoke `role` from `account`. Caller must hold `DefaultAdmin`.
    ///
    /// Returns `true` if the account held the role.
    pub fn revoke_role(
        &mut self,
        caller: &Address,
        role: Role,
        account: &Address,
    ) -> Result<bool, AccessError> {
        self.check_role(Role::DefaultAdmin, caller)?;
        Ok(self.remove(role, account))
    }

    /// Drop the caller's own membership of `role`.
    pub fn renounce_role(
        &mut self,
        caller: &Address,
        role: Role,
        account: &Address,
    ) -> Result<bool, AccessError> {
        if caller != account {
            return Err(AccessError::RenounceForOther {
                caller: *caller,
                account: *account,
            });
        }
        Ok(self.remove(role, account))
    }

    pub fn members(&self, role: Role) -> Vec<Address> {
        self.members
            .get(&role)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn insert(&mut self, role: Role, account: Address) -> bool {
        self.members.entry(role).or_default().insert(account)
    }

    fn remove(&mut self, role: Role, account: &Address) -> bool {
        self.members
            .get_mut(&role)
            .is_some_and(|set| set.remove(account))
    }
}
