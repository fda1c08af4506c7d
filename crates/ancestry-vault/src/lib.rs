//! Ancestry Vaults
//!
//! Inheritance vaults on top of the Ancestry ledger.
//!
//! # Concepts
//!
//! - **Owner**: starts as the creator; replaced by the first beneficiary
//!   when inheritance is triggered
//! - **Conditions**: time or inactivity triggers; any one passing condition
//!   lets inheritance be executed
//! - **Lock window**: after triggering, funds stay put for
//!   `inheritance_lock_secs`; then the new owner either unlocks the vault and
//!   keeps it, or it is distributed and dissolved
//! - **Sacrificial share**: the per-mille of the balance sent to the sink on
//!   distribution before beneficiaries are paid
//!
//! # Flow
//!
//! ```text
//! VaultFactory::create_vault
//!   -> VaultEngine (own address, own roles)
//!        deposit:   ledger.transfer(user, engine.address(), amount)
//!        trigger:   execute_inheritance(vault, condition)
//!        wait:      inheritance_lock_secs
//!        payout:    distribute_inheritance(vault)   or   unlock_vault(vault)
//! ```

pub mod distribution;
pub mod engine;
pub mod events;
pub mod factory;
pub mod lock;
pub mod record;

#[cfg(test)]
pub(crate) mod test_utils;

pub use distribution::DistributionPlan;
pub use engine::{DistributionReport, VaultEngine};
pub use events::{FactoryEvent, VaultEvent};
pub use factory::{CreateVaultRequest, VaultCreated, VaultFactory};
pub use lock::{ExecutionGuard, ExecutionLocks};
pub use record::{
    Beneficiary, ConditionKind, InheritanceCondition, VaultDetails, VaultId, VaultRecord,
    VaultStatus,
};

use ancestry_core::{AccessError, Address, Amount, ParamsError, Timestamp};
use ancestry_ledger::LedgerError;
use serde::Serialize;
use thiserror::Error;

/// Which class of failure an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input or a precondition that does not hold.
    Validation,
    /// Caller lacks the role or ownership required.
    Authorization,
    /// An internal invariant broke. Indicates a bug.
    Consistency,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Vault {0} not found")]
    VaultNotFound(VaultId),

    #[error("Caller {caller} is not authorized for vault {vault_id}")]
    Unauthorized { caller: Address, vault_id: VaultId },

    #[error("Vault {vault_id} is {actual}, expected {expected}")]
    InvalidStatus {
        vault_id: VaultId,
        expected: VaultStatus,
        actual: VaultStatus,
    },

    #[error("Vault {0} is dissolved")]
    Dissolved(VaultId),

    #[error("Condition {index} not found on vault {vault_id}")]
    ConditionNotFound { vault_id: VaultId, index: usize },

    #[error("Condition {index} on vault {vault_id} is inactive")]
    ConditionInactive { vault_id: VaultId, index: usize },

    #[error("Condition {index} on vault {vault_id} is not met")]
    ConditionNotMet { vault_id: VaultId, index: usize },

    #[error("Vault {vault_id} is locked until {unlock_at} (now {now})")]
    StillLocked {
        vault_id: VaultId,
        unlock_at: Timestamp,
        now: Timestamp,
    },

    #[error("A vault needs at least one beneficiary")]
    NoBeneficiaries,

    #[error("Too many beneficiaries: {count} (max {max})")]
    TooManyBeneficiaries { count: usize, max: usize },

    #[error("Duplicate beneficiary {0}")]
    DuplicateBeneficiary(Address),

    #[error("Invalid beneficiary {0}")]
    InvalidBeneficiary(Address),

    #[error("Beneficiary {0} has a zero share")]
    ZeroShare(Address),

    #[error("Invalid sacrificial share: {0}")]
    InvalidSacrificialShare(u16),

    #[error("Total shares mismatch: {total} exceeds 1000")]
    TotalSharesMismatch { total: u32 },

    #[error("Condition capacity exceeded: max {max}")]
    ConditionCapacityExceeded { max: usize },

    #[error("Length mismatch: {beneficiaries} beneficiaries, {shares} shares")]
    LengthMismatch { beneficiaries: usize, shares: usize },

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Vault {0} is already executing")]
    ExecutionLocked(VaultId),

    #[error("Vault {vault_id} holds {balance} after distribution")]
    ResidualBalance { vault_id: VaultId, balance: Amount },

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Access denied: {0}")]
    Access(#[from] AccessError),

    #[error("Invalid vault parameters: {0}")]
    Params(#[from] ParamsError),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Unauthorized { .. } | VaultError::Access(_) => ErrorKind::Authorization,
            VaultError::Ledger(LedgerError::Access(_)) => ErrorKind::Authorization,
            VaultError::Ledger(LedgerError::OnlyVaultCanPayFees(_)) => ErrorKind::Authorization,
            VaultError::ResidualBalance { .. } | VaultError::ArithmeticOverflow => {
                ErrorKind::Consistency
            }
            VaultError::Ledger(LedgerError::ArithmeticOverflow) => ErrorKind::Consistency,
            _ => ErrorKind::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ancestry_core::Role;

    #[test]
    fn test_error_kinds() {
        let caller = Address::from_label("mallory");

        assert_eq!(
            VaultError::Unauthorized {
                caller,
                vault_id: 0
            }
            .kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            VaultError::Access(AccessError::MissingRole {
                account: caller,
                role: Role::DefaultAdmin
            })
            .kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            VaultError::ResidualBalance {
                vault_id: 0,
                balance: 1
            }
            .kind(),
            ErrorKind::Consistency
        );
        assert_eq!(VaultError::ExecutionLocked(0).kind(), ErrorKind::Validation);
        assert_eq!(
            VaultError::Ledger(LedgerError::ZeroAmount).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_error_messages() {
        let err = VaultError::TotalSharesMismatch { total: 1100 };
        assert_eq!(err.to_string(), "Total shares mismatch: 1100 exceeds 1000");

        let err = VaultError::InvalidStatus {
            vault_id: 3,
            expected: VaultStatus::Inherited,
            actual: VaultStatus::Active,
        };
        assert_eq!(err.to_string(), "Vault 3 is Active, expected Inherited");
    }
}
