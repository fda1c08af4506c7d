//! Vault records and inheritance conditions
//!
//! A vault moves through three states:
//!
//! ```text
//! Active --execute_inheritance--> Inherited --unlock_vault--> Active
//!                                     |
//!                                     +--distribute_inheritance--> Dissolved
//! ```
//!
//! `Dissolved` is terminal.

use ancestry_core::{Address, Amount, PerMille, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a vault within one engine instance.
pub type VaultId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    Active,
    Inherited,
    Dissolved,
}

impl fmt::Display for VaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultStatus::Active => write!(f, "Active"),
            VaultStatus::Inherited => write!(f, "Inherited"),
            VaultStatus::Dissolved => write!(f, "Dissolved"),
        }
    }
}

/// A beneficiary and its share of the post-sacrifice balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub address: Address,
    pub share: PerMille,
}

impl Beneficiary {
    pub fn new(address: Address, share: PerMille) -> Self {
        Self { address, share }
    }
}

/// What a condition's `trigger_value` is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Met once `now >= trigger_value` (absolute unix seconds).
    Time,
    /// Met once `trigger_value` seconds have passed since the last
    /// maintenance payment. Paying maintenance resets it.
    Inactivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceCondition {
    pub kind: ConditionKind,
    pub trigger_value: u64,
    pub is_active: bool,
}

impl InheritanceCondition {
    /// Active time condition.
    pub fn time(trigger_at: Timestamp) -> Self {
        Self {
            kind: ConditionKind::Time,
            trigger_value: trigger_at,
            is_active: true,
        }
    }

    /// Active inactivity condition.
    pub fn inactivity(after_secs: u64) -> Self {
        Self {
            kind: ConditionKind::Inactivity,
            trigger_value: after_secs,
            is_active: true,
        }
    }

    /// Whether this condition passes at `now`. Inactive conditions never pass.
    pub fn is_met(&self, now: Timestamp, last_maintenance: Timestamp) -> bool {
        if !self.is_active {
            return false;
        }
        match self.kind {
            ConditionKind::Time => now >= self.trigger_value,
            ConditionKind::Inactivity => {
                now >= last_maintenance.saturating_add(self.trigger_value)
            }
        }
    }
}

/// Full per-vault state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub creator: Address,
    pub current_owner: Address,
    pub beneficiaries: Vec<Beneficiary>,
    pub sacrificial_share: PerMille,
    pub status: VaultStatus,
    pub conditions: Vec<InheritanceCondition>,
    pub creation_timestamp: Timestamp,
    pub last_maintenance_timestamp: Timestamp,
    /// Set when inheritance is triggered.
    pub unlock_timestamp: Option<Timestamp>,
    pub cultural_energy: Amount,
    pub metadata_uri: String,
}

impl VaultRecord {
    pub fn share_of(&self, account: &Address) -> Option<PerMille> {
        self.beneficiaries
            .iter()
            .find(|b| &b.address == account)
            .map(|b| b.share)
    }

    pub fn is_beneficiary(&self, account: &Address) -> bool {
        self.share_of(account).is_some()
    }

    pub fn details(&self) -> VaultDetails {
        VaultDetails {
            creator: self.creator,
            current_owner: self.current_owner,
            creation_timestamp: self.creation_timestamp,
            last_maintenance_timestamp: self.last_maintenance_timestamp,
            status: self.status,
            metadata_uri: self.metadata_uri.clone(),
            beneficiaries: self.beneficiaries.iter().map(|b| b.address).collect(),
            cultural_energy: self.cultural_energy,
        }
    }
}

/// Read-only summary returned by `VaultEngine::vault_details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultDetails {
    pub creator: Address,
    pub current_owner: Address,
    pub creation_timestamp: Timestamp,
    pub last_maintenance_timestamp: Timestamp,
    pub status: VaultStatus,
    pub metadata_uri: String,
    pub beneficiaries: Vec<Address>,
    pub cultural_energy: Amount,
}
