//! Events emitted by vault engines and the factory

use crate::record::{ConditionKind, VaultId};
use ancestry_core::{Address, Amount, PerMille, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VaultEvent {
    VaultCreated {
        vault_id: VaultId,
        creator: Address,
        metadata_uri: String,
    },

    ConditionAdded {
        vault_id: VaultId,
        index: usize,
        kind: ConditionKind,
        trigger_value: u64,
    },

    ConditionToggled {
        vault_id: VaultId,
        index: usize,
        is_active: bool,
    },

    /// `burned` is the transfer tax taken from the fee on its way to the sink.
    MaintenanceFeePaid {
        vault_id: VaultId,
        payer: Address,
        amount: Amount,
        burned: Amount,
        cultural_energy: Amount,
    },

    SacrificialShareUpdated {
        vault_id: VaultId,
        share: PerMille,
    },

    InheritanceTriggered {
        vault_id: VaultId,
        condition_index: usize,
        new_owner: Address,
        unlock_at: Timestamp,
    },

    VaultUnlocked {
        vault_id: VaultId,
        owner: Address,
    },

    InheritanceDistributed {
        vault_id: VaultId,
        vault_balance: Amount,
        sacrificed: Amount,
        burned: Amount,
    },
}

impl VaultEvent {
    pub fn vault_id(&self) -> VaultId {
        match self {
            VaultEvent::VaultCreated { vault_id, .. }
            | VaultEvent::ConditionAdded { vault_id, .. }
            | VaultEvent::ConditionToggled { vault_id, .. }
            | VaultEvent::MaintenanceFeePaid { vault_id, .. }
            | VaultEvent::SacrificialShareUpdated { vault_id, .. }
            | VaultEvent::InheritanceTriggered { vault_id, .. }
            | VaultEvent::VaultUnlocked { vault_id, .. }
            | VaultEvent::InheritanceDistributed { vault_id, .. } => *vault_id,
        }
    }
}

/// Emitted by `VaultFactory` when it produces a new engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FactoryEvent {
    VaultProxyCreated {
        creator: Address,
        proxy: Address,
        vault_id: VaultId,
    },
}
