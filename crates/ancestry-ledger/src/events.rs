//! Events emitted by the ledger for off-engine observers

use ancestry_core::{Address, Amount, Role};
use serde::{Deserialize, Serialize};

/// Everything the ledger reports about committed state changes.
///
/// Events belong to the call that produced them: a rolled-back call leaves
/// no events behind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Balance moved between accounts. `value` is what the recipient got.
    Transfer {
        from: Address,
        to: Address,
        value: Amount,
    },

    /// Supply destroyed, either by transfer tax or an explicit burn.
    Burn {
        from: Address,
        amount: Amount,
        new_total_supply: Amount,
    },

    Approval {
        owner: Address,
        spender: Address,
        value: Amount,
    },

    /// New supply created (genesis buckets or role-gated minting).
    Mint { to: Address, amount: Amount },

    /// A vault pulled a maintenance fee from `payer`.
    VaultFeePaid {
        vault: Address,
        payer: Address,
        sink: Address,
        amount: Amount,
        burned: Amount,
    },

    TaxExemptChanged { account: Address, exempt: bool },

    Activated { by: Address },

    GenesisCompleted { total_supply: Amount },

    RoleGranted { role: Role, account: Address },

    RoleRevoked { role: Role, account: Address },

    /// A receive callback errored. The transfer itself stands.
    ReceiverFailed { account: Address, message: String },
}

impl LedgerEvent {
    /// Burned amount carried by this event, if any.
    pub fn burned(&self) -> Option<Amount> {
        match self {
            LedgerEvent::Burn { amount, .. } => Some(*amount),
            _ => None,
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, LedgerEvent::Transfer { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_helpers() {
        let burn = LedgerEvent::Burn {
            from: Address::from_label("alice"),
            amount: 5,
            new_total_supply: 995,
        };
        assert_eq!(burn.burned(), Some(5));
        assert!(!burn.is_transfer());

        let transfer = LedgerEvent::Transfer {
            from: Address::from_label("alice"),
            to: Address::from_label("bob"),
            value: 995,
        };
        assert_eq!(transfer.burned(), None);
        assert!(transfer.is_transfer());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = LedgerEvent::TaxExemptChanged {
            account: ancestry_core::SINK,
            exempt: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "tax_exempt_changed");
        assert_eq!(json["exempt"], true);
    }
}
