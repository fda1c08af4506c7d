//! Scenario files
//!
//! A scenario is an ordered list of `[[step]]` tables. Each step names its
//! `action` and carries that action's arguments:
//!
//! ```toml
//! name = "single heir"
//!
//! [[step]]
//! action = "transfer"
//! from = "alice"
//! to = "vault:family"
//! amount = "250 AMONEY"
//!
//! [[step]]
//! action = "distribute"
//! vault = "family"
//! caller = "stranger"
//! expect_error = true
//! ```
//!
//! Accounts are `0x` hex, `sink`, `vault:<name>` for a vault created earlier
//! in the run, or any other label (hashed with [`Address::from_label`]).
//! Amounts are integers in base units or strings: `"1500"` (base units) or
//! `"12.5 AMONEY"` (whole tokens).

use ancestry_core::{Address, Amount, Timestamp, DAY_SECS, DECIMALS, SINK, SYMBOL, UNIT};
use ancestry_vault::{ConditionKind, InheritanceCondition};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("Invalid amount {0:?}")]
    InvalidAmount(String),

    #[error("Invalid account {reference:?}: {reason}")]
    InvalidAccount { reference: String, reason: String },

    #[error("No vault named {0:?} has been created")]
    UnknownVault(String),

    #[error("A vault named {0:?} already exists")]
    DuplicateVault(String),

    #[error("Missing {0}")]
    Missing(&'static str),

    #[error("Give exactly one of {0}")]
    Ambiguous(&'static str),

    #[error("Clock cannot move back from {now} to {to}")]
    ClockBackwards { now: Timestamp, to: Timestamp },

    #[error("Time overflow")]
    TimeOverflow,
}

// ============================================================================
// Scalars
// ============================================================================

/// A token quantity as written in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenAmount {
    /// Base units.
    Base(u64),
    /// Base-unit digits, or a decimal followed by the token symbol.
    Text(String),
}

impl TokenAmount {
    pub fn to_base_units(&self) -> Result<Amount, ScenarioError> {
        match self {
            TokenAmount::Base(v) => Ok(Amount::from(*v)),
            TokenAmount::Text(s) => parse_amount(s),
        }
    }
}

fn parse_amount(input: &str) -> Result<Amount, ScenarioError> {
    let invalid = || ScenarioError::InvalidAmount(input.to_string());
    let cleaned: String = input.trim().chars().filter(|c| *c != '_').collect();

    let Some(tokens) = cleaned.strip_suffix(SYMBOL) else {
        return cleaned.parse::<Amount>().map_err(|_| invalid());
    };

    let tokens = tokens.trim_end();
    let (whole, frac) = tokens.split_once('.').unwrap_or((tokens, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if frac.len() > DECIMALS as usize || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let frac_units: Amount = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = DECIMALS as usize);
        padded.parse().map_err(|_| invalid())?
    };

    whole
        .checked_mul(UNIT)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(invalid)
}

/// Reference to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountRef(pub String);

/// What an [`AccountRef`] points at before vault names are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountTarget {
    Address(Address),
    Label(String, Address),
    Vault(String),
}

impl AccountRef {
    #[cfg(test)]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn parse(&self) -> Result<AccountTarget, ScenarioError> {
        let reference = self.0.trim();
        if reference.is_empty() {
            return Err(ScenarioError::InvalidAccount {
                reference: self.0.clone(),
                reason: "empty".into(),
            });
        }
        if reference.eq_ignore_ascii_case("sink") {
            return Ok(AccountTarget::Address(SINK));
        }
        if let Some(name) = reference.strip_prefix("vault:") {
            return Ok(AccountTarget::Vault(name.to_string()));
        }
        if reference.starts_with("0x") || reference.starts_with("0X") {
            return Address::from_str(reference)
                .map(AccountTarget::Address)
                .map_err(|e| ScenarioError::InvalidAccount {
                    reference: self.0.clone(),
                    reason: e.to_string(),
                });
        }
        Ok(AccountTarget::Label(
            reference.to_string(),
            Address::from_label(reference),
        ))
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A condition as written in a scenario. Give `trigger_value` in raw seconds
/// or `days`; for time conditions `days` counts from the current clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub kind: ConditionKind,
    #[serde(default)]
    pub trigger_value: Option<u64>,
    #[serde(default)]
    pub days: Option<u64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl ConditionSpec {
    pub fn to_condition(&self, now: Timestamp) -> Result<InheritanceCondition, ScenarioError> {
        let trigger_value = match (self.trigger_value, self.days) {
            (Some(v), None) => v,
            (None, Some(days)) => {
                let secs = days
                    .checked_mul(DAY_SECS)
                    .ok_or(ScenarioError::TimeOverflow)?;
                match self.kind {
                    ConditionKind::Time => {
                        now.checked_add(secs).ok_or(ScenarioError::TimeOverflow)?
                    }
                    ConditionKind::Inactivity => secs,
                }
            }
            _ => return Err(ScenarioError::Ambiguous("trigger_value, days")),
        };
        Ok(InheritanceCondition {
            kind: self.kind,
            trigger_value,
            is_active: self.active,
        })
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Steps
// ============================================================================

/// One scenario step.
///
/// `caller` is optional almost everywhere. Ledger administration defaults to
/// the configured admin, vault administration to the vault's creator, and
/// fee/inheritance calls to the vault's current owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Activate {
        caller: Option<AccountRef>,
    },
    /// Mint the full supply. Buckets without an explicit recipient go to
    /// `recipient`.
    Genesis {
        caller: Option<AccountRef>,
        recipient: Option<AccountRef>,
        ecosystem_fund: Option<AccountRef>,
        strategic_reserve: Option<AccountRef>,
        public_sale: Option<AccountRef>,
        founders: Option<AccountRef>,
        community_incentives: Option<AccountRef>,
    },
    Transfer {
        from: AccountRef,
        to: AccountRef,
        amount: TokenAmount,
    },
    TransferFrom {
        caller: AccountRef,
        from: AccountRef,
        to: AccountRef,
        amount: TokenAmount,
    },
    Approve {
        owner: AccountRef,
        spender: AccountRef,
        amount: TokenAmount,
    },
    Burn {
        from: AccountRef,
        amount: TokenAmount,
    },
    SetTaxExempt {
        caller: Option<AccountRef>,
        account: AccountRef,
        #[serde(default = "default_true")]
        exempt: bool,
    },
    /// Register a vault's engine as the ledger's fee-paying vault.
    SetVaultAddress {
        caller: Option<AccountRef>,
        vault: String,
    },
    CreateVault {
        name: String,
        creator: AccountRef,
        beneficiaries: Vec<AccountRef>,
        shares: Vec<u16>,
        #[serde(default)]
        metadata_uri: String,
        #[serde(default)]
        sacrificial_share: u16,
        #[serde(default)]
        conditions: Vec<ConditionSpec>,
    },
    AddCondition {
        vault: String,
        caller: Option<AccountRef>,
        kind: ConditionKind,
        trigger_value: Option<u64>,
        days: Option<u64>,
    },
    SetConditionActive {
        vault: String,
        caller: Option<AccountRef>,
        index: usize,
        active: bool,
    },
    SetSacrificialShare {
        vault: String,
        caller: Option<AccountRef>,
        share: u16,
    },
    PayFee {
        vault: String,
        caller: Option<AccountRef>,
        amount: TokenAmount,
    },
    Execute {
        vault: String,
        caller: Option<AccountRef>,
        #[serde(default)]
        condition: usize,
    },
    Unlock {
        vault: String,
        caller: Option<AccountRef>,
    },
    Distribute {
        vault: String,
        caller: Option<AccountRef>,
    },
    /// Move the clock: by `secs`, by `days`, or `to` an absolute time.
    Advance {
        secs: Option<u64>,
        days: Option<u64>,
        to: Option<Timestamp>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Activate { .. } => "activate",
            Action::Genesis { .. } => "genesis",
            Action::Transfer { .. } => "transfer",
            Action::TransferFrom { .. } => "transfer_from",
            Action::Approve { .. } => "approve",
            Action::Burn { .. } => "burn",
            Action::SetTaxExempt { .. } => "set_tax_exempt",
            Action::SetVaultAddress { .. } => "set_vault_address",
            Action::CreateVault { .. } => "create_vault",
            Action::AddCondition { .. } => "add_condition",
            Action::SetConditionActive { .. } => "set_condition_active",
            Action::SetSacrificialShare { .. } => "set_sacrificial_share",
            Action::PayFee { .. } => "pay_fee",
            Action::Execute { .. } => "execute",
            Action::Unlock { .. } => "unlock",
            Action::Distribute { .. } => "distribute",
            Action::Advance { .. } => "advance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,

    /// The step must be rejected by the ledger or a vault.
    #[serde(default)]
    pub expect_error: bool,

    /// Free text carried into the report.
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
        contents
            .parse()
            .with_context(|| format!("Failed to parse scenario: {}", path.display()))
    }
}

impl FromStr for Scenario {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_amounts() {
        assert_eq!(TokenAmount::Base(1500).to_base_units().unwrap(), 1500);
        assert_eq!(
            TokenAmount::Text("1_000".into()).to_base_units().unwrap(),
            1000
        );
        assert_eq!(
            TokenAmount::Text("12 AMONEY".into()).to_base_units().unwrap(),
            12 * UNIT
        );
        assert_eq!(
            TokenAmount::Text("12.5 AMONEY".into()).to_base_units().unwrap(),
            12 * UNIT + UNIT / 2
        );
        assert_eq!(
            TokenAmount::Text(".000000001AMONEY".into())
                .to_base_units()
                .unwrap(),
            1
        );
        // Beyond what a TOML integer can carry
        assert_eq!(
            TokenAmount::Text("99999999999 AMONEY".into())
                .to_base_units()
                .unwrap(),
            ancestry_core::MAX_SUPPLY
        );
    }

    #[test]
    fn test_reject_bad_amounts() {
        for bad in ["", "abc", "1.5", "1.0000000001 AMONEY", "-3 AMONEY", "AMONEY", "1.x AMONEY"] {
            assert!(
                TokenAmount::Text(bad.into()).to_base_units().is_err(),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_account_refs() {
        assert_eq!(AccountRef::new("sink").parse().unwrap(), AccountTarget::Address(SINK));
        assert_eq!(
            AccountRef::new("vault:family").parse().unwrap(),
            AccountTarget::Vault("family".into())
        );
        assert_eq!(
            AccountRef::new("alice").parse().unwrap(),
            AccountTarget::Label("alice".into(), Address::from_label("alice"))
        );
        assert_eq!(
            AccountRef::new("0x000000000000000000000000000000000000dEaD")
                .parse()
                .unwrap(),
            AccountTarget::Address(SINK)
        );
        assert!(AccountRef::new("0x1234").parse().is_err());
        assert!(AccountRef::new("  ").parse().is_err());
    }

    #[test]
    fn test_condition_spec() {
        let spec = ConditionSpec {
            kind: ConditionKind::Time,
            trigger_value: None,
            days: Some(2),
            active: true,
        };
        assert_eq!(spec.to_condition(100).unwrap().trigger_value, 100 + 2 * DAY_SECS);

        let spec = ConditionSpec {
            kind: ConditionKind::Inactivity,
            ..spec
        };
        assert_eq!(spec.to_condition(100).unwrap().trigger_value, 2 * DAY_SECS);

        let both = ConditionSpec {
            trigger_value: Some(5),
            ..spec.clone()
        };
        assert_eq!(
            both.to_condition(0),
            Err(ScenarioError::Ambiguous("trigger_value, days"))
        );
    }

    #[test]
    fn test_parse_scenario_file() {
        let toml = r#"
name = "smoke"

[[step]]
action = "activate"

[[step]]
action = "create_vault"
name = "family"
creator = "alice"
beneficiaries = ["bob", "carol"]
shares = [600, 400]
sacrificial_share = 0
conditions = [{ kind = "inactivity", days = 180 }]

[[step]]
action = "transfer"
from = "alice"
to = "vault:family"
amount = "10 AMONEY"

[[step]]
action = "execute"
vault = "family"
caller = "bob"
expect_error = true
note = "too early"

[[step]]
action = "advance"
days = 181
"#;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", toml).unwrap();
        let scenario = Scenario::from_file(file.path()).unwrap();

        assert_eq!(scenario.name, "smoke");
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(scenario.steps[0].action, Action::Activate { caller: None });
        match &scenario.steps[1].action {
            Action::CreateVault {
                shares, conditions, ..
            } => {
                assert_eq!(shares, &vec![600, 400]);
                assert_eq!(conditions[0].days, Some(180));
                assert!(conditions[0].active);
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert!(scenario.steps[3].expect_error);
        assert_eq!(scenario.steps[3].note.as_deref(), Some("too early"));
        assert_eq!(
            scenario.steps[3].action,
            Action::Execute {
                vault: "family".into(),
                caller: Some(AccountRef::new("bob")),
                condition: 0
            }
        );
        assert_eq!(scenario.steps[4].action.name(), "advance");
    }

    #[test]
    fn test_unknown_action_rejected() {
        let toml = r#"
[[step]]
action = "teleport"
"#;
        assert!(toml.parse::<Scenario>().is_err());
    }

    #[test]
    fn test_empty_scenario() {
        let scenario: Scenario = "".parse().unwrap();
        assert!(scenario.steps.is_empty());
    }
}
