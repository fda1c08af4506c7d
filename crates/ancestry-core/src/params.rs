//! Tunable protocol parameters.
//!
//! Defaults reproduce the deployed protocol: 0.5% transfer burn, 30-day
//! inheritance lock, 10% maintenance-to-energy conversion.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seconds in one day.
pub const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("Invalid parameter {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ParamsError {
    ParamsError::Invalid {
        name,
        reason: reason.into(),
    }
}

/// Ledger accounting parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerParams {
    /// Burn applied to non-exempt transfers, in parts-per-thousand.
    /// Default: 5 (0.5%).
    #[serde(default = "default_burn_rate")]
    pub burn_rate_per_mille: u16,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            burn_rate_per_mille: default_burn_rate(),
        }
    }
}

impl LedgerParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.burn_rate_per_mille > 1000 {
            return Err(invalid(
                "burn_rate_per_mille",
                format!("{} exceeds 1000", self.burn_rate_per_mille),
            ));
        }
        Ok(())
    }
}

/// Vault engine parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultParams {
    /// Maximum inheritance conditions per vault. Default: 64.
    #[serde(default = "default_max_conditions")]
    pub max_conditions: usize,

    /// Maximum beneficiaries per vault. Default: 32.
    #[serde(default = "default_max_beneficiaries")]
    pub max_beneficiaries: usize,

    /// Lock window between triggering inheritance and payout/unlock.
    /// Default: 30 days.
    #[serde(default = "default_lock_secs")]
    pub inheritance_lock_secs: u64,

    /// Cultural energy gained per maintenance fee is `fee / divisor`.
    /// Default: 10.
    #[serde(default = "default_energy_divisor")]
    pub cultural_energy_divisor: u64,
}

impl Default for VaultParams {
    fn default() -> Self {
        Self {
            max_conditions: default_max_conditions(),
            max_beneficiaries: default_max_beneficiaries(),
            inheritance_lock_secs: default_lock_secs(),
            cultural_energy_divisor: default_energy_divisor(),
        }
    }
}

impl VaultParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.max_conditions == 0 {
            return Err(invalid("max_conditions", "must be > 0"));
        }
        if self.max_beneficiaries == 0 {
            return Err(invalid("max_beneficiaries", "must be > 0"));
        }
        if self.cultural_energy_divisor == 0 {
            return Err(invalid("cultural_energy_divisor", "must be > 0"));
        }
        Ok(())
    }
}

fn default_burn_rate() -> u16 {
    5
}

fn default_max_conditions() -> usize {
    64
}

fn default_max_beneficiaries() -> usize {
    32
}

fn default_lock_secs() -> u64 {
    30 * DAY_SECS
}

fn default_energy_divisor() -> u64 {
    10
}
