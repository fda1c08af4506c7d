//! Simulator configuration, parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use ancestry_core::{Address, Clock, LedgerParams, SystemClock, Timestamp, VaultParams};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Top-level simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// General run settings
    #[serde(default)]
    pub sim: SimSection,

    /// Ledger deployment
    #[serde(default)]
    pub ledger: LedgerSection,

    /// Parameters handed to every vault engine the factory creates
    #[serde(default)]
    pub vault: VaultParams,
}

/// General run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Unix timestamp the simulated clock starts at
    #[serde(default = "default_start_time")]
    pub start_time: Timestamp,
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            start_time: default_start_time(),
        }
    }
}

/// Ledger deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// Deployer: `0x` hex or a label. Holds every ledger and factory role.
    #[serde(default = "default_admin")]
    pub admin: String,

    /// Transfer burn in parts-per-thousand
    #[serde(default = "default_burn_rate")]
    pub burn_rate_per_mille: u16,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            admin: default_admin(),
            burn_rate_per_mille: default_burn_rate(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_start_time() -> Timestamp {
    1_704_067_200 // 2024-01-01T00:00:00Z
}

fn default_admin() -> String {
    "admin".to_string()
}

fn default_burn_rate() -> u16 {
    LedgerParams::default().burn_rate_per_mille
}

const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

// ============================================================================
// Loading & environment override
// ============================================================================

impl SimConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: SimConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `ANCESTRY_LOG_LEVEL`
    /// - `ANCESTRY_START_TIME` (seconds, or `now` for the wall clock)
    /// - `ANCESTRY_BURN_RATE`
    /// - `ANCESTRY_MAX_CONDITIONS`
    /// - `ANCESTRY_LOCK_SECS`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ANCESTRY_LOG_LEVEL") {
            self.sim.log_level = v;
        }
        if let Ok(v) = std::env::var("ANCESTRY_START_TIME") {
            if v == "now" {
                self.sim.start_time = SystemClock.now();
            } else if let Ok(ts) = v.parse::<Timestamp>() {
                self.sim.start_time = ts;
            }
        }
        if let Ok(v) = std::env::var("ANCESTRY_BURN_RATE") {
            if let Ok(rate) = v.parse::<u16>() {
                self.ledger.burn_rate_per_mille = rate;
            }
        }
        if let Ok(v) = std::env::var("ANCESTRY_MAX_CONDITIONS") {
            if let Ok(max) = v.parse::<usize>() {
                self.vault.max_conditions = max;
            }
        }
        if let Ok(v) = std::env::var("ANCESTRY_LOCK_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                self.vault.inheritance_lock_secs = secs;
            }
        }
    }

    pub fn ledger_params(&self) -> LedgerParams {
        LedgerParams {
            burn_rate_per_mille: self.ledger.burn_rate_per_mille,
        }
    }

    /// The deployer address. Labels go through [`Address::from_label`].
    pub fn admin(&self) -> Result<Address> {
        let admin = self.ledger.admin.trim();
        if admin.starts_with("0x") || admin.starts_with("0X") {
            return Address::from_str(admin)
                .with_context(|| format!("ledger.admin is not a valid address: {}", admin));
        }
        Ok(Address::from_label(admin))
    }

    /// Human-readable start time, for `--validate` output and logs.
    pub fn start_time_rfc3339(&self) -> String {
        i64::try_from(self.sim.start_time)
            .ok()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| format!("@{}", self.sim.start_time))
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            LOG_LEVELS.contains(&self.sim.log_level.to_ascii_lowercase().as_str()),
            "sim.log_level must be one of {:?}, got {:?}",
            LOG_LEVELS,
            self.sim.log_level
        );

        anyhow::ensure!(
            !self.ledger.admin.trim().is_empty(),
            "ledger.admin must not be empty"
        );
        let admin = self.admin()?;
        anyhow::ensure!(
            !admin.is_zero() && !admin.is_sink(),
            "ledger.admin must not be the zero or sink address"
        );

        self.ledger_params()
            .validate()
            .context("Invalid [ledger] parameters")?;
        self.vault.validate().context("Invalid [vault] parameters")?;

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
