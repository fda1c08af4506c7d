//! Ancestry Sim: headless scenario runner for the ledger and vaults
//!
//! Deploys a fresh ledger and vault factory on a simulated clock, replays a
//! TOML scenario against them and writes a JSON report.
//!
//! # Usage
//!
//! ```bash
//! ancestry-sim --scenario family.toml
//! ancestry-sim --config sim.toml --scenario family.toml --out report.json
//! ancestry-sim --config sim.toml --validate
//! ```

mod config;
mod runner;
mod scenario;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Parse CLI args (minimal, no clap dependency needed)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut scenario_path: Option<PathBuf> = None;
    let mut out_path: Option<PathBuf> = None;
    let mut validate_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    anyhow::bail!("--config requires a path argument");
                };
                config_path = Some(PathBuf::from(path));
            }
            "--scenario" | "-s" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    anyhow::bail!("--scenario requires a path argument");
                };
                scenario_path = Some(PathBuf::from(path));
            }
            "--out" | "-o" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    anyhow::bail!("--out requires a path argument");
                };
                out_path = Some(PathBuf::from(path));
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("ancestry-sim {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Load config; every section has defaults
    let mut sim_config = match &config_path {
        Some(path) => config::SimConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => config::SimConfig::default(),
    };

    sim_config.apply_env_overrides();

    sim_config
        .validate()
        .context("Configuration validation failed")?;

    env_logger::Builder::new()
        .parse_filters(&sim_config.sim.log_level)
        .init();

    let scenario = scenario_path
        .as_deref()
        .map(scenario::Scenario::from_file)
        .transpose()?;

    if validate_only {
        println!("✅ Configuration is valid.");
        println!("  Start time:    {}", sim_config.start_time_rfc3339());
        println!("  Admin:         {}", sim_config.admin()?);
        println!(
            "  Burn rate:     {}‰",
            sim_config.ledger.burn_rate_per_mille
        );
        println!(
            "  Lock window:   {} secs",
            sim_config.vault.inheritance_lock_secs
        );
        println!(
            "  Max conds:     {}",
            sim_config.vault.max_conditions
        );
        println!(
            "  Max heirs:     {}",
            sim_config.vault.max_beneficiaries
        );
        if let Some(scenario) = &scenario {
            println!(
                "  Scenario:      {:?} ({} steps)",
                scenario.name,
                scenario.steps.len()
            );
        }
        return Ok(());
    }

    let Some(scenario) = scenario else {
        anyhow::bail!("--scenario is required (see --help)");
    };

    log::info!("Simulated clock starts at {}", sim_config.start_time_rfc3339());
    let report = runner::Simulation::new(&sim_config)?.run(&scenario)?;
    let json = report.to_json().context("Failed to serialize report")?;

    match out_path {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            log::info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"Ancestry Sim: ledger and inheritance vault scenario runner

USAGE:
    ancestry-sim [OPTIONS] --scenario <PATH>

OPTIONS:
    -c, --config <PATH>     Config file path (optional, defaults apply)
    -s, --scenario <PATH>   Scenario file to replay
    -o, --out <PATH>        Write the JSON report here instead of stdout
    --validate              Validate config (and scenario, if given) and exit
    -h, --help              Show this help message
    -V, --version           Show version

ENVIRONMENT VARIABLES (override config file):
    ANCESTRY_LOG_LEVEL        Log level (error/warn/info/debug/trace)
    ANCESTRY_START_TIME       Simulated start time (unix seconds, or "now")
    ANCESTRY_BURN_RATE        Transfer burn in parts-per-thousand
    ANCESTRY_MAX_CONDITIONS   Maximum conditions per vault
    ANCESTRY_LOCK_SECS        Inheritance lock window in seconds

EXAMPLES:
    # Replay a scenario with default settings
    ancestry-sim --scenario demos/family.toml

    # Zero-burn run, report to a file
    ANCESTRY_BURN_RATE=0 ancestry-sim -s demos/family.toml -o report.json

    # Validate configuration
    ancestry-sim --config sim.toml --validate
"#
    );
}
