//! Scenario execution
//!
//! Deploys a ledger and a vault factory on a manual clock, replays a
//! [`Scenario`] against them and produces a [`Report`].

use crate::config::SimConfig;
use crate::scenario::{AccountRef, AccountTarget, Action, ConditionSpec, Scenario, ScenarioError};
use ancestry_core::{
    Address, Amount, Clock, ManualClock, PerMille, Timestamp, DAY_SECS, SINK,
};
use ancestry_ledger::{GenesisAllocation, Ledger, LedgerError, LedgerEvent};
use ancestry_vault::{
    CreateVaultRequest, ErrorKind, FactoryEvent, VaultDetails, VaultEngine, VaultError,
    VaultEvent, VaultFactory, VaultId,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use thiserror::Error;

/// Why a step did not go through.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    /// The scenario itself is broken. Never satisfies `expect_error`.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

impl StepError {
    fn kind(&self) -> Option<ErrorKind> {
        match self {
            StepError::Vault(e) => Some(e.kind()),
            StepError::Ledger(LedgerError::Access(_))
            | StepError::Ledger(LedgerError::OnlyVaultCanPayFees(_)) => {
                Some(ErrorKind::Authorization)
            }
            StepError::Ledger(LedgerError::ArithmeticOverflow) => Some(ErrorKind::Consistency),
            StepError::Ledger(_) => Some(ErrorKind::Validation),
            StepError::Scenario(_) => None,
        }
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// 1-based position in the scenario.
    pub index: usize,
    pub action: &'static str,
    pub time: Timestamp,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceEntry {
    pub account: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub balance: Amount,
    pub tax_exempt: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultEntry {
    pub name: String,
    pub engine: Address,
    pub vault_id: VaultId,
    pub balance: Amount,
    pub sacrificial_share: PerMille,
    pub unlock_timestamp: Option<Timestamp>,
    pub details: VaultDetails,
    pub events: Vec<VaultEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scenario: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub symbol: &'static str,
    pub decimals: u32,
    pub burn_rate_per_mille: PerMille,
    pub total_supply: Amount,
    pub total_burned: Amount,
    pub consistent: bool,
    pub steps: Vec<StepRecord>,
    pub balances: Vec<BalanceEntry>,
    pub vaults: Vec<VaultEntry>,
    pub ledger_events: Vec<LedgerEvent>,
    pub factory_events: Vec<FactoryEvent>,
}

impl Report {
    /// Pretty JSON. Amounts are emitted as plain integers.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ============================================================================
// Simulation
// ============================================================================

#[derive(Clone)]
struct NamedVault {
    engine: Rc<VaultEngine>,
    vault_id: VaultId,
    creator: Address,
}

pub struct Simulation {
    admin: Address,
    start_time: Timestamp,
    clock: Rc<ManualClock>,
    ledger: Rc<Ledger>,
    factory: VaultFactory,
    vaults: BTreeMap<String, NamedVault>,
    labels: BTreeMap<Address, String>,
    touched: BTreeSet<Address>,
    steps: Vec<StepRecord>,
}

impl Simulation {
    /// Deploy a fresh ledger and factory from `config`.
    pub fn new(config: &SimConfig) -> Result<Self> {
        let admin = config.admin()?;
        let clock = Rc::new(ManualClock::new(config.sim.start_time));
        let ledger = Rc::new(
            Ledger::new(admin, config.ledger_params()).context("Failed to deploy ledger")?,
        );
        let factory = VaultFactory::new(
            Address::from_label("vault-factory"),
            admin,
            config.vault.clone(),
            clock.clone() as Rc<dyn Clock>,
        )
        .context("Failed to deploy vault factory")?;

        let mut labels = BTreeMap::new();
        labels.insert(admin, config.ledger.admin.clone());
        labels.insert(SINK, "sink".to_string());

        log::info!(
            "Deployed ledger (admin {}) and factory {} at t={}",
            admin,
            factory.address(),
            config.sim.start_time
        );

        Ok(Self {
            admin,
            start_time: config.sim.start_time,
            clock,
            ledger,
            factory,
            vaults: BTreeMap::new(),
            labels,
            touched: BTreeSet::from([admin]),
            steps: Vec::new(),
        })
    }

    #[cfg(test)]
    pub fn ledger(&self) -> &Rc<Ledger> {
        &self.ledger
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Run every step in order and build the report.
    ///
    /// Stops at the first step whose outcome contradicts its `expect_error`.
    pub fn run(mut self, scenario: &Scenario) -> Result<Report> {
        log::info!(
            "Running scenario {:?} ({} steps)",
            scenario.name,
            scenario.steps.len()
        );
        for (i, step) in scenario.steps.iter().enumerate() {
            let index = i + 1;
            let name = step.action.name();
            let time = self.now();
            let (outcome, error_kind, detail) = match (self.apply(&step.action), step.expect_error) {
                (Ok(detail), false) => (Outcome::Ok, None, detail),
                (Err(e @ StepError::Scenario(_)), _) => {
                    return Err(e).with_context(|| format!("Step {} ({}) is invalid", index, name));
                }
                (Err(e), true) => {
                    log::info!("Step {} ({}) rejected as expected: {}", index, name, e);
                    (Outcome::Rejected, e.kind(), e.to_string())
                }
                (Ok(detail), true) => {
                    anyhow::bail!(
                        "Step {} ({}) was expected to fail but succeeded: {}",
                        index,
                        name,
                        detail
                    );
                }
                (Err(e), false) => {
                    return Err(e).with_context(|| format!("Step {} ({}) failed", index, name));
                }
            };
            log::debug!("Step {} ({}): {}", index, name, detail);
            self.steps.push(StepRecord {
                index,
                action: name,
                time,
                outcome,
                error_kind,
                detail,
                note: step.note.clone(),
            });
        }
        Ok(self.report(scenario))
    }

    /// Apply one action. Domain errors leave no trace on the ledger or vaults.
    pub fn apply(&mut self, action: &Action) -> Result<String, StepError> {
        match action {
            Action::Activate { caller } => {
                let caller = self.caller_or(caller.as_ref(), self.admin)?;
                self.ledger.activate(caller)?;
                Ok("ledger activated".to_string())
            }

            Action::Genesis {
                caller,
                recipient,
                ecosystem_fund,
                strategic_reserve,
                public_sale,
                founders,
                community_incentives,
            } => {
                let caller = self.caller_or(caller.as_ref(), self.admin)?;
                let fallback = recipient.as_ref().map(|r| self.resolve(r)).transpose()?;
                let mut bucket = |r: &Option<AccountRef>| -> Result<Address, StepError> {
                    match r {
                        Some(r) => self.resolve(r),
                        None => fallback.ok_or(ScenarioError::Missing("recipient").into()),
                    }
                };
                let allocation = GenesisAllocation {
                    ecosystem_fund: bucket(ecosystem_fund)?,
                    strategic_reserve: bucket(strategic_reserve)?,
                    public_sale: bucket(public_sale)?,
                    founders: bucket(founders)?,
                    community_incentives: bucket(community_incentives)?,
                };
                let buckets = self.ledger.genesis_distribution(caller, &allocation)?;
                Ok(format!(
                    "minted {} into {} buckets",
                    buckets.iter().map(|b| b.amount).sum::<Amount>(),
                    buckets.len()
                ))
            }

            Action::Transfer { from, to, amount } => {
                let from = self.resolve(from)?;
                let to = self.resolve(to)?;
                let receipt = self.ledger.transfer(from, to, amount.to_base_units()?)?;
                Ok(format!(
                    "{} -> {}: {} received, {} burned",
                    from, to, receipt.net, receipt.burned
                ))
            }

            Action::TransferFrom {
                caller,
                from,
                to,
                amount,
            } => {
                let caller = self.resolve(caller)?;
                let from = self.resolve(from)?;
                let to = self.resolve(to)?;
                let receipt = self
                    .ledger
                    .transfer_from(caller, from, to, amount.to_base_units()?)?;
                Ok(format!(
                    "{} -> {} by {}: {} received, {} burned",
                    from, to, caller, receipt.net, receipt.burned
                ))
            }

            Action::Approve {
                owner,
                spender,
                amount,
            } => {
                let owner = self.resolve(owner)?;
                let spender = self.resolve(spender)?;
                let amount = amount.to_base_units()?;
                self.ledger.approve(owner, spender, amount)?;
                Ok(format!("{} allows {} to spend {}", owner, spender, amount))
            }

            Action::Burn { from, amount } => {
                let from = self.resolve(from)?;
                let amount = amount.to_base_units()?;
                self.ledger.burn(from, amount)?;
                Ok(format!("{} burned {}", from, amount))
            }

            Action::SetTaxExempt {
                caller,
                account,
                exempt,
            } => {
                let caller = self.caller_or(caller.as_ref(), self.admin)?;
                let account = self.resolve(account)?;
                self.ledger.set_tax_exempt(caller, account, *exempt)?;
                Ok(format!("{} tax exempt: {}", account, exempt))
            }

            Action::SetVaultAddress { caller, vault } => {
                let caller = self.caller_or(caller.as_ref(), self.admin)?;
                let engine = self.vault(vault)?.engine.address();
                self.ledger.set_vault_address(caller, engine)?;
                Ok(format!("fee-paying vault set to {}", engine))
            }

            Action::CreateVault {
                name,
                creator,
                beneficiaries,
                shares,
                metadata_uri,
                sacrificial_share,
                conditions,
            } => {
                if self.vaults.contains_key(name) {
                    return Err(ScenarioError::DuplicateVault(name.clone()).into());
                }
                let creator = self.resolve(creator)?;
                let beneficiaries = beneficiaries
                    .iter()
                    .map(|b| self.resolve(b))
                    .collect::<Result<Vec<_>, _>>()?;
                let now = self.now();
                let conditions = conditions
                    .iter()
                    .map(|c| c.to_condition(now))
                    .collect::<Result<Vec<_>, _>>()?;

                let created = self.factory.create_vault(
                    creator,
                    &self.ledger,
                    CreateVaultRequest {
                        beneficiaries,
                        shares: shares.clone(),
                        metadata_uri: metadata_uri.clone(),
                        conditions,
                        sacrificial_share: *sacrificial_share,
                    },
                )?;

                self.labels
                    .insert(created.proxy_address, format!("vault:{}", name));
                self.touched.insert(created.proxy_address);
                self.vaults.insert(
                    name.clone(),
                    NamedVault {
                        engine: created.engine,
                        vault_id: created.vault_id,
                        creator,
                    },
                );
                Ok(format!("vault {:?} at {}", name, created.proxy_address))
            }

            Action::AddCondition {
                vault,
                caller,
                kind,
                trigger_value,
                days,
            } => {
                let named = self.vault(vault)?;
                let caller = self.caller_or(caller.as_ref(), named.creator)?;
                let condition = ConditionSpec {
                    kind: *kind,
                    trigger_value: *trigger_value,
                    days: *days,
                    active: true,
                }
                .to_condition(self.now())?;
                let index = named.engine.add_inheritance_condition(
                    caller,
                    named.vault_id,
                    condition.kind,
                    condition.trigger_value,
                )?;
                Ok(format!(
                    "condition {} ({:?}, {})",
                    index, condition.kind, condition.trigger_value
                ))
            }

            Action::SetConditionActive {
                vault,
                caller,
                index,
                active,
            } => {
                let named = self.vault(vault)?;
                let caller = self.caller_or(caller.as_ref(), named.creator)?;
                named
                    .engine
                    .set_condition_active(caller, named.vault_id, *index, *active)?;
                Ok(format!("condition {} active: {}", index, active))
            }

            Action::SetSacrificialShare {
                vault,
                caller,
                share,
            } => {
                let named = self.vault(vault)?;
                let caller = self.caller_or(caller.as_ref(), named.creator)?;
                named
                    .engine
                    .set_sacrificial_share(caller, named.vault_id, *share)?;
                Ok(format!("sacrificial share {}", share))
            }

            Action::PayFee {
                vault,
                caller,
                amount,
            } => {
                let named = self.vault(vault)?;
                let owner = named.engine.vault(named.vault_id)?.current_owner;
                let caller = self.caller_or(caller.as_ref(), owner)?;
                let gained =
                    named
                        .engine
                        .pay_maintenance_fee(caller, named.vault_id, amount.to_base_units()?)?;
                self.touched.insert(self.ledger.fee_sink());
                Ok(format!("{} paid maintenance (+{} energy)", caller, gained))
            }

            Action::Execute {
                vault,
                caller,
                condition,
            } => {
                let named = self.vault(vault)?;
                let owner = named.engine.vault(named.vault_id)?.current_owner;
                let caller = self.caller_or(caller.as_ref(), owner)?;
                let new_owner = named
                    .engine
                    .execute_inheritance(caller, named.vault_id, *condition)?;
                Ok(format!("inherited by {}", new_owner))
            }

            Action::Unlock { vault, caller } => {
                let named = self.vault(vault)?;
                let owner = named.engine.vault(named.vault_id)?.current_owner;
                let caller = self.caller_or(caller.as_ref(), owner)?;
                named.engine.unlock_vault(caller, named.vault_id)?;
                Ok(format!("unlocked by {}", caller))
            }

            Action::Distribute { vault, caller } => {
                let named = self.vault(vault)?;
                let owner = named.engine.vault(named.vault_id)?.current_owner;
                let caller = self.caller_or(caller.as_ref(), owner)?;
                let report = named
                    .engine
                    .distribute_inheritance(caller, named.vault_id)?;
                self.touched.insert(SINK);
                self.touched
                    .extend(report.payouts.iter().map(|(address, _)| *address));
                Ok(format!(
                    "distributed {}: {} sacrificed, {} payouts, {} burned",
                    report.vault_balance,
                    report.sacrificed,
                    report.payouts.len(),
                    report.burned
                ))
            }

            Action::Advance { secs, days, to } => {
                let now = self.now();
                let target = match (secs, days, to) {
                    (Some(s), None, None) => now.checked_add(*s),
                    (None, Some(d), None) => d
                        .checked_mul(DAY_SECS)
                        .and_then(|s| now.checked_add(s)),
                    (None, None, Some(t)) => {
                        if *t < now {
                            return Err(ScenarioError::ClockBackwards { now, to: *t }.into());
                        }
                        Some(*t)
                    }
                    _ => return Err(ScenarioError::Ambiguous("secs, days, to").into()),
                }
                .ok_or(ScenarioError::TimeOverflow)?;
                self.clock.advance_to(target);
                Ok(format!("clock at {}", target))
            }
        }
    }

    fn vault(&self, name: &str) -> Result<NamedVault, ScenarioError> {
        self.vaults
            .get(name)
            .cloned()
            .ok_or_else(|| ScenarioError::UnknownVault(name.to_string()))
    }

    /// Resolve an account reference, remembering its label for the report.
    fn resolve(&mut self, reference: &AccountRef) -> Result<Address, StepError> {
        let address = match reference.parse()? {
            AccountTarget::Address(address) => address,
            AccountTarget::Label(label, address) => {
                self.labels.entry(address).or_insert(label);
                address
            }
            AccountTarget::Vault(name) => self.vault(&name)?.engine.address(),
        };
        self.touched.insert(address);
        Ok(address)
    }

    fn caller_or(
        &mut self,
        reference: Option<&AccountRef>,
        default: Address,
    ) -> Result<Address, StepError> {
        match reference {
            Some(r) => self.resolve(r),
            None => Ok(default),
        }
    }

    fn report(&self, scenario: &Scenario) -> Report {
        let mut accounts = self.touched.clone();
        accounts.extend(self.ledger.holders().into_iter().map(|(a, _)| a));

        let balances = accounts
            .into_iter()
            .map(|account| BalanceEntry {
                account,
                label: self.labels.get(&account).cloned(),
                balance: self.ledger.balance_of(&account),
                tax_exempt: self.ledger.is_tax_exempt(&account),
            })
            .collect();

        let vaults = self
            .vaults
            .iter()
            .filter_map(|(name, named)| {
                let id = named.vault_id;
                let record = named.engine.vault(id).ok()?;
                Some(VaultEntry {
                    name: name.clone(),
                    engine: named.engine.address(),
                    vault_id: id,
                    balance: named.engine.balance(),
                    sacrificial_share: record.sacrificial_share,
                    unlock_timestamp: record.unlock_timestamp,
                    details: record.details(),
                    events: named.engine.events(),
                })
            })
            .collect();

        Report {
            scenario: scenario.name.clone(),
            start_time: self.start_time,
            end_time: self.now(),
            symbol: self.ledger.symbol(),
            decimals: self.ledger.decimals(),
            burn_rate_per_mille: self.ledger.burn_rate(),
            total_supply: self.ledger.total_supply(),
            total_burned: self.ledger.total_burned(),
            consistent: self.ledger.is_consistent(),
            steps: self.steps.clone(),
            balances,
            vaults,
            ledger_events: self.ledger.events(),
            factory_events: self.factory.events(),
        }
    }
}
