//! The vault engine
//!
//! One engine instance holds any number of vault records, its own role
//! registry and its own ledger address. Funds deposited to that address back
//! the engine's vaults.
//!
//! # All-or-nothing calls
//!
//! Every mutating entry point runs inside [`Ledger::atomic`] and also
//! checkpoints the engine's own state. A failed call restores both, events
//! included.
//!
//! # Re-entry
//!
//! Ledger transfers can run [`ancestry_ledger::Receiver`] code which may call
//! back into this engine. Two things stop that from doing damage:
//!
//! - state transitions are committed before any transfer is made
//! - fund-moving calls hold the vault's execution lock for their whole
//!   duration, so a nested call on the same vault fails with
//!   [`VaultError::ExecutionLocked`]

use crate::distribution;
use crate::events::VaultEvent;
use crate::lock::{ExecutionGuard, ExecutionLocks};
use crate::record::{
    Beneficiary, ConditionKind, InheritanceCondition, VaultDetails, VaultId, VaultRecord,
    VaultStatus,
};
use crate::VaultError;
use ancestry_core::{
    AccessControl, Address, Amount, Clock, PerMille, Role, Timestamp, VaultParams, SINK,
};
use ancestry_ledger::Ledger;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// What `distribute_inheritance` moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub vault_id: VaultId,
    /// Engine balance at the start of the payout.
    pub vault_balance: Amount,
    /// Sent to [`SINK`].
    pub sacrificed: Amount,
    /// Gross amounts debited per beneficiary, first beneficiary first.
    pub payouts: Vec<(Address, Amount)>,
    /// Transfer tax burned along the way.
    pub burned: Amount,
}

impl DistributionReport {
    pub fn total_paid(&self) -> Amount {
        self.sacrificed + self.payouts.iter().map(|(_, a)| *a).sum::<Amount>()
    }
}

#[derive(Debug, Clone, Default)]
struct EngineState {
    vaults: Vec<VaultRecord>,
    roles: AccessControl,
    events: Vec<VaultEvent>,
}

impl EngineState {
    fn vault(&self, id: VaultId) -> Result<&VaultRecord, VaultError> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.vaults.get(i))
            .ok_or(VaultError::VaultNotFound(id))
    }

    fn vault_mut(&mut self, id: VaultId) -> Result<&mut VaultRecord, VaultError> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.vaults.get_mut(i))
            .ok_or(VaultError::VaultNotFound(id))
    }

    fn is_admin(&self, account: &Address) -> bool {
        self.roles.has_role(Role::DefaultAdmin, account)
    }

    /// Owner, admin, executor or any beneficiary.
    fn may_execute(&self, id: VaultId, caller: &Address) -> Result<bool, VaultError> {
        let vault = self.vault(id)?;
        Ok(&vault.current_owner == caller
            || self.is_admin(caller)
            || self.roles.has_role(Role::Executor, caller)
            || vault.is_beneficiary(caller))
    }
}

fn require_status(vault: &VaultRecord, id: VaultId, expected: VaultStatus) -> Result<(), VaultError> {
    if vault.status != expected {
        return Err(VaultError::InvalidStatus {
            vault_id: id,
            expected,
            actual: vault.status,
        });
    }
    Ok(())
}

fn require_not_dissolved(vault: &VaultRecord, id: VaultId) -> Result<(), VaultError> {
    if vault.status == VaultStatus::Dissolved {
        return Err(VaultError::Dissolved(id));
    }
    Ok(())
}

pub struct VaultEngine {
    address: Address,
    ledger: Rc<Ledger>,
    clock: Rc<dyn Clock>,
    params: VaultParams,
    state: RefCell<EngineState>,
    locks: ExecutionLocks,
}

impl VaultEngine {
    /// New engine at `address`. `admin` receives `DefaultAdmin` on this instance.
    pub fn new(
        address: Address,
        ledger: Rc<Ledger>,
        clock: Rc<dyn Clock>,
        admin: Address,
        params: VaultParams,
    ) -> Result<Self, VaultError> {
        params.validate()?;
        if address.is_zero() || address.is_sink() {
            return Err(VaultError::InvalidBeneficiary(address));
        }

        log::info!("Vault engine {} created (admin {})", address, admin);

        Ok(Self {
            address,
            ledger,
            clock,
            params,
            state: RefCell::new(EngineState {
                roles: AccessControl::with_admin(admin, &[]),
                ..EngineState::default()
            }),
            locks: ExecutionLocks::new(),
        })
    }

    // ========================================================================
    // Vault setup
    // ========================================================================

    /// Create a vault owned by `caller`. Caller must hold `DefaultAdmin`.
    ///
    /// `beneficiaries` and `shares` are parallel arrays; the first beneficiary
    /// becomes the owner on inheritance and absorbs distribution remainders.
    pub fn create_vault(
        &self,
        caller: Address,
        beneficiaries: &[Address],
        shares: &[u16],
        metadata_uri: impl Into<String>,
        conditions: &[InheritanceCondition],
        sacrificial_share: u16,
    ) -> Result<VaultId, VaultError> {
        let metadata_uri = metadata_uri.into();
        let _flight = self.ledger.enter_engine(self.address)?;
        let mut state = self.state.borrow_mut();
        state.roles.check_role(Role::DefaultAdmin, &caller)?;

        let beneficiaries = self.validate_beneficiaries(beneficiaries, shares, sacrificial_share)?;
        let sacrificial_share = PerMille::new(sacrificial_share)
            .map_err(|_| VaultError::InvalidSacrificialShare(sacrificial_share))?;
        if conditions.len() > self.params.max_conditions {
            return Err(VaultError::ConditionCapacityExceeded {
                max: self.params.max_conditions,
            });
        }

        let now = self.clock.now();
        let vault_id = state.vaults.len() as VaultId;
        state.vaults.push(VaultRecord {
            creator: caller,
            current_owner: caller,
            beneficiaries,
            sacrificial_share,
            status: VaultStatus::Active,
            conditions: conditions.to_vec(),
            creation_timestamp: now,
            last_maintenance_timestamp: now,
            unlock_timestamp: None,
            cultural_energy: 0,
            metadata_uri: metadata_uri.clone(),
        });
        state.events.push(VaultEvent::VaultCreated {
            vault_id,
            creator: caller,
            metadata_uri,
        });

        log::info!(
            "Vault {} created on {} by {} ({} conditions)",
            vault_id,
            self.address,
            caller,
            conditions.len()
        );
        Ok(vault_id)
    }

    fn validate_beneficiaries(
        &self,
        addresses: &[Address],
        shares: &[u16],
        sacrificial_share: u16,
    ) -> Result<Vec<Beneficiary>, VaultError> {
        if addresses.len() != shares.len() {
            return Err(VaultError::LengthMismatch {
                beneficiaries: addresses.len(),
                shares: shares.len(),
            });
        }
        if addresses.is_empty() {
            return Err(VaultError::NoBeneficiaries);
        }
        if addresses.len() > self.params.max_beneficiaries {
            return Err(VaultError::TooManyBeneficiaries {
                count: addresses.len(),
                max: self.params.max_beneficiaries,
            });
        }
        if sacrificial_share > PerMille::DENOMINATOR {
            return Err(VaultError::InvalidSacrificialShare(sacrificial_share));
        }

        let total: u32 = shares.iter().map(|s| *s as u32).sum::<u32>() + sacrificial_share as u32;
        if total > PerMille::DENOMINATOR as u32 {
            return Err(VaultError::TotalSharesMismatch { total });
        }

        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(addresses.len());
        for (address, share) in addresses.iter().zip(shares) {
            if address.is_zero() || address.is_sink() || *address == self.address {
                return Err(VaultError::InvalidBeneficiary(*address));
            }
            if !seen.insert(*address) {
                return Err(VaultError::DuplicateBeneficiary(*address));
            }
            if *share == 0 {
                return Err(VaultError::ZeroShare(*address));
            }
            // Bounded by the total check above.
            let share =
                PerMille::new(*share).map_err(|_| VaultError::TotalSharesMismatch { total })?;
            out.push(Beneficiary::new(*address, share));
        }
        Ok(out)
    }

    /// Append a condition. Caller must hold `DefaultAdmin`. Returns its index.
    pub fn add_inheritance_condition(
        &self,
        caller: Address,
        vault_id: VaultId,
        kind: ConditionKind,
        trigger_value: u64,
    ) -> Result<usize, VaultError> {
        let _flight = self.ledger.enter_engine(self.address)?;
        let mut state = self.state.borrow_mut();
        state.roles.check_role(Role::DefaultAdmin, &caller)?;
        let max = self.params.max_conditions;
        let vault = state.vault_mut(vault_id)?;
        require_not_dissolved(vault, vault_id)?;
        if vault.conditions.len() >= max {
            return Err(VaultError::ConditionCapacityExceeded { max });
        }

        let index = vault.conditions.len();
        vault.conditions.push(InheritanceCondition {
            kind,
            trigger_value,
            is_active: true,
        });
        state.events.push(VaultEvent::ConditionAdded {
            vault_id,
            index,
            kind,
            trigger_value,
        });
        Ok(index)
    }

    /// Arm or disarm a condition. Admin or current owner.
    pub fn set_condition_active(
        &self,
        caller: Address,
        vault_id: VaultId,
        index: usize,
        is_active: bool,
    ) -> Result<(), VaultError> {
        let _flight = self.ledger.enter_engine(self.address)?;
        let mut state = self.state.borrow_mut();
        let is_admin = state.is_admin(&caller);
        let vault = state.vault_mut(vault_id)?;
        require_not_dissolved(vault, vault_id)?;
        if !is_admin && vault.current_owner != caller {
            return Err(VaultError::Unauthorized { caller, vault_id });
        }
        let condition = vault
            .conditions
            .get_mut(index)
            .ok_or(VaultError::ConditionNotFound { vault_id, index })?;
        condition.is_active = is_active;
        state.events.push(VaultEvent::ConditionToggled {
            vault_id,
            index,
            is_active,
        });
        Ok(())
    }

    /// Change the sacrificial share. Caller must hold `DefaultAdmin`.
    pub fn set_sacrificial_share(
        &self,
        caller: Address,
        vault_id: VaultId,
        share: u16,
    ) -> Result<(), VaultError> {
        let _flight = self.ledger.enter_engine(self.address)?;
        let mut state = self.state.borrow_mut();
        state.roles.check_role(Role::DefaultAdmin, &caller)?;
        let vault = state.vault_mut(vault_id)?;
        require_not_dissolved(vault, vault_id)?;

        let share =
            PerMille::new(share).map_err(|_| VaultError::InvalidSacrificialShare(share))?;
        let beneficiary_total = PerMille::total(vault.beneficiaries.iter().map(|b| &b.share));
        let total = beneficiary_total + share.get() as u32;
        if total > PerMille::DENOMINATOR as u32 {
            return Err(VaultError::TotalSharesMismatch { total });
        }

        vault.sacrificial_share = share;
        state
            .events
            .push(VaultEvent::SacrificialShareUpdated { vault_id, share });
        log::info!("Vault {} sacrificial share set to {}", vault_id, share);
        Ok(())
    }

    pub fn grant_role(&self, caller: Address, role: Role, account: Address) -> Result<(), VaultError> {
        let _flight = self.ledger.enter_engine(self.address)?;
        self.state
            .borrow_mut()
            .roles
            .grant_role(&caller, role, account)?;
        Ok(())
    }

    pub fn revoke_role(&self, caller: Address, role: Role, account: Address) -> Result<(), VaultError> {
        let _flight = self.ledger.enter_engine(self.address)?;
        self.state
            .borrow_mut()
            .roles
            .revoke_role(&caller, role, &account)?;
        Ok(())
    }

    // ========================================================================
    // Maintenance and inheritance
    // ========================================================================

    /// Pay a maintenance fee from the current owner into the ledger's fee sink.
    ///
    /// Requires an allowance from the owner to this engine. Adds
    /// `fee / cultural_energy_divisor` to the vault's cultural energy and
    /// resets the inactivity clock. Returns the energy gained.
    pub fn pay_maintenance_fee(
        &self,
        caller: Address,
        vault_id: VaultId,
        fee: Amount,
    ) -> Result<Amount, VaultError> {
        let _guard = self.lock(vault_id)?;
        self.transact("pay_maintenance_fee", || {
            let now = self.clock.now();
            let (gained, cultural_energy) = {
                let mut state = self.state.borrow_mut();
                let vault = state.vault_mut(vault_id)?;
                require_not_dissolved(vault, vault_id)?;
                if vault.current_owner != caller {
                    return Err(VaultError::Unauthorized { caller, vault_id });
                }
                if fee == 0 {
                    return Err(VaultError::ZeroAmount);
                }
                let gained = fee / Amount::from(self.params.cultural_energy_divisor);
                vault.cultural_energy = vault
                    .cultural_energy
                    .checked_add(gained)
                    .ok_or(VaultError::ArithmeticOverflow)?;
                vault.last_maintenance_timestamp = now;
                (gained, vault.cultural_energy)
            };

            let receipt = self.ledger.pay_vault_fee(self.address, caller, fee)?;

            self.state
                .borrow_mut()
                .events
                .push(VaultEvent::MaintenanceFeePaid {
                    vault_id,
                    payer: caller,
                    amount: fee,
                    burned: receipt.burned,
                    cultural_energy,
                });
            log::info!(
                "Vault {} maintenance fee {} paid by {} (+{} energy)",
                vault_id,
                fee,
                caller,
                gained
            );
            Ok(gained)
        })
    }

    /// Active → Inherited. Ownership passes to the first beneficiary and the
    /// lock window starts. Returns the new owner.
    pub fn execute_inheritance(
        &self,
        caller: Address,
        vault_id: VaultId,
        condition_index: usize,
    ) -> Result<Address, VaultError> {
        let _guard = self.lock(vault_id)?;
        self.transact("execute_inheritance", || {
            let now = self.clock.now();
            let mut state = self.state.borrow_mut();
            let authorized = state.may_execute(vault_id, &caller)?;
            let vault = state.vault_mut(vault_id)?;
            require_status(vault, vault_id, VaultStatus::Active)?;
            if !authorized {
                return Err(VaultError::Unauthorized { caller, vault_id });
            }

            let condition = vault
                .conditions
                .get(condition_index)
                .ok_or(VaultError::ConditionNotFound {
                    vault_id,
                    index: condition_index,
                })?;
            if !condition.is_active {
                return Err(VaultError::ConditionInactive {
                    vault_id,
                    index: condition_index,
                });
            }
            if !condition.is_met(now, vault.last_maintenance_timestamp) {
                return Err(VaultError::ConditionNotMet {
                    vault_id,
                    index: condition_index,
                });
            }

            let new_owner = vault
                .beneficiaries
                .first()
                .map(|b| b.address)
                .ok_or(VaultError::NoBeneficiaries)?;
            let unlock_at = now
                .checked_add(self.params.inheritance_lock_secs)
                .ok_or(VaultError::ArithmeticOverflow)?;

            vault.current_owner = new_owner;
            vault.status = VaultStatus::Inherited;
            vault.unlock_timestamp = Some(unlock_at);
            state.events.push(VaultEvent::InheritanceTriggered {
                vault_id,
                condition_index,
                new_owner,
                unlock_at,
            });

            log::info!(
                "Vault {} inherited by {} via condition {} (unlocks at {})",
                vault_id,
                new_owner,
                condition_index,
                unlock_at
            );
            Ok(new_owner)
        })
    }

    /// Inherited → Active once the lock window has passed. No funds move.
    pub fn unlock_vault(&self, caller: Address, vault_id: VaultId) -> Result<(), VaultError> {
        self.transact("unlock_vault", || {
            let now = self.clock.now();
            let mut state = self.state.borrow_mut();
            let is_admin = state.is_admin(&caller);
            let vault = state.vault_mut(vault_id)?;
            require_status(vault, vault_id, VaultStatus::Inherited)?;
            if !is_admin && vault.current_owner != caller {
                return Err(VaultError::Unauthorized { caller, vault_id });
            }
            Self::check_unlocked(vault, vault_id, now)?;

            vault.status = VaultStatus::Active;
            let owner = vault.current_owner;
            state
                .events
                .push(VaultEvent::VaultUnlocked { vault_id, owner });
            log::info!("Vault {} unlocked by {}", vault_id, caller);
            Ok(())
        })
    }

    /// Inherited → Dissolved. Pays the engine's whole ledger balance out to
    /// the sink and the beneficiaries.
    pub fn distribute_inheritance(
        &self,
        caller: Address,
        vault_id: VaultId,
    ) -> Result<DistributionReport, VaultError> {
        let _guard = self.lock(vault_id)?;
        self.transact("distribute_inheritance", || {
            let now = self.clock.now();
            let (sacrificial_share, beneficiaries) = {
                let mut state = self.state.borrow_mut();
                let authorized = state.may_execute(vault_id, &caller)?;
                let vault = state.vault_mut(vault_id)?;
                require_status(vault, vault_id, VaultStatus::Inherited)?;
                if !authorized {
                    return Err(VaultError::Unauthorized { caller, vault_id });
                }
                Self::check_unlocked(vault, vault_id, now)?;

                // Committed before any transfer: a nested call sees Dissolved.
                vault.status = VaultStatus::Dissolved;
                (vault.sacrificial_share, vault.beneficiaries.clone())
            };

            let report = self.pay_out(vault_id, sacrificial_share, &beneficiaries)?;

            self.state
                .borrow_mut()
                .events
                .push(VaultEvent::InheritanceDistributed {
                    vault_id,
                    vault_balance: report.vault_balance,
                    sacrificed: report.sacrificed,
                    burned: report.burned,
                });
            log::info!(
                "Vault {} distributed: balance {}, sacrificed {}, {} payouts",
                vault_id,
                report.vault_balance,
                report.sacrificed,
                report.payouts.len()
            );
            Ok(report)
        })
    }

    fn pay_out(
        &self,
        vault_id: VaultId,
        sacrificial_share: PerMille,
        beneficiaries: &[Beneficiary],
    ) -> Result<DistributionReport, VaultError> {
        let balance = self.ledger.balance_of(&self.address);
        let mut report = DistributionReport {
            vault_id,
            vault_balance: balance,
            sacrificed: 0,
            payouts: Vec::with_capacity(beneficiaries.len()),
            burned: 0,
        };
        if balance == 0 {
            return Ok(report);
        }

        let plan = distribution::plan(balance, sacrificial_share, beneficiaries)?;
        if let Some(first) = beneficiaries.first() {
            log::debug!(
                "Vault {} payout plan: sacrifice {}, {} to first beneficiary (remainder {})",
                vault_id,
                plan.sacrifice,
                plan.first.1,
                plan.remainder(first.share)
            );
        }

        if plan.sacrifice > 0 {
            let receipt = self.ledger.transfer(self.address, SINK, plan.sacrifice)?;
            report.sacrificed = receipt.gross;
            report.burned += receipt.burned;
        }

        let mut others = Vec::with_capacity(plan.others.len());
        for (beneficiary, amount) in &plan.others {
            if *amount == 0 {
                others.push((*beneficiary, 0));
                continue;
            }
            let receipt = self.ledger.transfer(self.address, *beneficiary, *amount)?;
            report.burned += receipt.burned;
            others.push((*beneficiary, receipt.gross));
        }

        // Whatever is left, truncation remainder included, goes to the first.
        let (first, _) = plan.first;
        let left = self.ledger.balance_of(&self.address);
        if left > 0 {
            let receipt = self.ledger.transfer(self.address, first, left)?;
            report.burned += receipt.burned;
        }
        report.payouts.push((first, left));
        report.payouts.extend(others);

        let residual = self.ledger.balance_of(&self.address);
        if residual != 0 {
            log::error!("Vault {} left {} behind after distribution", vault_id, residual);
            return Err(VaultError::ResidualBalance {
                vault_id,
                balance: residual,
            });
        }
        Ok(report)
    }

    fn check_unlocked(vault: &VaultRecord, vault_id: VaultId, now: Timestamp) -> Result<(), VaultError> {
        // Inherited vaults always carry an unlock time; a missing one stays locked.
        let unlock_at = vault.unlock_timestamp.unwrap_or(Timestamp::MAX);
        if now < unlock_at {
            return Err(VaultError::StillLocked {
                vault_id,
                unlock_at,
                now,
            });
        }
        Ok(())
    }

    fn lock(&self, vault_id: VaultId) -> Result<ExecutionGuard<'_>, VaultError> {
        self.locks.acquire(vault_id).ok_or_else(|| {
            log::warn!("Rejected nested call on vault {} ({})", vault_id, self.address);
            VaultError::ExecutionLocked(vault_id)
        })
    }

    /// Run `f` with ledger and engine rollback on error.
    ///
    /// While `f` runs no other engine on the ledger may change state, since
    /// the ledger rollback would not reach its records.
    fn transact<T>(
        &self,
        operation: &str,
        f: impl FnOnce() -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        let _flight = self.ledger.enter_engine(self.address).map_err(|e| {
            log::warn!("Rejected {} on {}: {}", operation, self.address, e);
            VaultError::from(e)
        })?;
        let checkpoint = self.state.borrow().clone();
        let result = self.ledger.atomic(f);
        if let Err(e) = &result {
            *self.state.borrow_mut() = checkpoint;
            log::debug!("{} on {} rolled back: {}", operation, self.address, e);
        }
        result
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn ledger(&self) -> &Rc<Ledger> {
        &self.ledger
    }

    pub fn params(&self) -> &VaultParams {
        &self.params
    }

    /// Ledger balance backing every vault on this engine.
    pub fn balance(&self) -> Amount {
        self.ledger.balance_of(&self.address)
    }

    pub fn vault_count(&self) -> usize {
        self.state.borrow().vaults.len()
    }

    pub fn vault(&self, vault_id: VaultId) -> Result<VaultRecord, VaultError> {
        self.state.borrow().vault(vault_id).cloned()
    }

    pub fn vault_details(&self, vault_id: VaultId) -> Result<VaultDetails, VaultError> {
        Ok(self.state.borrow().vault(vault_id)?.details())
    }

    pub fn status(&self, vault_id: VaultId) -> Result<VaultStatus, VaultError> {
        Ok(self.state.borrow().vault(vault_id)?.status)
    }

    pub fn vault_shares(&self, vault_id: VaultId) -> Result<Vec<Beneficiary>, VaultError> {
        Ok(self.state.borrow().vault(vault_id)?.beneficiaries.clone())
    }

    /// Share of `account`, or `None` if it is not a beneficiary.
    pub fn beneficiary_share(
        &self,
        vault_id: VaultId,
        account: &Address,
    ) -> Result<Option<PerMille>, VaultError> {
        Ok(self.state.borrow().vault(vault_id)?.share_of(account))
    }

    pub fn sacrificial_share(&self, vault_id: VaultId) -> Result<PerMille, VaultError> {
        Ok(self.state.borrow().vault(vault_id)?.sacrificial_share)
    }

    pub fn conditions(&self, vault_id: VaultId) -> Result<Vec<InheritanceCondition>, VaultError> {
        Ok(self.state.borrow().vault(vault_id)?.conditions.clone())
    }

    pub fn unlock_timestamp(&self, vault_id: VaultId) -> Result<Option<Timestamp>, VaultError> {
        Ok(self.state.borrow().vault(vault_id)?.unlock_timestamp)
    }

    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        self.state.borrow().roles.has_role(role, account)
    }

    pub fn is_executing(&self, vault_id: VaultId) -> bool {
        self.locks.is_locked(vault_id)
    }

    pub fn events(&self) -> Vec<VaultEvent> {
        self.state.borrow().events.clone()
    }
}
