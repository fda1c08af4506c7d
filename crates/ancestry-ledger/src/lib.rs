//! Ancestry Ledger
//!
//! A deflationary fungible-asset ledger. Every non-exempt transfer burns a
//! fixed per-mille of the amount; the sender is debited in full, the
//! recipient credited the remainder, and total supply shrinks by the burn.
//!
//! # Accounting
//!
//! ```text
//! exempt = tax_exempt[from] || tax_exempt[to]
//! burn   = exempt ? 0 : floor(amount * burn_rate / 1000)
//! net    = amount - burn
//!
//! balances[from] -= amount
//! balances[to]   += net
//! total_supply   -= burn
//! ```
//!
//! `sum(balances) == total_supply` holds after every call.
//!
//! # Execution model
//!
//! Calls are sequential and run to completion. The only way foreign code runs
//! mid-call is a [`Receiver`] attached to a credited address: it is invoked
//! after the credit is committed and may call back into any component.
//!
//! Every public entry point validates before it mutates, so a rejected call
//! leaves no trace. [`Ledger::atomic`] extends that guarantee over a sequence
//! of calls made by a higher-level component.

pub mod events;
pub mod genesis;

pub use events::LedgerEvent;
pub use genesis::{GenesisAllocation, GenesisBucket};

use ancestry_core::{
    AccessControl, AccessError, Address, Amount, LedgerParams, ParamsError, PerMille, Role,
    MAX_SUPPLY, SINK,
};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger is not activated")]
    NotActivated,

    #[error("Ledger is already activated")]
    AlreadyActivated,

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Insufficient balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        account: Address,
        needed: Amount,
        available: Amount,
    },

    #[error("Insufficient allowance from {owner} to {spender}: need {needed}, have {available}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        needed: Amount,
        available: Amount,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(Address),

    #[error("The sink address cannot spend")]
    SinkIsUnspendable,

    #[error("Only the registered vault can pay fees (caller {0})")]
    OnlyVaultCanPayFees(Address),

    #[error("The sink address is permanently tax-exempt")]
    SinkExemptionPermanent,

    #[error("Genesis distribution already completed")]
    GenesisAlreadyCompleted,

    #[error("Supply cap exceeded: requested {requested}, headroom {available}")]
    SupplyCapExceeded { requested: Amount, available: Amount },

    #[error("Engine {active} is mid-call; {engine} must wait for it to return")]
    EngineBusy { active: Address, engine: Address },

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Access denied: {0}")]
    Access(#[from] AccessError),

    #[error("Invalid ledger parameters: {0}")]
    Params(#[from] ParamsError),
}

/// Outcome of a committed transfer-like call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub from: Address,
    pub to: Address,
    /// Debited from the sender.
    pub gross: Amount,
    /// Credited to the recipient.
    pub net: Amount,
    /// Removed from supply.
    pub burned: Amount,
}

/// Code attached to an address, run whenever that address is credited.
///
/// This is the ledger's only re-entry point. Implementations may call any
/// component (including the one whose call triggered the credit); errors are
/// logged and recorded, never propagated to the payer.
pub trait Receiver {
    fn on_receive(&self, receipt: &TransferReceipt) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<(Address, Address), Amount>,
    tax_exempt: BTreeSet<Address>,
    total_supply: Amount,
    total_burned: Amount,
    activated: bool,
    genesis_completed: bool,
    vault_address: Option<Address>,
    fee_sink: Option<Address>,
    roles: AccessControl,
    events: Vec<LedgerEvent>,
}

impl LedgerState {
    fn balance(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    fn set_balance(&mut self, account: Address, amount: Amount) {
        if amount == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, amount);
        }
    }

    fn is_exempt(&self, account: &Address) -> bool {
        account.is_sink() || self.tax_exempt.contains(account)
    }
}

/// The shared balance ledger.
///
/// Held behind an `Rc` by every vault engine. All methods take `&self`;
/// interior state is never borrowed across a [`Receiver`] callback.
pub struct Ledger {
    burn_rate: PerMille,
    state: RefCell<LedgerState>,
    receivers: RefCell<BTreeMap<Address, Rc<dyn Receiver>>>,
    /// Engine whose call is running. Its checkpoint is the only one a rollback restores.
    in_flight: Cell<Option<Address>>,
}

/// Marks an engine call as running. Released on drop.
pub struct EngineGuard<'a> {
    ledger: &'a Ledger,
    outermost: bool,
}

impl std::fmt::Debug for EngineGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineGuard")
            .field("outermost", &self.outermost)
            .finish_non_exhaustive()
    }
}

impl Drop for EngineGuard<'_> {
    fn drop(&mut self) {
        if self.outermost {
            self.ledger.in_flight.set(None);
        }
    }
}

impl Ledger {
    /// New, not-yet-activated ledger with zero supply.
    ///
    /// `admin` receives `DefaultAdmin`, `Minter` and `Activator`.
    pub fn new(admin: Address, params: LedgerParams) -> Result<Self, LedgerError> {
        params.validate()?;
        if admin.is_zero() || admin.is_sink() {
            return Err(LedgerError::InvalidAddress(admin));
        }
        let burn_rate = PerMille::new(params.burn_rate_per_mille)
            .map_err(|e| ParamsError::Invalid {
                name: "burn_rate_per_mille",
                reason: e.to_string(),
            })?;

        let mut state = LedgerState {
            roles: AccessControl::with_admin(admin, &[Role::Minter, Role::Activator]),
            ..LedgerState::default()
        };
        state.tax_exempt.insert(SINK);

        log::info!("Ledger created (admin {}, burn rate {})", admin, burn_rate);

        Ok(Self {
            burn_rate,
            state: RefCell::new(state),
            receivers: RefCell::new(BTreeMap::new()),
            in_flight: Cell::new(None),
        })
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub fn name(&self) -> &'static str {
        ancestry_core::NAME
    }

    pub fn symbol(&self) -> &'static str {
        ancestry_core::SYMBOL
    }

    pub fn decimals(&self) -> u32 {
        ancestry_core::DECIMALS
    }

    pub fn burn_rate(&self) -> PerMille {
        self.burn_rate
    }

    pub fn total_supply(&self) -> Amount {
        self.state.borrow().total_supply
    }

    /// Cumulative supply destroyed since genesis.
    pub fn total_burned(&self) -> Amount {
        self.state.borrow().total_burned
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.state.borrow().balance(account)
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.state.borrow().allowance(owner, spender)
    }

    pub fn is_tax_exempt(&self, account: &Address) -> bool {
        self.state.borrow().is_exempt(account)
    }

    pub fn is_activated(&self) -> bool {
        self.state.borrow().activated
    }

    pub fn genesis_completed(&self) -> bool {
        self.state.borrow().genesis_completed
    }

    /// The only address allowed to call [`Ledger::pay_vault_fee`].
    pub fn vault_address(&self) -> Option<Address> {
        self.state.borrow().vault_address
    }

    /// Destination of vault maintenance fees. Falls back to [`SINK`].
    pub fn fee_sink(&self) -> Address {
        self.state.borrow().fee_sink.unwrap_or(SINK)
    }

    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        self.state.borrow().roles.has_role(role, account)
    }

    /// Every non-zero balance, ordered by address.
    pub fn holders(&self) -> Vec<(Address, Amount)> {
        self.state
            .borrow()
            .balances
            .iter()
            .map(|(a, b)| (*a, *b))
            .collect()
    }

    /// `sum(balances) == total_supply`.
    pub fn is_consistent(&self) -> bool {
        let state = self.state.borrow();
        let sum = state
            .balances
            .values()
            .try_fold(0 as Amount, |acc, b| acc.checked_add(*b));
        sum == Some(state.total_supply)
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.state.borrow().events.clone()
    }

    /// Burn (and net credit) a transfer of `amount` between these two parties would incur.
    pub fn quote(&self, from: &Address, to: &Address, amount: Amount) -> Result<(Amount, Amount), LedgerError> {
        let state = self.state.borrow();
        self.split(&state, from, to, amount)
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// One-way latch enabling transfers.
    pub fn activate(&self, caller: Address) -> Result<(), LedgerError> {
        let mut state = self.state.borrow_mut();
        state.roles.check_role(Role::Activator, &caller)?;
        if state.activated {
            return Err(LedgerError::AlreadyActivated);
        }
        state.activated = true;
        state.events.push(LedgerEvent::Activated { by: caller });
        log::info!("Ledger activated by {}", caller);
        Ok(())
    }

    /// Mint the full supply into the five genesis buckets. Runs exactly once.
    pub fn genesis_distribution(
        &self,
        caller: Address,
        allocation: &GenesisAllocation,
    ) -> Result<Vec<GenesisBucket>, LedgerError> {
        let mut state = self.state.borrow_mut();
        state.roles.check_role(Role::Minter, &caller)?;
        if state.genesis_completed {
            return Err(LedgerError::GenesisAlreadyCompleted);
        }
        for recipient in allocation.recipients() {
            if recipient.is_zero() || recipient.is_sink() {
                return Err(LedgerError::InvalidAddress(recipient));
            }
        }
        let headroom = MAX_SUPPLY - state.total_supply;
        if headroom < MAX_SUPPLY {
            return Err(LedgerError::SupplyCapExceeded {
                requested: MAX_SUPPLY,
                available: headroom,
            });
        }

        let buckets = allocation.plan(MAX_SUPPLY);
        for bucket in &buckets {
            let balance = state.balance(&bucket.recipient) + bucket.amount;
            state.set_balance(bucket.recipient, balance);
            state.events.push(LedgerEvent::Mint {
                to: bucket.recipient,
                amount: bucket.amount,
            });
            log::debug!(
                "Genesis bucket {}: {} -> {}",
                bucket.label,
                bucket.amount,
                bucket.recipient
            );
        }
        state.total_supply = MAX_SUPPLY;
        state.genesis_completed = true;
        if state.fee_sink.is_none() {
            state.fee_sink = Some(allocation.ecosystem_fund);
        }
        state.events.push(LedgerEvent::GenesisCompleted {
            total_supply: MAX_SUPPLY,
        });

        log::info!("Genesis distribution completed ({} units)", MAX_SUPPLY);
        Ok(buckets)
    }

    /// Role-gated mint, capped at [`MAX_SUPPLY`].
    pub fn mint(&self, caller: Address, to: Address, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.borrow_mut();
        state.roles.check_role(Role::Minter, &caller)?;
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if to.is_zero() {
            return Err(LedgerError::InvalidAddress(to));
        }
        let available = MAX_SUPPLY - state.total_supply;
        if amount > available {
            return Err(LedgerError::SupplyCapExceeded {
                requested: amount,
                available,
            });
        }
        let balance = state.balance(&to) + amount;
        state.set_balance(to, balance);
        state.total_supply += amount;
        state.events.push(LedgerEvent::Mint { to, amount });
        Ok(())
    }

    /// Toggle tax exemption. Idempotent; the sink can never lose its exemption.
    pub fn set_tax_exempt(
        &self,
        caller: Address,
        account: Address,
        exempt: bool,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.borrow_mut();
        state.roles.check_role(Role::DefaultAdmin, &caller)?;
        if account.is_zero() {
            return Err(LedgerError::InvalidAddress(account));
        }
        if account.is_sink() && !exempt {
            return Err(LedgerError::SinkExemptionPermanent);
        }
        if exempt {
            state.tax_exempt.insert(account);
        } else {
            state.tax_exempt.remove(&account);
        }
        state
            .events
            .push(LedgerEvent::TaxExemptChanged { account, exempt });
        log::info!("Tax exemption for {} set to {}", account, exempt);
        Ok(())
    }

    /// Register the vault allowed to pull maintenance fees.
    pub fn set_vault_address(&self, caller: Address, vault: Address) -> Result<(), LedgerError> {
        let mut state = self.state.borrow_mut();
        state.roles.check_role(Role::DefaultAdmin, &caller)?;
        if vault.is_zero() || vault.is_sink() {
            return Err(LedgerError::InvalidAddress(vault));
        }
        state.vault_address = Some(vault);
        log::info!("Vault address set to {}", vault);
        Ok(())
    }

    pub fn set_fee_sink(&self, caller: Address, sink: Address) -> Result<(), LedgerError> {
        let mut state = self.state.borrow_mut();
        state.roles.check_role(Role::DefaultAdmin, &caller)?;
        if sink.is_zero() {
            return Err(LedgerError::InvalidAddress(sink));
        }
        state.fee_sink = Some(sink);
        Ok(())
    }

    pub fn grant_role(&self, caller: Address, role: Role, account: Address) -> Result<(), LedgerError> {
        let mut state = self.state.borrow_mut();
        if state.roles.grant_role(&caller, role, account)? {
            state.events.push(LedgerEvent::RoleGranted { role, account });
        }
        Ok(())
    }

    pub fn revoke_role(&self, caller: Address, role: Role, account: Address) -> Result<(), LedgerError> {
        let mut state = self.state.borrow_mut();
        if state.roles.revoke_role(&caller, role, &account)? {
            state.events.push(LedgerEvent::RoleRevoked { role, account });
        }
        Ok(())
    }

    pub fn renounce_role(&self, caller: Address, role: Role) -> Result<(), LedgerError> {
        let mut state = self.state.borrow_mut();
        if state.roles.renounce_role(&caller, role, &caller)? {
            state.events.push(LedgerEvent::RoleRevoked {
                role,
                account: caller,
            });
        }
        Ok(())
    }

    /// Attach receive-time code to `account`, replacing any previous receiver.
    pub fn deploy_receiver(&self, account: Address, receiver: Rc<dyn Receiver>) {
        self.receivers.borrow_mut().insert(account, receiver);
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Move `amount` from `caller` to `to`, burning the tax unless either side is exempt.
    pub fn transfer(
        &self,
        caller: Address,
        to: Address,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        let receipt = {
            let mut state = self.state.borrow_mut();
            self.move_funds(&mut state, caller, to, amount)?
        };
        self.notify(&receipt);
        Ok(receipt)
    }

    pub fn approve(&self, caller: Address, spender: Address, amount: Amount) -> Result<(), LedgerError> {
        if caller.is_sink() {
            return Err(LedgerError::SinkIsUnspendable);
        }
        if let Some(bad) = [caller, spender].into_iter().find(Address::is_zero) {
            return Err(LedgerError::InvalidAddress(bad));
        }
        let mut state = self.state.borrow_mut();
        if amount == 0 {
            state.allowances.remove(&(caller, spender));
        } else {
            state.allowances.insert((caller, spender), amount);
        }
        state.events.push(LedgerEvent::Approval {
            owner: caller,
            spender,
            value: amount,
        });
        Ok(())
    }

    /// Allowance-consuming transfer by `caller` on behalf of `from`.
    pub fn transfer_from(
        &self,
        caller: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        let receipt = {
            let mut state = self.state.borrow_mut();
            let allowance = Self::require_allowance(&state, &from, &caller, amount)?;
            let receipt = self.move_funds(&mut state, from, to, amount)?;
            Self::set_allowance(&mut state, from, caller, allowance - amount);
            receipt
        };
        self.notify(&receipt);
        Ok(receipt)
    }

    /// Holder destroys part of its own balance. No tax applies.
    pub fn burn(&self, caller: Address, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.borrow_mut();
        if !state.activated {
            return Err(LedgerError::NotActivated);
        }
        if caller.is_sink() {
            return Err(LedgerError::SinkIsUnspendable);
        }
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let available = state.balance(&caller);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: caller,
                needed: amount,
                available,
            });
        }
        state.set_balance(caller, available - amount);
        state.total_supply -= amount;
        state.total_burned += amount;
        let new_total_supply = state.total_supply;
        state.events.push(LedgerEvent::Burn {
            from: caller,
            amount,
            new_total_supply,
        });
        Ok(())
    }

    /// Pull a maintenance fee from `payer` into the fee sink.
    ///
    /// Only the registered vault may call this, and only against an explicit
    /// allowance from `payer` to that vault.
    pub fn pay_vault_fee(
        &self,
        caller: Address,
        payer: Address,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        let receipt = {
            let mut state = self.state.borrow_mut();
            if state.vault_address != Some(caller) {
                return Err(LedgerError::OnlyVaultCanPayFees(caller));
            }
            if amount == 0 {
                return Err(LedgerError::ZeroAmount);
            }
            let allowance = Self::require_allowance(&state, &payer, &caller, amount)?;
            let sink = state.fee_sink.unwrap_or(SINK);
            let receipt = self.move_funds(&mut state, payer, sink, amount)?;
            Self::set_allowance(&mut state, payer, caller, allowance - amount);
            state.events.push(LedgerEvent::VaultFeePaid {
                vault: caller,
                payer,
                sink,
                amount,
                burned: receipt.burned,
            });
            receipt
        };
        log::info!(
            "Vault {} collected fee {} from {} (burned {})",
            caller,
            amount,
            payer,
            receipt.burned
        );
        self.notify(&receipt);
        Ok(receipt)
    }

    /// Run `f` as one unit: if it fails, every ledger change it made is undone.
    ///
    /// Receiver registrations are code, not state, and are not rolled back.
    pub fn atomic<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let checkpoint = self.state.borrow().clone();
        let result = f();
        if result.is_err() {
            *self.state.borrow_mut() = checkpoint;
            log::debug!("Ledger rolled back to checkpoint");
        }
        result
    }

    /// Register `engine` as running for the guard's lifetime.
    ///
    /// Nested calls back into the same engine are allowed. Any other engine
    /// is refused with [`LedgerError::EngineBusy`] until the outer call
    /// returns: a rollback of the outer call restores the shared ledger but
    /// only that one engine's records.
    pub fn enter_engine(&self, engine: Address) -> Result<EngineGuard<'_>, LedgerError> {
        match self.in_flight.get() {
            Some(active) if active != engine => Err(LedgerError::EngineBusy { active, engine }),
            Some(_) => Ok(EngineGuard {
                ledger: self,
                outermost: false,
            }),
            None => {
                self.in_flight.set(Some(engine));
                Ok(EngineGuard {
                    ledger: self,
                    outermost: true,
                })
            }
        }
    }

    pub fn engine_in_flight(&self) -> Option<Address> {
        self.in_flight.get()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Burn and net for a transfer between `from` and `to`.
    fn split(
        &self,
        state: &LedgerState,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(Amount, Amount), LedgerError> {
        if state.is_exempt(from) || state.is_exempt(to) {
            return Ok((0, amount));
        }
        let burn = self
            .burn_rate
            .apply(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        Ok((burn, amount - burn))
    }

    /// Validate, then debit/credit/burn. Nothing is mutated on error.
    fn move_funds(
        &self,
        state: &mut LedgerState,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        if !state.activated {
            return Err(LedgerError::NotActivated);
        }
        if from.is_sink() {
            return Err(LedgerError::SinkIsUnspendable);
        }
        if from.is_zero() {
            return Err(LedgerError::InvalidAddress(from));
        }
        if to.is_zero() {
            return Err(LedgerError::InvalidAddress(to));
        }
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let available = state.balance(&from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from,
                needed: amount,
                available,
            });
        }
        let (burn, net) = self.split(state, &from, &to, amount)?;

        state.set_balance(from, available - amount);
        let credited = state
            .balance(&to)
            .checked_add(net)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        state.set_balance(to, credited);
        state.total_supply -= burn;
        state.total_burned += burn;

        state.events.push(LedgerEvent::Transfer {
            from,
            to,
            value: net,
        });
        if burn > 0 {
            let new_total_supply = state.total_supply;
            state.events.push(LedgerEvent::Burn {
                from,
                amount: burn,
                new_total_supply,
            });
        }
        log::debug!(
            "Transfer {} -> {}: gross {}, net {}, burned {}",
            from,
            to,
            amount,
            net,
            burn
        );

        Ok(TransferReceipt {
            from,
            to,
            gross: amount,
            net,
            burned: burn,
        })
    }

    fn require_allowance(
        state: &LedgerState,
        owner: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<Amount, LedgerError> {
        let available = state.allowance(owner, spender);
        if available < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: *owner,
                spender: *spender,
                needed: amount,
                available,
            });
        }
        Ok(available)
    }

    fn set_allowance(state: &mut LedgerState, owner: Address, spender: Address, amount: Amount) {
        if amount == 0 {
            state.allowances.remove(&(owner, spender));
        } else {
            state.allowances.insert((owner, spender), amount);
        }
    }

    /// Run the recipient's receiver, if any. No ledger borrow is held.
    fn notify(&self, receipt: &TransferReceipt) {
        let receiver = self.receivers.borrow().get(&receipt.to).cloned();
        let Some(receiver) = receiver else {
            return;
        };
        if let Err(e) = receiver.on_receive(receipt) {
            log::warn!("Receiver at {} failed: {:#}", receipt.to, e);
            self.state
                .borrow_mut()
                .events
                .push(LedgerEvent::ReceiverFailed {
                    account: receipt.to,
                    message: format!("{:#}", e),
                });
        }
    }
}
