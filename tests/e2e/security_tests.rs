//! Adversarial tests.
//!
//! These tests verify:
//! 1. Re-entrant calls from a malicious beneficiary fail while the original
//!    call still completes with correct balances
//! 2. A post-distribution residual aborts the call and rolls everything back
//! 3. Receiver failures cannot veto payouts
//! 4. The sink and unauthorized callers cannot move funds
//! 5. A payout on one engine cannot drive another engine whose records the
//!    payout's rollback would not restore

use ancestry_core::{
    Address, Clock, LedgerParams, ManualClock, VaultParams, DAY_SECS, SINK, UNIT,
};
use ancestry_ledger::{GenesisAllocation, Ledger, LedgerError, LedgerEvent, Receiver, TransferReceipt};
use ancestry_vault::{
    CreateVaultRequest, ErrorKind, InheritanceCondition, VaultEngine, VaultError, VaultFactory,
    VaultId, VaultStatus,
};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

const START: u64 = 1_700_000_000;

fn admin() -> Address {
    Address::from_label("admin")
}

fn owner() -> Address {
    Address::from_label("owner")
}

fn heir() -> Address {
    Address::from_label("honest-heir")
}

fn attacker_address() -> Address {
    Address::from_label("attacker")
}

// ============================================================================
// Attacker receiver
// ============================================================================

#[derive(Clone, Copy)]
enum Attack {
    Distribute(VaultId),
    Execute(VaultId),
    PayFee(VaultId),
    /// Send the received amount straight back to the engine.
    Refund,
    Fail,
}

struct Attacker {
    me: Address,
    attack: Attack,
    engine: RefCell<Weak<VaultEngine>>,
    outcomes: RefCell<Vec<Result<(), VaultError>>>,
}

impl Attacker {
    fn deploy(ledger: &Ledger, attack: Attack) -> Rc<Self> {
        let attacker = Rc::new(Self {
            me: attacker_address(),
            attack,
            engine: RefCell::new(Weak::new()),
            outcomes: RefCell::new(Vec::new()),
        });
        ledger.deploy_receiver(attacker.me, attacker.clone());
        attacker
    }

    fn arm(&self, engine: &Rc<VaultEngine>) {
        *self.engine.borrow_mut() = Rc::downgrade(engine);
    }

    fn outcomes(&self) -> Vec<Result<(), VaultError>> {
        self.outcomes.borrow().clone()
    }
}

impl Receiver for Attacker {
    fn on_receive(&self, receipt: &TransferReceipt) -> anyhow::Result<()> {
        let Some(engine) = self.engine.borrow().upgrade() else {
            return Ok(());
        };
        let outcome = match self.attack {
            Attack::Distribute(id) => engine.distribute_inheritance(self.me, id).map(|_| ()),
            Attack::Execute(id) => engine.execute_inheritance(self.me, id, 0).map(|_| ()),
            Attack::PayFee(id) => engine.pay_maintenance_fee(self.me, id, UNIT).map(|_| ()),
            Attack::Refund => engine
                .ledger()
                .transfer(self.me, engine.address(), receipt.net)
                .map(|_| ())
                .map_err(VaultError::from),
            Attack::Fail => anyhow::bail!("attacker refuses funds"),
        };
        self.outcomes.borrow_mut().push(outcome);
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

struct Setup {
    ledger: Rc<Ledger>,
    clock: Rc<ManualClock>,
    factory: VaultFactory,
}

fn setup() -> Setup {
    let ledger = Rc::new(Ledger::new(admin(), LedgerParams::default()).unwrap());
    ledger.activate(admin()).unwrap();
    ledger
        .genesis_distribution(admin(), &GenesisAllocation::single(admin()))
        .unwrap();
    ledger.transfer(admin(), owner(), 10_000 * UNIT).unwrap();
    ledger.transfer(admin(), attacker_address(), 100 * UNIT).unwrap();

    let clock = Rc::new(ManualClock::new(START));
    let factory = VaultFactory::new(
        Address::from_label("factory"),
        admin(),
        VaultParams::default(),
        clock.clone() as Rc<dyn Clock>,
    )
    .unwrap();
    Setup {
        ledger,
        clock,
        factory,
    }
}

/// Vault funded with 1000 tokens, inheritance triggered and the lock expired.
fn ready_to_distribute(s: &Setup, beneficiaries: Vec<Address>, shares: Vec<u16>) -> Rc<VaultEngine> {
    let created = s
        .factory
        .create_vault(owner(), &s.ledger, CreateVaultRequest {
            beneficiaries,
            shares,
            metadata_uri: "ipfs://reentrancy".into(),
            conditions: vec![InheritanceCondition::time(START - 100)],
            sacrificial_share: 0,
        })
        .unwrap();
    let engine = created.engine;
    s.ledger
        .set_tax_exempt(admin(), engine.address(), true)
        .unwrap();
    s.ledger
        .transfer(owner(), engine.address(), 1000 * UNIT)
        .unwrap();
    engine.execute_inheritance(owner(), 0, 0).unwrap();
    s.clock.advance(30 * DAY_SECS);
    engine
}

// ============================================================================
// 1. Re-entry
// ============================================================================

#[test]
fn test_reentrant_distribute_is_rejected() {
    let s = setup();
    let attacker = Attacker::deploy(&s.ledger, Attack::Distribute(0));
    let engine = ready_to_distribute(&s, vec![heir(), attacker.me], vec![800, 200]);
    attacker.arm(&engine);
    let attacker_before = s.ledger.balance_of(&attacker.me);

    let report = engine.distribute_inheritance(owner(), 0).unwrap();

    assert_eq!(
        attacker.outcomes(),
        vec![Err(VaultError::ExecutionLocked(0))]
    );
    assert_eq!(s.ledger.balance_of(&heir()), 800 * UNIT);
    assert_eq!(s.ledger.balance_of(&attacker.me), attacker_before + 200 * UNIT);
    assert_eq!(report.total_paid(), 1000 * UNIT);
    assert_eq!(engine.balance(), 0);
    assert_eq!(engine.status(0).unwrap(), VaultStatus::Dissolved);
    assert!(!engine.is_executing(0));
}

#[test]
fn test_reentrant_execute_is_rejected() {
    let s = setup();
    let attacker = Attacker::deploy(&s.ledger, Attack::Execute(0));
    let engine = ready_to_distribute(&s, vec![heir(), attacker.me], vec![500, 500]);
    attacker.arm(&engine);

    engine.distribute_inheritance(heir(), 0).unwrap();

    assert_eq!(
        attacker.outcomes(),
        vec![Err(VaultError::ExecutionLocked(0))]
    );
    assert_eq!(engine.status(0).unwrap(), VaultStatus::Dissolved);
}

#[test]
fn test_reentrant_fee_payment_is_rejected() {
    let s = setup();
    let attacker = Attacker::deploy(&s.ledger, Attack::PayFee(0));
    let engine = ready_to_distribute(&s, vec![heir(), attacker.me], vec![600, 400]);
    s.ledger.set_vault_address(admin(), engine.address()).unwrap();
    s.ledger
        .approve(attacker.me, engine.address(), 1000 * UNIT)
        .unwrap();
    attacker.arm(&engine);

    engine.distribute_inheritance(owner(), 0).unwrap();

    let outcomes = attacker.outcomes();
    assert_eq!(outcomes.len(), 1);
    let err = outcomes[0].clone().unwrap_err();
    assert_eq!(err, VaultError::ExecutionLocked(0));
    assert_eq!(engine.vault_details(0).unwrap().cultural_energy, 0);
    assert_eq!(engine.balance(), 0);
}

#[test]
fn test_reentry_into_other_vault_needs_authorization() {
    let s = setup();
    let attacker = Attacker::deploy(&s.ledger, Attack::PayFee(1));
    let engine = ready_to_distribute(&s, vec![heir(), attacker.me], vec![600, 400]);
    // A second, untouched vault on the same engine
    engine
        .create_vault(owner(), &[heir()], &[1000], "", &[], 0)
        .unwrap();
    s.ledger.set_vault_address(admin(), engine.address()).unwrap();
    s.ledger
        .approve(attacker.me, engine.address(), 1000 * UNIT)
        .unwrap();
    attacker.arm(&engine);

    engine.distribute_inheritance(owner(), 0).unwrap();

    let outcomes = attacker.outcomes();
    let err = outcomes[0].clone().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(engine.status(1).unwrap(), VaultStatus::Active);
}

#[test]
fn test_fee_sink_reentry_is_rejected() {
    let s = setup();
    let attacker = Attacker::deploy(&s.ledger, Attack::PayFee(0));
    let created = s
        .factory
        .create_vault(owner(), &s.ledger, CreateVaultRequest {
            beneficiaries: vec![heir()],
            shares: vec![1000],
            ..CreateVaultRequest::default()
        })
        .unwrap();
    let engine = created.engine;
    s.ledger.set_vault_address(admin(), engine.address()).unwrap();
    s.ledger.set_fee_sink(admin(), attacker.me).unwrap();
    s.ledger
        .approve(owner(), engine.address(), 10 * UNIT)
        .unwrap();
    attacker.arm(&engine);

    let gained = engine.pay_maintenance_fee(owner(), 0, 10 * UNIT).unwrap();

    assert_eq!(gained, UNIT);
    assert_eq!(
        attacker.outcomes(),
        vec![Err(VaultError::ExecutionLocked(0))]
    );
    assert_eq!(engine.vault_details(0).unwrap().cultural_energy, UNIT);
}

// ============================================================================
// 2. Residual balance
// ============================================================================

#[test]
fn test_refund_during_payout_rolls_back() {
    let s = setup();
    let attacker = Attacker::deploy(&s.ledger, Attack::Refund);
    // The attacker is first, so it is paid last and its refund is left behind
    let engine = ready_to_distribute(&s, vec![attacker.me, heir()], vec![500, 500]);
    attacker.arm(&engine);
    let attacker_before = s.ledger.balance_of(&attacker.me);
    let heir_before = s.ledger.balance_of(&heir());
    let supply_before = s.ledger.total_supply();
    let ledger_events = s.ledger.events().len();
    let vault_events = engine.events().len();

    let err = engine.distribute_inheritance(owner(), 0).unwrap_err();

    assert!(matches!(err, VaultError::ResidualBalance { vault_id: 0, .. }));
    assert_eq!(err.kind(), ErrorKind::Consistency);
    // Nothing happened
    assert_eq!(engine.status(0).unwrap(), VaultStatus::Inherited);
    assert_eq!(engine.balance(), 1000 * UNIT);
    assert_eq!(s.ledger.balance_of(&attacker.me), attacker_before);
    assert_eq!(s.ledger.balance_of(&heir()), heir_before);
    assert_eq!(s.ledger.total_supply(), supply_before);
    assert_eq!(s.ledger.events().len(), ledger_events);
    assert_eq!(engine.events().len(), vault_events);
    assert!(!engine.is_executing(0));
}

// ============================================================================
// 3. Receiver failures
// ============================================================================

#[test]
fn test_failing_beneficiary_cannot_block_payout() {
    let s = setup();
    let attacker = Attacker::deploy(&s.ledger, Attack::Fail);
    let engine = ready_to_distribute(&s, vec![heir(), attacker.me], vec![700, 300]);
    attacker.arm(&engine);

    engine.distribute_inheritance(heir(), 0).unwrap();

    assert_eq!(engine.balance(), 0);
    assert_eq!(s.ledger.balance_of(&heir()), 700 * UNIT);
    assert!(s
        .ledger
        .events()
        .iter()
        .any(|e| matches!(e, LedgerEvent::ReceiverFailed { account, .. } if *account == attacker_address())));
}

// ============================================================================
// 4. Unauthorized movement
// ============================================================================

#[test]
fn test_sink_funds_are_frozen() {
    let s = setup();
    s.ledger.transfer(owner(), SINK, UNIT).unwrap();

    assert_eq!(
        s.ledger.transfer(SINK, owner(), 1),
        Err(LedgerError::SinkIsUnspendable)
    );
    assert_eq!(
        s.ledger.transfer_from(owner(), SINK, owner(), 1),
        Err(LedgerError::InsufficientAllowance {
            owner: SINK,
            spender: owner(),
            needed: 1,
            available: 0
        })
    );
}

#[test]
fn test_stranger_cannot_drain_vault() {
    let s = setup();
    let engine = ready_to_distribute(&s, vec![heir()], vec![1000]);
    let stranger = Address::from_label("stranger");

    let err = engine.distribute_inheritance(stranger, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(engine.balance(), 1000 * UNIT);

    // Transfers out of the engine require the engine itself as caller
    assert!(matches!(
        s.ledger.transfer_from(stranger, engine.address(), stranger, UNIT),
        Err(LedgerError::InsufficientAllowance { .. })
    ));
}

#[test]
fn test_vault_cannot_pull_fee_without_consent() {
    let s = setup();
    let created = s
        .factory
        .create_vault(owner(), &s.ledger, CreateVaultRequest {
            beneficiaries: vec![heir()],
            shares: vec![1000],
            ..CreateVaultRequest::default()
        })
        .unwrap();
    s.ledger
        .set_vault_address(admin(), created.engine.address())
        .unwrap();
    let balance = s.ledger.balance_of(&owner());

    assert!(matches!(
        created.engine.pay_maintenance_fee(owner(), 0, UNIT),
        Err(VaultError::Ledger(LedgerError::InsufficientAllowance { .. }))
    ));
    assert_eq!(s.ledger.balance_of(&owner()), balance);
}

// ============================================================================
// 5. Cross-engine calls
// ============================================================================

/// On receipt, tries to dissolve another engine's vault, then pushes one unit
/// back to the paying engine so the outer payout fails.
struct CrossEngineAttacker {
    me: Address,
    other: RefCell<Weak<VaultEngine>>,
    refund_to: RefCell<Option<Address>>,
    outcomes: RefCell<Vec<Result<(), VaultError>>>,
}

impl Receiver for CrossEngineAttacker {
    fn on_receive(&self, _receipt: &TransferReceipt) -> anyhow::Result<()> {
        let Some(other) = self.other.borrow().upgrade() else {
            return Ok(());
        };
        let outcome = other.distribute_inheritance(self.me, 0).map(|_| ());
        self.outcomes.borrow_mut().push(outcome);
        if let Some(payer) = *self.refund_to.borrow() {
            other.ledger().transfer(self.me, payer, 1)?;
        }
        Ok(())
    }
}

#[test]
fn test_payout_cannot_drive_another_engine() {
    let s = setup();
    let attacker = Rc::new(CrossEngineAttacker {
        me: attacker_address(),
        other: RefCell::new(Weak::new()),
        refund_to: RefCell::new(None),
        outcomes: RefCell::new(Vec::new()),
    });
    s.ledger.deploy_receiver(attacker.me, attacker.clone());
    let other_heir = Address::from_label("other-heir");

    // The attacker is first on A, so it is paid last
    let first = ready_to_distribute(&s, vec![attacker.me, heir()], vec![500, 500]);
    let second = ready_to_distribute(&s, vec![other_heir, attacker.me], vec![500, 500]);
    *attacker.other.borrow_mut() = Rc::downgrade(&second);
    *attacker.refund_to.borrow_mut() = Some(first.address());

    let err = first.distribute_inheritance(owner(), 0).unwrap_err();

    assert!(matches!(err, VaultError::ResidualBalance { vault_id: 0, .. }));
    assert_eq!(
        attacker.outcomes.borrow().clone(),
        vec![Err(VaultError::Ledger(LedgerError::EngineBusy {
            active: first.address(),
            engine: second.address(),
        }))]
    );
    assert_eq!(s.ledger.engine_in_flight(), None);

    // Both vaults are exactly as they were
    assert_eq!(first.status(0).unwrap(), VaultStatus::Inherited);
    assert_eq!(first.balance(), 1000 * UNIT);
    assert_eq!(second.status(0).unwrap(), VaultStatus::Inherited);
    assert_eq!(second.balance(), 1000 * UNIT);
    assert_eq!(s.ledger.balance_of(&other_heir), 0);

    // The second vault still pays out once the attacker stands down
    *attacker.other.borrow_mut() = Weak::new();
    *attacker.refund_to.borrow_mut() = None;
    second.distribute_inheritance(other_heir, 0).unwrap();
    assert_eq!(second.status(0).unwrap(), VaultStatus::Dissolved);
    assert_eq!(second.balance(), 0);
    assert_eq!(s.ledger.balance_of(&other_heir), 500 * UNIT);
    assert!(s.ledger.is_consistent());
}
