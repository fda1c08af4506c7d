//! Shared test fixtures for ancestry-vault unit tests.
//!
//! Builds an activated ledger, a manual clock and one engine wired up as the
//! ledger's registered vault, with the creator already funded.

use crate::engine::VaultEngine;
use crate::record::{InheritanceCondition, VaultId};
use ancestry_core::{Address, Clock, LedgerParams, ManualClock, PerMille, Timestamp, VaultParams, UNIT};
use ancestry_ledger::{GenesisAllocation, Ledger};
use std::rc::Rc;

/// Clock reading every fixture starts at.
pub const START: Timestamp = 1_700_000_000;

pub struct World {
    pub ledger: Rc<Ledger>,
    pub clock: Rc<ManualClock>,
    pub engine: Rc<VaultEngine>,
}

pub fn admin() -> Address {
    Address::from_label("ledger-admin")
}

/// Genesis recipient and fee sink.
pub fn treasury() -> Address {
    Address::from_label("treasury")
}

pub fn creator() -> Address {
    Address::from_label("creator")
}

pub fn heir_a() -> Address {
    Address::from_label("heir-a")
}

pub fn heir_b() -> Address {
    Address::from_label("heir-b")
}

pub fn stranger() -> Address {
    Address::from_label("stranger")
}

pub fn pm(value: u16) -> PerMille {
    PerMille::new(value).unwrap()
}

pub fn world() -> World {
    world_with(VaultParams::default())
}

pub fn world_with(params: VaultParams) -> World {
    let ledger = Rc::new(Ledger::new(admin(), LedgerParams::default()).unwrap());
    ledger.activate(admin()).unwrap();
    ledger
        .genesis_distribution(admin(), &GenesisAllocation::single(treasury()))
        .unwrap();

    let clock = Rc::new(ManualClock::new(START));
    let engine = Rc::new(
        VaultEngine::new(
            Address::from_label("vault-engine"),
            ledger.clone(),
            clock.clone() as Rc<dyn Clock>,
            creator(),
            params,
        )
        .unwrap(),
    );
    ledger.set_vault_address(admin(), engine.address()).unwrap();
    ledger.transfer(treasury(), creator(), 10_000 * UNIT).unwrap();

    World {
        ledger,
        clock,
        engine,
    }
}

/// Vault owned by `creator()` leaving everything to `heir_a()`.
pub fn simple_vault(engine: &VaultEngine, conditions: &[InheritanceCondition]) -> VaultId {
    engine
        .create_vault(creator(), &[heir_a()], &[1000], "ipfs://simple", conditions, 0)
        .unwrap()
}
