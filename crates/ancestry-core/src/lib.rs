//! Ancestry Core
//!
//! Shared building blocks for the Ancestry ledger and inheritance vaults.
//!
//! # Contents
//!
//! - **Identities**: [`Address`], including the reserved [`SINK`]
//! - **Amounts**: [`Amount`] and per-mille arithmetic via [`PerMille`]
//! - **Roles**: the per-instance [`AccessControl`] registry
//! - **Time**: the [`Clock`] trait with system and manual implementations
//! - **Params**: tunable [`LedgerParams`] and [`VaultParams`]
//!
//! Everything here is plain data or pure logic. Ledger accounting and the
//! vault state machine live in their own crates.

pub mod access;
pub mod address;
pub mod amount;
pub mod clock;
pub mod params;

pub use access::{AccessControl, AccessError, Role};
pub use address::{Address, AddressError, SINK};
pub use amount::{Amount, PerMille, PerMilleError, DECIMALS, MAX_SUPPLY, NAME, SYMBOL, UNIT};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use params::{LedgerParams, ParamsError, VaultParams, DAY_SECS};
