//! Token amounts and per-mille arithmetic
//!
//! All splits in the system (transfer burn, beneficiary shares, sacrificial
//! share) are expressed in parts-per-thousand and truncate toward zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Smallest indivisible token quantity.
pub type Amount = u128;

/// Token name.
pub const NAME: &str = "AncestorMoney";

/// Token symbol.
pub const SYMBOL: &str = "AMONEY";

/// Decimal places of one whole token.
pub const DECIMALS: u32 = 9;

/// One whole token in base units.
pub const UNIT: Amount = 1_000_000_000;

/// Hard supply cap: 99,999,999,999 whole tokens.
pub const MAX_SUPPLY: Amount = 99_999_999_999 * UNIT;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PerMilleError {
    #[error("Per-mille value {0} exceeds 1000")]
    OutOfRange(u32),
}

/// A fraction expressed in parts-per-thousand (0..=1000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct PerMille(u16);

impl PerMille {
    pub const DENOMINATOR: u16 = 1000;
    pub const ZERO: PerMille = PerMille(0);
    pub const FULL: PerMille = PerMille(1000);

    /// Create a per-mille value, rejecting anything above 1000.
    pub fn new(value: u16) -> Result<Self, PerMilleError> {
        if value > Self::DENOMINATOR {
            return Err(PerMilleError::OutOfRange(value as u32));
        }
        Ok(Self(value))
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `floor(amount * self / 1000)`, or `None` on overflow.
    pub fn apply(&self, amount: Amount) -> Option<Amount> {
        amount
            .checked_mul(self.0 as Amount)
            .map(|scaled| scaled / Self::DENOMINATOR as Amount)
    }

    /// Sum of several per-mille values, widened so it can exceed 1000.
    pub fn total<'a>(values: impl IntoIterator<Item = &'a PerMille>) -> u32 {
        values.into_iter().map(|v| v.0 as u32).sum()
    }
}

impl TryFrom<u16> for PerMille {
    type Error = PerMilleError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PerMille> for u16 {
    fn from(value: PerMille) -> Self {
        value.0
    }
}

impl fmt::Display for PerMille {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}‰", self.0)
    }
}
