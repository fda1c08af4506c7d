//! Genesis allocation
//!
//! The whole supply is minted once, into five named buckets:
//!
//! ```text
//! ecosystem_fund        30%
//! strategic_reserve     20%
//! public_sale           15%
//! founders              10%
//! community_incentives  residual (supply - sum of the above)
//! ```
//!
//! The first four are floored percentages. The fifth takes the exact
//! residual, so the buckets always sum to the supply.

use ancestry_core::{Address, Amount};
use serde::{Deserialize, Serialize};

/// Percentage of supply for each floored bucket, in allocation order.
pub const FLOORED_BUCKETS: [(&str, Amount); 4] = [
    ("ecosystem_fund", 30),
    ("strategic_reserve", 20),
    ("public_sale", 15),
    ("founders", 10),
];

/// Recipients of the genesis distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub ecosystem_fund: Address,
    pub strategic_reserve: Address,
    pub public_sale: Address,
    pub founders: Address,
    pub community_incentives: Address,
}

/// One computed bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisBucket {
    pub label: String,
    pub recipient: Address,
    pub amount: Amount,
}

impl GenesisAllocation {
    /// Same recipient for every bucket. Handy for tests and single-operator setups.
    pub fn single(recipient: Address) -> Self {
        Self {
            ecosystem_fund: recipient,
            strategic_reserve: recipient,
            public_sale: recipient,
            founders: recipient,
            community_incentives: recipient,
        }
    }

    pub fn recipients(&self) -> [Address; 5] {
        [
            self.ecosystem_fund,
            self.strategic_reserve,
            self.public_sale,
            self.founders,
            self.community_incentives,
        ]
    }

    /// Split `supply` into the five buckets.
    ///
    /// Pure: no ledger access. `sum(amounts) == supply` for every input.
    pub fn plan(&self, supply: Amount) -> Vec<GenesisBucket> {
        let floored = [
            self.ecosystem_fund,
            self.strategic_reserve,
            self.public_sale,
            self.founders,
        ];

        let mut buckets = Vec::with_capacity(5);
        let mut allocated: Amount = 0;
        for ((label, percent), recipient) in FLOORED_BUCKETS.iter().zip(floored) {
            // Multiply first so sub-percent digits survive. Divide first only
            // when the product would not fit.
            let amount = supply
                .checked_mul(*percent)
                .map(|v| v / 100)
                .unwrap_or(supply / 100 * percent);
            allocated += amount;
            buckets.push(GenesisBucket {
                label: (*label).to_string(),
                recipient,
                amount,
            });
        }

        buckets.push(GenesisBucket {
            label: "community_incentives".to_string(),
            recipient: self.community_incentives,
            amount: supply - allocated,
        });

        buckets
    }
}
