//! Proportional payout arithmetic
//!
//! Pure: no ledger access, no transfers. The engine uses the plan to decide
//! what to send, then pays the first beneficiary whatever the vault still
//! holds, so any truncation remainder lands there.
//!
//! ```text
//! sacrifice  = floor(B * sacrificial / 1000)
//! remaining  = B - sacrifice
//! share_i    = floor(remaining * s_i / 1000)        for i >= 1
//! first      = remaining - sum(share_i)             (includes the remainder)
//! ```
//!
//! `sacrifice + first + sum(share_i) == B` for every input.

use crate::record::Beneficiary;
use crate::VaultError;
use ancestry_core::{Address, Amount, PerMille};
use serde::{Deserialize, Serialize};

/// Amounts computed before any transfer is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub balance: Amount,
    pub sacrifice: Amount,
    pub remaining: Amount,
    /// Payouts to every beneficiary except the first, in list order.
    pub others: Vec<(Address, Amount)>,
    /// What the first beneficiary receives, truncation remainder included.
    pub first: (Address, Amount),
}

impl DistributionPlan {
    /// Sum of the truncation losses folded into the first payout.
    pub fn remainder(&self, first_share: PerMille) -> Amount {
        let nominal = first_share.apply(self.remaining).unwrap_or(0);
        self.first.1.saturating_sub(nominal)
    }

    /// Total paid out to beneficiaries.
    pub fn beneficiary_total(&self) -> Amount {
        self.first.1 + self.others.iter().map(|(_, a)| *a).sum::<Amount>()
    }
}

/// Split `balance` between the sink and `beneficiaries`.
pub fn plan(
    balance: Amount,
    sacrificial_share: PerMille,
    beneficiaries: &[Beneficiary],
) -> Result<DistributionPlan, VaultError> {
    let (first, rest) = beneficiaries
        .split_first()
        .ok_or(VaultError::NoBeneficiaries)?;

    let sacrifice = sacrificial_share
        .apply(balance)
        .ok_or(VaultError::ArithmeticOverflow)?;
    let remaining = balance - sacrifice;

    let mut others = Vec::with_capacity(rest.len());
    let mut distributed: Amount = 0;
    for beneficiary in rest {
        let amount = beneficiary
            .share
            .apply(remaining)
            .ok_or(VaultError::ArithmeticOverflow)?;
        distributed = distributed
            .checked_add(amount)
            .ok_or(VaultError::ArithmeticOverflow)?;
        others.push((beneficiary.address, amount));
    }

    // Shares sum to at most 1000, so this cannot underflow for a valid vault.
    let first_amount = remaining
        .checked_sub(distributed)
        .ok_or(VaultError::ArithmeticOverflow)?;

    Ok(DistributionPlan {
        balance,
        sacrifice,
        remaining,
        others,
        first: (first.address, first_amount),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pm(v: u16) -> PerMille {
        PerMille::new(v).unwrap()
    }

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    #[test]
    fn test_sacrificial_scenario() {
        let beneficiaries = [
            Beneficiary::new(addr("b1"), pm(700)),
            Beneficiary::new(addr("b2"), pm(100)),
        ];
        let plan = plan(1000, pm(200), &beneficiaries).unwrap();

        assert_eq!(plan.sacrifice, 200);
        assert_eq!(plan.remaining, 800);
        assert_eq!(plan.others, vec![(addr("b2"), 80)]);
        assert_eq!(plan.first, (addr("b1"), 720));
    }

    #[test]
    fn test_remainder_goes_to_first() {
        // 1000 * 995 / 1000 = 995 after tax; shares 333/333/334
        let beneficiaries = [
            Beneficiary::new(addr("a"), pm(333)),
            Beneficiary::new(addr("b"), pm(333)),
            Beneficiary::new(addr("c"), pm(334)),
        ];
        let plan = plan(995, PerMille::ZERO, &beneficiaries).unwrap();

        // floor(995*333/1000) = 331, floor(995*334/1000) = 332
        assert_eq!(plan.others, vec![(addr("b"), 331), (addr("c"), 332)]);
        assert_eq!(plan.first.1, 995 - 331 - 332);
        assert_eq!(plan.remainder(pm(333)), 1);
    }

    #[test]
    fn test_under_allocated_shares_go_to_first() {
        // Shares summing below 1000 leave the gap with the first beneficiary
        let beneficiaries = [
            Beneficiary::new(addr("a"), pm(100)),
            Beneficiary::new(addr("b"), pm(100)),
        ];
        let plan = plan(1000, PerMille::ZERO, &beneficiaries).unwrap();
        assert_eq!(plan.first.1, 900);
    }

    #[test]
    fn test_zero_balance() {
        let beneficiaries = [Beneficiary::new(addr("a"), pm(1000))];
        let plan = plan(0, pm(500), &beneficiaries).unwrap();
        assert_eq!(plan.sacrifice, 0);
        assert_eq!(plan.first.1, 0);
    }

    #[test]
    fn test_no_beneficiaries() {
        assert_eq!(
            plan(100, PerMille::ZERO, &[]),
            Err(VaultError::NoBeneficiaries)
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let beneficiaries = [
            Beneficiary::new(addr("a"), pm(123)),
            Beneficiary::new(addr("b"), pm(456)),
            Beneficiary::new(addr("c"), pm(78)),
        ];
        let first = plan(987_654_321, pm(37), &beneficiaries).unwrap();
        let second = plan(987_654_321, pm(37), &beneficiaries).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_conservation_for_random_vaults() {
        let mut rng = StdRng::seed_from_u64(1000);

        for _ in 0..1000 {
            let count = rng.gen_range(1..=8);
            let sacrificial = rng.gen_range(0..=1000u16);
            let mut budget = 1000 - sacrificial;
            let mut beneficiaries = Vec::with_capacity(count);
            for i in 0..count {
                if budget == 0 {
                    break;
                }
                let share = rng.gen_range(1..=budget);
                budget -= share;
                beneficiaries.push(Beneficiary::new(addr(&format!("b{}", i)), pm(share)));
            }
            if beneficiaries.is_empty() {
                continue;
            }
            let balance: Amount = rng.gen_range(0..=1_000_000_000_000_000_000);

            let plan = plan(balance, pm(sacrificial), &beneficiaries).unwrap();

            assert_eq!(plan.sacrifice + plan.beneficiary_total(), balance);
            for (i, (address, amount)) in plan.others.iter().enumerate() {
                let expected = beneficiaries[i + 1].share.apply(plan.remaining).unwrap();
                assert_eq!(*address, beneficiaries[i + 1].address);
                assert_eq!(*amount, expected);
            }
            let nominal_first = beneficiaries[0].share.apply(plan.remaining).unwrap();
            assert!(plan.first.1 >= nominal_first);
        }
    }
}
