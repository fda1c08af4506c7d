#![no_main]

use ancestry_core::{Address, Amount, PerMille};
use ancestry_vault::{distribution, Beneficiary};
use libfuzzer_sys::fuzz_target;

// Layout: 16 bytes balance, 2 bytes sacrificial share, then 2 bytes per share.
fuzz_target!(|data: &[u8]| {
    if data.len() < 20 {
        return;
    }
    let mut balance = [0u8; 16];
    balance.copy_from_slice(&data[..16]);
    let balance = Amount::from_le_bytes(balance);

    let mut budget: u16 = 1000;
    let mut take = |raw: &[u8]| {
        let value = u16::from_le_bytes([raw[0], raw[1]]) % (budget + 1);
        budget -= value;
        value
    };

    let sacrificial = take(&data[16..18]);
    let beneficiaries: Vec<Beneficiary> = data[18..]
        .chunks_exact(2)
        .take(32)
        .enumerate()
        .map(|(i, raw)| (i, take(raw).max(1)))
        .map(|(i, share)| {
            Beneficiary::new(
                Address::from_label(&format!("heir-{}", i)),
                PerMille::new(share).unwrap_or(PerMille::ZERO),
            )
        })
        .collect();
    let Ok(sacrificial) = PerMille::new(sacrificial) else {
        return;
    };
    if PerMille::total(beneficiaries.iter().map(|b| &b.share)) + sacrificial.get() as u32 > 1000 {
        return;
    }

    if let Ok(plan) = distribution::plan(balance, sacrificial, &beneficiaries) {
        assert_eq!(plan.sacrifice + plan.beneficiary_total(), balance);
        for ((_, amount), b) in plan.others.iter().zip(&beneficiaries[1..]) {
            assert_eq!(Some(*amount), b.share.apply(plan.remaining));
        }
    }
});
