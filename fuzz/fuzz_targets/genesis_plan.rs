#![no_main]

use ancestry_core::{Address, Amount};
use ancestry_ledger::GenesisAllocation;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut bytes = [0u8; 16];
    let n = data.len().min(16);
    bytes[..n].copy_from_slice(&data[..n]);
    let supply = Amount::from_le_bytes(bytes);

    let buckets = GenesisAllocation::single(Address::from_label("fuzz")).plan(supply);
    assert_eq!(buckets.len(), 5);
    assert_eq!(buckets.iter().map(|b| b.amount).sum::<Amount>(), supply);
});
