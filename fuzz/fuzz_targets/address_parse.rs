#![no_main]

use ancestry_core::Address;
use libfuzzer_sys::fuzz_target;
use std::str::FromStr;

fuzz_target!(|data: &[u8]| {
    // Parsing must never panic, and anything accepted must print back
    // to the same address.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(address) = Address::from_str(s) {
            let printed = address.to_string();
            assert_eq!(Address::from_str(&printed).ok(), Some(address));
        }
    }
});
