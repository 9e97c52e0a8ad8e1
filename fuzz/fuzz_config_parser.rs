//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `AppConfig::parse()` and, when it validates,
//! builds the limiters from it. Neither step may panic.

#![no_main]

use std::sync::Arc;

use dripgate_core::{AdmissionControl, ManualClock};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = dripgate_config::AppConfig::parse(s) {
        let control = AdmissionControl::from_config(&config, Arc::new(ManualClock::new()))
            .expect("validated config must build");
        let _ = control.admit(Some("192.0.2.1:80"));
    }
});
