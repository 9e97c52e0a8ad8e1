//! Fuzz target for token bucket accounting.
//!
//! Run with: cargo +nightly fuzz run fuzz_bucket_ops
//!
//! The first three bytes pick rate, interval and burst; the rest is a script
//! of clock advances, takes and resets. After every step the balance must
//! stay within `[0, capacity]`.

#![no_main]

use std::sync::Arc;

use dripgate_core::{ManualClock, TokenBucket};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    let clock = ManualClock::new();
    let rate = u32::from(data[0]);
    let per_secs = u32::from(data[1]).max(1);
    let burst = u32::from(data[2]);
    let Ok(bucket) = TokenBucket::with_clock(rate, per_secs, burst, Arc::new(clock.clone())) else {
        return;
    };

    for op in data[3..].chunks(2) {
        let arg = op.get(1).copied().unwrap_or(0);
        match op[0] % 4 {
            0 => clock.advance_ms(u64::from(arg) * 7),
            1 => {
                let _ = bucket.try_take(u32::from(arg));
            }
            2 => {
                let _ = bucket.allow();
            }
            _ => bucket.reset(),
        }

        let available = bucket.available();
        if !bucket.is_unlimited() {
            assert!(available >= 0.0 && available <= bucket.capacity());
        }
    }
});
