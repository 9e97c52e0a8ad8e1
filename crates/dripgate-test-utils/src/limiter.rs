//! Limiters wired to a [`ManualClock`].
//!
//! Each helper returns the limiter together with a handle on its clock, so
//! tests can move time forward explicitly:
//!
//! ```ignore
//! let (bucket, clock) = manual_bucket(5, 2, 0);
//! assert!(bucket.try_take(5));
//! clock.advance_ms(400);
//! assert!(bucket.allow());
//! ```

use std::sync::Arc;

use dripgate_config::AppConfig;
use dripgate_core::{AdmissionControl, HostLimiter, ManualClock, TokenBucket};

/// A [`TokenBucket`] on a fresh manual clock.
pub fn manual_bucket(rate: u32, per_secs: u32, burst: u32) -> (TokenBucket, ManualClock) {
    let clock = ManualClock::new();
    let bucket = TokenBucket::with_clock(rate, per_secs, burst, Arc::new(clock.clone()))
        .expect("invalid bucket parameters");
    (bucket, clock)
}

/// A [`HostLimiter`] on a fresh manual clock.
pub fn manual_hosts(
    rate: u32,
    per_secs: u32,
    burst: u32,
    max_entries: usize,
) -> (HostLimiter, ManualClock) {
    let clock = ManualClock::new();
    let hosts = HostLimiter::with_clock(rate, per_secs, burst, max_entries, Arc::new(clock.clone()))
        .expect("invalid host limiter parameters");
    (hosts, clock)
}

/// An [`AdmissionControl`] built from `config` on a fresh manual clock.
pub fn manual_admission(config: &AppConfig) -> (AdmissionControl, ManualClock) {
    let clock = ManualClock::new();
    let control = AdmissionControl::from_config(config, Arc::new(clock.clone()))
        .expect("invalid admission config");
    (control, clock)
}
