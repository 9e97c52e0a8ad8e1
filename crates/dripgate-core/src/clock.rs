//! Time sources for the token buckets.
//!
//! Every bucket is handed an `Arc<dyn Clock>` at construction. Production code
//! uses [`SystemClock`]; tests drive a [`ManualClock`] by hand so that refill
//! arithmetic can be checked to the nanosecond.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::BoxFuture;

/// A monotonic time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time. Never earlier than a previously returned value.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration` as measured by this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall clock backed by [`Instant::now`] and the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Hand-driven clock for tests.
///
/// Time only moves when [`advance`](ManualClock::advance) is called or when a
/// sleep future is polled: sleeping advances the clock by the requested amount
/// and completes at once. A sleep that is never polled leaves the clock alone.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the moment of construction.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a clock frozen at `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        advance(&self.current, by);
    }

    /// Move the clock forward by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

fn advance(current: &Mutex<Instant>, by: Duration) {
    let mut current = current.lock().unwrap_or_else(PoisonError::into_inner);
    *current += by;
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let current = Arc::clone(&self.current);
        Box::pin(async move { advance(&current, duration) })
    }
}
