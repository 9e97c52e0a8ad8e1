//! Drip-fill token bucket.
//!
//! Instead of a background timer, every query first credits the bucket with
//! the tokens earned since the previous query (`elapsed * rate / per`, in
//! nanoseconds) and clamps the balance to the bucket's capacity. The balance
//! is kept as a float, so fractions of a token carry over between calls.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dripgate_config::LimitConfig;
use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::error::LimitError;

/// Mutable part of a bucket, always updated together.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket admitting `rate` events every `per`, with bursts of up to
/// `max(rate, burst)` events.
///
/// A rate of zero makes the bucket unlimited: every query succeeds and no
/// accounting takes place.
///
/// All methods take `&self`; the balance sits behind a mutex owned by the
/// bucket, so a bucket can be shared across threads in an [`Arc`].
pub struct TokenBucket {
    rate: u32,
    per: Duration,
    capacity: f64,
    unlimited: bool,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Limit to `rate` events every `per_secs` seconds, using the system clock.
    pub fn new(rate: u32, per_secs: u32) -> Result<Self, LimitError> {
        Self::with_burst(rate, per_secs, 0)
    }

    /// Like [`new`](Self::new), allowing up to `burst` events at once.
    pub fn with_burst(rate: u32, per_secs: u32, burst: u32) -> Result<Self, LimitError> {
        Self::with_clock(rate, per_secs, burst, Arc::new(SystemClock))
    }

    /// Build a bucket on an injected clock.
    ///
    /// `per_secs` must be non-zero. `burst` only matters when it exceeds `rate`.
    pub fn with_clock(
        rate: u32,
        per_secs: u32,
        burst: u32,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LimitError> {
        if per_secs == 0 {
            return Err(LimitError::ZeroInterval);
        }
        Ok(Self::build(
            rate,
            Duration::from_secs(u64::from(per_secs)),
            burst,
            clock,
        ))
    }

    /// Build a bucket from a config section.
    pub fn from_config(config: &LimitConfig, clock: Arc<dyn Clock>) -> Result<Self, LimitError> {
        Self::with_clock(config.rate, config.per_secs, config.burst, clock)
    }

    /// Parameters must already be validated.
    pub(crate) fn build(rate: u32, per: Duration, burst: u32, clock: Arc<dyn Clock>) -> Self {
        let capacity = f64::from(rate.max(burst));
        let state = BucketState {
            tokens: capacity,
            last_refill: clock.now(),
        };

        Self {
            rate,
            per,
            capacity,
            unlimited: rate == 0,
            clock,
            state: Mutex::new(state),
        }
    }

    /// Take `n` tokens if they are available right now.
    ///
    /// On failure the balance is left as it was; there is no partial
    /// consumption. Asking for more than [`capacity`](Self::capacity) always
    /// fails.
    pub fn try_take(&self, n: u32) -> bool {
        if self.unlimited {
            return true;
        }

        let mut state = self.refilled();
        let wanted = f64::from(n);
        if state.tokens >= wanted {
            state.tokens -= wanted;
            return true;
        }

        trace!(requested = n, available = state.tokens, "Bucket denied request");
        false
    }

    /// Take a single token. Returns `true` if the event may proceed.
    pub fn allow(&self) -> bool {
        self.try_take(1)
    }

    /// Take a single token. Returns `true` if the event must be rejected.
    pub fn limit(&self) -> bool {
        !self.allow()
    }

    /// Wait until `n` tokens can be taken, then take them.
    ///
    /// Dropping the returned future abandons the wait without consuming
    /// anything. Use [`wait_until`](Self::wait_until) to wire in an explicit
    /// cancellation signal.
    pub async fn wait(&self, n: u32) -> Result<(), LimitError> {
        self.wait_until(n, std::future::pending::<()>()).await
    }

    /// Wait until `n` tokens can be taken or until `cancel` completes.
    ///
    /// Each round sleeps for exactly the time needed to earn the current
    /// shortfall, then re-reads the balance, since other callers may have
    /// drained it meanwhile. If `cancel` fires first the call returns
    /// [`LimitError::Cancelled`] and no tokens are taken.
    pub async fn wait_until<C>(&self, n: u32, cancel: C) -> Result<(), LimitError>
    where
        C: Future<Output = ()>,
    {
        if self.unlimited {
            return Ok(());
        }
        if f64::from(n) > self.capacity {
            return Err(self.exceeds(n));
        }

        let mut cancel = std::pin::pin!(cancel);
        loop {
            let shortfall = {
                let mut state = self.refilled();
                let wanted = f64::from(n);
                if state.tokens >= wanted {
                    state.tokens -= wanted;
                    return Ok(());
                }
                self.time_to_earn(wanted - state.tokens)
            };

            trace!(requested = n, sleep_ns = shortfall.as_nanos() as u64, "Waiting for tokens");
            tokio::select! {
                biased;
                () = &mut cancel => return Err(LimitError::Cancelled),
                () = self.clock.sleep(shortfall) => {}
            }
        }
    }

    /// Refill the bucket to capacity.
    pub fn reset(&self) {
        if self.unlimited {
            return;
        }
        let now = self.clock.now();
        let mut state = self.lock();
        state.tokens = self.capacity;
        if now > state.last_refill {
            state.last_refill = now;
        }
    }

    /// Tokens available right now (after crediting elapsed time).
    ///
    /// Unlimited buckets report [`f64::INFINITY`].
    pub fn available(&self) -> f64 {
        if self.unlimited {
            return f64::INFINITY;
        }
        self.refilled().tokens
    }

    /// How long until `n` tokens will be available, assuming no other takers.
    ///
    /// `None` if `n` exceeds the capacity and will never be available.
    pub fn time_until(&self, n: u32) -> Option<Duration> {
        if self.unlimited {
            return Some(Duration::ZERO);
        }
        let wanted = f64::from(n);
        if wanted > self.capacity {
            return None;
        }
        let tokens = self.refilled().tokens;
        if tokens >= wanted {
            Some(Duration::ZERO)
        } else {
            Some(self.time_to_earn(wanted - tokens))
        }
    }

    /// Maximum balance: `max(rate, burst)`.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens earned every [`per`](Self::per).
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// The rate window.
    pub fn per(&self) -> Duration {
        self.per
    }

    /// Whether this bucket was configured with a zero rate.
    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // The state is two plain values written under the lock; a panic
        // elsewhere cannot leave it half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state and credit the tokens earned since the last refill.
    fn refilled(&self) -> MutexGuard<'_, BucketState> {
        let now = self.clock.now();
        let mut state = self.lock();

        let elapsed = now.saturating_duration_since(state.last_refill);
        if !elapsed.is_zero() {
            let earned = elapsed.as_nanos() as f64 * f64::from(self.rate) / self.per_nanos();
            state.tokens = (state.tokens + earned).min(self.capacity);
            state.last_refill = now;
        }
        state
    }

    fn per_nanos(&self) -> f64 {
        self.per.as_nanos() as f64
    }

    fn time_to_earn(&self, tokens: f64) -> Duration {
        let nanos = (tokens * self.per_nanos() / f64::from(self.rate)).ceil();
        Duration::from_nanos(nanos as u64)
    }

    fn exceeds(&self, n: u32) -> LimitError {
        LimitError::ExceedsCapacity {
            requested: n,
            capacity: self.capacity,
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("per", &self.per)
            .field("capacity", &self.capacity)
            .field("tokens", &state.tokens)
            .field("unlimited", &self.unlimited)
            .finish()
    }
}

impl fmt::Display for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unlimited {
            return write!(f, "unlimited");
        }
        let tokens = self.lock().tokens;
        write!(
            f,
            "{}/{}s capacity={} tokens={:.2}",
            self.rate,
            self.per.as_secs(),
            self.capacity,
            tokens
        )
    }
}
