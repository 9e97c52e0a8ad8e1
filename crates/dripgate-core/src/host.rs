//! Per-host limiting with bounded memory.
//!
//! Each source host gets its own [`TokenBucket`], created on first sight with
//! the limiter's fixed parameters. At most `max_entries` hosts are tracked;
//! once full, the least recently seen host is forgotten, and if it shows up
//! again it starts over with a full bucket. An attacker presenting many
//! distinct addresses therefore cannot grow the limiter without bound.
//!
//! Locking: the host table has one mutex, each bucket has its own. The table
//! lock covers only lookup, insertion and eviction, and is released before
//! any bucket is touched, so the two are never held together.

use std::fmt;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dripgate_config::HostLimitConfig;
use tracing::{debug, trace};

use crate::bucket::TokenBucket;
use crate::cache::BoundedCache;
use crate::clock::{Clock, SystemClock};
use crate::error::LimitError;

/// Reduce a peer address to the key it is limited under.
///
/// The port is dropped so that all connections from one host share a bucket.
/// Strings that do not split into host and port are used as given.
///
/// ```
/// use dripgate_core::resolve_key;
///
/// assert_eq!(resolve_key("192.0.2.1:4000"), "192.0.2.1");
/// assert_eq!(resolve_key("[2001:db8::1]:443"), "2001:db8::1");
/// assert_eq!(resolve_key("example.net:80"), "example.net");
/// assert_eq!(resolve_key("2001:db8::1"), "2001:db8::1");
/// assert_eq!(resolve_key("unix-socket"), "unix-socket");
/// ```
pub fn resolve_key(addr: &str) -> String {
    match addr.parse::<SocketAddr>() {
        // Link-local peers on different interfaces are different hosts.
        Ok(SocketAddr::V6(v6)) if v6.scope_id() != 0 => {
            return format!("{}%{}", v6.ip(), v6.scope_id());
        }
        Ok(sock) => return sock.ip().to_string(),
        Err(_) => {}
    }

    if let Some(rest) = addr.strip_prefix('[')
        && let Some((host, port)) = rest.split_once("]:")
        && !port.contains(':')
    {
        return host.to_string();
    }

    match addr.split_once(':') {
        Some((host, port)) if !port.contains(':') => host.to_string(),
        _ => addr.to_string(),
    }
}

/// A set of token buckets keyed by source host.
///
/// A limiter with a zero rate is unlimited and never allocates a host table.
pub struct HostLimiter {
    rate: u32,
    per: Duration,
    burst: u32,
    max_entries: NonZeroUsize,
    clock: Arc<dyn Clock>,
    hosts: Option<Mutex<BoundedCache<Arc<TokenBucket>>>>,
}

impl HostLimiter {
    /// Limit each host to `rate` events every `per_secs` seconds, tracking at
    /// most `max_entries` hosts.
    pub fn new(rate: u32, per_secs: u32, max_entries: usize) -> Result<Self, LimitError> {
        Self::with_burst(rate, per_secs, 0, max_entries)
    }

    /// Like [`new`](Self::new), with a per-host burst allowance.
    pub fn with_burst(
        rate: u32,
        per_secs: u32,
        burst: u32,
        max_entries: usize,
    ) -> Result<Self, LimitError> {
        Self::with_clock(rate, per_secs, burst, max_entries, Arc::new(SystemClock))
    }

    /// Build a limiter whose buckets all read `clock`.
    pub fn with_clock(
        rate: u32,
        per_secs: u32,
        burst: u32,
        max_entries: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LimitError> {
        if per_secs == 0 {
            return Err(LimitError::ZeroInterval);
        }
        let max_entries = NonZeroUsize::new(max_entries).ok_or(LimitError::ZeroCapacity)?;

        let hosts = (rate > 0).then(|| Mutex::new(BoundedCache::new(max_entries)));
        debug!(
            rate,
            per_secs,
            burst,
            max_entries = max_entries.get(),
            unlimited = hosts.is_none(),
            "Host limiter created"
        );

        Ok(Self {
            rate,
            per: Duration::from_secs(u64::from(per_secs)),
            burst,
            max_entries,
            clock,
            hosts,
        })
    }

    /// Build a limiter from a config section.
    pub fn from_config(
        config: &HostLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LimitError> {
        Self::with_clock(
            config.rate,
            config.per_secs,
            config.burst,
            config.max_hosts,
            clock,
        )
    }

    /// The bucket for `addr`'s host, created if this host is new.
    ///
    /// Returns `None` for an unlimited limiter. Concurrent first lookups of
    /// the same host all receive the same bucket.
    pub fn get_or_create(&self, addr: impl fmt::Display) -> Option<Arc<TokenBucket>> {
        let hosts = self.hosts.as_ref()?;
        let key = resolve_key(&addr.to_string());

        let lookup = lock(hosts).get_or_insert_with(&key, || {
            Arc::new(TokenBucket::build(
                self.rate,
                self.per,
                self.burst,
                Arc::clone(&self.clock),
            ))
        });

        if lookup.created {
            trace!(host = %key, "Tracking new host");
        }
        if let Some(evicted) = lookup.evicted {
            debug!(host = %evicted, max_entries = self.max_entries.get(), "Evicted least recently seen host");
        }

        Some(lookup.value)
    }

    /// Take `n` tokens from `addr`'s bucket if available.
    pub fn try_take(&self, addr: impl fmt::Display, n: u32) -> bool {
        self.get_or_create(addr)
            .is_none_or(|bucket| bucket.try_take(n))
    }

    /// Returns `true` if an event from `addr` may proceed.
    pub fn allow(&self, addr: impl fmt::Display) -> bool {
        self.try_take(addr, 1)
    }

    /// Returns `true` if an event from `addr` must be rejected.
    pub fn limit(&self, addr: impl fmt::Display) -> bool {
        !self.allow(addr)
    }

    /// Wait until `addr`'s bucket grants `n` tokens.
    pub async fn wait(&self, addr: impl fmt::Display, n: u32) -> Result<(), LimitError> {
        match self.get_or_create(addr) {
            Some(bucket) => bucket.wait(n).await,
            None => Ok(()),
        }
    }

    /// Wait until `addr`'s bucket grants `n` tokens or `cancel` completes.
    pub async fn wait_until<C>(
        &self,
        addr: impl fmt::Display,
        n: u32,
        cancel: C,
    ) -> Result<(), LimitError>
    where
        C: std::future::Future<Output = ()>,
    {
        match self.get_or_create(addr) {
            Some(bucket) => bucket.wait_until(n, cancel).await,
            None => Ok(()),
        }
    }

    /// Refill `addr`'s bucket.
    pub fn reset(&self, addr: impl fmt::Display) {
        if let Some(bucket) = self.get_or_create(addr) {
            bucket.reset();
        }
    }

    /// Whether `addr`'s host is currently tracked. Does not count as a use.
    pub fn contains(&self, addr: impl fmt::Display) -> bool {
        self.hosts
            .as_ref()
            .is_some_and(|hosts| lock(hosts).contains_key(&resolve_key(&addr.to_string())))
    }

    /// Stop tracking `addr`'s host. Returns whether it was tracked.
    pub fn forget(&self, addr: impl fmt::Display) -> bool {
        self.hosts
            .as_ref()
            .is_some_and(|hosts| lock(hosts).remove(&resolve_key(&addr.to_string())).is_some())
    }

    /// Stop tracking every host.
    pub fn clear(&self) {
        if let Some(hosts) = &self.hosts {
            lock(hosts).clear();
        }
    }

    /// Number of hosts currently tracked.
    pub fn len(&self) -> usize {
        self.hosts.as_ref().map_or(0, |hosts| lock(hosts).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries.get()
    }

    pub fn is_unlimited(&self) -> bool {
        self.hosts.is_none()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for HostLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostLimiter")
            .field("rate", &self.rate)
            .field("per", &self.per)
            .field("burst", &self.burst)
            .field("max_entries", &self.max_entries)
            .field("tracked", &self.len())
            .finish()
    }
}
