//! Global and per-host limits combined behind one call.

use std::fmt;
use std::sync::Arc;

use dripgate_config::AppConfig;
use serde::Serialize;
use tracing::trace;

use crate::bucket::TokenBucket;
use crate::clock::Clock;
use crate::error::LimitError;
use crate::host::HostLimiter;

/// Outcome of [`AdmissionControl::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The event may proceed.
    Admitted,
    /// The source host is over its own limit.
    HostLimited,
    /// The process-wide limit is exhausted.
    GlobalLimited,
}

impl Verdict {
    pub fn is_admitted(self) -> bool {
        self == Verdict::Admitted
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Admitted => write!(f, "admitted"),
            Verdict::HostLimited => write!(f, "host_limited"),
            Verdict::GlobalLimited => write!(f, "global_limited"),
        }
    }
}

/// A global bucket plus a per-host limiter, both built from [`AppConfig`].
///
/// Events with a known peer are checked against that peer's host bucket
/// first and only then against the global bucket, so a single noisy host is
/// turned away without spending the budget everyone shares. Events without a
/// peer only see the global bucket.
///
/// A host token taken by an event that the global bucket then rejects is not
/// given back: the host is charged for every attempt it makes while the
/// shared budget is exhausted.
#[derive(Debug)]
pub struct AdmissionControl {
    global: TokenBucket,
    hosts: HostLimiter,
}

impl AdmissionControl {
    pub fn new(global: TokenBucket, hosts: HostLimiter) -> Self {
        Self { global, hosts }
    }

    /// Build both limiters from configuration, sharing one clock.
    pub fn from_config(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self, LimitError> {
        let global = TokenBucket::from_config(&config.global, Arc::clone(&clock))?;
        let hosts = HostLimiter::from_config(&config.per_host, clock)?;
        Ok(Self::new(global, hosts))
    }

    /// Decide on one event, optionally attributed to `peer`.
    pub fn admit(&self, peer: Option<&str>) -> Verdict {
        if let Some(peer) = peer
            && self.hosts.limit(peer)
        {
            trace!(peer, "Rejected by host limit");
            return Verdict::HostLimited;
        }

        if self.global.limit() {
            trace!(peer = peer.unwrap_or("-"), "Rejected by global limit");
            return Verdict::GlobalLimited;
        }

        Verdict::Admitted
    }

    pub fn global(&self) -> &TokenBucket {
        &self.global
    }

    pub fn hosts(&self) -> &HostLimiter {
        &self.hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use dripgate_config::{HostLimitConfig, LimitConfig};
    use pretty_assertions::assert_eq;

    fn control(global_rate: u32, host_rate: u32) -> (AdmissionControl, ManualClock) {
        let config = AppConfig {
            global: LimitConfig {
                rate: global_rate,
                per_secs: 1,
                burst: 0,
            },
            per_host: HostLimitConfig {
                rate: host_rate,
                per_secs: 1,
                burst: 0,
                max_hosts: 8,
            },
            ..AppConfig::default()
        };
        let clock = ManualClock::new();
        let ac = AdmissionControl::from_config(&config, Arc::new(clock.clone())).unwrap();
        (ac, clock)
    }

    #[test]
    fn test_default_config_admits_everything() {
        let ac = AdmissionControl::from_config(&AppConfig::default(), Arc::new(ManualClock::new()))
            .unwrap();
        for _ in 0..1000 {
            assert_eq!(ac.admit(Some("192.0.2.1:1")), Verdict::Admitted);
            assert_eq!(ac.admit(None), Verdict::Admitted);
        }
        assert!(ac.hosts().is_unlimited());
    }

    #[test]
    fn test_host_limit_checked_first() {
        let (ac, _clock) = control(10, 2);
        assert!(ac.admit(Some("a:1")).is_admitted());
        assert!(ac.admit(Some("a:1")).is_admitted());
        assert_eq!(ac.admit(Some("a:1")), Verdict::HostLimited);

        // the rejected event did not spend a global token
        assert_eq!(ac.global().available(), 8.0);
    }

    #[test]
    fn test_global_limit_spans_hosts() {
        let (ac, clock) = control(3, 5);
        assert!(ac.admit(Some("a:1")).is_admitted());
        assert!(ac.admit(Some("b:1")).is_admitted());
        assert!(ac.admit(None).is_admitted());
        assert_eq!(ac.admit(Some("c:1")), Verdict::GlobalLimited);
        assert_eq!(ac.admit(None), Verdict::GlobalLimited);

        clock.advance_ms(1000);
        assert!(ac.admit(None).is_admitted());
    }

    #[test]
    fn test_global_rejection_still_charges_host() {
        let (ac, _clock) = control(1, 2);
        assert!(ac.admit(Some("a:1")).is_admitted());
        assert_eq!(ac.admit(Some("b:1")), Verdict::GlobalLimited);
        assert_eq!(ac.hosts().get_or_create("b:1").unwrap().available(), 1.0);
    }

    #[test]
    fn test_verdict_display_and_serialize() {
        assert_eq!(Verdict::HostLimited.to_string(), "host_limited");
        assert_eq!(
            serde_json::to_string(&Verdict::GlobalLimited).unwrap(),
            "\"global_limited\""
        );
    }
}
