#![deny(unsafe_code)]

//! dripgate core: admission control by token bucket.
//!
//! A [`TokenBucket`] decides whether an event may proceed under a long-run
//! rate, refilling lazily ("drip-fill") from elapsed clock time on every
//! query. A [`HostLimiter`] gives every source host its own bucket while
//! keeping at most a fixed number of hosts in memory. [`AdmissionControl`]
//! combines a global bucket with a host limiter.
//!
//! ```no_run
//! use dripgate_core::{HostLimiter, TokenBucket};
//!
//! # fn main() -> Result<(), dripgate_core::LimitError> {
//! // 1000 events every 5 seconds overall
//! let global = TokenBucket::new(1000, 5)?;
//! // 10 events per second per host, tracking at most 4096 hosts
//! let hosts = HostLimiter::new(10, 1, 4096)?;
//!
//! if global.limit() || hosts.limit("203.0.113.7:51234") {
//!     // drop the connection
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, used where a trait object has to
/// return a future (see [`Clock::sleep`]).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Global-plus-per-host admission facade.
pub mod admission;
/// Drip-fill token bucket.
pub mod bucket;
/// Typed LRU storage used by the host limiter.
pub mod cache;
/// Time sources.
pub mod clock;
/// Error type shared by the limiters.
pub mod error;
/// Per-host limiter with bounded memory.
pub mod host;

pub use admission::{AdmissionControl, Verdict};
pub use bucket::TokenBucket;
pub use cache::BoundedCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::LimitError;
pub use host::{HostLimiter, resolve_key};
