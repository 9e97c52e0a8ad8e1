#![deny(unsafe_code)]

//! Shared test utilities for the dripgate workspace.
//!
//! Provides config builders, temp config files, and manual-clock limiters so that
//! individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! dripgate-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod limiter;
