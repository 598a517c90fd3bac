// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Fixed-window rate limiting, keyed by backend instance.
//!
//! The window is scoped to the instance rather than the tenant: instances
//! are tenant-owned, so one misbehaving tenant cannot deplete another
//! tenant's budget. The counter lives behind [`CounterStore`], a
//! Redis-shaped interface with an in-process implementation for tests and
//! single-node deployments.
//!
//! The check is get-then-increment rather than atomic; a request racing
//! the window boundary may be admitted on both sides. That fixed-window
//! imprecision is accepted.

/// The windowed admission check.
pub mod limiter;
/// Counter-store trait and the in-process implementation.
pub mod store;

pub use limiter::RateLimiter;
pub use store::{CounterStore, MemoryCounterStore};
