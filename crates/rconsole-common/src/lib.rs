//! Concurrency building blocks shared by both ends of an rconsole link.
//!
//! Provides the blocking handoff primitives (`Waiter`, `SignalWaiter`), the
//! keepalive watchdog, and poison-recovering lock helpers.

#![deny(clippy::all)]

mod keepalive;
mod sync;
mod waiter;

pub use keepalive::KeepaliveWatchdog;
pub use keepalive::Liveness;
pub use sync::mutex_lock_or_recover;
pub use sync::poison_recovery_count;
pub use waiter::Handoff;
pub use waiter::SignalWaiter;
pub use waiter::Waiter;
