//! Replication over the shared state channel
//!
//! Host publishes snapshots, non-hosts apply them and relay their own
//! entity back. All writes are fire-and-forget and throttled.

pub mod broadcaster;
pub mod protocol;
pub mod receiver;
pub mod relay;
pub mod throttle;
