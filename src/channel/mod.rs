//! Shared state channel contract
//!
//! A path-addressable store with per-path last-write-wins semantics,
//! subscription with push, and server-honored disconnect hooks. Writes are
//! fire-and-forget from the tick loop's point of view; pushes are queued on a
//! `Subscription` and drained by the participant between ticks.

pub mod memory;
pub mod paths;

use crossbeam_channel::Receiver;
use serde_json::{Map, Value};

pub use paths::SessionPaths;

/// JSON-like structured value stored at a path
pub type ChannelValue = Value;

/// Identifier of a live subscription
pub type SubscriptionId = u64;

/// Slash-separated logical path, normalized without leading/trailing slashes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelPath(String);

impl ChannelPath {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let joined = raw
            .as_ref()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    pub fn child(&self, segment: impl std::fmt::Display) -> Self {
        Self::new(format!("{}/{}", self.0, segment))
    }

    /// Last segment, if any
    pub fn key(&self) -> Option<&str> {
        self.segments().last()
    }

    /// True if `self` equals `other` or is one of its ancestors
    pub fn contains(&self, other: &ChannelPath) -> bool {
        if self.0.is_empty() || self.0 == other.0 {
            return true;
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// True if a change at one path can change the value seen at the other
    pub fn overlaps(&self, other: &ChannelPath) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl std::fmt::Display for ChannelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Action the channel's server side performs if a client drops without cleanup
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectAction {
    Set(ChannelValue),
    Remove,
}

/// Cancellable stream of pushes for one path.
///
/// Delivers the current value immediately, then the value after every change.
/// `None` means the path is absent. Dropping the handle cancels delivery.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    path: ChannelPath,
    receiver: Receiver<Option<ChannelValue>>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, path: ChannelPath, receiver: Receiver<Option<ChannelValue>>) -> Self {
        Self { id, path, receiver }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn path(&self) -> &ChannelPath {
        &self.path
    }

    /// All pushes queued since the last drain, oldest first (non-blocking)
    pub fn drain(&self) -> Vec<Option<ChannelValue>> {
        self.receiver.try_iter().collect()
    }
}

/// Client-side view of the shared state channel
pub trait StateChannel: Send + Sync {
    /// Full replace; writing `null` removes the path
    fn write(&self, path: &ChannelPath, value: ChannelValue) -> Result<(), ChannelError>;

    /// Merge `fields` into the object at `path`. Keys may be nested paths.
    fn update(&self, path: &ChannelPath, fields: Map<String, ChannelValue>) -> Result<(), ChannelError>;

    fn read(&self, path: &ChannelPath) -> Result<Option<ChannelValue>, ChannelError>;

    fn subscribe(&self, path: &ChannelPath) -> Subscription;

    fn unsubscribe(&self, subscription: Subscription);

    /// Register an action the server performs if this client's connection drops.
    /// A later registration for the same path replaces the earlier one.
    fn on_disconnect(&self, path: &ChannelPath, action: DisconnectAction) -> Result<(), ChannelError>;

    fn cancel_on_disconnect(&self, path: &ChannelPath) -> Result<(), ChannelError>;

    fn remove(&self, path: &ChannelPath) -> Result<(), ChannelError> {
        self.write(path, Value::Null)
    }
}

/// Channel errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel unavailable")]
    Unavailable,
    #[error("Invalid path '{0}'")]
    InvalidPath(String),
    #[error("Serialization error: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        ChannelError::Serialize(e.to_string())
    }
}
