use std::sync::Arc;

use tracing::{trace, warn};

use crate::channel::{ChannelPath, StateChannel};
use crate::game::state::{Timestamp, WorldState};
use crate::lobby::lifecycle::Phase;
use crate::metrics::SyncMetrics;
use crate::net::protocol::{encode, WorldSnapshot};
use crate::net::throttle::Throttle;

/// Result of one fire-and-forget write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Written { seq: u64 },
    /// Dropped inside the throttle window
    Throttled,
    /// Logged and counted; the next write supersedes it
    Failed,
}

/// Host side: serializes the world and writes it to the snapshot path at most
/// once per throttle window
pub struct StateBroadcaster {
    path: ChannelPath,
    throttle: Throttle,
    last_seq: u64,
    metrics: Arc<SyncMetrics>,
}

impl StateBroadcaster {
    pub fn new(path: ChannelPath, window_ms: u64, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            path,
            throttle: Throttle::new(window_ms),
            last_seq: 0,
            metrics,
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Throttled publish
    pub fn publish(
        &mut self,
        channel: &dyn StateChannel,
        world: &mut WorldState,
        phase: Phase,
        now: Timestamp,
    ) -> PublishOutcome {
        if !self.throttle.try_acquire(now) {
            SyncMetrics::incr(&self.metrics.snapshots_throttled);
            return PublishOutcome::Throttled;
        }
        self.write(channel, world, phase, now)
    }

    /// Publish now regardless of the window (phase changes, final state)
    pub fn flush(
        &mut self,
        channel: &dyn StateChannel,
        world: &mut WorldState,
        phase: Phase,
        now: Timestamp,
    ) -> PublishOutcome {
        self.throttle.reset();
        self.publish(channel, world, phase, now)
    }

    fn write(
        &mut self,
        channel: &dyn StateChannel,
        world: &mut WorldState,
        phase: Phase,
        now: Timestamp,
    ) -> PublishOutcome {
        let seq = self.last_seq + 1;
        let mut snapshot = WorldSnapshot::from_world(world, phase, now);
        snapshot.seq = seq;

        let result = encode(&snapshot)
            .map_err(|e| e.to_string())
            .and_then(|value| channel.write(&self.path, value).map_err(|e| e.to_string()));

        match result {
            Ok(()) => {
                self.last_seq = seq;
                world.seq = seq;
                SyncMetrics::incr(&self.metrics.snapshots_published);
                trace!("Published snapshot {} ({} entities)", seq, snapshot.entities.len());
                PublishOutcome::Written { seq }
            }
            Err(e) => {
                warn!("Snapshot write failed: {}", e);
                SyncMetrics::incr(&self.metrics.write_failures);
                // Let the next tick retry instead of waiting out the window
                self.throttle.reset();
                PublishOutcome::Failed
            }
        }
    }
}
