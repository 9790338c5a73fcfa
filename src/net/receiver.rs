//! Non-host side of snapshot replication
//!
//! Each applied snapshot appends one sample per remotely-driven entity to its
//! position buffer and copies the authoritative scalar state. The entity this
//! participant controls keeps its locally simulated position; only the
//! host-owned flags (active, ability, checkpoint) are taken from the snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::game::position_buffer::{PositionBuffers, PositionSample};
use crate::game::state::{EntityId, Timestamp, TurnState, WorldState};
use crate::metrics::SyncMetrics;
use crate::net::protocol::WorldSnapshot;

/// Estimate of `host clock - local clock`
///
/// Taken as the maximum of `snapshot.timestamp - arrival` seen so far: the
/// sample with the least transit delay gives the tightest bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockOffset {
    offset_ms: Option<i64>,
}

impl ClockOffset {
    pub fn observe(&mut self, host_ts: Timestamp, arrival: Timestamp) {
        let sample = host_ts as i64 - arrival as i64;
        self.offset_ms = Some(self.offset_ms.map_or(sample, |o| o.max(sample)));
    }

    pub fn offset_ms(&self) -> Option<i64> {
        self.offset_ms
    }

    /// Local time translated to the host clock (identity until a sample exists)
    pub fn host_time(&self, local: Timestamp) -> Timestamp {
        let offset = self.offset_ms.unwrap_or(0);
        (local as i64 + offset).max(0) as Timestamp
    }
}

/// What applying one snapshot changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiveOutcome {
    /// False for a snapshot older than the last applied one
    pub applied: bool,
    pub round_changed: Option<u32>,
    pub turn_changed: Option<TurnState>,
    /// A new round started playing, so entities were placed afresh
    pub respawned: bool,
    /// The controlled entity was deactivated by the host
    pub local_deactivated: Option<EntityId>,
}

pub struct SnapshotReceiver {
    last_seq: Option<u64>,
    /// Round whose spawn has been applied
    spawned_round: Option<u32>,
    clock: ClockOffset,
    metrics: Arc<SyncMetrics>,
}

impl SnapshotReceiver {
    pub fn new(metrics: Arc<SyncMetrics>) -> Self {
        Self {
            last_seq: None,
            spawned_round: None,
            clock: ClockOffset::default(),
            metrics,
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.last_seq.is_some()
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    pub fn clock(&self) -> &ClockOffset {
        &self.clock
    }

    pub fn host_time(&self, local: Timestamp) -> Timestamp {
        self.clock.host_time(local)
    }

    /// Apply a snapshot that arrived at local time `arrival`.
    ///
    /// Re-applying the snapshot last applied leaves buffers and flags unchanged.
    pub fn apply(
        &mut self,
        snapshot: &WorldSnapshot,
        world: &mut WorldState,
        buffers: &mut PositionBuffers,
        local: Option<EntityId>,
        arrival: Timestamp,
    ) -> ReceiveOutcome {
        if self.last_seq.is_some_and(|last| snapshot.seq < last) {
            SyncMetrics::incr(&self.metrics.snapshots_stale);
            trace!("Dropping stale snapshot {} (have {:?})", snapshot.seq, self.last_seq);
            return ReceiveOutcome::default();
        }
        self.last_seq = Some(snapshot.seq);
        self.clock.observe(snapshot.timestamp, arrival);
        SyncMetrics::incr(&self.metrics.snapshots_received);

        let mut outcome = ReceiveOutcome {
            applied: true,
            ..Default::default()
        };

        // Entities respawn only when a round starts playing
        outcome.respawned =
            snapshot.phase.is_simulating() && self.spawned_round != Some(snapshot.round);
        if outcome.respawned {
            buffers.clear_all();
            self.spawned_round = Some(snapshot.round);
        }

        if snapshot.round != world.round {
            debug!("Round {} -> {}", world.round, snapshot.round);
            outcome.round_changed = Some(snapshot.round);
        }
        let previous_turn = world.turn;

        world.seq = snapshot.seq;
        world.round = snapshot.round;
        world.elapsed_ms = snapshot.elapsed_ms;
        world.remaining_ms = snapshot.remaining_ms;
        world.team_scores = snapshot.team_scores;
        world.player_scores = snapshot.player_scores.iter().map(|(k, v)| (*k, *v)).collect();
        world.turn = snapshot.turn;

        if let Some(turn) = world.turn {
            let moved = previous_turn
                .map_or(true, |prev| prev.number != turn.number || prev.active_entity != turn.active_entity);
            if moved {
                outcome.turn_changed = Some(turn);
            }
        }

        let present: HashSet<EntityId> = snapshot.entities.iter().map(|e| e.id).collect();
        let gone: Vec<EntityId> = world
            .entities
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        for id in gone {
            world.entities.remove(&id);
            buffers.remove(id);
        }

        for wire in &snapshot.entities {
            let is_local = local == Some(wire.id);
            match world.get_mut(wire.id) {
                Some(entity) if is_local && !outcome.respawned => {
                    if entity.active && !wire.active {
                        outcome.local_deactivated = Some(wire.id);
                    }
                    entity.active = wire.active;
                    entity.ability = wire.ability;
                    entity.reached_checkpoint = wire.reached_checkpoint;
                    if !entity.active {
                        entity.velocity = wire.velocity;
                    }
                }
                Some(entity) => {
                    wire.copy_flags(entity);
                    entity.position = wire.position;
                    entity.velocity = wire.velocity;
                }
                None => world.add_entity(wire.to_entity()),
            }

            if !is_local {
                buffers.push(wire.id, PositionSample::new(wire.position, snapshot.timestamp));
            }
        }

        outcome
    }
}
