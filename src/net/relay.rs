//! Owner-to-host position relay
//!
//! A non-host participant writes its controlled entity's state to
//! `input/{participantId}`; the host applies it in place of simulating that
//! entity. Relays are throttled like snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::channel::{ChannelPath, StateChannel};
use crate::config::RulesConfig;
use crate::game::position_buffer::{PositionBuffers, PositionSample};
use crate::game::state::{Entity, ParticipantId, Timestamp, WorldState};
use crate::lobby::ownership::OwnershipRegistry;
use crate::metrics::SyncMetrics;
use crate::net::broadcaster::PublishOutcome;
use crate::net::protocol::{decode, encode, DecodeError, PositionRelay};
use crate::net::throttle::Throttle;

/// Non-host writer of its own entity's state
pub struct RelaySender {
    path: ChannelPath,
    throttle: Throttle,
    seq: u64,
    ability_pending: bool,
    metrics: Arc<SyncMetrics>,
}

impl RelaySender {
    pub fn new(path: ChannelPath, window_ms: u64, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            path,
            throttle: Throttle::new(window_ms),
            seq: 0,
            ability_pending: false,
            metrics,
        }
    }

    /// Latch an ability request until the next relay goes out
    pub fn request_ability(&mut self) {
        self.ability_pending = true;
    }

    pub fn send(
        &mut self,
        channel: &dyn StateChannel,
        entity: &Entity,
        round: u32,
        now: Timestamp,
    ) -> PublishOutcome {
        if !self.throttle.try_acquire(now) {
            return PublishOutcome::Throttled;
        }

        let seq = self.seq + 1;
        let relay = PositionRelay {
            seq,
            entity_id: entity.id,
            round,
            position: entity.position,
            velocity: entity.velocity,
            timestamp: now,
            launched: entity.launched,
            ability_requested: self.ability_pending,
        };

        let result = encode(&relay)
            .map_err(|e| e.to_string())
            .and_then(|value| channel.write(&self.path, value).map_err(|e| e.to_string()));
        match result {
            Ok(()) => {
                self.seq = seq;
                self.ability_pending = false;
                SyncMetrics::incr(&self.metrics.relays_sent);
                PublishOutcome::Written { seq }
            }
            Err(e) => {
                warn!("Relay write failed: {}", e);
                SyncMetrics::incr(&self.metrics.write_failures);
                self.throttle.reset();
                PublishOutcome::Failed
            }
        }
    }
}

/// Host reader of all relays, deduplicated per sender
#[derive(Debug, Default)]
pub struct RelayInbox {
    last_seq: HashMap<ParticipantId, u64>,
}

impl RelayInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// New relays from one push of the `input` subtree. Malformed entries are
    /// skipped; a malformed subtree is an error.
    pub fn accept(&mut self, value: Option<Value>) -> Result<Vec<(ParticipantId, PositionRelay)>, DecodeError> {
        let entries: BTreeMap<ParticipantId, Value> = match value {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(v) => decode(v)?,
        };

        let mut fresh = Vec::new();
        for (sender, raw) in entries {
            let relay: PositionRelay = match decode(raw) {
                Ok(relay) => relay,
                Err(e) => {
                    warn!("Ignoring relay from {}: {}", sender, e);
                    continue;
                }
            };
            let last = self.last_seq.get(&sender).copied().unwrap_or(0);
            if relay.seq > last {
                self.last_seq.insert(sender, relay.seq);
                fresh.push((sender, relay));
            }
        }
        Ok(fresh)
    }

    pub fn forget(&mut self, participant: ParticipantId) {
        self.last_seq.remove(&participant);
    }
}

/// Apply one relay on the host. Relays from an earlier round, for entities the
/// sender does not hold, or for inactive entities are ignored.
pub fn apply_relay(
    world: &mut WorldState,
    buffers: &mut PositionBuffers,
    ownership: &OwnershipRegistry,
    rules: &RulesConfig,
    sender: ParticipantId,
    relay: &PositionRelay,
    now: Timestamp,
) -> bool {
    if relay.round != world.round {
        return false;
    }
    if ownership.holder(relay.entity_id) != Some(sender) {
        debug!("Relay for entity {} from non-holder {}", relay.entity_id, sender);
        return false;
    }
    let active_turn = world.turn.map(|t| t.active_entity);
    let Some(entity) = world.get_mut(relay.entity_id) else {
        return false;
    };
    if !entity.active {
        return false;
    }

    entity.position = rules.bounds.clamp(relay.position, rules.entity_radius);
    entity.velocity = relay.velocity;
    if relay.launched && active_turn == Some(entity.id) {
        entity.launched = true;
    }
    if relay.ability_requested {
        entity.ability.activate(rules);
    }
    buffers.push(entity.id, PositionSample::new(entity.position, now));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::MemoryChannel;
    use crate::channel::paths::SessionPaths;
    use crate::game::state::{EntityKind, Side};
    use crate::util::vec2::Vec2;
    use uuid::Uuid;

    #[test]
    fn test_send_then_accept_once() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let paths = SessionPaths::new("s1");
        let me = Uuid::new_v4();
        let mut sender = RelaySender::new(paths.input(me), 50, Arc::new(SyncMetrics::new()));

        let entity = Entity::new(3, EntityKind::Runner, Side::B, Vec2::new(42.0, 24.0));
        sender.request_ability();
        assert_eq!(sender.send(&client, &entity, 1, 100), PublishOutcome::Written { seq: 1 });
        assert_eq!(sender.send(&client, &entity, 1, 120), PublishOutcome::Throttled);

        let mut inbox = RelayInbox::new();
        let fresh = inbox.accept(server.peek(&paths.inputs())).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].0, me);
        assert!(fresh[0].1.ability_requested);

        // Same value again yields nothing new
        assert!(inbox.accept(server.peek(&paths.inputs())).unwrap().is_empty());

        // Ability latch cleared after sending
        sender.send(&client, &entity, 1, 200);
        let fresh = inbox.accept(server.peek(&paths.inputs())).unwrap();
        assert!(!fresh[0].1.ability_requested);
    }

    #[test]
    fn test_apply_requires_holder() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let rules = RulesConfig::default();
        let (owner, intruder) = (Uuid::new_v4(), Uuid::new_v4());

        let mut world = WorldState::new();
        world.add_entity(Entity::new(3, EntityKind::Runner, Side::B, Vec2::new(100.0, 100.0)));
        let mut ownership = OwnershipRegistry::new(SessionPaths::new("s1"));
        ownership.claim(&client, 3, owner).unwrap();
        let mut buffers = PositionBuffers::new(10);

        let relay = PositionRelay {
            seq: 1,
            entity_id: 3,
            round: 0,
            position: Vec2::new(200.0, 150.0),
            velocity: Vec2::new(1.0, 0.0),
            timestamp: 0,
            launched: false,
            ability_requested: false,
        };

        assert!(!apply_relay(&mut world, &mut buffers, &ownership, &rules, intruder, &relay, 10));
        assert_eq!(world.get(3).unwrap().position, Vec2::new(100.0, 100.0));

        assert!(apply_relay(&mut world, &mut buffers, &ownership, &rules, owner, &relay, 10));
        assert_eq!(world.get(3).unwrap().position, Vec2::new(200.0, 150.0));
        assert_eq!(buffers.get(3).unwrap().len(), 1);

        world.round = 1;
        let stale = PositionRelay { seq: 2, position: Vec2::new(300.0, 300.0), ..relay };
        assert!(!apply_relay(&mut world, &mut buffers, &ownership, &rules, owner, &stale, 20));
        assert_eq!(world.get(3).unwrap().position, Vec2::new(200.0, 150.0));
    }

    #[test]
    fn test_malformed_entry_skipped() {
        let good = Uuid::new_v4();
        let bad = Uuid::new_v4();
        let value = serde_json::json!({
            good.to_string(): {
                "seq": 1, "entity_id": 1,
                "position": {"x": 0.0, "y": 0.0},
                "velocity": {"x": 0.0, "y": 0.0},
                "timestamp": 5
            },
            bad.to_string(): {"seq": "nope"}
        });
        let fresh = RelayInbox::new().accept(Some(value)).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].0, good);
    }
}
