use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::constants::sync::SNAPSHOT_SCHEMA_VERSION;
use crate::game::state::{
    AbilityState, Entity, EntityId, EntityKind, Side, Timestamp, TurnState, WorldState,
};
use crate::lobby::lifecycle::Phase;
use crate::util::vec2::Vec2;

/// Entity state for network transmission
///
/// Kind-specific flags are optional on the wire and default to false; the
/// fields every kind has are required and a missing one fails decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub kind: EntityKind,
    pub side: Side,
    pub position: Vec2,
    pub velocity: Vec2,
    pub active: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub reached_checkpoint: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub launched: bool,
    #[serde(default)]
    pub ability: AbilityState,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl EntitySnapshot {
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            kind: entity.kind,
            side: entity.side,
            position: entity.position,
            velocity: entity.velocity,
            active: entity.active,
            reached_checkpoint: entity.reached_checkpoint,
            launched: entity.launched,
            ability: entity.ability,
        }
    }

    /// Fresh local entity from the wire state (controller resolved later)
    pub fn to_entity(&self) -> Entity {
        let mut entity = Entity::new(self.id, self.kind, self.side, self.position);
        entity.velocity = self.velocity;
        self.copy_flags(&mut entity);
        entity
    }

    /// Copy everything except position/velocity
    pub fn copy_flags(&self, entity: &mut Entity) {
        entity.kind = self.kind;
        entity.side = self.side;
        entity.active = self.active;
        entity.reached_checkpoint = self.reached_checkpoint;
        entity.launched = self.launched;
        entity.ability = self.ability;
    }
}

/// Self-contained world state published by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Wire schema version; checked before the rest is trusted
    pub schema: u16,
    /// Host-assigned, strictly increasing per session
    pub seq: u64,
    /// Host clock at publish time
    pub timestamp: Timestamp,
    pub phase: Phase,
    pub round: u32,
    pub elapsed_ms: f32,
    pub remaining_ms: f32,
    pub team_scores: [u32; 2],
    #[serde(default)]
    pub player_scores: BTreeMap<EntityId, u32>,
    #[serde(default)]
    pub turn: Option<TurnState>,
    pub entities: Vec<EntitySnapshot>,
}

impl WorldSnapshot {
    pub fn from_world(world: &WorldState, phase: Phase, timestamp: Timestamp) -> Self {
        let mut entities: Vec<EntitySnapshot> =
            world.entities.values().map(EntitySnapshot::from_entity).collect();
        entities.sort_by_key(|e| e.id);

        Self {
            schema: SNAPSHOT_SCHEMA_VERSION,
            seq: world.seq,
            timestamp,
            phase,
            round: world.round,
            elapsed_ms: world.elapsed_ms,
            remaining_ms: world.remaining_ms,
            team_scores: world.team_scores,
            player_scores: world.player_scores.iter().map(|(k, v)| (*k, *v)).collect(),
            turn: world.turn,
            entities,
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|e| e.id == id)
    }
}

/// Non-host owner's own entity state, relayed to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRelay {
    /// Per-sender counter; the host ignores relays it has already applied
    pub seq: u64,
    pub entity_id: EntityId,
    /// Round the sender was simulating; relays from an earlier round are stale
    #[serde(default)]
    pub round: u32,
    pub position: Vec2,
    pub velocity: Vec2,
    /// Sender clock
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "is_false")]
    pub launched: bool,
    /// Ability activation flag from the owner's input
    #[serde(default, skip_serializing_if = "is_false")]
    pub ability_requested: bool,
}

/// Encode any wire value into a channel value
pub fn encode<T: Serialize>(message: &T) -> Result<Value, EncodeError> {
    serde_json::to_value(message).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a channel value into a typed wire value
pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Decode a snapshot, rejecting unknown schema versions before the body
pub fn decode_snapshot(value: Value) -> Result<WorldSnapshot, DecodeError> {
    let schema = value
        .get("schema")
        .and_then(Value::as_u64)
        .ok_or_else(|| DecodeError::Malformed("missing field `schema`".to_string()))?;
    if schema != u64::from(SNAPSHOT_SCHEMA_VERSION) {
        return Err(DecodeError::UnsupportedSchema {
            found: schema,
            expected: SNAPSHOT_SCHEMA_VERSION,
        });
    }
    decode(value)
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Decode error: {0}")]
    Malformed(String),
    #[error("Unsupported snapshot schema {found} (expected {expected})")]
    UnsupportedSchema { found: u64, expected: u16 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_world() -> WorldState {
        let mut world = WorldState::new();
        world.seq = 7;
        world.round = 2;
        world.remaining_ms = 1234.0;
        world.team_scores = [10, 5];
        world.add_entity(Entity::new(2, EntityKind::Runner, Side::B, Vec2::new(50.0, 60.0)));
        let mut tagger = Entity::new(1, EntityKind::Tagger, Side::A, Vec2::new(10.0, 20.0));
        tagger.velocity = Vec2::new(3.0, 0.0);
        world.add_entity(tagger);
        world
    }

    #[test]
    fn test_snapshot_from_world_sorted_and_complete() {
        let snapshot = WorldSnapshot::from_world(&sample_world(), Phase::ActiveRound, 999);

        assert_eq!(snapshot.schema, SNAPSHOT_SCHEMA_VERSION);
        assert_eq!(snapshot.seq, 7);
        assert_eq!(snapshot.round, 2);
        assert_eq!(snapshot.timestamp, 999);
        assert_eq!(snapshot.entities.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(snapshot.entity(1).unwrap().velocity, Vec2::new(3.0, 0.0));
    }

    #[test]
    fn test_snapshot_decodes_from_channel_value() {
        let snapshot = WorldSnapshot::from_world(&sample_world(), Phase::ActiveRound, 999);
        let value = encode(&snapshot).unwrap();

        assert_eq!(value["entities"][0]["kind"], json!("tagger"));
        // Optional flags are omitted when false
        assert!(value["entities"][0].get("launched").is_none());

        let decoded = decode_snapshot(value).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_unknown_schema_rejected() {
        let mut value = encode(&WorldSnapshot::from_world(&sample_world(), Phase::Waiting, 0)).unwrap();
        value["schema"] = json!(1);
        assert_eq!(
            decode_snapshot(value),
            Err(DecodeError::UnsupportedSchema {
                found: 1,
                expected: SNAPSHOT_SCHEMA_VERSION
            })
        );
    }

    #[test]
    fn test_missing_required_field_is_error() {
        let mut value = encode(&WorldSnapshot::from_world(&sample_world(), Phase::Waiting, 0)).unwrap();
        value["entities"][0]
            .as_object_mut()
            .unwrap()
            .remove("active");
        assert!(matches!(decode_snapshot(value), Err(DecodeError::Malformed(_))));

        assert!(matches!(
            decode_snapshot(json!({"seq": 1})),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_entity_kind_rejected() {
        let mut value = encode(&WorldSnapshot::from_world(&sample_world(), Phase::Waiting, 0)).unwrap();
        value["entities"][0]["kind"] = json!("dragon");
        assert!(decode_snapshot(value).is_err());
    }

    #[test]
    fn test_entity_flags_copied_without_position() {
        let mut wire = EntitySnapshot::from_entity(&Entity::new(
            4,
            EntityKind::Runner,
            Side::A,
            Vec2::new(1.0, 1.0),
        ));
        wire.active = false;
        wire.position = Vec2::new(500.0, 500.0);

        let mut local = Entity::new(4, EntityKind::Runner, Side::A, Vec2::new(9.0, 9.0));
        wire.copy_flags(&mut local);
        assert!(!local.active);
        assert_eq!(local.position, Vec2::new(9.0, 9.0));
    }

    #[test]
    fn test_relay_optional_flags_default() {
        let relay: PositionRelay = decode(json!({
            "seq": 3,
            "entity_id": 1,
            "position": {"x": 1.0, "y": 2.0},
            "velocity": {"x": 0.0, "y": 0.0},
            "timestamp": 10
        }))
        .unwrap();
        assert!(!relay.launched);
        assert!(!relay.ability_requested);
    }
}
