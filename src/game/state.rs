//! World state definitions
//!
//! Entities (taggers, runners, marbles) and the scalar round state that the
//! host computes and every other participant mirrors from snapshots.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RulesConfig;
use crate::util::vec2::Vec2;

/// Unique participant identifier
pub type ParticipantId = Uuid;

/// Entity identifier, stable for the duration of a round
pub type EntityId = u32;

/// Milliseconds on the caller's clock
pub type Timestamp = u64;

/// Closed set of entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Pursuer in the tag game
    Tagger,
    /// Pursued entity in the tag game
    Runner,
    /// Turn-based shooter / jumper
    Marble,
}

impl EntityKind {
    pub fn is_pursuer(&self) -> bool {
        matches!(self, EntityKind::Tagger)
    }

    pub fn is_pursued(&self) -> bool {
        matches!(self, EntityKind::Runner)
    }
}

/// One of the two sides participants are partitioned into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn index(&self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub fn other(&self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Complementary roles the two sides alternate between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Pursuer,
    Pursued,
}

impl Role {
    pub fn swapped(&self) -> Role {
        match self {
            Role::Pursuer => Role::Pursued,
            Role::Pursued => Role::Pursuer,
        }
    }

    /// Entity kind spawned for a side holding this role
    pub fn kind(&self) -> EntityKind {
        match self {
            Role::Pursuer => EntityKind::Tagger,
            Role::Pursued => EntityKind::Runner,
        }
    }
}

/// Who drives an entity, from the point of view of one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Controller {
    /// Driven by this participant's input
    LocalPlayer,
    /// Nobody owns it; the host's AI drives it
    #[default]
    Bot,
    /// Owned by another participant
    RemoteHuman,
}

/// Timed ability (speed boost) with cooldown
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AbilityState {
    /// Remaining active time
    pub active_ms: f32,
    /// Remaining cooldown; activation is refused while > 0
    pub cooldown_ms: f32,
}

impl AbilityState {
    pub fn is_active(&self) -> bool {
        self.active_ms > 0.0
    }

    pub fn is_ready(&self) -> bool {
        self.active_ms <= 0.0 && self.cooldown_ms <= 0.0
    }

    /// Start the ability if it is ready. Returns true on activation.
    pub fn activate(&mut self, rules: &RulesConfig) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.active_ms = rules.ability_duration_ms;
        self.cooldown_ms = rules.ability_duration_ms + rules.ability_cooldown_ms;
        true
    }

    pub fn tick(&mut self, dt_ms: f32) {
        self.active_ms = (self.active_ms - dt_ms).max(0.0);
        self.cooldown_ms = (self.cooldown_ms - dt_ms).max(0.0);
    }
}

/// A controllable or AI-driven actor
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub side: Side,
    pub position: Vec2,
    pub velocity: Vec2,
    pub controller: Controller,
    /// False once tagged (runner) or eliminated
    pub active: bool,
    /// Turn-based: reached the checkpoint this round
    pub reached_checkpoint: bool,
    /// Turn-based: has been launched during the current turn
    pub launched: bool,
    pub ability: AbilityState,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, side: Side, position: Vec2) -> Self {
        Self {
            id,
            kind,
            side,
            position,
            velocity: Vec2::ZERO,
            controller: Controller::Bot,
            active: true,
            reached_checkpoint: false,
            launched: false,
            ability: AbilityState::default(),
        }
    }

    /// Movement speed for continuous-action kinds
    pub fn speed(&self, rules: &RulesConfig) -> f32 {
        let base = match self.kind {
            EntityKind::Tagger => rules.tagger_speed,
            EntityKind::Runner => rules.runner_speed,
            EntityKind::Marble => rules.launch_speed,
        };
        if self.ability.is_active() {
            base * rules.ability_speed_multiplier
        } else {
            base
        }
    }
}

/// Turn pointer for the turn-based variant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnState {
    /// Turn counter within the round, starting at 0
    pub number: u32,
    pub active_entity: EntityId,
    pub remaining_ms: f32,
}

/// Full simulated world
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    /// Simulation ticks run on this participant
    pub tick: u64,
    /// Snapshot sequence number (host-assigned)
    pub seq: u64,
    /// Round counter, starting at 1 once the first round is set up
    pub round: u32,
    pub elapsed_ms: f32,
    pub remaining_ms: f32,
    /// Indexed by `Side::index()`
    pub team_scores: [u32; 2],
    /// Per-entity scores (turn-based)
    pub player_scores: HashMap<EntityId, u32>,
    pub turn: Option<TurnState>,
    pub entities: HashMap<EntityId, Entity>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Entity ids in ascending order (deterministic iteration)
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of pursued entities still in play
    pub fn active_pursued(&self) -> usize {
        self.entities
            .values()
            .filter(|e| e.kind.is_pursued() && e.active)
            .count()
    }

    /// True if the round had pursued entities and all of them are out
    pub fn all_pursued_eliminated(&self) -> bool {
        let any_pursued = self.entities.values().any(|e| e.kind.is_pursued());
        any_pursued && self.active_pursued() == 0
    }

    pub fn add_team_score(&mut self, side: Side, points: u32) {
        self.team_scores[side.index()] += points;
    }

    pub fn add_player_score(&mut self, id: EntityId, points: u32) {
        *self.player_scores.entry(id).or_insert(0) += points;
    }

    /// Reset per-round scalar state; scores carry over between rounds
    pub fn reset_round(&mut self, round: u32, duration_ms: f32) {
        self.round = round;
        self.elapsed_ms = 0.0;
        self.remaining_ms = duration_ms;
        self.turn = None;
        self.entities.clear();
    }
}
