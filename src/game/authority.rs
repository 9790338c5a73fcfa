//! Per-frame simulation step
//!
//! The host runs the full rules: local input, bots, collisions, timers and
//! terminal checks. Every other participant only integrates the entity it
//! controls; everything else arrives through snapshots.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{GameMode, RulesConfig, SyncConfig};
use crate::game::input::InputState;
use crate::game::state::{Controller, EntityId, Timestamp, TurnState, WorldState};
use crate::game::systems::collision::{self, Tag};
use crate::game::systems::turns::{self, TurnProgress};
use crate::game::systems::{ai, movement};

/// Why a round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEnd {
    /// Every pursued entity was tagged
    AllPursuedTagged,
    /// Round timer reached zero
    TimeExpired,
    /// Every marble had its turn
    AllTurnsTaken,
}

/// What one host tick produced
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Clamped frame delta actually simulated
    pub dt_ms: f32,
    pub tags: Vec<Tag>,
    pub checkpoints: Vec<EntityId>,
    pub turn_changed: Option<TurnState>,
    /// Set in the same tick that observes the terminal condition
    pub round_end: Option<RoundEnd>,
}

pub struct SimulationAuthority {
    rules: RulesConfig,
    max_delta_ms: f32,
    last_tick: Option<Timestamp>,
}

impl SimulationAuthority {
    pub fn new(rules: RulesConfig, sync: &SyncConfig) -> Self {
        Self {
            rules,
            max_delta_ms: sync.max_delta_ms(),
            last_tick: None,
        }
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.rules
    }

    /// Frame delta since the previous tick, clamped so a stalled frame does
    /// not teleport entities. The first tick simulates zero time.
    pub fn delta(&mut self, now: Timestamp) -> f32 {
        let dt = match self.last_tick {
            Some(last) => now.saturating_sub(last) as f32,
            None => 0.0,
        };
        self.last_tick = Some(now);
        dt.min(self.max_delta_ms)
    }

    /// Full host step
    pub fn host_tick(&mut self, world: &mut WorldState, now: Timestamp, input: &InputState) -> TickReport {
        let dt = self.delta(now);
        let rules = &self.rules;
        let mut report = TickReport {
            dt_ms: dt,
            ..Default::default()
        };

        world.tick += 1;
        world.elapsed_ms += dt;
        for entity in world.entities.values_mut() {
            entity.ability.tick(dt);
        }

        match rules.mode {
            GameMode::Pursuit => {
                for id in world.sorted_ids() {
                    let Some(controller) = world.get(id).map(|e| e.controller) else {
                        continue;
                    };
                    let (direction, action) = match controller {
                        Controller::LocalPlayer => (input.direction(), input.action),
                        Controller::Bot => {
                            let cmd = ai::decide(world, id, rules);
                            (cmd.direction, cmd.action)
                        }
                        // Driven by the owner's relays
                        Controller::RemoteHuman => continue,
                    };
                    if let Some(entity) = world.get_mut(id) {
                        if action && entity.active {
                            entity.ability.activate(rules);
                        }
                        movement::steer(entity, direction, dt, rules);
                    }
                }

                report.tags = collision::resolve_tags(world, rules);
                world.remaining_ms = (world.remaining_ms - dt).max(0.0);

                if world.all_pursued_eliminated() {
                    report.round_end = Some(RoundEnd::AllPursuedTagged);
                } else if world.remaining_ms <= 0.0 {
                    let survivors: Vec<_> = world
                        .entities
                        .values()
                        .filter(|e| e.kind.is_pursued() && e.active)
                        .map(|e| e.side)
                        .collect();
                    for side in survivors {
                        world.add_team_score(side, rules.survival_points);
                    }
                    report.round_end = Some(RoundEnd::TimeExpired);
                }
            }
            GameMode::TurnBased => {
                let active = world.turn.map(|t| t.active_entity);
                for id in world.sorted_ids() {
                    let Some(controller) = world.get(id).map(|e| e.controller) else {
                        continue;
                    };
                    let launch = match controller {
                        Controller::LocalPlayer => {
                            (Some(id) == active && input.action).then(|| input.direction())
                        }
                        Controller::Bot => {
                            let cmd = ai::decide(world, id, rules);
                            (Some(id) == active && cmd.action).then_some(cmd.direction)
                        }
                        Controller::RemoteHuman => continue,
                    };
                    if let Some(entity) = world.get_mut(id) {
                        if let Some(aim) = launch {
                            turns::launch(entity, aim, rules);
                        }
                        movement::glide(entity, dt, rules);
                    }
                }

                report.checkpoints = turns::resolve_checkpoints(world, rules);
                match turns::advance(world, rules, dt) {
                    TurnProgress::Continue => {}
                    TurnProgress::Advanced(turn) => report.turn_changed = Some(turn),
                    TurnProgress::RoundComplete => report.round_end = Some(RoundEnd::AllTurnsTaken),
                }
            }
        }

        if let Some(end) = report.round_end {
            debug!("Round {} ended at tick {}: {:?}", world.round, world.tick, end);
        }
        report
    }

    /// Non-host step: integrate only the entity this participant controls
    pub fn local_tick(
        &mut self,
        world: &mut WorldState,
        now: Timestamp,
        input: &InputState,
        owned: Option<EntityId>,
    ) -> f32 {
        let dt = self.delta(now);
        world.tick += 1;

        let Some(id) = owned else {
            return dt;
        };
        let active_turn = world.turn.map(|t| t.active_entity);
        let rules = &self.rules;
        let Some(entity) = world.get_mut(id) else {
            return dt;
        };

        match rules.mode {
            GameMode::Pursuit => movement::steer(entity, input.direction(), dt, rules),
            GameMode::TurnBased => {
                if active_turn == Some(id) && input.action {
                    turns::launch(entity, input.direction(), rules);
                }
                movement::glide(entity, dt, rules);
            }
        }
        dt
    }
}
