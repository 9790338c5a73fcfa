//! Turn-based variant: one marble moves per turn
//!
//! Turn order is ascending entity id. A turn ends when the launched marble
//! comes to rest or the turn timer runs out; the round ends after every
//! marble has had its turn.

use crate::config::RulesConfig;
use crate::game::state::{Entity, EntityId, TurnState, WorldState};
use crate::util::vec2::Vec2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurnProgress {
    /// Current turn still running
    Continue,
    /// Control passed to the next marble
    Advanced(TurnState),
    /// Every marble has had its turn
    RoundComplete,
}

/// Give the first turn of the round to the lowest id
pub fn begin(world: &mut WorldState, rules: &RulesConfig) {
    world.turn = world.sorted_ids().first().map(|&id| TurnState {
        number: 0,
        active_entity: id,
        remaining_ms: rules.turn_duration_ms,
    });
}

/// Launch a marble that has not been launched yet. Zero aim shoots along +x.
pub fn launch(entity: &mut Entity, aim: Vec2, rules: &RulesConfig) -> bool {
    if entity.launched || !entity.active {
        return false;
    }
    let direction = if aim == Vec2::ZERO {
        Vec2::new(1.0, 0.0)
    } else {
        aim.normalize()
    };
    entity.velocity = direction * rules.launch_speed;
    entity.launched = true;
    true
}

/// Count down the turn timer and hand over the turn when it is done
pub fn advance(world: &mut WorldState, rules: &RulesConfig, dt_ms: f32) -> TurnProgress {
    let Some(mut turn) = world.turn else {
        return TurnProgress::Continue;
    };
    turn.remaining_ms = (turn.remaining_ms - dt_ms).max(0.0);

    let timed_out = turn.remaining_ms <= 0.0;
    let finished = match world.get_mut(turn.active_entity) {
        Some(marble) if marble.active => {
            let at_rest = marble.launched && marble.velocity.length() < rules.rest_speed;
            if timed_out {
                marble.velocity = Vec2::ZERO;
                marble.launched = true;
            }
            at_rest || timed_out
        }
        // Missing or eliminated marble forfeits its turn
        _ => true,
    };

    if !finished {
        world.turn = Some(turn);
        return TurnProgress::Continue;
    }

    let order = world.sorted_ids();
    let next_number = turn.number + 1;
    match order.get(next_number as usize) {
        Some(&next) => {
            let next_turn = TurnState {
                number: next_number,
                active_entity: next,
                remaining_ms: rules.turn_duration_ms,
            };
            world.turn = Some(next_turn);
            TurnProgress::Advanced(next_turn)
        }
        None => {
            world.turn = Some(turn);
            TurnProgress::RoundComplete
        }
    }
}

/// Score marbles that touched the checkpoint for the first time this round
pub fn resolve_checkpoints(world: &mut WorldState, rules: &RulesConfig) -> Vec<EntityId> {
    let radius_sq = rules.checkpoint_radius * rules.checkpoint_radius;
    let mut reached = Vec::new();

    for id in world.sorted_ids() {
        let Some(marble) = world.get_mut(id) else {
            continue;
        };
        if marble.reached_checkpoint
            || !marble.active
            || marble.position.distance_sq_to(rules.checkpoint) > radius_sq
        {
            continue;
        }
        marble.reached_checkpoint = true;
        let side = marble.side;
        world.add_player_score(id, rules.checkpoint_points);
        world.add_team_score(side, rules.checkpoint_points);
        reached.push(id);
    }

    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{EntityKind, Side};

    fn marbles(ids: &[EntityId]) -> WorldState {
        let mut world = WorldState::new();
        for &id in ids {
            world.add_entity(Entity::new(id, EntityKind::Marble, Side::A, Vec2::new(100.0, 100.0)));
        }
        world
    }

    #[test]
    fn test_turn_order_ascending_ids() {
        let rules = RulesConfig::turn_based();
        let mut world = marbles(&[101, 2, 1]);
        begin(&mut world, &rules);
        assert_eq!(world.turn.unwrap().active_entity, 1);
    }

    #[test]
    fn test_turn_advances_when_marble_rests() {
        let rules = RulesConfig::turn_based();
        let mut world = marbles(&[1, 2]);
        begin(&mut world, &rules);

        assert_eq!(advance(&mut world, &rules, 16.0), TurnProgress::Continue);

        let marble = world.get_mut(1).unwrap();
        assert!(launch(marble, Vec2::new(0.0, 1.0), &rules));
        assert!(!launch(marble, Vec2::new(0.0, 1.0), &rules));
        assert_eq!(advance(&mut world, &rules, 16.0), TurnProgress::Continue);

        world.get_mut(1).unwrap().velocity = Vec2::ZERO;
        match advance(&mut world, &rules, 16.0) {
            TurnProgress::Advanced(turn) => {
                assert_eq!(turn.number, 1);
                assert_eq!(turn.active_entity, 2);
                assert_eq!(turn.remaining_ms, rules.turn_duration_ms);
            }
            other => panic!("expected Advanced, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_ends_turn_and_round() {
        let rules = RulesConfig::turn_based();
        let mut world = marbles(&[1, 2]);
        begin(&mut world, &rules);

        assert!(matches!(
            advance(&mut world, &rules, rules.turn_duration_ms),
            TurnProgress::Advanced(_)
        ));
        assert!(world.get(1).unwrap().launched);
        assert_eq!(
            advance(&mut world, &rules, rules.turn_duration_ms),
            TurnProgress::RoundComplete
        );
    }

    #[test]
    fn test_checkpoint_scores_once() {
        let rules = RulesConfig::turn_based();
        let mut world = marbles(&[1]);
        world.get_mut(1).unwrap().position = rules.checkpoint;

        assert_eq!(resolve_checkpoints(&mut world, &rules), vec![1]);
        assert!(resolve_checkpoints(&mut world, &rules).is_empty());
        assert_eq!(world.player_scores[&1], rules.checkpoint_points);
        assert_eq!(world.team_scores[Side::A.index()], rules.checkpoint_points);
    }
}
