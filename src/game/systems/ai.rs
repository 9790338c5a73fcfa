//! Bot steering for entities nobody controls
//!
//! Stateless: each decision looks only at the current world, so a bot can be
//! taken over or released at any tick without bookkeeping.

use rand::Rng;

use crate::config::RulesConfig;
use crate::game::state::{Entity, EntityId, EntityKind, WorldState};
use crate::util::vec2::Vec2;

/// Maximum aim error of a bot marble, radians
const MARBLE_AIM_JITTER: f32 = 0.15;

/// Distance from a wall at which fleeing runners start curving inward
const WALL_MARGIN: f32 = 80.0;

/// One tick's decision for a bot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BotCommand {
    /// Desired direction (unit length or zero)
    pub direction: Vec2,
    /// Ability in pursuit mode, launch in turn-based mode
    pub action: bool,
}

pub fn decide(world: &WorldState, id: EntityId, rules: &RulesConfig) -> BotCommand {
    let Some(me) = world.get(id) else {
        return BotCommand::default();
    };
    if !me.active {
        return BotCommand::default();
    }

    match me.kind {
        EntityKind::Tagger => chase(world, me, rules),
        EntityKind::Runner => flee(world, me, rules),
        EntityKind::Marble => aim_at_checkpoint(me, rules),
    }
}

fn nearest<'a>(
    world: &'a WorldState,
    from: Vec2,
    filter: impl Fn(&Entity) -> bool,
) -> Option<&'a Entity> {
    world
        .entities
        .values()
        .filter(|e| e.active && filter(e))
        .min_by(|a, b| {
            from.distance_sq_to(a.position)
                .total_cmp(&from.distance_sq_to(b.position))
                .then(a.id.cmp(&b.id))
        })
}

fn chase(world: &WorldState, me: &Entity, rules: &RulesConfig) -> BotCommand {
    let Some(target) = nearest(world, me.position, |e| e.kind.is_pursued()) else {
        return BotCommand::default();
    };
    let offset = target.position - me.position;
    BotCommand {
        direction: offset.normalize(),
        action: me.ability.is_ready() && offset.length() < rules.hit_radius * 3.0,
    }
}

fn flee(world: &WorldState, me: &Entity, rules: &RulesConfig) -> BotCommand {
    let Some(threat) = nearest(world, me.position, |e| e.kind.is_pursuer()) else {
        return BotCommand::default();
    };
    let away = me.position - threat.position;
    let mut direction = away.normalize();

    // Curve toward the middle instead of pinning against a wall
    let bounds = &rules.bounds;
    let p = me.position;
    let near_wall = p.x - bounds.min.x < WALL_MARGIN
        || bounds.max.x - p.x < WALL_MARGIN
        || p.y - bounds.min.y < WALL_MARGIN
        || bounds.max.y - p.y < WALL_MARGIN;
    if near_wall {
        direction = (direction + (bounds.center() - p).normalize()).normalize();
    }

    BotCommand {
        direction,
        action: me.ability.is_ready() && away.length() < rules.hit_radius * 2.0,
    }
}

fn aim_at_checkpoint(me: &Entity, rules: &RulesConfig) -> BotCommand {
    let aim = (rules.checkpoint - me.position).normalize();
    let angle = rand::thread_rng().gen_range(-MARBLE_AIM_JITTER..MARBLE_AIM_JITTER);
    let (sin, cos) = angle.sin_cos();
    BotCommand {
        direction: Vec2::new(aim.x * cos - aim.y * sin, aim.x * sin + aim.y * cos),
        action: !me.launched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Side;

    fn world_with(entities: Vec<Entity>) -> WorldState {
        let mut world = WorldState::new();
        for e in entities {
            world.add_entity(e);
        }
        world
    }

    #[test]
    fn test_tagger_chases_nearest_active_runner() {
        let rules = RulesConfig::default();
        let far = Entity::new(3, EntityKind::Runner, Side::B, Vec2::new(100.0, 500.0));
        let mut tagged = Entity::new(4, EntityKind::Runner, Side::B, Vec2::new(410.0, 300.0));
        tagged.active = false;
        let world = world_with(vec![
            Entity::new(1, EntityKind::Tagger, Side::A, Vec2::new(400.0, 300.0)),
            Entity::new(2, EntityKind::Runner, Side::B, Vec2::new(600.0, 300.0)),
            far,
            tagged,
        ]);

        let cmd = decide(&world, 1, &rules);
        assert!(cmd.direction.approx_eq(Vec2::new(1.0, 0.0), 1e-5));
    }

    #[test]
    fn test_runner_flees() {
        let rules = RulesConfig::default();
        let world = world_with(vec![
            Entity::new(1, EntityKind::Tagger, Side::A, Vec2::new(400.0, 300.0)),
            Entity::new(2, EntityKind::Runner, Side::B, Vec2::new(300.0, 300.0)),
        ]);
        let cmd = decide(&world, 2, &rules);
        assert!(cmd.direction.x < 0.0);
    }

    #[test]
    fn test_no_opponents_idle() {
        let rules = RulesConfig::default();
        let world = world_with(vec![Entity::new(1, EntityKind::Tagger, Side::A, Vec2::ZERO)]);
        assert_eq!(decide(&world, 1, &rules), BotCommand::default());
        assert_eq!(decide(&world, 99, &rules), BotCommand::default());
    }

    #[test]
    fn test_marble_aims_roughly_at_checkpoint() {
        let rules = RulesConfig::turn_based();
        let start = Vec2::new(100.0, rules.checkpoint.y);
        let world = world_with(vec![Entity::new(1, EntityKind::Marble, Side::A, start)]);
        for _ in 0..20 {
            let cmd = decide(&world, 1, &rules);
            assert!(cmd.action);
            assert!(cmd.direction.x > MARBLE_AIM_JITTER.cos() - 1e-4);
        }
    }
}
