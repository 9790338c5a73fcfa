use crate::config::RulesConfig;
use crate::game::state::{EntityId, WorldState};
use crate::util::vec2::Vec2;

/// A pursuer reached a pursued entity this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub tagger: EntityId,
    pub runner: EntityId,
}

/// Deactivate every active pursued entity within hit radius of an active
/// pursuer and credit the pursuer's side.
///
/// Pairs are visited in ascending id order so the same world always yields the
/// same tags; a runner is tagged at most once.
pub fn resolve_tags(world: &mut WorldState, rules: &RulesConfig) -> Vec<Tag> {
    let ids = world.sorted_ids();
    let hit_sq = rules.hit_radius * rules.hit_radius;
    let mut tags = Vec::new();

    for &tagger_id in &ids {
        let Some(tagger) = world.get(tagger_id) else {
            continue;
        };
        if !tagger.kind.is_pursuer() || !tagger.active {
            continue;
        }
        let (tagger_pos, tagger_side) = (tagger.position, tagger.side);

        for &runner_id in &ids {
            let hit = world.get(runner_id).is_some_and(|r| {
                r.kind.is_pursued() && r.active && r.position.distance_sq_to(tagger_pos) <= hit_sq
            });
            if !hit {
                continue;
            }
            if let Some(runner) = world.get_mut(runner_id) {
                runner.active = false;
                runner.velocity = Vec2::ZERO;
            }
            world.add_team_score(tagger_side, rules.tag_points);
            tags.push(Tag {
                tagger: tagger_id,
                runner: runner_id,
            });
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Entity, EntityKind, Side};

    fn rules() -> RulesConfig {
        RulesConfig {
            hit_radius: 30.0,
            ..RulesConfig::default()
        }
    }

    #[test]
    fn test_tag_within_radius() {
        let mut world = WorldState::new();
        world.add_entity(Entity::new(1, EntityKind::Tagger, Side::A, Vec2::new(100.0, 100.0)));
        world.add_entity(Entity::new(101, EntityKind::Runner, Side::B, Vec2::new(110.0, 100.0)));

        let tags = resolve_tags(&mut world, &rules());
        assert_eq!(tags, vec![Tag { tagger: 1, runner: 101 }]);
        assert!(!world.get(101).unwrap().active);
        assert_eq!(world.team_scores[Side::A.index()], rules().tag_points);
    }

    #[test]
    fn test_no_tag_outside_radius() {
        let mut world = WorldState::new();
        world.add_entity(Entity::new(1, EntityKind::Tagger, Side::A, Vec2::new(100.0, 100.0)));
        world.add_entity(Entity::new(101, EntityKind::Runner, Side::B, Vec2::new(131.0, 100.0)));
        assert!(resolve_tags(&mut world, &rules()).is_empty());
        assert!(world.get(101).unwrap().active);
    }

    #[test]
    fn test_runner_tagged_once_by_two_taggers() {
        let mut world = WorldState::new();
        world.add_entity(Entity::new(1, EntityKind::Tagger, Side::A, Vec2::new(100.0, 100.0)));
        world.add_entity(Entity::new(2, EntityKind::Tagger, Side::A, Vec2::new(120.0, 100.0)));
        world.add_entity(Entity::new(101, EntityKind::Runner, Side::B, Vec2::new(110.0, 100.0)));

        let tags = resolve_tags(&mut world, &rules());
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tagger, 1);
        assert_eq!(world.team_scores[Side::A.index()], rules().tag_points);
    }

    #[test]
    fn test_inactive_tagger_cannot_tag() {
        let mut world = WorldState::new();
        let mut tagger = Entity::new(1, EntityKind::Tagger, Side::A, Vec2::new(100.0, 100.0));
        tagger.active = false;
        world.add_entity(tagger);
        world.add_entity(Entity::new(101, EntityKind::Runner, Side::B, Vec2::new(100.0, 100.0)));
        assert!(resolve_tags(&mut world, &rules()).is_empty());
    }
}
