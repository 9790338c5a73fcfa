use crate::config::{GameMode, RulesConfig};
use crate::game::state::{Entity, EntityId, EntityKind, Role, Side, WorldState};
use crate::game::systems::turns;
use crate::util::vec2::Vec2;

/// Side B entity ids start above this value; side A uses 1..=n
pub const SIDE_B_ID_OFFSET: EntityId = 100;

/// Entity id of the `index`-th entity of `side` (0-based).
///
/// Ids are stable across rounds so ownership survives a role swap.
pub fn entity_id(side: Side, index: usize) -> EntityId {
    let base = match side {
        Side::A => 0,
        Side::B => SIDE_B_ID_OFFSET,
    };
    base + index as EntityId + 1
}

/// Clear the world and place the entities of `round`.
///
/// In pursuit mode `side_a_role` decides which side spawns taggers; pursuers
/// start on the left, pursued on the right. In turn-based mode every entity is
/// a marble lined up on the start column and the first turn begins.
pub fn spawn_round(world: &mut WorldState, rules: &RulesConfig, round: u32, side_a_role: Role) {
    world.reset_round(round, rules.round_duration_ms);

    let bounds = &rules.bounds;
    let n = rules.entities_per_side;

    match rules.mode {
        GameMode::Pursuit => {
            for side in [Side::A, Side::B] {
                let role = match side {
                    Side::A => side_a_role,
                    Side::B => side_a_role.swapped(),
                };
                let x = match role {
                    Role::Pursuer => bounds.min.x + bounds.width() * 0.2,
                    Role::Pursued => bounds.min.x + bounds.width() * 0.8,
                };
                for i in 0..n {
                    let y = bounds.min.y + bounds.height() * (i + 1) as f32 / (n + 1) as f32;
                    world.add_entity(Entity::new(entity_id(side, i), role.kind(), side, Vec2::new(x, y)));
                }
            }
        }
        GameMode::TurnBased => {
            let x = bounds.min.x + bounds.width() * 0.1;
            let total = n * 2;
            let slots = [Side::A, Side::B]
                .into_iter()
                .flat_map(|side| (0..n).map(move |i| (side, i)));
            for (slot, (side, i)) in slots.enumerate() {
                let y = bounds.min.y + bounds.height() * (slot + 1) as f32 / (total + 1) as f32;
                world.add_entity(Entity::new(entity_id(side, i), EntityKind::Marble, side, Vec2::new(x, y)));
            }
            turns::begin(world, rules);
        }
    }
}
