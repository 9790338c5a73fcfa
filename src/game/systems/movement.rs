use crate::config::RulesConfig;
use crate::game::state::Entity;
use crate::util::vec2::Vec2;

/// Drive a continuous-action entity one step in `direction`.
///
/// Velocity is set outright (no inertia) and the position is clamped to the
/// field. Inactive entities stop.
pub fn steer(entity: &mut Entity, direction: Vec2, dt_ms: f32, rules: &RulesConfig) {
    if !entity.active {
        entity.velocity = Vec2::ZERO;
        return;
    }

    let direction = if direction.length_sq() > 1.0 {
        direction.normalize()
    } else {
        direction
    };
    entity.velocity = direction * entity.speed(rules);
    entity.position += entity.velocity * (dt_ms / 1000.0);
    entity.position = rules.bounds.clamp(entity.position, rules.entity_radius);
}

/// Free flight of a launched marble: exponential friction, wall bounce,
/// velocity snapped to zero below the rest speed.
pub fn glide(entity: &mut Entity, dt_ms: f32, rules: &RulesConfig) {
    if entity.velocity == Vec2::ZERO {
        return;
    }

    let dt = dt_ms / 1000.0;
    let next = entity.position + entity.velocity * dt;
    let clamped = rules.bounds.clamp(next, rules.entity_radius);
    if clamped.x != next.x {
        entity.velocity.x = -entity.velocity.x;
    }
    if clamped.y != next.y {
        entity.velocity.y = -entity.velocity.y;
    }
    entity.position = clamped;

    entity.velocity = entity.velocity * rules.friction_per_second.powf(dt);
    if entity.velocity.length() < rules.rest_speed {
        entity.velocity = Vec2::ZERO;
    }
}
