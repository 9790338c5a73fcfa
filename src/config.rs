use serde::{Deserialize, Serialize};

use crate::game::constants::{ability, lifecycle, pursuit, sync, timing, turns};
use crate::util::vec2::{Bounds, Vec2};

/// Which family of game the session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Continuous action: taggers chase runners until all are tagged or time runs out
    #[default]
    Pursuit,
    /// One entity moves at a time (marble shooting, jumping)
    TurnBased,
}

impl std::str::FromStr for GameMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pursuit" | "tag" => Ok(Self::Pursuit),
            "turn_based" | "turns" | "marble" => Ok(Self::TurnBased),
            other => Err(ConfigError::Invalid {
                key: "GAME_MODE",
                value: other.to_string(),
            }),
        }
    }
}

/// Synchronization engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum time between snapshot (and relay) writes
    pub throttle_window_ms: u64,
    /// Render-time offset applied to remote entities
    pub interpolation_delay_ms: u64,
    /// Samples kept per remote entity
    pub buffer_capacity: usize,
    /// Nominal frame interval
    pub frame_interval_ms: f32,
    /// Delta-time clamp, in frame intervals
    pub max_frame_multiple: f32,
    /// Bounded wait for the host's first snapshot
    pub snapshot_wait_retries: u32,
    pub snapshot_wait_interval_ms: u64,
    /// Participants required to leave the waiting phase
    pub min_participants: usize,
    /// Rounds before the session finishes
    pub max_rounds: u32,
    /// Pause between a finished round and the next setup
    pub round_transition_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_window_ms: sync::THROTTLE_WINDOW_MS,
            interpolation_delay_ms: sync::INTERPOLATION_DELAY_MS,
            buffer_capacity: sync::POSITION_BUFFER_CAPACITY,
            frame_interval_ms: timing::FRAME_INTERVAL_MS,
            max_frame_multiple: timing::MAX_FRAME_MULTIPLE,
            snapshot_wait_retries: sync::SNAPSHOT_WAIT_RETRIES,
            snapshot_wait_interval_ms: sync::SNAPSHOT_WAIT_INTERVAL_MS,
            min_participants: lifecycle::MIN_PARTICIPANTS,
            max_rounds: lifecycle::MAX_ROUNDS,
            round_transition_ms: lifecycle::ROUND_TRANSITION_MS,
        }
    }
}

impl SyncConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u64>("SYNC_THROTTLE_MS") {
            config.throttle_window_ms = v;
        }
        if let Some(v) = env_parse::<u64>("SYNC_INTERPOLATION_DELAY_MS") {
            config.interpolation_delay_ms = v;
        }
        if let Some(v) = env_parse::<usize>("SYNC_BUFFER_CAPACITY") {
            config.buffer_capacity = v;
        }
        if let Some(v) = env_parse::<u32>("SYNC_MAX_ROUNDS") {
            config.max_rounds = v;
        }
        if let Some(v) = env_parse::<usize>("SYNC_MIN_PARTICIPANTS") {
            config.min_participants = v;
        }
        if let Some(v) = env_parse::<u64>("SYNC_ROUND_TRANSITION_MS") {
            config.round_transition_ms = v;
        }

        if let Err(e) = config.validate() {
            tracing::warn!("Invalid sync configuration ({}), using defaults", e);
            return Self::default();
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle_window_ms == 0 {
            return Err(ConfigError::OutOfRange("throttle_window_ms must be > 0"));
        }
        if self.buffer_capacity < 2 {
            return Err(ConfigError::OutOfRange("buffer_capacity must be at least 2"));
        }
        if self.frame_interval_ms <= 0.0 || self.max_frame_multiple < 1.0 {
            return Err(ConfigError::OutOfRange(
                "frame interval must be positive and max_frame_multiple >= 1",
            ));
        }
        if self.min_participants == 0 {
            return Err(ConfigError::OutOfRange("min_participants must be at least 1"));
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::OutOfRange("max_rounds must be at least 1"));
        }
        Ok(())
    }

    /// Largest delta-time a single tick may integrate
    pub fn max_delta_ms(&self) -> f32 {
        self.frame_interval_ms * self.max_frame_multiple
    }
}

/// Game-specific parameters consumed by the simulation
#[derive(Debug, Clone)]
pub struct RulesConfig {
    pub mode: GameMode,
    pub bounds: Bounds,
    pub entity_radius: f32,
    pub hit_radius: f32,
    pub tagger_speed: f32,
    pub runner_speed: f32,
    pub entities_per_side: usize,
    pub round_duration_ms: f32,
    pub tag_points: u32,
    pub survival_points: u32,
    pub ability_duration_ms: f32,
    pub ability_cooldown_ms: f32,
    pub ability_speed_multiplier: f32,
    pub launch_speed: f32,
    pub friction_per_second: f32,
    pub rest_speed: f32,
    pub turn_duration_ms: f32,
    pub checkpoint: Vec2,
    pub checkpoint_radius: f32,
    pub checkpoint_points: u32,
}

impl Default for RulesConfig {
    fn default() -> Self {
        let bounds = Bounds::new(pursuit::FIELD_WIDTH, pursuit::FIELD_HEIGHT);
        Self {
            mode: GameMode::Pursuit,
            bounds,
            entity_radius: pursuit::ENTITY_RADIUS,
            hit_radius: pursuit::HIT_RADIUS,
            tagger_speed: pursuit::TAGGER_SPEED,
            runner_speed: pursuit::RUNNER_SPEED,
            entities_per_side: pursuit::ENTITIES_PER_SIDE,
            round_duration_ms: pursuit::ROUND_DURATION_MS,
            tag_points: pursuit::TAG_POINTS,
            survival_points: pursuit::SURVIVAL_POINTS,
            ability_duration_ms: ability::DURATION_MS,
            ability_cooldown_ms: ability::COOLDOWN_MS,
            ability_speed_multiplier: ability::SPEED_MULTIPLIER,
            launch_speed: turns::LAUNCH_SPEED,
            friction_per_second: turns::FRICTION_PER_SECOND,
            rest_speed: turns::REST_SPEED,
            turn_duration_ms: turns::TURN_DURATION_MS,
            checkpoint: Vec2::new(bounds.max.x * 0.85, bounds.center().y),
            checkpoint_radius: turns::CHECKPOINT_RADIUS,
            checkpoint_points: turns::CHECKPOINT_POINTS,
        }
    }
}

impl RulesConfig {
    /// Defaults for the turn-based variant
    pub fn turn_based() -> Self {
        Self {
            mode: GameMode::TurnBased,
            ..Self::default()
        }
    }

    /// Load rules from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut rules = match std::env::var("GAME_MODE") {
            Ok(raw) => match raw.parse::<GameMode>() {
                Ok(GameMode::TurnBased) => Self::turn_based(),
                Ok(GameMode::Pursuit) => Self::default(),
                Err(e) => {
                    tracing::warn!("{}, using pursuit", e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };

        if let Some(v) = env_parse::<f32>("HIT_RADIUS") {
            if v > 0.0 {
                rules.hit_radius = v;
            } else {
                tracing::warn!("HIT_RADIUS must be > 0, using default");
            }
        }
        if let Some(v) = env_parse::<usize>("ENTITIES_PER_SIDE") {
            if (1..=16).contains(&v) {
                rules.entities_per_side = v;
            } else {
                tracing::warn!("ENTITIES_PER_SIDE must be 1-16, using default");
            }
        }
        if let Some(v) = env_parse::<f32>("ROUND_DURATION_MS") {
            if v > 0.0 {
                rules.round_duration_ms = v;
            } else {
                tracing::warn!("ROUND_DURATION_MS must be > 0, using default");
            }
        }

        rules
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("{0}")]
    OutOfRange(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.throttle_window_ms, 50);
        assert_eq!(config.interpolation_delay_ms, 100);
        assert_eq!(config.buffer_capacity, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_delta_is_frame_multiple() {
        let config = SyncConfig::default();
        assert!((config.max_delta_ms() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_rejects_tiny_buffer() {
        let config = SyncConfig {
            buffer_capacity: 1,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(_))));
    }

    #[test]
    fn test_game_mode_parse() {
        assert_eq!("tag".parse::<GameMode>().unwrap(), GameMode::Pursuit);
        assert_eq!("Marble".parse::<GameMode>().unwrap(), GameMode::TurnBased);
        assert!("chess".parse::<GameMode>().is_err());
    }

    #[test]
    fn test_load_or_default() {
        let config = SyncConfig::load_or_default();
        assert!(config.throttle_window_ms > 0);
        let rules = RulesConfig::load_or_default();
        assert!(rules.hit_radius > 0.0);
    }
}
