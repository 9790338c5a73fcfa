//! Default tuning values for synchronization and the bundled game rules.
//!
//! Every value here is only a default; `SyncConfig` and `RulesConfig` carry
//! the numbers actually used at runtime.

/// Timing of the cooperative tick loop
pub mod timing {
    /// Nominal frame interval in milliseconds (60 Hz display refresh)
    pub const FRAME_INTERVAL_MS: f32 = 1000.0 / 60.0;
    /// Largest delta-time accepted by one tick, in frame intervals.
    /// A stall longer than this (tab backgrounded) is clamped.
    pub const MAX_FRAME_MULTIPLE: f32 = 3.0;
}

/// Snapshot broadcast and interpolation
pub mod sync {
    /// Minimum time between two snapshot writes (20 Hz)
    pub const THROTTLE_WINDOW_MS: u64 = 50;
    /// Render-time offset for remote entities; outlasts broadcast jitter
    pub const INTERPOLATION_DELAY_MS: u64 = 100;
    /// Samples kept per remote entity
    pub const POSITION_BUFFER_CAPACITY: usize = 10;
    /// Polls before a missing first snapshot surfaces as "not ready"
    pub const SNAPSHOT_WAIT_RETRIES: u32 = 20;
    /// Delay between snapshot polls
    pub const SNAPSHOT_WAIT_INTERVAL_MS: u64 = 100;
    /// Current wire schema of `WorldSnapshot`
    pub const SNAPSHOT_SCHEMA_VERSION: u16 = 2;
}

/// Session lifecycle
pub mod lifecycle {
    /// Participants required before role assignment can start
    pub const MIN_PARTICIPANTS: usize = 2;
    /// Rounds played before the session is finished (two = each side pursues once)
    pub const MAX_ROUNDS: u32 = 2;
    /// Pause between the end of a round and the next setup
    pub const ROUND_TRANSITION_MS: u64 = 3000;
}

/// Pursuit (tag) game defaults
pub mod pursuit {
    pub const FIELD_WIDTH: f32 = 800.0;
    pub const FIELD_HEIGHT: f32 = 600.0;
    /// Entity radius used for bounds clamps
    pub const ENTITY_RADIUS: f32 = 15.0;
    /// Tagger must come within this distance of a runner
    pub const HIT_RADIUS: f32 = 30.0;
    /// Movement speed in units per second
    pub const TAGGER_SPEED: f32 = 190.0;
    pub const RUNNER_SPEED: f32 = 180.0;
    /// Entities spawned per side
    pub const ENTITIES_PER_SIDE: usize = 3;
    /// Round countdown
    pub const ROUND_DURATION_MS: f32 = 60_000.0;
    /// Points for each tag
    pub const TAG_POINTS: u32 = 10;
    /// Points for each runner still active at countdown expiry
    pub const SURVIVAL_POINTS: u32 = 5;
}

/// Timed speed boost
pub mod ability {
    pub const DURATION_MS: f32 = 1500.0;
    pub const COOLDOWN_MS: f32 = 6000.0;
    pub const SPEED_MULTIPLIER: f32 = 1.6;
}

/// Turn-based (marble / jumper) defaults
pub mod turns {
    /// Launch speed in units per second
    pub const LAUNCH_SPEED: f32 = 520.0;
    /// Velocity retained per second (exponential friction)
    pub const FRICTION_PER_SECOND: f32 = 0.35;
    /// Below this speed a launched entity counts as at rest
    pub const REST_SPEED: f32 = 8.0;
    /// Time limit for one turn
    pub const TURN_DURATION_MS: f32 = 10_000.0;
    /// Distance from the checkpoint that counts as reaching it
    pub const CHECKPOINT_RADIUS: f32 = 40.0;
    /// Points for reaching the checkpoint
    pub const CHECKPOINT_POINTS: u32 = 3;
}
