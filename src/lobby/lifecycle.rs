//! Session phase machine
//!
//! Waiting -> RoleAssignment -> ActiveRound -> RoundTransition -> ActiveRound ... -> Finished.
//! The host drives it; other participants mirror the host's `PhaseRecord`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SyncConfig;
use crate::game::state::Timestamp;

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for participants
    #[default]
    Waiting,
    /// Host is partitioning participants into sides
    RoleAssignment,
    /// Round in progress
    ActiveRound,
    /// Short pause between rounds
    RoundTransition,
    /// Session over, results showing
    Finished,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Waiting, RoleAssignment)
                | (RoleAssignment, ActiveRound)
                | (ActiveRound, RoundTransition)
                | (RoundTransition, ActiveRound)
                | (Waiting | RoleAssignment | ActiveRound | RoundTransition, Finished)
        )
    }

    /// Phases in which the host runs the simulation
    pub fn is_simulating(self) -> bool {
        self == Phase::ActiveRound
    }
}

/// Phase plus round counter, written to `session/{id}/phase`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub round: u32,
}

/// What the host should do while in `RoundTransition`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Transition delay not elapsed yet
    Wait,
    /// Set up the given round and return to `ActiveRound`
    SetupRound(u32),
    /// All rounds played
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },
}

/// Phase and round bookkeeping for one participant
#[derive(Debug, Clone)]
pub struct Lifecycle {
    phase: Phase,
    round: u32,
    rounds_completed: u32,
    transition_started: Option<Timestamp>,
    max_rounds: u32,
    transition_ms: u64,
}

impl Lifecycle {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            phase: Phase::Waiting,
            round: 0,
            rounds_completed: 0,
            transition_started: None,
            max_rounds: config.max_rounds,
            transition_ms: config.round_transition_ms,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn rounds_completed(&self) -> u32 {
        self.rounds_completed
    }

    pub fn record(&self) -> PhaseRecord {
        PhaseRecord {
            phase: self.phase,
            round: self.round,
        }
    }

    /// Validated transition; returns the previous phase
    pub fn transition(&mut self, to: Phase) -> Result<Phase, LifecycleError> {
        let from = self.phase;
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        self.phase = to;
        debug!("Phase {:?} -> {:?} (round {})", from, to, self.round);
        Ok(from)
    }

    /// Waiting -> RoleAssignment
    pub fn begin_role_assignment(&mut self) -> Result<Phase, LifecycleError> {
        self.transition(Phase::RoleAssignment)
    }

    /// RoleAssignment or RoundTransition -> ActiveRound. Returns the round now playing.
    pub fn start_round(&mut self) -> Result<u32, LifecycleError> {
        let from = self.transition(Phase::ActiveRound)?;
        if from == Phase::RoleAssignment {
            self.round = 1;
        }
        self.transition_started = None;
        Ok(self.round)
    }

    /// ActiveRound -> RoundTransition. Returns the round that follows, or
    /// `None` after the last one; the counter only advances in the first case.
    pub fn end_round(&mut self, now: Timestamp) -> Result<Option<u32>, LifecycleError> {
        self.transition(Phase::RoundTransition)?;
        self.rounds_completed += 1;
        self.transition_started = Some(now);
        if self.rounds_completed >= self.max_rounds {
            return Ok(None);
        }
        self.round += 1;
        Ok(Some(self.round))
    }

    pub fn next_step(&self, now: Timestamp) -> NextStep {
        let Some(started) = self.transition_started else {
            return NextStep::Wait;
        };
        if self.phase != Phase::RoundTransition
            || now.saturating_sub(started) < self.transition_ms
        {
            return NextStep::Wait;
        }
        if self.rounds_completed >= self.max_rounds {
            NextStep::Finish
        } else {
            NextStep::SetupRound(self.round)
        }
    }

    /// Any phase -> Finished. Returns the previous phase, or None if already finished.
    pub fn finish(&mut self) -> Option<Phase> {
        if self.phase == Phase::Finished {
            return None;
        }
        let from = self.phase;
        self.phase = Phase::Finished;
        self.transition_started = None;
        debug!("Phase {:?} -> Finished after {} rounds", from, self.rounds_completed);
        Some(from)
    }

    /// Adopt the host's record. Returns `(from, to)` if the phase changed.
    pub fn mirror(&mut self, record: PhaseRecord) -> Option<(Phase, Phase)> {
        self.round = record.round;
        if record.phase == self.phase {
            return None;
        }
        if record.phase == Phase::RoundTransition {
            self.rounds_completed += 1;
        }
        if !self.phase.can_transition_to(record.phase) {
            // Skipped intermediate phases; the host's record wins
            debug!("Mirroring {:?} -> {:?}", self.phase, record.phase);
        }
        let from = self.phase;
        self.phase = record.phase;
        Some((from, record.phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle() -> Lifecycle {
        let config = SyncConfig {
            max_rounds: 2,
            round_transition_ms: 3000,
            ..SyncConfig::default()
        };
        Lifecycle::new(&config)
    }

    #[test]
    fn test_full_session_path() {
        let mut lc = lifecycle();
        assert_eq!(lc.phase(), Phase::Waiting);

        lc.begin_role_assignment().unwrap();
        assert_eq!(lc.start_round().unwrap(), 1);

        assert_eq!(lc.end_round(10_000).unwrap(), Some(2));
        assert_eq!(lc.phase(), Phase::RoundTransition);
        assert_eq!(lc.next_step(12_999), NextStep::Wait);
        assert_eq!(lc.next_step(13_000), NextStep::SetupRound(2));

        assert_eq!(lc.start_round().unwrap(), 2);
        // Last round: no round 3 is announced
        assert_eq!(lc.end_round(20_000).unwrap(), None);
        assert_eq!(lc.round(), 2);
        assert_eq!(lc.next_step(22_999), NextStep::Wait);
        assert_eq!(lc.next_step(23_000), NextStep::Finish);
        assert_eq!(lc.finish(), Some(Phase::RoundTransition));
        assert_eq!(lc.phase(), Phase::Finished);
        assert_eq!(lc.rounds_completed(), 2);
    }

    #[test]
    fn test_end_round_increments_once() {
        let mut lc = lifecycle();
        lc.begin_role_assignment().unwrap();
        lc.start_round().unwrap();
        lc.end_round(0).unwrap();
        // A second terminal observation in the same transition is rejected
        assert!(lc.end_round(0).is_err());
        assert_eq!(lc.round(), 2);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut lc = lifecycle();
        assert_eq!(
            lc.transition(Phase::ActiveRound),
            Err(LifecycleError::InvalidTransition {
                from: Phase::Waiting,
                to: Phase::ActiveRound
            })
        );
        assert!(lc.start_round().is_err());
        assert!(lc.end_round(0).is_err());
    }

    #[test]
    fn test_finish_from_anywhere_once() {
        let mut lc = lifecycle();
        assert_eq!(lc.finish(), Some(Phase::Waiting));
        assert_eq!(lc.finish(), None);
        assert!(!Phase::Finished.can_transition_to(Phase::ActiveRound));
    }

    #[test]
    fn test_mirror_reports_changes_only() {
        let mut lc = lifecycle();
        let record = PhaseRecord { phase: Phase::ActiveRound, round: 1 };
        assert_eq!(lc.mirror(record), Some((Phase::Waiting, Phase::ActiveRound)));
        assert_eq!(lc.mirror(record), None);
        assert_eq!(lc.round(), 1);

        let next = PhaseRecord { phase: Phase::RoundTransition, round: 2 };
        assert_eq!(lc.mirror(next), Some((Phase::ActiveRound, Phase::RoundTransition)));
        assert_eq!(lc.rounds_completed(), 1);
    }
}
