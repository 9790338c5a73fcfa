use crate::game::state::{EntityId, ParticipantId, Role, Side, TurnState};
use crate::lobby::lifecycle::Phase;

/// Why a session stopped for this participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Session data disappeared (host left or session deleted)
    SessionRemoved,
    /// Host data failed validation
    InvalidData(String),
    /// This participant called `leave`
    Left,
}

/// Something the presentation layer may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged { from: Phase, to: Phase },
    RoundChanged { round: u32 },
    TurnChanged { turn: TurnState },
    RoleChanged { side: Side, role: Role },
    OwnershipChanged { entity: EntityId, owner: Option<ParticipantId> },
    ParticipantJoined { participant: ParticipantId },
    ParticipantLeft { participant: ParticipantId, released: Vec<EntityId> },
    EntityTagged { tagger: EntityId, runner: EntityId },
    CheckpointReached { entity: EntityId },
    /// The controlled entity was deactivated by the host
    LocalEntityDeactivated { entity: EntityId },
    SessionEnded { reason: EndReason },
}

/// Callback interface mirroring `SessionEvent`; every method defaults to a no-op
pub trait SessionListener: Send {
    fn on_phase_change(&mut self, _from: Phase, _to: Phase) {}
    fn on_round_change(&mut self, _round: u32) {}
    fn on_turn_change(&mut self, _turn: &TurnState) {}
    fn on_ownership_change(&mut self, _entity: EntityId, _owner: Option<ParticipantId>) {}
    fn on_session_ended(&mut self, _reason: &EndReason) {}
    /// Every event, including the ones without a dedicated callback
    fn on_event(&mut self, _event: &SessionEvent) {}
}

pub(crate) fn dispatch(listeners: &mut [Box<dyn SessionListener>], events: &[SessionEvent]) {
    for listener in listeners.iter_mut() {
        for event in events {
            match event {
                SessionEvent::PhaseChanged { from, to } => listener.on_phase_change(*from, *to),
                SessionEvent::RoundChanged { round } => listener.on_round_change(*round),
                SessionEvent::TurnChanged { turn } => listener.on_turn_change(turn),
                SessionEvent::OwnershipChanged { entity, owner } => {
                    listener.on_ownership_change(*entity, *owner)
                }
                SessionEvent::SessionEnded { reason } => listener.on_session_ended(reason),
                _ => {}
            }
            listener.on_event(event);
        }
    }
}
