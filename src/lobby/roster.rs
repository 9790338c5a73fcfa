use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::state::ParticipantId;
use crate::net::protocol::{decode, DecodeError};

/// Participant connection state as seen on the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Connected, not yet ready
    #[default]
    Connected,
    /// Ready for the next round
    Ready,
    /// Playing in the current round
    Playing,
}

/// One roster entry (`session/{id}/roster/{participantId}`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub status: ParticipantStatus,
}

impl RosterEntry {
    pub fn new(name: impl Into<String>, is_host: bool) -> Self {
        Self {
            name: name.into(),
            is_host,
            status: ParticipantStatus::Connected,
        }
    }
}

/// Participants present in the session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    entries: BTreeMap<ParticipantId, RosterEntry>,
}

/// Membership change between two roster pushes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterDiff {
    pub joined: Vec<ParticipantId>,
    pub left: Vec<ParticipantId>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a roster push; absent means an empty roster
    pub fn from_value(value: Option<Value>) -> Result<Self, DecodeError> {
        match value {
            None => Ok(Self::default()),
            Some(v) => Ok(Self { entries: decode(v)? }),
        }
    }

    pub fn insert(&mut self, id: ParticipantId, entry: RosterEntry) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<RosterEntry> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&RosterEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Participant ids in ascending order
    pub fn ids(&self) -> Vec<ParticipantId> {
        self.entries.keys().copied().collect()
    }

    pub fn host(&self) -> Option<ParticipantId> {
        self.entries
            .iter()
            .find(|(_, e)| e.is_host)
            .map(|(id, _)| *id)
    }

    /// Who joined and who left going from `self` to `next`
    pub fn diff(&self, next: &Roster) -> RosterDiff {
        RosterDiff {
            joined: next
                .entries
                .keys()
                .filter(|id| !self.entries.contains_key(id))
                .copied()
                .collect(),
            left: self
                .entries
                .keys()
                .filter(|id| !next.entries.contains_key(id))
                .copied()
                .collect(),
        }
    }
}
