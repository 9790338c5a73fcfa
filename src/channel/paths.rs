use crate::channel::ChannelPath;
use crate::game::state::{EntityId, ParticipantId};

/// Logical paths of one session on the shared channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    root: ChannelPath,
}

impl SessionPaths {
    pub fn new(session_id: &str) -> Self {
        Self {
            root: ChannelPath::new("session").child(session_id),
        }
    }

    /// The whole session; removed when the host leaves
    pub fn root(&self) -> &ChannelPath {
        &self.root
    }

    /// participant id -> roster entry
    pub fn roster(&self) -> ChannelPath {
        self.root.child("roster")
    }

    pub fn roster_entry(&self, participant: ParticipantId) -> ChannelPath {
        self.roster().child(participant)
    }

    /// Host-written world snapshot
    pub fn snapshot(&self) -> ChannelPath {
        self.root.child("snapshot")
    }

    /// entity id -> owning participant
    pub fn ownership(&self) -> ChannelPath {
        self.root.child("ownership")
    }

    pub fn ownership_entry(&self, entity: EntityId) -> ChannelPath {
        self.ownership().child(entity)
    }

    /// All non-host position relays
    pub fn inputs(&self) -> ChannelPath {
        self.root.child("input")
    }

    pub fn input(&self, participant: ParticipantId) -> ChannelPath {
        self.inputs().child(participant)
    }

    pub fn phase(&self) -> ChannelPath {
        self.root.child("phase")
    }

    pub fn rounds(&self) -> ChannelPath {
        self.root.child("rounds")
    }

    /// Role-assignment seed shared by all participants
    pub fn roles(&self) -> ChannelPath {
        self.root.child("roles")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_paths_live_under_session() {
        let paths = SessionPaths::new("lobby-42");
        let pid = Uuid::new_v4();

        assert_eq!(paths.root().as_str(), "session/lobby-42");
        assert_eq!(paths.ownership_entry(3).as_str(), "session/lobby-42/ownership/3");
        assert_eq!(
            paths.input(pid).as_str(),
            format!("session/lobby-42/input/{}", pid)
        );
        for path in [paths.roster(), paths.snapshot(), paths.phase(), paths.rounds(), paths.roles()] {
            assert!(paths.root().contains(&path));
        }
    }
}
