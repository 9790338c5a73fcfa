//! Entity ownership registry
//!
//! Records live at `ownership/{entityId}` on the shared channel, one per entity.
//! A claim reads the record and writes only if nobody holds it. Reads and writes
//! are not atomic together, so two simultaneous claims can both succeed; the
//! later write wins and the next registry push corrects the loser's cache.

use std::collections::BTreeMap;

use hashbrown::HashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channel::paths::SessionPaths;
use crate::channel::{ChannelError, DisconnectAction, StateChannel};
use crate::game::state::{Controller, EntityId, ParticipantId, WorldState};
use crate::net::protocol::{decode, encode, DecodeError};

/// One record change observed through a registry push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipChange {
    pub entity: EntityId,
    pub previous: Option<ParticipantId>,
    pub current: Option<ParticipantId>,
}

#[derive(Debug, thiserror::Error)]
pub enum OwnershipError {
    #[error("Entity {entity} is already controlled by {holder}")]
    AlreadyControlled {
        entity: EntityId,
        holder: ParticipantId,
    },
    #[error("Entity {entity} is still in play and cannot be abandoned")]
    MustFinishCurrent { entity: EntityId },
    #[error("Entity {entity} is not held by this participant")]
    NotHolder { entity: EntityId },
    #[error("Unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Local view of who controls which entity
#[derive(Debug, Clone)]
pub struct OwnershipRegistry {
    paths: SessionPaths,
    holders: HashMap<EntityId, ParticipantId>,
}

impl OwnershipRegistry {
    pub fn new(paths: SessionPaths) -> Self {
        Self {
            paths,
            holders: HashMap::new(),
        }
    }

    pub fn holder(&self, entity: EntityId) -> Option<ParticipantId> {
        self.holders.get(&entity).copied()
    }

    /// Entity held by `participant` (lowest id if the cache briefly shows more)
    pub fn entity_of(&self, participant: ParticipantId) -> Option<EntityId> {
        self.holders
            .iter()
            .filter(|(_, holder)| **holder == participant)
            .map(|(entity, _)| *entity)
            .min()
    }

    pub fn controller_for(&self, entity: EntityId, me: ParticipantId) -> Controller {
        match self.holder(entity) {
            None => Controller::Bot,
            Some(holder) if holder == me => Controller::LocalPlayer,
            Some(_) => Controller::RemoteHuman,
        }
    }

    /// Holders for which `present` is false, ascending and deduplicated
    pub fn absent_holders(&self, present: impl Fn(ParticipantId) -> bool) -> Vec<ParticipantId> {
        let mut absent: Vec<ParticipantId> = self
            .holders
            .values()
            .copied()
            .filter(|holder| !present(*holder))
            .collect();
        absent.sort();
        absent.dedup();
        absent
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    fn read_holder(
        &self,
        channel: &dyn StateChannel,
        entity: EntityId,
    ) -> Result<Option<ParticipantId>, OwnershipError> {
        let record = channel.read(&self.paths.ownership_entry(entity))?;
        match record {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(decode(value)?)),
        }
    }

    /// Take an unheld entity. Registers a disconnect hook that clears the record.
    pub fn claim(
        &mut self,
        channel: &dyn StateChannel,
        entity: EntityId,
        participant: ParticipantId,
    ) -> Result<(), OwnershipError> {
        match self.read_holder(channel, entity)? {
            Some(holder) if holder != participant => {
                self.holders.insert(entity, holder);
                Err(OwnershipError::AlreadyControlled { entity, holder })
            }
            Some(_) => {
                self.holders.insert(entity, participant);
                Ok(())
            }
            None => {
                let path = self.paths.ownership_entry(entity);
                let value = encode(&participant).map_err(|e| ChannelError::Serialize(e.to_string()))?;
                channel.write(&path, value)?;
                channel.on_disconnect(&path, DisconnectAction::Remove)?;
                self.holders.insert(entity, participant);
                debug!("Participant {} claimed entity {}", participant, entity);
                Ok(())
            }
        }
    }

    /// Give up an entity held by `participant`
    pub fn release(
        &mut self,
        channel: &dyn StateChannel,
        entity: EntityId,
        participant: ParticipantId,
    ) -> Result<(), OwnershipError> {
        match self.read_holder(channel, entity)? {
            Some(holder) if holder != participant => Err(OwnershipError::NotHolder { entity }),
            Some(_) => {
                let path = self.paths.ownership_entry(entity);
                channel.remove(&path)?;
                channel.cancel_on_disconnect(&path)?;
                self.holders.remove(&entity);
                debug!("Participant {} released entity {}", participant, entity);
                Ok(())
            }
            None => {
                self.holders.remove(&entity);
                Ok(())
            }
        }
    }

    /// Switch `participant` to `entity`, releasing whatever it held before.
    ///
    /// An active pursued entity cannot be abandoned. Returns the released
    /// entity, if any.
    pub fn request_control(
        &mut self,
        channel: &dyn StateChannel,
        world: &WorldState,
        entity: EntityId,
        participant: ParticipantId,
    ) -> Result<Option<EntityId>, OwnershipError> {
        if world.get(entity).is_none() {
            return Err(OwnershipError::UnknownEntity(entity));
        }

        let current = self.entity_of(participant);
        if current == Some(entity) {
            return Ok(None);
        }
        if let Some(current) = current {
            if world
                .get(current)
                .is_some_and(|e| e.kind.is_pursued() && e.active)
            {
                return Err(OwnershipError::MustFinishCurrent { entity: current });
            }
        }

        self.claim(channel, entity, participant)?;
        if let Some(previous) = current {
            self.release(channel, previous, participant)?;
        }
        Ok(current)
    }

    /// Host-side removal of a record regardless of holder
    pub fn clear(&mut self, channel: &dyn StateChannel, entity: EntityId) -> Result<(), OwnershipError> {
        channel.remove(&self.paths.ownership_entry(entity))?;
        self.holders.remove(&entity);
        Ok(())
    }

    /// Clear every record held by a departed participant. Returns the freed entities.
    pub fn release_orphans(
        &mut self,
        channel: &dyn StateChannel,
        departed: &[ParticipantId],
    ) -> Vec<EntityId> {
        let mut orphans: Vec<EntityId> = self
            .holders
            .iter()
            .filter(|(_, holder)| departed.contains(holder))
            .map(|(entity, _)| *entity)
            .collect();
        orphans.sort_unstable();

        for entity in &orphans {
            if let Err(e) = self.clear(channel, *entity) {
                warn!("Failed to clear ownership of entity {}: {}", entity, e);
            }
        }
        if !orphans.is_empty() {
            info!("Released {} orphaned entities", orphans.len());
        }
        orphans
    }

    /// Replace the cache with a full registry push and report the differences
    pub fn apply_push(&mut self, value: Option<Value>) -> Result<Vec<OwnershipChange>, DecodeError> {
        let next: BTreeMap<EntityId, ParticipantId> = match value {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(v) => decode(v)?,
        };

        let mut changes: Vec<OwnershipChange> = self
            .holders
            .iter()
            .filter(|(entity, _)| !next.contains_key(entity))
            .map(|(entity, holder)| OwnershipChange {
                entity: *entity,
                previous: Some(*holder),
                current: None,
            })
            .collect();

        for (entity, holder) in &next {
            let previous = self.holder(*entity);
            if previous != Some(*holder) {
                changes.push(OwnershipChange {
                    entity: *entity,
                    previous,
                    current: Some(*holder),
                });
            }
        }
        changes.sort_by_key(|c| c.entity);

        self.holders = next.into_iter().collect();
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::MemoryChannel;
    use crate::game::state::{Entity, EntityKind, Side};
    use crate::util::vec2::Vec2;
    use serde_json::json;
    use uuid::Uuid;

    fn world() -> WorldState {
        let mut world = WorldState::new();
        world.add_entity(Entity::new(1, EntityKind::Tagger, Side::A, Vec2::ZERO));
        world.add_entity(Entity::new(2, EntityKind::Runner, Side::B, Vec2::ZERO));
        world.add_entity(Entity::new(3, EntityKind::Runner, Side::B, Vec2::ZERO));
        world
    }

    #[test]
    fn test_sequential_claims_exclusive() {
        let server = MemoryChannel::new();
        let (alice_client, bob_client) = (server.connect(), server.connect());
        let paths = SessionPaths::new("s1");
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let mut alice_reg = OwnershipRegistry::new(paths.clone());
        let mut bob_reg = OwnershipRegistry::new(paths.clone());

        alice_reg.claim(&alice_client, 1, alice).unwrap();
        match bob_reg.claim(&bob_client, 1, bob) {
            Err(OwnershipError::AlreadyControlled { entity, holder }) => {
                assert_eq!(entity, 1);
                assert_eq!(holder, alice);
            }
            other => panic!("expected AlreadyControlled, got {:?}", other),
        }
        assert_eq!(server.peek(&paths.ownership_entry(1)), Some(json!(alice.to_string())));

        alice_reg.release(&alice_client, 1, alice).unwrap();
        bob_reg.claim(&bob_client, 1, bob).unwrap();
        assert_eq!(bob_reg.holder(1), Some(bob));
    }

    #[test]
    fn test_release_by_non_holder_rejected() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let paths = SessionPaths::new("s1");
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let mut reg = OwnershipRegistry::new(paths);
        reg.claim(&client, 2, alice).unwrap();
        assert!(matches!(
            reg.release(&client, 2, bob),
            Err(OwnershipError::NotHolder { entity: 2 })
        ));
    }

    #[test]
    fn test_active_runner_cannot_switch() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let me = Uuid::new_v4();
        let mut world = world();
        let mut reg = OwnershipRegistry::new(SessionPaths::new("s1"));

        assert_eq!(reg.request_control(&client, &world, 2, me).unwrap(), None);
        assert!(matches!(
            reg.request_control(&client, &world, 3, me),
            Err(OwnershipError::MustFinishCurrent { entity: 2 })
        ));

        // Once tagged the participant may move on
        world.get_mut(2).unwrap().active = false;
        assert_eq!(reg.request_control(&client, &world, 3, me).unwrap(), Some(2));
        assert_eq!(reg.entity_of(me), Some(3));
        assert_eq!(reg.holder(2), None);
    }

    #[test]
    fn test_unknown_entity() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let mut reg = OwnershipRegistry::new(SessionPaths::new("s1"));
        assert!(matches!(
            reg.request_control(&client, &world(), 99, Uuid::new_v4()),
            Err(OwnershipError::UnknownEntity(99))
        ));
    }

    #[test]
    fn test_disconnect_clears_claim() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let paths = SessionPaths::new("s1");
        let mut reg = OwnershipRegistry::new(paths.clone());

        reg.claim(&client, 1, Uuid::new_v4()).unwrap();
        server.drop_connection(client.id());
        assert_eq!(server.peek(&paths.ownership_entry(1)), None);
    }

    #[test]
    fn test_release_orphans() {
        let server = MemoryChannel::new();
        let (host, guest) = (server.connect(), server.connect());
        let paths = SessionPaths::new("s1");
        let (gone, stays) = (Uuid::new_v4(), Uuid::new_v4());

        let mut guest_reg = OwnershipRegistry::new(paths.clone());
        guest_reg.claim(&guest, 1, gone).unwrap();
        guest_reg.claim(&guest, 2, stays).unwrap();

        let mut host_reg = OwnershipRegistry::new(paths.clone());
        host_reg.apply_push(server.peek(&paths.ownership())).unwrap();
        assert_eq!(host_reg.release_orphans(&host, &[gone]), vec![1]);
        assert_eq!(host_reg.holder(1), None);
        assert_eq!(host_reg.holder(2), Some(stays));
        assert_eq!(server.peek(&paths.ownership_entry(1)), None);
    }

    #[test]
    fn test_absent_holders() {
        let mut reg = OwnershipRegistry::new(SessionPaths::new("s1"));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        reg.apply_push(Some(json!({"1": a.to_string(), "2": b.to_string(), "3": b.to_string()})))
            .unwrap();

        assert_eq!(reg.absent_holders(|p| p == a), vec![b]);
        assert!(reg.absent_holders(|_| true).is_empty());
    }

    #[test]
    fn test_apply_push_reports_changes() {
        let mut reg = OwnershipRegistry::new(SessionPaths::new("s1"));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let changes = reg
            .apply_push(Some(json!({"1": a.to_string(), "2": b.to_string()})))
            .unwrap();
        assert_eq!(changes.len(), 2);

        let changes = reg.apply_push(Some(json!({"2": a.to_string()}))).unwrap();
        assert_eq!(
            changes,
            vec![
                OwnershipChange { entity: 1, previous: Some(a), current: None },
                OwnershipChange { entity: 2, previous: Some(b), current: Some(a) },
            ]
        );
        assert_eq!(reg.controller_for(2, a), Controller::LocalPlayer);
        assert_eq!(reg.controller_for(2, b), Controller::RemoteHuman);
        assert_eq!(reg.controller_for(1, a), Controller::Bot);

        assert!(reg.apply_push(None).unwrap().len() == 1);
        assert!(reg.is_empty());
    }
}
