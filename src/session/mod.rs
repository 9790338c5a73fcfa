//! Participant-side session facade
//!
//! One `SyncSession` per participant. The host runs the simulation and
//! publishes; everyone else mirrors snapshots and relays their own entity.
//! The presentation layer calls `poll` to drain channel pushes, `tick` once per
//! frame and `render_frame` to get drawable positions. All three are
//! synchronous; only `wait_for_snapshot` awaits.

pub mod events;
pub mod view;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::paths::SessionPaths;
use crate::channel::{ChannelError, ChannelPath, DisconnectAction, StateChannel, Subscription};
use crate::config::{ConfigError, GameMode, RulesConfig, SyncConfig};
use crate::game::authority::{RoundEnd, SimulationAuthority};
use crate::game::input::InputState;
use crate::game::position_buffer::PositionBuffers;
use crate::game::state::{Controller, EntityId, ParticipantId, Role, Side, Timestamp, WorldState};
use crate::game::systems::spawn::spawn_round;
use crate::lobby::lifecycle::{Lifecycle, LifecycleError, NextStep, Phase, PhaseRecord};
use crate::lobby::ownership::{OwnershipChange, OwnershipError, OwnershipRegistry};
use crate::lobby::roles::{RoleSeed, RoleTable};
use crate::lobby::roster::{Roster, RosterEntry};
use crate::metrics::SyncMetrics;
use crate::net::broadcaster::StateBroadcaster;
use crate::net::protocol::{decode, decode_snapshot, encode, DecodeError, EncodeError};
use crate::net::receiver::SnapshotReceiver;
use crate::net::relay::{apply_relay, RelayInbox, RelaySender};

pub use events::{EndReason, SessionEvent, SessionListener};
pub use view::RenderEntity;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(String),
    #[error("Only the host can {0}")]
    NotHost(&'static str),
    #[error("Need {need} participants to start, have {have}")]
    NotEnoughParticipants { have: usize, need: usize },
    #[error("No snapshot received after {retries} retries")]
    NotReady { retries: u32 },
    #[error("Session has ended")]
    Ended,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Result of one round, written to `rounds/{round}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub team_scores: [u32; 2],
    pub reason: RoundEnd,
}

struct Subscriptions {
    roster: Subscription,
    ownership: Subscription,
    /// Host only
    inputs: Option<Subscription>,
    /// Non-host only
    snapshot: Option<Subscription>,
    phase: Option<Subscription>,
    roles: Option<Subscription>,
}

impl Subscriptions {
    fn open(channel: &dyn StateChannel, paths: &SessionPaths, is_host: bool) -> Self {
        let guest = |path: ChannelPath| (!is_host).then(|| channel.subscribe(&path));
        Self {
            roster: channel.subscribe(&paths.roster()),
            ownership: channel.subscribe(&paths.ownership()),
            inputs: is_host.then(|| channel.subscribe(&paths.inputs())),
            snapshot: guest(paths.snapshot()),
            phase: guest(paths.phase()),
            roles: guest(paths.roles()),
        }
    }

    fn close(self, channel: &dyn StateChannel) {
        channel.unsubscribe(self.roster);
        channel.unsubscribe(self.ownership);
        for sub in [self.inputs, self.snapshot, self.phase, self.roles].into_iter().flatten() {
            channel.unsubscribe(sub);
        }
    }
}

pub struct SyncSession {
    session_id: String,
    me: ParticipantId,
    is_host: bool,
    paths: SessionPaths,
    channel: Arc<dyn StateChannel>,
    config: SyncConfig,

    roster: Roster,
    roles: Option<RoleTable>,
    lifecycle: Lifecycle,
    world: WorldState,
    ownership: OwnershipRegistry,

    authority: SimulationAuthority,
    broadcaster: StateBroadcaster,
    receiver: SnapshotReceiver,
    relay_sender: RelaySender,
    relay_inbox: RelayInbox,
    buffers: PositionBuffers,

    subs: Option<Subscriptions>,
    listeners: Vec<Box<dyn SessionListener>>,
    metrics: Arc<SyncMetrics>,
    seen_roster: bool,
    seen_phase: bool,
    ended: Option<EndReason>,
}

impl SyncSession {
    /// Create a session and become its host.
    ///
    /// Registers a disconnect hook that deletes the whole session.
    pub fn host(
        channel: Arc<dyn StateChannel>,
        session_id: &str,
        name: &str,
        config: SyncConfig,
        rules: RulesConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let me = Uuid::new_v4();
        let paths = SessionPaths::new(session_id);

        let entry = RosterEntry::new(name, true);
        channel.write(&paths.roster_entry(me), encode(&entry)?)?;
        channel.on_disconnect(paths.root(), DisconnectAction::Remove)?;
        channel.write(&paths.phase(), encode(&PhaseRecord::default())?)?;

        let mut session = Self::build(channel, session_id, me, true, paths, config, rules);
        session.roster.insert(me, entry);
        info!("Hosting session {} as {} ({})", session_id, name, me);
        Ok(session)
    }

    /// Join an existing session.
    ///
    /// Registers a disconnect hook that removes this participant's roster entry.
    pub fn join(
        channel: Arc<dyn StateChannel>,
        session_id: &str,
        name: &str,
        config: SyncConfig,
        rules: RulesConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let me = Uuid::new_v4();
        let paths = SessionPaths::new(session_id);

        let roster = Roster::from_value(channel.read(&paths.roster())?)?;
        if roster.host().is_none() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        let entry_path = paths.roster_entry(me);
        channel.write(&entry_path, encode(&RosterEntry::new(name, false))?)?;
        channel.on_disconnect(&entry_path, DisconnectAction::Remove)?;
        channel.on_disconnect(&paths.input(me), DisconnectAction::Remove)?;

        info!("Joined session {} as {} ({})", session_id, name, me);
        Ok(Self::build(channel, session_id, me, false, paths, config, rules))
    }

    fn build(
        channel: Arc<dyn StateChannel>,
        session_id: &str,
        me: ParticipantId,
        is_host: bool,
        paths: SessionPaths,
        config: SyncConfig,
        rules: RulesConfig,
    ) -> Self {
        let metrics = Arc::new(SyncMetrics::new());
        let subs = Subscriptions::open(channel.as_ref(), &paths, is_host);
        Self {
            session_id: session_id.to_string(),
            me,
            is_host,
            lifecycle: Lifecycle::new(&config),
            world: WorldState::new(),
            roster: Roster::new(),
            roles: None,
            ownership: OwnershipRegistry::new(paths.clone()),
            authority: SimulationAuthority::new(rules, &config),
            broadcaster: StateBroadcaster::new(paths.snapshot(), config.throttle_window_ms, metrics.clone()),
            receiver: SnapshotReceiver::new(metrics.clone()),
            relay_sender: RelaySender::new(paths.input(me), config.throttle_window_ms, metrics.clone()),
            relay_inbox: RelayInbox::new(),
            buffers: PositionBuffers::new(config.buffer_capacity),
            subs: Some(subs),
            listeners: Vec::new(),
            metrics,
            seen_roster: false,
            seen_phase: false,
            ended: None,
            paths,
            channel,
            config,
        }
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.me
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    pub fn round(&self) -> u32 {
        self.lifecycle.round()
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn roles(&self) -> Option<&RoleTable> {
        self.roles.as_ref()
    }

    pub fn ownership(&self) -> &OwnershipRegistry {
        &self.ownership
    }

    pub fn metrics(&self) -> Arc<SyncMetrics> {
        self.metrics.clone()
    }

    pub fn ended(&self) -> Option<&EndReason> {
        self.ended.as_ref()
    }

    /// Entity this participant currently controls
    pub fn controlled_entity(&self) -> Option<EntityId> {
        self.ownership.entity_of(self.me)
    }

    /// This participant's side and role in the current round
    pub fn my_role(&self) -> Option<(Side, Role)> {
        let roles = self.roles.as_ref()?;
        let side = roles.side_of(self.me)?;
        Some((side, roles.role_for(side, self.lifecycle.round().max(1))))
    }

    #[cfg(test)]
    pub(crate) fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    pub fn add_listener(&mut self, listener: Box<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    /// Host: assign roles and set up the first round
    pub fn start(&mut self, now: Timestamp) -> Result<Vec<SessionEvent>, SessionError> {
        if !self.is_host {
            return Err(SessionError::NotHost("start the session"));
        }
        if self.ended.is_some() {
            return Err(SessionError::Ended);
        }
        let (have, need) = (self.roster.len(), self.config.min_participants);
        if have < need {
            return Err(SessionError::NotEnoughParticipants { have, need });
        }

        let mut events = Vec::new();
        let from = self.lifecycle.begin_role_assignment()?;
        events.push(SessionEvent::PhaseChanged {
            from,
            to: Phase::RoleAssignment,
        });
        self.write_phase();

        let seed = RoleSeed::generate(&self.roster.ids());
        self.channel.write(&self.paths.roles(), encode(&seed)?)?;
        self.roles = Some(RoleTable::from_seed(&seed));

        self.enter_round(now, &mut events)?;
        info!(
            "Session {} started with {} participants",
            self.session_id,
            self.roster.len()
        );
        Ok(self.emit(events))
    }

    /// Take control of `entity`, releasing the one held before
    pub fn claim(&mut self, entity: EntityId) -> Result<Vec<SessionEvent>, SessionError> {
        if self.ended.is_some() {
            return Err(SessionError::Ended);
        }
        if self.controlled_entity() == Some(entity) {
            return Ok(Vec::new());
        }

        let result = self
            .ownership
            .request_control(self.channel.as_ref(), &self.world, entity, self.me);
        let released = match result {
            Ok(released) => released,
            Err(e) => {
                SyncMetrics::incr(&self.metrics.claims_rejected);
                debug!("Claim of entity {} rejected: {}", entity, e);
                return Err(e.into());
            }
        };
        SyncMetrics::incr(&self.metrics.claims_granted);

        let mut events = Vec::new();
        if let Some(previous) = released {
            self.buffers.clear(previous);
            events.push(SessionEvent::OwnershipChanged {
                entity: previous,
                owner: None,
            });
        }
        self.buffers.clear(entity);
        events.push(SessionEvent::OwnershipChanged {
            entity,
            owner: Some(self.me),
        });
        self.refresh_controllers();
        Ok(self.emit(events))
    }

    /// Hand the controlled entity back to the AI
    pub fn release(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        let Some(entity) = self.controlled_entity() else {
            return Ok(Vec::new());
        };
        if self
            .world
            .get(entity)
            .is_some_and(|e| e.kind.is_pursued() && e.active)
        {
            return Err(OwnershipError::MustFinishCurrent { entity }.into());
        }

        self.ownership.release(self.channel.as_ref(), entity, self.me)?;
        self.buffers.clear(entity);
        self.refresh_controllers();
        Ok(self.emit(vec![SessionEvent::OwnershipChanged {
            entity,
            owner: None,
        }]))
    }

    /// Leave explicitly. The host deletes the session; others remove their
    /// roster entry and any ownership record.
    pub fn leave(&mut self) -> Vec<SessionEvent> {
        if self.ended.is_some() {
            return Vec::new();
        }

        let channel = self.channel.clone();
        if self.is_host {
            self.fire("session removal", channel.remove(self.paths.root()));
            self.fire("hook cancel", channel.cancel_on_disconnect(self.paths.root()));
        } else {
            if let Some(entity) = self.controlled_entity() {
                if let Err(e) = self.ownership.release(channel.as_ref(), entity, self.me) {
                    warn!("Failed to release entity {} on leave: {}", entity, e);
                }
            }
            let entry = self.paths.roster_entry(self.me);
            let input = self.paths.input(self.me);
            self.fire("roster removal", channel.remove(&entry));
            self.fire("relay removal", channel.remove(&input));
            self.fire("hook cancel", channel.cancel_on_disconnect(&entry));
            self.fire("hook cancel", channel.cancel_on_disconnect(&input));
        }

        let mut events = Vec::new();
        self.end(EndReason::Left, &mut events);
        self.emit(events)
    }

    /// Drain every pending channel push
    pub fn poll(&mut self, now: Timestamp) -> Vec<SessionEvent> {
        if self.ended.is_some() {
            return Vec::new();
        }
        let mut events = Vec::new();

        if self.is_host {
            // Claims first, so departures in the same batch see them
            self.poll_ownership(&mut events);
            self.poll_roster(now, &mut events);
            self.release_absent_holders(&mut events);
            self.poll_inputs(now);
        } else {
            self.poll_roster(now, &mut events);
            if self.ended.is_none() {
                self.poll_roles(&mut events);
                self.poll_phase(&mut events);
            }
            if self.ended.is_none() {
                self.poll_ownership(&mut events);
                self.poll_snapshot(now, &mut events);
            }
        }

        self.refresh_controllers();
        self.emit(events)
    }

    /// One frame of simulation
    pub fn tick(&mut self, now: Timestamp, input: &InputState) -> Vec<SessionEvent> {
        if self.ended.is_some() {
            return Vec::new();
        }
        let started = Instant::now();
        let mut events = Vec::new();

        self.refresh_controllers();
        if self.is_host {
            self.host_tick(now, input, &mut events);
        } else {
            self.guest_tick(now, input);
        }

        self.metrics.record_tick_time(started.elapsed());
        self.emit(events)
    }

    /// Drawable state of every entity at local time `now`
    pub fn render_frame(&self, now: Timestamp) -> Vec<RenderEntity> {
        let delay = self.config.interpolation_delay_ms;
        let render_time = if self.is_host {
            now.saturating_sub(delay)
        } else {
            self.receiver.host_time(now).saturating_sub(delay)
        };

        self.world
            .sorted_ids()
            .into_iter()
            .filter_map(|id| self.world.get(id))
            .map(|e| {
                let interpolated = match (self.is_host, e.controller) {
                    (_, Controller::LocalPlayer) | (true, Controller::Bot) => false,
                    _ => true,
                };
                let position = if interpolated {
                    self.buffers.sample(e.id, render_time).unwrap_or(e.position)
                } else {
                    e.position
                };
                RenderEntity {
                    id: e.id,
                    kind: e.kind,
                    side: e.side,
                    position,
                    controller: e.controller,
                    active: e.active,
                    boosted: e.ability.is_active(),
                    launched: e.launched,
                    reached_checkpoint: e.reached_checkpoint,
                }
            })
            .collect()
    }

    /// Poll until the first snapshot has been applied, sleeping between attempts.
    ///
    /// `clock` supplies local timestamps on the same clock passed to `poll`.
    pub async fn wait_for_snapshot(
        &mut self,
        clock: impl Fn() -> Timestamp,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let retries = self.config.snapshot_wait_retries;
        let interval = Duration::from_millis(self.config.snapshot_wait_interval_ms);
        let mut events = Vec::new();

        for attempt in 0..=retries {
            events.extend(self.poll(clock()));
            if self.ended.is_some() {
                return Err(SessionError::Ended);
            }
            if self.is_host || self.receiver.has_snapshot() {
                return Ok(events);
            }
            if attempt < retries {
                tokio::time::sleep(interval).await;
            }
        }
        warn!("No snapshot for session {} after {} retries", self.session_id, retries);
        Err(SessionError::NotReady { retries })
    }

    fn emit(&mut self, batch: Vec<SessionEvent>) -> Vec<SessionEvent> {
        events::dispatch(&mut self.listeners, &batch);
        batch
    }

    fn end(&mut self, reason: EndReason, events: &mut Vec<SessionEvent>) {
        info!("Session {} ended: {:?}", self.session_id, reason);
        self.ended = Some(reason.clone());
        if let Some(subs) = self.subs.take() {
            subs.close(self.channel.as_ref());
        }
        events.push(SessionEvent::SessionEnded { reason });
    }

    /// Log and count a failed fire-and-forget write
    fn fire(&self, what: &str, result: Result<(), ChannelError>) {
        if let Err(e) = result {
            warn!("Write ({}) failed: {}", what, e);
            SyncMetrics::incr(&self.metrics.write_failures);
        }
    }

    fn write_phase(&self) {
        let result = encode(&self.lifecycle.record())
            .map_err(|e| ChannelError::Serialize(e.to_string()))
            .and_then(|value| self.channel.write(&self.paths.phase(), value));
        self.fire("phase", result);
    }

    fn refresh_controllers(&mut self) {
        for (id, entity) in self.world.entities.iter_mut() {
            entity.controller = self.ownership.controller_for(*id, self.me);
        }
    }

    fn role_event(&self) -> Option<SessionEvent> {
        if self.authority.rules().mode != GameMode::Pursuit {
            return None;
        }
        self.my_role()
            .map(|(side, role)| SessionEvent::RoleChanged { side, role })
    }

    fn drain(sub: Option<&Subscription>) -> Vec<Option<Value>> {
        sub.map(Subscription::drain).unwrap_or_default()
    }

    // --- host ---

    fn host_tick(&mut self, now: Timestamp, input: &InputState, events: &mut Vec<SessionEvent>) {
        match self.lifecycle.phase() {
            Phase::ActiveRound => {
                let report = self.authority.host_tick(&mut self.world, now, input);
                for tag in &report.tags {
                    SyncMetrics::incr(&self.metrics.entities_tagged);
                    events.push(SessionEvent::EntityTagged {
                        tagger: tag.tagger,
                        runner: tag.runner,
                    });
                }
                for &entity in &report.checkpoints {
                    events.push(SessionEvent::CheckpointReached { entity });
                }
                if let Some(turn) = report.turn_changed {
                    events.push(SessionEvent::TurnChanged { turn });
                }
                match report.round_end {
                    Some(end) => self.end_round(now, end, events),
                    None => {
                        self.broadcaster
                            .publish(self.channel.as_ref(), &mut self.world, Phase::ActiveRound, now);
                    }
                }
            }
            Phase::RoundTransition => match self.lifecycle.next_step(now) {
                NextStep::Wait => {
                    self.broadcaster
                        .publish(self.channel.as_ref(), &mut self.world, Phase::RoundTransition, now);
                }
                NextStep::SetupRound(_) => {
                    if let Err(e) = self.enter_round(now, events) {
                        warn!("Failed to set up next round: {}", e);
                    }
                }
                NextStep::Finish => self.finish(now, events),
            },
            Phase::Waiting | Phase::RoleAssignment | Phase::Finished => {}
        }
    }

    fn enter_round(&mut self, now: Timestamp, events: &mut Vec<SessionEvent>) -> Result<(), SessionError> {
        let from = self.lifecycle.phase();
        let round = self.lifecycle.start_round()?;
        let previous_round = self.world.round;

        let side_a_role = self
            .roles
            .as_ref()
            .map_or(Role::Pursuer, |roles| roles.role_for(Side::A, round));
        spawn_round(&mut self.world, self.authority.rules(), round, side_a_role);
        self.buffers.clear_all();
        self.refresh_controllers();

        events.push(SessionEvent::PhaseChanged {
            from,
            to: Phase::ActiveRound,
        });
        if previous_round != round {
            events.push(SessionEvent::RoundChanged { round });
            events.extend(self.role_event());
        }
        if let Some(turn) = self.world.turn {
            events.push(SessionEvent::TurnChanged { turn });
        }
        debug!("Round {} set up with {} entities", round, self.world.entities.len());

        self.write_phase();
        self.broadcaster
            .flush(self.channel.as_ref(), &mut self.world, Phase::ActiveRound, now);
        Ok(())
    }

    fn end_round(&mut self, now: Timestamp, reason: RoundEnd, events: &mut Vec<SessionEvent>) {
        SyncMetrics::incr(&self.metrics.rounds_completed);
        let completed = self.world.round;
        let summary = RoundSummary {
            round: completed,
            team_scores: self.world.team_scores,
            reason,
        };
        let result = encode(&summary)
            .map_err(|e| ChannelError::Serialize(e.to_string()))
            .and_then(|value| {
                self.channel
                    .write(&self.paths.rounds().child(completed), value)
            });
        self.fire("round summary", result);

        let next = match self.lifecycle.end_round(now) {
            Ok(next) => next,
            Err(e) => {
                warn!("Round end ignored: {}", e);
                return;
            }
        };
        info!(
            "Round {} over ({:?}), scores {:?}",
            completed, reason, self.world.team_scores
        );

        events.push(SessionEvent::PhaseChanged {
            from: Phase::ActiveRound,
            to: Phase::RoundTransition,
        });
        // The last round has no successor to announce
        if let Some(next) = next {
            self.world.round = next;
            events.push(SessionEvent::RoundChanged { round: next });
            events.extend(self.role_event());
        }

        self.write_phase();
        self.broadcaster
            .flush(self.channel.as_ref(), &mut self.world, Phase::RoundTransition, now);
    }

    fn finish(&mut self, now: Timestamp, events: &mut Vec<SessionEvent>) {
        let Some(from) = self.lifecycle.finish() else {
            return;
        };
        info!(
            "Session {} finished after {} rounds, scores {:?}",
            self.session_id,
            self.lifecycle.rounds_completed(),
            self.world.team_scores
        );
        events.push(SessionEvent::PhaseChanged {
            from,
            to: Phase::Finished,
        });
        self.write_phase();
        self.broadcaster
            .flush(self.channel.as_ref(), &mut self.world, Phase::Finished, now);
    }

    fn poll_inputs(&mut self, now: Timestamp) {
        let values = Self::drain(self.subs.as_ref().and_then(|s| s.inputs.as_ref()));
        for value in values {
            let fresh = match self.relay_inbox.accept(value) {
                Ok(fresh) => fresh,
                Err(e) => {
                    SyncMetrics::incr(&self.metrics.decode_errors);
                    warn!("Malformed relay subtree: {}", e);
                    continue;
                }
            };
            for (sender, relay) in fresh {
                let applied = apply_relay(
                    &mut self.world,
                    &mut self.buffers,
                    &self.ownership,
                    self.authority.rules(),
                    sender,
                    &relay,
                    now,
                );
                if applied {
                    SyncMetrics::incr(&self.metrics.relays_applied);
                }
            }
        }
    }

    // --- everyone ---

    fn poll_roster(&mut self, now: Timestamp, events: &mut Vec<SessionEvent>) {
        let values = Self::drain(self.subs.as_ref().map(|s| &s.roster));
        for value in values {
            if value.is_none() {
                if self.seen_roster {
                    self.end(EndReason::SessionRemoved, events);
                    return;
                }
                continue;
            }
            let next = match Roster::from_value(value) {
                Ok(roster) => roster,
                Err(e) => {
                    SyncMetrics::incr(&self.metrics.decode_errors);
                    warn!("Malformed roster: {}", e);
                    continue;
                }
            };
            self.seen_roster = true;

            let diff = self.roster.diff(&next);
            self.roster = next;
            for participant in diff.joined {
                if participant != self.me {
                    events.push(SessionEvent::ParticipantJoined { participant });
                }
            }
            if !diff.left.is_empty() {
                self.handle_departures(&diff.left, now, events);
            }
        }
    }

    fn handle_departures(&mut self, left: &[ParticipantId], now: Timestamp, events: &mut Vec<SessionEvent>) {
        for &participant in left {
            let released = if self.is_host {
                self.relay_inbox.forget(participant);
                self.ownership
                    .release_orphans(self.channel.as_ref(), &[participant])
            } else {
                Vec::new()
            };
            for &entity in &released {
                SyncMetrics::incr(&self.metrics.orphans_released);
                self.buffers.clear(entity);
            }
            info!("Participant {} left, released {:?}", participant, released);
            events.push(SessionEvent::ParticipantLeft {
                participant,
                released: released.clone(),
            });
            for entity in released {
                events.push(SessionEvent::OwnershipChanged { entity, owner: None });
            }
        }

        let in_play = matches!(
            self.lifecycle.phase(),
            Phase::RoleAssignment | Phase::ActiveRound | Phase::RoundTransition
        );
        if self.is_host && in_play && self.roster.len() < self.config.min_participants {
            warn!(
                "Only {} participants left, finishing session {}",
                self.roster.len(),
                self.session_id
            );
            self.finish(now, events);
        }
    }

    /// Host only: free entities whose holder is not in the roster. Covers
    /// claims written after their author's roster entry was already gone.
    fn release_absent_holders(&mut self, events: &mut Vec<SessionEvent>) {
        if !self.seen_roster || self.ended.is_some() {
            return;
        }
        let absent = self.ownership.absent_holders(|p| self.roster.contains(p));
        if absent.is_empty() {
            return;
        }
        let released = self.ownership.release_orphans(self.channel.as_ref(), &absent);
        info!("Holders {:?} not in roster, released {:?}", absent, released);
        for entity in released {
            SyncMetrics::incr(&self.metrics.orphans_released);
            self.buffers.clear(entity);
            events.push(SessionEvent::OwnershipChanged { entity, owner: None });
        }
    }

    fn poll_ownership(&mut self, events: &mut Vec<SessionEvent>) {
        let values = Self::drain(self.subs.as_ref().map(|s| &s.ownership));
        for value in values {
            match self.ownership.apply_push(value) {
                Ok(changes) => {
                    for change in changes {
                        self.note_ownership(change, events);
                    }
                }
                Err(e) => {
                    SyncMetrics::incr(&self.metrics.decode_errors);
                    warn!("Malformed ownership registry: {}", e);
                }
            }
        }
    }

    fn note_ownership(&mut self, change: OwnershipChange, events: &mut Vec<SessionEvent>) {
        // Control changed hands; old samples belong to a different driver
        self.buffers.clear(change.entity);
        events.push(SessionEvent::OwnershipChanged {
            entity: change.entity,
            owner: change.current,
        });
    }

    // --- non-host ---

    fn poll_roles(&mut self, events: &mut Vec<SessionEvent>) {
        let values = Self::drain(self.subs.as_ref().and_then(|s| s.roles.as_ref()));
        for value in values.into_iter().flatten() {
            match decode::<RoleSeed>(value) {
                Ok(seed) => {
                    self.roles = Some(RoleTable::from_seed(&seed));
                    events.extend(self.role_event());
                }
                Err(e) => {
                    SyncMetrics::incr(&self.metrics.decode_errors);
                    warn!("Malformed role seed: {}", e);
                }
            }
        }
    }

    fn poll_phase(&mut self, events: &mut Vec<SessionEvent>) {
        let values = Self::drain(self.subs.as_ref().and_then(|s| s.phase.as_ref()));
        for value in values {
            let Some(value) = value else {
                if self.seen_phase {
                    self.end(EndReason::SessionRemoved, events);
                    return;
                }
                continue;
            };
            self.seen_phase = true;
            match decode::<PhaseRecord>(value) {
                Ok(record) => self.mirror_phase(record, events),
                Err(e) => {
                    SyncMetrics::incr(&self.metrics.decode_errors);
                    warn!("Malformed phase record: {}", e);
                }
            }
        }
    }

    fn mirror_phase(&mut self, record: PhaseRecord, events: &mut Vec<SessionEvent>) {
        if let Some((from, to)) = self.lifecycle.mirror(record) {
            events.push(SessionEvent::PhaseChanged { from, to });
        }
    }

    fn poll_snapshot(&mut self, now: Timestamp, events: &mut Vec<SessionEvent>) {
        let values = Self::drain(self.subs.as_ref().and_then(|s| s.snapshot.as_ref()));
        for value in values {
            let Some(value) = value else {
                if self.receiver.has_snapshot() {
                    self.end(EndReason::SessionRemoved, events);
                    return;
                }
                continue;
            };
            let snapshot = match decode_snapshot(value) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    SyncMetrics::incr(&self.metrics.decode_errors);
                    warn!("Rejecting snapshot: {}", e);
                    self.end(EndReason::InvalidData(e.to_string()), events);
                    return;
                }
            };

            let local = self.controlled_entity();
            let outcome = self
                .receiver
                .apply(&snapshot, &mut self.world, &mut self.buffers, local, now);
            if !outcome.applied {
                continue;
            }

            self.mirror_phase(
                PhaseRecord {
                    phase: snapshot.phase,
                    round: snapshot.round,
                },
                events,
            );
            if let Some(round) = outcome.round_changed {
                events.push(SessionEvent::RoundChanged { round });
                events.extend(self.role_event());
            }
            if let Some(turn) = outcome.turn_changed {
                events.push(SessionEvent::TurnChanged { turn });
            }
            if let Some(entity) = outcome.local_deactivated {
                events.push(SessionEvent::LocalEntityDeactivated { entity });
            }
        }
    }

    fn guest_tick(&mut self, now: Timestamp, input: &InputState) {
        if self.lifecycle.phase() != Phase::ActiveRound {
            return;
        }
        let owned = self.controlled_entity();
        self.authority.local_tick(&mut self.world, now, input, owned);

        let Some(id) = owned else {
            return;
        };
        if input.action && self.authority.rules().mode == GameMode::Pursuit {
            self.relay_sender.request_ability();
        }
        if let Some(entity) = self.world.get(id).filter(|e| e.active) {
            self.relay_sender
                .send(self.channel.as_ref(), entity, self.world.round, now);
        }
    }
}
