//! # Session Manager
//!
//! The single owner of all engine state. The transport constructs one
//! [`SessionManager`] and routes every inbound event and every timer tick
//! through it, one at a time. Handlers never talk to sockets: they queue
//! [`Dispatch`] records in an outbox that the caller drains afterwards.
//!
//! Commit path for a movement update:
//!
//! ```text
//! resolve member → validate → commit state → update spatial index → encode delta → enqueue batch
//! ```
//!
//! Persistence is scheduled from the state store and never awaited here.

use crate::broadcast::{BatchUpdate, BroadcastScheduler};
use crate::catalog::{SceneCatalog, SceneConfig};
use crate::codec::{normalize_angle, quantize, Animation, EnemyDelta, EntityDelta, NetworkCodec};
use crate::config::SyncConfig;
use crate::entity_state::{EntityStateStore, MoveContext, ProposedState};
use crate::error::{ErrorKind, SyncError};
use crate::persistence::{PersistenceHandle, StoredPosition};
use crate::protocol::{
    ClientEvent, CreateLobby, GameStarted, JoinGame, JoinLobby, LobbyView, MemberView, NewHost, PlayerAttack,
    PlayerDisconnected, PlayerJoined, PlayerLeft, PlayerReady, PlayerReconnected, PlayerSnapshot, PlayerUpdate,
    SceneChanged, SceneConfigPayload, ServerEvent, SpawnAssignment, TeleportCountdown, ZoneChange,
};
use crate::registry::{Departure, DisconnectOutcome, Session, SessionRegistry};
use crate::scene::{SceneTransitionController, TransitionPhase, ZoneEvent};
use crate::types::{current_timestamp_ms, CharacterId, ClassType, ConnectionId, SessionCode, Vec3};
use crate::world::{SessionWorld, TargetKind};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// An outbound event and the connections it goes to.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub targets: Vec<ConnectionId>,
    pub event: ServerEvent,
}

/// Member resolved from a connection, copied out of the registry.
#[derive(Debug, Clone)]
struct Actor {
    code: SessionCode,
    character_id: CharacterId,
    class_type: ClassType,
}

#[derive(Debug)]
pub struct SessionManager {
    config: SyncConfig,
    catalog: Arc<dyn SceneCatalog>,
    registry: SessionRegistry,
    states: EntityStateStore,
    scheduler: BroadcastScheduler,
    scenes: SceneTransitionController,
    worlds: HashMap<SessionCode, SessionWorld>,
    codecs: HashMap<SessionCode, NetworkCodec>,
    /// Characters each viewer has been sent, for interest filtering.
    interest: HashMap<CharacterId, BTreeSet<CharacterId>>,
    outbox: Vec<Dispatch>,
    persistence: PersistenceHandle,
    /// Set by the final flush; nothing is applied afterwards.
    closed: bool,
}

impl SessionManager {
    pub fn new(config: SyncConfig, catalog: Arc<dyn SceneCatalog>, persistence: PersistenceHandle) -> Self {
        let registry = SessionRegistry::new(config.max_members, config.code_length, config.disconnect_grace());
        Self::with_registry(config, catalog, persistence, registry)
    }

    pub fn with_registry(
        config: SyncConfig,
        catalog: Arc<dyn SceneCatalog>,
        persistence: PersistenceHandle,
        registry: SessionRegistry,
    ) -> Self {
        Self {
            states: EntityStateStore::new(config.persist_throttle(), persistence.clone()),
            scenes: SceneTransitionController::new(config.countdown()),
            scheduler: BroadcastScheduler::new(),
            worlds: HashMap::new(),
            codecs: HashMap::new(),
            interest: HashMap::new(),
            outbox: Vec::new(),
            persistence,
            closed: false,
            registry,
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn states(&self) -> &EntityStateStore {
        &self.states
    }

    pub fn scenes(&self) -> &SceneTransitionController {
        &self.scenes
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn world(&self, code: &SessionCode) -> Option<&SessionWorld> {
        self.worlds.get(code)
    }

    /// Takes every queued outbound event.
    pub fn drain_outbox(&mut self) -> Vec<Dispatch> {
        std::mem::take(&mut self.outbox)
    }

    /// Runs one inbound event. Failures are logged by category and, for
    /// lobby problems, reported to the requester with an `error` event.
    pub fn handle_event(&mut self, connection_id: ConnectionId, event: ClientEvent) -> Result<(), SyncError> {
        let name = event.name();
        if self.closed {
            trace!("Engine closed, dropping {} from connection {}", name, connection_id);
            return Ok(());
        }
        trace!("📨 {} from connection {}", name, connection_id);

        let result = match event {
            ClientEvent::CreateLobby(create) => self.create_lobby(connection_id, create),
            ClientEvent::JoinLobby(join) => self.join_lobby(connection_id, join),
            ClientEvent::ReadyStatus(status) => self.set_ready(connection_id, status.ready),
            ClientEvent::StartGame {} => self.start_game(connection_id),
            ClientEvent::LeaveLobby {} => {
                self.leave_lobby(connection_id);
                Ok(())
            }
            ClientEvent::JoinGame(join) => self.join_game(connection_id, join, None),
            ClientEvent::PlayerUpdate(update) => self.player_update(connection_id, update),
            ClientEvent::PlayerEnteredZone(change) => self.player_entered_zone(connection_id, change),
            ClientEvent::PlayerLeftZone(change) => self.player_left_zone(connection_id, change),
            ClientEvent::PlayerAttack(attack) => self.player_attack(connection_id, attack),
            ClientEvent::Ping {} => {
                self.ping(connection_id);
                Ok(())
            }
        };

        if let Err(e) = &result {
            self.report(connection_id, name, e);
        }
        result
    }

    /// Second half of a `join_game` whose stored position was loaded
    /// outside the manager. Reports failures like [`handle_event`](Self::handle_event).
    pub fn handle_join_game(
        &mut self,
        connection_id: ConnectionId,
        join: JoinGame,
        persisted: Option<StoredPosition>,
    ) -> Result<(), SyncError> {
        if self.closed {
            trace!("Engine closed, dropping join_game from connection {}", connection_id);
            return Ok(());
        }
        let result = self.join_game(connection_id, join, persisted);
        if let Err(e) = &result {
            self.report(connection_id, "join_game", e);
        }
        result
    }

    fn report(&mut self, connection_id: ConnectionId, event: &str, error: &SyncError) {
        match error.kind() {
            ErrorKind::Validation => debug!("{} from connection {} rejected: {}", event, connection_id, error),
            ErrorKind::NotFound => warn!("⚠️ {} from connection {} ignored: {}", event, connection_id, error),
            ErrorKind::Capacity => info!("🚫 {} from connection {} refused: {}", event, connection_id, error),
            ErrorKind::RateLimit => trace!("{} from connection {} dropped: {}", event, connection_id, error),
            ErrorKind::Persistence => warn!("⚠️ {} from connection {}: {}", event, connection_id, error),
            ErrorKind::Protocol => warn!("⚠️ Malformed {} from connection {}: {}", event, connection_id, error),
            ErrorKind::Rejected => debug!("{} from connection {} rejected: {}", event, connection_id, error),
        }
        if error.is_client_visible() {
            self.emit(vec![connection_id], ServerEvent::error(error.to_string()));
        }
    }

    fn emit(&mut self, targets: Vec<ConnectionId>, event: ServerEvent) {
        if targets.is_empty() {
            return;
        }
        self.outbox.push(Dispatch { targets, event });
    }

    /// Sends to every connected member of `code`, optionally skipping one.
    fn emit_session(&mut self, code: &SessionCode, event: ServerEvent, except: Option<ConnectionId>) {
        let targets: Vec<ConnectionId> = self
            .registry
            .connections(code)
            .into_iter()
            .filter(|c| Some(*c) != except)
            .collect();
        self.emit(targets, event);
    }

    /// Sends a flushed batch to every connected member. Each recipient only
    /// gets the player deltas of characters within `interest_radius` of its
    /// own position; characters that just came into range are sent in full.
    /// Recipients that end up with identical payloads share one dispatch.
    fn emit_batch(&mut self, code: &SessionCode, update: BatchUpdate) {
        let recipients: Vec<(ConnectionId, CharacterId)> = match self.registry.get(code) {
            Some(session) => session
                .members
                .iter()
                .filter(|m| m.connected)
                .map(|m| (m.connection_id, m.character_id))
                .collect(),
            None => return,
        };

        let mut grouped: Vec<(BatchUpdate, Vec<ConnectionId>)> = Vec::new();
        for (connection_id, viewer) in recipients {
            let Some(view) = self.batch_view(code, viewer, &update) else {
                continue;
            };
            match grouped.iter_mut().find(|(existing, _)| *existing == view) {
                Some((_, targets)) => targets.push(connection_id),
                None => grouped.push((view, vec![connection_id])),
            }
        }
        for (view, targets) in grouped {
            self.emit(targets, ServerEvent::BatchUpdate(view));
        }
    }

    fn batch_view(&mut self, code: &SessionCode, viewer: CharacterId, update: &BatchUpdate) -> Option<BatchUpdate> {
        let center = self.states.get(viewer).map(|s| s.position);
        let (Some(center), Some(world)) = (center, self.worlds.get(code)) else {
            // Not placed yet: nothing to filter against.
            return Some(update.clone());
        };

        let near: BTreeSet<CharacterId> = world
            .players_near(center, self.config.interest_radius)
            .into_iter()
            .collect();
        let seen = self.interest.insert(viewer, near.clone()).unwrap_or_default();

        let mut players: Vec<_> = update
            .p
            .iter()
            .filter(|delta| near.contains(&delta.id) && seen.contains(&delta.id))
            .cloned()
            .collect();
        if let Some(codec) = self.codecs.get(code) {
            players.extend(
                near.difference(&seen)
                    .filter_map(|id| self.states.get(*id))
                    .map(|state| codec.encode_snapshot(state)),
            );
        }

        let view = BatchUpdate {
            t: update.t,
            p: players,
            e: update.e.clone(),
            u: update.u.clone(),
        };
        (!view.is_empty()).then_some(view)
    }

    /// Marks every placed character of `code` as known to `viewers`.
    fn reset_interest(&mut self, code: &SessionCode, viewers: &[CharacterId]) {
        let known: BTreeSet<CharacterId> = self.states.get_all(code).iter().map(|s| s.character_id).collect();
        for viewer in viewers {
            self.interest.insert(*viewer, known.clone());
        }
    }

    fn emit_zone_event(&mut self, code: &SessionCode, event: ZoneEvent) {
        match event {
            ZoneEvent::Unchanged => {}
            ZoneEvent::CountdownStarted { time_left } => {
                let payload = TeleportCountdown {
                    time_left: time_left.as_secs_f32(),
                };
                self.emit_session(code, ServerEvent::TeleportCountdown(payload), None);
            }
            ZoneEvent::Canceled => self.emit_session(code, ServerEvent::TeleportCanceled {}, None),
        }
    }

    // ---------------------------------------------------------------------
    // Lobby
    // ---------------------------------------------------------------------

    pub fn create_lobby(&mut self, connection_id: ConnectionId, create: CreateLobby) -> Result<(), SyncError> {
        let view = LobbyView::from(self.registry.create_session(connection_id, create.character, create.scenario_id)?);
        self.emit(vec![connection_id], ServerEvent::LobbyCreated(view));
        Ok(())
    }

    pub fn join_lobby(&mut self, connection_id: ConnectionId, join: JoinLobby) -> Result<(), SyncError> {
        let character_id = join.character.character_id;
        let rebind = self.registry.join_session(&join.code, connection_id, join.character)?;
        let session = self
            .registry
            .get(&join.code)
            .ok_or_else(|| SyncError::SessionNotFound(join.code.clone()))?;
        let view = LobbyView::from(session);
        let member = session.member(character_id).map(MemberView::from);
        let started = session.started;

        self.emit(vec![connection_id], ServerEvent::LobbyJoined(view.clone()));
        match (rebind, member) {
            (None, Some(player)) => {
                let joined = PlayerJoined { player, lobby: view };
                self.emit_session(&join.code, ServerEvent::PlayerJoined(joined), Some(connection_id));
            }
            (Some(rebind), Some(player)) if rebind.changed && started => {
                let notice = PlayerReconnected {
                    character_id,
                    name: player.name,
                };
                self.emit_session(&join.code, ServerEvent::PlayerReconnected(notice), Some(connection_id));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn set_ready(&mut self, connection_id: ConnectionId, ready: bool) -> Result<(), SyncError> {
        let (code, character_id) = self.registry.set_ready(connection_id, ready)?;
        let all_ready = self.registry.get(&code).is_some_and(Session::all_ready);
        let payload = PlayerReady {
            character_id,
            ready,
            all_ready,
        };
        self.emit_session(&code, ServerEvent::PlayerReady(payload), None);
        Ok(())
    }

    pub fn start_game(&mut self, connection_id: ConnectionId) -> Result<(), SyncError> {
        let scenario = self
            .registry
            .member_by_connection(connection_id)
            .map(|(session, _)| session.scenario_id.clone())
            .ok_or(SyncError::ConnectionNotInSession(connection_id))?;
        let scene_id = self
            .catalog
            .first_scene(scenario.as_deref())
            .ok_or_else(|| SyncError::TargetNotFound("first scene".to_string()))?;

        let code = self.registry.start_session(connection_id)?;
        let world = self.load_world(&scene_id);
        self.worlds.insert(code.clone(), world);
        self.codecs.insert(
            code.clone(),
            NetworkCodec::new(self.config.position_decimals, self.config.rotation_decimals),
        );
        self.scenes.begin(&code, scene_id.clone());
        self.emit_session(&code, ServerEvent::GameStarted(GameStarted { scene_id }), None);
        Ok(())
    }

    /// Explicit leave: immediate removal whatever the phase.
    pub fn leave_lobby(&mut self, connection_id: ConnectionId) {
        if let Some(departure) = self.registry.leave(connection_id) {
            self.handle_departure(departure);
        }
    }

    /// Transport-level disconnect.
    pub fn disconnect(&mut self, connection_id: ConnectionId) {
        if self.closed {
            return;
        }
        match self.registry.disconnect(connection_id) {
            Some(DisconnectOutcome::Left(departure)) => self.handle_departure(departure),
            Some(DisconnectOutcome::Suspended {
                code,
                connection_id,
                character_id,
                ..
            }) => {
                let notice = PlayerDisconnected {
                    player_id: connection_id,
                    character_id,
                };
                self.emit_session(&code, ServerEvent::PlayerDisconnected(notice), None);
            }
            None => trace!("Connection {} closed outside any session", connection_id),
        }
    }

    fn handle_departure(&mut self, departure: Departure) {
        let Departure {
            code,
            member,
            new_host,
            session_deleted,
        } = departure;
        let character_id = member.character_id;

        self.states.clear(character_id);
        self.interest.remove(&character_id);
        for seen in self.interest.values_mut() {
            seen.remove(&character_id);
        }
        if let Some(world) = self.worlds.get_mut(&code) {
            world.remove_player(character_id);
        }
        if let Some(codec) = self.codecs.get_mut(&code) {
            codec.forget(character_id);
        }

        if session_deleted {
            self.cleanup_session(&code);
            return;
        }

        let left = PlayerLeft {
            player_id: member.connection_id,
            character_id,
        };
        self.emit_session(&code, ServerEvent::PlayerLeft(left), None);
        if let Some(host_id) = new_host {
            self.emit_session(&code, ServerEvent::NewHost(NewHost { host_id }), None);
        }

        let remaining = self.registry.get(&code).map(Session::character_ids).unwrap_or_default();
        let event = self.scenes.remove_member(&code, character_id, &remaining);
        self.emit_zone_event(&code, event);
    }

    fn cleanup_session(&mut self, code: &SessionCode) {
        self.worlds.remove(code);
        self.codecs.remove(code);
        self.scheduler.discard(code);
        self.scenes.remove_session(code);
        debug!("Released engine state of session {}", code);
    }

    // ---------------------------------------------------------------------
    // Game
    // ---------------------------------------------------------------------

    /// Whether `join_game` for this character would need the stored
    /// position. The caller loads it without holding the manager, then calls
    /// [`join_game`](Self::join_game), which checks everything again.
    pub fn needs_position_load(&self, code: &SessionCode, character_id: CharacterId) -> bool {
        self.registry
            .get(code)
            .is_some_and(|s| s.started && s.member(character_id).is_some())
            && !self.states.contains(character_id)
    }

    pub fn join_game(
        &mut self,
        connection_id: ConnectionId,
        join: JoinGame,
        persisted: Option<StoredPosition>,
    ) -> Result<(), SyncError> {
        let JoinGame { code, character_id } = join;
        let session = self
            .registry
            .get(&code)
            .ok_or_else(|| SyncError::SessionNotFound(code.clone()))?;
        let member = session.member(character_id).ok_or_else(|| SyncError::MemberNotFound {
            code: code.clone(),
            character: character_id,
        })?;
        if !session.started {
            return Err(SyncError::NotStarted(code));
        }
        let class_type = member.class_type.clone();
        let name = member.display_name.clone();

        let rebind = self.registry.rebind_connection(&code, character_id, connection_id)?;
        if rebind.changed {
            let notice = PlayerReconnected { character_id, name };
            self.emit_session(&code, ServerEvent::PlayerReconnected(notice), Some(connection_id));
        }

        if self.scenes.phase(&code) == Some(TransitionPhase::Ended) {
            self.emit(vec![connection_id], ServerEvent::GameComplete {});
            return Ok(());
        }
        let scene_id = self
            .scenes
            .scene_id(&code)
            .map(str::to_string)
            .ok_or_else(|| SyncError::SessionNotFound(code.clone()))?;

        let radius = self.player_radius(&class_type);
        let world = self
            .worlds
            .entry(code.clone())
            .or_insert_with(|| SessionWorld::empty(scene_id.clone(), &self.config));
        let persisted = persisted.filter(|stored| world.validator().is_valid(stored.position, &world.bounds(), radius));
        let (state, source) =
            self.states
                .load_or_spawn(&code, character_id, &class_type, &scene_id, persisted, self.catalog.as_ref());
        world.place_player(character_id, state.position);
        debug!("Character {} joined game {} ({:?})", character_id, code, source);

        let (position_decimals, rotation_decimals) = (self.config.position_decimals, self.config.rotation_decimals);
        let codec = self
            .codecs
            .entry(code.clone())
            .or_insert_with(|| NetworkCodec::new(position_decimals, rotation_decimals));
        codec.forget(character_id);
        let full = codec.encode_full(&state);
        self.scheduler.add_player_update(&code, full, current_timestamp_ms());

        self.send_initial_sync(connection_id, &code, &scene_id);
        self.reset_interest(&code, &[character_id]);
        // Peers get the full state queued above with the next batch.
        let peers = self.registry.get(&code).map(Session::character_ids).unwrap_or_default();
        for peer in peers.into_iter().filter(|peer| *peer != character_id) {
            if let Some(seen) = self.interest.get_mut(&peer) {
                seen.insert(character_id);
            }
        }
        Ok(())
    }

    fn send_initial_sync(&mut self, connection_id: ConnectionId, code: &SessionCode, scene_id: &str) {
        let states = self.player_snapshots(code);
        let (enemies, structures) = self
            .worlds
            .get(code)
            .map(|w| (w.enemies(), w.structures()))
            .unwrap_or_default();
        let config = self.scene_config(scene_id);

        self.emit(vec![connection_id], ServerEvent::InitialStates { states });
        self.emit(vec![connection_id], ServerEvent::EnemyStates { enemies });
        self.emit(vec![connection_id], ServerEvent::StructureStates { structures });
        self.emit(
            vec![connection_id],
            ServerEvent::SceneConfig(SceneConfigPayload {
                scene_id: scene_id.to_string(),
                config,
            }),
        );
    }

    fn player_snapshots(&self, code: &SessionCode) -> Vec<PlayerSnapshot> {
        let Some(session) = self.registry.get(code) else {
            return Vec::new();
        };
        let position_decimals = self.config.position_decimals;
        session
            .members
            .iter()
            .filter_map(|member| {
                let state = self.states.get(member.character_id)?;
                Some(PlayerSnapshot {
                    character_id: member.character_id,
                    name: member.display_name.clone(),
                    class_type: member.class_type.clone(),
                    position: Vec3::new(
                        quantize(state.position.x, position_decimals),
                        quantize(state.position.y, position_decimals),
                        quantize(state.position.z, position_decimals),
                    ),
                    rotation: quantize(normalize_angle(state.rotation), self.config.rotation_decimals),
                    animation: state.animation.name().to_string(),
                    time_scale: state.time_scale,
                })
            })
            .collect()
    }

    /// Resolves the member behind a connection for a gameplay event and
    /// checks that it owns the character it claims to act for.
    fn actor(&self, connection_id: ConnectionId, claimed: Option<CharacterId>) -> Result<Actor, SyncError> {
        let (session, member) = self
            .registry
            .member_by_connection(connection_id)
            .ok_or(SyncError::ConnectionNotInSession(connection_id))?;
        if let Some(claimed) = claimed {
            if claimed != member.character_id {
                return Err(SyncError::Validation(format!(
                    "connection {} does not control character {}",
                    connection_id, claimed
                )));
            }
        }
        if !session.started {
            return Err(SyncError::NotStarted(session.code.clone()));
        }
        Ok(Actor {
            code: session.code.clone(),
            character_id: member.character_id,
            class_type: member.class_type.clone(),
        })
    }

    fn accepts_gameplay(&self, code: &SessionCode) -> bool {
        matches!(
            self.scenes.phase(code),
            Some(TransitionPhase::Exploring | TransitionPhase::CountdownPending)
        )
    }

    fn player_radius(&self, class_type: &ClassType) -> f32 {
        self.catalog
            .archetype(class_type)
            .map(|a| a.radius)
            .unwrap_or(self.config.player_radius)
    }

    pub fn player_update(&mut self, connection_id: ConnectionId, update: PlayerUpdate) -> Result<(), SyncError> {
        let actor = self.actor(connection_id, Some(update.character_id))?;
        if !self.accepts_gameplay(&actor.code) {
            trace!("Ignoring update for {} while session {} is transitioning", actor.character_id, actor.code);
            return Ok(());
        }

        let radius = self.player_radius(&actor.class_type);
        let world = self
            .worlds
            .get_mut(&actor.code)
            .ok_or_else(|| SyncError::SessionNotFound(actor.code.clone()))?;
        let bodies = if self.config.collide_with_enemies {
            world.enemy_bodies()
        } else {
            Vec::new()
        };
        let proposed = ProposedState {
            position: update.position,
            rotation: update.rotation,
            animation: Animation::from_name(&update.animation).unwrap_or_default(),
            time_scale: update.time_scale,
        };
        let ctx = MoveContext {
            validator: world.validator(),
            bounds: world.bounds(),
            radius,
            bodies: &bodies,
        };
        let committed = self.states.upsert(&actor.code, actor.character_id, proposed, ctx)?;
        world.place_player(actor.character_id, committed.state.position);

        let (position_decimals, rotation_decimals) = (self.config.position_decimals, self.config.rotation_decimals);
        let codec = self
            .codecs
            .entry(actor.code.clone())
            .or_insert_with(|| NetworkCodec::new(position_decimals, rotation_decimals));
        if committed.rejected.is_some() {
            // The client already shows the refused position; resend everything.
            codec.forget(actor.character_id);
        }
        if let Some(delta) = codec.encode_delta(&committed.state) {
            self.scheduler.add_player_update(&actor.code, delta, current_timestamp_ms());
        }

        if self.scenes.is_in_zone(&actor.code, actor.character_id) {
            let scene_id = self.scenes.scene_id(&actor.code).unwrap_or_default().to_string();
            let still_inside = self.catalog.is_player_in_zone(
                committed.state.position,
                &scene_id,
                &actor.class_type,
                self.config.zone_tolerance,
            );
            if !still_inside {
                let event = self.scenes.leave_zone(&actor.code, actor.character_id);
                self.emit_zone_event(&actor.code, event);
            }
        }
        Ok(())
    }

    /// Zone claims are checked against the authoritative position.
    pub fn player_entered_zone(&mut self, connection_id: ConnectionId, change: ZoneChange) -> Result<(), SyncError> {
        let actor = self.actor(connection_id, Some(change.character_id))?;
        if !self.accepts_gameplay(&actor.code) {
            return Ok(());
        }
        let position = self
            .states
            .get(actor.character_id)
            .map(|s| s.position)
            .ok_or_else(|| SyncError::Validation(format!("character {} has no position yet", actor.character_id)))?;
        let scene_id = self.scenes.scene_id(&actor.code).unwrap_or_default().to_string();
        if !self
            .catalog
            .is_player_in_zone(position, &scene_id, &actor.class_type, self.config.zone_tolerance)
        {
            return Err(SyncError::Validation(format!(
                "character {} claimed its zone from ({:.2}, {:.2})",
                actor.character_id, position.x, position.z
            )));
        }

        let members = self
            .registry
            .get(&actor.code)
            .map(Session::character_ids)
            .unwrap_or_default();
        let event = self.scenes.enter_zone(&actor.code, actor.character_id, &members);
        self.emit_zone_event(&actor.code, event);
        Ok(())
    }

    pub fn player_left_zone(&mut self, connection_id: ConnectionId, change: ZoneChange) -> Result<(), SyncError> {
        let actor = self.actor(connection_id, Some(change.character_id))?;
        let event = self.scenes.leave_zone(&actor.code, actor.character_id);
        self.emit_zone_event(&actor.code, event);
        Ok(())
    }

    pub fn player_attack(&mut self, connection_id: ConnectionId, attack: PlayerAttack) -> Result<(), SyncError> {
        let actor = self.actor(connection_id, None)?;
        if !self.accepts_gameplay(&actor.code) {
            return Ok(());
        }
        let position = self
            .states
            .get(actor.character_id)
            .map(|s| s.position)
            .ok_or_else(|| SyncError::Validation(format!("character {} has no position yet", actor.character_id)))?;
        let archetype = self
            .catalog
            .archetype(&actor.class_type)
            .cloned()
            .ok_or_else(|| SyncError::Validation(format!("unknown class '{}'", actor.class_type)))?;
        let world = self
            .worlds
            .get_mut(&actor.code)
            .ok_or_else(|| SyncError::SessionNotFound(actor.code.clone()))?;

        let outcome = world.attack(position, &archetype, &attack.target_id, self.config.combat_tolerance)?;
        debug!(
            "Character {} hit {} for {} ({} hp left)",
            actor.character_id, outcome.target, outcome.damage, outcome.remaining_hp
        );

        let now_ms = current_timestamp_ms();
        match outcome.kind {
            TargetKind::Enemy => self.scheduler.add_enemy_update(
                &actor.code,
                EnemyDelta {
                    id: outcome.target.clone(),
                    hp: outcome.remaining_hp,
                    position: None,
                    defeated: outcome.defeated,
                },
                now_ms,
            ),
            TargetKind::Structure => self.scheduler.add_entity_update(
                &actor.code,
                EntityDelta {
                    id: outcome.target.clone(),
                    hp: Some(outcome.remaining_hp),
                    destroyed: outcome.defeated,
                },
                now_ms,
            ),
        }

        if outcome.defeated {
            info!("💀 {} defeated in session {}", outcome.target, actor.code);
            if let Some(update) = self.scheduler.flush_now(&actor.code, now_ms) {
                self.emit_batch(&actor.code, update);
            }
            self.emit_session(&actor.code, ServerEvent::EntityDefeated { id: outcome.target }, None);
        }
        Ok(())
    }

    pub fn ping(&mut self, connection_id: ConnectionId) {
        self.emit(
            vec![connection_id],
            ServerEvent::Pong {
                timestamp: current_timestamp_ms(),
            },
        );
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// One pass of the global ticker: grace expiry, countdown expiry, then
    /// the batch flush.
    pub fn tick(&mut self, now: Instant) {
        if self.closed {
            return;
        }
        for departure in self.registry.expire_grace(now) {
            self.handle_departure(departure);
        }

        for code in self.scenes.expired(now) {
            self.run_transition(&code);
        }

        for (code, update) in self.scheduler.flush_all(current_timestamp_ms()) {
            self.emit_batch(&code, update);
        }
    }

    fn run_transition(&mut self, code: &SessionCode) {
        let Some(session) = self.registry.get(code) else {
            self.scenes.remove_session(code);
            return;
        };
        let scenario = session.scenario_id.clone();
        let members: Vec<(CharacterId, ClassType)> = session
            .members
            .iter()
            .map(|m| (m.character_id, m.class_type.clone()))
            .collect();
        let current = self.scenes.scene_id(code).unwrap_or_default().to_string();

        // Updates queued for the old scene are meaningless now.
        self.scheduler.discard(code);

        let Some(next) = self.catalog.next_scene(&current, scenario.as_deref()) else {
            for (character_id, _) in &members {
                self.interest.remove(character_id);
            }
            let cleared = self.states.purge_session(code);
            self.worlds.remove(code);
            self.codecs.remove(code);
            self.scenes.complete_transition(code, None);
            info!("🏁 Session {} completed its run ({} characters cleared)", code, cleared);
            self.emit_session(code, ServerEvent::GameComplete {}, None);
            return;
        };

        let mut world = self.load_world(&next);
        let mut spawns = Vec::with_capacity(members.len());
        let viewers: Vec<CharacterId> = members.iter().map(|(id, _)| *id).collect();
        for (character_id, class_type) in members {
            let position = self.catalog.spawn_position(&next, &class_type).unwrap_or_else(|| {
                warn!(
                    "⚠️ No spawn configured for class '{}' in scene '{}', using origin",
                    class_type, next
                );
                Vec3::ZERO
            });
            self.states.respawn(code, character_id, position, &next);
            world.place_player(character_id, position);
            spawns.push(SpawnAssignment { character_id, position });
        }

        let enemies = world.enemies();
        let structures = world.structures();
        self.worlds.insert(code.clone(), world);
        self.codecs.insert(
            code.clone(),
            NetworkCodec::new(self.config.position_decimals, self.config.rotation_decimals),
        );
        self.scenes.complete_transition(code, Some(next.clone()));
        // scene_changed carries every spawn.
        self.reset_interest(code, &viewers);
        info!("🌀 Session {} moved from '{}' to '{}'", code, current, next);

        let changed = SceneChanged {
            scene_id: next.clone(),
            spawns,
            config: self.scene_config(&next),
            enemies,
            structures,
        };
        self.emit_session(code, ServerEvent::SceneChanged(changed), None);
    }

    fn load_world(&self, scene_id: &str) -> SessionWorld {
        match self.catalog.scene_config(scene_id) {
            Some(scene) => SessionWorld::load(scene, self.catalog.as_ref(), &self.config),
            None => {
                warn!("⚠️ Scene '{}' is not in the catalog, running it empty", scene_id);
                SessionWorld::empty(scene_id, &self.config)
            }
        }
    }

    fn scene_config(&self, scene_id: &str) -> SceneConfig {
        self.catalog.scene_config(scene_id).cloned().unwrap_or_else(|| SceneConfig {
            id: scene_id.to_string(),
            name: scene_id.to_string(),
            max_range: self.config.default_max_range,
            spawns: Default::default(),
            zones: Default::default(),
            enemies: Vec::new(),
            structures: Vec::new(),
            obstacles: Vec::new(),
        })
    }

    /// Final flush on shutdown: pending batches go out, every position is
    /// handed to the persistence worker and the worker is told to stop. The
    /// engine is closed afterwards; later events, ticks and disconnects are
    /// dropped.
    pub fn shutdown(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.closed = true;
        for (code, update) in self.scheduler.flush_all(current_timestamp_ms()) {
            self.emit_batch(&code, update);
        }
        let saved = self.states.flush_all();
        self.persistence.stop();
        info!("💾 Flushed {} character positions", saved);
        saved
    }
}
