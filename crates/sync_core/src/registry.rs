//! # Session Registry
//!
//! Lobby lifecycle: creation, joining, the ready check, starting, reconnects,
//! disconnect grace and host migration.
//!
//! Members are kept in join order, which is what host promotion relies on.
//! Before a game starts a disconnect removes the member at once. Once it has
//! started the member is only marked disconnected and given a grace window so
//! a page refresh does not lose their slot.

use crate::error::SyncError;
use crate::timer::DeadlineTimer;
use crate::types::{CharacterId, ClassType, ConnectionId, SessionCode};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

/// Character a client brings into a lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterInfo {
    #[serde(rename = "id")]
    pub character_id: CharacterId,
    #[serde(rename = "name")]
    pub display_name: String,
    pub class_type: ClassType,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub character_id: CharacterId,
    pub display_name: String,
    pub class_type: ClassType,
    pub ready: bool,
    pub is_host: bool,
    pub connected: bool,
    grace: Option<DeadlineTimer>,
}

impl Member {
    fn new(connection_id: ConnectionId, character: CharacterInfo) -> Self {
        Self {
            connection_id,
            character_id: character.character_id,
            display_name: character.display_name,
            class_type: character.class_type,
            ready: false,
            is_host: false,
            connected: true,
            grace: None,
        }
    }

    /// Deadline of the pending disconnect grace window, if any.
    pub fn grace_deadline(&self) -> Option<Instant> {
        self.grace.as_ref().filter(|t| !t.is_cancelled()).map(|t| t.deadline())
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub code: SessionCode,
    pub host_id: ConnectionId,
    pub scenario_id: Option<String>,
    pub members: Vec<Member>,
    pub started: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn member(&self, character_id: CharacterId) -> Option<&Member> {
        self.members.iter().find(|m| m.character_id == character_id)
    }

    pub fn member_by_connection(&self, connection_id: ConnectionId) -> Option<&Member> {
        self.members.iter().find(|m| m.connection_id == connection_id)
    }

    pub fn host(&self) -> Option<&Member> {
        self.members.iter().find(|m| m.is_host)
    }

    /// Connections of members currently online.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.members.iter().filter(|m| m.connected).map(|m| m.connection_id).collect()
    }

    pub fn character_ids(&self) -> Vec<CharacterId> {
        self.members.iter().map(|m| m.character_id).collect()
    }

    pub fn all_ready(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.ready)
    }

    /// Promotes the earliest connected member (or the earliest member if
    /// nobody is connected). Returns the new host connection.
    fn promote_host(&mut self) -> Option<ConnectionId> {
        if self.members.is_empty() {
            return None;
        }
        let index = self.members.iter().position(|m| m.connected).unwrap_or(0);
        for member in &mut self.members {
            member.is_host = false;
        }
        let member = &mut self.members[index];
        member.is_host = true;
        self.host_id = member.connection_id;
        Some(self.host_id)
    }
}

/// A member that left their session for good.
#[derive(Debug, Clone)]
pub struct Departure {
    pub code: SessionCode,
    pub member: Member,
    /// Connection of the newly promoted host, when the host left.
    pub new_host: Option<ConnectionId>,
    /// The session had no members left and was deleted.
    pub session_deleted: bool,
}

/// What happened when a connection dropped.
#[derive(Debug, Clone)]
pub enum DisconnectOutcome {
    /// Pre-start disconnect: the member is gone.
    Left(Departure),
    /// Running game: the member keeps their slot until the grace deadline.
    Suspended {
        code: SessionCode,
        connection_id: ConnectionId,
        character_id: CharacterId,
        deadline: Instant,
    },
}

/// Result of rebinding a member to a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rebind {
    pub previous: ConnectionId,
    /// The connection id actually changed.
    pub changed: bool,
    /// A pending grace timer was cancelled.
    pub grace_cancelled: bool,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SessionCode, Session>,
    by_connection: HashMap<ConnectionId, SessionCode>,
    max_members: usize,
    code_length: usize,
    grace: Duration,
    rng: StdRng,
}

impl SessionRegistry {
    pub fn new(max_members: usize, code_length: usize, grace: Duration) -> Self {
        Self::with_rng(max_members, code_length, grace, StdRng::from_entropy())
    }

    /// Deterministic code generation, for tests.
    pub fn with_seed(max_members: usize, code_length: usize, grace: Duration, seed: u64) -> Self {
        Self::with_rng(max_members, code_length, grace, StdRng::seed_from_u64(seed))
    }

    fn with_rng(max_members: usize, code_length: usize, grace: Duration, rng: StdRng) -> Self {
        Self {
            sessions: HashMap::new(),
            by_connection: HashMap::new(),
            max_members: max_members.max(1),
            code_length: code_length.max(1),
            grace,
            rng,
        }
    }

    fn generate_code(&mut self) -> SessionCode {
        loop {
            let code: String = (0..self.code_length)
                .map(|_| {
                    let index = self.rng.gen_range(0..SessionCode::ALPHABET.len());
                    SessionCode::ALPHABET[index] as char
                })
                .collect();
            let code = SessionCode::new(code);
            if !self.sessions.contains_key(&code) {
                return code;
            }
        }
    }

    pub fn create_session(
        &mut self,
        connection_id: ConnectionId,
        character: CharacterInfo,
        scenario_id: Option<String>,
    ) -> Result<&Session, SyncError> {
        if self.by_connection.contains_key(&connection_id) {
            return Err(SyncError::AlreadyInSession(connection_id));
        }

        let code = self.generate_code();
        let mut host = Member::new(connection_id, character);
        host.is_host = true;

        info!("🏠 Session {} created by connection {}", code, connection_id);
        self.by_connection.insert(connection_id, code.clone());
        let session = self.sessions.entry(code.clone()).or_insert(Session {
            code,
            host_id: connection_id,
            scenario_id,
            members: vec![host],
            started: false,
            created_at: Utc::now(),
        });
        Ok(session)
    }

    /// Adds a member, or rebinds the connection if the character is already
    /// part of the session.
    pub fn join_session(
        &mut self,
        code: &SessionCode,
        connection_id: ConnectionId,
        character: CharacterInfo,
    ) -> Result<Option<Rebind>, SyncError> {
        let session = self
            .sessions
            .get(code)
            .ok_or_else(|| SyncError::SessionNotFound(code.clone()))?;

        if session.member(character.character_id).is_some() {
            return self.rebind_connection(code, character.character_id, connection_id).map(Some);
        }
        if self.by_connection.contains_key(&connection_id) {
            return Err(SyncError::AlreadyInSession(connection_id));
        }
        if session.members.len() >= self.max_members {
            return Err(SyncError::SessionFull(code.clone()));
        }
        if session.started {
            return Err(SyncError::AlreadyStarted(code.clone()));
        }

        let session = self
            .sessions
            .get_mut(code)
            .ok_or_else(|| SyncError::SessionNotFound(code.clone()))?;
        session.members.push(Member::new(connection_id, character));
        self.by_connection.insert(connection_id, code.clone());
        debug!("Connection {} joined session {}", connection_id, code);
        Ok(None)
    }

    pub fn set_ready(&mut self, connection_id: ConnectionId, ready: bool) -> Result<(SessionCode, CharacterId), SyncError> {
        let code = self.code_of(connection_id)?;
        let session = self
            .sessions
            .get_mut(&code)
            .ok_or_else(|| SyncError::SessionNotFound(code.clone()))?;
        let member = session
            .members
            .iter_mut()
            .find(|m| m.connection_id == connection_id)
            .ok_or(SyncError::ConnectionNotInSession(connection_id))?;
        member.ready = ready;
        Ok((code, member.character_id))
    }

    /// Only the host may start, and only once everybody is ready.
    pub fn start_session(&mut self, connection_id: ConnectionId) -> Result<SessionCode, SyncError> {
        let code = self.code_of(connection_id)?;
        let session = self
            .sessions
            .get_mut(&code)
            .ok_or_else(|| SyncError::SessionNotFound(code.clone()))?;

        if session.started {
            return Err(SyncError::AlreadyStarted(code));
        }
        if session.host_id != connection_id {
            return Err(SyncError::NotHost);
        }
        if !session.all_ready() {
            return Err(SyncError::NotAllReady);
        }

        session.started = true;
        info!("🚀 Session {} started with {} members", code, session.members.len());
        Ok(code)
    }

    /// Points an existing member at a new connection and cancels any pending
    /// grace timer.
    pub fn rebind_connection(
        &mut self,
        code: &SessionCode,
        character_id: CharacterId,
        new_connection: ConnectionId,
    ) -> Result<Rebind, SyncError> {
        // A connection controls at most one member.
        if let Some(other) = self.by_connection.get(&new_connection) {
            let bound = self
                .sessions
                .get(other)
                .and_then(|s| s.member_by_connection(new_connection))
                .map(|m| m.character_id);
            if other != code || bound.is_some_and(|bound| bound != character_id) {
                return Err(SyncError::AlreadyInSession(new_connection));
            }
        }

        let session = self
            .sessions
            .get_mut(code)
            .ok_or_else(|| SyncError::SessionNotFound(code.clone()))?;
        let member = session
            .members
            .iter_mut()
            .find(|m| m.character_id == character_id)
            .ok_or_else(|| SyncError::MemberNotFound {
                code: code.clone(),
                character: character_id,
            })?;

        let previous = member.connection_id;
        let grace_cancelled = match member.grace.take() {
            Some(mut timer) => {
                timer.cancel();
                true
            }
            None => false,
        };
        member.connection_id = new_connection;
        member.connected = true;
        if member.is_host {
            session.host_id = new_connection;
        }

        let changed = previous != new_connection;
        if changed && self.by_connection.get(&previous) == Some(code) {
            self.by_connection.remove(&previous);
        }
        self.by_connection.insert(new_connection, code.clone());

        if changed {
            info!(
                "🔄 Character {} in session {} moved from connection {} to {}",
                character_id, code, previous, new_connection
            );
        }
        Ok(Rebind {
            previous,
            changed,
            grace_cancelled,
        })
    }

    /// Handles a dropped connection. `None` when the connection was not in a
    /// session (or has already been replaced by a reconnect).
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Option<DisconnectOutcome> {
        let code = self.by_connection.get(&connection_id)?.clone();
        let started = self.sessions.get(&code)?.started;
        if !started {
            return self.leave(connection_id).map(DisconnectOutcome::Left);
        }

        self.by_connection.remove(&connection_id);
        let session = self.sessions.get_mut(&code)?;
        let member = session.members.iter_mut().find(|m| m.connection_id == connection_id)?;
        let timer = DeadlineTimer::start(self.grace);
        let deadline = timer.deadline();
        member.connected = false;
        member.grace = Some(timer);
        info!(
            "🔌 Character {} disconnected from running session {}, holding slot",
            member.character_id, code
        );
        Some(DisconnectOutcome::Suspended {
            code,
            connection_id,
            character_id: member.character_id,
            deadline,
        })
    }

    /// Removes the member bound to `connection_id` regardless of phase.
    pub fn leave(&mut self, connection_id: ConnectionId) -> Option<Departure> {
        let code = self.by_connection.remove(&connection_id)?;
        let session = self.sessions.get_mut(&code)?;
        let index = session.members.iter().position(|m| m.connection_id == connection_id)?;
        self.remove_member(code, index)
    }

    fn remove_member(&mut self, code: SessionCode, index: usize) -> Option<Departure> {
        let session = self.sessions.get_mut(&code)?;
        if index >= session.members.len() {
            return None;
        }
        let member = session.members.remove(index);

        if session.members.is_empty() {
            self.sessions.remove(&code);
            info!("🧹 Session {} deleted (no members left)", code);
            return Some(Departure {
                code,
                member,
                new_host: None,
                session_deleted: true,
            });
        }

        let new_host = if member.is_host { session.promote_host() } else { None };
        if let Some(host) = new_host {
            info!("👑 Connection {} is now host of session {}", host, code);
        }
        Some(Departure {
            code,
            member,
            new_host,
            session_deleted: false,
        })
    }

    /// Removes every member whose grace window has run out.
    pub fn expire_grace(&mut self, now: Instant) -> Vec<Departure> {
        let expired: Vec<(SessionCode, CharacterId)> = self
            .sessions
            .values()
            .flat_map(|s| {
                s.members
                    .iter()
                    .filter(|m| m.grace.as_ref().is_some_and(|t| t.is_expired(now)))
                    .map(|m| (s.code.clone(), m.character_id))
            })
            .collect();

        let mut departures = Vec::with_capacity(expired.len());
        for (code, character_id) in expired {
            let index = self
                .sessions
                .get(&code)
                .and_then(|s| s.members.iter().position(|m| m.character_id == character_id));
            if let Some(index) = index {
                info!("⌛ Grace expired for character {} in session {}", character_id, code);
                departures.extend(self.remove_member(code, index));
            }
        }
        departures
    }

    fn code_of(&self, connection_id: ConnectionId) -> Result<SessionCode, SyncError> {
        self.by_connection
            .get(&connection_id)
            .cloned()
            .ok_or(SyncError::ConnectionNotInSession(connection_id))
    }

    pub fn session_of(&self, connection_id: ConnectionId) -> Option<&SessionCode> {
        self.by_connection.get(&connection_id)
    }

    pub fn get(&self, code: &SessionCode) -> Option<&Session> {
        self.sessions.get(code)
    }

    pub fn contains(&self, code: &SessionCode) -> bool {
        self.sessions.contains_key(code)
    }

    /// The session and member bound to a live connection.
    pub fn member_by_connection(&self, connection_id: ConnectionId) -> Option<(&Session, &Member)> {
        let session = self.sessions.get(self.by_connection.get(&connection_id)?)?;
        let member = session.member_by_connection(connection_id)?;
        Some((session, member))
    }

    pub fn connections(&self, code: &SessionCode) -> Vec<ConnectionId> {
        self.sessions.get(code).map(Session::connections).unwrap_or_default()
    }

    pub fn codes(&self) -> Vec<SessionCode> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
