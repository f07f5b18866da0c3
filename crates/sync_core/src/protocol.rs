//! Wire protocol.
//!
//! Every message in either direction is a JSON envelope:
//!
//! ```json
//! { "event": "player_update", "data": { "characterId": 7, "position": { "x": 1.0, "y": 0.0, "z": 2.5 },
//!   "rotation": 0.4, "animation": "run", "timeScale": 1.0 } }
//! ```
//!
//! Inbound envelopes are decoded into [`ClientEvent`], a tagged union with
//! required-field validation, so malformed payloads are rejected before any
//! engine component sees them. Outbound events are [`ServerEvent`].

use crate::broadcast::BatchUpdate;
use crate::catalog::SceneConfig;
use crate::error::SyncError;
use crate::registry::{CharacterInfo, Member, Session};
use crate::types::{CharacterId, ClassType, ConnectionId, SceneId, SessionCode, Vec3};
use crate::world::{EnemyInstance, StructureInstance};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
struct ClientEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobby {
    pub character: CharacterInfo,
    #[serde(default)]
    pub scenario_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobby {
    pub code: SessionCode,
    pub character: CharacterInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGame {
    pub code: SessionCode,
    pub character_id: CharacterId,
}

fn default_time_scale() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub character_id: CharacterId,
    pub position: Vec3,
    pub rotation: f32,
    /// Animation name; unknown names fall back to idle.
    #[serde(default)]
    pub animation: String,
    #[serde(default = "default_time_scale")]
    pub time_scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneChange {
    pub character_id: CharacterId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAttack {
    pub target_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadyStatus {
    pub ready: bool,
}

/// Inbound client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    CreateLobby(CreateLobby),
    JoinLobby(JoinLobby),
    ReadyStatus(ReadyStatus),
    StartGame {},
    LeaveLobby {},
    JoinGame(JoinGame),
    PlayerUpdate(PlayerUpdate),
    PlayerEnteredZone(ZoneChange),
    PlayerLeftZone(ZoneChange),
    PlayerAttack(PlayerAttack),
    Ping {},
}

impl ClientEvent {
    /// Decodes and validates one inbound message.
    pub fn decode(text: &str) -> Result<Self, SyncError> {
        let envelope: ClientEnvelope =
            serde_json::from_str(text).map_err(|e| SyncError::Protocol(format!("Invalid JSON: {e}")))?;

        let data = match envelope.data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let mut tagged = Map::new();
        tagged.insert("event".to_string(), Value::String(envelope.event.clone()));
        tagged.insert("data".to_string(), data);

        let event: ClientEvent = serde_json::from_value(Value::Object(tagged))
            .map_err(|e| SyncError::Protocol(format!("Malformed '{}' payload: {e}", envelope.event)))?;
        event.validate()?;
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::CreateLobby(_) => "create_lobby",
            ClientEvent::JoinLobby(_) => "join_lobby",
            ClientEvent::ReadyStatus(_) => "ready_status",
            ClientEvent::StartGame {} => "start_game",
            ClientEvent::LeaveLobby {} => "leave_lobby",
            ClientEvent::JoinGame(_) => "join_game",
            ClientEvent::PlayerUpdate(_) => "player_update",
            ClientEvent::PlayerEnteredZone(_) => "player_entered_zone",
            ClientEvent::PlayerLeftZone(_) => "player_left_zone",
            ClientEvent::PlayerAttack(_) => "player_attack",
            ClientEvent::Ping {} => "ping",
        }
    }

    /// Gameplay actions subject to per-connection rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ClientEvent::PlayerUpdate(_) | ClientEvent::PlayerAttack(_))
    }

    fn validate(&self) -> Result<(), SyncError> {
        match self {
            ClientEvent::PlayerUpdate(update) => {
                if !update.position.is_finite() || !update.rotation.is_finite() || !update.time_scale.is_finite() {
                    return Err(SyncError::Protocol("player_update carries non-finite numbers".to_string()));
                }
            }
            ClientEvent::CreateLobby(CreateLobby { character, .. }) | ClientEvent::JoinLobby(JoinLobby { character, .. }) => {
                if character.display_name.trim().is_empty() || character.class_type.as_str().is_empty() {
                    return Err(SyncError::Protocol("character needs a name and a class".to_string()));
                }
            }
            ClientEvent::PlayerAttack(attack) if attack.target_id.is_empty() => {
                return Err(SyncError::Protocol("player_attack needs a targetId".to_string()));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Lobby member as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub id: ConnectionId,
    pub character_id: CharacterId,
    pub name: String,
    pub class_type: ClassType,
    pub ready: bool,
    pub is_host: bool,
    pub connected: bool,
}

impl From<&Member> for MemberView {
    fn from(member: &Member) -> Self {
        Self {
            id: member.connection_id,
            character_id: member.character_id,
            name: member.display_name.clone(),
            class_type: member.class_type.clone(),
            ready: member.ready,
            is_host: member.is_host,
            connected: member.connected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyView {
    pub code: SessionCode,
    pub host_id: ConnectionId,
    pub scenario_id: Option<String>,
    pub started: bool,
    pub players: Vec<MemberView>,
}

impl From<&Session> for LobbyView {
    fn from(session: &Session) -> Self {
        Self {
            code: session.code.clone(),
            host_id: session.host_id,
            scenario_id: session.scenario_id.clone(),
            started: session.started,
            players: session.members.iter().map(MemberView::from).collect(),
        }
    }
}

/// Full state of one character, sent on join and scene change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub character_id: CharacterId,
    pub name: String,
    pub class_type: ClassType,
    pub position: Vec3,
    pub rotation: f32,
    pub animation: String,
    pub time_scale: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnAssignment {
    pub character_id: CharacterId,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneConfigPayload {
    pub scene_id: SceneId,
    pub config: SceneConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneChanged {
    pub scene_id: SceneId,
    pub spawns: Vec<SpawnAssignment>,
    pub config: SceneConfig,
    pub enemies: Vec<EnemyInstance>,
    pub structures: Vec<StructureInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeleportCountdown {
    /// Seconds until the transition.
    pub time_left: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDisconnected {
    pub player_id: ConnectionId,
    pub character_id: CharacterId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReconnected {
    pub character_id: CharacterId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHost {
    pub host_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoined {
    pub player: MemberView,
    pub lobby: LobbyView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReady {
    pub character_id: CharacterId,
    pub ready: bool,
    pub all_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeft {
    pub player_id: ConnectionId,
    pub character_id: CharacterId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStarted {
    pub scene_id: SceneId,
}

/// Outbound server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    BatchUpdate(BatchUpdate),
    InitialStates { states: Vec<PlayerSnapshot> },
    EnemyStates { enemies: Vec<EnemyInstance> },
    StructureStates { structures: Vec<StructureInstance> },
    SceneConfig(SceneConfigPayload),
    TeleportCountdown(TeleportCountdown),
    TeleportCanceled {},
    SceneChanged(SceneChanged),
    GameComplete {},
    EntityDefeated { id: String },
    PlayerDisconnected(PlayerDisconnected),
    PlayerReconnected(PlayerReconnected),
    NewHost(NewHost),
    LobbyCreated(LobbyView),
    LobbyJoined(LobbyView),
    PlayerJoined(PlayerJoined),
    PlayerReady(PlayerReady),
    PlayerLeft(PlayerLeft),
    GameStarted(GameStarted),
    Error { message: String },
    Pong { timestamp: u64 },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error { message: message.into() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::BatchUpdate(_) => "batch_update",
            ServerEvent::InitialStates { .. } => "initial_states",
            ServerEvent::EnemyStates { .. } => "enemy_states",
            ServerEvent::StructureStates { .. } => "structure_states",
            ServerEvent::SceneConfig(_) => "scene_config",
            ServerEvent::TeleportCountdown(_) => "teleport_countdown",
            ServerEvent::TeleportCanceled {} => "teleport_canceled",
            ServerEvent::SceneChanged(_) => "scene_changed",
            ServerEvent::GameComplete {} => "game_complete",
            ServerEvent::EntityDefeated { .. } => "entity_defeated",
            ServerEvent::PlayerDisconnected(_) => "player_disconnected",
            ServerEvent::PlayerReconnected(_) => "player_reconnected",
            ServerEvent::NewHost(_) => "new_host",
            ServerEvent::LobbyCreated(_) => "lobby_created",
            ServerEvent::LobbyJoined(_) => "lobby_joined",
            ServerEvent::PlayerJoined(_) => "player_joined",
            ServerEvent::PlayerReady(_) => "player_ready",
            ServerEvent::PlayerLeft(_) => "player_left",
            ServerEvent::GameStarted(_) => "game_started",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(|e| SyncError::Protocol(format!("Failed to encode {}: {e}", self.name())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_player_update_with_defaults() {
        let event = ClientEvent::decode(
            r#"{"event":"player_update","data":{"characterId":7,"position":{"x":1,"y":0,"z":2.5},"rotation":0.4}}"#,
        )
        .expect("decode");
        let ClientEvent::PlayerUpdate(update) = event else {
            panic!("wrong variant");
        };
        assert_eq!(update.character_id, CharacterId(7));
        assert_eq!(update.position, Vec3::new(1.0, 0.0, 2.5));
        assert_eq!(update.time_scale, 1.0);
        assert!(update.animation.is_empty());
    }

    #[test]
    fn events_without_payload_accept_missing_or_empty_data() {
        assert_eq!(ClientEvent::decode(r#"{"event":"start_game"}"#), Ok(ClientEvent::StartGame {}));
        assert_eq!(ClientEvent::decode(r#"{"event":"ping","data":{}}"#), Ok(ClientEvent::Ping {}));
    }

    #[test]
    fn missing_required_fields_are_protocol_errors() {
        let result = ClientEvent::decode(r#"{"event":"join_game","data":{"code":"ABCDEF"}}"#);
        assert!(matches!(result, Err(SyncError::Protocol(_))));
        let result = ClientEvent::decode(r#"{"event":"teleport_everyone","data":{}}"#);
        assert!(matches!(result, Err(SyncError::Protocol(_))));
        let result = ClientEvent::decode("not json");
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[test]
    fn lobby_payloads_normalise_code_and_class() {
        let event = ClientEvent::decode(
            r#"{"event":"join_lobby","data":{"code":"abcdef","character":{"id":3,"name":"Bram","classType":"Mage"}}}"#,
        )
        .expect("decode");
        let ClientEvent::JoinLobby(join) = event else {
            panic!("wrong variant");
        };
        assert_eq!(join.code.as_str(), "ABCDEF");
        assert_eq!(join.character.class_type.as_str(), "mage");
    }

    #[test]
    fn blank_character_names_are_rejected() {
        let result = ClientEvent::decode(
            r#"{"event":"create_lobby","data":{"character":{"id":3,"name":"  ","classType":"mage"}}}"#,
        );
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[test]
    fn server_events_use_event_data_envelope() {
        let json = ServerEvent::NewHost(NewHost { host_id: 4 }).to_json().expect("encode");
        assert_eq!(json, r#"{"event":"new_host","data":{"hostId":4}}"#);

        let json = ServerEvent::EntityDefeated { id: "goblin_1".into() }.to_json().expect("encode");
        assert_eq!(json, r#"{"event":"entity_defeated","data":{"id":"goblin_1"}}"#);

        let json = ServerEvent::TeleportCanceled {}.to_json().expect("encode");
        assert_eq!(json, r#"{"event":"teleport_canceled","data":{}}"#);
    }
}
