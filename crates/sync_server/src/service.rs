//! The serialization point between sockets and the engine.
//!
//! Every handler and every tick runs under one async mutex around the
//! [`SessionManager`], so handlers observe each other's effects in order.
//! Outbound events are drained from the manager's outbox, serialized once and
//! handed to the [`ConnectionManager`] after the lock is released.

use crate::connection::{ConnectionId, ConnectionManager};
use std::sync::Arc;
use sync_core::manager::Dispatch;
use sync_core::protocol::JoinGame;
use sync_core::{ClientEvent, PositionStore, SessionManager, SyncError};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, warn};

pub struct SyncService {
    manager: Mutex<SessionManager>,
    store: Arc<dyn PositionStore>,
    connections: Arc<ConnectionManager>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService").finish_non_exhaustive()
    }
}

impl SyncService {
    pub fn new(manager: SessionManager, store: Arc<dyn PositionStore>, connections: Arc<ConnectionManager>) -> Self {
        Self {
            manager: Mutex::new(manager),
            store,
            connections,
        }
    }

    /// Applies one decoded client event.
    pub async fn handle_event(&self, connection_id: ConnectionId, event: ClientEvent) -> Result<(), SyncError> {
        if let ClientEvent::JoinGame(join) = event {
            return self.join_game(connection_id, join).await;
        }

        let mut manager = self.manager.lock().await;
        let result = manager.handle_event(connection_id, event);
        let outbox = manager.drain_outbox();
        drop(manager);

        self.deliver(outbox);
        result
    }

    /// The stored position is loaded without holding the engine; the
    /// manager re-checks session and membership once the load returns.
    async fn join_game(&self, connection_id: ConnectionId, join: JoinGame) -> Result<(), SyncError> {
        let needs_load = self
            .manager
            .lock()
            .await
            .needs_position_load(&join.code, join.character_id);

        let persisted = if needs_load {
            match self.store.load_character_position(join.character_id).await {
                Ok(position) => position,
                Err(e) => {
                    warn!("⚠️ Could not load position of character {}: {}", join.character_id, e);
                    None
                }
            }
        } else {
            None
        };

        let mut manager = self.manager.lock().await;
        let result = manager.handle_join_game(connection_id, join, persisted);
        let outbox = manager.drain_outbox();
        drop(manager);

        self.deliver(outbox);
        result
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        let mut manager = self.manager.lock().await;
        manager.disconnect(connection_id);
        let outbox = manager.drain_outbox();
        drop(manager);
        self.deliver(outbox);
    }

    /// One pass of the global ticker.
    pub async fn tick(&self, now: Instant) {
        let mut manager = self.manager.lock().await;
        manager.tick(now);
        let outbox = manager.drain_outbox();
        drop(manager);
        self.deliver(outbox);
    }

    /// Final flush of batches and positions. Returns the number of positions
    /// handed to the persistence worker.
    pub async fn shutdown(&self) -> usize {
        let mut manager = self.manager.lock().await;
        let saved = manager.shutdown();
        let outbox = manager.drain_outbox();
        drop(manager);
        self.deliver(outbox);
        saved
    }

    /// Read access to the engine, for diagnostics and tests.
    pub async fn inspect<R>(&self, f: impl FnOnce(&SessionManager) -> R) -> R {
        let manager = self.manager.lock().await;
        f(&manager)
    }

    fn deliver(&self, outbox: Vec<Dispatch>) {
        for dispatch in outbox {
            match dispatch.event.to_json() {
                Ok(text) => self.connections.send_to_many(&dispatch.targets, Arc::from(text)),
                Err(e) => error!("Failed to serialize {} event: {}", dispatch.event.name(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::protocol::{CreateLobby, ReadyStatus};
    use sync_core::{
        CharacterId, CharacterInfo, ClassType, MemoryPositionStore, PersistenceHandle, StaticCatalog, SyncConfig, Vec3,
    };

    fn service(store: Arc<MemoryPositionStore>) -> (SyncService, Arc<ConnectionManager>) {
        let connections = Arc::new(ConnectionManager::new());
        let manager = SessionManager::new(
            SyncConfig::default(),
            Arc::new(StaticCatalog::builtin()),
            PersistenceHandle::detached(),
        );
        (SyncService::new(manager, store, connections.clone()), connections)
    }

    #[tokio::test]
    async fn join_game_uses_the_stored_position() {
        let store = Arc::new(MemoryPositionStore::new());
        store
            .save_position(CharacterId(42), 12.0, 0.0, 8.0, 1.5)
            .await
            .expect("seed store");
        let (service, connections) = service(store);
        let mut frames = connections.subscribe();

        let create = CreateLobby {
            character: CharacterInfo {
                character_id: CharacterId(42),
                display_name: "Ayla".into(),
                class_type: ClassType::new("mage"),
            },
            scenario_id: None,
        };
        service
            .handle_event(1, ClientEvent::CreateLobby(create))
            .await
            .expect("create");
        let (target, text) = frames.recv().await.expect("lobby_created");
        assert_eq!(target, 1);
        assert!(text.contains("\"event\":\"lobby_created\""));

        service
            .handle_event(1, ClientEvent::ReadyStatus(ReadyStatus { ready: true }))
            .await
            .expect("ready");
        service.handle_event(1, ClientEvent::StartGame {}).await.expect("start");

        let code = service
            .inspect(|m| m.registry().session_of(1).cloned())
            .await
            .expect("session code");
        service
            .handle_event(
                1,
                ClientEvent::JoinGame(JoinGame {
                    code,
                    character_id: CharacterId(42),
                }),
            )
            .await
            .expect("join game");

        let position = service
            .inspect(|m| m.states().get(CharacterId(42)).map(|s| s.position))
            .await;
        assert_eq!(position, Some(Vec3::new(12.0, 0.0, 8.0)));
    }

    #[tokio::test]
    async fn events_after_the_final_flush_are_dropped() {
        let store = Arc::new(MemoryPositionStore::new());
        let connections = Arc::new(ConnectionManager::new());
        let (persistence, worker) = sync_core::spawn_persistence_worker(store.clone());
        let manager = SessionManager::new(SyncConfig::default(), Arc::new(StaticCatalog::builtin()), persistence);
        let service = SyncService::new(manager, store.clone(), connections.clone());

        let create = CreateLobby {
            character: CharacterInfo {
                character_id: CharacterId(5),
                display_name: "Tam".into(),
                class_type: ClassType::new("warrior"),
            },
            scenario_id: None,
        };
        service.handle_event(1, ClientEvent::CreateLobby(create)).await.expect("create");
        service
            .handle_event(1, ClientEvent::ReadyStatus(ReadyStatus { ready: true }))
            .await
            .expect("ready");
        service.handle_event(1, ClientEvent::StartGame {}).await.expect("start");
        let code = service
            .inspect(|m| m.registry().session_of(1).cloned())
            .await
            .expect("session code");
        service
            .handle_event(1, ClientEvent::JoinGame(JoinGame { code, character_id: CharacterId(5) }))
            .await
            .expect("join game");

        assert_eq!(service.shutdown().await, 1);
        tokio::time::timeout(std::time::Duration::from_millis(500), worker)
            .await
            .expect("worker stopped after the flush")
            .expect("worker");
        let flushed = store.get(CharacterId(5)).map(|p| p.position);
        assert!(flushed.is_some());

        let mut frames = connections.subscribe();
        let late = sync_core::protocol::PlayerUpdate {
            character_id: CharacterId(5),
            position: Vec3::new(1.0, 0.0, 1.0),
            rotation: 0.0,
            animation: "run".to_string(),
            time_scale: 1.0,
        };
        service.handle_event(1, ClientEvent::PlayerUpdate(late)).await.expect("dropped");
        service.handle_event(1, ClientEvent::Ping {}).await.expect("dropped");
        service.tick(Instant::now()).await;

        assert_eq!(service.inspect(|m| m.states().get(CharacterId(5)).map(|s| s.position)).await, flushed);
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn errors_are_sent_to_the_requester() {
        let (service, connections) = service(Arc::new(MemoryPositionStore::new()));
        let mut frames = connections.subscribe();

        let result = service.handle_event(9, ClientEvent::StartGame {}).await;
        assert!(result.is_err());
        assert_eq!(service.inspect(|m| m.registry().len()).await, 0);
        // Not being in a session is not reported back to the client.
        assert!(frames.try_recv().is_err());

        let result = service
            .handle_event(
                9,
                ClientEvent::JoinLobby(sync_core::protocol::JoinLobby {
                    code: sync_core::SessionCode::new("ZZZZZZ"),
                    character: CharacterInfo {
                        character_id: CharacterId(1),
                        display_name: "Bo".into(),
                        class_type: ClassType::new("warrior"),
                    },
                }),
            )
            .await;
        assert!(matches!(result, Err(SyncError::SessionNotFound(_))));
        let (target, text) = frames.recv().await.expect("error frame");
        assert_eq!(target, 9);
        assert!(text.contains("\"event\":\"error\""));
    }
}
