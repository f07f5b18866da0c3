//! # Position Persistence
//!
//! The storage collaborator is reached through [`PositionStore`]. Writes never
//! run on the commit path: the engine pushes a [`PersistCommand`] into an
//! unbounded channel and a background worker applies them in order. A failed
//! write is logged and dropped; the next throttle window carries a fresh one.

use crate::error::SyncError;
use crate::types::{CharacterId, SceneId, Vec3};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Last saved transform of a character.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredPosition {
    pub position: Vec3,
    pub rotation: f32,
}

/// Storage collaborator for character positions.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn load_character_position(&self, id: CharacterId) -> Result<Option<StoredPosition>, SyncError>;

    async fn save_position(&self, id: CharacterId, x: f32, y: f32, z: f32, rotation: f32) -> Result<(), SyncError>;

    /// Forget the saved position so the next load falls back to the spawn of
    /// `scene_id`.
    async fn reset_position_for_scene(&self, id: CharacterId, scene_id: &str) -> Result<(), SyncError>;

    async fn clear_position(&self, id: CharacterId) -> Result<(), SyncError>;
}

/// Process-local store backed by a [`DashMap`].
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    positions: DashMap<CharacterId, StoredPosition>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: CharacterId) -> Option<StoredPosition> {
        self.positions.get(&id).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[async_trait]
impl PositionStore for MemoryPositionStore {
    async fn load_character_position(&self, id: CharacterId) -> Result<Option<StoredPosition>, SyncError> {
        Ok(self.get(id))
    }

    async fn save_position(&self, id: CharacterId, x: f32, y: f32, z: f32, rotation: f32) -> Result<(), SyncError> {
        self.positions.insert(
            id,
            StoredPosition {
                position: Vec3::new(x, y, z),
                rotation,
            },
        );
        Ok(())
    }

    async fn reset_position_for_scene(&self, id: CharacterId, _scene_id: &str) -> Result<(), SyncError> {
        self.positions.remove(&id);
        Ok(())
    }

    async fn clear_position(&self, id: CharacterId) -> Result<(), SyncError> {
        self.positions.remove(&id);
        Ok(())
    }
}

/// Work item for the persistence worker.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistCommand {
    Save { id: CharacterId, position: Vec3, rotation: f32 },
    ResetForScene { id: CharacterId, scene_id: SceneId },
    Clear { id: CharacterId },
    /// Ends the worker once everything queued before it has been applied.
    Stop,
}

/// Fire-and-forget sender used by the engine.
///
/// A detached handle (no worker) silently discards commands, which is what
/// unit tests of the synchronous core want.
#[derive(Debug, Clone, Default)]
pub struct PersistenceHandle {
    sender: Option<mpsc::UnboundedSender<PersistCommand>>,
}

impl PersistenceHandle {
    pub fn detached() -> Self {
        Self { sender: None }
    }

    pub fn from_sender(sender: mpsc::UnboundedSender<PersistCommand>) -> Self {
        Self { sender: Some(sender) }
    }

    pub fn is_attached(&self) -> bool {
        self.sender.is_some()
    }

    pub fn submit(&self, command: PersistCommand) {
        let Some(sender) = &self.sender else {
            trace!("Persistence detached, dropping {:?}", command);
            return;
        };
        if let Err(e) = sender.send(command) {
            warn!("⚠️ Persistence worker is gone, dropping {:?}", e.0);
        }
    }

    pub fn save(&self, id: CharacterId, position: Vec3, rotation: f32) {
        self.submit(PersistCommand::Save { id, position, rotation });
    }

    pub fn reset_for_scene(&self, id: CharacterId, scene_id: impl Into<SceneId>) {
        self.submit(PersistCommand::ResetForScene { id, scene_id: scene_id.into() });
    }

    pub fn clear(&self, id: CharacterId) {
        self.submit(PersistCommand::Clear { id });
    }

    pub fn stop(&self) {
        self.submit(PersistCommand::Stop);
    }
}

/// Spawns the worker that drains persistence commands into `store`.
///
/// The worker exits on [`PersistCommand::Stop`], or once every
/// [`PersistenceHandle`] clone has been dropped and the queue is empty.
pub fn spawn_persistence_worker(store: Arc<dyn PositionStore>) -> (PersistenceHandle, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<PersistCommand>();

    let worker = tokio::spawn(async move {
        while let Some(command) = receiver.recv().await {
            if command == PersistCommand::Stop {
                break;
            }
            apply(store.as_ref(), command).await;
        }
        debug!("💾 Persistence worker stopped");
    });

    (PersistenceHandle::from_sender(sender), worker)
}

async fn apply(store: &dyn PositionStore, command: PersistCommand) {
    let (id, result) = match &command {
        PersistCommand::Save { id, position, rotation } => (
            *id,
            store.save_position(*id, position.x, position.y, position.z, *rotation).await,
        ),
        PersistCommand::ResetForScene { id, scene_id } => {
            (*id, store.reset_position_for_scene(*id, scene_id).await)
        }
        PersistCommand::Clear { id } => (*id, store.clear_position(*id).await),
        PersistCommand::Stop => return,
    };

    match result {
        Ok(()) => trace!("💾 Applied {:?}", command),
        Err(e) => warn!("⚠️ Persistence failure for character {}: {}", id, e),
    }
}
