//! # Sync Core
//!
//! Authoritative state engine for small co-op sessions (up to four players)
//! that move together through a sequence of scenes.
//!
//! ## Components
//!
//! - [`codec`]: quantization and field-level delta encoding
//! - [`spatial`]: uniform-grid spatial index
//! - [`movement`]: bounds, obstacle and entity collision checks
//! - [`entity_state`]: authoritative per-character state with throttled persistence
//! - [`broadcast`]: per-session batching of outbound deltas
//! - [`registry`]: lobbies, membership, host migration and reconnect grace
//! - [`scene`]: zone gating and scene transitions
//! - [`world`]: per-session enemies, structures and combat
//! - [`manager`]: the single owner that ties everything together
//!
//! Everything in this crate is synchronous apart from the persistence worker.
//! The transport serializes access to one [`SessionManager`] and drains its
//! outbox after every call.

pub mod broadcast;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod entity_state;
pub mod error;
pub mod manager;
pub mod movement;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod scene;
pub mod shutdown;
pub mod spatial;
pub mod timer;
pub mod types;
pub mod world;

pub use broadcast::{BatchUpdate, BroadcastScheduler};
pub use catalog::{CatalogError, SceneCatalog, SceneConfig, StaticCatalog};
pub use codec::{Animation, NetworkCodec, PlayerDelta};
pub use config::SyncConfig;
pub use entity_state::{EntityState, EntityStateStore};
pub use error::{ErrorKind, SyncError};
pub use manager::{Dispatch, SessionManager};
pub use movement::{Circle, MapBounds, MovementValidator};
pub use persistence::{spawn_persistence_worker, MemoryPositionStore, PersistenceHandle, PositionStore, StoredPosition};
pub use protocol::{ClientEvent, ServerEvent};
pub use registry::{CharacterInfo, SessionRegistry};
pub use scene::{SceneTransitionController, TransitionPhase};
pub use shutdown::ShutdownState;
pub use spatial::SpatialIndex;
pub use types::{current_timestamp_ms, CharacterId, ClassType, ConnectionId, SceneId, SessionCode, Vec3};
