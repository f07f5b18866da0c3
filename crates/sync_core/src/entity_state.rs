//! # Entity State Store
//!
//! Authoritative transform and animation of every character in play. Client
//! updates are proposals: the position is committed only if it passes the
//! movement check, while rotation, animation and time scale are always taken.
//!
//! Each commit may also schedule a position write through the
//! [`PersistenceHandle`], at most once per throttle window per character.

use crate::catalog::SceneCatalog;
use crate::codec::Animation;
use crate::error::SyncError;
use crate::movement::{Circle, MapBounds, MovementRejection, MovementValidator};
use crate::persistence::{PersistenceHandle, StoredPosition};
use crate::types::{CharacterId, ClassType, SessionCode, Vec3};
use std::collections::{BTreeSet, HashMap};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// Authoritative state of one character.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub character_id: CharacterId,
    pub position: Vec3,
    pub rotation: f32,
    pub animation: Animation,
    pub time_scale: f32,
    pub last_persisted_at: Option<Instant>,
    /// A commit landed inside the throttle window and has not been written.
    pub unsaved: bool,
}

impl EntityState {
    pub fn new(character_id: CharacterId, position: Vec3) -> Self {
        Self {
            character_id,
            position,
            rotation: 0.0,
            animation: Animation::Idle,
            time_scale: 1.0,
            last_persisted_at: None,
            unsaved: false,
        }
    }
}

/// A client-reported state awaiting validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposedState {
    pub position: Vec3,
    pub rotation: f32,
    pub animation: Animation,
    pub time_scale: f32,
}

/// What a proposed position is checked against.
#[derive(Debug, Clone, Copy)]
pub struct MoveContext<'a> {
    pub validator: &'a MovementValidator,
    pub bounds: MapBounds,
    pub radius: f32,
    /// Live bodies the character may not overlap.
    pub bodies: &'a [Circle],
}

/// Result of an [`EntityStateStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub state: EntityState,
    /// Set when the proposed position was refused and the previous one kept.
    pub rejected: Option<MovementRejection>,
}

/// How [`EntityStateStore::load_or_spawn`] placed a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnSource {
    /// Already in memory, e.g. after a page refresh.
    Existing,
    Persisted,
    SceneSpawn,
    Origin,
}

#[derive(Debug)]
pub struct EntityStateStore {
    states: HashMap<CharacterId, EntityState>,
    sessions: HashMap<SessionCode, BTreeSet<CharacterId>>,
    throttle: Duration,
    persistence: PersistenceHandle,
}

impl EntityStateStore {
    pub fn new(throttle: Duration, persistence: PersistenceHandle) -> Self {
        Self {
            states: HashMap::new(),
            sessions: HashMap::new(),
            throttle,
            persistence,
        }
    }

    pub fn persistence(&self) -> &PersistenceHandle {
        &self.persistence
    }

    /// Validates and commits a proposed state.
    ///
    /// A character with no prior state and an invalid position is refused
    /// outright since there is nothing to fall back to.
    pub fn upsert(
        &mut self,
        code: &SessionCode,
        character_id: CharacterId,
        proposed: ProposedState,
        ctx: MoveContext<'_>,
    ) -> Result<Committed, SyncError> {
        let verdict = ctx
            .validator
            .validate_against(proposed.position, &ctx.bounds, ctx.radius, ctx.bodies);

        if let (false, Err(reason)) = (self.states.contains_key(&character_id), verdict) {
            debug!("Rejected first position for character {}: {}", character_id, reason);
            return Err(SyncError::Validation(reason.to_string()));
        }

        let state = self
            .states
            .entry(character_id)
            .or_insert_with(|| EntityState::new(character_id, proposed.position));

        match verdict {
            Ok(()) => state.position = proposed.position,
            Err(reason) => debug!(
                "Rejected movement of character {} to ({:.2}, {:.2}): {}",
                character_id, proposed.position.x, proposed.position.z, reason
            ),
        }

        if proposed.rotation.is_finite() {
            state.rotation = proposed.rotation;
        }
        state.animation = proposed.animation;
        if proposed.time_scale.is_finite() && proposed.time_scale >= 0.0 {
            state.time_scale = proposed.time_scale;
        }

        let now = Instant::now();
        let due = state
            .last_persisted_at
            .map_or(true, |at| now.saturating_duration_since(at) >= self.throttle);
        if due {
            state.last_persisted_at = Some(now);
            state.unsaved = false;
            self.persistence.save(character_id, state.position, state.rotation);
        } else {
            state.unsaved = true;
        }

        let committed = Committed {
            state: state.clone(),
            rejected: verdict.err(),
        };
        self.sessions.entry(code.clone()).or_default().insert(character_id);
        Ok(committed)
    }

    pub fn get(&self, character_id: CharacterId) -> Option<&EntityState> {
        self.states.get(&character_id)
    }

    pub fn contains(&self, character_id: CharacterId) -> bool {
        self.states.contains_key(&character_id)
    }

    /// Every state belonging to `code`, ordered by character id.
    pub fn get_all(&self, code: &SessionCode) -> Vec<&EntityState> {
        self.sessions
            .get(code)
            .map(|ids| ids.iter().filter_map(|id| self.states.get(id)).collect())
            .unwrap_or_default()
    }

    /// Drops the in-memory state. A commit still held back by the throttle
    /// is written first, so the persisted position is the last accepted one.
    pub fn clear(&mut self, character_id: CharacterId) -> Option<EntityState> {
        for ids in self.sessions.values_mut() {
            ids.remove(&character_id);
        }
        self.sessions.retain(|_, ids| !ids.is_empty());
        let state = self.states.remove(&character_id)?;
        if state.unsaved {
            self.persistence.save(character_id, state.position, state.rotation);
        }
        Some(state)
    }

    /// Drops every state of a finished session along with the persisted
    /// positions.
    pub fn purge_session(&mut self, code: &SessionCode) -> usize {
        let Some(ids) = self.sessions.remove(code) else {
            return 0;
        };
        for id in &ids {
            self.states.remove(id);
            self.persistence.clear(*id);
        }
        ids.len()
    }

    /// Places a character on first join.
    ///
    /// Order of preference: state already in memory, the persisted position,
    /// the class spawn of the current scene, then the origin.
    pub fn load_or_spawn(
        &mut self,
        code: &SessionCode,
        character_id: CharacterId,
        class: &ClassType,
        scene_id: &str,
        persisted: Option<StoredPosition>,
        catalog: &dyn SceneCatalog,
    ) -> (EntityState, SpawnSource) {
        self.sessions.entry(code.clone()).or_default().insert(character_id);

        if let Some(state) = self.states.get(&character_id) {
            return (state.clone(), SpawnSource::Existing);
        }

        let (state, source) = match persisted {
            Some(stored) if stored.position.is_finite() => {
                let mut state = EntityState::new(character_id, stored.position);
                state.rotation = stored.rotation;
                (state, SpawnSource::Persisted)
            }
            _ => match catalog.spawn_position(scene_id, class) {
                Some(spawn) => (EntityState::new(character_id, spawn), SpawnSource::SceneSpawn),
                None => {
                    warn!(
                        "⚠️ No spawn configured for class '{}' in scene '{}', placing character {} at origin",
                        class, scene_id, character_id
                    );
                    (EntityState::new(character_id, Vec3::ZERO), SpawnSource::Origin)
                }
            },
        };

        self.states.insert(character_id, state.clone());
        (state, source)
    }

    /// Teleports a character to the spawn of a new scene and resets the
    /// persisted position for that scene.
    pub fn respawn(&mut self, code: &SessionCode, character_id: CharacterId, position: Vec3, scene_id: &str) -> EntityState {
        let mut state = EntityState::new(character_id, position);
        state.last_persisted_at = None;
        self.states.insert(character_id, state.clone());
        self.sessions.entry(code.clone()).or_default().insert(character_id);
        self.persistence.reset_for_scene(character_id, scene_id);
        state
    }

    /// Writes every in-memory position regardless of the throttle. Used on
    /// shutdown.
    pub fn flush_all(&mut self) -> usize {
        let now = Instant::now();
        for state in self.states.values_mut() {
            state.last_persisted_at = Some(now);
            state.unsaved = false;
            self.persistence.save(state.character_id, state.position, state.rotation);
        }
        self.states.len()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::persistence::PersistCommand;
    use tokio::sync::mpsc;

    fn ctx(validator: &MovementValidator) -> MoveContext<'_> {
        MoveContext {
            validator,
            bounds: MapBounds::new(100.0),
            radius: 0.5,
            bodies: &[],
        }
    }

    fn proposal(x: f32, z: f32, rotation: f32, animation: Animation) -> ProposedState {
        ProposedState {
            position: Vec3::new(x, 0.0, z),
            rotation,
            animation,
            time_scale: 1.0,
        }
    }

    #[tokio::test]
    async fn rejected_position_keeps_prior_but_takes_animation() {
        let validator = MovementValidator::new();
        let mut store = EntityStateStore::new(Duration::from_secs(3), PersistenceHandle::detached());
        let code = SessionCode::new("ABCDEF");
        let id = CharacterId(1);

        store.upsert(&code, id, proposal(10.0, 10.0, 0.0, Animation::Walk), ctx(&validator)).expect("valid");
        let committed = store
            .upsert(&code, id, proposal(500.0, 0.0, 1.2, Animation::Attack), ctx(&validator))
            .expect("committed");

        assert_eq!(committed.rejected, Some(MovementRejection::OutOfBounds));
        assert_eq!(committed.state.position, Vec3::new(10.0, 0.0, 10.0));
        assert_eq!(committed.state.rotation, 1.2);
        assert_eq!(committed.state.animation, Animation::Attack);
    }

    #[tokio::test]
    async fn store_reflects_last_valid_update() {
        let validator = MovementValidator::new();
        let mut store = EntityStateStore::new(Duration::from_secs(3), PersistenceHandle::detached());
        let code = SessionCode::new("ABCDEF");
        let id = CharacterId(4);

        let mut last_valid = None;
        for step in 0..40 {
            let x = if step % 3 == 0 { 1000.0 } else { step as f32 };
            let committed = store.upsert(&code, id, proposal(x, -1.0, 0.0, Animation::Run), ctx(&validator));
            if let Ok(c) = committed {
                if c.rejected.is_none() {
                    last_valid = Some(Vec3::new(x, 0.0, -1.0));
                }
            }
        }
        assert_eq!(store.get(id).map(|s| s.position), last_valid);
    }

    #[tokio::test]
    async fn first_update_out_of_bounds_is_refused() {
        let validator = MovementValidator::new();
        let mut store = EntityStateStore::new(Duration::from_secs(3), PersistenceHandle::detached());
        let result = store.upsert(
            &SessionCode::new("ABCDEF"),
            CharacterId(1),
            proposal(0.0, 900.0, 0.0, Animation::Idle),
            ctx(&validator),
        );
        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_is_throttled_per_character() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let validator = MovementValidator::new();
        let mut store = EntityStateStore::new(Duration::from_secs(3), PersistenceHandle::from_sender(sender));
        let code = SessionCode::new("ABCDEF");

        for step in 0..10 {
            store
                .upsert(&code, CharacterId(1), proposal(step as f32, 0.0, 0.0, Animation::Walk), ctx(&validator))
                .expect("commit");
        }
        assert!(matches!(receiver.try_recv(), Ok(PersistCommand::Save { .. })));
        assert!(receiver.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(3)).await;
        store
            .upsert(&code, CharacterId(1), proposal(20.0, 0.0, 0.0, Animation::Walk), ctx(&validator))
            .expect("commit");
        match receiver.try_recv() {
            Ok(PersistCommand::Save { position, .. }) => assert_eq!(position.x, 20.0),
            other => panic!("expected save, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_writes_the_move_held_back_by_the_throttle() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let validator = MovementValidator::new();
        let mut store = EntityStateStore::new(Duration::from_secs(3), PersistenceHandle::from_sender(sender));
        let code = SessionCode::new("ABCDEF");

        store
            .upsert(&code, CharacterId(1), proposal(1.0, 0.0, 0.0, Animation::Walk), ctx(&validator))
            .expect("commit");
        store
            .upsert(&code, CharacterId(1), proposal(9.0, 4.0, 0.0, Animation::Walk), ctx(&validator))
            .expect("commit");
        assert!(matches!(receiver.try_recv(), Ok(PersistCommand::Save { .. })));
        assert!(receiver.try_recv().is_err());

        assert!(store.clear(CharacterId(1)).is_some());
        match receiver.try_recv() {
            Ok(PersistCommand::Save { position, .. }) => assert_eq!(position, Vec3::new(9.0, 0.0, 4.0)),
            other => panic!("expected trailing save, got {other:?}"),
        }

        store
            .upsert(&code, CharacterId(2), proposal(2.0, 0.0, 0.0, Animation::Walk), ctx(&validator))
            .expect("commit");
        assert!(receiver.try_recv().is_ok());
        store.clear(CharacterId(2));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn load_or_spawn_prefers_persisted_then_scene_spawn_then_origin() {
        let catalog = StaticCatalog::builtin();
        let mut store = EntityStateStore::new(Duration::from_secs(3), PersistenceHandle::detached());
        let code = SessionCode::new("ABCDEF");
        let warrior = ClassType::new("warrior");

        let stored = StoredPosition { position: Vec3::new(7.0, 0.0, 7.0), rotation: 1.0 };
        let (state, source) =
            store.load_or_spawn(&code, CharacterId(1), &warrior, "forest_clearing", Some(stored), &catalog);
        assert_eq!(source, SpawnSource::Persisted);
        assert_eq!(state.position, Vec3::new(7.0, 0.0, 7.0));

        let (state, source) = store.load_or_spawn(&code, CharacterId(2), &warrior, "forest_clearing", None, &catalog);
        assert_eq!(source, SpawnSource::SceneSpawn);
        assert_eq!(state.position, Vec3::new(0.0, 0.0, -10.0));

        let (state, source) =
            store.load_or_spawn(&code, CharacterId(3), &ClassType::new("bard"), "forest_clearing", None, &catalog);
        assert_eq!(source, SpawnSource::Origin);
        assert_eq!(state.position, Vec3::ZERO);

        let (_, source) = store.load_or_spawn(&code, CharacterId(1), &warrior, "forest_clearing", None, &catalog);
        assert_eq!(source, SpawnSource::Existing);
        assert_eq!(store.get_all(&code).len(), 3);
    }

    #[test]
    fn purge_session_clears_memory_and_storage() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let catalog = StaticCatalog::builtin();
        let mut store = EntityStateStore::new(Duration::from_secs(3), PersistenceHandle::from_sender(sender));
        let code = SessionCode::new("ABCDEF");
        let mage = ClassType::new("mage");
        store.load_or_spawn(&code, CharacterId(1), &mage, "forest_clearing", None, &catalog);
        store.load_or_spawn(&code, CharacterId(2), &mage, "forest_clearing", None, &catalog);

        assert_eq!(store.purge_session(&code), 2);
        assert!(store.is_empty());
        assert!(matches!(receiver.try_recv(), Ok(PersistCommand::Clear { .. })));
        assert!(matches!(receiver.try_recv(), Ok(PersistCommand::Clear { .. })));
    }
}
