//! # Broadcast Scheduler
//!
//! One open batch per session. Updates are appended as they are committed
//! and the global ticker flushes every non-empty batch as a single compact
//! `batch_update`. Latency-sensitive events use [`BroadcastScheduler::flush_now`]
//! instead of waiting for the next tick.

use crate::codec::{EnemyDelta, EntityDelta, PlayerDelta};
use crate::types::SessionCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Accumulated updates of one session.
#[derive(Debug, Clone, Default)]
pub struct PendingBatch {
    pub players: Vec<PlayerDelta>,
    pub enemies: Vec<EnemyDelta>,
    pub entities: Vec<EntityDelta>,
    /// When the first update of this batch was queued.
    pub timestamp: u64,
}

impl PendingBatch {
    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.enemies.is_empty() && self.entities.is_empty()
    }
}

/// Wire form of a flushed batch. Empty arrays are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub t: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub p: Vec<PlayerDelta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub e: Vec<EnemyDelta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub u: Vec<EntityDelta>,
}

impl BatchUpdate {
    pub fn is_empty(&self) -> bool {
        self.p.is_empty() && self.e.is_empty() && self.u.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct BroadcastScheduler {
    batches: HashMap<SessionCode, PendingBatch>,
}

impl BroadcastScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&mut self, code: &SessionCode, now_ms: u64) -> &mut PendingBatch {
        let batch = self.batches.entry(code.clone()).or_default();
        if batch.is_empty() {
            batch.timestamp = now_ms;
        }
        batch
    }

    /// Queues a player delta. A second delta for the same character in the
    /// same batch is folded into the first.
    pub fn add_player_update(&mut self, code: &SessionCode, delta: PlayerDelta, now_ms: u64) {
        if delta.is_empty() {
            return;
        }
        let batch = self.open(code, now_ms);
        match batch.players.iter_mut().find(|p| p.id == delta.id) {
            Some(existing) => existing.merge(delta),
            None => batch.players.push(delta),
        }
    }

    pub fn add_enemy_update(&mut self, code: &SessionCode, delta: EnemyDelta, now_ms: u64) {
        let batch = self.open(code, now_ms);
        match batch.enemies.iter_mut().find(|e| e.id == delta.id) {
            Some(existing) => {
                existing.hp = delta.hp;
                existing.defeated |= delta.defeated;
                if delta.position.is_some() {
                    existing.position = delta.position;
                }
            }
            None => batch.enemies.push(delta),
        }
    }

    pub fn add_entity_update(&mut self, code: &SessionCode, delta: EntityDelta, now_ms: u64) {
        let batch = self.open(code, now_ms);
        match batch.entities.iter_mut().find(|e| e.id == delta.id) {
            Some(existing) => {
                if delta.hp.is_some() {
                    existing.hp = delta.hp;
                }
                existing.destroyed |= delta.destroyed;
            }
            None => batch.entities.push(delta),
        }
    }

    /// Takes the open batch of `code`. Returns `None` when nothing is pending,
    /// so flushing twice is harmless.
    pub fn flush_now(&mut self, code: &SessionCode, now_ms: u64) -> Option<BatchUpdate> {
        let batch = self.batches.remove(code)?;
        if batch.is_empty() {
            return None;
        }
        Some(BatchUpdate {
            t: now_ms,
            p: batch.players,
            e: batch.enemies,
            u: batch.entities,
        })
    }

    /// Flushes every session with pending updates.
    pub fn flush_all(&mut self, now_ms: u64) -> Vec<(SessionCode, BatchUpdate)> {
        let codes: Vec<SessionCode> = self
            .batches
            .iter()
            .filter(|(_, batch)| !batch.is_empty())
            .map(|(code, _)| code.clone())
            .collect();

        let flushed = codes
            .into_iter()
            .filter_map(|code| self.flush_now(&code, now_ms).map(|update| (code, update)))
            .collect();
        self.batches.clear();
        flushed
    }

    /// Drops whatever a session had pending, e.g. when it is deleted.
    pub fn discard(&mut self, code: &SessionCode) {
        self.batches.remove(code);
    }

    pub fn pending(&self, code: &SessionCode) -> Option<&PendingBatch> {
        self.batches.get(code).filter(|b| !b.is_empty())
    }

    pub fn pending_sessions(&self) -> usize {
        self.batches.values().filter(|b| !b.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CharacterId;

    fn player(id: u64, x: f32) -> PlayerDelta {
        PlayerDelta {
            id: CharacterId(id),
            position: Some([x, 0.0, 0.0]),
            rotation: None,
            animation: None,
            time_scale: None,
        }
    }

    #[test]
    fn empty_batches_are_never_emitted() {
        let mut scheduler = BroadcastScheduler::new();
        let code = SessionCode::new("ABCDEF");
        assert!(scheduler.flush_now(&code, 1).is_none());

        scheduler.add_player_update(
            &code,
            PlayerDelta { id: CharacterId(1), position: None, rotation: None, animation: None, time_scale: None },
            1,
        );
        assert!(scheduler.flush_all(2).is_empty());
    }

    #[test]
    fn flush_omits_empty_arrays_and_clears() {
        let mut scheduler = BroadcastScheduler::new();
        let code = SessionCode::new("ABCDEF");
        scheduler.add_player_update(&code, player(1, 1.0), 10);
        scheduler.add_player_update(&code, player(1, 2.0), 20);

        let flushed = scheduler.flush_all(50);
        assert_eq!(flushed.len(), 1);
        let (flushed_code, update) = &flushed[0];
        assert_eq!(flushed_code, &code);
        assert_eq!(update.p.len(), 1);
        assert_eq!(update.p[0].position, Some([2.0, 0.0, 0.0]));

        let json = serde_json::to_string(update).expect("serialize");
        assert_eq!(json, r#"{"t":50,"p":[{"i":1,"p":[2.0,0.0,0.0]}]}"#);

        assert!(scheduler.flush_now(&code, 60).is_none());
        assert_eq!(scheduler.pending_sessions(), 0);
    }

    #[test]
    fn sessions_flush_independently() {
        let mut scheduler = BroadcastScheduler::new();
        let a = SessionCode::new("AAAAAA");
        let b = SessionCode::new("BBBBBB");
        scheduler.add_player_update(&a, player(1, 1.0), 1);
        scheduler.add_enemy_update(&b, EnemyDelta { id: "goblin_1".into(), hp: 10.0, position: None, defeated: false }, 1);

        let update = scheduler.flush_now(&b, 5).expect("b pending");
        assert_eq!(update.e.len(), 1);
        assert!(update.p.is_empty());
        assert!(scheduler.pending(&a).is_some());
    }

    #[test]
    fn enemy_updates_keep_latest_hp_and_defeat_flag() {
        let mut scheduler = BroadcastScheduler::new();
        let code = SessionCode::new("ABCDEF");
        scheduler.add_enemy_update(&code, EnemyDelta { id: "wolf_1".into(), hp: 20.0, position: None, defeated: false }, 1);
        scheduler.add_enemy_update(&code, EnemyDelta { id: "wolf_1".into(), hp: 0.0, position: None, defeated: true }, 2);
        scheduler.add_entity_update(&code, EntityDelta { id: "crate_1".into(), hp: Some(5.0), destroyed: false }, 3);

        let update = scheduler.flush_now(&code, 4).expect("pending");
        assert_eq!(update.e, vec![EnemyDelta { id: "wolf_1".into(), hp: 0.0, position: None, defeated: true }]);
        assert_eq!(update.u.len(), 1);
    }
}
