//! # Network Codec
//!
//! Shrinks authoritative state into what actually goes on the wire:
//!
//! * positions and rotations are rounded to a fixed number of decimals,
//! * animations travel as a one-byte id instead of a name,
//! * player updates only carry the fields that changed since the last
//!   broadcast of that character, and unchanged characters send nothing.
//!
//! Wire keys are single letters (`i`, `p`, `r`, `a`, `s`, `h`, `d`) because a
//! batch is emitted twenty times per second to every session member.

use crate::entity_state::EntityState;
use crate::types::{CharacterId, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f32::consts::PI;

/// Animation states understood by the clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Animation {
    #[default]
    Idle = 0,
    Walk = 1,
    Run = 2,
    Attack = 3,
    Cast = 4,
    Hit = 5,
    Death = 6,
    Jump = 7,
}

impl Animation {
    const ALL: [Animation; 8] = [
        Animation::Idle,
        Animation::Walk,
        Animation::Run,
        Animation::Attack,
        Animation::Cast,
        Animation::Hit,
        Animation::Death,
        Animation::Jump,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Animation::Idle => "idle",
            Animation::Walk => "walk",
            Animation::Run => "run",
            Animation::Attack => "attack",
            Animation::Cast => "cast",
            Animation::Hit => "hit",
            Animation::Death => "death",
            Animation::Jump => "jump",
        }
    }

    /// Looks up an animation by client-side name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.iter().copied().find(|a| a.name().eq_ignore_ascii_case(name))
    }
}

/// Rounds `value` to `decimals` decimal places.
pub fn quantize(value: f32, decimals: u32) -> f32 {
    let factor = 10f32.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Encodes `value` as a fixed-point integer with `decimals` decimal places.
pub fn quantize_fixed(value: f32, decimals: u32) -> i32 {
    let factor = 10f32.powi(decimals as i32);
    (value * factor).round() as i32
}

/// Inverse of [`quantize_fixed`].
pub fn dequantize_fixed(value: i32, decimals: u32) -> f32 {
    value as f32 / 10f32.powi(decimals as i32)
}

/// Wraps an angle into `[-PI, PI)`.
pub fn normalize_angle(radians: f32) -> f32 {
    if !radians.is_finite() {
        return 0.0;
    }
    let wrapped = (radians + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped >= PI { wrapped - 2.0 * PI } else { wrapped }
}

/// Quantized view of one character, as last seen by clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySnapshot {
    pub position: [f32; 3],
    pub rotation: f32,
    pub animation: u8,
    pub time_scale: f32,
}

/// Field-level player update (`p` array of a batch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDelta {
    #[serde(rename = "i")]
    pub id: CharacterId,
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f32; 3]>,
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f32>,
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<u8>,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub time_scale: Option<f32>,
}

impl PlayerDelta {
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.rotation.is_none()
            && self.animation.is_none()
            && self.time_scale.is_none()
    }

    /// Folds a newer delta for the same character into this one.
    pub fn merge(&mut self, newer: PlayerDelta) {
        if newer.position.is_some() {
            self.position = newer.position;
        }
        if newer.rotation.is_some() {
            self.rotation = newer.rotation;
        }
        if newer.animation.is_some() {
            self.animation = newer.animation;
        }
        if newer.time_scale.is_some() {
            self.time_scale = newer.time_scale;
        }
    }

    /// Position carried by this delta, if any.
    pub fn position_vec(&self) -> Option<Vec3> {
        self.position.map(|[x, y, z]| Vec3::new(x, y, z))
    }
}

/// Enemy update (`e` array of a batch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyDelta {
    #[serde(rename = "i")]
    pub id: String,
    #[serde(rename = "h")]
    pub hp: f32,
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f32; 3]>,
    #[serde(rename = "d", default, skip_serializing_if = "std::ops::Not::not")]
    pub defeated: bool,
}

/// Generic world-entity update (`u` array of a batch), e.g. structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDelta {
    #[serde(rename = "i")]
    pub id: String,
    #[serde(rename = "h", default, skip_serializing_if = "Option::is_none")]
    pub hp: Option<f32>,
    #[serde(rename = "d", default, skip_serializing_if = "std::ops::Not::not")]
    pub destroyed: bool,
}

/// Quantizer plus per-character memory of what was last broadcast.
#[derive(Debug)]
pub struct NetworkCodec {
    position_decimals: u32,
    rotation_decimals: u32,
    last_sent: HashMap<CharacterId, EntitySnapshot>,
}

impl NetworkCodec {
    pub fn new(position_decimals: u32, rotation_decimals: u32) -> Self {
        Self {
            position_decimals,
            rotation_decimals,
            last_sent: HashMap::new(),
        }
    }

    pub fn quantize_position(&self, position: Vec3) -> [f32; 3] {
        [
            quantize(position.x, self.position_decimals),
            quantize(position.y, self.position_decimals),
            quantize(position.z, self.position_decimals),
        ]
    }

    pub fn dequantize_position(&self, position: [f32; 3]) -> Vec3 {
        Vec3::new(position[0], position[1], position[2])
    }

    pub fn quantize_rotation(&self, rotation: f32) -> f32 {
        quantize(normalize_angle(rotation), self.rotation_decimals)
    }

    pub fn snapshot(&self, state: &EntityState) -> EntitySnapshot {
        EntitySnapshot {
            position: self.quantize_position(state.position),
            rotation: self.quantize_rotation(state.rotation),
            animation: state.animation.id(),
            time_scale: quantize(state.time_scale, 2),
        }
    }

    /// Every field of `state`; also becomes the new baseline.
    pub fn encode_full(&mut self, state: &EntityState) -> PlayerDelta {
        let snapshot = self.snapshot(state);
        self.last_sent.insert(state.character_id, snapshot);
        full_delta(state.character_id, &snapshot)
    }

    /// Every field of `state` without touching the baseline. Used when one
    /// recipient needs the whole picture, e.g. a character entering its
    /// interest radius.
    pub fn encode_snapshot(&self, state: &EntityState) -> PlayerDelta {
        full_delta(state.character_id, &self.snapshot(state))
    }

    /// Only the fields that differ from the last broadcast, or `None` when
    /// nothing visible changed.
    pub fn encode_delta(&mut self, state: &EntityState) -> Option<PlayerDelta> {
        let Some(previous) = self.last_sent.get(&state.character_id).copied() else {
            return Some(self.encode_full(state));
        };

        let current = self.snapshot(state);
        let delta = diff(state.character_id, &previous, &current);
        if delta.is_empty() {
            return None;
        }
        self.last_sent.insert(state.character_id, current);
        Some(delta)
    }

    /// Drops the baseline so the next update is sent in full.
    pub fn forget(&mut self, character_id: CharacterId) {
        self.last_sent.remove(&character_id);
    }

    pub fn tracked(&self) -> usize {
        self.last_sent.len()
    }
}

fn full_delta(id: CharacterId, snapshot: &EntitySnapshot) -> PlayerDelta {
    PlayerDelta {
        id,
        position: Some(snapshot.position),
        rotation: Some(snapshot.rotation),
        animation: Some(snapshot.animation),
        time_scale: Some(snapshot.time_scale),
    }
}

/// Field-level difference between two snapshots of the same character.
pub fn diff(id: CharacterId, previous: &EntitySnapshot, current: &EntitySnapshot) -> PlayerDelta {
    PlayerDelta {
        id,
        position: (previous.position != current.position).then_some(current.position),
        rotation: (previous.rotation != current.rotation).then_some(current.rotation),
        animation: (previous.animation != current.animation).then_some(current.animation),
        time_scale: (previous.time_scale != current.time_scale).then_some(current.time_scale),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: u64, x: f32, z: f32, rotation: f32, animation: Animation) -> EntityState {
        let mut state = EntityState::new(CharacterId(id), Vec3::new(x, 0.0, z));
        state.rotation = rotation;
        state.animation = animation;
        state
    }

    #[test]
    fn quantization_rounds_to_fixed_precision() {
        assert_eq!(quantize(1.23456, 2), 1.23);
        assert_eq!(quantize(-7.891, 1), -7.9);
        assert_eq!(quantize_fixed(12.346, 2), 1235);
        assert_eq!(dequantize_fixed(1235, 2), 12.35);
    }

    #[test]
    fn angles_wrap_into_half_open_range() {
        assert!((normalize_angle(1.5 * PI) - -PI / 2.0).abs() < 1e-5);
        assert!((normalize_angle(-PI / 2.0) - -PI / 2.0).abs() < 1e-5);
        assert_eq!(normalize_angle(f32::NAN), 0.0);
    }

    #[test]
    fn animation_names_and_ids_round_trip() {
        assert_eq!(Animation::from_name("RUN"), Some(Animation::Run));
        assert_eq!(Animation::from_id(6), Some(Animation::Death));
        assert_eq!(Animation::from_id(200), None);
        assert_eq!(Animation::from_name("moonwalk"), None);
    }

    #[test]
    fn first_encoding_is_full_then_only_changes() {
        let mut codec = NetworkCodec::new(2, 3);
        let first = codec.encode_delta(&state(1, 1.0, 2.0, 0.5, Animation::Idle)).expect("first");
        assert!(first.position.is_some() && first.rotation.is_some());
        assert!(first.animation.is_some() && first.time_scale.is_some());

        let moved = codec.encode_delta(&state(1, 1.5, 2.0, 0.5, Animation::Idle)).expect("moved");
        assert_eq!(moved.position, Some([1.5, 0.0, 2.0]));
        assert_eq!(moved.rotation, None);
        assert_eq!(moved.animation, None);
    }

    #[test]
    fn sub_precision_jitter_is_suppressed() {
        let mut codec = NetworkCodec::new(2, 3);
        codec.encode_delta(&state(1, 1.0, 2.0, 0.5, Animation::Walk));
        assert!(codec.encode_delta(&state(1, 1.001, 2.002, 0.5001, Animation::Walk)).is_none());
    }

    #[test]
    fn forget_forces_full_update() {
        let mut codec = NetworkCodec::new(2, 3);
        codec.encode_delta(&state(1, 1.0, 2.0, 0.5, Animation::Walk));
        codec.forget(CharacterId(1));
        let delta = codec.encode_delta(&state(1, 1.0, 2.0, 0.5, Animation::Walk)).expect("full");
        assert!(delta.position.is_some());
        assert_eq!(codec.tracked(), 1);
    }

    #[test]
    fn empty_fields_are_omitted_on_the_wire() {
        let delta = PlayerDelta {
            id: CharacterId(7),
            position: None,
            rotation: Some(1.5),
            animation: None,
            time_scale: None,
        };
        let json = serde_json::to_string(&delta).expect("serialize");
        assert_eq!(json, r#"{"i":7,"r":1.5}"#);
    }

    #[test]
    fn merge_keeps_latest_fields() {
        let mut older = PlayerDelta {
            id: CharacterId(7),
            position: Some([1.0, 0.0, 1.0]),
            rotation: Some(0.1),
            animation: None,
            time_scale: None,
        };
        older.merge(PlayerDelta {
            id: CharacterId(7),
            position: Some([2.0, 0.0, 2.0]),
            rotation: None,
            animation: Some(2),
            time_scale: None,
        });
        assert_eq!(older.position, Some([2.0, 0.0, 2.0]));
        assert_eq!(older.rotation, Some(0.1));
        assert_eq!(older.animation, Some(2));
    }
}
