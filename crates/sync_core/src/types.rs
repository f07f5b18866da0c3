//! # Core Type Definitions
//!
//! Identifier and geometry types shared by every sync component.
//!
//! ## Key Types
//!
//! - [`ConnectionId`] - transport-level identifier of a live client socket
//! - [`CharacterId`] - persistent identifier of a playable character
//! - [`SessionCode`] - short, human-shareable lobby code
//! - [`ClassType`] - archetype name used to look up spawns, zones and stats
//! - [`Vec3`] - world position; gameplay runs on the X/Z plane, Y is height

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier the transport assigns to a client connection.
///
/// A character keeps its [`CharacterId`] across reconnects, but every new
/// socket gets a fresh `ConnectionId`.
pub type ConnectionId = usize;

/// Identifier of a scene (map) in the scene catalog.
pub type SceneId = String;

/// Persistent identifier of a playable character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub u64);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CharacterId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lobby code shared between players to join the same session.
///
/// Codes are normalised to upper case so `abc123` and `ABC123` address the
/// same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Alphabet used when generating new codes. Ambiguous glyphs (0/O, 1/I) are left out.
    pub const ALPHABET: &'static [u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<SessionCode> for String {
    fn from(value: SessionCode) -> Self {
        value.0
    }
}

/// Archetype name of a character (e.g. `warrior`, `mage`, `healer`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ClassType(String);

impl ClassType {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClassType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<ClassType> for String {
    fn from(value: ClassType) -> Self {
        value.0
    }
}

/// A position in world space.
///
/// Single precision is plenty for maps a few hundred units across and keeps
/// the wire format small.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Squared distance on the ground plane (height is ignored).
    pub fn distance_sq_xz(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        dx * dx + dz * dz
    }

    /// Distance on the ground plane (height is ignored).
    pub fn distance_xz(&self, other: &Vec3) -> f32 {
        self.distance_sq_xz(other).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Milliseconds since the Unix epoch, used for wire timestamps.
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_codes_are_case_insensitive() {
        assert_eq!(SessionCode::new(" ab12cd "), SessionCode::new("AB12CD"));
        assert_eq!(SessionCode::new("ab12cd").as_str(), "AB12CD");
    }

    #[test]
    fn deserialization_normalises_codes_and_classes() {
        let code: SessionCode = serde_json::from_str(r#""xk7p2q""#).expect("code");
        assert_eq!(code.as_str(), "XK7P2Q");
        let class: ClassType = serde_json::from_str(r#"" Mage""#).expect("class");
        assert_eq!(class.as_str(), "mage");
    }

    #[test]
    fn ground_distance_ignores_height() {
        let a = Vec3::new(0.0, 10.0, 0.0);
        let b = Vec3::new(3.0, -4.0, 4.0);
        assert_eq!(a.distance_xz(&b), 5.0);
    }

    #[test]
    fn character_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&CharacterId(42)).expect("serialize");
        assert_eq!(json, "42");
    }
}
