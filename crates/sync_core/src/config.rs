//! Tuning knobs for the sync engine.
//!
//! Every field has a serde default so a partial `[sync]` table in the server
//! configuration file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_max_members() -> usize { 4 }
fn default_code_length() -> usize { 6 }
fn default_cell_size() -> f32 { 25.0 }
fn default_map_extent() -> f32 { 500.0 }
fn default_max_range() -> f32 { 250.0 }
fn default_player_radius() -> f32 { 0.5 }
fn default_tick_interval_ms() -> u64 { 50 }
fn default_persist_throttle_ms() -> u64 { 3000 }
fn default_countdown_ms() -> u64 { 2000 }
fn default_disconnect_grace_ms() -> u64 { 15_000 }
fn default_zone_tolerance() -> f32 { 1.0 }
fn default_combat_tolerance() -> f32 { 2.0 }
fn default_interest_radius() -> f32 { 60.0 }
fn default_position_decimals() -> u32 { 2 }
fn default_rotation_decimals() -> u32 { 3 }

/// Sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Maximum members per session
    #[serde(default = "default_max_members")]
    pub max_members: usize,
    /// Length of generated lobby codes
    #[serde(default = "default_code_length")]
    pub code_length: usize,
    /// Spatial grid cell size in world units
    #[serde(default = "default_cell_size")]
    pub cell_size: f32,
    /// Full width/depth of the area covered by the spatial grid
    #[serde(default = "default_map_extent")]
    pub map_extent: f32,
    /// Movement bound used when a scene does not declare its own
    #[serde(default = "default_max_range")]
    pub default_max_range: f32,
    /// Collision radius used for players
    #[serde(default = "default_player_radius")]
    pub player_radius: f32,
    /// Broadcast/timer tick interval in milliseconds (20 Hz by default)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Minimum time between two position writes for the same character
    #[serde(default = "default_persist_throttle_ms")]
    pub persist_throttle_ms: u64,
    /// Zone-entry countdown before a scene transition
    #[serde(default = "default_countdown_ms")]
    pub countdown_ms: u64,
    /// How long a disconnected member of a running game keeps their slot
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,
    /// Slack allowed when checking that a player stands in their zone
    #[serde(default = "default_zone_tolerance")]
    pub zone_tolerance: f32,
    /// Slack added to an archetype's hit distance when validating attacks
    #[serde(default = "default_combat_tolerance")]
    pub combat_tolerance: f32,
    /// Radius used for area-of-interest queries
    #[serde(default = "default_interest_radius")]
    pub interest_radius: f32,
    /// Decimal places kept for positions on the wire
    #[serde(default = "default_position_decimals")]
    pub position_decimals: u32,
    /// Decimal places kept for rotations on the wire
    #[serde(default = "default_rotation_decimals")]
    pub rotation_decimals: u32,
    /// Reject movement that overlaps a living enemy
    #[serde(default)]
    pub collide_with_enemies: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_members: default_max_members(),
            code_length: default_code_length(),
            cell_size: default_cell_size(),
            map_extent: default_map_extent(),
            default_max_range: default_max_range(),
            player_radius: default_player_radius(),
            tick_interval_ms: default_tick_interval_ms(),
            persist_throttle_ms: default_persist_throttle_ms(),
            countdown_ms: default_countdown_ms(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            zone_tolerance: default_zone_tolerance(),
            combat_tolerance: default_combat_tolerance(),
            interest_radius: default_interest_radius(),
            position_decimals: default_position_decimals(),
            rotation_decimals: default_rotation_decimals(),
            collide_with_enemies: false,
        }
    }
}

impl SyncConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn persist_throttle(&self) -> Duration {
        Duration::from_millis(self.persist_throttle_ms)
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_millis(self.countdown_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// Checks the values for consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_members == 0 || self.max_members > 4 {
            return Err(format!("sync.max_members must be between 1 and 4, got {}", self.max_members));
        }
        if self.code_length < 4 {
            return Err("sync.code_length must be at least 4".to_string());
        }
        if !(self.cell_size > 0.0) {
            return Err("sync.cell_size must be greater than 0".to_string());
        }
        if !(self.map_extent > 0.0) {
            return Err("sync.map_extent must be greater than 0".to_string());
        }
        if !(self.default_max_range > 0.0) {
            return Err("sync.default_max_range must be greater than 0".to_string());
        }
        if self.tick_interval_ms == 0 {
            return Err("sync.tick_interval_ms must be greater than 0".to_string());
        }
        if self.zone_tolerance < 0.0 || self.combat_tolerance < 0.0 {
            return Err("sync tolerances cannot be negative".to_string());
        }
        Ok(())
    }
}
