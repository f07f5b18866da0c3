//! # Scene Catalog
//!
//! Static, read-only game data the engine consumes but does not own: class
//! archetypes, enemy and structure tables, scene definitions (bounds, spawns,
//! zones, placements) and scenarios that order scenes into a run.
//!
//! [`SceneCatalog`] is the seam the rest of the engine talks to.
//! [`StaticCatalog`] is the bundled implementation, either built in or loaded
//! from a JSON file.

use crate::movement::Circle;
use crate::types::{ClassType, SceneId, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

/// Errors raised while loading a catalog file.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid catalog: {0}")]
    Invalid(String),
}

/// Per-class stats and assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Archetype {
    pub name: String,
    pub max_hp: f32,
    pub auto_attack_damage: f32,
    pub hit_distance: f32,
    pub move_speed: f32,
    pub radius: f32,
    pub scale: f32,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnemyType {
    pub name: String,
    pub max_hp: f32,
    pub damage: f32,
    pub radius: f32,
    pub scale: f32,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureType {
    pub name: String,
    /// `None` for indestructible structures.
    #[serde(default)]
    pub max_hp: Option<f32>,
    pub radius: f32,
    pub scale: f32,
    pub model: String,
}

/// Circular teleport zone assigned to one class in a scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub x: f32,
    pub z: f32,
    pub radius: f32,
}

impl Zone {
    pub fn contains(&self, position: Vec3, tolerance: f32) -> bool {
        let dx = position.x - self.x;
        let dz = position.z - self.z;
        let reach = self.radius + tolerance;
        dx * dx + dz * dz <= reach * reach
    }
}

/// An enemy or structure instance placed in a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub id: String,
    /// Key into the enemy or structure table.
    pub kind: String,
    pub position: Vec3,
}

/// Everything the server and clients need to run one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneConfig {
    pub id: SceneId,
    pub name: String,
    pub max_range: f32,
    #[serde(default)]
    pub spawns: BTreeMap<String, Vec3>,
    #[serde(default)]
    pub zones: BTreeMap<String, Zone>,
    #[serde(default)]
    pub enemies: Vec<Placement>,
    #[serde(default)]
    pub structures: Vec<Placement>,
    #[serde(default)]
    pub obstacles: Vec<Circle>,
}

impl SceneConfig {
    pub fn spawn_for(&self, class: &ClassType) -> Option<Vec3> {
        self.spawns.get(class.as_str()).copied()
    }

    pub fn zone_for(&self, class: &ClassType) -> Option<&Zone> {
        self.zones.get(class.as_str())
    }
}

/// Ordered list of scenes making up one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub maps: Vec<SceneId>,
}

/// Read access to scene data.
pub trait SceneCatalog: Send + Sync + std::fmt::Debug {
    fn scene_config(&self, scene_id: &str) -> Option<&SceneConfig>;

    fn archetype(&self, class: &ClassType) -> Option<&Archetype>;

    fn enemy_type(&self, kind: &str) -> Option<&EnemyType>;

    fn structure_type(&self, kind: &str) -> Option<&StructureType>;

    fn scenario(&self, scenario_id: &str) -> Option<&Scenario>;

    /// Scene order used when a scenario is unknown or lists no maps.
    fn default_order(&self) -> &[SceneId];

    fn spawn_position(&self, scene_id: &str, class: &ClassType) -> Option<Vec3> {
        self.scene_config(scene_id)?.spawn_for(class)
    }

    /// Ordered scene list for `scenario_id`, falling back to the default order.
    fn scene_order(&self, scenario_id: Option<&str>) -> &[SceneId] {
        match scenario_id.and_then(|id| self.scenario(id)) {
            Some(scenario) if !scenario.maps.is_empty() => &scenario.maps,
            _ => self.default_order(),
        }
    }

    fn first_scene(&self, scenario_id: Option<&str>) -> Option<SceneId> {
        self.scene_order(scenario_id).first().cloned()
    }

    /// Scene after `current_id`, or `None` once the run is complete.
    fn next_scene(&self, current_id: &str, scenario_id: Option<&str>) -> Option<SceneId> {
        let order = self.scene_order(scenario_id);
        let index = order.iter().position(|id| id == current_id)?;
        order.get(index + 1).cloned()
    }

    fn is_player_in_zone(&self, position: Vec3, scene_id: &str, class: &ClassType, tolerance: f32) -> bool {
        self.scene_config(scene_id)
            .and_then(|scene| scene.zone_for(class))
            .is_some_and(|zone| zone.contains(position, tolerance))
    }
}

/// In-memory catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticCatalog {
    #[serde(default)]
    archetypes: HashMap<String, Archetype>,
    #[serde(default)]
    enemy_types: HashMap<String, EnemyType>,
    #[serde(default)]
    structure_types: HashMap<String, StructureType>,
    #[serde(default)]
    scenes: HashMap<SceneId, SceneConfig>,
    #[serde(default)]
    scenarios: HashMap<String, Scenario>,
    #[serde(default)]
    default_order: Vec<SceneId>,
}

impl StaticCatalog {
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let catalog: StaticCatalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_json_str(&content)?;
        info!(
            "📚 Loaded scene catalog from {} ({} scenes, {} scenarios)",
            path.display(),
            catalog.scenes.len(),
            catalog.scenarios.len()
        );
        Ok(catalog)
    }

    /// Every scene referenced by an order list must exist, and each
    /// placement must name a known enemy or structure type.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.default_order.is_empty() {
            return Err(CatalogError::Invalid("defaultOrder lists no scenes".to_string()));
        }
        let orders = std::iter::once(&self.default_order).chain(self.scenarios.values().map(|s| &s.maps));
        for order in orders {
            if let Some(missing) = order.iter().find(|id| !self.scenes.contains_key(*id)) {
                return Err(CatalogError::Invalid(format!("unknown scene '{missing}'")));
            }
        }
        for scene in self.scenes.values() {
            if let Some(p) = scene.enemies.iter().find(|p| !self.enemy_types.contains_key(&p.kind)) {
                return Err(CatalogError::Invalid(format!(
                    "scene '{}' places unknown enemy type '{}'",
                    scene.id, p.kind
                )));
            }
            if let Some(p) = scene.structures.iter().find(|p| !self.structure_types.contains_key(&p.kind)) {
                return Err(CatalogError::Invalid(format!(
                    "scene '{}' places unknown structure type '{}'",
                    scene.id, p.kind
                )));
            }
        }
        Ok(())
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    /// The catalog shipped with the server: three classes, three scenes.
    pub fn builtin() -> Self {
        let archetypes = [
            archetype("warrior", 150.0, 18.0, 1.0, 5.0, 0.6, 1.1, "models/warrior.glb"),
            archetype("mage", 90.0, 25.0, 8.0, 4.5, 0.5, 1.0, "models/mage.glb"),
            archetype("healer", 100.0, 10.0, 6.0, 4.8, 0.5, 1.0, "models/healer.glb"),
        ];
        let enemy_types = [
            enemy("goblin", 40.0, 6.0, 0.5, 0.8, "models/goblin.glb"),
            enemy("wolf", 55.0, 9.0, 0.7, 1.0, "models/wolf.glb"),
            enemy("skeleton", 70.0, 11.0, 0.5, 1.0, "models/skeleton.glb"),
            enemy("golem", 240.0, 22.0, 1.4, 2.0, "models/golem.glb"),
        ];
        let structure_types = [
            structure("barricade", Some(120.0), 1.5, 1.0, "models/barricade.glb"),
            structure("crate", Some(20.0), 0.6, 1.0, "models/crate.glb"),
            structure("totem", None, 1.0, 1.5, "models/totem.glb"),
        ];

        let scenes = [
            SceneConfig {
                id: "forest_clearing".into(),
                name: "Forest Clearing".into(),
                max_range: 120.0,
                spawns: class_map([(0.0, -10.0), (-3.0, -12.0), (3.0, -12.0)]),
                zones: zone_map([(-20.0, 80.0), (0.0, 85.0), (20.0, 80.0)], 3.0),
                enemies: vec![
                    place("goblin_1", "goblin", 10.0, 20.0),
                    place("goblin_2", "goblin", -12.0, 24.0),
                    place("wolf_1", "wolf", 30.0, 45.0),
                ],
                structures: vec![
                    place("crate_1", "crate", 5.0, 5.0),
                    place("totem_1", "totem", 0.0, 60.0),
                ],
                obstacles: vec![Circle::new(-25.0, 30.0, 4.0), Circle::new(25.0, 10.0, 3.0)],
            },
            SceneConfig {
                id: "ruined_keep".into(),
                name: "Ruined Keep".into(),
                max_range: 150.0,
                spawns: class_map([(0.0, -100.0), (-4.0, -104.0), (4.0, -104.0)]),
                zones: zone_map([(-30.0, 110.0), (0.0, 120.0), (30.0, 110.0)], 3.0),
                enemies: vec![
                    place("skeleton_1", "skeleton", -15.0, 0.0),
                    place("skeleton_2", "skeleton", 15.0, 0.0),
                    place("wolf_2", "wolf", 40.0, 60.0),
                ],
                structures: vec![
                    place("barricade_1", "barricade", 0.0, 30.0),
                    place("crate_2", "crate", -40.0, -20.0),
                ],
                obstacles: vec![Circle::new(0.0, 70.0, 6.0)],
            },
            SceneConfig {
                id: "crystal_caverns".into(),
                name: "Crystal Caverns".into(),
                max_range: 90.0,
                spawns: class_map([(0.0, -70.0), (-3.0, -73.0), (3.0, -73.0)]),
                zones: zone_map([(-10.0, 75.0), (0.0, 80.0), (10.0, 75.0)], 2.5),
                enemies: vec![
                    place("golem_1", "golem", 0.0, 40.0),
                    place("goblin_3", "goblin", -20.0, 10.0),
                ],
                structures: vec![place("totem_2", "totem", 0.0, 0.0)],
                obstacles: vec![Circle::new(-30.0, 40.0, 5.0), Circle::new(30.0, 40.0, 5.0)],
            },
        ];

        let scenarios = [
            Scenario {
                id: "classic".into(),
                name: "Classic Run".into(),
                maps: vec!["forest_clearing".into(), "ruined_keep".into(), "crystal_caverns".into()],
            },
            Scenario {
                id: "short".into(),
                name: "Short Run".into(),
                maps: vec!["forest_clearing".into(), "crystal_caverns".into()],
            },
            Scenario { id: "freeplay".into(), name: "Free Play".into(), maps: Vec::new() },
        ];

        Self {
            archetypes: archetypes.into_iter().map(|a| (a.name.clone(), a)).collect(),
            enemy_types: enemy_types.into_iter().map(|e| (e.name.clone(), e)).collect(),
            structure_types: structure_types.into_iter().map(|s| (s.name.clone(), s)).collect(),
            scenes: scenes.into_iter().map(|s| (s.id.clone(), s)).collect(),
            scenarios: scenarios.into_iter().map(|s| (s.id.clone(), s)).collect(),
            default_order: vec!["forest_clearing".into(), "ruined_keep".into(), "crystal_caverns".into()],
        }
    }

    pub fn insert_scene(&mut self, scene: SceneConfig) {
        self.scenes.insert(scene.id.clone(), scene);
    }

    pub fn insert_scenario(&mut self, scenario: Scenario) {
        self.scenarios.insert(scenario.id.clone(), scenario);
    }

    pub fn insert_archetype(&mut self, archetype: Archetype) {
        self.archetypes.insert(archetype.name.clone(), archetype);
    }

    pub fn set_default_order(&mut self, order: Vec<SceneId>) {
        self.default_order = order;
    }
}

impl SceneCatalog for StaticCatalog {
    fn scene_config(&self, scene_id: &str) -> Option<&SceneConfig> {
        self.scenes.get(scene_id)
    }

    fn archetype(&self, class: &ClassType) -> Option<&Archetype> {
        self.archetypes.get(class.as_str())
    }

    fn enemy_type(&self, kind: &str) -> Option<&EnemyType> {
        self.enemy_types.get(kind)
    }

    fn structure_type(&self, kind: &str) -> Option<&StructureType> {
        self.structure_types.get(kind)
    }

    fn scenario(&self, scenario_id: &str) -> Option<&Scenario> {
        self.scenarios.get(scenario_id)
    }

    fn default_order(&self) -> &[SceneId] {
        &self.default_order
    }
}

#[allow(clippy::too_many_arguments)]
fn archetype(
    name: &str,
    max_hp: f32,
    auto_attack_damage: f32,
    hit_distance: f32,
    move_speed: f32,
    radius: f32,
    scale: f32,
    model: &str,
) -> Archetype {
    Archetype {
        name: name.to_string(),
        max_hp,
        auto_attack_damage,
        hit_distance,
        move_speed,
        radius,
        scale,
        model: model.to_string(),
    }
}

fn enemy(name: &str, max_hp: f32, damage: f32, radius: f32, scale: f32, model: &str) -> EnemyType {
    EnemyType {
        name: name.to_string(),
        max_hp,
        damage,
        radius,
        scale,
        model: model.to_string(),
    }
}

fn structure(name: &str, max_hp: Option<f32>, radius: f32, scale: f32, model: &str) -> StructureType {
    StructureType {
        name: name.to_string(),
        max_hp,
        radius,
        scale,
        model: model.to_string(),
    }
}

fn place(id: &str, kind: &str, x: f32, z: f32) -> Placement {
    Placement {
        id: id.to_string(),
        kind: kind.to_string(),
        position: Vec3::new(x, 0.0, z),
    }
}

const CLASSES: [&str; 3] = ["warrior", "mage", "healer"];

fn class_map(points: [(f32, f32); 3]) -> BTreeMap<String, Vec3> {
    CLASSES
        .iter()
        .zip(points)
        .map(|(class, (x, z))| (class.to_string(), Vec3::new(x, 0.0, z)))
        .collect()
}

fn zone_map(points: [(f32, f32); 3], radius: f32) -> BTreeMap<String, Zone> {
    CLASSES
        .iter()
        .zip(points)
        .map(|(class, (x, z))| (class.to_string(), Zone { x, z, radius }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_consistent() {
        let catalog = StaticCatalog::builtin();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.scene_count(), 3);
        let warrior = catalog.archetype(&ClassType::new("Warrior")).expect("warrior");
        assert_eq!(warrior.hit_distance, 1.0);
    }

    #[test]
    fn next_scene_follows_scenario_then_default_order() {
        let catalog = StaticCatalog::builtin();
        assert_eq!(catalog.first_scene(Some("short")).as_deref(), Some("forest_clearing"));
        assert_eq!(
            catalog.next_scene("forest_clearing", Some("short")).as_deref(),
            Some("crystal_caverns")
        );
        assert_eq!(catalog.next_scene("crystal_caverns", Some("short")), None);
        // Scenario without maps and unknown scenarios use the default order.
        assert_eq!(
            catalog.next_scene("forest_clearing", Some("freeplay")).as_deref(),
            Some("ruined_keep")
        );
        assert_eq!(
            catalog.next_scene("forest_clearing", Some("missing")).as_deref(),
            Some("ruined_keep")
        );
        assert_eq!(catalog.next_scene("nowhere", None), None);
    }

    #[test]
    fn zone_check_applies_tolerance() {
        let catalog = StaticCatalog::builtin();
        let mage = ClassType::new("mage");
        // Mage zone in the forest: centre (0, 85), radius 3.
        assert!(catalog.is_player_in_zone(Vec3::new(0.0, 0.0, 88.5), "forest_clearing", &mage, 1.0));
        assert!(!catalog.is_player_in_zone(Vec3::new(0.0, 0.0, 88.5), "forest_clearing", &mage, 0.0));
        assert!(!catalog.is_player_in_zone(Vec3::ZERO, "forest_clearing", &ClassType::new("bard"), 1.0));
    }

    #[test]
    fn json_catalog_rejects_unknown_scene_references() {
        let json = r#"{
            "scenes": {},
            "defaultOrder": ["missing"]
        }"#;
        assert!(matches!(StaticCatalog::from_json_str(json), Err(CatalogError::Invalid(_))));
    }

    #[test]
    fn builtin_round_trips_through_json() {
        let json = serde_json::to_string(&StaticCatalog::builtin()).expect("serialize");
        let parsed = StaticCatalog::from_json_str(&json).expect("parse");
        assert_eq!(
            parsed.spawn_position("ruined_keep", &ClassType::new("healer")),
            Some(Vec3::new(4.0, 0.0, -104.0))
        );
    }
}
