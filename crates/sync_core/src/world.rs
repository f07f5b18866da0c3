//! Per-session scene world: the enemies and structures loaded from the
//! catalog, the spatial index over everything with a position, and the
//! movement validator configured with the scene's obstacles.
//!
//! Combat lives here as well since it needs the same catalogs and index.

use crate::catalog::{Archetype, SceneCatalog, SceneConfig};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::movement::{Circle, MapBounds, MovementValidator, StaticObstacles};
use crate::spatial::SpatialIndex;
use crate::types::{CharacterId, SceneId, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Key of anything tracked by a session's spatial index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Player(CharacterId),
    Enemy(String),
    Structure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnemyInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Vec3,
    pub hp: f32,
    pub max_hp: f32,
    pub radius: f32,
    pub scale: f32,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub position: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hp: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hp: Option<f32>,
    pub radius: f32,
    pub scale: f32,
    pub model: String,
}

/// Which table an attacked target lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Enemy,
    Structure,
}

/// Result of a successful attack.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackOutcome {
    pub target: String,
    pub kind: TargetKind,
    pub damage: f32,
    pub remaining_hp: f32,
    /// The target reached zero hp and was removed from the world.
    pub defeated: bool,
}

#[derive(Debug)]
pub struct SessionWorld {
    scene_id: SceneId,
    bounds: MapBounds,
    enemies: BTreeMap<String, EnemyInstance>,
    structures: BTreeMap<String, StructureInstance>,
    spatial: SpatialIndex<EntityKey>,
    validator: MovementValidator,
}

impl SessionWorld {
    /// World with no scene data, used when a scene id is missing from the
    /// catalog.
    pub fn empty(scene_id: impl Into<SceneId>, config: &SyncConfig) -> Self {
        Self {
            scene_id: scene_id.into(),
            bounds: MapBounds::new(config.default_max_range),
            enemies: BTreeMap::new(),
            structures: BTreeMap::new(),
            spatial: SpatialIndex::new(config.cell_size, config.map_extent),
            validator: MovementValidator::new(),
        }
    }

    /// Instantiates a scene's placements against the static tables.
    pub fn load(scene: &SceneConfig, catalog: &dyn SceneCatalog, config: &SyncConfig) -> Self {
        let max_range = if scene.max_range > 0.0 { scene.max_range } else { config.default_max_range };
        let mut world = Self::empty(scene.id.clone(), config);
        world.bounds = MapBounds::new(max_range);
        if !scene.obstacles.is_empty() {
            world.validator.add_obstacles(StaticObstacles::new(scene.obstacles.clone()));
        }

        for placement in &scene.enemies {
            let Some(kind) = catalog.enemy_type(&placement.kind) else {
                warn!("⚠️ Scene '{}' references unknown enemy type '{}'", scene.id, placement.kind);
                continue;
            };
            world.spatial.update(
                EntityKey::Enemy(placement.id.clone()),
                placement.position.x,
                placement.position.z,
            );
            world.enemies.insert(
                placement.id.clone(),
                EnemyInstance {
                    id: placement.id.clone(),
                    kind: placement.kind.clone(),
                    position: placement.position,
                    hp: kind.max_hp,
                    max_hp: kind.max_hp,
                    radius: kind.radius,
                    scale: kind.scale,
                    model: kind.model.clone(),
                },
            );
        }

        for placement in &scene.structures {
            let Some(kind) = catalog.structure_type(&placement.kind) else {
                warn!("⚠️ Scene '{}' references unknown structure type '{}'", scene.id, placement.kind);
                continue;
            };
            world.spatial.update(
                EntityKey::Structure(placement.id.clone()),
                placement.position.x,
                placement.position.z,
            );
            world.structures.insert(
                placement.id.clone(),
                StructureInstance {
                    id: placement.id.clone(),
                    kind: placement.kind.clone(),
                    position: placement.position,
                    hp: kind.max_hp,
                    max_hp: kind.max_hp,
                    radius: kind.radius,
                    scale: kind.scale,
                    model: kind.model.clone(),
                },
            );
        }

        debug!(
            "Loaded scene '{}' with {} enemies and {} structures",
            scene.id,
            world.enemies.len(),
            world.structures.len()
        );
        world
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    pub fn bounds(&self) -> MapBounds {
        self.bounds
    }

    pub fn validator(&self) -> &MovementValidator {
        &self.validator
    }

    pub fn place_player(&mut self, character_id: CharacterId, position: Vec3) {
        self.spatial.update(EntityKey::Player(character_id), position.x, position.z);
    }

    pub fn remove_player(&mut self, character_id: CharacterId) {
        self.spatial.remove(&EntityKey::Player(character_id));
    }

    /// Characters within `radius` of a point.
    pub fn players_near(&self, position: Vec3, radius: f32) -> Vec<CharacterId> {
        let mut ids: Vec<CharacterId> = self
            .spatial
            .query_radius(position.x, position.z, radius)
            .into_iter()
            .filter_map(|key| match key {
                EntityKey::Player(id) => Some(id),
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }

    /// Collision circles of every living enemy.
    pub fn enemy_bodies(&self) -> Vec<Circle> {
        self.enemies
            .values()
            .map(|e| Circle::new(e.position.x, e.position.z, e.radius))
            .collect()
    }

    pub fn enemy(&self, id: &str) -> Option<&EnemyInstance> {
        self.enemies.get(id)
    }

    pub fn structure(&self, id: &str) -> Option<&StructureInstance> {
        self.structures.get(id)
    }

    pub fn enemies(&self) -> Vec<EnemyInstance> {
        self.enemies.values().cloned().collect()
    }

    pub fn structures(&self) -> Vec<StructureInstance> {
        self.structures.values().cloned().collect()
    }

    /// Applies one auto-attack from `attacker` at `position` to `target_id`.
    ///
    /// The target must be within the archetype's hit distance plus
    /// `tolerance`. Targets at zero hp are removed from the world.
    pub fn attack(
        &mut self,
        position: Vec3,
        archetype: &Archetype,
        target_id: &str,
        tolerance: f32,
    ) -> Result<AttackOutcome, SyncError> {
        let (key, target_position) = if let Some(enemy) = self.enemies.get(target_id) {
            (EntityKey::Enemy(target_id.to_string()), enemy.position)
        } else if let Some(structure) = self.structures.get(target_id) {
            if structure.hp.is_none() {
                return Err(SyncError::TargetNotFound(target_id.to_string()));
            }
            (EntityKey::Structure(target_id.to_string()), structure.position)
        } else {
            return Err(SyncError::TargetNotFound(target_id.to_string()));
        };

        let reach = archetype.hit_distance + tolerance;
        let in_reach = self
            .spatial
            .query_radius(position.x, position.z, reach)
            .iter()
            .any(|k| *k == key);
        if !in_reach {
            return Err(SyncError::OutOfRange {
                target: target_id.to_string(),
                distance: position.distance_xz(&target_position),
                reach,
            });
        }

        let damage = archetype.auto_attack_damage;
        let (kind, remaining_hp) = match &key {
            EntityKey::Enemy(id) => {
                let enemy = self
                    .enemies
                    .get_mut(id)
                    .ok_or_else(|| SyncError::TargetNotFound(id.clone()))?;
                enemy.hp = (enemy.hp - damage).max(0.0);
                (TargetKind::Enemy, enemy.hp)
            }
            EntityKey::Structure(id) => {
                let structure = self
                    .structures
                    .get_mut(id)
                    .ok_or_else(|| SyncError::TargetNotFound(id.clone()))?;
                let hp = (structure.hp.unwrap_or_default() - damage).max(0.0);
                structure.hp = Some(hp);
                (TargetKind::Structure, hp)
            }
            EntityKey::Player(_) => return Err(SyncError::TargetNotFound(target_id.to_string())),
        };

        let defeated = remaining_hp <= 0.0;
        if defeated {
            self.spatial.remove(&key);
            match kind {
                TargetKind::Enemy => {
                    self.enemies.remove(target_id);
                }
                TargetKind::Structure => {
                    self.structures.remove(target_id);
                }
            }
        }

        Ok(AttackOutcome {
            target: target_id.to_string(),
            kind,
            damage,
            remaining_hp,
            defeated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Archetype, StaticCatalog};
    use crate::types::ClassType;

    fn forest() -> (SessionWorld, StaticCatalog) {
        let catalog = StaticCatalog::builtin();
        let scene = catalog.scene_config("forest_clearing").expect("scene").clone();
        (SessionWorld::load(&scene, &catalog, &SyncConfig::default()), catalog)
    }

    fn warrior(catalog: &StaticCatalog) -> Archetype {
        catalog.archetype(&ClassType::new("warrior")).expect("warrior").clone()
    }

    #[test]
    fn loading_instantiates_placements_at_full_hp() {
        let (world, _) = forest();
        let goblin = world.enemy("goblin_1").expect("goblin");
        assert_eq!(goblin.hp, 40.0);
        assert_eq!(world.enemies().len(), 3);
        assert_eq!(world.bounds().max_range, 120.0);
        assert!(!world.validator().is_valid(Vec3::new(-25.0, 0.0, 30.0), &world.bounds(), 0.5));
    }

    #[test]
    fn attack_within_tolerance_deals_auto_attack_damage() {
        let (mut world, catalog) = forest();
        let warrior = warrior(&catalog);
        // goblin_1 sits at (10, 20); warrior hitDistance 1 + tolerance 2.
        let outcome = world
            .attack(Vec3::new(10.0, 0.0, 17.5), &warrior, "goblin_1", 2.0)
            .expect("hit");
        assert_eq!(outcome.damage, warrior.auto_attack_damage);
        assert_eq!(outcome.remaining_hp, 40.0 - warrior.auto_attack_damage);
        assert!(!outcome.defeated);
    }

    #[test]
    fn attack_beyond_reach_is_rejected() {
        let (mut world, catalog) = forest();
        let result = world.attack(Vec3::new(10.0, 0.0, 16.0), &warrior(&catalog), "goblin_1", 2.0);
        assert!(matches!(result, Err(SyncError::OutOfRange { .. })));
        assert_eq!(world.enemy("goblin_1").map(|g| g.hp), Some(40.0));
    }

    #[test]
    fn defeated_targets_leave_queries() {
        let (mut world, catalog) = forest();
        let warrior = warrior(&catalog);
        let at = Vec3::new(10.0, 0.0, 19.0);
        let mut last = None;
        for _ in 0..3 {
            last = Some(world.attack(at, &warrior, "goblin_1", 2.0).expect("hit"));
        }
        assert!(last.is_some_and(|o| o.defeated));
        assert!(world.enemy("goblin_1").is_none());
        assert!(!world.spatial.query_radius(at.x, at.z, 5.0).contains(&EntityKey::Enemy("goblin_1".into())));
        assert!(matches!(
            world.attack(at, &warrior, "goblin_1", 2.0),
            Err(SyncError::TargetNotFound(_))
        ));
    }

    #[test]
    fn indestructible_structures_cannot_be_attacked() {
        let (mut world, catalog) = forest();
        let result = world.attack(Vec3::new(0.0, 0.0, 59.0), &warrior(&catalog), "totem_1", 2.0);
        assert!(matches!(result, Err(SyncError::TargetNotFound(_))));
    }

    #[test]
    fn players_near_uses_spatial_index() {
        let (mut world, _) = forest();
        world.place_player(CharacterId(1), Vec3::new(0.0, 0.0, 0.0));
        world.place_player(CharacterId(2), Vec3::new(3.0, 0.0, 4.0));
        world.place_player(CharacterId(3), Vec3::new(80.0, 0.0, 0.0));
        assert_eq!(world.players_near(Vec3::ZERO, 5.0), vec![CharacterId(1), CharacterId(2)]);
        world.remove_player(CharacterId(2));
        assert_eq!(world.players_near(Vec3::ZERO, 5.0), vec![CharacterId(1)]);
    }
}
