//! # Movement Validation
//!
//! Decides whether a client-proposed position may be committed. The bounds
//! check always runs first and does not depend on the radius the client
//! reports. Obstacle checks are pluggable per scene through [`ObstacleCheck`]
//! so new collision sources can be added without changing the call contract.

use crate::types::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Square movement bounds centred on the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapBounds {
    pub max_range: f32,
}

impl MapBounds {
    pub fn new(max_range: f32) -> Self {
        Self { max_range }
    }

    pub fn contains(&self, position: Vec3) -> bool {
        position.x.abs() <= self.max_range && position.z.abs() <= self.max_range
    }
}

/// A circle on the ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub x: f32,
    pub z: f32,
    pub radius: f32,
}

impl Circle {
    pub fn new(x: f32, z: f32, radius: f32) -> Self {
        Self { x, z, radius }
    }

    /// Strict circle-circle overlap: touching circles do not collide.
    pub fn overlaps(&self, x: f32, z: f32, radius: f32) -> bool {
        let dx = self.x - x;
        let dz = self.z - z;
        let reach = self.radius + radius;
        dx * dx + dz * dz < reach * reach
    }
}

/// Why a position was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementRejection {
    NonFinite,
    OutOfBounds,
    Obstacle,
    Entity,
}

impl fmt::Display for MovementRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            MovementRejection::NonFinite => "non-finite coordinates",
            MovementRejection::OutOfBounds => "out of bounds",
            MovementRejection::Obstacle => "blocked by obstacle",
            MovementRejection::Entity => "overlaps another entity",
        };
        f.write_str(reason)
    }
}

/// A source of collisions for a scene.
pub trait ObstacleCheck: Send + Sync + fmt::Debug {
    /// Whether a body of `radius` at `position` would intersect this source.
    fn blocks(&self, position: Vec3, radius: f32) -> bool;
}

/// Fixed set of circular obstacles.
#[derive(Debug, Clone, Default)]
pub struct StaticObstacles {
    circles: Vec<Circle>,
}

impl StaticObstacles {
    pub fn new(circles: Vec<Circle>) -> Self {
        Self { circles }
    }

    pub fn len(&self) -> usize {
        self.circles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circles.is_empty()
    }
}

impl ObstacleCheck for StaticObstacles {
    fn blocks(&self, position: Vec3, radius: f32) -> bool {
        self.circles.iter().any(|c| c.overlaps(position.x, position.z, radius))
    }
}

/// Bounds check plus any number of registered obstacle sources.
#[derive(Debug, Default)]
pub struct MovementValidator {
    obstacles: Vec<Box<dyn ObstacleCheck>>,
}

impl MovementValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_obstacles(mut self, check: impl ObstacleCheck + 'static) -> Self {
        self.add_obstacles(check);
        self
    }

    pub fn add_obstacles(&mut self, check: impl ObstacleCheck + 'static) {
        self.obstacles.push(Box::new(check));
    }

    pub fn is_valid(&self, position: Vec3, bounds: &MapBounds, radius: f32) -> bool {
        self.validate(position, bounds, radius).is_ok()
    }

    pub fn validate(&self, position: Vec3, bounds: &MapBounds, radius: f32) -> Result<(), MovementRejection> {
        if !position.is_finite() {
            return Err(MovementRejection::NonFinite);
        }
        if !bounds.contains(position) {
            return Err(MovementRejection::OutOfBounds);
        }

        let radius = if radius.is_finite() { radius.max(0.0) } else { 0.0 };
        if self.obstacles.iter().any(|o| o.blocks(position, radius)) {
            return Err(MovementRejection::Obstacle);
        }
        Ok(())
    }

    /// [`validate`](Self::validate) followed by an overlap check against
    /// live bodies (other players, enemies).
    pub fn validate_against<'a>(
        &self,
        position: Vec3,
        bounds: &MapBounds,
        radius: f32,
        bodies: impl IntoIterator<Item = &'a Circle>,
    ) -> Result<(), MovementRejection> {
        self.validate(position, bounds, radius)?;
        if bodies.into_iter().any(|b| b.overlaps(position.x, position.z, radius)) {
            return Err(MovementRejection::Entity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn anything_beyond_max_range_is_rejected() {
        let validator = MovementValidator::new();
        let bounds = MapBounds::new(100.0);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..1000 {
            let mut x: f32 = rng.gen_range(-100.0..=100.0);
            let mut z: f32 = rng.gen_range(-100.0..=100.0);
            // Push one or both axes out of range.
            match rng.gen_range(0..3) {
                0 => x = rng.gen_range(100.001..1000.0) * if rng.gen() { 1.0 } else { -1.0 },
                1 => z = rng.gen_range(100.001..1000.0) * if rng.gen() { 1.0 } else { -1.0 },
                _ => {
                    x = rng.gen_range(100.001..1000.0);
                    z = -rng.gen_range(100.001..1000.0);
                }
            }
            let radius: f32 = rng.gen_range(0.0..10.0);
            let p = Vec3::new(x, 0.0, z);
            assert!(!validator.is_valid(p, &bounds, radius), "{p:?} accepted");
        }
    }

    #[test]
    fn edge_of_map_is_inside() {
        let validator = MovementValidator::new();
        let bounds = MapBounds::new(50.0);
        assert!(validator.is_valid(Vec3::new(50.0, 3.0, -50.0), &bounds, 0.5));
        assert_eq!(
            validator.validate(Vec3::new(f32::NAN, 0.0, 0.0), &bounds, 0.5),
            Err(MovementRejection::NonFinite)
        );
    }

    #[test]
    fn obstacles_use_strict_overlap() {
        let validator = MovementValidator::new()
            .with_obstacles(StaticObstacles::new(vec![Circle::new(10.0, 0.0, 1.0)]));
        let bounds = MapBounds::new(100.0);

        assert_eq!(
            validator.validate(Vec3::new(9.0, 0.0, 0.0), &bounds, 0.5),
            Err(MovementRejection::Obstacle)
        );
        // Exactly touching.
        assert!(validator.is_valid(Vec3::new(8.5, 0.0, 0.0), &bounds, 0.5));
    }

    #[test]
    fn live_bodies_block_movement() {
        let validator = MovementValidator::new();
        let bounds = MapBounds::new(100.0);
        let goblin = Circle::new(0.0, 5.0, 1.0);
        assert_eq!(
            validator.validate_against(Vec3::new(0.0, 0.0, 4.0), &bounds, 0.5, [&goblin]),
            Err(MovementRejection::Entity)
        );
        assert!(validator
            .validate_against(Vec3::new(0.0, 0.0, 0.0), &bounds, 0.5, [&goblin])
            .is_ok());
    }
}
