//! # Spatial Index
//!
//! Uniform grid over a square map centred on the origin. Each entity lives in
//! exactly one cell; radius queries visit the ring of cells that can contain a
//! match and then filter by exact distance, so cost depends on the local
//! neighbourhood and not on how many entities the session holds.
//!
//! The index is derived data: it can always be rebuilt from authoritative
//! positions and is never consulted as the source of truth for a position.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Grid coordinates of a cell.
pub type CellKey = (i32, i32);

#[derive(Debug, Clone, Copy)]
struct Tracked {
    cell: CellKey,
    x: f32,
    z: f32,
}

/// Uniform-grid spatial index keyed by any hashable entity id.
#[derive(Debug, Clone)]
pub struct SpatialIndex<K> {
    cell_size: f32,
    half_extent: f32,
    cells_per_axis: i32,
    cells: HashMap<CellKey, HashSet<K>>,
    entities: HashMap<K, Tracked>,
}

impl<K> SpatialIndex<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates a grid of `cell_size` cells covering `map_extent` units per axis.
    pub fn new(cell_size: f32, map_extent: f32) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { 25.0 };
        let map_extent = if map_extent > 0.0 { map_extent } else { cell_size };
        let cells_per_axis = ((map_extent / cell_size).ceil() as i32).max(1);
        Self {
            cell_size,
            half_extent: map_extent / 2.0,
            cells_per_axis,
            cells: HashMap::new(),
            entities: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn cells_per_axis(&self) -> i32 {
        self.cells_per_axis
    }

    /// Cell containing `(x, z)`. Points outside the map resolve to the nearest
    /// edge cell.
    pub fn cell_key(&self, x: f32, z: f32) -> CellKey {
        (self.axis_index(x), self.axis_index(z))
    }

    fn axis_index(&self, coordinate: f32) -> i32 {
        let coordinate = if coordinate.is_finite() { coordinate } else { 0.0 };
        let index = ((coordinate + self.half_extent) / self.cell_size).floor();
        // Saturating float-to-int cast, then clamp into the grid.
        (index as i32).clamp(0, self.cells_per_axis - 1)
    }

    /// Moves (or inserts) an entity. Staying inside the same cell only
    /// refreshes the cached position.
    pub fn update(&mut self, id: K, x: f32, z: f32) {
        let cell = self.cell_key(x, z);

        if let Some(tracked) = self.entities.get_mut(&id) {
            let previous = tracked.cell;
            tracked.x = x;
            tracked.z = z;
            if previous == cell {
                return;
            }
            tracked.cell = cell;
            Self::detach(&mut self.cells, previous, &id);
        } else {
            self.entities.insert(id.clone(), Tracked { cell, x, z });
        }

        self.cells.entry(cell).or_default().insert(id);
    }

    /// Removes an entity. Returns `false` if it was not tracked.
    pub fn remove(&mut self, id: &K) -> bool {
        match self.entities.remove(id) {
            Some(tracked) => {
                Self::detach(&mut self.cells, tracked.cell, id);
                true
            }
            None => false,
        }
    }

    fn detach(cells: &mut HashMap<CellKey, HashSet<K>>, cell: CellKey, id: &K) {
        if let Some(members) = cells.get_mut(&cell) {
            members.remove(id);
            if members.is_empty() {
                cells.remove(&cell);
            }
        }
    }

    /// All entities whose exact distance to `(x, z)` is at most `radius`.
    pub fn query_radius(&self, x: f32, z: f32, radius: f32) -> Vec<K> {
        if !(radius >= 0.0) {
            return Vec::new();
        }

        let (origin_x, origin_z) = self.cell_key(x, z);
        let rings = (radius / self.cell_size).ceil() as i32;
        let radius_sq = radius * radius;
        let mut found = Vec::new();

        let min_x = (origin_x - rings).max(0);
        let max_x = (origin_x + rings).min(self.cells_per_axis - 1);
        let min_z = (origin_z - rings).max(0);
        let max_z = (origin_z + rings).min(self.cells_per_axis - 1);

        for cx in min_x..=max_x {
            for cz in min_z..=max_z {
                let Some(members) = self.cells.get(&(cx, cz)) else {
                    continue;
                };
                for id in members {
                    if let Some(tracked) = self.entities.get(id) {
                        let dx = tracked.x - x;
                        let dz = tracked.z - z;
                        if dx * dx + dz * dz <= radius_sq {
                            found.push(id.clone());
                        }
                    }
                }
            }
        }

        found
    }

    /// Last position recorded for an entity.
    pub fn position(&self, id: &K) -> Option<(f32, f32)> {
        self.entities.get(id).map(|t| (t.x, t.z))
    }

    pub fn contains(&self, id: &K) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of non-empty cells.
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn cell_key_offsets_and_clamps() {
        let index: SpatialIndex<u32> = SpatialIndex::new(25.0, 500.0);
        assert_eq!(index.cells_per_axis(), 20);
        assert_eq!(index.cell_key(0.0, 0.0), (10, 10));
        assert_eq!(index.cell_key(-250.0, -250.0), (0, 0));
        assert_eq!(index.cell_key(-1000.0, 1000.0), (0, 19));
        assert_eq!(index.cell_key(f32::NAN, 0.0), (10, 10));
    }

    #[test]
    fn moving_within_a_cell_keeps_membership() {
        let mut index = SpatialIndex::new(25.0, 500.0);
        index.update(1u32, 1.0, 1.0);
        index.update(1u32, 2.0, 3.0);
        assert_eq!(index.occupied_cells(), 1);
        assert_eq!(index.position(&1), Some((2.0, 3.0)));
    }

    #[test]
    fn moving_across_cells_drops_empty_buckets() {
        let mut index = SpatialIndex::new(25.0, 500.0);
        index.update(1u32, 1.0, 1.0);
        index.update(1u32, 100.0, 100.0);
        assert_eq!(index.occupied_cells(), 1);
        assert!(index.query_radius(1.0, 1.0, 5.0).is_empty());
        assert_eq!(index.query_radius(100.0, 100.0, 0.0), vec![1]);
    }

    #[test]
    fn remove_forgets_entity() {
        let mut index = SpatialIndex::new(25.0, 500.0);
        index.update("goblin".to_string(), 10.0, 10.0);
        assert!(index.remove(&"goblin".to_string()));
        assert!(!index.remove(&"goblin".to_string()));
        assert!(index.is_empty());
        assert_eq!(index.occupied_cells(), 0);
    }

    #[test]
    fn radius_query_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for round in 0..50 {
            let cell_size = rng.gen_range(2.0..40.0);
            let mut index = SpatialIndex::new(cell_size, 400.0);
            let mut positions = Vec::new();
            for id in 0..200u32 {
                // A few entities deliberately sit outside the map.
                let x = rng.gen_range(-260.0..260.0);
                let z = rng.gen_range(-260.0..260.0);
                index.update(id, x, z);
                positions.push((id, x, z));
            }
            // Shuffle some entities around to exercise cell changes.
            for _ in 0..50 {
                let id = rng.gen_range(0..200u32);
                let x = rng.gen_range(-200.0..200.0);
                let z = rng.gen_range(-200.0..200.0);
                index.update(id, x, z);
                positions[id as usize] = (id, x, z);
            }

            for _ in 0..20 {
                let qx: f32 = rng.gen_range(-220.0..220.0);
                let qz: f32 = rng.gen_range(-220.0..220.0);
                let r: f32 = rng.gen_range(0.0..80.0);

                let expected: HashSet<u32> = positions
                    .iter()
                    .filter(|(_, x, z)| {
                        let dx = x - qx;
                        let dz = z - qz;
                        dx * dx + dz * dz <= r * r
                    })
                    .map(|(id, _, _)| *id)
                    .collect();
                let actual: HashSet<u32> = index.query_radius(qx, qz, r).into_iter().collect();
                assert_eq!(actual, expected, "round {round}: query ({qx}, {qz}, r={r})");
            }
        }
    }
}
