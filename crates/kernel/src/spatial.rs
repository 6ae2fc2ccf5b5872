use glam::Vec3;
use regionspace_common::LocalId;
use std::collections::{HashMap, HashSet};

/// A 2D cell coordinate on the region's ground plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Fixed-size grid over the region's XY plane.
///
/// Every root presence and live object is registered under its local id.
/// Entries are moved when positions change and dropped when a presence goes
/// child or an object leaves the scene.
#[derive(Debug)]
pub struct SpatialIndex {
    cell_size: f32,
    cells: HashMap<CellCoord, HashSet<LocalId>>,
    placement: HashMap<LocalId, CellCoord>,
}

impl SpatialIndex {
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { 16.0 };
        Self {
            cell_size,
            cells: HashMap::new(),
            placement: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn position_to_cell(&self, pos: Vec3) -> CellCoord {
        CellCoord {
            x: (pos.x / self.cell_size).floor() as i32,
            y: (pos.y / self.cell_size).floor() as i32,
        }
    }

    /// Register or move `id` to the cell containing `pos`.
    pub fn update(&mut self, id: LocalId, pos: Vec3) {
        let coord = self.position_to_cell(pos);
        if let Some(old) = self.placement.insert(id, coord) {
            if old == coord {
                return;
            }
            self.remove_from_cell(old, id);
        }
        self.cells.entry(coord).or_default().insert(id);
    }

    pub fn remove(&mut self, id: LocalId) -> bool {
        match self.placement.remove(&id) {
            Some(coord) => {
                self.remove_from_cell(coord, id);
                true
            }
            None => false,
        }
    }

    fn remove_from_cell(&mut self, coord: CellCoord, id: LocalId) {
        if let Some(set) = self.cells.get_mut(&coord) {
            set.remove(&id);
            if set.is_empty() {
                self.cells.remove(&coord);
            }
        }
    }

    pub fn contains(&self, id: LocalId) -> bool {
        self.placement.contains_key(&id)
    }

    pub fn in_cell(&self, coord: CellCoord) -> HashSet<LocalId> {
        self.cells.get(&coord).cloned().unwrap_or_default()
    }

    /// Ids within `radius` cells of the cell containing `center`.
    pub fn in_radius(&self, center: Vec3, radius: i32) -> HashSet<LocalId> {
        let c = self.position_to_cell(center);
        let mut result = HashSet::new();
        for dx in -radius..=radius {
            for dy in -radius..=radius {
                if let Some(ids) = self.cells.get(&CellCoord::new(c.x + dx, c.y + dy)) {
                    result.extend(ids);
                }
            }
        }
        result
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn len(&self) -> usize {
        self.placement.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placement.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_moves_between_cells() {
        let mut index = SpatialIndex::new(16.0);
        index.update(LocalId(1), Vec3::new(1.0, 1.0, 0.0));
        index.update(LocalId(1), Vec3::new(40.0, 1.0, 0.0));

        assert!(index.in_cell(CellCoord::new(0, 0)).is_empty());
        assert!(index.in_cell(CellCoord::new(2, 0)).contains(&LocalId(1)));
        assert_eq!(index.cell_count(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn remove_clears_placement() {
        let mut index = SpatialIndex::new(16.0);
        index.update(LocalId(4), Vec3::new(100.0, 100.0, 30.0));
        assert!(index.remove(LocalId(4)));
        assert!(!index.remove(LocalId(4)));
        assert!(index.is_empty());
        assert_eq!(index.cell_count(), 0);
    }

    #[test]
    fn radius_query_covers_neighbouring_cells() {
        let mut index = SpatialIndex::new(16.0);
        index.update(LocalId(1), Vec3::new(8.0, 8.0, 0.0));
        index.update(LocalId(2), Vec3::new(24.0, 8.0, 0.0));
        index.update(LocalId(3), Vec3::new(200.0, 200.0, 0.0));

        let near = index.in_radius(Vec3::new(8.0, 8.0, 0.0), 1);
        assert_eq!(near.len(), 2);
        assert!(!near.contains(&LocalId(3)));
    }
}
