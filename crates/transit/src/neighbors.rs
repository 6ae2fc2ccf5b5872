use regionspace_common::{RegionDescriptor, RegionHandle};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::collaborators::NeighborDirectory;

/// Neighbour table filled in by whoever wires regions together.
#[derive(Debug, Default)]
pub struct StaticNeighborDirectory {
    neighbors: RwLock<BTreeMap<RegionHandle, RegionDescriptor>>,
}

impl StaticNeighborDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_neighbors(neighbors: impl IntoIterator<Item = RegionDescriptor>) -> Self {
        let dir = Self::new();
        for n in neighbors {
            dir.insert(n);
        }
        dir
    }

    pub fn insert(&self, region: RegionDescriptor) {
        self.neighbors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region.handle, region);
    }

    pub fn remove(&self, handle: RegionHandle) -> Option<RegionDescriptor> {
        self.neighbors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.neighbors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NeighborDirectory for StaticNeighborDirectory {
    fn get_known_neighbor_by_handle(&self, handle: RegionHandle) -> Option<RegionDescriptor> {
        self.neighbors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }

    fn has_known_neighbor_at(&self, x: u32, y: u32) -> bool {
        RegionHandle::from_location(x, y)
            .and_then(|h| self.get_known_neighbor_by_handle(h))
            .is_some()
    }
}
