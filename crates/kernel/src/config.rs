use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Per-scene tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Where an arriving agent lands when its carried position is unusable.
    pub arrival_fallback: Vec3,
    pub default_avatar_height: f32,
    /// Cap on how far ahead an arriving crossing agent is extrapolated, in seconds.
    pub max_crossing_interpolation_secs: f32,
    pub spatial_cell_size: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            arrival_fallback: Vec3::new(128.0, 128.0, 128.0),
            default_avatar_height: 1.9,
            max_crossing_interpolation_secs: 3.0,
            spatial_cell_size: 16.0,
        }
    }
}
