//! Region server configuration, loaded from YAML.
//!
//! Every section has defaults, so a file only needs the keys it changes.

use regionspace_common::RegionDescriptor;
use regionspace_kernel::SceneConfig;
use regionspace_transit::TransitSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors from loading or saving a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("region location {x},{y} is off the grid")]
    Location { x: u32, y: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSection {
    pub name: String,
    /// Grid location in region units.
    pub location_x: u32,
    pub location_y: u32,
    /// Inter-region endpoint. Derived from the name when absent.
    pub uri: Option<String>,
}

impl Default for RegionSection {
    fn default() -> Self {
        Self {
            name: "region".to_string(),
            location_x: 1000,
            location_y: 1000,
            uri: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossingSettings {
    /// How far an avatar or object reaching a region edge with no
    /// neighbour is pushed back, in metres.
    pub border_nudge: f32,
    /// How far ahead, in seconds, an avatar's velocity is projected when
    /// deciding whether it is leaving the region.
    pub projection_step_secs: f32,
    /// An object that arrived with riders still on their way may not cross
    /// again until this long after it arrived.
    pub recross_wait_ms: u64,
}

impl Default for CrossingSettings {
    fn default() -> Self {
        Self {
            border_nudge: 3.0,
            projection_step_secs: 0.0312,
            recross_wait_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitSection {
    pub release_timeout_ms: u64,
    pub object_result_timeout_ms: u64,
}

impl Default for TransitSection {
    fn default() -> Self {
        let defaults = TransitSettings::default();
        Self {
            release_timeout_ms: defaults.release_timeout.as_millis() as u64,
            object_result_timeout_ms: defaults.object_result_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncomingSettings {
    /// Incoming objects older than this are refused.
    pub object_staleness_ms: u64,
}

impl Default for IncomingSettings {
    fn default() -> Self {
        Self {
            object_staleness_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    /// How long a login arrival stays eligible for the initial attachment rez.
    pub initial_rez_ttl_secs: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            initial_rez_ttl_secs: regionspace_kernel::INITIAL_REZ_TTL.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub frame_interval_ms: u64,
    /// Frames kept for rolling frame-time statistics.
    pub timer_window: usize,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            frame_interval_ms: 89,
            timer_window: 64,
        }
    }
}

impl HeartbeatSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub region: RegionSection,
    pub scene: SceneConfig,
    pub crossing: CrossingSettings,
    pub transit: TransitSection,
    pub incoming: IncomingSettings,
    pub connection: ConnectionSection,
    pub heartbeat: HeartbeatSettings,
}

impl RegionConfig {
    /// Defaults for a region called `name` at grid location `(x, y)`.
    pub fn named(name: impl Into<String>, x: u32, y: u32) -> Self {
        Self {
            region: RegionSection {
                name: name.into(),
                location_x: x,
                location_y: y,
                uri: None,
            },
            ..Self::default()
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_yaml::from_reader(file)?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = std::fs::File::create(path)?;
        serde_yaml::to_writer(file, self)?;
        Ok(())
    }

    pub fn descriptor(&self) -> Result<RegionDescriptor, ConfigError> {
        let (x, y) = (self.region.location_x, self.region.location_y);
        let mut descriptor = RegionDescriptor::new(self.region.name.clone(), x, y)
            .ok_or(ConfigError::Location { x, y })?;
        if let Some(uri) = &self.region.uri {
            descriptor.uri = uri.clone();
        }
        Ok(descriptor)
    }

    pub fn transit_settings(&self) -> TransitSettings {
        TransitSettings {
            release_timeout: Duration::from_millis(self.transit.release_timeout_ms),
            object_result_timeout: Duration::from_millis(self.transit.object_result_timeout_ms),
        }
    }

    pub fn initial_rez_ttl(&self) -> Duration {
        Duration::from_secs(self.connection.initial_rez_ttl_secs)
    }
}
