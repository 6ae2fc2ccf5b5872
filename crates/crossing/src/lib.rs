//! Crossings between regions: objects with their riders, walking avatars
//! and teleports, with the region-side handlers that receive them.
//!
//! # Invariants
//! - Handoffs start on the frame thread and never block it on a lock held
//!   by a transit task.
//! - Every transit task started here is joined: rider legs before the
//!   crossing returns, walking crossings by `reap_finished` or
//!   `join_walking`.

pub mod border;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod heartbeat;
pub mod local;
pub mod region;
pub mod teleport;

pub use border::BorderAction;
pub use config::{
    ConfigError, ConnectionSection, CrossingSettings, HeartbeatSettings, IncomingSettings,
    RegionConfig, RegionSection, TransitSection,
};
pub use coordinator::{Collaborators, CrossingCoordinator, CrossingOutcome};
pub use error::{CrossingError, TeleportError};
pub use heartbeat::{FrameLoop, FrameReport, FrameTimer};
pub use local::LocalGrid;
pub use region::{RegionLinks, RegionServer};
pub use teleport::TeleportOutcome;
