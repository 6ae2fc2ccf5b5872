//! Region kernel: scene state, presences, position authority and agent modes.
//!
//! # Invariants
//! - Every avatar position is read and written through its `PositionAuthority`.
//! - A presence is always exactly one of child or root.
//! - Scene maps iterate in id order.

pub mod agent_data;
pub mod agent_mode;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod land;
pub mod object;
pub mod physics;
pub mod position;
pub mod presence;
pub mod scene;
pub mod services;
pub mod spatial;

pub use agent_data::{AgentSnapshot, Arrival, ArrivalKind, SeatRecord, now_ms};
pub use agent_mode::AgentMode;
pub use client::{ClientLog, ClientMessage, ClientView};
pub use config::SceneConfig;
pub use connection::{ConnectionState, INITIAL_REZ_TTL, InitialRezRegistry, RemotePresenceState};
pub use error::{PositionDenied, SceneError};
pub use land::{FlatTerrain, LandChannel, LandingType, Parcel, ParcelMap, Terrain};
pub use object::{ObjectSnapshot, PartRef, PartSnapshot, SceneObject};
pub use physics::{KinematicPhysics, PhysicsActor, PhysicsScene};
pub use position::{PositionAuthority, PositionInfo};
pub use presence::{AgentUpdate, Appearance, ScenePresence};
pub use scene::{Scene, SceneEvent};
pub use services::{NoTransit, NullScriptHost, SceneServices, ScriptHost, TransitStatus};
