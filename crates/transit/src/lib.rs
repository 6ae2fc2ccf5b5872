//! Avatar transit: moving a root presence out of this region.
//!
//! # Invariants
//! - An avatar is registered as in transit from `try_begin_transit` until its
//!   task finishes, and never twice at once.
//! - A failed transit undoes its completed steps in reverse order.

pub mod args;
pub mod avatar_transit;
pub mod collaborators;
pub mod controller;
pub mod error;
pub mod neighbors;

pub use args::{RideOn, TransitArguments, TransitKind};
pub use avatar_transit::{AvatarTransitController, TransitEvent, TransitSettings, TransitStage};
pub use collaborators::{
    ChildAgentRequest, ChildAgentUpdateResponse, EstateSettings, GridService, InterregionTransport,
    NeighborDirectory, OpenPermissions, Permissions, Telehub,
};
pub use controller::{TransitController, TransitTask};
pub use error::TransitError;
pub use neighbors::StaticNeighborDirectory;
