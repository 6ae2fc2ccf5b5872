//! Shared identifiers, region handles and region geometry.

pub mod region;
pub mod types;

pub use types::{
    AvatarId, LocalId, ObjectId, ParseLocationError, PartId, RegionDescriptor, RegionHandle,
    TeleportFlags,
};
