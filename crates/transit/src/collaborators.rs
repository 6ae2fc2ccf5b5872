//! Services a region relies on to move avatars and objects elsewhere.

use async_trait::async_trait;
use glam::Vec3;
use regionspace_common::{AvatarId, RegionDescriptor, RegionHandle, TeleportFlags};
use regionspace_kernel::{AgentSnapshot, ObjectSnapshot, Parcel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::args::TransitKind;

/// Regions this one currently knows as neighbours.
pub trait NeighborDirectory: Send + Sync {
    fn get_known_neighbor_by_handle(&self, handle: RegionHandle) -> Option<RegionDescriptor>;

    /// Whether a neighbour occupies grid location `(x, y)`.
    fn has_known_neighbor_at(&self, x: u32, y: u32) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildAgentUpdateResponse {
    Ok,
    AccessDenied,
    MethodNotAvailable,
    Error(String),
}

/// What a destination needs to set up a child presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildAgentRequest {
    pub avatar: AvatarId,
    pub name: String,
    pub source: RegionHandle,
    pub teleport_flags: TeleportFlags,
}

/// Region-to-region messaging.
///
/// `send_create_object` is called from the frame thread and blocks until the
/// destination answers. The agent legs are awaited from transit tasks.
#[async_trait]
pub trait InterregionTransport: Send + Sync {
    fn send_create_object(
        &self,
        destination: RegionHandle,
        object: &ObjectSnapshot,
        riders: &[AvatarId],
        must_be_root: bool,
        target_position: Vec3,
        is_attachment: bool,
    ) -> bool;

    async fn send_release_agent(&self, destination: RegionHandle, avatar: AvatarId, uri: &str) -> bool;

    async fn create_child_agent(
        &self,
        destination: RegionHandle,
        request: ChildAgentRequest,
    ) -> Result<(), String>;

    async fn update_child_agent(
        &self,
        destination: RegionHandle,
        snapshot: &AgentSnapshot,
    ) -> ChildAgentUpdateResponse;

    async fn close_child_agent(&self, destination: RegionHandle, avatar: AvatarId) -> bool;

    /// Tell the avatar's viewer to move to `destination`.
    async fn queue_client_transfer(
        &self,
        destination: RegionHandle,
        avatar: AvatarId,
        kind: TransitKind,
        position: Vec3,
    ) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstateSettings {
    pub allow_direct_teleport: bool,
    pub managers: BTreeSet<AvatarId>,
}

impl EstateSettings {
    pub fn is_estate_manager(&self, avatar: AvatarId) -> bool {
        self.managers.contains(&avatar)
    }
}

/// A fixed arrival point for an estate, optionally with spawn points
/// relative to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telehub {
    pub position: Vec3,
    pub spawn_points: Vec<Vec3>,
}

/// Grid-wide lookups.
pub trait GridService: Send + Sync {
    fn land_data(&self, region: RegionHandle, x: f32, y: f32) -> Option<Parcel>;
    fn region_by_handle(&self, region: RegionHandle) -> Option<RegionDescriptor>;
    fn estate_settings(&self, region: RegionHandle) -> Option<EstateSettings>;
    fn telehub(&self, region: RegionHandle) -> Option<Telehub>;
}

pub trait Permissions: Send + Sync {
    fn can_teleport(&self, avatar: AvatarId) -> bool;

    /// Gods and estate staff skip parcel landing rules.
    fn is_elevated(&self, avatar: AvatarId) -> bool;

    fn authorize_incoming_object(&self, object: &ObjectSnapshot, riders: &[AvatarId]) -> Result<(), String>;
}

/// Everyone may do everything; nobody is elevated.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenPermissions;

impl Permissions for OpenPermissions {
    fn can_teleport(&self, _avatar: AvatarId) -> bool {
        true
    }

    fn is_elevated(&self, _avatar: AvatarId) -> bool {
        false
    }

    fn authorize_incoming_object(&self, _object: &ObjectSnapshot, _riders: &[AvatarId]) -> Result<(), String> {
        Ok(())
    }
}
