use glam::Vec3;
use regionspace_common::{AvatarId, ObjectId, PartId, RegionDescriptor, TeleportFlags};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitKind {
    OutboundTeleport,
    OutboundCrossing,
}

/// The part an avatar is riding while its object crosses with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideOn {
    pub object: ObjectId,
    pub part: PartId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitArguments {
    pub avatar: AvatarId,
    pub destination: RegionDescriptor,
    /// Where the avatar lands, in the destination's frame.
    pub position: Vec3,
    pub kind: TransitKind,
    pub ride_on: Option<RideOn>,
    pub teleport_flags: TeleportFlags,
}

impl TransitArguments {
    pub fn crossing(avatar: AvatarId, destination: RegionDescriptor, position: Vec3) -> Self {
        Self {
            avatar,
            destination,
            position,
            kind: TransitKind::OutboundCrossing,
            ride_on: None,
            teleport_flags: TeleportFlags::NONE,
        }
    }

    pub fn teleport(
        avatar: AvatarId,
        destination: RegionDescriptor,
        position: Vec3,
        teleport_flags: TeleportFlags,
    ) -> Self {
        Self {
            avatar,
            destination,
            position,
            kind: TransitKind::OutboundTeleport,
            ride_on: None,
            teleport_flags,
        }
    }

    pub fn riding(mut self, ride_on: RideOn) -> Self {
        self.ride_on = Some(ride_on);
        self
    }
}
