use glam::Vec3;
use regionspace_common::{AvatarId, ObjectId, RegionHandle};
use regionspace_kernel::SceneError;
use regionspace_transit::TransitError;

/// Why an object did not cross. Rider failures after a successful object
/// send are reported in `CrossingOutcome`, not here.
#[derive(Debug, thiserror::Error)]
pub enum CrossingError {
    #[error("object {object} can not cross: {reason}")]
    PrecheckFailed { object: ObjectId, reason: String },
    #[error("object {0} is not in this region")]
    UnknownObject(ObjectId),
    #[error("no region known at {0}")]
    UnknownDestination(RegionHandle),
    #[error("object {0} would cross off the edge of the grid")]
    OffGrid(ObjectId),
    #[error("object {0} went off world")]
    OffWorld(ObjectId),
    #[error("destination refused object {object}")]
    TransportFailed {
        object: ObjectId,
        rider_failures: Vec<(AvatarId, TransitError)>,
    },
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Why a teleport request did not complete. The display text of the
/// variants reported to the viewer is the message it shows.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TeleportError {
    #[error("avatar {0} is not a root agent here")]
    NotRoot(AvatarId),
    #[error("avatar {0} may not teleport")]
    NotPermitted(AvatarId),
    #[error("Teleport not available: Current region not available from grid service.")]
    SourceUnavailable,
    #[error("Destination region appears to be down.")]
    DestinationDown,
    #[error("Destination region could not be found.")]
    DestinationNotFound,
    #[error("Teleport routing at destination parcel is blocked.")]
    Blocked,
    #[error("teleport target {0} is outside the region")]
    InvalidPosition(Vec3),
    #[error("Unable to complete teleport: {0}")]
    Transit(#[from] TransitError),
}

impl TeleportError {
    /// Whether the viewer is told about this failure.
    pub fn reported_to_viewer(&self) -> bool {
        !matches!(
            self,
            Self::NotRoot(_) | Self::NotPermitted(_) | Self::InvalidPosition(_)
        )
    }
}
