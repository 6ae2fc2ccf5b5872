use regionspace_common::AvatarId;

/// Why a transit failed. The display text is what the avatar is told.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitError {
    #[error("avatar {0} is already in transit")]
    AlreadyInTransit(AvatarId),
    #[error("avatar {0} is not in the scene and can not be put in transit")]
    UnknownAvatar(AvatarId),
    #[error("avatar {avatar} can not leave yet: {reason}")]
    NotReady { avatar: AvatarId, reason: String },
    #[error("Unable to create object in remote region")]
    ObjectCreationFailed,
    #[error("Unable to complete transfer to new region: {0}")]
    PresenceFailed(String),
    #[error("region entry denied")]
    AccessDenied,
    #[error("region change not available")]
    MethodNotAvailable,
    #[error("region change failed: {0}")]
    Remote(String),
    #[error("unable to enqueue transfer event")]
    ClientTransferFailed,
    #[error("timeout waiting for avatar to become root on destination")]
    ReleaseTimeout,
    #[error("the region is shutting down")]
    SceneGone,
    #[error("transit task was cancelled")]
    Cancelled,
}
