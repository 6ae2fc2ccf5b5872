use regionspace_common::{AvatarId, ObjectId, PartId};

/// A parcel refused a position. `min_z` is the lowest height the avatar may
/// occupy over that parcel.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("position refused by parcel {parcel}; minimum height {min_z}")]
pub struct PositionDenied {
    pub parcel: u32,
    pub min_z: f32,
}

/// Errors from scene graph operations.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("avatar {0} has no presence in this region")]
    UnknownAvatar(AvatarId),
    #[error("object {0} is not in this region")]
    UnknownObject(ObjectId),
    #[error("part {part} not found in object {object}")]
    UnknownPart { object: ObjectId, part: PartId },
    #[error("object {0} is already in this region")]
    DuplicateObject(ObjectId),
    #[error("object {0} has no parts")]
    EmptyObject(ObjectId),
    #[error("avatar {0} is not a root agent here")]
    NotRoot(AvatarId),
    #[error("avatar {0} is in transit")]
    InTransit(AvatarId),
    #[error(transparent)]
    Denied(#[from] PositionDenied),
}
