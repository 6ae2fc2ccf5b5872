use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::region::REGION_SIZE;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Stable identifier of an avatar, shared by every region it has a presence in.
    AvatarId
);
uuid_id!(
    /// Stable identifier of a scene object (a linked set of parts).
    ObjectId
);
uuid_id!(
    /// Stable identifier of a single part inside an object.
    PartId
);

/// Region-local numeric handle. Reassigned whenever a presence or object
/// enters a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct LocalId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Global handle of a region: world-space X in the high 32 bits and Y in the
/// low 32 bits, both in metres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionHandle(pub u64);

impl RegionHandle {
    /// Largest grid coordinate whose world position still fits in 32 bits.
    pub const MAX_LOCATION: u32 = u32::MAX / REGION_SIZE;

    /// Build a handle from grid coordinates (region units, not metres).
    /// `None` when either coordinate is past [`Self::MAX_LOCATION`].
    pub fn from_location(x: u32, y: u32) -> Option<Self> {
        let metres = |v: u32| v.checked_mul(REGION_SIZE).map(u64::from);
        let wx = metres(x)?;
        let wy = metres(y)?;
        Some(Self((wx << 32) | wy))
    }

    /// Grid coordinates (region units) of this handle.
    pub fn to_location(self) -> (u32, u32) {
        let wx = (self.0 >> 32) as u32;
        let wy = (self.0 & 0xffff_ffff) as u32;
        (wx / REGION_SIZE, wy / REGION_SIZE)
    }

    /// Handle of the region offset by `(dx, dy)` grid cells, or `None` when
    /// that would leave the grid.
    pub fn neighbor(self, dx: i64, dy: i64) -> Option<Self> {
        let (x, y) = self.to_location();
        let nx = u32::try_from(i64::from(x) + dx).ok()?;
        let ny = u32::try_from(i64::from(y) + dy).ok()?;
        Self::from_location(nx, ny)
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y) = self.to_location();
        write!(f, "({x},{y})")
    }
}

/// Error returned when a `"x,y"` grid location cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid region location {0:?}: expected \"x,y\"")]
pub struct ParseLocationError(pub String);

impl FromStr for RegionHandle {
    type Err = ParseLocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseLocationError(s.to_string());
        let (x, y) = s.split_once(',').ok_or_else(bad)?;
        let x = x.trim().parse::<u32>().map_err(|_| bad())?;
        let y = y.trim().parse::<u32>().map_err(|_| bad())?;
        Self::from_location(x, y).ok_or_else(bad)
    }
}

/// Everything another region needs to know to reach a region server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub handle: RegionHandle,
    pub name: String,
    /// Base URI of the region's inter-region endpoint.
    pub uri: String,
}

impl RegionDescriptor {
    /// A region at grid location `(x, y)` with the default `region://` uri.
    /// `None` when the location is off the grid.
    pub fn new(name: impl Into<String>, x: u32, y: u32) -> Option<Self> {
        let handle = RegionHandle::from_location(x, y)?;
        let name = name.into();
        let uri = format!("region://{name}");
        Some(Self { handle, name, uri })
    }

    pub fn location(&self) -> (u32, u32) {
        self.handle.to_location()
    }
}

/// Protocol flags carried by a teleport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TeleportFlags(pub u32);

impl TeleportFlags {
    pub const NONE: Self = Self(0);
    pub const SET_HOME_TO_TARGET: Self = Self(1 << 0);
    pub const VIA_LURE: Self = Self(1 << 2);
    pub const VIA_LANDMARK: Self = Self(1 << 3);
    pub const VIA_LOCATION: Self = Self(1 << 4);
    pub const VIA_HOME: Self = Self(1 << 5);
    pub const VIA_LOGIN: Self = Self(1 << 7);
    pub const IS_FLYING: Self = Self(1 << 13);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl std::ops::BitOr for TeleportFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_id_uniqueness() {
        let a = AvatarId::new();
        let b = AvatarId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn region_handle_packs_metres() {
        let h = RegionHandle::from_location(1000, 1001).unwrap();
        assert_eq!(h.0 >> 32, 1000 * 256);
        assert_eq!(h.0 & 0xffff_ffff, 1001 * 256);
        assert_eq!(h.to_location(), (1000, 1001));
    }

    #[test]
    fn neighbor_stops_at_grid_origin() {
        let h = RegionHandle::from_location(0, 5).unwrap();
        assert_eq!(h.neighbor(-1, 0), None);
        assert_eq!(h.neighbor(1, -1), RegionHandle::from_location(1, 4));
    }

    #[test]
    fn location_past_32_bit_metres_is_rejected() {
        let max = RegionHandle::MAX_LOCATION;
        let edge = RegionHandle::from_location(max, max).unwrap();
        assert_eq!(edge.to_location(), (max, max));
        assert_eq!(RegionHandle::from_location(max + 1, 0), None);
        assert_eq!(RegionHandle::from_location(0, 1 << 24), None);
        assert_eq!(edge.neighbor(1, 0), None);
        assert!(format!("{},0", max + 1).parse::<RegionHandle>().is_err());
        assert!(RegionDescriptor::new("far", 1 << 24, 0).is_none());
    }

    #[test]
    fn parse_location() {
        let h: RegionHandle = "1000, 1000".parse().unwrap();
        assert_eq!(h.to_location(), (1000, 1000));
        assert!("1000".parse::<RegionHandle>().is_err());
        assert!("a,b".parse::<RegionHandle>().is_err());
    }

    #[test]
    fn teleport_flag_ops() {
        let f = TeleportFlags::VIA_LANDMARK | TeleportFlags::IS_FLYING;
        assert!(f.contains(TeleportFlags::IS_FLYING));
        assert!(f.intersects(TeleportFlags::VIA_LANDMARK | TeleportFlags::VIA_LOCATION));
        assert!(!f.without(TeleportFlags::IS_FLYING).contains(TeleportFlags::IS_FLYING));
    }
}
