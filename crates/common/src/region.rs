//! Region geometry: extents, legal-position checks and clamps.
//!
//! # Invariants
//! - A legal X/Y lies in `[0, REGION_SIZE)`; a legal Z in `[REGION_MINIMUM_Z, REGION_MAXIMUM_Z]`.
//! - `force_valid_*` always returns a position that the matching `is_valid_*` accepts.

use glam::Vec3;

/// Edge length of a region in metres.
pub const REGION_SIZE: u32 = 256;
/// First coordinate outside the region on the positive side.
pub const OUTSIDE_REGION: f32 = 256.0;
/// Largest coordinate that still rounds into the region.
pub const POSITIVE_EDGE: f32 = 255.999;
pub const NEGATIVE_EDGE: f32 = 0.0;
pub const REGION_MINIMUM_Z: f32 = -128.0;
pub const REGION_MAXIMUM_Z: f32 = 10000.0;
/// Height used when an arbitrary legal Z is needed.
pub const REGION_VALID_Z: f32 = 128.0;
/// Height above a parcel floor an avatar is bounced to when refused entry.
pub const AVATAR_BOUNCE: f32 = 10.0;
/// Distance kept from the edge when an avatar is pushed back inside.
pub const BORDER_DISTANCE: f32 = 2.0;
/// Position used when nothing better is known for a non-finite input.
pub const EMERGENCY_POSITION: Vec3 = Vec3::new(127.0, 127.0, 127.0);

pub fn is_finite(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

pub fn is_valid_region_xy(pos: Vec3) -> bool {
    is_finite(pos)
        && pos.x >= NEGATIVE_EDGE
        && pos.x < OUTSIDE_REGION
        && pos.y >= NEGATIVE_EDGE
        && pos.y < OUTSIDE_REGION
}

pub fn is_valid_region_xyz(pos: Vec3) -> bool {
    is_valid_region_xy(pos) && pos.z >= REGION_MINIMUM_Z && pos.z <= REGION_MAXIMUM_Z
}

/// Clamp X and Y into the region, leaving Z untouched.
pub fn force_valid_region_xy(pos: Vec3) -> Vec3 {
    Vec3::new(
        clamp_axis(pos.x, NEGATIVE_EDGE, POSITIVE_EDGE),
        clamp_axis(pos.y, NEGATIVE_EDGE, POSITIVE_EDGE),
        pos.z,
    )
}

pub fn force_valid_region_xyz(pos: Vec3) -> Vec3 {
    let xy = force_valid_region_xy(pos);
    Vec3::new(
        xy.x,
        xy.y,
        clamp_axis(pos.z, REGION_MINIMUM_Z, REGION_MAXIMUM_Z),
    )
}

/// Pull a position that has left the region back in so that it sits
/// `distance` metres from the edge it crossed. Axes already inside are kept.
pub fn force_inside_border(pos: Vec3, distance: f32) -> Vec3 {
    let axis = |v: f32| {
        if v.is_nan() {
            REGION_VALID_Z
        } else if v < NEGATIVE_EDGE {
            NEGATIVE_EDGE + distance
        } else if v >= OUTSIDE_REGION {
            OUTSIDE_REGION - distance
        } else {
            v
        }
    };
    Vec3::new(
        axis(pos.x),
        axis(pos.y),
        clamp_axis(pos.z, REGION_MINIMUM_Z, REGION_MAXIMUM_Z),
    )
}

fn clamp_axis(v: f32, min: f32, max: f32) -> f32 {
    if v.is_nan() { min } else { v.clamp(min, max) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_bounds() {
        assert!(is_valid_region_xyz(Vec3::new(0.0, 0.0, 0.0)));
        assert!(is_valid_region_xyz(Vec3::new(255.9, 255.9, 10000.0)));
        assert!(!is_valid_region_xy(Vec3::new(256.0, 10.0, 0.0)));
        assert!(!is_valid_region_xy(Vec3::new(-0.1, 10.0, 0.0)));
        assert!(!is_valid_region_xyz(Vec3::new(10.0, 10.0, -129.0)));
        assert!(!is_valid_region_xyz(Vec3::new(f32::NAN, 10.0, 0.0)));
    }

    #[test]
    fn force_valid_clamps_every_axis() {
        let p = force_valid_region_xyz(Vec3::new(300.0, -5.0, 20000.0));
        assert_eq!(p, Vec3::new(POSITIVE_EDGE, 0.0, REGION_MAXIMUM_Z));
        assert!(is_valid_region_xyz(p));
        assert!(is_valid_region_xyz(force_valid_region_xyz(Vec3::NAN)));
    }

    #[test]
    fn force_valid_xy_keeps_z() {
        let p = force_valid_region_xy(Vec3::new(257.0, 12.0, 40000.0));
        assert_eq!(p, Vec3::new(POSITIVE_EDGE, 12.0, 40000.0));
    }

    #[test]
    fn inside_border_moves_only_crossed_axis() {
        let p = force_inside_border(Vec3::new(257.0, 40.0, 22.0), BORDER_DISTANCE);
        assert_eq!(p, Vec3::new(254.0, 40.0, 22.0));
        let q = force_inside_border(Vec3::new(-1.0, 300.0, 22.0), BORDER_DISTANCE);
        assert_eq!(q, Vec3::new(2.0, 254.0, 22.0));
    }
}
