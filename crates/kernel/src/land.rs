//! Land capability: parcels and terrain height.
//!
//! Parcel policy lives outside the scene. The scene only asks which parcel
//! covers a point and whether an avatar may stand there.

use glam::{Vec2, Vec3};
use regionspace_common::AvatarId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

use crate::error::PositionDenied;

/// How arrivals from outside a parcel are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LandingType {
    #[default]
    Anywhere,
    LandingPoint,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub id: u32,
    pub name: String,
    pub owner: Option<AvatarId>,
    /// South-west corner, inclusive.
    pub min: Vec2,
    /// North-east corner, exclusive.
    pub max: Vec2,
    pub landing: LandingType,
    pub landing_point: Vec3,
    pub landing_look_at: Vec3,
    /// Avatars refused below `ban_height`.
    pub banned: BTreeSet<AvatarId>,
    pub ban_height: f32,
}

impl Parcel {
    /// A parcel covering the whole region.
    pub fn whole_region(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner: None,
            min: Vec2::ZERO,
            max: Vec2::splat(256.0),
            landing: LandingType::Anywhere,
            landing_point: Vec3::ZERO,
            landing_look_at: Vec3::X,
            banned: BTreeSet::new(),
            ban_height: 50.0,
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min.x && x < self.max.x && y >= self.min.y && y < self.max.y
    }

    /// Whether `avatar` may stand at `pos` over this parcel.
    pub fn check_entry(&self, avatar: AvatarId, pos: Vec3) -> Result<(), PositionDenied> {
        if self.banned.contains(&avatar) && pos.z < self.ban_height {
            return Err(PositionDenied {
                parcel: self.id,
                min_z: self.ban_height,
            });
        }
        Ok(())
    }
}

pub trait LandChannel: Send + Sync {
    fn parcel_at(&self, x: f32, y: f32) -> Option<Parcel>;
}

pub trait Terrain: Send + Sync {
    fn ground_height(&self, x: f32, y: f32) -> f32;
}

/// Parcels held in memory; the first parcel containing a point wins.
#[derive(Debug, Default)]
pub struct ParcelMap {
    parcels: RwLock<Vec<Parcel>>,
}

impl ParcelMap {
    pub fn new(parcels: Vec<Parcel>) -> Self {
        Self {
            parcels: RwLock::new(parcels),
        }
    }

    pub fn single(parcel: Parcel) -> Self {
        Self::new(vec![parcel])
    }

    /// Insert a parcel in front of existing ones so it shadows them.
    pub fn subdivide(&self, parcel: Parcel) {
        self.parcels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, parcel);
    }

    pub fn update(&self, id: u32, f: impl FnOnce(&mut Parcel)) -> bool {
        let mut parcels = self.parcels.write().unwrap_or_else(PoisonError::into_inner);
        match parcels.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                f(p);
                true
            }
            None => false,
        }
    }
}

impl LandChannel for ParcelMap {
    fn parcel_at(&self, x: f32, y: f32) -> Option<Parcel> {
        self.parcels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.contains(x, y))
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatTerrain(pub f32);

impl Terrain for FlatTerrain {
    fn ground_height(&self, _x: f32, _y: f32) -> f32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banned_avatar_refused_below_ban_height() {
        let avatar = AvatarId::new();
        let mut parcel = Parcel::whole_region(1, "home");
        parcel.banned.insert(avatar);

        let denied = parcel.check_entry(avatar, Vec3::new(10.0, 10.0, 20.0));
        assert_eq!(
            denied,
            Err(PositionDenied {
                parcel: 1,
                min_z: 50.0
            })
        );
        assert!(parcel.check_entry(avatar, Vec3::new(10.0, 10.0, 60.0)).is_ok());
        assert!(parcel.check_entry(AvatarId::new(), Vec3::new(10.0, 10.0, 20.0)).is_ok());
    }

    #[test]
    fn subdivided_parcel_shadows_region_parcel() {
        let map = ParcelMap::single(Parcel::whole_region(1, "region"));
        let mut corner = Parcel::whole_region(2, "corner");
        corner.max = Vec2::splat(64.0);
        map.subdivide(corner);

        assert_eq!(map.parcel_at(10.0, 10.0).map(|p| p.id), Some(2));
        assert_eq!(map.parcel_at(100.0, 10.0).map(|p| p.id), Some(1));
        assert!(map.parcel_at(300.0, 10.0).is_none());
    }
}
