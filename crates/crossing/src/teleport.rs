//! Teleport requests: within this region, or handed off to another.

use glam::Vec3;
use rand::seq::SliceRandom;
use regionspace_common::region::is_valid_region_xyz;
use regionspace_common::{AvatarId, RegionHandle, TeleportFlags};
use regionspace_kernel::{LandingType, Parcel, ScenePresence};
use regionspace_transit::TransitArguments;

use crate::coordinator::CrossingCoordinator;
use crate::error::TeleportError;

/// Clearance kept between an avatar's feet and the ground on arrival.
const GROUND_CLEARANCE: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleportOutcome {
    /// Moved within this region.
    Local,
    /// Handed off to another region.
    Remote,
}

impl CrossingCoordinator {
    /// Teleport `avatar` to `position` in `region`, looking at `look_at`.
    ///
    /// Failures the viewer should see are sent to it as one teleport-failed
    /// message and also returned.
    pub fn request_teleport_to_location(
        &self,
        avatar: AvatarId,
        region: RegionHandle,
        position: Vec3,
        look_at: Vec3,
        flags: TeleportFlags,
    ) -> Result<TeleportOutcome, TeleportError> {
        let _span = tracing::info_span!("teleport", %avatar, %region, ?position).entered();
        let Some(presence) = self.scene.presence(avatar) else {
            return Err(TeleportError::NotRoot(avatar));
        };
        if presence.in_transit() || presence.is_child() {
            tracing::debug!("ignoring teleport request from an agent that is not root here");
            return Err(TeleportError::NotRoot(avatar));
        }
        if !self.permissions.can_teleport(avatar) {
            tracing::info!("teleport not permitted");
            return Err(TeleportError::NotPermitted(avatar));
        }

        let result = self.teleport(&presence, region, position, look_at, flags);
        if let Err(err) = &result {
            if err.reported_to_viewer() {
                tracing::warn!(error = %err, "teleport failed");
                presence.client().send_teleport_failed(&err.to_string());
            }
        }
        result
    }

    fn teleport(
        &self,
        presence: &ScenePresence,
        region: RegionHandle,
        mut position: Vec3,
        mut look_at: Vec3,
        flags: TeleportFlags,
    ) -> Result<TeleportOutcome, TeleportError> {
        let avatar = presence.id();
        presence.reset_animations();

        let here = self.scene.handle();
        let from = presence.authority().get(false, false);
        let from_parcel = self
            .grid
            .land_data(here, from.x, from.y)
            .ok_or(TeleportError::SourceUnavailable)?;
        let parcel = self
            .grid
            .land_data(region, position.x, position.y)
            .ok_or(TeleportError::DestinationDown)?;
        let destination = if region == here {
            self.scene.descriptor().clone()
        } else {
            self.resolve_region(region)
                .ok_or(TeleportError::DestinationNotFound)?
        };

        if flags.intersects(TeleportFlags::VIA_LANDMARK | TeleportFlags::VIA_LOCATION) {
            let telehub = self.telehub_arrival(avatar, region);
            if let Some(hub) = telehub {
                tracing::debug!(?hub, "routing through telehub");
                position = hub;
            } else {
                let same_parcel = region == here && from_parcel.id == parcel.id;
                if parcel.owner != Some(avatar) && !same_parcel && !self.permissions.is_elevated(avatar) {
                    if let Some((point, facing)) = landing_override(&parcel)? {
                        position = point;
                        look_at = facing;
                    }
                }
            }
        }

        let flags = if presence.is_flying() {
            flags.with(TeleportFlags::IS_FLYING)
        } else {
            flags.without(TeleportFlags::IS_FLYING)
        };

        if region == here {
            self.teleport_within(presence, position, look_at, flags)
        } else {
            presence.stand_up(&self.scene);
            let task = self
                .transit
                .try_begin_transit(TransitArguments::teleport(avatar, destination, position, flags));
            self.runtime.block_on(task)?;
            Ok(TeleportOutcome::Remote)
        }
    }

    /// Telehub arrival point for `region`, when its estate forbids direct
    /// teleports and `avatar` does not manage the estate.
    fn telehub_arrival(&self, avatar: AvatarId, region: RegionHandle) -> Option<Vec3> {
        let estate = self.grid.estate_settings(region)?;
        if estate.allow_direct_teleport || estate.is_estate_manager(avatar) {
            return None;
        }
        let hub = self.grid.telehub(region)?;
        let offset = hub
            .spawn_points
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(Vec3::ZERO);
        Some(hub.position + offset)
    }

    fn teleport_within(
        &self,
        presence: &ScenePresence,
        mut position: Vec3,
        look_at: Vec3,
        flags: TeleportFlags,
    ) -> Result<TeleportOutcome, TeleportError> {
        if !is_valid_region_xyz(position) {
            tracing::warn!(?position, "local teleport target outside region");
            return Err(TeleportError::InvalidPosition(position));
        }
        let height = presence.appearance().height;
        let limit = GROUND_CLEARANCE + self.scene.ground_height(position.x, position.y);
        let raised = limit + height;
        if limit >= position.z - height / 2.0 && raised.is_finite() {
            position.z = raised;
        }

        presence.stand_up(&self.scene);
        presence.client().send_local_teleport(position, look_at, flags);
        presence.teleport(&self.scene, position);
        for attachment in presence.attachments() {
            self.scene.services().scripts.changed_teleport(attachment);
        }
        tracing::info!(?position, "local teleport");
        Ok(TeleportOutcome::Local)
    }
}

/// Where a parcel's landing rule puts an arrival from elsewhere, if it
/// overrides the requested point.
fn landing_override(parcel: &Parcel) -> Result<Option<(Vec3, Vec3)>, TeleportError> {
    match parcel.landing {
        LandingType::LandingPoint if parcel.landing_point != Vec3::ZERO => {
            Ok(Some((parcel.landing_point, parcel.landing_look_at)))
        }
        LandingType::Blocked => Err(TeleportError::Blocked),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landing_rules() {
        let mut parcel = Parcel::whole_region(3, "plaza");
        assert_eq!(landing_override(&parcel), Ok(None));

        parcel.landing = LandingType::LandingPoint;
        assert_eq!(landing_override(&parcel), Ok(None));
        parcel.landing_point = Vec3::new(64.0, 64.0, 22.0);
        assert_eq!(
            landing_override(&parcel),
            Ok(Some((Vec3::new(64.0, 64.0, 22.0), Vec3::X)))
        );

        parcel.landing = LandingType::Blocked;
        assert_eq!(landing_override(&parcel), Err(TeleportError::Blocked));
    }
}
