//! Per-frame border checks.
//!
//! An unseated root avatar whose next step would leave the region is handed
//! to the neighbour on that side, or pushed back in when there is none.
//! Objects that have drifted outside are crossed with `cross_object_at`.
//! An object that arrived with riders still on their way is held inside
//! until they land or `recross_wait_ms` has passed.

use futures::future::join_all;
use glam::Vec3;
use regionspace_common::region::{
    NEGATIVE_EDGE, OUTSIDE_REGION, force_inside_border, force_valid_region_xy,
    force_valid_region_xyz, is_valid_region_xy,
};
use regionspace_common::AvatarId;
use regionspace_kernel::{SceneObject, ScenePresence, now_ms};
use regionspace_transit::{TransitArguments, TransitError};

use crate::coordinator::{CrossingCoordinator, WalkingTransit, flatten};

/// What the border check did for one avatar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BorderAction {
    /// A walking handoff to the neighbour was started.
    Crossing { avatar: AvatarId, landing: Vec3 },
    /// No neighbour on that side; the avatar was pushed back in.
    Nudged { avatar: AvatarId, position: Vec3 },
}

/// Which way out of the region `pos` lies, per axis: -1, 0 or 1.
pub(crate) fn exit_direction(pos: Vec3) -> (i64, i64) {
    let axis = |v: f32| {
        if v >= OUTSIDE_REGION {
            1
        } else if v < NEGATIVE_EDGE {
            -1
        } else {
            0
        }
    };
    (axis(pos.x), axis(pos.y))
}

impl CrossingCoordinator {
    /// Check every root avatar against the region edges.
    pub fn check_avatar_borders(&self) -> Vec<BorderAction> {
        self.scene
            .root_presences()
            .into_iter()
            .filter_map(|p| self.check_avatar_border(&p))
            .collect()
    }

    fn check_avatar_border(&self, presence: &ScenePresence) -> Option<BorderAction> {
        if presence.is_child() || presence.in_transit() || presence.authority().is_seated() {
            return None;
        }
        // only a body the physics engine moves can walk across
        if !presence.authority().has_physics_actor() {
            return None;
        }
        let position = presence.authority().get(false, false);
        let velocity = presence.authority().velocity();
        let ahead = position + velocity * self.settings.projection_step_secs;
        if is_valid_region_xy(ahead) {
            return None;
        }

        let avatar = presence.id();
        let (dx, dy) = exit_direction(ahead);
        if (dx, dy) == (0, 0) {
            return None;
        }
        let neighbour = self
            .scene
            .handle()
            .neighbor(dx, dy)
            .and_then(|h| self.neighbors.get_known_neighbor_by_handle(h));

        match neighbour {
            Some(region) => {
                let shift = Vec3::new(dx as f32, dy as f32, 0.0) * OUTSIDE_REGION;
                let landing = force_valid_region_xy(ahead - shift);
                tracing::info!(%avatar, destination = %region.name, ?landing, "avatar walking across border");
                let task = self
                    .transit
                    .try_begin_transit(TransitArguments::crossing(avatar, region, landing));
                let handle = self.runtime.spawn(task);
                self.walking().push(WalkingTransit { avatar, handle });
                Some(BorderAction::Crossing { avatar, landing })
            }
            None => {
                let back = Vec3::new(-dx as f32, -dy as f32, 0.0) * self.settings.border_nudge;
                let nudged = force_valid_region_xyz(position + back);
                let _ = presence
                    .authority()
                    .set(None, true, nudged, None, Vec3::ZERO, velocity);
                self.scene.spatial_update(presence.local_id(), nudged);
                tracing::debug!(%avatar, ?nudged, "no neighbour, nudging avatar back");
                Some(BorderAction::Nudged {
                    avatar,
                    position: nudged,
                })
            }
        }
    }

    /// Cross every free object that has drifted outside the region. Returns
    /// how many left.
    pub fn check_object_borders(&self) -> usize {
        let now = now_ms();
        let mut crossed = 0;
        for object in self.scene.objects() {
            if object.in_transit() || object.is_attachment() {
                continue;
            }
            let position = object.position();
            if is_valid_region_xy(position) {
                continue;
            }
            if self.awaiting_riders(&object, now) {
                object.force_position_in_region();
                self.scene.spatial_update(object.local_id(), object.position());
                tracing::debug!(object = %object.id(), "riders still arriving, not crossing again yet");
                continue;
            }
            match self.cross_object_at(&object, position) {
                Ok(_) => crossed += 1,
                Err(err) => tracing::debug!(object = %object.id(), error = %err, "object stayed"),
            }
        }
        crossed
    }

    /// Whether `object` arrived here recently with riders not yet landed.
    fn awaiting_riders(&self, object: &SceneObject, now: u64) -> bool {
        object.avatars_to_expect() > 0
            && object
                .received_at_ms()
                .is_some_and(|at| now.saturating_sub(at) < self.settings.recross_wait_ms)
    }

    /// Put an object that tried to leave towards no region back inside,
    /// `border_nudge` metres from the edge, and stop it moving outward.
    pub(crate) fn nudge_object_back(&self, object: &SceneObject, attempted: Vec3) -> Vec3 {
        let nudged = force_inside_border(attempted, self.settings.border_nudge);
        let (dx, dy) = exit_direction(attempted);
        let mut velocity = object.velocity();
        if velocity.x * dx as f32 > 0.0 {
            velocity.x = 0.0;
        }
        if velocity.y * dy as f32 > 0.0 {
            velocity.y = 0.0;
        }
        object.set_velocity(velocity);
        object.set_position(nudged);
        tracing::debug!(object = %object.id(), ?nudged, "no neighbour, nudging object back");
        nudged
    }

    /// Collect walking crossings that have finished.
    pub fn reap_finished(&self) -> Vec<(AvatarId, Result<(), TransitError>)> {
        let finished: Vec<WalkingTransit> = {
            let mut walking = self.walking();
            let (done, pending) = std::mem::take(&mut *walking)
                .into_iter()
                .partition(|t| t.handle.is_finished());
            *walking = pending;
            done
        };
        finished
            .into_iter()
            .map(|t| (t.avatar, flatten(self.runtime.block_on(t.handle))))
            .collect()
    }

    /// Wait for every walking crossing still running.
    pub fn join_walking(&self) -> Vec<(AvatarId, Result<(), TransitError>)> {
        let pending = std::mem::take(&mut *self.walking());
        let (avatars, handles): (Vec<_>, Vec<_>) =
            pending.into_iter().map(|t| (t.avatar, t.handle)).unzip();
        let results = self.runtime.block_on(join_all(handles));
        avatars
            .into_iter()
            .zip(results.into_iter().map(flatten))
            .collect()
    }

    pub fn walking_count(&self) -> usize {
        self.walking().len()
    }
}
