//! Crossing coordinator: moves objects, and the avatars riding them, out of
//! this region.
//!
//! Handoffs start synchronously on the frame thread. Each rider leg runs as
//! its own task on the runtime and is joined once the object send returns.
//!
//! # Invariants
//! - An object is confirmed created at the destination before any rider
//!   leaves its seat.
//! - After a crossing either the object is gone locally and every rider was
//!   told it succeeded, or the object is back in the scene inside the region
//!   and every rider was told it failed.
//! - A failed rider precheck changes nothing except clamping the object
//!   inside the region.

use futures::future::join_all;
use glam::Vec3;
use regionspace_common::region::{OUTSIDE_REGION, is_valid_region_xy};
use regionspace_common::{AvatarId, PartId, RegionDescriptor, RegionHandle};
use regionspace_kernel::{Scene, SceneObject, ScenePresence};
use regionspace_transit::{
    GridService, InterregionTransport, NeighborDirectory, Permissions, RideOn, TransitArguments,
    TransitController, TransitError,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::border::exit_direction;
use crate::config::CrossingSettings;
use crate::error::CrossingError;

/// Services the coordinator is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub transit: Arc<dyn TransitController>,
    pub neighbors: Arc<dyn NeighborDirectory>,
    pub transport: Arc<dyn InterregionTransport>,
    pub grid: Arc<dyn GridService>,
    pub permissions: Arc<dyn Permissions>,
}

/// Result of an object crossing that reached its destination. Riders that
/// failed to follow are listed; the object is not rolled back for them.
#[derive(Debug, Default)]
pub struct CrossingOutcome {
    pub riders: Vec<AvatarId>,
    pub rider_failures: Vec<(AvatarId, TransitError)>,
}

impl CrossingOutcome {
    pub fn all_riders_crossed(&self) -> bool {
        self.rider_failures.is_empty()
    }
}

pub(crate) type TransitHandle = JoinHandle<Result<(), TransitError>>;

/// A walking crossing started by the border check, kept until reaped.
pub(crate) struct WalkingTransit {
    pub(crate) avatar: AvatarId,
    pub(crate) handle: TransitHandle,
}

pub struct CrossingCoordinator {
    pub(crate) scene: Arc<Scene>,
    pub(crate) transit: Arc<dyn TransitController>,
    pub(crate) neighbors: Arc<dyn NeighborDirectory>,
    pub(crate) transport: Arc<dyn InterregionTransport>,
    pub(crate) grid: Arc<dyn GridService>,
    pub(crate) permissions: Arc<dyn Permissions>,
    pub(crate) runtime: Handle,
    pub(crate) settings: CrossingSettings,
    pub(crate) walking: Mutex<Vec<WalkingTransit>>,
}

impl CrossingCoordinator {
    pub fn new(
        scene: Arc<Scene>,
        collaborators: Collaborators,
        runtime: Handle,
        settings: CrossingSettings,
    ) -> Self {
        Self {
            scene,
            transit: collaborators.transit,
            neighbors: collaborators.neighbors,
            transport: collaborators.transport,
            grid: collaborators.grid,
            permissions: collaborators.permissions,
            runtime,
            settings,
            walking: Mutex::new(Vec::new()),
        }
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    pub fn transit(&self) -> &Arc<dyn TransitController> {
        &self.transit
    }

    pub fn settings(&self) -> CrossingSettings {
        self.settings
    }

    pub(crate) fn walking(&self) -> MutexGuard<'_, Vec<WalkingTransit>> {
        self.walking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A known neighbour first, then the grid.
    pub(crate) fn resolve_region(&self, handle: RegionHandle) -> Option<RegionDescriptor> {
        self.neighbors
            .get_known_neighbor_by_handle(handle)
            .or_else(|| self.grid.region_by_handle(handle))
    }

    /// Move `object` and everyone seated on it to `destination`, landing at
    /// `target` in the destination's frame.
    pub fn cross_object(
        &self,
        object: &Arc<SceneObject>,
        destination: RegionHandle,
        target: Vec3,
        is_attachment: bool,
    ) -> Result<CrossingOutcome, CrossingError> {
        let _span = tracing::info_span!(
            "cross_object",
            object = %object.id(),
            %destination,
            ?target
        )
        .entered();

        let Some(region) = self.resolve_region(destination) else {
            object.force_position_in_region();
            tracing::info!("no region at destination, keeping object");
            return Err(CrossingError::UnknownDestination(destination));
        };

        let riders = self.riders(object);
        if let Err(reason) = precheck_riders(&riders) {
            object.force_position_in_region();
            tracing::info!(%reason, "object crossing refused");
            return Err(CrossingError::PrecheckFailed {
                object: object.id(),
                reason,
            });
        }

        let rider_ids: Vec<AvatarId> = riders.iter().map(|(p, _)| p.id()).collect();
        let local_id = object.local_id();
        self.scene.detach_object(object.id())?;
        object.set_in_transit(true);
        object.set_avatars_to_expect(rider_ids.len() as u32);

        let tasks: Vec<(AvatarId, TransitHandle)> = riders
            .iter()
            .map(|(presence, part)| {
                let args = TransitArguments::crossing(presence.id(), region.clone(), target)
                    .riding(RideOn {
                        object: object.id(),
                        part: *part,
                    });
                let task = self.transit.try_begin_transit(args);
                (presence.id(), self.runtime.spawn(task))
            })
            .collect();

        let sent = self.transport.send_create_object(
            region.handle,
            &object.snapshot(),
            &rider_ids,
            true,
            target,
            is_attachment,
        );

        if sent {
            self.scene.broadcast_kill(local_id, &rider_ids);
            for avatar in &rider_ids {
                self.transit.handle_object_send_result(*avatar, true);
            }
            let rider_failures = self.join_riders(tasks);
            self.scene.delete_object(object);
            self.stand_stranded(&rider_failures);
            tracing::info!(
                riders = rider_ids.len(),
                failed = rider_failures.len(),
                "object crossed"
            );
            Ok(CrossingOutcome {
                riders: rider_ids,
                rider_failures,
            })
        } else {
            if let Err(err) = self.scene.restore_object(object) {
                tracing::error!(error = %err, "could not put object back after failed crossing");
            }
            for avatar in &rider_ids {
                self.transit.handle_object_send_result(*avatar, false);
            }
            let rider_failures = self.join_riders(tasks);
            tracing::warn!("destination refused object, kept locally");
            Err(CrossingError::TransportFailed {
                object: object.id(),
                rider_failures,
            })
        }
    }

    /// Cross `object` to whichever region contains `attempted`, a position in
    /// this region's frame that lies outside it.
    ///
    /// The destination handle and landing position are derived from the
    /// edge crossed. Objects too far out to land anywhere are returned to
    /// their owner. With no region on that side the object is nudged back
    /// inside by the border distance and stops moving outward. Any other
    /// failure puts a non-physical object at the nearest legal position and
    /// clamps a physical one inside.
    pub fn cross_object_at(
        &self,
        object: &Arc<SceneObject>,
        attempted: Vec3,
    ) -> Result<CrossingOutcome, CrossingError> {
        let started = Instant::now();
        let old_position = object.position();
        let (dx, dy) = exit_direction(attempted);
        let target = attempted - Vec3::new(dx as f32, dy as f32, 0.0) * OUTSIDE_REGION;

        let result = match self.scene.handle().neighbor(dx, dy) {
            None => {
                tracing::warn!(object = %object.id(), dx, dy, "crossing would leave the grid");
                Err(CrossingError::OffGrid(object.id()))
            }
            Some(_) if !is_valid_region_xy(target) => {
                self.scene.return_object(object, "object went off world");
                Err(CrossingError::OffWorld(object.id()))
            }
            Some(destination) => {
                self.cross_object(object, destination, target, object.is_attachment())
            }
        };

        if !object.is_deleted() {
            let position = match &result {
                Ok(_) => None,
                Err(CrossingError::UnknownDestination(_)) => {
                    Some(self.nudge_object_back(object, attempted))
                }
                Err(_) if object.has_physics_actor() => {
                    object.force_position_in_region();
                    Some(object.position())
                }
                Err(_) => {
                    let legal = self.scene.nearest_legal_position(old_position);
                    object.set_position(legal);
                    Some(legal)
                }
            };
            if let Some(position) = position {
                self.scene.spatial_update(object.local_id(), position);
            }
        }
        tracing::debug!(
            object = %object.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "cross_object_at finished"
        );
        result
    }

    /// Root presences seated on `object`, with the part each one sits on.
    fn riders(&self, object: &SceneObject) -> Vec<(Arc<ScenePresence>, PartId)> {
        object
            .sitting_avatars()
            .into_iter()
            .filter_map(|(avatar, part)| match self.scene.presence(avatar) {
                Some(p) => Some((p, part)),
                None => {
                    tracing::warn!(%avatar, "sitter has no presence, leaving it behind");
                    None
                }
            })
            .collect()
    }

    fn join_riders(&self, tasks: Vec<(AvatarId, TransitHandle)>) -> Vec<(AvatarId, TransitError)> {
        let (avatars, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let results = self.runtime.block_on(join_all(handles));
        avatars
            .into_iter()
            .zip(results)
            .filter_map(|(avatar, joined)| match flatten(joined) {
                Ok(()) => None,
                Err(err) => {
                    tracing::error!(%avatar, error = %err, "rider did not cross with object");
                    Some((avatar, err))
                }
            })
            .collect()
    }

    /// Stand up failed riders still seated on a part that no longer exists.
    fn stand_stranded(&self, failures: &[(AvatarId, TransitError)]) {
        for (avatar, _) in failures {
            let Some(presence) = self.scene.presence(*avatar) else {
                continue;
            };
            let stranded = presence.is_root()
                && presence
                    .seat()
                    .is_some_and(|seat| seat.resolve().is_none_or(|o| o.is_deleted()));
            if stranded && presence.stand_up(&self.scene) {
                let position = presence.force_position_in_region();
                tracing::info!(%avatar, ?position, "stood up rider left on a crossed object");
            }
        }
    }
}

impl std::fmt::Debug for CrossingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossingCoordinator")
            .field("scene", &self.scene)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn precheck_riders(riders: &[(Arc<ScenePresence>, PartId)]) -> Result<(), String> {
    for (presence, _) in riders {
        let avatar = presence.id();
        if !presence.connection_established() {
            return Err(format!("rider {avatar} is not connected"));
        }
        if presence.in_transit() {
            return Err(format!(
                "rider {avatar} can not begin transition to a new region while already in transit"
            ));
        }
        if !presence.can_exit_region() {
            return Err(format!("rider {avatar} can not leave the region yet"));
        }
        if presence.has_establishing_connections() {
            return Err(format!("rider {avatar} is still establishing connections"));
        }
    }
    Ok(())
}

pub(crate) fn flatten(joined: Result<Result<(), TransitError>, tokio::task::JoinError>) -> Result<(), TransitError> {
    match joined {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(error = %err, "transit task did not finish");
            Err(TransitError::Cancelled)
        }
    }
}
