//! Agent mode state machine.
//!
//! A presence is created as `Child` (a placeholder that only observes) and
//! becomes `Root` when the avatar actually arrives. Leaving for another
//! region takes it back to `Child`. The in-transit overlay is owned by the
//! transit controller and only observed here.
//!
//! # Invariants
//! - The mode is always exactly one of `Child` or `Root`, and is stored in the
//!   same lock as the position.
//! - Repeating a transition is a logged no-op. The mode is checked and
//!   flipped under one lock, so of two racing transitions exactly one runs.
//! - A root presence that is not seated owns a physics actor after
//!   `post_process_make_root`; a child presence never does.

use glam::Vec3;
use regionspace_common::RegionHandle;
use regionspace_common::region::{force_valid_region_xy, is_finite, is_valid_region_xyz};
use serde::{Deserialize, Serialize};

use crate::agent_data::{ArrivalKind, now_ms};
use crate::object::PartRef;
use crate::position::PositionInfo;
use crate::presence::ScenePresence;
use crate::scene::{Scene, SceneEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentMode {
    Child,
    Root,
}

impl ScenePresence {
    pub fn is_root(&self) -> bool {
        self.authority().mode() == AgentMode::Root
    }

    pub fn is_child(&self) -> bool {
        self.authority().mode() == AgentMode::Child
    }

    /// Promote to a full presence at `position`.
    ///
    /// Crossing arrivals are extrapolated along their carried velocity. An
    /// unusable position falls back to the configured arrival point, and the
    /// result is never below ground. If the carried seat still exists here
    /// the avatar is re-seated on it and that part is returned.
    pub fn make_root(&self, scene: &Scene, position: Vec3) -> Option<PartRef> {
        let _span = tracing::info_span!("make_root", avatar = %self.id()).entered();
        let claimed = self.authority().with_state(|s| {
            if s.mode == AgentMode::Root {
                return false;
            }
            s.mode = AgentMode::Root;
            true
        });
        if !claimed {
            tracing::debug!("already root");
            return self.authority().parent();
        }

        let (seat, arrival) = {
            let mut st = self.state();
            (st.pending_seat.take(), st.arrival.take())
        };

        let mut pos = position;
        if let Some(arrival) = arrival {
            if arrival.kind == ArrivalKind::Crossing {
                let elapsed_ms = now_ms().saturating_sub(arrival.sent_at_ms);
                let secs = (elapsed_ms as f32 / 1000.0)
                    .min(scene.config().max_crossing_interpolation_secs);
                let velocity = self.authority().velocity();
                if is_finite(velocity) {
                    pos += velocity * secs;
                }
                pos = force_valid_region_xy(pos);
            }
        }
        if !is_valid_region_xyz(pos) {
            tracing::warn!(?pos, "arrival position unusable, using fallback");
            pos = scene.config().arrival_fallback;
        }
        let ground = scene.ground_height(pos.x, pos.y);
        if pos.z < ground {
            pos.z = ground;
        }

        let local_id = scene.allocate_local_id();
        self.set_local_id(local_id);
        self.refresh_size_from_appearance();

        let seated = seat.and_then(|record| {
            let part = scene.part_ref(record.object, record.part);
            if part.is_none() {
                tracing::warn!(object = %record.object, "carried seat not found, arriving standing");
            }
            part.and_then(|p| self.continue_sit_as_root(scene, p, record.offset))
        });

        if seated.is_none() {
            self.authority().with_state(|s| {
                s.info = PositionInfo {
                    position: pos,
                    parent: None,
                    parent_absolute: Vec3::ZERO,
                };
                s.last_finite = Some(pos);
            });
        }

        let world = self.authority().get(false, false);
        scene.spatial_update(local_id, world);
        scene.record(SceneEvent::MadeRoot {
            avatar: self.id(),
            position: world,
            seated: seated.is_some(),
        });
        tracing::info!(%local_id, ?world, seated = seated.is_some(), "agent is root");

        self.post_process_make_root(scene);
        seated
    }

    fn continue_sit_as_root(&self, scene: &Scene, part: PartRef, offset: Vec3) -> Option<PartRef> {
        let object = part.resolve()?;
        let parent_absolute = object
            .seat_frame(part.part_id())
            .map(|f| f.world_position(Vec3::ZERO))
            .unwrap_or_else(|| object.position());
        object.add_sitter(part.part_id(), self.id());
        scene.set_seat(self.id(), part.clone());
        let seat = part.clone();
        self.authority().with_state(|s| {
            s.info = PositionInfo {
                position: offset,
                parent: Some(seat),
                parent_absolute,
            };
        });
        let remaining = object.rider_arrived();
        tracing::debug!(object = %object.id(), remaining, "rider arrived with object");
        Some(part)
    }

    /// Work that must follow `make_root` outside the position lock: an
    /// unseated root joins the physical scene.
    pub fn post_process_make_root(&self, scene: &Scene) {
        if self.is_root() && !self.authority().is_seated() && !self.authority().has_physics_actor() {
            self.add_to_physical_scene(scene);
        }
    }

    /// Demote to a placeholder. Records where to restore the avatar should
    /// the handoff be rolled back.
    pub fn make_child(&self, scene: &Scene, destination: Option<RegionHandle>) {
        let _span = tracing::info_span!("make_child", avatar = %self.id()).entered();
        let demoted = self.authority().with_state(|s| {
            if s.mode == AgentMode::Child {
                return false;
            }
            let (absolute, _) = s.absolute();
            s.restore_position = match s.info.parent {
                None => absolute,
                Some(_) => s.info.parent_absolute,
            };
            s.mode = AgentMode::Child;
            s.info = PositionInfo {
                position: absolute,
                parent: None,
                parent_absolute: Vec3::ZERO,
            };
            true
        });
        if !demoted {
            tracing::debug!("already child");
            return;
        }

        {
            let mut st = self.state();
            st.animations.clear();
            st.scripted_controls.clear();
            st.destination = destination;
        }
        scene.services().scripts.release_controls(self.id());
        self.remove_from_physical_scene(scene);
        scene.spatial_remove(self.local_id());

        scene.record(SceneEvent::MadeChild {
            avatar: self.id(),
            destination,
        });
        tracing::info!(?destination, "agent is child");
    }

    pub(crate) fn add_to_physical_scene(&self, scene: &Scene) {
        if self.authority().has_physics_actor() {
            return;
        }
        let position = self.authority().get(false, false);
        let actor = scene.services().physics.add_avatar(
            self.local_id(),
            position,
            self.authority().velocity(),
            self.size(),
            self.state().flying,
        );
        self.authority().attach_actor(actor);
    }

    pub(crate) fn remove_from_physical_scene(&self, scene: &Scene) {
        if let Some(actor) = self.authority().detach_actor() {
            self.state().flying = actor.is_flying();
            scene.services().physics.remove(actor.local_id());
        }
    }
}
