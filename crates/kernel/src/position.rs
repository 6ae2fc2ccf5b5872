//! Position authority: the single owner of an avatar's position, seat and mode.
//!
//! # Invariants
//! - `PositionInfo` is read and written as one unit under the per-avatar lock.
//! - `parent.is_some()` exactly when the avatar is seated; `position` is then
//!   relative to the seat part, otherwise world-absolute.
//! - A non-forced mutation while the avatar is in transit is ignored.
//! - Stored positions are always finite.

use glam::Vec3;
use regionspace_common::AvatarId;
use regionspace_common::region::{AVATAR_BOUNCE, EMERGENCY_POSITION, force_valid_region_xyz, is_finite};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::agent_mode::AgentMode;
use crate::error::PositionDenied;
use crate::land::{LandChannel, Parcel};
use crate::object::PartRef;
use crate::physics::PhysicsActor;
use crate::services::TransitStatus;

/// Where an avatar is: a world position, or an offset from its seat.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionInfo {
    pub position: Vec3,
    pub parent: Option<PartRef>,
    /// World position of the seat part when last computed; unused when unseated.
    pub parent_absolute: Vec3,
}

impl Default for PositionInfo {
    fn default() -> Self {
        Self {
            position: EMERGENCY_POSITION,
            parent: None,
            parent_absolute: Vec3::ZERO,
        }
    }
}

pub(crate) struct AuthorityState {
    pub(crate) mode: AgentMode,
    pub(crate) info: PositionInfo,
    pub(crate) velocity: Vec3,
    pub(crate) last_finite: Option<Vec3>,
    /// Last unseated position a parcel accepted, with that parcel's id.
    pub(crate) last_allowed: Option<(Vec3, u32)>,
    pub(crate) restore_position: Vec3,
    pub(crate) actor: Option<Arc<dyn PhysicsActor>>,
}

impl AuthorityState {
    /// World position of the stored info, and whether the seat is physical.
    /// Refreshes the cached seat position when the seat still resolves.
    pub(crate) fn absolute(&mut self) -> (Vec3, bool) {
        match &self.info.parent {
            None => (self.info.position, false),
            Some(part) => match part.resolve().and_then(|o| o.seat_frame(part.part_id())) {
                Some(frame) => {
                    self.info.parent_absolute = frame.world_position(Vec3::ZERO);
                    (frame.world_position(self.info.position), frame.physical)
                }
                None => (self.info.parent_absolute + self.info.position, false),
            },
        }
    }
}

/// Owns one avatar's position, seat, velocity, mode and physics actor
/// behind a single lock. Every read and write of those goes through here.
pub struct PositionAuthority {
    avatar: AvatarId,
    land: Arc<dyn LandChannel>,
    transit: Arc<dyn TransitStatus>,
    state: Mutex<AuthorityState>,
}

impl PositionAuthority {
    /// A child-mode authority at the emergency position, with no actor.
    pub fn new(avatar: AvatarId, land: Arc<dyn LandChannel>, transit: Arc<dyn TransitStatus>) -> Self {
        Self {
            avatar,
            land,
            transit,
            state: Mutex::new(AuthorityState {
                mode: AgentMode::Child,
                info: PositionInfo::default(),
                velocity: Vec3::ZERO,
                last_finite: None,
                last_allowed: None,
                restore_position: EMERGENCY_POSITION,
                actor: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuthorityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the whole state locked. Mode transitions go through here.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut AuthorityState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn avatar(&self) -> AvatarId {
        self.avatar
    }

    /// Whether the transit controller is moving this avatar out. Asked on
    /// every call, never cached.
    pub fn in_transit(&self) -> bool {
        self.transit.avatar_is_in_transit(self.avatar)
    }

    /// Replace the position, seat and velocity in one step.
    ///
    /// Unless `forced`, nothing happens while the avatar is in transit, and an
    /// unseated position is first checked against `parcel`. Forced updates
    /// are clamped into the region instead of validated.
    pub fn set(
        &self,
        parcel: Option<&Parcel>,
        forced: bool,
        position: Vec3,
        parent: Option<PartRef>,
        parent_absolute: Vec3,
        velocity: Vec3,
    ) -> Result<(), PositionDenied> {
        if !forced && self.in_transit() {
            tracing::debug!(avatar = %self.avatar, ?position, "ignoring position update while in transit");
            return Ok(());
        }

        let mut guard = self.lock();
        let s = &mut *guard;
        let mut position = finite_or(position, s.last_finite);
        let velocity = if is_finite(velocity) { velocity } else { Vec3::ZERO };

        if parent.is_none() {
            if forced {
                position = force_valid_region_xyz(position);
            } else if let Some(parcel) = parcel {
                parcel.check_entry(self.avatar, position)?;
                s.last_allowed = Some((position, parcel.id));
            }
        }

        s.info = PositionInfo {
            position,
            parent,
            parent_absolute,
        };
        s.velocity = velocity;
        if s.info.parent.is_none() {
            s.last_finite = Some(position);
            if let Some(actor) = &s.actor {
                actor.set_position(position);
                actor.set_velocity(velocity);
            }
        }
        Ok(())
    }

    /// Absolute world position.
    ///
    /// Seated avatars are placed through their seat's frame. With
    /// `check_parcel_change`, an avatar standing (or riding something
    /// physical) over a parcel that refuses it is snapped back to the last
    /// accepted position. With `sync_from_physics`, an unseated avatar first
    /// takes its position from the physics actor.
    pub fn get(&self, check_parcel_change: bool, sync_from_physics: bool) -> Vec3 {
        let mut guard = self.lock();
        let s = &mut *guard;

        if sync_from_physics && s.info.parent.is_none() {
            if let Some(actor) = s.actor.clone() {
                let p = actor.position();
                if is_finite(p) {
                    s.info.position = p;
                    s.last_finite = Some(p);
                }
                let v = actor.velocity();
                if is_finite(v) {
                    s.velocity = v;
                }
            }
        }

        let (absolute, seated_on_physical) = s.absolute();

        if check_parcel_change && (s.info.parent.is_none() || seated_on_physical) {
            return self.check_parcel(s, absolute);
        }
        absolute
    }

    fn check_parcel(&self, s: &mut AuthorityState, absolute: Vec3) -> Vec3 {
        let Some(parcel) = self.land.parcel_at(absolute.x, absolute.y) else {
            return absolute;
        };
        match parcel.check_entry(self.avatar, absolute) {
            Ok(()) => {
                if s.info.parent.is_none() {
                    s.last_allowed = Some((absolute, parcel.id));
                }
                absolute
            }
            Err(denied) => {
                if s.info.parent.is_some() {
                    tracing::debug!(avatar = %self.avatar, parcel = parcel.id, "riding over refused parcel");
                    return absolute;
                }
                let Some((allowed, allowed_parcel)) = s.last_allowed else {
                    return absolute;
                };
                let mut snapped = allowed;
                if allowed_parcel == parcel.id {
                    snapped.z = denied.min_z + AVATAR_BOUNCE;
                }
                tracing::info!(avatar = %self.avatar, parcel = parcel.id, ?snapped, "parcel refused avatar, snapping back");
                s.info.position = snapped;
                s.velocity.z = 0.0;
                s.last_finite = Some(snapped);
                if let Some(actor) = &s.actor {
                    actor.set_position(snapped);
                    actor.set_velocity(s.velocity);
                }
                snapped
            }
        }
    }

    /// A consistent copy of position, seat and cached seat position.
    pub fn info(&self) -> PositionInfo {
        self.lock().info.clone()
    }

    /// The seat part, if seated.
    pub fn parent(&self) -> Option<PartRef> {
        self.lock().info.parent.clone()
    }

    pub fn is_seated(&self) -> bool {
        self.lock().info.parent.is_some()
    }

    pub fn velocity(&self) -> Vec3 {
        self.lock().velocity
    }

    /// Ignored while in transit or for a non-finite velocity.
    pub fn set_velocity(&self, velocity: Vec3) {
        if self.in_transit() || !is_finite(velocity) {
            return;
        }
        let mut s = self.lock();
        s.velocity = velocity;
        if let Some(actor) = &s.actor {
            actor.set_velocity(velocity);
        }
    }

    pub fn mode(&self) -> AgentMode {
        self.lock().mode
    }

    /// Position recorded by the last transition to child.
    pub fn restore_position(&self) -> Vec3 {
        self.lock().restore_position
    }

    /// Last finite unseated position stored, used to replace a non-finite one.
    pub fn last_finite(&self) -> Option<Vec3> {
        self.lock().last_finite
    }

    /// An unseated root has one; child and seated avatars do not.
    pub fn has_physics_actor(&self) -> bool {
        self.lock().actor.is_some()
    }

    /// Read from the physics actor; false without one.
    pub fn is_flying(&self) -> bool {
        self.lock().actor.as_ref().is_some_and(|a| a.is_flying())
    }

    pub fn set_flying(&self, flying: bool) {
        if let Some(actor) = &self.lock().actor {
            actor.set_flying(flying);
        }
    }

    /// Push the stored position back into a physics actor that has gone
    /// non-finite. Returns true if a repair was needed.
    pub fn repair_actor_position(&self) -> bool {
        let s = self.lock();
        let Some(actor) = &s.actor else {
            return false;
        };
        if is_finite(actor.position()) {
            return false;
        }
        actor.set_position(s.info.position);
        actor.set_velocity(Vec3::ZERO);
        true
    }

    pub(crate) fn attach_actor(&self, actor: Arc<dyn PhysicsActor>) {
        self.lock().actor = Some(actor);
    }

    pub(crate) fn detach_actor(&self) -> Option<Arc<dyn PhysicsActor>> {
        self.lock().actor.take()
    }
}

/// `v` if finite, else the last finite position, else the emergency position.
pub fn finite_or(v: Vec3, last_finite: Option<Vec3>) -> Vec3 {
    if is_finite(v) {
        v
    } else {
        last_finite.unwrap_or(EMERGENCY_POSITION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::land::ParcelMap;
    use crate::object::{ObjectSnapshot, PartSnapshot, SceneObject};
    use crate::physics::{KinematicPhysics, PhysicsScene};
    use crate::services::NoTransit;
    use regionspace_common::LocalId;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(AtomicBool);

    impl TransitStatus for Flag {
        fn avatar_is_in_transit(&self, _avatar: AvatarId) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn avatar_is_in_transit_on_prim(&self, _avatar: AvatarId) -> bool {
            false
        }
    }

    fn authority(land: Arc<ParcelMap>) -> PositionAuthority {
        PositionAuthority::new(AvatarId::new(), land, Arc::new(NoTransit))
    }

    fn region_land() -> Arc<ParcelMap> {
        Arc::new(ParcelMap::single(Parcel::whole_region(1, "region")))
    }

    #[test]
    fn set_and_get_unseated() {
        let a = authority(region_land());
        a.set(None, false, Vec3::new(10.0, 20.0, 30.0), None, Vec3::ZERO, Vec3::X)
            .unwrap();
        assert_eq!(a.get(false, false), Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(a.velocity(), Vec3::X);
        assert!(!a.is_seated());
    }

    #[test]
    fn non_finite_falls_back_to_last_finite_then_emergency() {
        let a = authority(region_land());
        a.set(None, false, Vec3::NAN, None, Vec3::ZERO, Vec3::ZERO).unwrap();
        assert_eq!(a.get(false, false), EMERGENCY_POSITION);

        a.set(None, false, Vec3::new(5.0, 5.0, 5.0), None, Vec3::ZERO, Vec3::ZERO)
            .unwrap();
        a.set(None, false, Vec3::new(f32::INFINITY, 1.0, 1.0), None, Vec3::ZERO, Vec3::ZERO)
            .unwrap();
        assert_eq!(a.get(false, false), Vec3::new(5.0, 5.0, 5.0));
    }

    #[test]
    fn forced_set_clamps_into_region() {
        let a = authority(region_land());
        a.set(None, true, Vec3::new(300.0, -4.0, 50.0), None, Vec3::ZERO, Vec3::ZERO)
            .unwrap();
        let p = a.get(false, false);
        assert!(regionspace_common::region::is_valid_region_xyz(p));
    }

    #[test]
    fn parcel_denial_leaves_state_untouched() {
        let land = region_land();
        let a = authority(Arc::clone(&land));
        a.set(None, false, Vec3::new(10.0, 10.0, 25.0), None, Vec3::ZERO, Vec3::ZERO)
            .unwrap();

        let mut parcel = Parcel::whole_region(1, "region");
        parcel.banned.insert(a.avatar());
        let err = a
            .set(Some(&parcel), false, Vec3::new(20.0, 20.0, 25.0), None, Vec3::ZERO, Vec3::ZERO)
            .unwrap_err();
        assert_eq!(err.min_z, 50.0);
        assert_eq!(a.get(false, false), Vec3::new(10.0, 10.0, 25.0));
    }

    #[test]
    fn in_transit_ignores_unforced_updates() {
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        let a = PositionAuthority::new(AvatarId::new(), region_land(), flag.clone());
        a.set(None, false, Vec3::new(1.0, 1.0, 1.0), None, Vec3::ZERO, Vec3::ZERO)
            .unwrap();

        flag.0.store(true, Ordering::SeqCst);
        a.set(None, false, Vec3::new(2.0, 2.0, 2.0), None, Vec3::ZERO, Vec3::ZERO)
            .unwrap();
        a.set_velocity(Vec3::Y);
        assert_eq!(a.get(false, false), Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(a.velocity(), Vec3::ZERO);

        a.set(None, true, Vec3::new(3.0, 3.0, 3.0), None, Vec3::ZERO, Vec3::ZERO)
            .unwrap();
        assert_eq!(a.get(false, false), Vec3::new(3.0, 3.0, 3.0));
    }

    #[test]
    fn seated_position_walks_through_seat() {
        let snap = ObjectSnapshot::single_part(AvatarId::new(), "bench", Vec3::new(50.0, 60.0, 22.0))
            .with_part(PartSnapshot::new("seat", Vec3::new(0.0, 2.0, 0.0)));
        let obj = SceneObject::from_snapshot(&snap, || LocalId(9)).unwrap();
        let seat = PartRef::new(&obj, obj.part_ids()[1]);

        let a = authority(region_land());
        a.set(None, true, Vec3::new(0.0, 0.0, 0.5), Some(seat.clone()), Vec3::ZERO, Vec3::ZERO)
            .unwrap();
        assert_eq!(a.get(false, false), Vec3::new(50.0, 62.0, 22.5));

        obj.set_position(Vec3::new(51.0, 60.0, 22.0));
        assert_eq!(a.get(false, false), Vec3::new(51.0, 62.0, 22.5));
        assert_eq!(a.info().parent, Some(seat));
    }

    #[test]
    fn parcel_change_snaps_back_and_bounces() {
        let land = region_land();
        let a = authority(Arc::clone(&land));
        a.set(None, false, Vec3::new(10.0, 10.0, 25.0), None, Vec3::ZERO, Vec3::new(1.0, 0.0, -3.0))
            .unwrap();
        assert_eq!(a.get(true, false), Vec3::new(10.0, 10.0, 25.0));

        let avatar = a.avatar();
        land.update(1, |p| {
            p.banned.insert(avatar);
        });
        a.set(None, true, Vec3::new(12.0, 10.0, 25.0), None, Vec3::ZERO, Vec3::new(1.0, 0.0, -3.0))
            .unwrap();

        let snapped = a.get(true, false);
        assert_eq!(snapped, Vec3::new(10.0, 10.0, 60.0));
        assert_eq!(a.velocity().z, 0.0);
    }

    #[test]
    fn sync_from_physics_reads_actor() {
        let physics = KinematicPhysics::new();
        let a = authority(region_land());
        a.set(None, true, Vec3::new(10.0, 10.0, 25.0), None, Vec3::ZERO, Vec3::X)
            .unwrap();
        let actor = physics.add_avatar(LocalId(1), Vec3::new(10.0, 10.0, 25.0), Vec3::X, Vec3::ONE, false);
        a.attach_actor(actor);
        physics.step(2.0);

        assert_eq!(a.get(false, false), Vec3::new(10.0, 10.0, 25.0));
        assert_eq!(a.get(false, true), Vec3::new(12.0, 10.0, 25.0));
    }

    #[test]
    fn concurrent_reads_never_mix_seat_and_position() {
        let snap = ObjectSnapshot::single_part(AvatarId::new(), "bench", Vec3::new(50.0, 60.0, 22.0))
            .with_part(PartSnapshot::new("seat", Vec3::new(0.0, 2.0, 0.0)));
        let obj = SceneObject::from_snapshot(&snap, || LocalId(9)).unwrap();
        let seat = PartRef::new(&obj, obj.part_ids()[1]);
        let a = authority(region_land());

        let standing = Vec3::new(10.0, 10.0, 25.0);
        let sitting = Vec3::new(50.0, 62.0, 22.5);
        a.set(None, true, standing, None, Vec3::ZERO, Vec3::ZERO).unwrap();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..2000 {
                    if i % 2 == 0 {
                        a.set(None, true, Vec3::new(0.0, 0.0, 0.5), Some(seat.clone()), Vec3::ZERO, Vec3::ZERO)
                            .unwrap();
                    } else {
                        a.set(None, true, standing, None, Vec3::ZERO, Vec3::ZERO).unwrap();
                    }
                }
            });
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..2000 {
                        let seen = a.get(false, false);
                        assert!(seen == standing || seen == sitting, "torn read {seen:?}");
                        let info = a.info();
                        assert_eq!(info.parent.is_some(), info.position == Vec3::new(0.0, 0.0, 0.5));
                    }
                });
            }
        });
    }
}
