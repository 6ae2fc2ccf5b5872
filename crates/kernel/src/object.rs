//! Scene objects: an owned tree of parts with a designated root.
//!
//! # Invariants
//! - `parts[0]` is the root part; an object always has at least one part.
//! - Only the root owns a physics actor, and only while the object is in the scene.
//! - Seated avatars refer to parts through [`PartRef`], which never keeps an object alive.

use glam::{Quat, Vec3};
use regionspace_common::region::{force_valid_region_xyz, is_valid_region_xyz};
use regionspace_common::{AvatarId, LocalId, ObjectId, PartId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::physics::PhysicsActor;

/// Serializable form of a part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartSnapshot {
    pub id: PartId,
    pub name: String,
    /// Offset from the root part, in the root's frame. Zero for the root.
    pub offset_position: Vec3,
    pub rotation: Quat,
    pub sit_target: Vec3,
}

impl PartSnapshot {
    pub fn new(name: impl Into<String>, offset_position: Vec3) -> Self {
        Self {
            id: PartId::new(),
            name: name.into(),
            offset_position,
            rotation: Quat::IDENTITY,
            sit_target: Vec3::new(0.0, 0.0, 0.5),
        }
    }
}

/// Serializable form of a whole object, as carried across regions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    pub owner: AvatarId,
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub physical: bool,
    pub is_attachment: bool,
    pub parts: Vec<PartSnapshot>,
}

impl ObjectSnapshot {
    /// A single-part, non-physical object.
    pub fn single_part(owner: AvatarId, name: impl Into<String>, position: Vec3) -> Self {
        let name = name.into();
        Self {
            id: ObjectId::new(),
            owner,
            parts: vec![PartSnapshot::new(name.clone(), Vec3::ZERO)],
            name,
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            physical: false,
            is_attachment: false,
        }
    }

    pub fn with_part(mut self, part: PartSnapshot) -> Self {
        self.parts.push(part);
        self
    }

    pub fn physical(mut self, velocity: Vec3) -> Self {
        self.physical = true;
        self.velocity = velocity;
        self
    }

    pub fn root_part(&self) -> Option<PartId> {
        self.parts.first().map(|p| p.id)
    }
}

#[derive(Debug, Clone)]
pub struct Part {
    pub id: PartId,
    pub local_id: LocalId,
    pub name: String,
    pub offset_position: Vec3,
    pub rotation: Quat,
    pub sit_target: Vec3,
    sitters: BTreeSet<AvatarId>,
}

impl Part {
    pub fn sitters(&self) -> &BTreeSet<AvatarId> {
        &self.sitters
    }
}

/// Frame data needed to turn a seat offset into a world position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeatFrame {
    pub part_rotation: Quat,
    pub part_offset: Vec3,
    pub is_root: bool,
    pub root_position: Vec3,
    pub root_rotation: Quat,
    pub physical: bool,
}

impl SeatFrame {
    /// World position of a point at `offset` in the part's frame.
    pub fn world_position(&self, offset: Vec3) -> Vec3 {
        let mut pos = self.part_rotation * offset;
        if !self.is_root {
            pos += self.part_offset;
            pos = self.root_rotation * pos;
        }
        pos + self.root_position
    }
}

struct ObjectState {
    local_id: LocalId,
    name: String,
    position: Vec3,
    rotation: Quat,
    velocity: Vec3,
    physical: bool,
    is_attachment: bool,
    parts: Vec<Part>,
    actor: Option<Arc<dyn PhysicsActor>>,
}

pub struct SceneObject {
    id: ObjectId,
    owner: AvatarId,
    state: RwLock<ObjectState>,
    in_transit: AtomicBool,
    avatars_to_expect: AtomicU32,
    /// Wall-clock ms at which the object arrived from another region; zero
    /// if it was created here.
    received_at_ms: AtomicU64,
    deleted: AtomicBool,
}

impl SceneObject {
    /// Build a live object from a snapshot, allocating a local id per part.
    /// Sitters are not carried by snapshots and start empty.
    pub fn from_snapshot(
        snapshot: &ObjectSnapshot,
        mut allocate: impl FnMut() -> LocalId,
    ) -> Option<Arc<Self>> {
        if snapshot.parts.is_empty() {
            return None;
        }
        let parts: Vec<Part> = snapshot
            .parts
            .iter()
            .map(|p| Part {
                id: p.id,
                local_id: allocate(),
                name: p.name.clone(),
                offset_position: p.offset_position,
                rotation: p.rotation,
                sit_target: p.sit_target,
                sitters: BTreeSet::new(),
            })
            .collect();
        Some(Arc::new(Self {
            id: snapshot.id,
            owner: snapshot.owner,
            state: RwLock::new(ObjectState {
                local_id: parts[0].local_id,
                name: snapshot.name.clone(),
                position: snapshot.position,
                rotation: snapshot.rotation,
                velocity: snapshot.velocity,
                physical: snapshot.physical,
                is_attachment: snapshot.is_attachment,
                parts,
                actor: None,
            }),
            in_transit: AtomicBool::new(false),
            avatars_to_expect: AtomicU32::new(0),
            received_at_ms: AtomicU64::new(0),
            deleted: AtomicBool::new(false),
        }))
    }

    fn read(&self) -> RwLockReadGuard<'_, ObjectState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ObjectState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Grid-wide id; unchanged when the object crosses regions.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn owner(&self) -> AvatarId {
        self.owner
    }

    /// Display name, copied out of the lock.
    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    /// Region-local id of the root part. Reassigned on every arrival.
    pub fn local_id(&self) -> LocalId {
        self.read().local_id
    }

    /// Everything needed to rebuild the object in another region, read
    /// under one lock. Sitters and the physics actor stay behind.
    pub fn snapshot(&self) -> ObjectSnapshot {
        let s = self.read();
        ObjectSnapshot {
            id: self.id,
            owner: self.owner,
            name: s.name.clone(),
            position: s.position,
            rotation: s.rotation,
            velocity: s.velocity,
            physical: s.physical,
            is_attachment: s.is_attachment,
            parts: s
                .parts
                .iter()
                .map(|p| PartSnapshot {
                    id: p.id,
                    name: p.name.clone(),
                    offset_position: p.offset_position,
                    rotation: p.rotation,
                    sit_target: p.sit_target,
                })
                .collect(),
        }
    }

    /// Root position in region coordinates. For a physical object this is
    /// the value last pulled from physics.
    pub fn position(&self) -> Vec3 {
        self.read().position
    }

    pub fn rotation(&self) -> Quat {
        self.read().rotation
    }

    pub fn velocity(&self) -> Vec3 {
        self.read().velocity
    }

    /// Whether the object is simulated, and so moves on its own each frame.
    pub fn is_physical(&self) -> bool {
        self.read().physical
    }

    pub fn is_attachment(&self) -> bool {
        self.read().is_attachment
    }

    /// Move the root, pushing the new position into the physics actor.
    pub fn set_position(&self, position: Vec3) {
        let mut s = self.write();
        s.position = position;
        if let Some(actor) = &s.actor {
            actor.set_position(position);
        }
    }

    /// Set the velocity here and in the physics actor, if any.
    pub fn set_velocity(&self, velocity: Vec3) {
        let mut s = self.write();
        s.velocity = velocity;
        if let Some(actor) = &s.actor {
            actor.set_velocity(velocity);
        }
    }

    /// Clamp the root into the region. Returns true if it moved.
    pub fn force_position_in_region(&self) -> bool {
        let pos = self.position();
        if is_valid_region_xyz(pos) {
            return false;
        }
        let clamped = force_valid_region_xyz(pos);
        tracing::debug!(object = %self.id, ?pos, ?clamped, "forcing object into region");
        self.set_position(clamped);
        true
    }

    /// Pull position and velocity back from the physics actor, if any.
    pub fn sync_from_physics(&self) -> Option<Vec3> {
        let mut s = self.write();
        let actor = s.actor.clone()?;
        s.position = actor.position();
        s.velocity = actor.velocity();
        Some(s.position)
    }

    /// True only for a physical object that is live in a scene.
    pub fn has_physics_actor(&self) -> bool {
        self.read().actor.is_some()
    }

    pub(crate) fn set_actor(&self, actor: Option<Arc<dyn PhysicsActor>>) {
        self.write().actor = actor;
    }

    /// Set while the object is detached and on its way to another region.
    /// Border checks skip it.
    pub fn in_transit(&self) -> bool {
        self.in_transit.load(Ordering::Acquire)
    }

    pub fn set_in_transit(&self, value: bool) {
        self.in_transit.store(value, Ordering::Release);
    }

    /// Riders still due to arrive with this object. Counts down through
    /// [`rider_arrived`](Self::rider_arrived).
    pub fn avatars_to_expect(&self) -> u32 {
        self.avatars_to_expect.load(Ordering::Acquire)
    }

    pub fn set_avatars_to_expect(&self, count: u32) {
        self.avatars_to_expect.store(count, Ordering::Release);
    }

    /// A rider that was expected with this object has arrived.
    pub fn rider_arrived(&self) -> u32 {
        let prev = self
            .avatars_to_expect
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    /// Record that the object arrived from another region at `at_ms`.
    pub fn mark_received(&self, at_ms: u64) {
        self.received_at_ms.store(at_ms, Ordering::Release);
    }

    /// When the object arrived from another region, if it did.
    pub fn received_at_ms(&self) -> Option<u64> {
        match self.received_at_ms.load(Ordering::Acquire) {
            0 => None,
            at => Some(at),
        }
    }

    /// Once set, never cleared; a deleted object is never put back.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Part ids, root first.
    pub fn part_ids(&self) -> Vec<PartId> {
        self.read().parts.iter().map(|p| p.id).collect()
    }

    /// A live object always has at least one part.
    pub fn root_part_id(&self) -> PartId {
        self.read().parts[0].id
    }

    pub fn has_part(&self, part: PartId) -> bool {
        self.read().parts.iter().any(|p| p.id == part)
    }

    /// Local ids of every part, root first, for kill messages.
    pub fn part_local_ids(&self) -> Vec<LocalId> {
        self.read().parts.iter().map(|p| p.local_id).collect()
    }

    /// Frame an avatar sitting on `part` is placed through, taken from the
    /// current root pose. `None` if the part is not on this object.
    pub fn seat_frame(&self, part: PartId) -> Option<SeatFrame> {
        let s = self.read();
        let (index, p) = s.parts.iter().enumerate().find(|(_, p)| p.id == part)?;
        Some(SeatFrame {
            part_rotation: p.rotation,
            part_offset: p.offset_position,
            is_root: index == 0,
            root_position: s.position,
            root_rotation: s.rotation,
            physical: s.physical,
        })
    }

    /// Sit offset configured on `part`.
    pub fn sit_target(&self, part: PartId) -> Option<Vec3> {
        self.read()
            .parts
            .iter()
            .find(|p| p.id == part)
            .map(|p| p.sit_target)
    }

    /// Returns false if the part is unknown or `avatar` already sits there.
    pub fn add_sitter(&self, part: PartId, avatar: AvatarId) -> bool {
        let mut s = self.write();
        match s.parts.iter_mut().find(|p| p.id == part) {
            Some(p) => p.sitters.insert(avatar),
            None => false,
        }
    }

    /// Returns false if `avatar` was not sitting on `part`.
    pub fn remove_sitter(&self, part: PartId, avatar: AvatarId) -> bool {
        let mut s = self.write();
        match s.parts.iter_mut().find(|p| p.id == part) {
            Some(p) => p.sitters.remove(&avatar),
            None => false,
        }
    }

    /// Every avatar seated on any part, in part order.
    pub fn sitting_avatars(&self) -> Vec<(AvatarId, PartId)> {
        self.read()
            .parts
            .iter()
            .flat_map(|p| p.sitters.iter().map(move |a| (*a, p.id)))
            .collect()
    }
}

impl fmt::Debug for SceneObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.read();
        f.debug_struct("SceneObject")
            .field("id", &self.id)
            .field("local_id", &s.local_id)
            .field("position", &s.position)
            .field("parts", &s.parts.len())
            .field("in_transit", &self.in_transit())
            .finish()
    }
}

/// Non-owning reference to one part of a scene object.
#[derive(Clone)]
pub struct PartRef {
    object_id: ObjectId,
    part_id: PartId,
    object: Weak<SceneObject>,
}

impl PartRef {
    /// Refer to `part_id` on `object` without keeping the object alive.
    pub fn new(object: &Arc<SceneObject>, part_id: PartId) -> Self {
        Self {
            object_id: object.id(),
            part_id,
            object: Arc::downgrade(object),
        }
    }

    /// Id of the object, known even after it is gone.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn part_id(&self) -> PartId {
        self.part_id
    }

    /// The owning object, unless it has been dropped or deleted.
    pub fn resolve(&self) -> Option<Arc<SceneObject>> {
        self.object.upgrade().filter(|o| !o.is_deleted())
    }
}

impl PartialEq for PartRef {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id && self.part_id == other.part_id
    }
}

impl fmt::Debug for PartRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartRef")
            .field("object", &self.object_id)
            .field("part", &self.part_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_part_object() -> Arc<SceneObject> {
        let snap = ObjectSnapshot::single_part(AvatarId::new(), "cart", Vec3::new(100.0, 100.0, 25.0))
            .with_part(PartSnapshot::new("seat", Vec3::new(1.0, 0.0, 0.0)));
        let mut next = 0;
        SceneObject::from_snapshot(&snap, || {
            next += 1;
            LocalId(next)
        })
        .unwrap()
    }

    #[test]
    fn from_snapshot_allocates_local_ids() {
        let obj = two_part_object();
        assert_eq!(obj.part_local_ids(), vec![LocalId(1), LocalId(2)]);
        assert_eq!(obj.local_id(), LocalId(1));
    }

    #[test]
    fn empty_snapshot_is_rejected() {
        let mut snap = ObjectSnapshot::single_part(AvatarId::new(), "ghost", Vec3::ZERO);
        snap.parts.clear();
        assert!(SceneObject::from_snapshot(&snap, || LocalId(1)).is_none());
    }

    #[test]
    fn seat_frame_walks_child_part_through_root() {
        let obj = two_part_object();
        let seat = obj.part_ids()[1];
        let frame = obj.seat_frame(seat).unwrap();
        let world = frame.world_position(Vec3::new(0.0, 0.0, 0.5));
        assert_eq!(world, Vec3::new(101.0, 100.0, 25.5));
    }

    #[test]
    fn seat_frame_applies_root_rotation() {
        let obj = two_part_object();
        obj.write().rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let frame = obj.seat_frame(obj.part_ids()[1]).unwrap();
        let world = frame.world_position(Vec3::ZERO);
        assert!((world - Vec3::new(100.0, 101.0, 25.0)).length() < 1e-4);
    }

    #[test]
    fn sitters_are_tracked_per_part() {
        let obj = two_part_object();
        let a = AvatarId::new();
        let seat = obj.part_ids()[1];
        assert!(obj.add_sitter(seat, a));
        assert_eq!(obj.sitting_avatars(), vec![(a, seat)]);
        assert!(obj.remove_sitter(seat, a));
        assert!(obj.sitting_avatars().is_empty());
        assert!(!obj.add_sitter(PartId::new(), a));
    }

    #[test]
    fn rider_arrival_saturates() {
        let obj = two_part_object();
        obj.set_avatars_to_expect(1);
        assert_eq!(obj.rider_arrived(), 0);
        assert_eq!(obj.rider_arrived(), 0);
        assert_eq!(obj.avatars_to_expect(), 0);
    }

    #[test]
    fn arrival_time_is_only_set_for_received_objects() {
        let obj = two_part_object();
        assert_eq!(obj.received_at_ms(), None);
        obj.mark_received(1_700_000_000_000);
        assert_eq!(obj.received_at_ms(), Some(1_700_000_000_000));
    }

    #[test]
    fn part_ref_does_not_keep_object_alive() {
        let obj = two_part_object();
        let part = PartRef::new(&obj, obj.root_part_id());
        assert!(part.resolve().is_some());
        obj.mark_deleted();
        assert!(part.resolve().is_none());
        drop(obj);
        assert!(part.resolve().is_none());
    }

    #[test]
    fn snapshot_preserves_parts() {
        let obj = two_part_object();
        let snap = obj.snapshot();
        assert_eq!(snap.parts.len(), 2);
        assert_eq!(snap.id, obj.id());
        assert_eq!(snap.root_part(), Some(obj.root_part_id()));
    }
}
