use glam::Vec3;
use regionspace_common::region::force_valid_region_xyz;
use regionspace_common::{AvatarId, LocalId, ObjectId, PartId, RegionDescriptor, RegionHandle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::client::ClientView;
use crate::config::SceneConfig;
use crate::error::SceneError;
use crate::object::{ObjectSnapshot, PartRef, SceneObject};
use crate::presence::ScenePresence;
use crate::services::SceneServices;
use crate::spatial::SpatialIndex;

/// A record of every structural change to the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SceneEvent {
    PresenceAdded { avatar: AvatarId },
    PresenceClosed { avatar: AvatarId },
    MadeRoot { avatar: AvatarId, position: Vec3, seated: bool },
    MadeChild { avatar: AvatarId, destination: Option<RegionHandle> },
    Sat { avatar: AvatarId, object: ObjectId, part: PartId },
    StoodUp { avatar: AvatarId, position: Vec3 },
    Teleported { avatar: AvatarId, position: Vec3 },
    AvatarLeaving { avatar: AvatarId },
    AttachmentsRezzed { avatar: AvatarId, count: usize },
    ObjectAdded { object: ObjectId, local_id: LocalId },
    /// Taken out of the live scene while a crossing is attempted.
    ObjectDetached { object: ObjectId },
    ObjectRestored { object: ObjectId },
    ObjectDeleted { object: ObjectId },
    ObjectReturned { object: ObjectId, owner: AvatarId, reason: String },
    KillObject { local_id: LocalId, observers: usize },
}

#[derive(Default)]
struct SceneGraph {
    objects: BTreeMap<ObjectId, Arc<SceneObject>>,
    presences: BTreeMap<AvatarId, Arc<ScenePresence>>,
    /// Seat of each seated avatar, kept apart from the object tree.
    seats: HashMap<AvatarId, PartRef>,
}

/// The live state of one region.
///
/// Objects and presences are held in BTreeMaps for deterministic iteration.
/// The graph lock is only ever held for map access; no presence or object
/// lock is taken while it is held.
pub struct Scene {
    descriptor: RegionDescriptor,
    config: SceneConfig,
    services: SceneServices,
    graph: RwLock<SceneGraph>,
    spatial: Mutex<SpatialIndex>,
    events: Mutex<Vec<SceneEvent>>,
    next_local_id: AtomicU32,
    /// Serializes scene-wide sweeps over presences.
    sync_root: Mutex<()>,
}

impl Scene {
    pub fn new(descriptor: RegionDescriptor, config: SceneConfig, services: SceneServices) -> Arc<Self> {
        let spatial = SpatialIndex::new(config.spatial_cell_size);
        Arc::new(Self {
            descriptor,
            config,
            services,
            graph: RwLock::new(SceneGraph::default()),
            spatial: Mutex::new(spatial),
            events: Mutex::new(Vec::new()),
            next_local_id: AtomicU32::new(1),
            sync_root: Mutex::new(()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, SceneGraph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SceneGraph> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn spatial(&self) -> MutexGuard<'_, SpatialIndex> {
        self.spatial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn descriptor(&self) -> &RegionDescriptor {
        &self.descriptor
    }

    pub fn handle(&self) -> RegionHandle {
        self.descriptor.handle
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn services(&self) -> &SceneServices {
        &self.services
    }

    pub fn allocate_local_id(&self) -> LocalId {
        LocalId(self.next_local_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn record(&self, event: SceneEvent) {
        tracing::trace!(region = %self.descriptor.name, ?event, "scene event");
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Drain and return the event log.
    pub fn drain_events(&self) -> Vec<SceneEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn events(&self) -> Vec<SceneEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ---- presences ----

    /// Create a child presence for `avatar`, or return the existing one.
    pub fn add_presence(
        &self,
        avatar: AvatarId,
        name: impl Into<String>,
        client: Arc<dyn ClientView>,
    ) -> Arc<ScenePresence> {
        let mut graph = self.write();
        if let Some(existing) = graph.presences.get(&avatar) {
            return Arc::clone(existing);
        }
        let presence = Arc::new(ScenePresence::new(
            avatar,
            name.into(),
            client,
            &self.services,
            self.config.default_avatar_height,
        ));
        graph.presences.insert(avatar, Arc::clone(&presence));
        drop(graph);
        tracing::debug!(region = %self.descriptor.name, %avatar, "presence added");
        self.record(SceneEvent::PresenceAdded { avatar });
        presence
    }

    pub fn presence(&self, avatar: AvatarId) -> Option<Arc<ScenePresence>> {
        self.read().presences.get(&avatar).cloned()
    }

    pub fn presences(&self) -> Vec<Arc<ScenePresence>> {
        self.read().presences.values().cloned().collect()
    }

    pub fn root_presences(&self) -> Vec<Arc<ScenePresence>> {
        self.presences().into_iter().filter(|p| p.is_root()).collect()
    }

    pub fn presence_count(&self) -> usize {
        self.read().presences.len()
    }

    /// Close and forget a presence, releasing its body and seat.
    pub fn remove_presence(&self, avatar: AvatarId) -> Option<Arc<ScenePresence>> {
        let presence = self.write().presences.remove(&avatar)?;
        self.remove_seated_avatar(avatar);
        presence.remove_from_physical_scene(self);
        self.spatial_remove(presence.local_id());
        self.services.initial_rez.take(avatar);
        self.record(SceneEvent::PresenceClosed { avatar });
        Some(presence)
    }

    // ---- objects ----

    /// Build an object from `snapshot` and put it in the live scene.
    pub fn add_object(&self, snapshot: &ObjectSnapshot) -> Result<Arc<SceneObject>, SceneError> {
        if self.read().objects.contains_key(&snapshot.id) {
            return Err(SceneError::DuplicateObject(snapshot.id));
        }
        let object = SceneObject::from_snapshot(snapshot, || self.allocate_local_id())
            .ok_or(SceneError::EmptyObject(snapshot.id))?;
        {
            let mut graph = self.write();
            if graph.objects.contains_key(&snapshot.id) {
                return Err(SceneError::DuplicateObject(snapshot.id));
            }
            graph.objects.insert(object.id(), Arc::clone(&object));
        }
        self.attach_live(&object);
        self.record(SceneEvent::ObjectAdded {
            object: object.id(),
            local_id: object.local_id(),
        });
        Ok(object)
    }

    fn attach_live(&self, object: &Arc<SceneObject>) {
        let local_id = object.local_id();
        self.spatial_update(local_id, object.position());
        if object.is_physical() && !object.is_attachment() {
            let actor = self
                .services
                .physics
                .add_object(local_id, object.position(), object.velocity());
            object.set_actor(Some(actor));
        }
    }

    fn release_live(&self, object: &Arc<SceneObject>) {
        object.sync_from_physics();
        let local_id = object.local_id();
        if object.has_physics_actor() {
            self.services.physics.remove(local_id);
            object.set_actor(None);
        }
        self.spatial_remove(local_id);
    }

    pub fn object(&self, id: ObjectId) -> Option<Arc<SceneObject>> {
        self.read().objects.get(&id).cloned()
    }

    pub fn objects(&self) -> Vec<Arc<SceneObject>> {
        self.read().objects.values().cloned().collect()
    }

    pub fn object_count(&self) -> usize {
        self.read().objects.len()
    }

    /// Take an object out of the live scene without destroying it.
    pub fn detach_object(&self, id: ObjectId) -> Result<Arc<SceneObject>, SceneError> {
        let object = self
            .write()
            .objects
            .remove(&id)
            .ok_or(SceneError::UnknownObject(id))?;
        self.release_live(&object);
        self.record(SceneEvent::ObjectDetached { object: id });
        Ok(object)
    }

    /// Put a detached object back, clamped inside the region.
    pub fn restore_object(&self, object: &Arc<SceneObject>) -> Result<(), SceneError> {
        {
            let mut graph = self.write();
            if graph.objects.contains_key(&object.id()) {
                return Err(SceneError::DuplicateObject(object.id()));
            }
            graph.objects.insert(object.id(), Arc::clone(object));
        }
        object.force_position_in_region();
        object.set_in_transit(false);
        object.set_avatars_to_expect(0);
        self.attach_live(object);
        self.record(SceneEvent::ObjectRestored { object: object.id() });
        Ok(())
    }

    /// Destroy an object whether or not it is still in the live scene.
    pub fn delete_object(&self, object: &Arc<SceneObject>) {
        let removed = self.write().objects.remove(&object.id()).is_some();
        if removed {
            self.release_live(object);
        }
        object.mark_deleted();
        let stale: Vec<AvatarId> = {
            let mut graph = self.write();
            let stale: Vec<AvatarId> = graph
                .seats
                .iter()
                .filter(|(_, seat)| seat.object_id() == object.id())
                .map(|(avatar, _)| *avatar)
                .collect();
            for avatar in &stale {
                graph.seats.remove(avatar);
            }
            stale
        };
        if !stale.is_empty() {
            tracing::debug!(object = %object.id(), seats = stale.len(), "cleared seats of deleted object");
        }
        self.services.scripts.remove_scripts(object.id());
        self.record(SceneEvent::ObjectDeleted { object: object.id() });
    }

    /// Send an object back to its owner and drop it from the region.
    pub fn return_object(&self, object: &Arc<SceneObject>, reason: &str) {
        tracing::info!(object = %object.id(), owner = %object.owner(), reason, "returning object to owner");
        self.delete_object(object);
        self.record(SceneEvent::ObjectReturned {
            object: object.id(),
            owner: object.owner(),
            reason: reason.to_string(),
        });
    }

    /// Tell every root presence not in `exclude` to forget `local_id`.
    pub fn broadcast_kill(&self, local_id: LocalId, exclude: &[AvatarId]) -> usize {
        let observers: Vec<Arc<ScenePresence>> = self
            .root_presences()
            .into_iter()
            .filter(|p| !exclude.contains(&p.id()))
            .collect();
        for p in &observers {
            p.client().send_kill_objects(&[local_id]);
        }
        self.record(SceneEvent::KillObject {
            local_id,
            observers: observers.len(),
        });
        observers.len()
    }

    // ---- seats ----

    pub fn part_ref(&self, object: ObjectId, part: PartId) -> Option<PartRef> {
        let obj = self.object(object)?;
        obj.has_part(part).then(|| PartRef::new(&obj, part))
    }

    pub fn seat_of(&self, avatar: AvatarId) -> Option<PartRef> {
        self.read().seats.get(&avatar).cloned()
    }

    pub fn set_seat(&self, avatar: AvatarId, seat: PartRef) {
        self.write().seats.insert(avatar, seat);
    }

    pub fn clear_seat(&self, avatar: AvatarId) -> Option<PartRef> {
        self.write().seats.remove(&avatar)
    }

    /// Drop both sides of the seat bookkeeping for `avatar`.
    pub fn remove_seated_avatar(&self, avatar: AvatarId) -> bool {
        let Some(seat) = self.clear_seat(avatar) else {
            return false;
        };
        if let Some(obj) = seat.resolve() {
            obj.remove_sitter(seat.part_id(), avatar);
        }
        true
    }

    // ---- spatial ----

    pub fn spatial_update(&self, local_id: LocalId, pos: Vec3) {
        self.spatial().update(local_id, pos);
    }

    pub fn spatial_remove(&self, local_id: LocalId) -> bool {
        self.spatial().remove(local_id)
    }

    pub fn spatial_contains(&self, local_id: LocalId) -> bool {
        self.spatial().contains(local_id)
    }

    pub fn nearby(&self, pos: Vec3, radius_cells: i32) -> HashSet<LocalId> {
        self.spatial().in_radius(pos, radius_cells)
    }

    // ---- geometry ----

    pub fn ground_height(&self, x: f32, y: f32) -> f32 {
        self.services.terrain.ground_height(x, y)
    }

    /// Closest position inside the region and not below ground.
    pub fn nearest_legal_position(&self, pos: Vec3) -> Vec3 {
        let mut p = force_valid_region_xyz(pos);
        let ground = self.ground_height(p.x, p.y);
        if p.z < ground {
            p.z = ground;
        }
        p
    }

    // ---- scene-wide sweeps ----

    /// Absolute position of every root presence.
    pub fn coarse_locations(&self) -> Vec<(AvatarId, Vec3)> {
        let _sync = self.sync_root.lock().unwrap_or_else(PoisonError::into_inner);
        self.root_presences()
            .into_iter()
            .map(|p| (p.id(), p.authority().get(false, false)))
            .collect()
    }

    /// Stand every seated root presence up. Used on shutdown.
    pub fn stand_up_all(&self) -> usize {
        let _sync = self.sync_root.lock().unwrap_or_else(PoisonError::into_inner);
        self.root_presences()
            .into_iter()
            .filter(|p| p.stand_up(self))
            .count()
    }

    /// Advance physics and pull the results back into objects and presences.
    pub fn step_physics(&self, dt: f32) {
        self.services.physics.step(dt);
        for object in self.objects() {
            if let Some(pos) = object.sync_from_physics() {
                self.spatial_update(object.local_id(), pos);
            }
        }
        for presence in self.root_presences() {
            if presence.authority().is_seated() {
                continue;
            }
            let pos = presence.authority().get(true, true);
            self.spatial_update(presence.local_id(), pos);
        }
    }
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("region", &self.descriptor.name)
            .field("handle", &self.descriptor.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientLog, ClientMessage};

    fn scene() -> Arc<Scene> {
        Scene::new(
            RegionDescriptor::new("alpha", 1000, 1000).unwrap(),
            SceneConfig::default(),
            SceneServices::standalone(),
        )
    }

    fn crate_at(pos: Vec3) -> ObjectSnapshot {
        ObjectSnapshot::single_part(AvatarId::new(), "crate", pos)
    }

    #[test]
    fn scene_starts_empty() {
        let s = scene();
        assert_eq!(s.object_count(), 0);
        assert_eq!(s.presence_count(), 0);
        assert!(s.events().is_empty());
    }

    #[test]
    fn add_and_detach_object() {
        let s = scene();
        let obj = s.add_object(&crate_at(Vec3::new(10.0, 10.0, 21.0))).unwrap();
        assert!(s.spatial_contains(obj.local_id()));
        assert!(matches!(
            s.add_object(&obj.snapshot()),
            Err(SceneError::DuplicateObject(_))
        ));

        let detached = s.detach_object(obj.id()).unwrap();
        assert_eq!(s.object_count(), 0);
        assert!(!s.spatial_contains(detached.local_id()));
        assert!(matches!(
            s.detach_object(obj.id()),
            Err(SceneError::UnknownObject(_))
        ));
    }

    #[test]
    fn restore_clamps_and_reattaches_physics() {
        let s = scene();
        let snap = crate_at(Vec3::new(250.0, 10.0, 21.0)).physical(Vec3::X * 10.0);
        let obj = s.add_object(&snap).unwrap();
        assert!(obj.has_physics_actor());

        s.detach_object(obj.id()).unwrap();
        assert!(!obj.has_physics_actor());
        obj.set_position(Vec3::new(259.0, 10.0, 21.0));
        obj.set_in_transit(true);

        s.restore_object(&obj).unwrap();
        assert!(obj.has_physics_actor());
        assert!(!obj.in_transit());
        assert!(obj.position().x < 256.0);
        assert_eq!(s.object_count(), 1);
    }

    #[test]
    fn delete_clears_seat_index() {
        let s = scene();
        let obj = s.add_object(&crate_at(Vec3::new(10.0, 10.0, 21.0))).unwrap();
        let avatar = AvatarId::new();
        let seat = s.part_ref(obj.id(), obj.root_part_id()).unwrap();
        s.set_seat(avatar, seat);

        s.delete_object(&obj);
        assert!(s.seat_of(avatar).is_none());
        assert!(obj.is_deleted());
        assert!(s.events().contains(&SceneEvent::ObjectDeleted { object: obj.id() }));
    }

    #[test]
    fn broadcast_kill_skips_excluded_and_children() {
        let s = scene();
        let watcher = Arc::new(ClientLog::new());
        let rider = Arc::new(ClientLog::new());
        let child = Arc::new(ClientLog::new());

        let w = s.add_presence(AvatarId::new(), "watcher", watcher.clone());
        w.make_root(&s, Vec3::new(20.0, 20.0, 21.0));
        let r = s.add_presence(AvatarId::new(), "rider", rider.clone());
        r.make_root(&s, Vec3::new(30.0, 20.0, 21.0));
        s.add_presence(AvatarId::new(), "child", child.clone());

        let count = s.broadcast_kill(LocalId(77), &[r.id()]);
        assert_eq!(count, 1);
        assert_eq!(
            watcher.messages(),
            vec![ClientMessage::KillObjects(vec![LocalId(77)])]
        );
        assert!(rider.messages().is_empty());
        assert!(child.messages().is_empty());
    }

    #[test]
    fn nearest_legal_position_respects_ground() {
        let s = scene();
        let p = s.nearest_legal_position(Vec3::new(-3.0, 300.0, 1.0));
        assert_eq!(p.x, 0.0);
        assert!(p.y < 256.0);
        assert_eq!(p.z, 20.0);
    }

    #[test]
    fn step_physics_moves_objects_and_index() {
        let s = scene();
        let obj = s
            .add_object(&crate_at(Vec3::new(10.0, 10.0, 21.0)).physical(Vec3::X * 20.0))
            .unwrap();
        s.step_physics(1.0);
        assert_eq!(obj.position(), Vec3::new(30.0, 10.0, 21.0));
        assert!(s.nearby(Vec3::new(30.0, 10.0, 21.0), 0).contains(&obj.local_id()));
    }

    #[test]
    fn remove_presence_forgets_everything() {
        let s = scene();
        let p = s.add_presence(AvatarId::new(), "gone", Arc::new(ClientLog::new()));
        p.make_root(&s, Vec3::new(20.0, 20.0, 21.0));
        let local = p.local_id();
        assert!(s.spatial_contains(local));

        s.remove_presence(p.id()).unwrap();
        assert!(s.presence(p.id()).is_none());
        assert!(!s.spatial_contains(local));
        assert_eq!(s.services().physics.actor_count(), 0);
    }
}
