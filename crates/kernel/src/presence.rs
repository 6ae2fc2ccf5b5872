//! Scene presence: one avatar's full (root) or placeholder (child) existence
//! in a region.

use glam::{Quat, Vec3};
use regionspace_common::region::{BORDER_DISTANCE, force_inside_border, is_valid_region_xy};
use regionspace_common::{AvatarId, LocalId, ObjectId, PartId, RegionHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::agent_data::{Arrival, SeatRecord};
use crate::client::ClientView;
use crate::connection::{ConnectionState, RemotePresenceState, RemotePresences};
use crate::error::SceneError;
use crate::object::PartRef;
use crate::position::PositionAuthority;
use crate::scene::{Scene, SceneEvent};
use crate::services::SceneServices;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    pub height: f32,
    pub serial: u32,
}

impl Appearance {
    pub fn with_height(height: f32) -> Self {
        Self { height, serial: 0 }
    }

    /// Collision box derived from the avatar height.
    pub fn size(&self) -> Vec3 {
        Vec3::new(0.45, 0.6, self.height)
    }
}

/// Agent control input as received from the viewer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentUpdate {
    pub control_flags: u32,
    pub body_rotation: Quat,
    pub flying: bool,
}

pub(crate) struct PresenceState {
    pub(crate) connection: ConnectionState,
    pub(crate) remote: RemotePresences,
    pub(crate) appearance: Appearance,
    pub(crate) size: Vec3,
    pub(crate) animations: Vec<Uuid>,
    /// Control grants held by scripts, keyed by the granting object.
    pub(crate) scripted_controls: BTreeMap<ObjectId, u32>,
    pub(crate) attachments: Vec<ObjectId>,
    pub(crate) attachments_in_transit: bool,
    pub(crate) control_flags: u32,
    pub(crate) body_rotation: Quat,
    pub(crate) always_run: bool,
    pub(crate) draw_distance: f32,
    pub(crate) flying: bool,
    pub(crate) callback_uri: Option<String>,
    pub(crate) pending_seat: Option<SeatRecord>,
    pub(crate) arrival: Option<Arrival>,
    pub(crate) source_region: Option<RegionHandle>,
    pub(crate) destination: Option<RegionHandle>,
}

pub struct ScenePresence {
    id: AvatarId,
    name: String,
    local_id: AtomicU32,
    client: Arc<dyn ClientView>,
    authority: PositionAuthority,
    state: Mutex<PresenceState>,
}

impl ScenePresence {
    pub(crate) fn new(
        id: AvatarId,
        name: String,
        client: Arc<dyn ClientView>,
        services: &SceneServices,
        height: f32,
    ) -> Self {
        let appearance = Appearance::with_height(height);
        Self {
            id,
            name,
            local_id: AtomicU32::new(0),
            client,
            authority: PositionAuthority::new(
                id,
                Arc::clone(&services.land),
                Arc::clone(&services.transit),
            ),
            state: Mutex::new(PresenceState {
                connection: ConnectionState::Connecting,
                remote: RemotePresences::default(),
                size: appearance.size(),
                appearance,
                animations: Vec::new(),
                scripted_controls: BTreeMap::new(),
                attachments: Vec::new(),
                attachments_in_transit: false,
                control_flags: 0,
                body_rotation: Quat::IDENTITY,
                always_run: false,
                draw_distance: 128.0,
                flying: false,
                callback_uri: None,
                pending_seat: None,
                arrival: None,
                source_region: None,
                destination: None,
            }),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, PresenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> AvatarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_id(&self) -> LocalId {
        LocalId(self.local_id.load(Ordering::Acquire))
    }

    pub(crate) fn set_local_id(&self, id: LocalId) {
        self.local_id.store(id.0, Ordering::Release);
    }

    pub fn client(&self) -> &Arc<dyn ClientView> {
        &self.client
    }

    pub fn authority(&self) -> &PositionAuthority {
        &self.authority
    }

    pub fn in_transit(&self) -> bool {
        self.authority.in_transit()
    }

    // ---- connection ----

    pub fn connection(&self) -> ConnectionState {
        self.state().connection
    }

    pub fn set_connection(&self, connection: ConnectionState) {
        self.state().connection = connection;
    }

    pub fn connection_established(&self) -> bool {
        self.connection() == ConnectionState::Established
    }

    /// Whether this presence may currently be handed to another region.
    pub fn can_exit_region(&self) -> bool {
        let st = self.state();
        st.connection == ConnectionState::Established && !st.attachments_in_transit
    }

    pub fn remote_state(&self, region: RegionHandle) -> Option<RemotePresenceState> {
        self.state().remote.state(region)
    }

    pub fn set_remote_state(&self, region: RegionHandle, state: RemotePresenceState) {
        self.state().remote.set(region, state);
    }

    pub fn drop_remote(&self, region: RegionHandle) -> bool {
        self.state().remote.remove(region).is_some()
    }

    pub fn has_remote_presence(&self, region: RegionHandle) -> bool {
        self.state().remote.is_established(region)
    }

    pub fn has_establishing_connections(&self) -> bool {
        self.state().remote.any_establishing()
    }

    pub fn remote_regions(&self) -> Vec<RegionHandle> {
        self.state().remote.regions().collect()
    }

    // ---- appearance, animation, controls ----

    pub fn appearance(&self) -> Appearance {
        self.state().appearance.clone()
    }

    pub fn set_appearance(&self, appearance: Appearance) {
        let mut st = self.state();
        st.size = appearance.size();
        st.appearance = appearance;
    }

    pub fn size(&self) -> Vec3 {
        self.state().size
    }

    pub(crate) fn refresh_size_from_appearance(&self) {
        let mut st = self.state();
        st.size = st.appearance.size();
    }

    pub fn animations(&self) -> Vec<Uuid> {
        self.state().animations.clone()
    }

    pub fn add_animation(&self, animation: Uuid) {
        let mut st = self.state();
        if !st.animations.contains(&animation) {
            st.animations.push(animation);
        }
    }

    pub fn reset_animations(&self) {
        self.state().animations.clear();
    }

    pub fn grant_controls(&self, object: ObjectId, controls: u32) {
        self.state().scripted_controls.insert(object, controls);
    }

    pub fn scripted_control_count(&self) -> usize {
        self.state().scripted_controls.len()
    }

    pub fn control_flags(&self) -> u32 {
        self.state().control_flags
    }

    pub fn body_rotation(&self) -> Quat {
        self.state().body_rotation
    }

    pub fn is_flying(&self) -> bool {
        if self.authority.has_physics_actor() {
            return self.authority.is_flying();
        }
        self.state().flying
    }

    pub fn set_callback_uri(&self, uri: Option<String>) {
        self.state().callback_uri = uri;
    }

    pub fn callback_uri(&self) -> Option<String> {
        self.state().callback_uri.clone()
    }

    pub fn source_region(&self) -> Option<RegionHandle> {
        self.state().source_region
    }

    /// Region this presence was last handed to, if any.
    pub fn destination(&self) -> Option<RegionHandle> {
        self.state().destination
    }

    /// Apply viewer control input. Ignored while in transit.
    pub fn handle_agent_update(&self, update: AgentUpdate) -> bool {
        if self.in_transit() {
            tracing::debug!(avatar = %self.id, "ignoring agent update while in transit");
            return false;
        }
        {
            let mut st = self.state();
            st.control_flags = update.control_flags;
            if update.body_rotation.is_finite() {
                st.body_rotation = update.body_rotation;
            }
            st.flying = update.flying;
        }
        self.authority.set_flying(update.flying);
        if self.authority.repair_actor_position() {
            tracing::warn!(avatar = %self.id, "physics reported a non-finite position, restored last known");
        }
        true
    }

    // ---- attachments ----

    pub fn add_attachment(&self, object: ObjectId) {
        let mut st = self.state();
        if !st.attachments.contains(&object) {
            st.attachments.push(object);
        }
    }

    pub fn attachments(&self) -> Vec<ObjectId> {
        self.state().attachments.clone()
    }

    /// Freeze attachments for a handoff. Returns false if already frozen.
    pub fn start_attachment_transit(&self) -> bool {
        let mut st = self.state();
        if st.attachments_in_transit {
            return false;
        }
        st.attachments_in_transit = true;
        true
    }

    /// Thaw attachments. On success the region no longer owns them.
    pub fn end_attachment_transit(&self, success: bool) {
        let mut st = self.state();
        st.attachments_in_transit = false;
        if success {
            st.attachments.clear();
        }
    }

    pub fn attachments_in_transit(&self) -> bool {
        self.state().attachments_in_transit
    }

    // ---- seating and movement ----

    /// Sit on `part` of `object`. Only a root presence not in transit can sit.
    pub fn sit(&self, scene: &Scene, object: ObjectId, part: PartId) -> Result<(), SceneError> {
        if !self.is_root() {
            return Err(SceneError::NotRoot(self.id));
        }
        if self.in_transit() {
            return Err(SceneError::InTransit(self.id));
        }
        let seat = scene
            .part_ref(object, part)
            .ok_or(SceneError::UnknownPart { object, part })?;
        let obj = seat.resolve().ok_or(SceneError::UnknownObject(object))?;
        let offset = obj.sit_target(part).unwrap_or(Vec3::ZERO);
        let parent_absolute = obj
            .seat_frame(part)
            .map(|f| f.world_position(Vec3::ZERO))
            .unwrap_or_else(|| obj.position());

        if scene.seat_of(self.id).is_some() {
            scene.remove_seated_avatar(self.id);
        }
        self.remove_from_physical_scene(scene);
        obj.add_sitter(part, self.id);
        scene.set_seat(self.id, seat.clone());
        self.authority
            .set(None, true, offset, Some(seat), parent_absolute, Vec3::ZERO)?;
        scene.record(SceneEvent::Sat {
            avatar: self.id,
            object,
            part,
        });
        Ok(())
    }

    /// Leave the current seat, keeping the current world position.
    /// Returns true if the avatar was seated. Ignored while in transit.
    pub fn stand_up(&self, scene: &Scene) -> bool {
        if self.in_transit() {
            tracing::debug!(avatar = %self.id, "ignoring stand-up while in transit");
            return false;
        }
        if !self.authority.is_seated() && scene.seat_of(self.id).is_none() {
            return false;
        }
        let position = self.authority.get(false, false);
        scene.remove_seated_avatar(self.id);
        // forced: a seated avatar may be carried over a refusing parcel
        let _ = self
            .authority
            .set(None, true, position, None, Vec3::ZERO, Vec3::ZERO);
        let position = self.authority.get(false, false);
        if self.is_root() {
            self.add_to_physical_scene(scene);
            scene.spatial_update(self.local_id(), position);
        }
        scene.record(SceneEvent::StoodUp {
            avatar: self.id,
            position,
        });
        true
    }

    /// Relocate within the region and stop moving.
    pub fn teleport(&self, scene: &Scene, position: Vec3) {
        let _ = self
            .authority
            .set(None, true, position, None, Vec3::ZERO, Vec3::ZERO);
        let position = self.authority.get(false, false);
        scene.spatial_update(self.local_id(), position);
        scene.record(SceneEvent::Teleported {
            avatar: self.id,
            position,
        });
    }

    /// Push an avatar that has strayed outside back in from the edge.
    pub fn force_position_in_region(&self) -> Vec3 {
        let position = self.authority.get(false, false);
        if is_valid_region_xy(position) {
            return position;
        }
        let inside = force_inside_border(position, BORDER_DISTANCE);
        tracing::debug!(avatar = %self.id, ?position, ?inside, "forcing avatar back inside region");
        let _ = self
            .authority
            .set(None, true, inside, None, Vec3::ZERO, self.authority.velocity());
        inside
    }

    pub fn seat(&self) -> Option<PartRef> {
        self.authority.parent()
    }
}

impl std::fmt::Debug for ScenePresence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenePresence")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("local_id", &self.local_id())
            .field("mode", &self.authority.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientLog;
    use crate::config::SceneConfig;
    use crate::object::{ObjectSnapshot, PartSnapshot};
    use regionspace_common::RegionDescriptor;

    fn scene() -> Arc<Scene> {
        Scene::new(
            RegionDescriptor::new("alpha", 1000, 1000).unwrap(),
            SceneConfig::default(),
            SceneServices::standalone(),
        )
    }

    fn root(scene: &Scene, pos: Vec3) -> Arc<ScenePresence> {
        let p = scene.add_presence(AvatarId::new(), "walker", Arc::new(ClientLog::new()));
        p.set_connection(ConnectionState::Established);
        p.make_root(scene, pos);
        p
    }

    #[test]
    fn sit_then_stand_restores_physics() {
        let s = scene();
        let bench = s
            .add_object(
                &ObjectSnapshot::single_part(AvatarId::new(), "bench", Vec3::new(40.0, 40.0, 21.0))
                    .with_part(PartSnapshot::new("seat", Vec3::new(1.0, 0.0, 0.0))),
            )
            .unwrap();
        let seat = bench.part_ids()[1];
        let p = root(&s, Vec3::new(38.0, 40.0, 21.0));
        assert!(p.authority().has_physics_actor());

        p.sit(&s, bench.id(), seat).unwrap();
        assert!(p.authority().is_seated());
        assert!(!p.authority().has_physics_actor());
        assert_eq!(bench.sitting_avatars(), vec![(p.id(), seat)]);
        assert_eq!(p.authority().get(false, false), Vec3::new(41.0, 40.0, 21.5));

        assert!(p.stand_up(&s));
        assert!(!p.authority().is_seated());
        assert!(p.authority().has_physics_actor());
        assert!(bench.sitting_avatars().is_empty());
        assert!(s.seat_of(p.id()).is_none());
        assert_eq!(p.authority().get(false, false), Vec3::new(41.0, 40.0, 21.5));
        assert!(!p.stand_up(&s));
    }

    #[test]
    fn child_cannot_sit() {
        let s = scene();
        let obj = s
            .add_object(&ObjectSnapshot::single_part(AvatarId::new(), "box", Vec3::new(5.0, 5.0, 21.0)))
            .unwrap();
        let p = s.add_presence(AvatarId::new(), "child", Arc::new(ClientLog::new()));
        assert!(matches!(
            p.sit(&s, obj.id(), obj.root_part_id()),
            Err(SceneError::NotRoot(_))
        ));
    }

    #[test]
    fn can_exit_requires_established_and_idle_attachments() {
        let s = scene();
        let p = s.add_presence(AvatarId::new(), "a", Arc::new(ClientLog::new()));
        assert!(!p.can_exit_region());
        p.set_connection(ConnectionState::Established);
        assert!(p.can_exit_region());
        assert!(p.start_attachment_transit());
        assert!(!p.start_attachment_transit());
        assert!(!p.can_exit_region());
        p.end_attachment_transit(false);
        assert!(p.can_exit_region());
    }

    #[test]
    fn attachments_cleared_only_on_successful_transit() {
        let s = scene();
        let p = s.add_presence(AvatarId::new(), "a", Arc::new(ClientLog::new()));
        let hat = ObjectId::new();
        p.add_attachment(hat);
        p.start_attachment_transit();
        p.end_attachment_transit(false);
        assert_eq!(p.attachments(), vec![hat]);
        p.start_attachment_transit();
        p.end_attachment_transit(true);
        assert!(p.attachments().is_empty());
    }

    #[test]
    fn force_position_in_region_uses_border_distance() {
        let s = scene();
        let p = root(&s, Vec3::new(100.0, 100.0, 21.0));
        p.authority()
            .with_state(|st| st.info.position = Vec3::new(258.0, 100.0, 21.0));
        let inside = p.force_position_in_region();
        assert_eq!(inside, Vec3::new(254.0, 100.0, 21.0));
    }

    #[test]
    fn teleport_zeroes_velocity() {
        let s = scene();
        let p = root(&s, Vec3::new(100.0, 100.0, 21.0));
        p.authority().set_velocity(Vec3::new(3.0, 0.0, 0.0));
        p.teleport(&s, Vec3::new(10.0, 10.0, 30.0));
        assert_eq!(p.authority().get(false, false), Vec3::new(10.0, 10.0, 30.0));
        assert_eq!(p.authority().velocity(), Vec3::ZERO);
    }

    #[test]
    fn agent_update_records_controls() {
        let s = scene();
        let p = root(&s, Vec3::new(100.0, 100.0, 21.0));
        assert!(p.handle_agent_update(AgentUpdate {
            control_flags: 0x4,
            body_rotation: Quat::from_rotation_z(1.0),
            flying: true,
        }));
        assert_eq!(p.control_flags(), 0x4);
    }
}
