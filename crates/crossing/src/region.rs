//! Region server: one scene with its transit controller and crossing
//! coordinator, plus the handlers other regions call.

use glam::Vec3;
use regionspace_common::{AvatarId, RegionHandle, TeleportFlags};
use regionspace_kernel::{
    AgentSnapshot, ArrivalKind, ClientView, ConnectionState, InitialRezRegistry, Scene, SceneEvent,
    ScenePresence, SceneServices, TransitStatus, now_ms,
};
use regionspace_transit::{
    AvatarTransitController, ChildAgentRequest, GridService, InterregionTransport,
    NeighborDirectory, Permissions, TransitController,
};
use regionspace_wire::ObjectPayload;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::Instrument;

use crate::config::{ConfigError, IncomingSettings, RegionConfig};
use crate::coordinator::{Collaborators, CrossingCoordinator};

/// Services a region server reaches other regions through.
#[derive(Clone)]
pub struct RegionLinks {
    pub transport: Arc<dyn InterregionTransport>,
    pub grid: Arc<dyn GridService>,
    pub neighbors: Arc<dyn NeighborDirectory>,
    pub permissions: Arc<dyn Permissions>,
}

pub struct RegionServer {
    scene: Arc<Scene>,
    controller: Arc<AvatarTransitController>,
    coordinator: CrossingCoordinator,
    transport: Arc<dyn InterregionTransport>,
    permissions: Arc<dyn Permissions>,
    incoming: IncomingSettings,
}

impl RegionServer {
    /// Build the scene described by `config` on top of `services`, wiring in
    /// a transit controller and an initial-rez registry of its own.
    pub fn new(
        config: &RegionConfig,
        services: SceneServices,
        links: RegionLinks,
        runtime: Handle,
    ) -> Result<Arc<Self>, ConfigError> {
        let descriptor = config.descriptor()?;
        let controller = Arc::new(AvatarTransitController::new(
            Arc::clone(&links.transport),
            config.transit_settings(),
        ));
        let services = services
            .with_transit(controller.clone())
            .with_initial_rez(Arc::new(InitialRezRegistry::new(config.initial_rez_ttl())));
        let scene = Scene::new(descriptor, config.scene.clone(), services);
        controller.bind_scene(&scene);

        let transit: Arc<dyn TransitController> = controller.clone();
        let coordinator = CrossingCoordinator::new(
            Arc::clone(&scene),
            Collaborators {
                transit,
                neighbors: links.neighbors,
                transport: Arc::clone(&links.transport),
                grid: links.grid,
                permissions: Arc::clone(&links.permissions),
            },
            runtime,
            config.crossing,
        );
        tracing::info!(region = %scene.descriptor().name, handle = %scene.handle(), "region server up");
        Ok(Arc::new(Self {
            scene,
            controller,
            coordinator,
            transport: links.transport,
            permissions: links.permissions,
            incoming: config.incoming,
        }))
    }

    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    pub fn handle(&self) -> RegionHandle {
        self.scene.handle()
    }

    pub fn controller(&self) -> &Arc<AvatarTransitController> {
        &self.controller
    }

    pub fn coordinator(&self) -> &CrossingCoordinator {
        &self.coordinator
    }

    /// Log an avatar straight into this region as root.
    pub fn login(
        &self,
        avatar: AvatarId,
        name: impl Into<String>,
        position: Vec3,
        client: Arc<dyn ClientView>,
    ) -> Arc<ScenePresence> {
        let presence = self.scene.add_presence(avatar, name, client);
        self.scene.services().initial_rez.mark(avatar);
        presence.set_connection(ConnectionState::Established);
        presence.make_root(&self.scene, position);
        self.rez_initial_attachments(&presence);
        presence
    }

    fn rez_initial_attachments(&self, presence: &ScenePresence) {
        if !self.scene.services().initial_rez.take(presence.id()) {
            return;
        }
        let attachments = presence.attachments();
        self.scene
            .services()
            .scripts
            .rez_attachments(presence.id(), &attachments);
        self.scene.record(SceneEvent::AttachmentsRezzed {
            avatar: presence.id(),
            count: attachments.len(),
        });
    }

    // ---- incoming ----

    /// Accept an object crossing in from another region.
    pub fn incoming_create_object(&self, payload: ObjectPayload) -> bool {
        let _span = tracing::info_span!(
            "incoming_create_object",
            region = %self.scene.descriptor().name,
            object = %payload.object.id,
            riders = payload.riders.len()
        )
        .entered();

        if let Err(reason) = self
            .permissions
            .authorize_incoming_object(&payload.object, &payload.riders)
        {
            tracing::info!(%reason, "incoming object denied");
            return false;
        }
        if !payload.is_attachment {
            let age_ms = now_ms().saturating_sub(payload.sent_at_ms);
            if age_ms > self.incoming.object_staleness_ms {
                tracing::warn!(age_ms, "incoming object took too long to arrive, refusing it");
                return false;
            }
        }

        let mut snapshot = payload.object;
        snapshot.position = payload.spawn_position;
        snapshot.is_attachment = payload.is_attachment;
        let object = match self.scene.add_object(&snapshot) {
            Ok(object) => object,
            Err(err) => {
                tracing::error!(error = %err, "could not add incoming object");
                return false;
            }
        };
        object.set_avatars_to_expect(payload.riders.len() as u32);
        object.mark_received(now_ms());
        self.scene.services().scripts.create_scripts(object.id());
        for rider in &payload.riders {
            if let Some(p) = self.scene.presence(*rider) {
                p.client().send_full_update(object.id());
            }
        }
        tracing::debug!(must_be_root = payload.must_be_root, "incoming object added");
        true
    }

    /// Set up a child presence ahead of an arrival.
    pub fn incoming_child_agent_create(
        &self,
        request: ChildAgentRequest,
        client: Arc<dyn ClientView>,
    ) -> Result<(), String> {
        let avatar = request.avatar;
        let presence = self.scene.add_presence(avatar, request.name, client);
        if presence.is_root() {
            tracing::warn!(%avatar, "child agent requested for an avatar already root here");
            return Err(format!("avatar {avatar} is already root in this region"));
        }
        if request.teleport_flags.contains(TeleportFlags::VIA_LOGIN) {
            self.scene.services().initial_rez.mark(avatar);
        }
        tracing::debug!(%avatar, source = %request.source, "child agent created");
        Ok(())
    }

    /// Load an agent snapshot into the matching child presence.
    pub fn incoming_child_agent_update(&self, snapshot: &AgentSnapshot) -> bool {
        let Some(presence) = self.scene.presence(snapshot.avatar) else {
            tracing::warn!(avatar = %snapshot.avatar, "update for unknown agent");
            return false;
        };
        if presence.is_root() {
            tracing::warn!(avatar = %snapshot.avatar, "refusing to overwrite a root agent");
            return false;
        }
        presence.copy_from_snapshot(snapshot);
        true
    }

    /// Demote a local root and hand back its snapshot.
    pub fn incoming_retrieve_root_agent(&self, avatar: AvatarId) -> Option<AgentSnapshot> {
        let presence = self.scene.presence(avatar)?;
        if !presence.is_root() {
            return None;
        }
        let snapshot = presence.copy_to_snapshot(self.scene.handle(), ArrivalKind::Teleport);
        presence.make_child(&self.scene, None);
        Some(snapshot)
    }

    /// The destination has taken `avatar` over.
    pub fn incoming_release_agent(&self, avatar: AvatarId) -> bool {
        self.controller.handle_release_agent(avatar)
    }

    /// Drop a presence. An avatar leaving through this region is kept.
    pub fn incoming_close_agent(&self, avatar: AvatarId) -> bool {
        if self.controller.avatar_is_in_transit(avatar) {
            tracing::warn!(%avatar, "not closing an agent that is in transit");
            return false;
        }
        self.scene.remove_presence(avatar).is_some()
    }

    /// The avatar's viewer has arrived: make it root and release it from the
    /// region it came from.
    pub async fn complete_agent_movement(&self, avatar: AvatarId) -> bool {
        let span = tracing::info_span!(
            "complete_agent_movement",
            region = %self.scene.descriptor().name,
            %avatar
        );
        async {
            let Some(presence) = self.scene.presence(avatar) else {
                tracing::warn!("no presence for arriving agent");
                return false;
            };
            if presence.is_root() {
                return true;
            }
            presence.set_connection(ConnectionState::Established);
            let position = presence.authority().get(false, false);
            presence.make_root(&self.scene, position);
            self.rez_initial_attachments(&presence);

            let source = presence.source_region();
            let uri = presence.callback_uri();
            presence.set_callback_uri(None);
            match (source, uri) {
                (Some(source), Some(uri)) => {
                    let released = self.transport.send_release_agent(source, avatar, &uri).await;
                    if !released {
                        tracing::warn!(%source, "source region did not acknowledge release");
                    }
                    released
                }
                _ => true,
            }
        }
        .instrument(span)
        .await
    }

    // ---- frame ----

    /// One frame of region work.
    pub fn tick(&self, dt: f32) {
        self.scene.step_physics(dt);
        for (avatar, result) in self.coordinator.reap_finished() {
            let Err(err) = result else {
                continue;
            };
            tracing::debug!(%avatar, error = %err, "walking crossing failed");
            if let Some(p) = self.scene.presence(avatar) {
                if p.is_root() {
                    p.force_position_in_region();
                }
            }
        }
        self.coordinator.check_avatar_borders();
        self.coordinator.check_object_borders();
        self.scene
            .services()
            .initial_rez
            .purge_expired(Instant::now());
    }

    /// Wait out walking crossings and stand everyone up.
    pub fn shutdown(&self) {
        let _span = tracing::info_span!("shutdown", region = %self.scene.descriptor().name).entered();
        let joined = self.coordinator.join_walking();
        let stood = self.scene.stand_up_all();
        tracing::info!(walking = joined.len(), stood, "region shut down");
    }
}

impl std::fmt::Debug for RegionServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionServer")
            .field("scene", &self.scene)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}
