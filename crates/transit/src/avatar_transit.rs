//! In-process transit controller.
//!
//! A transit runs in two stages. `Begin` checks the avatar may leave and,
//! for a rider, waits until its object exists at the destination.
//! `SendAvatar` establishes a child presence there, hands over the agent
//! snapshot, demotes the local presence and waits for the destination to
//! release it. Each completed step pushes an undo action; on failure the
//! actions run newest first.

use futures::FutureExt;
use glam::Vec3;
use regionspace_common::region::{force_valid_region_xy, force_valid_region_xyz, is_valid_region_xy};
use regionspace_common::{AvatarId, RegionDescriptor, RegionHandle, TeleportFlags};
use regionspace_kernel::{
    ArrivalKind, RemotePresenceState, Scene, SceneEvent, ScenePresence, TransitStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::Instrument;

use crate::args::{RideOn, TransitArguments, TransitKind};
use crate::collaborators::{ChildAgentRequest, ChildAgentUpdateResponse, InterregionTransport};
use crate::controller::{TransitController, TransitTask};
use crate::error::TransitError;

/// How long a rider waits for its object to be created remotely.
pub const REZ_OBJECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a departing avatar waits for the destination to release it.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitStage {
    SendBegin,
    SendEstablishChildPresence,
    SendAvatarHandoff,
    SendCompletedSuccess,
    SendError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitEvent {
    pub avatar: AvatarId,
    pub stage: TransitStage,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitSettings {
    pub release_timeout: Duration,
    pub object_result_timeout: Duration,
}

impl Default for TransitSettings {
    fn default() -> Self {
        Self {
            release_timeout: RELEASE_TIMEOUT,
            object_result_timeout: REZ_OBJECT_TIMEOUT,
        }
    }
}

struct TransitEntry {
    ride_on: Option<RideOn>,
    object_tx: Option<oneshot::Sender<bool>>,
    release_tx: Option<oneshot::Sender<()>>,
}

enum Rollback {
    BounceBack { position: Vec3, back_velocity: Vec3 },
    DropRemotePresence(RegionHandle),
    RestoreAttachments,
    MakeRoot(Vec3),
}

struct Shared {
    scene: OnceLock<Weak<Scene>>,
    transport: Arc<dyn InterregionTransport>,
    settings: TransitSettings,
    registry: Mutex<HashMap<AvatarId, TransitEntry>>,
    /// Last failure logged, so a repeating failure is logged once.
    last_error: Mutex<Option<(AvatarId, String)>>,
    events: Mutex<Vec<TransitEvent>>,
}

pub struct AvatarTransitController {
    shared: Arc<Shared>,
}

impl AvatarTransitController {
    pub fn new(transport: Arc<dyn InterregionTransport>, settings: TransitSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                scene: OnceLock::new(),
                transport,
                settings,
                registry: Mutex::new(HashMap::new()),
                last_error: Mutex::new(None),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Attach the scene this controller moves avatars out of. Only the
    /// first binding takes effect.
    pub fn bind_scene(&self, scene: &Arc<Scene>) -> bool {
        self.shared.scene.set(Arc::downgrade(scene)).is_ok()
    }

    pub fn settings(&self) -> TransitSettings {
        self.shared.settings
    }

    pub fn in_transit_count(&self) -> usize {
        self.shared.registry().len()
    }

    pub fn drain_events(&self) -> Vec<TransitEvent> {
        std::mem::take(&mut *lock(&self.shared.events))
    }

    pub fn events(&self) -> Vec<TransitEvent> {
        lock(&self.shared.events).clone()
    }
}

impl std::fmt::Debug for AvatarTransitController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarTransitController")
            .field("in_transit", &self.in_transit_count())
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

impl TransitStatus for AvatarTransitController {
    fn avatar_is_in_transit(&self, avatar: AvatarId) -> bool {
        self.shared.registry().contains_key(&avatar)
    }

    fn avatar_is_in_transit_on_prim(&self, avatar: AvatarId) -> bool {
        self.shared
            .registry()
            .get(&avatar)
            .is_some_and(|e| e.ride_on.is_some())
    }
}

impl TransitController for AvatarTransitController {
    fn try_begin_transit(&self, args: TransitArguments) -> TransitTask {
        let avatar = args.avatar;
        let (object_rx, release_rx) = {
            let mut registry = self.shared.registry();
            if registry.contains_key(&avatar) {
                tracing::warn!(%avatar, "avatar is already in transit");
                return futures::future::ready(Err(TransitError::AlreadyInTransit(avatar))).boxed();
            }
            let (release_tx, release_rx) = oneshot::channel();
            let (object_tx, object_rx) = match args.ride_on {
                Some(_) => {
                    let (tx, rx) = oneshot::channel();
                    (Some(tx), Some(rx))
                }
                None => (None, None),
            };
            registry.insert(
                avatar,
                TransitEntry {
                    ride_on: args.ride_on,
                    object_tx,
                    release_tx: Some(release_tx),
                },
            );
            (object_rx, release_rx)
        };

        let span = tracing::info_span!(
            "transit",
            %avatar,
            kind = ?args.kind,
            destination = %args.destination.name
        );
        let shared = Arc::clone(&self.shared);
        async move {
            let result = shared.run(&args, object_rx, release_rx).await;
            shared.registry().remove(&avatar);
            result
        }
        .instrument(span)
        .boxed()
    }

    fn handle_object_send_result(&self, avatar: AvatarId, success: bool) {
        let tx = self
            .shared
            .registry()
            .get_mut(&avatar)
            .and_then(|e| e.object_tx.take());
        if let Some(tx) = tx {
            let _ = tx.send(success);
        }
    }

    fn handle_release_agent(&self, avatar: AvatarId) -> bool {
        let mut registry = self.shared.registry();
        let Some(entry) = registry.get_mut(&avatar) else {
            return false;
        };
        if let Some(tx) = entry.release_tx.take() {
            let _ = tx.send(());
        }
        true
    }
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<AvatarId, TransitEntry>> {
        lock(&self.registry)
    }

    fn scene(&self) -> Option<Arc<Scene>> {
        self.scene.get().and_then(Weak::upgrade)
    }

    fn stage(&self, avatar: AvatarId, stage: TransitStage) {
        tracing::debug!(%avatar, ?stage, "transit stage");
        lock(&self.events).push(TransitEvent { avatar, stage });
    }

    async fn run(
        &self,
        args: &TransitArguments,
        object_rx: Option<oneshot::Receiver<bool>>,
        release_rx: oneshot::Receiver<()>,
    ) -> Result<(), TransitError> {
        let scene = self.scene().ok_or(TransitError::SceneGone)?;
        let presence = scene
            .presence(args.avatar)
            .ok_or(TransitError::UnknownAvatar(args.avatar))?;

        let mut rollback = Vec::new();
        let mut outcome = self.begin(&presence, args, object_rx, &mut rollback).await;
        if outcome.is_ok() {
            outcome = self
                .send_avatar(&scene, &presence, args, release_rx, &mut rollback)
                .await;
        }

        match outcome {
            Ok(()) => {
                self.stage(args.avatar, TransitStage::SendCompletedSuccess);
                tracing::info!("avatar handed off");
                Ok(())
            }
            Err(err) => {
                self.log_failure(args.avatar, &err);
                while let Some(action) = rollback.pop() {
                    self.undo(&scene, &presence, action).await;
                }
                self.stage(args.avatar, TransitStage::SendError);
                Err(err)
            }
        }
    }

    async fn begin(
        &self,
        presence: &ScenePresence,
        args: &TransitArguments,
        object_rx: Option<oneshot::Receiver<bool>>,
        rollback: &mut Vec<Rollback>,
    ) -> Result<(), TransitError> {
        let avatar = args.avatar;
        if args.kind == TransitKind::OutboundCrossing && args.ride_on.is_none() {
            rollback.push(Rollback::BounceBack {
                position: presence.authority().get(false, false),
                back_velocity: -presence.authority().velocity(),
            });
        }

        let not_ready = |reason: &str| TransitError::NotReady {
            avatar,
            reason: reason.to_string(),
        };
        if !presence.connection_established() {
            return Err(not_ready("connection is not established"));
        }
        if !presence.can_exit_region() {
            return Err(not_ready("not yet established in the current region"));
        }
        if presence.has_establishing_connections() {
            return Err(not_ready("connections are still being established"));
        }

        if args.ride_on.is_some() {
            let created = match object_rx {
                Some(rx) => matches!(
                    timeout(self.settings.object_result_timeout, rx).await,
                    Ok(Ok(true))
                ),
                None => false,
            };
            if !created {
                presence
                    .client()
                    .send_alert(&TransitError::ObjectCreationFailed.to_string());
                return Err(TransitError::ObjectCreationFailed);
            }
        }

        self.stage(avatar, TransitStage::SendBegin);
        Ok(())
    }

    async fn send_avatar(
        &self,
        scene: &Arc<Scene>,
        presence: &ScenePresence,
        args: &TransitArguments,
        release_rx: oneshot::Receiver<()>,
        rollback: &mut Vec<Rollback>,
    ) -> Result<(), TransitError> {
        let avatar = args.avatar;
        let destination = args.destination.handle;

        self.stage(avatar, TransitStage::SendEstablishChildPresence);
        if !presence.has_remote_presence(destination) {
            presence.set_remote_state(destination, RemotePresenceState::Establishing);
            let request = ChildAgentRequest {
                avatar,
                name: presence.name().to_string(),
                source: scene.handle(),
                teleport_flags: args.teleport_flags,
            };
            if let Err(reason) = self.transport.create_child_agent(destination, request).await {
                presence.drop_remote(destination);
                let err = TransitError::PresenceFailed(reason);
                // a teleport reports its own failure to the viewer
                if args.kind == TransitKind::OutboundCrossing {
                    presence.client().send_alert(&err.to_string());
                }
                return Err(err);
            }
            presence.set_remote_state(destination, RemotePresenceState::Established);
            rollback.push(Rollback::DropRemotePresence(destination));
        }

        self.stage(avatar, TransitStage::SendAvatarHandoff);
        presence.start_attachment_transit();
        rollback.push(Rollback::RestoreAttachments);

        let arrival = match args.kind {
            TransitKind::OutboundCrossing => ArrivalKind::Crossing,
            TransitKind::OutboundTeleport => ArrivalKind::Teleport,
        };
        let mut snapshot = presence.copy_to_snapshot(scene.handle(), arrival);
        if args.ride_on.is_none() {
            snapshot.position = args.position;
            snapshot.seat = None;
        }
        if args.teleport_flags.contains(TeleportFlags::IS_FLYING) {
            snapshot.flying = true;
        }
        snapshot.callback_uri = Some(release_uri(scene.descriptor(), avatar));

        match self.transport.update_child_agent(destination, &snapshot).await {
            ChildAgentUpdateResponse::Ok => {}
            ChildAgentUpdateResponse::AccessDenied => return Err(TransitError::AccessDenied),
            ChildAgentUpdateResponse::MethodNotAvailable => {
                return Err(TransitError::MethodNotAvailable);
            }
            ChildAgentUpdateResponse::Error(reason) => return Err(TransitError::Remote(reason)),
        }

        presence.make_child(scene, Some(destination));
        let restore = force_valid_region_xy(presence.authority().restore_position());
        rollback.push(Rollback::MakeRoot(restore));

        if !self
            .transport
            .queue_client_transfer(destination, avatar, args.kind, args.position)
            .await
        {
            return Err(TransitError::ClientTransferFailed);
        }

        match timeout(self.settings.release_timeout, release_rx).await {
            Ok(Ok(())) => {}
            _ => return Err(TransitError::ReleaseTimeout),
        }

        presence.end_attachment_transit(true);
        if args.ride_on.is_some() {
            scene.remove_seated_avatar(avatar);
        }
        presence.reset_animations();
        scene.record(SceneEvent::AvatarLeaving { avatar });
        Ok(())
    }

    async fn undo(&self, scene: &Scene, presence: &ScenePresence, action: Rollback) {
        match action {
            Rollback::MakeRoot(restore) => {
                scene.remove_seated_avatar(presence.id());
                presence.make_root(scene, restore);
            }
            Rollback::RestoreAttachments => presence.end_attachment_transit(false),
            Rollback::DropRemotePresence(region) => {
                presence.drop_remote(region);
                if !self.transport.close_child_agent(region, presence.id()).await {
                    tracing::warn!(avatar = %presence.id(), %region, "remote presence did not close");
                }
            }
            Rollback::BounceBack {
                position,
                back_velocity,
            } => {
                let mut back = position + back_velocity * 2.0;
                if !is_valid_region_xy(back) {
                    back = position;
                }
                let back = force_valid_region_xyz(back);
                let velocity = presence.authority().velocity();
                let _ = presence
                    .authority()
                    .set(None, true, back, None, Vec3::ZERO, velocity);
            }
        }
    }

    fn log_failure(&self, avatar: AvatarId, err: &TransitError) {
        let message = err.to_string();
        let mut last = lock(&self.last_error);
        if last.as_ref().is_some_and(|(a, m)| *a == avatar && *m == message) {
            tracing::debug!(%avatar, error = %err, "transit failed again");
            return;
        }
        tracing::error!(%avatar, error = %err, "error while sending avatar");
        *last = Some((avatar, message));
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Address the destination calls to release `avatar` from this region.
pub fn release_uri(region: &RegionDescriptor, avatar: AvatarId) -> String {
    format!("{}/agent/{}/{}/release/", region.uri, avatar, region.handle.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use regionspace_common::ObjectId;
    use regionspace_kernel::{
        AgentSnapshot, ClientLog, ClientMessage, ConnectionState, ObjectSnapshot, SceneConfig,
        SceneServices,
    };

    /// Transport that answers from fixed settings and records what it saw.
    #[derive(Default)]
    struct FakeTransport {
        controller: OnceLock<Weak<AvatarTransitController>>,
        release_on_transfer: bool,
        deny_update: bool,
        refuse_child: bool,
        updates: Mutex<Vec<AgentSnapshot>>,
        closed: Mutex<Vec<AvatarId>>,
    }

    #[async_trait]
    impl InterregionTransport for FakeTransport {
        fn send_create_object(
            &self,
            _destination: RegionHandle,
            _object: &ObjectSnapshot,
            _riders: &[AvatarId],
            _must_be_root: bool,
            _target_position: Vec3,
            _is_attachment: bool,
        ) -> bool {
            true
        }

        async fn send_release_agent(&self, _destination: RegionHandle, _avatar: AvatarId, _uri: &str) -> bool {
            true
        }

        async fn create_child_agent(&self, _destination: RegionHandle, _request: ChildAgentRequest) -> Result<(), String> {
            if self.refuse_child {
                Err("region is full".into())
            } else {
                Ok(())
            }
        }

        async fn update_child_agent(&self, _destination: RegionHandle, snapshot: &AgentSnapshot) -> ChildAgentUpdateResponse {
            lock(&self.updates).push(snapshot.clone());
            if self.deny_update {
                ChildAgentUpdateResponse::AccessDenied
            } else {
                ChildAgentUpdateResponse::Ok
            }
        }

        async fn close_child_agent(&self, _destination: RegionHandle, avatar: AvatarId) -> bool {
            lock(&self.closed).push(avatar);
            true
        }

        async fn queue_client_transfer(
            &self,
            _destination: RegionHandle,
            avatar: AvatarId,
            _kind: TransitKind,
            _position: Vec3,
        ) -> bool {
            if self.release_on_transfer {
                if let Some(controller) = self.controller.get().and_then(Weak::upgrade) {
                    controller.handle_release_agent(avatar);
                }
            }
            true
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn setup(transport: FakeTransport, settings: TransitSettings) -> (Arc<Scene>, Arc<AvatarTransitController>, Arc<FakeTransport>) {
        let transport = Arc::new(transport);
        let controller = Arc::new(AvatarTransitController::new(transport.clone(), settings));
        let _ = transport.controller.set(Arc::downgrade(&controller));
        let services = SceneServices::standalone().with_transit(controller.clone());
        let scene = Scene::new(RegionDescriptor::new("alpha", 1000, 1000).unwrap(), SceneConfig::default(), services);
        assert!(controller.bind_scene(&scene));
        (scene, controller, transport)
    }

    fn walker(scene: &Arc<Scene>, pos: Vec3) -> (Arc<ScenePresence>, Arc<ClientLog>) {
        let client = Arc::new(ClientLog::new());
        let p = scene.add_presence(AvatarId::new(), "walker", client.clone());
        p.set_connection(ConnectionState::Established);
        p.make_root(scene, pos);
        (p, client)
    }

    fn east() -> RegionDescriptor {
        RegionDescriptor::new("beta", 1001, 1000).unwrap()
    }

    fn stages(controller: &AvatarTransitController) -> Vec<TransitStage> {
        controller.events().into_iter().map(|e| e.stage).collect()
    }

    #[test]
    fn walking_crossing_hands_off() {
        let rt = runtime();
        let (scene, controller, transport) = setup(
            FakeTransport {
                release_on_transfer: true,
                ..Default::default()
            },
            TransitSettings::default(),
        );
        let (p, _) = walker(&scene, Vec3::new(255.5, 100.0, 25.0));

        let task = controller.try_begin_transit(TransitArguments::crossing(p.id(), east(), Vec3::new(0.5, 100.0, 25.0)));
        assert!(controller.avatar_is_in_transit(p.id()));
        assert!(!controller.avatar_is_in_transit_on_prim(p.id()));

        rt.block_on(task).unwrap();
        assert!(p.is_child());
        assert!(!controller.avatar_is_in_transit(p.id()));
        assert!(p.has_remote_presence(east().handle));
        assert_eq!(
            stages(&controller),
            vec![
                TransitStage::SendBegin,
                TransitStage::SendEstablishChildPresence,
                TransitStage::SendAvatarHandoff,
                TransitStage::SendCompletedSuccess,
            ]
        );
        let updates = lock(&transport.updates);
        assert_eq!(updates[0].position, Vec3::new(0.5, 100.0, 25.0));
        assert_eq!(updates[0].arrival, ArrivalKind::Crossing);
        assert!(updates[0].callback_uri.as_deref().is_some_and(|u| u.ends_with("/release/")));
        assert!(scene.events().contains(&SceneEvent::AvatarLeaving { avatar: p.id() }));
    }

    #[test]
    fn second_begin_for_same_avatar_fails() {
        let rt = runtime();
        let (scene, controller, _) = setup(
            FakeTransport {
                release_on_transfer: true,
                ..Default::default()
            },
            TransitSettings::default(),
        );
        let (p, _) = walker(&scene, Vec3::new(100.0, 100.0, 25.0));
        let args = TransitArguments::teleport(p.id(), east(), Vec3::new(10.0, 10.0, 30.0), TeleportFlags::VIA_LOCATION);

        let first = controller.try_begin_transit(args.clone());
        let second = controller.try_begin_transit(args);
        assert_eq!(rt.block_on(second), Err(TransitError::AlreadyInTransit(p.id())));
        rt.block_on(first).unwrap();
        assert_eq!(controller.in_transit_count(), 0);
    }

    #[test]
    fn unready_walker_bounces_back() {
        let rt = runtime();
        let (scene, controller, _) = setup(FakeTransport::default(), TransitSettings::default());
        let (p, _) = walker(&scene, Vec3::new(250.0, 100.0, 25.0));
        p.authority().set_velocity(Vec3::new(5.0, 0.0, 0.0));
        p.set_connection(ConnectionState::Connecting);

        let err = rt
            .block_on(controller.try_begin_transit(TransitArguments::crossing(p.id(), east(), Vec3::new(0.5, 100.0, 25.0))))
            .unwrap_err();
        assert!(matches!(err, TransitError::NotReady { .. }));
        assert!(p.is_root());
        assert_eq!(p.authority().get(false, false), Vec3::new(240.0, 100.0, 25.0));
        assert_eq!(stages(&controller), vec![TransitStage::SendError]);
        assert!(!controller.avatar_is_in_transit(p.id()));
    }

    #[test]
    fn release_timeout_rolls_everything_back() {
        let rt = runtime();
        let (scene, controller, transport) = setup(
            FakeTransport::default(),
            TransitSettings {
                release_timeout: Duration::from_millis(50),
                ..TransitSettings::default()
            },
        );
        let (p, _) = walker(&scene, Vec3::new(200.0, 100.0, 25.0));
        let hat = ObjectId::new();
        p.add_attachment(hat);

        let err = rt
            .block_on(controller.try_begin_transit(TransitArguments::teleport(
                p.id(),
                east(),
                Vec3::new(10.0, 10.0, 30.0),
                TeleportFlags::VIA_LOCATION,
            )))
            .unwrap_err();
        assert_eq!(err, TransitError::ReleaseTimeout);
        assert!(p.is_root());
        assert_eq!(p.authority().get(false, false), Vec3::new(200.0, 100.0, 25.0));
        assert!(p.authority().has_physics_actor());
        assert_eq!(p.attachments(), vec![hat]);
        assert!(!p.attachments_in_transit());
        assert!(!p.has_remote_presence(east().handle));
        assert_eq!(*lock(&transport.closed), vec![p.id()]);
    }

    #[test]
    fn denied_update_leaves_avatar_root() {
        let rt = runtime();
        let (scene, controller, _) = setup(
            FakeTransport {
                deny_update: true,
                ..Default::default()
            },
            TransitSettings::default(),
        );
        let (p, _) = walker(&scene, Vec3::new(120.0, 100.0, 25.0));
        let err = rt
            .block_on(controller.try_begin_transit(TransitArguments::teleport(
                p.id(),
                east(),
                Vec3::new(10.0, 10.0, 30.0),
                TeleportFlags::NONE,
            )))
            .unwrap_err();
        assert_eq!(err, TransitError::AccessDenied);
        assert!(p.is_root());
        assert!(scene
            .events()
            .iter()
            .all(|e| !matches!(e, SceneEvent::MadeChild { .. })));
    }

    #[test]
    fn rider_waits_for_object_result() {
        let rt = runtime();
        let (scene, controller, _) = setup(
            FakeTransport {
                release_on_transfer: true,
                ..Default::default()
            },
            TransitSettings::default(),
        );
        let cart = scene
            .add_object(&ObjectSnapshot::single_part(AvatarId::new(), "cart", Vec3::new(250.0, 50.0, 21.0)))
            .unwrap();
        let (p, client) = walker(&scene, Vec3::new(249.0, 50.0, 21.0));
        p.sit(&scene, cart.id(), cart.root_part_id()).unwrap();

        let ride = RideOn {
            object: cart.id(),
            part: cart.root_part_id(),
        };
        let task = controller.try_begin_transit(TransitArguments::crossing(p.id(), east(), Vec3::new(0.5, 50.0, 21.0)).riding(ride));
        assert!(controller.avatar_is_in_transit_on_prim(p.id()));
        controller.handle_object_send_result(p.id(), false);

        assert_eq!(rt.block_on(task), Err(TransitError::ObjectCreationFailed));
        assert!(p.authority().is_seated());
        assert!(client
            .messages()
            .contains(&ClientMessage::Alert("Unable to create object in remote region".into())));
    }

    #[test]
    fn refused_child_presence_alerts_only_on_crossing() {
        let rt = runtime();
        let (scene, controller, _) = setup(
            FakeTransport {
                refuse_child: true,
                ..Default::default()
            },
            TransitSettings::default(),
        );
        let (p, client) = walker(&scene, Vec3::new(120.0, 100.0, 25.0));

        let err = rt
            .block_on(controller.try_begin_transit(TransitArguments::teleport(
                p.id(),
                east(),
                Vec3::new(10.0, 10.0, 30.0),
                TeleportFlags::VIA_LOCATION,
            )))
            .unwrap_err();
        assert_eq!(err, TransitError::PresenceFailed("region is full".into()));
        assert!(client.messages().is_empty());
        assert!(p.is_root());
        assert!(!p.has_remote_presence(east().handle));

        let err = rt
            .block_on(controller.try_begin_transit(TransitArguments::crossing(p.id(), east(), Vec3::new(0.5, 100.0, 25.0))))
            .unwrap_err();
        assert_eq!(err, TransitError::PresenceFailed("region is full".into()));
        assert_eq!(client.messages(), vec![ClientMessage::Alert(err.to_string())]);
    }
}
