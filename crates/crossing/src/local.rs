//! In-process grid: region servers in one process, reaching each other
//! through encoded wire payloads.
//!
//! The grid holds regions weakly; whoever creates a region keeps it alive.
//! A viewer is simulated per avatar: when a handoff queues a client
//! transfer, the destination completes the arrival on the runtime.

use async_trait::async_trait;
use glam::Vec3;
use regionspace_common::{AvatarId, RegionDescriptor, RegionHandle};
use regionspace_kernel::{
    AgentSnapshot, ClientLog, ClientView, ObjectSnapshot, Parcel, SceneServices, now_ms,
};
use regionspace_transit::{
    ChildAgentRequest, ChildAgentUpdateResponse, EstateSettings, GridService, InterregionTransport,
    OpenPermissions, Permissions, StaticNeighborDirectory, Telehub, TransitKind,
};
use regionspace_wire::{ObjectPayload, decode_agent, decode_object, encode_agent, encode_object};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::runtime::Handle;

use crate::config::RegionConfig;
use crate::region::{RegionLinks, RegionServer};

struct GridEntry {
    server: Weak<RegionServer>,
    neighbors: Arc<StaticNeighborDirectory>,
}

pub struct LocalGrid {
    self_ref: Weak<LocalGrid>,
    runtime: Handle,
    regions: RwLock<BTreeMap<RegionHandle, GridEntry>>,
    estates: RwLock<BTreeMap<RegionHandle, EstateSettings>>,
    telehubs: RwLock<BTreeMap<RegionHandle, Telehub>>,
    clients: Mutex<HashMap<AvatarId, Arc<dyn ClientView>>>,
    /// Whether simulated viewers follow client transfers.
    viewers_follow: AtomicBool,
}

impl LocalGrid {
    pub fn new(runtime: Handle) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            runtime,
            regions: RwLock::new(BTreeMap::new()),
            estates: RwLock::new(BTreeMap::new()),
            telehubs: RwLock::new(BTreeMap::new()),
            clients: Mutex::new(HashMap::new()),
            viewers_follow: AtomicBool::new(true),
        })
    }

    /// Start a region with standalone services and open permissions.
    pub fn add_region(&self, config: &RegionConfig) -> Option<Arc<RegionServer>> {
        self.add_region_with(config, SceneServices::standalone(), Arc::new(OpenPermissions))
    }

    /// Start a region and link it with the regions already adjacent to it.
    /// Returns `None` if the location is taken, off the grid, or the grid is
    /// gone.
    pub fn add_region_with(
        &self,
        config: &RegionConfig,
        services: SceneServices,
        permissions: Arc<dyn Permissions>,
    ) -> Option<Arc<RegionServer>> {
        let grid = self.self_ref.upgrade()?;
        let descriptor = match config.descriptor() {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::warn!(region = %config.region.name, error = %err, "region not added");
                return None;
            }
        };
        if self.server(descriptor.handle).is_some() {
            tracing::warn!(region = %descriptor.name, handle = %descriptor.handle, "grid location already taken");
            return None;
        }

        let neighbors = Arc::new(StaticNeighborDirectory::new());
        let server = RegionServer::new(
            config,
            services,
            RegionLinks {
                transport: grid.clone(),
                grid,
                neighbors: neighbors.clone(),
                permissions,
            },
            self.runtime.clone(),
        )
        .ok()?;

        let mut regions = self.write_regions();
        for (handle, entry) in regions.iter() {
            let Some(other) = entry.server.upgrade() else {
                continue;
            };
            if is_adjacent(*handle, descriptor.handle) {
                neighbors.insert(other.scene().descriptor().clone());
                entry.neighbors.insert(descriptor.clone());
            }
        }
        regions.insert(
            descriptor.handle,
            GridEntry {
                server: Arc::downgrade(&server),
                neighbors,
            },
        );
        drop(regions);
        self.estates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(descriptor.handle)
            .or_insert_with(|| EstateSettings {
                allow_direct_teleport: true,
                ..EstateSettings::default()
            });
        tracing::info!(region = %descriptor.name, handle = %descriptor.handle, "region joined grid");
        Some(server)
    }

    /// Take a region off the grid and out of its neighbours' tables.
    pub fn remove_region(&self, handle: RegionHandle) -> bool {
        let mut regions = self.write_regions();
        if regions.remove(&handle).is_none() {
            return false;
        }
        for entry in regions.values() {
            entry.neighbors.remove(handle);
        }
        true
    }

    pub fn server(&self, handle: RegionHandle) -> Option<Arc<RegionServer>> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .and_then(|e| e.server.upgrade())
    }

    pub fn region_count(&self) -> usize {
        self.regions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn set_estate(&self, region: RegionHandle, estate: EstateSettings) {
        self.estates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region, estate);
    }

    pub fn set_telehub(&self, region: RegionHandle, telehub: Telehub) {
        self.telehubs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region, telehub);
    }

    /// Let simulated viewers follow client transfers, or leave them stuck.
    pub fn set_viewers_follow(&self, follow: bool) {
        self.viewers_follow.store(follow, Ordering::Relaxed);
    }

    /// The viewer `avatar` uses in every region.
    pub fn connect_client(&self, avatar: AvatarId, client: Arc<dyn ClientView>) {
        self.clients().insert(avatar, client);
    }

    pub fn client_for(&self, avatar: AvatarId) -> Arc<dyn ClientView> {
        Arc::clone(
            self.clients()
                .entry(avatar)
                .or_insert_with(|| Arc::new(ClientLog::new())),
        )
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<AvatarId, Arc<dyn ClientView>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_regions(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<RegionHandle, GridEntry>> {
        self.regions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LocalGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGrid")
            .field("regions", &self.region_count())
            .finish_non_exhaustive()
    }
}

/// Whether two distinct regions touch, diagonals included.
fn is_adjacent(a: RegionHandle, b: RegionHandle) -> bool {
    let (ax, ay) = a.to_location();
    let (bx, by) = b.to_location();
    a != b && ax.abs_diff(bx) <= 1 && ay.abs_diff(by) <= 1
}

#[async_trait]
impl InterregionTransport for LocalGrid {
    fn send_create_object(
        &self,
        destination: RegionHandle,
        object: &ObjectSnapshot,
        riders: &[AvatarId],
        must_be_root: bool,
        target_position: Vec3,
        is_attachment: bool,
    ) -> bool {
        let Some(server) = self.server(destination) else {
            tracing::warn!(%destination, "no region to send object to");
            return false;
        };
        let payload = ObjectPayload {
            object: object.clone(),
            riders: riders.to_vec(),
            spawn_position: target_position,
            must_be_root,
            is_attachment,
            sent_at_ms: now_ms(),
        };
        let decoded = encode_object(&payload).and_then(|bytes| decode_object(&bytes));
        match decoded {
            Ok(payload) => server.incoming_create_object(payload),
            Err(err) => {
                tracing::error!(error = %err, "object payload did not survive the wire");
                false
            }
        }
    }

    async fn send_release_agent(&self, destination: RegionHandle, avatar: AvatarId, uri: &str) -> bool {
        let Some(server) = self.server(destination) else {
            return false;
        };
        tracing::debug!(%avatar, uri, "releasing agent");
        server.incoming_release_agent(avatar)
    }

    async fn create_child_agent(
        &self,
        destination: RegionHandle,
        request: ChildAgentRequest,
    ) -> Result<(), String> {
        let server = self
            .server(destination)
            .ok_or_else(|| format!("region {destination} is not on the grid"))?;
        let client = self.client_for(request.avatar);
        server.incoming_child_agent_create(request, client)
    }

    async fn update_child_agent(
        &self,
        destination: RegionHandle,
        snapshot: &AgentSnapshot,
    ) -> ChildAgentUpdateResponse {
        let Some(server) = self.server(destination) else {
            return ChildAgentUpdateResponse::Error(format!("region {destination} is not on the grid"));
        };
        match encode_agent(snapshot).and_then(|bytes| decode_agent(&bytes)) {
            Ok(snapshot) if server.incoming_child_agent_update(&snapshot) => ChildAgentUpdateResponse::Ok,
            Ok(_) => ChildAgentUpdateResponse::Error("destination refused agent update".into()),
            Err(err) => ChildAgentUpdateResponse::Error(err.to_string()),
        }
    }

    async fn close_child_agent(&self, destination: RegionHandle, avatar: AvatarId) -> bool {
        self.server(destination)
            .is_some_and(|server| server.incoming_close_agent(avatar))
    }

    async fn queue_client_transfer(
        &self,
        destination: RegionHandle,
        avatar: AvatarId,
        kind: TransitKind,
        position: Vec3,
    ) -> bool {
        let Some(server) = self.server(destination) else {
            return false;
        };
        tracing::debug!(%avatar, ?kind, ?position, "client transfer queued");
        if self.viewers_follow.load(Ordering::Relaxed) {
            self.runtime.spawn(async move {
                server.complete_agent_movement(avatar).await;
            });
        }
        true
    }
}

impl GridService for LocalGrid {
    fn land_data(&self, region: RegionHandle, x: f32, y: f32) -> Option<Parcel> {
        self.server(region)?.scene().services().land.parcel_at(x, y)
    }

    fn region_by_handle(&self, region: RegionHandle) -> Option<RegionDescriptor> {
        self.server(region).map(|s| s.scene().descriptor().clone())
    }

    fn estate_settings(&self, region: RegionHandle) -> Option<EstateSettings> {
        self.estates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&region)
            .cloned()
    }

    fn telehub(&self, region: RegionHandle) -> Option<Telehub> {
        self.telehubs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&region)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn adjacency_includes_diagonals() {
        let here = RegionHandle::from_location(1000, 1000).unwrap();
        assert!(is_adjacent(here, RegionHandle::from_location(1001, 1001).unwrap()));
        assert!(is_adjacent(here, RegionHandle::from_location(999, 1000).unwrap()));
        assert!(!is_adjacent(here, here));
        assert!(!is_adjacent(here, RegionHandle::from_location(1002, 1000).unwrap()));
    }

    #[test]
    fn regions_link_as_neighbours() {
        let rt = runtime();
        let grid = LocalGrid::new(rt.handle().clone());
        let west = grid.add_region(&RegionConfig::named("west", 1000, 1000)).unwrap();
        let east = grid.add_region(&RegionConfig::named("east", 1001, 1000)).unwrap();
        assert!(grid.add_region(&RegionConfig::named("again", 1001, 1000)).is_none());
        assert!(grid.add_region(&RegionConfig::named("far", 1 << 24, 1000)).is_none());
        assert_eq!(grid.region_count(), 2);

        assert_eq!(grid.region_by_handle(east.handle()).map(|d| d.name), Some("east".into()));
        assert!(grid.estate_settings(west.handle()).is_some_and(|e| e.allow_direct_teleport));
        assert_eq!(grid.land_data(west.handle(), 10.0, 10.0).map(|p| p.id), Some(1));
        assert!(grid.land_data(west.handle(), 300.0, 10.0).is_none());

        assert!(grid.remove_region(east.handle()));
        assert!(grid.region_by_handle(east.handle()).is_none());
    }

    #[test]
    fn dropped_region_leaves_grid_lookups() {
        let rt = runtime();
        let grid = LocalGrid::new(rt.handle().clone());
        let handle = {
            let region = grid.add_region(&RegionConfig::named("brief", 1000, 1000)).unwrap();
            region.handle()
        };
        assert!(grid.server(handle).is_none());
        assert!(grid.region_by_handle(handle).is_none());
    }

    #[test]
    fn client_for_is_stable_per_avatar() {
        let rt = runtime();
        let grid = LocalGrid::new(rt.handle().clone());
        let avatar = AvatarId::new();
        let first = grid.client_for(avatar);
        let second = grid.client_for(avatar);
        assert!(Arc::ptr_eq(&first, &second));
    }
}
