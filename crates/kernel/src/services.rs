//! Capabilities injected into a scene at construction.

use regionspace_common::{AvatarId, ObjectId};
use std::sync::Arc;

use crate::connection::InitialRezRegistry;
use crate::land::{FlatTerrain, LandChannel, Parcel, ParcelMap, Terrain};
use crate::physics::{KinematicPhysics, PhysicsScene};

/// Read side of the transit controller, as seen by the scene.
pub trait TransitStatus: Send + Sync {
    fn avatar_is_in_transit(&self, avatar: AvatarId) -> bool;
    fn avatar_is_in_transit_on_prim(&self, avatar: AvatarId) -> bool;
}

/// Status for a scene with no transit controller: nobody is ever in transit.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransit;

impl TransitStatus for NoTransit {
    fn avatar_is_in_transit(&self, _avatar: AvatarId) -> bool {
        false
    }

    fn avatar_is_in_transit_on_prim(&self, _avatar: AvatarId) -> bool {
        false
    }
}

/// Hooks into the scripting engine. Every method defaults to doing nothing.
pub trait ScriptHost: Send + Sync {
    fn create_scripts(&self, _object: ObjectId) {}
    fn remove_scripts(&self, _object: ObjectId) {}
    fn changed_teleport(&self, _attachment: ObjectId) {}
    /// Revoke every control grant scripts hold on `avatar`.
    fn release_controls(&self, _avatar: AvatarId) {}
    fn rez_attachments(&self, _avatar: AvatarId, _attachments: &[ObjectId]) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullScriptHost;

impl ScriptHost for NullScriptHost {}

#[derive(Clone)]
pub struct SceneServices {
    pub physics: Arc<dyn PhysicsScene>,
    pub land: Arc<dyn LandChannel>,
    pub terrain: Arc<dyn Terrain>,
    pub scripts: Arc<dyn ScriptHost>,
    pub transit: Arc<dyn TransitStatus>,
    pub initial_rez: Arc<InitialRezRegistry>,
}

impl SceneServices {
    /// Kinematic physics, one region-wide parcel, flat ground at 20 m, no
    /// scripts and no transit controller.
    pub fn standalone() -> Self {
        Self {
            physics: Arc::new(KinematicPhysics::new()),
            land: Arc::new(ParcelMap::single(Parcel::whole_region(1, "region"))),
            terrain: Arc::new(FlatTerrain(20.0)),
            scripts: Arc::new(NullScriptHost),
            transit: Arc::new(NoTransit),
            initial_rez: Arc::new(InitialRezRegistry::default()),
        }
    }

    pub fn with_transit(mut self, transit: Arc<dyn TransitStatus>) -> Self {
        self.transit = transit;
        self
    }

    pub fn with_land(mut self, land: Arc<dyn LandChannel>) -> Self {
        self.land = land;
        self
    }

    pub fn with_terrain(mut self, terrain: Arc<dyn Terrain>) -> Self {
        self.terrain = terrain;
        self
    }

    pub fn with_physics(mut self, physics: Arc<dyn PhysicsScene>) -> Self {
        self.physics = physics;
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptHost>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_initial_rez(mut self, registry: Arc<InitialRezRegistry>) -> Self {
        self.initial_rez = registry;
        self
    }
}

impl std::fmt::Debug for SceneServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneServices")
            .field("initial_rez", &self.initial_rez)
            .finish_non_exhaustive()
    }
}
