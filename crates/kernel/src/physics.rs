//! Physics capability consumed by the scene.
//!
//! The engine itself is external; the scene only adds and removes actors and
//! reads their positions back once per frame. `KinematicPhysics` integrates
//! velocity with no forces and serves as the in-process implementation.

use glam::Vec3;
use regionspace_common::LocalId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle to a body owned by the physics scene.
pub trait PhysicsActor: Send + Sync {
    fn local_id(&self) -> LocalId;
    fn position(&self) -> Vec3;
    fn set_position(&self, position: Vec3);
    fn velocity(&self) -> Vec3;
    fn set_velocity(&self, velocity: Vec3);
    fn is_flying(&self) -> bool;
    fn set_flying(&self, flying: bool);
}

pub trait PhysicsScene: Send + Sync {
    fn add_avatar(
        &self,
        local_id: LocalId,
        position: Vec3,
        velocity: Vec3,
        size: Vec3,
        flying: bool,
    ) -> Arc<dyn PhysicsActor>;
    fn add_object(&self, local_id: LocalId, position: Vec3, velocity: Vec3)
    -> Arc<dyn PhysicsActor>;
    fn remove(&self, local_id: LocalId);
    /// Advance every body by `dt` seconds.
    fn step(&self, dt: f32);
    fn actor_count(&self) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
struct BodyState {
    position: Vec3,
    velocity: Vec3,
    size: Vec3,
    flying: bool,
}

/// A body moved only by its own velocity.
#[derive(Debug)]
pub struct KinematicBody {
    local_id: LocalId,
    state: Mutex<BodyState>,
}

impl KinematicBody {
    fn with_state<R>(&self, f: impl FnOnce(&mut BodyState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn size(&self) -> Vec3 {
        self.with_state(|s| s.size)
    }
}

impl PhysicsActor for KinematicBody {
    fn local_id(&self) -> LocalId {
        self.local_id
    }

    fn position(&self) -> Vec3 {
        self.with_state(|s| s.position)
    }

    fn set_position(&self, position: Vec3) {
        self.with_state(|s| s.position = position);
    }

    fn velocity(&self) -> Vec3 {
        self.with_state(|s| s.velocity)
    }

    fn set_velocity(&self, velocity: Vec3) {
        self.with_state(|s| s.velocity = velocity);
    }

    fn is_flying(&self) -> bool {
        self.with_state(|s| s.flying)
    }

    fn set_flying(&self, flying: bool) {
        self.with_state(|s| s.flying = flying);
    }
}

#[derive(Debug, Default)]
pub struct KinematicPhysics {
    bodies: Mutex<BTreeMap<LocalId, Arc<KinematicBody>>>,
}

impl KinematicPhysics {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, local_id: LocalId, state: BodyState) -> Arc<KinematicBody> {
        let body = Arc::new(KinematicBody {
            local_id,
            state: Mutex::new(state),
        });
        self.bodies().insert(local_id, Arc::clone(&body));
        body
    }

    fn bodies(&self) -> MutexGuard<'_, BTreeMap<LocalId, Arc<KinematicBody>>> {
        self.bodies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, local_id: LocalId) -> bool {
        self.bodies().contains_key(&local_id)
    }
}

impl PhysicsScene for KinematicPhysics {
    fn add_avatar(
        &self,
        local_id: LocalId,
        position: Vec3,
        velocity: Vec3,
        size: Vec3,
        flying: bool,
    ) -> Arc<dyn PhysicsActor> {
        tracing::trace!(%local_id, ?position, "adding avatar body");
        self.insert(
            local_id,
            BodyState {
                position,
                velocity,
                size,
                flying,
            },
        )
    }

    fn add_object(
        &self,
        local_id: LocalId,
        position: Vec3,
        velocity: Vec3,
    ) -> Arc<dyn PhysicsActor> {
        tracing::trace!(%local_id, ?position, "adding object body");
        self.insert(
            local_id,
            BodyState {
                position,
                velocity,
                ..BodyState::default()
            },
        )
    }

    fn remove(&self, local_id: LocalId) {
        self.bodies().remove(&local_id);
    }

    fn step(&self, dt: f32) {
        let bodies: Vec<Arc<KinematicBody>> = self.bodies().values().cloned().collect();
        for body in bodies {
            body.with_state(|s| s.position += s.velocity * dt);
        }
    }

    fn actor_count(&self) -> usize {
        self.bodies().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_integrates_velocity() {
        let physics = KinematicPhysics::new();
        let actor = physics.add_object(LocalId(7), Vec3::new(10.0, 10.0, 20.0), Vec3::X * 4.0);
        physics.step(0.5);
        assert_eq!(actor.position(), Vec3::new(12.0, 10.0, 20.0));
    }

    #[test]
    fn removed_bodies_stop_moving() {
        let physics = KinematicPhysics::new();
        let actor = physics.add_avatar(
            LocalId(1),
            Vec3::ZERO,
            Vec3::Y,
            Vec3::new(0.45, 0.6, 1.9),
            false,
        );
        assert_eq!(physics.actor_count(), 1);
        physics.remove(LocalId(1));
        physics.step(1.0);
        assert_eq!(actor.position(), Vec3::ZERO);
        assert!(!physics.contains(LocalId(1)));
    }
}
