//! Agent snapshot: the full state a presence carries to another region.
//!
//! # Invariants
//! - Taking a snapshot never changes the presence.
//! - Restoring a snapshot into a fresh child presence reproduces its
//!   position, velocity, seat, appearance and control state.

use glam::{Quat, Vec3};
use regionspace_common::{AvatarId, ObjectId, PartId, RegionHandle};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::presence::{Appearance, ScenePresence};

/// How the agent is arriving. Crossings are extrapolated on arrival;
/// teleports land exactly where they were sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrivalKind {
    Teleport,
    Crossing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arrival {
    pub kind: ArrivalKind,
    pub sent_at_ms: u64,
}

/// A seat named by ids, resolvable in whichever region holds the object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeatRecord {
    pub object: ObjectId,
    pub part: PartId,
    /// Position relative to the seat part.
    pub offset: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub avatar: AvatarId,
    pub name: String,
    pub source: RegionHandle,
    pub arrival: ArrivalKind,
    /// World position when unseated; seat-relative when `seat` is set.
    pub position: Vec3,
    pub velocity: Vec3,
    pub seat: Option<SeatRecord>,
    pub body_rotation: Quat,
    pub control_flags: u32,
    pub size: Vec3,
    pub appearance: Appearance,
    pub animations: Vec<Uuid>,
    pub always_run: bool,
    pub draw_distance: f32,
    pub flying: bool,
    pub attachments: Vec<ObjectId>,
    pub callback_uri: Option<String>,
    pub sent_at_ms: u64,
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl ScenePresence {
    pub fn copy_to_snapshot(&self, source: RegionHandle, arrival: ArrivalKind) -> AgentSnapshot {
        let info = self.authority().info();
        let velocity = self.authority().velocity();
        let flying = self.is_flying();
        let st = self.state();
        let seat = match &info.parent {
            Some(part) => Some(SeatRecord {
                object: part.object_id(),
                part: part.part_id(),
                offset: info.position,
            }),
            None => st.pending_seat,
        };
        let position = match (&info.parent, seat) {
            (None, Some(pending)) => pending.offset,
            _ => info.position,
        };
        AgentSnapshot {
            avatar: self.id(),
            name: self.name().to_string(),
            source,
            arrival,
            position,
            velocity,
            seat,
            body_rotation: st.body_rotation,
            control_flags: st.control_flags,
            size: st.size,
            appearance: st.appearance.clone(),
            animations: st.animations.clone(),
            always_run: st.always_run,
            draw_distance: st.draw_distance,
            flying,
            attachments: st.attachments.clone(),
            callback_uri: st.callback_uri.clone(),
            sent_at_ms: now_ms(),
        }
    }

    /// Load `snap` into this (child) presence. The seat is kept pending
    /// until `make_root` can resolve it locally.
    pub fn copy_from_snapshot(&self, snap: &AgentSnapshot) {
        let position = match snap.seat {
            Some(_) => self.authority().info().position,
            None => snap.position,
        };
        let _ = self
            .authority()
            .set(None, true, position, None, Vec3::ZERO, snap.velocity);

        let mut st = self.state();
        st.pending_seat = snap.seat;
        st.arrival = Some(Arrival {
            kind: snap.arrival,
            sent_at_ms: snap.sent_at_ms,
        });
        st.source_region = Some(snap.source);
        st.body_rotation = snap.body_rotation;
        st.control_flags = snap.control_flags;
        st.appearance = snap.appearance.clone();
        st.size = snap.size;
        st.animations = snap.animations.clone();
        st.always_run = snap.always_run;
        st.draw_distance = snap.draw_distance;
        st.flying = snap.flying;
        st.attachments = snap.attachments.clone();
        st.callback_uri = snap.callback_uri.clone();
    }
}
