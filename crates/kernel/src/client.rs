use glam::Vec3;
use regionspace_common::{LocalId, ObjectId, TeleportFlags};
use std::sync::{Mutex, PoisonError};

/// Outbound channel to the viewer controlling a presence.
///
/// Packet encoding is not the scene's concern; implementations translate
/// these calls into whatever the client protocol needs.
pub trait ClientView: Send + Sync {
    fn send_local_teleport(&self, position: Vec3, look_at: Vec3, flags: TeleportFlags);
    fn send_teleport_failed(&self, reason: &str);
    fn send_alert(&self, message: &str);
    fn send_kill_objects(&self, local_ids: &[LocalId]);
    fn send_full_update(&self, object: ObjectId);
}

/// A message a [`ClientView`] was asked to deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    LocalTeleport {
        position: Vec3,
        look_at: Vec3,
        flags: TeleportFlags,
    },
    TeleportFailed(String),
    Alert(String),
    KillObjects(Vec<LocalId>),
    FullUpdate(ObjectId),
}

/// Client that records every message instead of sending it.
#[derive(Debug, Default)]
pub struct ClientLog {
    messages: Mutex<Vec<ClientMessage>>,
}

impl ClientLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, message: ClientMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    pub fn messages(&self) -> Vec<ClientMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn drain(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Text of every teleport failure received so far.
    pub fn teleport_failures(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::TeleportFailed(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }
}

impl ClientView for ClientLog {
    fn send_local_teleport(&self, position: Vec3, look_at: Vec3, flags: TeleportFlags) {
        self.push(ClientMessage::LocalTeleport {
            position,
            look_at,
            flags,
        });
    }

    fn send_teleport_failed(&self, reason: &str) {
        self.push(ClientMessage::TeleportFailed(reason.to_string()));
    }

    fn send_alert(&self, message: &str) {
        self.push(ClientMessage::Alert(message.to_string()));
    }

    fn send_kill_objects(&self, local_ids: &[LocalId]) {
        self.push(ClientMessage::KillObjects(local_ids.to_vec()));
    }

    fn send_full_update(&self, object: ObjectId) {
        self.push(ClientMessage::FullUpdate(object));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_records_in_order_and_drains() {
        let log = ClientLog::new();
        log.send_alert("hello");
        log.send_teleport_failed("nope");
        log.send_kill_objects(&[LocalId(3)]);

        assert_eq!(log.teleport_failures(), vec!["nope".to_string()]);
        let drained = log.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0], ClientMessage::Alert("hello".into()));
        assert!(log.messages().is_empty());
    }
}
