//! Typed payloads carried in envelopes.

use glam::Vec3;
use regionspace_common::AvatarId;
use regionspace_kernel::{AgentSnapshot, ObjectSnapshot};
use serde::{Deserialize, Serialize};

use crate::codec::{PayloadKind, WireError, decode, encode};

/// An object moving to another region, with the avatars seated on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPayload {
    pub object: ObjectSnapshot,
    pub riders: Vec<AvatarId>,
    /// Position in the destination's frame.
    pub spawn_position: Vec3,
    pub must_be_root: bool,
    pub is_attachment: bool,
    pub sent_at_ms: u64,
}

pub fn encode_object(payload: &ObjectPayload) -> Result<Vec<u8>, WireError> {
    encode(PayloadKind::Object, payload)
}

pub fn decode_object(bytes: &[u8]) -> Result<ObjectPayload, WireError> {
    decode(PayloadKind::Object, bytes)
}

pub fn encode_agent(snapshot: &AgentSnapshot) -> Result<Vec<u8>, WireError> {
    encode(PayloadKind::Agent, snapshot)
}

pub fn decode_agent(bytes: &[u8]) -> Result<AgentSnapshot, WireError> {
    decode(PayloadKind::Agent, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regionspace_kernel::PartSnapshot;

    #[test]
    fn object_payload_keeps_parts_and_riders() {
        let owner = AvatarId::new();
        let object = ObjectSnapshot::single_part(owner, "wagon", Vec3::new(255.0, 10.0, 22.0))
            .with_part(PartSnapshot::new("bench", Vec3::new(0.0, 1.0, 0.5)))
            .physical(Vec3::new(4.0, 0.0, 0.0));
        let payload = ObjectPayload {
            object,
            riders: vec![AvatarId::new(), AvatarId::new()],
            spawn_position: Vec3::new(0.5, 10.0, 22.0),
            must_be_root: true,
            is_attachment: false,
            sent_at_ms: 1_700_000_000_000,
        };
        let bytes = encode_object(&payload).unwrap();
        let back = decode_object(&bytes).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.object.parts.len(), 2);
        assert!(decode_agent(&bytes).is_err());
    }
}
