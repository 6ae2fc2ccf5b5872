//! Wire format for payloads exchanged between regions.
//!
//! # Invariants
//! - Every envelope names its schema version and payload kind.
//! - The body hash is checked before the body is decoded.

pub mod codec;
pub mod payload;

pub use codec::{Envelope, PayloadKind, SCHEMA_VERSION, WireError, decode, encode};
pub use payload::{ObjectPayload, decode_agent, decode_object, encode_agent, encode_object};
