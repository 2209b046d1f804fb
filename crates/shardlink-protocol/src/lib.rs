//! Wire protocol for Shardlink.
//!
//! This crate defines the "language" a Shardlink client speaks:
//!
//! - **Types** ([`SessionId`], [`LocationId`], [`Uoid`]): the identities
//!   every other layer keys its state by.
//! - **Framing** ([`ProtocolSchema`], [`MessageDescriptor`], [`FieldKind`]):
//!   a declarative description of each message's fields, and one generic
//!   encoder/decoder that works for all of them.
//! - **Messages** ([`SessionMessage`]): the typed `cli2game` messages the
//!   session dispatcher routes.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (ownership, voice, pending state). It doesn't know about connections or
//! groups; it only knows how to turn bytes into messages and back.
//!
//! ```text
//! Transport (bytes) → Protocol (SessionMessage) → Session (dispatcher)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod error;
pub mod framing;
mod messages;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::ProtocolError;
pub use framing::{
    FieldDescriptor, FieldKind, FieldValue, IntWidth, MessageDescriptor, ProtocolSchema,
    RealWidth, WireMessage,
};
pub use messages::{
    GroupOwnerEntry, ListenAction, SessionMessage, StateRecord, DESCRIPTOR_CAPACITY,
    MAX_GROUP_ENTRIES, MAX_LISTEN_RECEIVERS, MAX_PAYLOAD_LEN, NAME_CAPACITY, PROTOCOL_NAME, ids,
    session_schema,
};
pub use types::{LocationId, SessionId, Uoid};
