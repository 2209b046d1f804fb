//! Unified error type for Shardlink.

use shardlink_protocol::ProtocolError;
use shardlink_session::WorldError;
use shardlink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `shardlink` crate you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so the `?`
/// operator converts sub-crate errors automatically.
///
/// Only the application-facing calls (`join`, `send_state`, ...) return
/// it. Inbound problems never surface as errors: they become diagnostic
/// reports and the session keeps running.
#[derive(Debug, thiserror::Error)]
pub enum ShardlinkError {
    /// A transport-level error (connect, send).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The world-object store refused an operation.
    #[error(transparent)]
    World(#[from] WorldError),

    /// The call needs a joined session and there isn't one.
    #[error("not joined to a session")]
    NotJoined,
}
