//! Error types for the protocol layer.
//!
//! Each crate in Shardlink defines its own error enum. A `ProtocolError`
//! always means the problem is in framing or message conversion, never in
//! networking or ownership bookkeeping.

/// Errors that can occur while encoding or decoding wire messages.
///
/// Everything except `FieldMismatch` is a decode failure caused by bytes
/// that came off the network. The session dispatcher treats all of them the
/// same way: drop the message, report it, keep the session alive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The buffer ended before a field was complete.
    ///
    /// `needed` is how many bytes the field required and `available` is
    /// how many were left in the buffer at that point.
    #[error("truncated message: field `{field}` needs {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// A variable-length count was outside the range declared for its field.
    ///
    /// This is what stops a corrupt or hostile peer from making us allocate
    /// an arbitrarily large buffer.
    #[error("count {count} for field `{field}` outside {min}..={max}")]
    CountOutOfRange {
        field: &'static str,
        count: u64,
        min: u32,
        max: u32,
    },

    /// The message-type id is not registered in this protocol.
    #[error("unknown message type {id} in protocol `{protocol}`")]
    UnknownType { protocol: &'static str, id: u16 },

    /// Every field decoded but bytes were left over.
    #[error("{extra} trailing bytes after message {id}")]
    TrailingBytes { id: u16, extra: usize },

    /// A string field held bytes that are not valid UTF-8.
    #[error("field `{field}` is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// A value handed to the encoder does not match the field descriptor:
    /// wrong kind, out of range for its width, or too long for its capacity.
    #[error("field `{field}` mismatch: {reason}")]
    FieldMismatch { field: &'static str, reason: String },

    /// A decoded message has the right shape on the wire but breaks a rule
    /// of the typed session layer (for example a boolean byte that is
    /// neither 0 nor 1).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// Returns `true` for errors caused by inbound bytes (as opposed to a
    /// caller handing the encoder a value that does not fit).
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::CountOutOfRange { .. }
                | Self::UnknownType { .. }
                | Self::TrailingBytes { .. }
                | Self::InvalidUtf8 { .. }
                | Self::InvalidMessage(_)
        )
    }
}
