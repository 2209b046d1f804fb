//! Error types for the session layer.
//!
//! Most of what goes wrong in the session core is *not* an error: an
//! undecidable ownership question is [`Ownership::Unknown`](crate::Ownership),
//! and a stale pending record is a diagnostic report. What remains are
//! failures reported by the world-object store collaborator.

/// Failures reported by a [`WorldObjectStore`](crate::WorldObjectStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// The handle no longer refers to a live object (it was unloaded
    /// between resolve and apply).
    #[error("object is no longer available")]
    ObjectUnavailable,

    /// The object refused the state record. Nothing was applied.
    #[error("state `{descriptor}` rejected: {reason}")]
    StateRejected { descriptor: String, reason: String },
}
