//! The session core of Shardlink: ownership, voice routing, and pending
//! state reconciliation.
//!
//! Everything in this crate is pure, single-threaded logic over in-memory
//! state. No component does I/O; the dispatcher in the `shardlink` crate
//! feeds them decoded messages and sends whatever they produce.
//!
//! 1. **Groups**: which network groups this session owns ([`GroupRegistry`])
//! 2. **Ownership**: whether an object is locally authoritative
//!    ([`OwnershipArbitrator`])
//! 3. **Voice**: who we hear and who hears us ([`VoiceRouter`])
//! 4. **Pending state**: state that arrived before its object
//!    ([`PendingStateQueue`])
//!
//! Collaborators the application provides are traits:
//! [`WorldObjectStore`], [`ProximitySource`], and [`DiagnosticsSink`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Dispatcher (above)  ← routes messages, drives ticks
//!     ↕
//! Session Core (this crate)  ← groups, ownership, voice lists, pending queue
//!     ↕
//! Protocol Layer (below)  ← provides SessionId, LocationId, Uoid, StateRecord
//! ```

mod config;
mod diagnostics;
mod error;
mod groups;
mod ownership;
mod pending;
mod voice;
mod world;

pub use config::{PendingConfig, SessionConfig, VoiceConfig};
pub use diagnostics::{
    Diagnostic, DiagnosticCategory, DiagnosticLog, DiagnosticsSink, TracingDiagnostics,
};
pub use error::WorldError;
pub use groups::{GroupRegistry, GroupUpdate, NetworkGroup, OwnedGroup, Ownership};
pub use ownership::{OwnershipArbitrator, SimulatedObjectRef};
pub use pending::{Delivery, PendingId, PendingStateLoad, PendingStateQueue, PlacementReport};
pub use voice::{ListenList, ListenListChange, ListenMode, MemberList, TalkList, VoiceRouter};
pub use world::{ObjectHandle, Position, ProximitySample, ProximitySource, WorldObjectStore};
