//! # Shardlink
//!
//! Client-side network session core for a shared multiplayer world.
//!
//! Shardlink decides which connected session is authoritative for each
//! simulated object, routes proximity voice between participants, and
//! reconciles persisted state that arrives before the object it belongs to
//! has loaded. The application plugs in its world-object store and its
//! transport; Shardlink handles the rest.
//!
//! ```text
//! SessionDriver        ← async tick loop (tokio)
//!     ↓ tick(now)
//! SessionDispatcher    ← decodes, routes, sends
//!     ↓
//! session core         ← groups, ownership, voice lists, pending queue
//!     ↓
//! protocol / transport ← wire framing, connections
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shardlink::prelude::*;
//!
//! # fn demo<W: WorldObjectStore>(world: W) -> Result<(), ShardlinkError> {
//! shardlink::init_tracing();
//!
//! let transport = LoopbackTransport::new();
//! let connection = ConnectionId::new(1);
//! let mut dispatcher = SessionDispatcher::new(
//!     SessionId(7),
//!     transport,
//!     world,
//!     TracingDiagnostics,
//!     SessionConfig::default(),
//! );
//! dispatcher.join(connection, "Neighborhood")?;
//! dispatcher.tick(0.0);
//! for event in dispatcher.drain_events() {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod context;
mod dispatcher;
mod driver;
mod error;

pub use context::{InitialStateProgress, SessionContext, SessionPhase};
pub use dispatcher::{SessionDispatcher, SessionEvent};
pub use driver::SessionDriver;
pub use error::ShardlinkError;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber that prints to stderr.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Safe to call
/// more than once; only the first call installs anything. Libraries should
/// leave this to the application.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Common imports for applications using Shardlink.
pub mod prelude {
    pub use crate::{
        SessionContext, SessionDispatcher, SessionDriver, SessionEvent, SessionPhase,
        ShardlinkError,
    };
    pub use shardlink_protocol::{
        ListenAction, LocationId, SessionId, SessionMessage, StateRecord, Uoid,
    };
    pub use shardlink_session::{
        DiagnosticCategory, DiagnosticLog, DiagnosticsSink, ObjectHandle, Ownership, Position,
        ProximitySample, ProximitySource, SessionConfig, SimulatedObjectRef, TracingDiagnostics,
        WorldError, WorldObjectStore,
    };
    pub use shardlink_tick::{TickConfig, TickInfo};
    pub use shardlink_transport::{ConnectionId, LoopbackTransport, Transport};
}
