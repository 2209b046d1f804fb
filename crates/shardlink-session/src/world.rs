//! Collaborator traits: the world-object store and the proximity source.
//!
//! The session core does not own world objects. It asks the application's
//! object store about them through [`WorldObjectStore`], and it asks for
//! avatar positions through [`ProximitySource`]. Both are traits so tests
//! can plug in a `HashMap`-backed fake.

use shardlink_protocol::{LocationId, SessionId, StateRecord, Uoid};

use crate::WorldError;

/// A store-issued reference to a loaded world object.
///
/// Only valid until the object is unloaded. The session core never keeps a
/// handle across ticks; it re-resolves the [`Uoid`] each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u64);

/// The application's world-object store.
///
/// Methods that take an [`ObjectHandle`] are only called with handles
/// returned by [`resolve_object`](Self::resolve_object) during the same
/// tick.
pub trait WorldObjectStore {
    /// Finds a loaded object that is ready to receive state.
    ///
    /// `None` means "not (yet) available": the object may still be paging
    /// in. Callers that can wait will retry later.
    fn resolve_object(&self, uoid: &Uoid) -> Option<ObjectHandle>;

    /// Whether the object exists in the loaded dataset at all, loaded or
    /// not. State for an object that can never exist is discarded at once
    /// instead of waiting out the pending-queue timeout.
    ///
    /// The default assumes every object may eventually load.
    fn is_known(&self, uoid: &Uoid) -> bool {
        let _ = uoid;
        true
    }

    /// The network group the object belongs to. Usually its own location,
    /// but avatar and spawned physical objects live in the default groups.
    fn object_group(&self, handle: ObjectHandle) -> LocationId;

    /// Whether the object is physically simulated.
    fn is_physical(&self, handle: ObjectHandle) -> bool;

    /// Whether the object takes part in network synchronization at all.
    /// Local-only objects are always owned by the local session.
    fn is_net_synched(&self, handle: ObjectHandle) -> bool {
        let _ = handle;
        true
    }

    /// The session that most recently touched a physical object.
    fn last_toucher(&self, handle: ObjectHandle) -> Option<SessionId>;

    /// Records `toucher` as the most recent toucher.
    fn record_touch(&mut self, handle: ObjectHandle, toucher: SessionId);

    /// Applies a state record. Must be all-or-nothing: on `Err` the
    /// object is unchanged.
    fn apply_state(&mut self, handle: ObjectHandle, state: &StateRecord) -> Result<(), WorldError>;
}

// ---------------------------------------------------------------------------
// Proximity
// ---------------------------------------------------------------------------

/// A point in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Squared euclidean distance. The voice router only ever compares
    /// distances, so it never needs the square root.
    pub fn distance_sq(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

/// One snapshot of where the local listener and every remote participant
/// are.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProximitySample {
    pub listener: Position,
    pub candidates: Vec<(SessionId, Position)>,
}

/// Source of proximity samples (normally the avatar manager).
pub trait ProximitySource {
    /// Takes a sample, or `None` if positions aren't available right now
    /// (for example while the local avatar is still loading).
    fn sample(&self) -> Option<ProximitySample>;
}
