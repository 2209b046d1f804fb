//! Identity types shared by every Shardlink layer.
//!
//! These are the names the session core uses for "who" (a [`SessionId`]),
//! "where" (a [`LocationId`]), and "what" (a [`Uoid`]). They travel on the
//! wire inside session messages and are used as map keys throughout the
//! ownership, voice, and pending-state components.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Identifies one connected participant's session.
///
/// This is a newtype wrapper around the server-assigned player id. Wrapping
/// the raw `u32` means a `SessionId` can never be passed where a
/// `LocationId` is expected, even though both are integers underneath.
///
/// `#[serde(transparent)]` serializes this as the bare number, so
/// `SessionId(42)` becomes `42` in JSON rather than `{"0":42}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// LocationId
// ---------------------------------------------------------------------------

/// An opaque room/location identifier, stable for the life of a session.
///
/// Every world object lives in exactly one location, and every location
/// maps to one network group. A handful of values at the top of the range
/// are reserved for the four session-scoped default groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub u32);

impl LocationId {
    /// First value of the reserved range. Paged content never uses these.
    pub const RESERVED_BASE: u32 = 0xFFFF_FF00;

    /// Objects belonging to the local player's avatar.
    pub const LOCAL_PLAYER: LocationId = LocationId(Self::RESERVED_BASE + 1);
    /// Objects belonging to remote players' avatars.
    pub const REMOTE_PLAYER: LocationId = LocationId(Self::RESERVED_BASE + 2);
    /// Physically simulated objects this session spawned.
    pub const LOCAL_PHYSICALS: LocationId = LocationId(Self::RESERVED_BASE + 3);
    /// Physically simulated objects other sessions spawned.
    pub const REMOTE_PHYSICALS: LocationId = LocationId(Self::RESERVED_BASE + 4);

    /// Returns `true` if this location is in the reserved range.
    pub fn is_reserved(self) -> bool {
        self.0 >= Self::RESERVED_BASE
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LOCAL_PLAYER => write!(f, "local-player"),
            Self::REMOTE_PLAYER => write!(f, "remote-player"),
            Self::LOCAL_PHYSICALS => write!(f, "local-physicals"),
            Self::REMOTE_PHYSICALS => write!(f, "remote-physicals"),
            _ => write!(f, "L-{:#x}", self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Uoid
// ---------------------------------------------------------------------------

/// Unique object identifier: location + class type + object name.
///
/// This is how one session names a world object to another. The object
/// itself may not be loaded yet (or ever) on the receiving side, which is
/// why state addressed to a `Uoid` sometimes has to wait in the pending
/// queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uoid {
    /// The location (and therefore network group) the object lives in.
    pub location: LocationId,
    /// Numeric class index of the object.
    pub class_type: u16,
    /// The object's name, unique within its location and class.
    pub name: String,
}

impl Uoid {
    /// Convenience constructor.
    pub fn new(location: LocationId, class_type: u16, name: impl Into<String>) -> Self {
        Self {
            location,
            class_type,
            name: name.into(),
        }
    }
}

impl fmt::Display for Uoid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.location, self.class_type, self.name)
    }
}
