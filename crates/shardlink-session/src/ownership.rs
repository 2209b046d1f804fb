//! The ownership arbitrator: "is object X locally authoritative?".
//!
//! Ownership is never stored. Every query is answered from three sources of
//! truth, in this order:
//!
//! ```text
//!  object resolvable & alive? ──no──► Unknown
//!          │ yes
//!  network-synchronized?      ──no──► Yes   (local-only object)
//!          │ yes
//!  group known to registry?   ──no──► Unknown
//!          │ yes
//!  group is local-player or
//!  local-physicals?           ──yes─► Yes   (never contested)
//!          │ no
//!  physical with a toucher?   ──yes─► Yes if the toucher is us, else No
//!          │ no
//!  group ownership from the registry
//! ```
//!
//! The arbitrator only *reads* touch state. Touches are recorded on the
//! object through the world store by whoever observes them.

use shardlink_protocol::{LocationId, SessionId, Uoid};
use tracing::trace;

use crate::{GroupRegistry, Ownership, WorldObjectStore};

/// A weak reference to a world object: its id plus a cached liveness flag.
///
/// Holding one of these never keeps the object alive. The world store owns
/// object lifetimes; the flag just lets a caller mark "I already know this
/// one is gone" without asking the store again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimulatedObjectRef {
    uoid: Uoid,
    alive: bool,
}

impl SimulatedObjectRef {
    pub fn new(uoid: Uoid) -> Self {
        Self { uoid, alive: true }
    }

    pub fn uoid(&self) -> &Uoid {
        &self.uoid
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Marks the object as destroyed. Every later query answers `Unknown`.
    pub fn mark_dead(&mut self) {
        self.alive = false;
    }
}

/// Answers ownership queries for one session.
///
/// Borrowed views only: the arbitrator is cheap to build per query and
/// holds no state of its own.
#[derive(Debug, Clone, Copy)]
pub struct OwnershipArbitrator<'a> {
    registry: &'a GroupRegistry,
    local: SessionId,
}

impl<'a> OwnershipArbitrator<'a> {
    pub fn new(registry: &'a GroupRegistry, local: SessionId) -> Self {
        Self { registry, local }
    }

    /// Decides whether the local session is authoritative for `object`.
    ///
    /// Never fails: missing information degrades to [`Ownership::Unknown`].
    pub fn is_locally_owned<W>(&self, world: &W, object: &SimulatedObjectRef) -> Ownership
    where
        W: WorldObjectStore + ?Sized,
    {
        if !object.is_alive() {
            return Ownership::Unknown;
        }
        let Some(handle) = world.resolve_object(object.uoid()) else {
            return Ownership::Unknown;
        };
        if !world.is_net_synched(handle) {
            return Ownership::Yes;
        }

        let group = world.object_group(handle);
        let group_answer = self.registry.ownership_of(group);
        if group_answer == Ownership::Unknown {
            return Ownership::Unknown;
        }
        if group == LocationId::LOCAL_PLAYER || group == LocationId::LOCAL_PHYSICALS {
            return Ownership::Yes;
        }

        if world.is_physical(handle) {
            if let Some(toucher) = world.last_toucher(handle) {
                let answer = Ownership::from_owned(toucher == self.local);
                trace!(object = %object.uoid(), %toucher, %answer, "ownership by last toucher");
                return answer;
            }
        }

        group_answer
    }
}
