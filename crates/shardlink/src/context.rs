//! Per-session state, created on join and destroyed on leave.
//!
//! Every piece of state that only makes sense while joined to an age lives
//! in one [`SessionContext`]: the group registry, the voice lists, the
//! pending queue, the set of known remote participants, and initial-state
//! progress. The dispatcher holds `Option<SessionContext>`; leaving drops
//! the whole thing, so nothing can leak from one session into the next.

use std::collections::HashSet;

use shardlink_protocol::SessionId;
use shardlink_session::{
    DiagnosticsSink, GroupRegistry, PendingStateQueue, SessionConfig, VoiceRouter,
};
use shardlink_transport::ConnectionId;
use tracing::info;

/// Where a session is in its join handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// `JoinRequest` sent, waiting for `JoinAck`.
    Joining,
    /// Join acknowledged.
    Playing,
}

/// Progress of the initial state burst that follows a join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitialStateProgress {
    /// How many initial records the server announced, once it has.
    pub expected: Option<u32>,
    /// Initial records received so far.
    pub received: u32,
    /// Set once `received` reaches `expected`.
    pub complete: bool,
}

impl InitialStateProgress {
    /// Whether non-initial state must wait: a count has been announced
    /// and not yet reached.
    pub fn is_gating(&self) -> bool {
        self.expected.is_some() && !self.complete
    }

    /// Re-checks completion. Returns `true` exactly once, on the call that
    /// completes the burst.
    pub(crate) fn check_complete(&mut self) -> bool {
        match self.expected {
            Some(expected) if !self.complete && self.received >= expected => {
                self.complete = true;
                true
            }
            _ => false,
        }
    }
}

/// Everything one joined session owns.
#[derive(Debug)]
pub struct SessionContext {
    pub(crate) connection: ConnectionId,
    pub(crate) age: String,
    pub(crate) phase: SessionPhase,
    pub(crate) registry: GroupRegistry,
    pub(crate) voice: VoiceRouter,
    pub(crate) pending: PendingStateQueue,
    pub(crate) members: HashSet<SessionId>,
    pub(crate) initial_state: InitialStateProgress,
}

impl SessionContext {
    /// Creates a fresh context. The registry starts with the default
    /// groups installed.
    pub fn new(connection: ConnectionId, age: impl Into<String>, config: &SessionConfig) -> Self {
        Self {
            connection,
            age: age.into(),
            phase: SessionPhase::Joining,
            registry: GroupRegistry::with_defaults(),
            voice: VoiceRouter::new(config.voice.clone()),
            pending: PendingStateQueue::new(config.pending.clone()),
            members: HashSet::new(),
            initial_state: InitialStateProgress::default(),
        }
    }

    /// The connection this session talks over.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// The age (world instance) this session joined.
    pub fn age(&self) -> &str {
        &self.age
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    pub fn voice(&self) -> &VoiceRouter {
        &self.voice
    }

    pub fn pending(&self) -> &PendingStateQueue {
        &self.pending
    }

    /// Remote participants currently in the session.
    pub fn members(&self) -> &HashSet<SessionId> {
        &self.members
    }

    pub fn initial_state(&self) -> &InitialStateProgress {
        &self.initial_state
    }

    /// Releases everything the session holds. Pending records are each
    /// reported as discarded.
    pub(crate) fn teardown<D>(mut self, diagnostics: &mut D)
    where
        D: DiagnosticsSink + ?Sized,
    {
        let discarded = self.pending.clear(diagnostics);
        self.registry.clear_groups();
        self.voice.clear();
        self.members.clear();
        info!(age = %self.age, discarded, "session context destroyed");
    }
}
