//! The session dispatcher: the one place that talks to the transport.
//!
//! Every inbound frame goes through [`SessionDispatcher::on_message`]:
//!
//! ```text
//! bytes ──decode──► SessionMessage ──match──► exactly one handler
//!   │                                          ├─ groups / touches  → registry, world
//!   └─ decode error → report + drop            ├─ listen updates    → talk list
//!                                              ├─ state records     → pending queue
//!                                              └─ game messages     → events
//! ```
//!
//! [`SessionDispatcher::tick`] runs once per simulation step: drain the
//! transport, sample proximity, retry pending state, flush dirty lists.
//! Everything the application should react to comes out of
//! [`SessionDispatcher::drain_events`].
//!
//! A bad frame never ends the session. Decode failures, unexpected
//! messages and refused state all become [`DiagnosticsSink`] reports.

use std::collections::VecDeque;

use shardlink_protocol::{
    GroupOwnerEntry, ListenAction, LocationId, MAX_LISTEN_RECEIVERS, SessionId, SessionMessage,
    StateRecord, Uoid,
};
use shardlink_session::{
    Delivery, DiagnosticCategory, DiagnosticsSink, GroupUpdate, ListenListChange, NetworkGroup,
    Ownership, OwnershipArbitrator, PendingStateLoad, ProximitySource, SessionConfig,
    SimulatedObjectRef, TracingDiagnostics, WorldObjectStore,
};
use shardlink_transport::{ConnectionId, Transport};
use tracing::{debug, info, trace, warn};

use crate::ShardlinkError;
use crate::context::{SessionContext, SessionPhase};

/// Something the application should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The server acknowledged our join.
    Joined { session: SessionId },
    /// The session context was destroyed.
    Left,
    /// A network group changed hands.
    GroupOwnershipChanged { location: LocationId, owned: bool },
    /// A state record reached its object, either on arrival or from the
    /// pending queue.
    StateApplied {
        object: Uoid,
        origin: Option<SessionId>,
    },
    /// Every announced initial state record has arrived.
    InitialStateComplete { count: u32 },
    /// Who hears us changed. The voice transport should update its group.
    TalkListChanged { members: Vec<SessionId> },
    /// Our listen list reached the transport. Not raised when a send
    /// failed; the next due sample then retransmits the whole list.
    ListenListSynced {
        full_resync: bool,
        members: Vec<SessionId>,
    },
    MemberJoined(SessionId),
    MemberLeft(SessionId),
    GameMessage { sender: SessionId, payload: Vec<u8> },
}

/// Routes session traffic between the transport and the session core.
///
/// Generic over its collaborators so tests can use a
/// [`LoopbackTransport`](shardlink_transport::LoopbackTransport), a
/// map-backed world, and a [`DiagnosticLog`](shardlink_session::DiagnosticLog).
pub struct SessionDispatcher<T, W, D = TracingDiagnostics> {
    local: SessionId,
    transport: T,
    world: W,
    diagnostics: D,
    config: SessionConfig,
    proximity: Option<Box<dyn ProximitySource + Send>>,
    networking_enabled: bool,
    context: Option<SessionContext>,
    events: VecDeque<SessionEvent>,
    now: f64,
}

impl<T, W, D> SessionDispatcher<T, W, D>
where
    T: Transport,
    W: WorldObjectStore,
    D: DiagnosticsSink,
{
    /// Creates a dispatcher for the local session `local`. Not joined yet.
    pub fn new(
        local: SessionId,
        transport: T,
        world: W,
        diagnostics: D,
        config: SessionConfig,
    ) -> Self {
        Self {
            local,
            transport,
            world,
            diagnostics,
            config: config.validated(),
            proximity: None,
            networking_enabled: true,
            context: None,
            events: VecDeque::new(),
            now: 0.0,
        }
    }

    /// Attaches the source of avatar positions used for voice routing.
    /// Without one, the listen list never changes by distance.
    pub fn with_proximity<P>(mut self, source: P) -> Self
    where
        P: ProximitySource + Send + 'static,
    {
        self.proximity = Some(Box::new(source));
        self
    }

    /// With networking disabled nothing is sent and every object counts
    /// as locally owned.
    pub fn set_networking_enabled(&mut self, enabled: bool) {
        self.networking_enabled = enabled;
    }

    pub fn networking_enabled(&self) -> bool {
        self.networking_enabled
    }

    pub fn local_session(&self) -> SessionId {
        self.local
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The current session, if joined (or joining).
    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    /// True once the server has acknowledged the join.
    pub fn is_playing(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|ctx| ctx.phase == SessionPhase::Playing)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut D {
        &mut self.diagnostics
    }

    /// Takes every event produced since the last call, oldest first.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Starts joining `age` over `connection`: creates a fresh session
    /// context and sends `JoinRequest`.
    ///
    /// Joining while already in a session leaves the old one first.
    pub fn join(&mut self, connection: ConnectionId, age: &str) -> Result<(), ShardlinkError> {
        if self.context.is_some() {
            info!(age, "joining while in a session, leaving the old one first");
            self.leave();
        }

        self.context = Some(SessionContext::new(connection, age, &self.config));
        info!(session = %self.local, %connection, age, "joining session");

        if !self.networking_enabled {
            return Ok(());
        }
        let request = SessionMessage::JoinRequest {
            session: self.local,
            age: age.to_string(),
        };
        send_frame(&mut self.transport, connection, &request)
    }

    /// Destroys the session context. Pending state is discarded with one
    /// report per record. Returns `false` if there was no session.
    pub fn leave(&mut self) -> bool {
        let Some(ctx) = self.context.take() else {
            return false;
        };
        ctx.teardown(&mut self.diagnostics);
        self.events.push_back(SessionEvent::Left);
        true
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Decodes one frame and routes it. Never fails: problems are reported
    /// to the diagnostics sink and the frame is dropped.
    pub fn on_message(&mut self, connection: ConnectionId, bytes: &[u8]) {
        let message = match SessionMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(%connection, len = bytes.len(), error = %e, "dropping undecodable frame");
                self.diagnostics.report(
                    DiagnosticCategory::DecodeError,
                    &format!("frame from {connection}: {e}"),
                );
                return;
            }
        };

        let Some(ctx) = self.context.as_ref() else {
            self.drop_message(&message, "not in a session");
            return;
        };
        if ctx.connection != connection {
            self.drop_message(&message, "wrong connection");
            return;
        }

        trace!(%connection, message = message.name(), "routing message");
        self.route(message);
    }

    fn route(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::JoinAck { session } => self.handle_join_ack(session),
            SessionMessage::GroupOwner { groups } => self.handle_group_owner(&groups),
            SessionMessage::ObjectTouched { object, toucher } => {
                self.handle_object_touched(&object, toucher)
            }
            SessionMessage::ListenListUpdate {
                sender,
                action,
                receivers,
            } => self.handle_listen_list_update(sender, action, &receivers),
            SessionMessage::MemberUpdate { member, joined } => {
                self.handle_member_update(member, joined)
            }
            SessionMessage::SdlState {
                object,
                origin,
                initial,
                state,
            } => self.handle_state(object, origin, initial, state),
            SessionMessage::InitialStateCount { count } => self.handle_initial_state_count(count),
            SessionMessage::GameMessage { sender, payload } => {
                self.events
                    .push_back(SessionEvent::GameMessage { sender, payload });
            }
            message @ SessionMessage::JoinRequest { .. } => {
                self.drop_message(&message, "client never accepts joins");
            }
        }
    }

    fn handle_join_ack(&mut self, session: SessionId) {
        if session != self.local {
            self.diagnostics.report(
                DiagnosticCategory::DroppedMessage,
                &format!("JoinAck for {session}, we are {}", self.local),
            );
            return;
        }
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if ctx.phase == SessionPhase::Playing {
            debug!(%session, "duplicate JoinAck");
            return;
        }
        ctx.phase = SessionPhase::Playing;
        info!(%session, age = %ctx.age, "joined session");
        self.events.push_back(SessionEvent::Joined { session });
    }

    fn handle_group_owner(&mut self, groups: &[GroupOwnerEntry]) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        for entry in groups {
            // The default groups are fixed for the whole session; the server
            // has no business reassigning them.
            if entry.location.is_reserved() {
                warn!(location = %entry.location, "ignoring ownership change for default group");
                self.diagnostics.report(
                    DiagnosticCategory::PolicyViolation,
                    &format!("server tried to set ownership of {}", entry.location),
                );
                continue;
            }

            match ctx.registry.set_group(NetworkGroup::new(entry.location), entry.owned) {
                GroupUpdate::Inserted | GroupUpdate::Changed => {
                    debug!(location = %entry.location, owned = entry.owned, "group ownership changed");
                    self.events.push_back(SessionEvent::GroupOwnershipChanged {
                        location: entry.location,
                        owned: entry.owned,
                    });
                }
                GroupUpdate::Unchanged => {}
                GroupUpdate::ConflictingDefault => {
                    self.diagnostics.report(
                        DiagnosticCategory::PolicyViolation,
                        &format!("conflicting ownership for {}", entry.location),
                    );
                }
            }
        }
    }

    fn handle_object_touched(&mut self, object: &Uoid, toucher: SessionId) {
        let Some(handle) = self.world.resolve_object(object) else {
            self.diagnostics.report(
                DiagnosticCategory::DroppedMessage,
                &format!("touch on unloaded object {object}"),
            );
            return;
        };
        trace!(%object, %toucher, "recording remote touch");
        self.world.record_touch(handle, toucher);
    }

    fn handle_listen_list_update(
        &mut self,
        sender: SessionId,
        action: ListenAction,
        receivers: &[SessionId],
    ) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if !ctx.members.contains(&sender) {
            self.diagnostics.report(
                DiagnosticCategory::DroppedMessage,
                &format!("listen update from unknown member {sender}"),
            );
            return;
        }
        let addressed = receivers.contains(&self.local);
        let hears_us = match action {
            ListenAction::Replace => addressed,
            ListenAction::Add | ListenAction::Remove if !addressed => {
                trace!(%sender, "listen update not addressed to us");
                return;
            }
            ListenAction::Add => true,
            ListenAction::Remove => false,
        };

        let talk = ctx.voice.talk_list_mut();
        let changed = if hears_us {
            talk.add_member(sender)
        } else {
            talk.remove_member(sender)
        };
        if changed {
            debug!(%sender, ?action, hears_us, "talk list changed");
        }
    }

    fn handle_member_update(&mut self, member: SessionId, joined: bool) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if member == self.local {
            trace!(%member, "ignoring member update about ourselves");
            return;
        }

        if joined {
            if ctx.members.insert(member) {
                debug!(%member, "member joined");
                self.events.push_back(SessionEvent::MemberJoined(member));
            }
        } else if ctx.members.remove(&member) {
            ctx.voice.remove_participant(member);
            debug!(%member, "member left");
            self.events.push_back(SessionEvent::MemberLeft(member));
        }
    }

    fn handle_state(
        &mut self,
        object: Uoid,
        origin: Option<SessionId>,
        initial: bool,
        state: StateRecord,
    ) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };

        if initial {
            ctx.initial_state.received += 1;
        } else if ctx.initial_state.is_gating() {
            self.diagnostics.report(
                DiagnosticCategory::DroppedMessage,
                &format!(
                    "state `{}` for {object} arrived before initial state finished",
                    state.descriptor
                ),
            );
            return;
        }

        let load = PendingStateLoad::new(object.clone(), state, origin, self.now);
        match ctx
            .pending
            .place_or_enqueue(load, &mut self.world, &mut self.diagnostics)
        {
            Delivery::Applied => {
                self.events
                    .push_back(SessionEvent::StateApplied { object, origin });
            }
            Delivery::Queued(id) => trace!(%object, %id, "state queued until object loads"),
            Delivery::Discarded | Delivery::Rejected => {}
        }

        if initial && ctx.initial_state.check_complete() {
            info!(count = ctx.initial_state.received, "initial state complete");
            self.events.push_back(SessionEvent::InitialStateComplete {
                count: ctx.initial_state.received,
            });
        }
    }

    fn handle_initial_state_count(&mut self, count: u32) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        debug!(count, "expecting initial state");
        ctx.initial_state.expected = Some(count);
        if ctx.initial_state.check_complete() {
            self.events
                .push_back(SessionEvent::InitialStateComplete { count });
        }
    }

    fn drop_message(&mut self, message: &SessionMessage, reason: &str) {
        debug!(message = message.name(), reason, "dropping message");
        self.diagnostics.report(
            DiagnosticCategory::DroppedMessage,
            &format!("{}: {reason}", message.name()),
        );
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// One simulation step at session time `now` (seconds).
    ///
    /// 1. Route every frame the transport has received, in arrival order.
    /// 2. Sample proximity if the listen list is due, send any change.
    /// 3. Retry pending state records.
    /// 4. Flush a dirty talk list as [`SessionEvent::TalkListChanged`].
    pub fn tick(&mut self, now: f64) {
        self.now = now;

        for (connection, bytes) in self.transport.poll_received() {
            self.on_message(connection, &bytes);
        }

        let Some(ctx) = self.context.as_mut() else {
            return;
        };

        if self.networking_enabled && ctx.voice.wants_sample(now) {
            let sample = self.proximity.as_ref().and_then(|p| p.sample()).map(|mut s| {
                s.candidates
                    .retain(|(member, _)| *member != self.local && ctx.members.contains(member));
                s
            });
            if let Some(change) = ctx.voice.tick(now, sample.as_ref()) {
                let connection = ctx.connection;
                let mut failed = false;
                for message in listen_list_messages(self.local, &change) {
                    if let Err(e) = send_frame(&mut self.transport, connection, &message) {
                        self.diagnostics
                            .report(DiagnosticCategory::SendFailed, &e.to_string());
                        failed = true;
                    }
                }
                if failed {
                    warn!("listen list not sent, next sample resyncs");
                    ctx.voice.request_full_resync();
                } else {
                    self.events.push_back(SessionEvent::ListenListSynced {
                        full_resync: change.full_resync,
                        members: change.members,
                    });
                }
            }
        }

        let report = ctx
            .pending
            .try_place_all(now, &mut self.world, &mut self.diagnostics);
        for load in report.applied {
            self.events.push_back(SessionEvent::StateApplied {
                object: load.object,
                origin: load.origin,
            });
        }

        if let Some(members) = ctx.voice.talk_list_mut().take_dirty() {
            self.events.push_back(SessionEvent::TalkListChanged { members });
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Whether the local session is authoritative for `object`.
    pub fn is_locally_owned(&self, object: &SimulatedObjectRef) -> Ownership {
        if !self.networking_enabled {
            return Ownership::Yes;
        }
        let Some(ctx) = self.context.as_ref() else {
            return Ownership::Unknown;
        };
        OwnershipArbitrator::new(&ctx.registry, self.local).is_locally_owned(&self.world, object)
    }

    /// Sends `state` for `object`, but only if we own it.
    ///
    /// Returns the ownership answer; the record went out only when it is
    /// [`Ownership::Yes`]. Anything else is also reported, since it means
    /// the caller simulated an object it had no authority over.
    pub fn send_state(
        &mut self,
        object: &SimulatedObjectRef,
        state: StateRecord,
    ) -> Result<Ownership, ShardlinkError> {
        let ownership = self.is_locally_owned(object);
        if !self.networking_enabled {
            return Ok(ownership);
        }
        let connection = self.connection()?;

        if ownership != Ownership::Yes {
            self.diagnostics.report(
                DiagnosticCategory::PolicyViolation,
                &format!(
                    "not sending state `{}` for {}: ownership is {ownership}",
                    state.descriptor,
                    object.uoid()
                ),
            );
            return Ok(ownership);
        }

        let message = SessionMessage::SdlState {
            object: object.uoid().clone(),
            origin: Some(self.local),
            initial: false,
            state,
        };
        send_frame(&mut self.transport, connection, &message)?;
        Ok(ownership)
    }

    /// Sends an opaque application message to the session.
    pub fn send_game_message(&mut self, payload: Vec<u8>) -> Result<(), ShardlinkError> {
        if !self.networking_enabled {
            return Ok(());
        }
        let connection = self.connection()?;
        let message = SessionMessage::GameMessage {
            sender: self.local,
            payload,
        };
        send_frame(&mut self.transport, connection, &message)
    }

    /// Records that we touched `object` and tells everyone else.
    ///
    /// Returns `false` if the object isn't loaded, in which case nothing is
    /// recorded or sent.
    pub fn record_local_touch(&mut self, object: &Uoid) -> Result<bool, ShardlinkError> {
        let Some(handle) = self.world.resolve_object(object) else {
            return Ok(false);
        };
        self.world.record_touch(handle, self.local);

        if !self.networking_enabled {
            return Ok(true);
        }
        let connection = self.connection()?;
        let message = SessionMessage::ObjectTouched {
            object: object.clone(),
            toucher: self.local,
        };
        send_frame(&mut self.transport, connection, &message)?;
        Ok(true)
    }

    /// Forces the listen list to exactly `members` (private chat), or
    /// returns to distance sampling with `None`. The new list is sent at
    /// once.
    pub fn set_forced_listen(
        &mut self,
        members: Option<Vec<SessionId>>,
    ) -> Result<(), ShardlinkError> {
        let local = self.local;
        let now = self.now;
        let ctx = self.context.as_mut().ok_or(ShardlinkError::NotJoined)?;
        let change = ctx.voice.listen_list_mut().set_forced(members, now);

        if self.networking_enabled {
            for message in listen_list_messages(local, &change) {
                if let Err(e) = send_frame(&mut self.transport, ctx.connection, &message) {
                    ctx.voice.request_full_resync();
                    return Err(e);
                }
            }
        }
        self.events.push_back(SessionEvent::ListenListSynced {
            full_resync: change.full_resync,
            members: change.members,
        });
        Ok(())
    }

    /// Sessions we currently listen to.
    pub fn listen_members(&self) -> &[SessionId] {
        self.context
            .as_ref()
            .map(|ctx| ctx.voice.listen_list().members())
            .unwrap_or_default()
    }

    /// Sessions currently listening to us.
    pub fn talk_members(&self) -> &[SessionId] {
        self.context
            .as_ref()
            .map(|ctx| ctx.voice.talk_list().members())
            .unwrap_or_default()
    }

    fn connection(&self) -> Result<ConnectionId, ShardlinkError> {
        self.context
            .as_ref()
            .map(|ctx| ctx.connection)
            .ok_or(ShardlinkError::NotJoined)
    }
}

/// Encodes and sends one message.
fn send_frame<T>(
    transport: &mut T,
    connection: ConnectionId,
    message: &SessionMessage,
) -> Result<(), ShardlinkError>
where
    T: Transport + ?Sized,
{
    let bytes = message.encode()?;
    transport.send(connection, &bytes)?;
    trace!(%connection, message = message.name(), len = bytes.len(), "sent");
    Ok(())
}

/// Turns a listen-list change into wire messages, split so no message
/// exceeds the receiver limit.
///
/// An incremental change sends removals first, then additions. A full
/// resync opens with a `Replace` carrying the first part of the list, even
/// when the list is empty, and sends the rest as additions.
fn listen_list_messages(local: SessionId, change: &ListenListChange) -> Vec<SessionMessage> {
    let chunk = MAX_LISTEN_RECEIVERS as usize;
    let parts: Vec<(ListenAction, &[SessionId])> = if change.full_resync {
        let (head, tail) = change.members.split_at(change.members.len().min(chunk));
        std::iter::once((ListenAction::Replace, head))
            .chain(tail.chunks(chunk).map(|part| (ListenAction::Add, part)))
            .collect()
    } else {
        let removals = change.removed.chunks(chunk).map(|part| (ListenAction::Remove, part));
        let adds = change.added.chunks(chunk).map(|part| (ListenAction::Add, part));
        removals.chain(adds).collect()
    };

    parts
        .into_iter()
        .map(|(action, part)| SessionMessage::ListenListUpdate {
            sender: local,
            action,
            receivers: part.to_vec(),
        })
        .collect()
}
