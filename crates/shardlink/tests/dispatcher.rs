//! Integration tests for the session dispatcher: join, routing, voice,
//! pending state, and ownership-gated sends, all over a loopback transport.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use shardlink::prelude::*;
use shardlink_protocol::GroupOwnerEntry;
use shardlink_session::VoiceConfig;

// =========================================================================
// Test collaborators
// =========================================================================

const ME: SessionId = SessionId(1);
const ROOM: LocationId = LocationId(0x21);

fn conn() -> ConnectionId {
    ConnectionId::new(1)
}

struct TestObject {
    group: LocationId,
    physical: bool,
    loaded: bool,
    toucher: Option<SessionId>,
    applied: Vec<StateRecord>,
}

/// Map-backed world. Objects can be registered unloaded and paged in later.
#[derive(Default)]
struct MapWorld {
    objects: Vec<TestObject>,
    index: HashMap<Uoid, usize>,
    missing_from_dataset: HashSet<Uoid>,
}

impl MapWorld {
    fn add(&mut self, name: &str, group: LocationId, physical: bool, loaded: bool) -> Uoid {
        let uoid = Uoid::new(ROOM, 1, name);
        self.index.insert(uoid.clone(), self.objects.len());
        self.objects.push(TestObject {
            group,
            physical,
            loaded,
            toucher: None,
            applied: Vec::new(),
        });
        uoid
    }

    fn object(&self, uoid: &Uoid) -> &TestObject {
        &self.objects[self.index[uoid]]
    }

    fn load(&mut self, uoid: &Uoid) {
        let idx = self.index[uoid];
        self.objects[idx].loaded = true;
    }
}

impl WorldObjectStore for MapWorld {
    fn resolve_object(&self, uoid: &Uoid) -> Option<ObjectHandle> {
        let idx = *self.index.get(uoid)?;
        self.objects[idx]
            .loaded
            .then_some(ObjectHandle(idx as u64))
    }

    fn is_known(&self, uoid: &Uoid) -> bool {
        !self.missing_from_dataset.contains(uoid)
    }

    fn object_group(&self, handle: ObjectHandle) -> LocationId {
        self.objects[handle.0 as usize].group
    }

    fn is_physical(&self, handle: ObjectHandle) -> bool {
        self.objects[handle.0 as usize].physical
    }

    fn last_toucher(&self, handle: ObjectHandle) -> Option<SessionId> {
        self.objects[handle.0 as usize].toucher
    }

    fn record_touch(&mut self, handle: ObjectHandle, toucher: SessionId) {
        self.objects[handle.0 as usize].toucher = Some(toucher);
    }

    fn apply_state(&mut self, handle: ObjectHandle, state: &StateRecord) -> Result<(), WorldError> {
        let object = &mut self.objects[handle.0 as usize];
        if state.descriptor == "Broken" {
            return Err(WorldError::StateRejected {
                descriptor: state.descriptor.clone(),
                reason: "unsupported version".into(),
            });
        }
        object.applied.push(state.clone());
        Ok(())
    }
}

/// Proximity source whose sample the test can change between ticks.
#[derive(Clone, Default)]
struct SharedProximity(Arc<Mutex<Option<ProximitySample>>>);

impl SharedProximity {
    /// Listener at the origin, each participant at `(distance, 0, 0)`.
    fn place(&self, participants: &[(u32, f32)]) {
        let sample = ProximitySample {
            listener: Position::default(),
            candidates: participants
                .iter()
                .map(|(id, d)| (SessionId(*id), Position::new(*d, 0.0, 0.0)))
                .collect(),
        };
        *self.0.lock().unwrap() = Some(sample);
    }
}

impl ProximitySource for SharedProximity {
    fn sample(&self) -> Option<ProximitySample> {
        self.0.lock().unwrap().clone()
    }
}

type TestDispatcher = SessionDispatcher<LoopbackTransport, MapWorld, DiagnosticLog>;

// =========================================================================
// Helpers
// =========================================================================

fn dispatcher_with(config: SessionConfig) -> TestDispatcher {
    SessionDispatcher::new(
        ME,
        LoopbackTransport::new(),
        MapWorld::default(),
        DiagnosticLog::new(),
        config,
    )
}

/// Joined and acknowledged, with the join traffic and events cleared.
fn joined(config: SessionConfig) -> TestDispatcher {
    let mut d = dispatcher_with(config);
    d.join(conn(), "Cleft").unwrap();
    deliver(&mut d, SessionMessage::JoinAck { session: ME });
    d.tick(0.0);
    d.transport_mut().take_sent();
    d.drain_events();
    d
}

fn deliver(d: &mut TestDispatcher, message: SessionMessage) {
    let bytes = message.encode().unwrap();
    d.transport_mut().push_inbound(conn(), bytes);
}

fn sent(d: &mut TestDispatcher) -> Vec<SessionMessage> {
    d.transport_mut()
        .take_sent()
        .into_iter()
        .map(|(_, bytes)| SessionMessage::decode(&bytes).unwrap())
        .collect()
}

fn state(descriptor: &str) -> StateRecord {
    StateRecord::new(descriptor, vec![1, 2, 3])
}

fn sdl(object: &Uoid, initial: bool, descriptor: &str) -> SessionMessage {
    SessionMessage::SdlState {
        object: object.clone(),
        origin: Some(SessionId(9)),
        initial,
        state: state(descriptor),
    }
}

fn add_members(d: &mut TestDispatcher, members: &[u32]) {
    for id in members {
        deliver(
            d,
            SessionMessage::MemberUpdate {
                member: SessionId(*id),
                joined: true,
            },
        );
    }
}

fn set_room_owner(d: &mut TestDispatcher, owned: bool) {
    deliver(
        d,
        SessionMessage::GroupOwner {
            groups: vec![GroupOwnerEntry {
                location: ROOM,
                owned,
            }],
        },
    );
}

// =========================================================================
// Join / leave
// =========================================================================

#[test]
fn test_join_sends_request_and_installs_default_groups() {
    let mut d = dispatcher_with(SessionConfig::default());
    d.join(conn(), "Cleft").unwrap();

    assert_eq!(
        sent(&mut d),
        vec![SessionMessage::JoinRequest {
            session: ME,
            age: "Cleft".into(),
        }]
    );
    let ctx = d.context().unwrap();
    assert_eq!(ctx.phase(), SessionPhase::Joining);
    assert_eq!(ctx.registry().ownership_of(LocationId::LOCAL_PLAYER), Ownership::Yes);
    assert_eq!(ctx.registry().ownership_of(LocationId::LOCAL_PHYSICALS), Ownership::Yes);
    assert_eq!(ctx.registry().ownership_of(LocationId::REMOTE_PLAYER), Ownership::No);
    assert_eq!(ctx.registry().ownership_of(LocationId::REMOTE_PHYSICALS), Ownership::No);
    assert_eq!(ctx.registry().ownership_of(ROOM), Ownership::Unknown);
}

#[test]
fn test_join_ack_marks_session_playing() {
    let mut d = dispatcher_with(SessionConfig::default());
    d.join(conn(), "Cleft").unwrap();
    deliver(&mut d, SessionMessage::JoinAck { session: ME });

    d.tick(0.0);

    assert!(d.is_playing());
    assert_eq!(d.drain_events(), vec![SessionEvent::Joined { session: ME }]);
}

#[test]
fn test_join_ack_for_other_session_is_dropped() {
    let mut d = dispatcher_with(SessionConfig::default());
    d.join(conn(), "Cleft").unwrap();
    deliver(&mut d, SessionMessage::JoinAck { session: SessionId(99) });

    d.tick(0.0);

    assert!(!d.is_playing());
    assert_eq!(d.diagnostics().count(DiagnosticCategory::DroppedMessage), 1);
}

#[test]
fn test_rejoin_starts_from_fresh_registry() {
    let mut d = joined(SessionConfig::default());
    set_room_owner(&mut d, true);
    d.tick(0.1);
    assert_eq!(d.context().unwrap().registry().ownership_of(ROOM), Ownership::Yes);

    d.join(conn(), "Teledahn").unwrap();

    let ctx = d.context().unwrap();
    assert_eq!(ctx.age(), "Teledahn");
    assert_eq!(ctx.registry().ownership_of(ROOM), Ownership::Unknown);
    assert!(d.drain_events().contains(&SessionEvent::Left));
}

#[test]
fn test_leave_discards_pending_and_destroys_context() {
    let mut d = joined(SessionConfig::default());
    let a = d.world_mut().add("A", ROOM, false, false);
    let b = d.world_mut().add("B", ROOM, false, false);
    deliver(&mut d, sdl(&a, false, "Door"));
    deliver(&mut d, sdl(&b, false, "Door"));
    d.tick(0.1);
    assert_eq!(d.context().unwrap().pending().len(), 2);

    assert!(d.leave());

    assert!(d.context().is_none());
    assert_eq!(d.diagnostics().count(DiagnosticCategory::PendingDiscarded), 2);
    assert_eq!(d.diagnostics().pending_dropped(), 2);
    assert_eq!(d.drain_events(), vec![SessionEvent::Left]);
    assert!(!d.leave());
}

// =========================================================================
// Inbound robustness
// =========================================================================

#[test]
fn test_decode_error_is_reported_and_session_continues() {
    let mut d = joined(SessionConfig::default());
    d.transport_mut().push_inbound(conn(), vec![0xFF, 0xFF]);
    d.transport_mut().push_inbound(conn(), vec![6, 0, 2]); // truncated MemberUpdate
    add_members(&mut d, &[2]);

    d.tick(0.1);

    assert_eq!(d.diagnostics().count(DiagnosticCategory::DecodeError), 2);
    assert_eq!(d.drain_events(), vec![SessionEvent::MemberJoined(SessionId(2))]);
    assert!(d.is_playing());
}

#[test]
fn test_message_before_join_is_dropped() {
    let mut d = dispatcher_with(SessionConfig::default());
    deliver(&mut d, SessionMessage::InitialStateCount { count: 3 });

    d.tick(0.0);

    assert_eq!(d.diagnostics().count(DiagnosticCategory::DroppedMessage), 1);
    assert!(d.drain_events().is_empty());
}

#[test]
fn test_message_on_other_connection_is_dropped() {
    let mut d = joined(SessionConfig::default());
    let bytes = SessionMessage::MemberUpdate {
        member: SessionId(2),
        joined: true,
    }
    .encode()
    .unwrap();
    d.transport_mut().push_inbound(ConnectionId::new(42), bytes);

    d.tick(0.1);

    assert_eq!(d.diagnostics().count(DiagnosticCategory::DroppedMessage), 1);
    assert!(d.context().unwrap().members().is_empty());
}

#[test]
fn test_inbound_join_request_is_dropped() {
    let mut d = joined(SessionConfig::default());
    deliver(
        &mut d,
        SessionMessage::JoinRequest {
            session: SessionId(5),
            age: "Cleft".into(),
        },
    );

    d.tick(0.1);

    assert_eq!(d.diagnostics().count(DiagnosticCategory::DroppedMessage), 1);
}

#[test]
fn test_game_message_becomes_event() {
    let mut d = joined(SessionConfig::default());
    deliver(
        &mut d,
        SessionMessage::GameMessage {
            sender: SessionId(3),
            payload: b"hello".to_vec(),
        },
    );

    d.tick(0.1);

    assert_eq!(
        d.drain_events(),
        vec![SessionEvent::GameMessage {
            sender: SessionId(3),
            payload: b"hello".to_vec(),
        }]
    );
}

// =========================================================================
// Groups and ownership
// =========================================================================

#[test]
fn test_group_owner_updates_registry_and_ownership() {
    let mut d = joined(SessionConfig::default());
    let door = d.world_mut().add("Door", ROOM, false, true);
    let door_ref = SimulatedObjectRef::new(door);

    set_room_owner(&mut d, true);
    d.tick(0.1);
    assert_eq!(d.is_locally_owned(&door_ref), Ownership::Yes);
    assert_eq!(
        d.drain_events(),
        vec![SessionEvent::GroupOwnershipChanged {
            location: ROOM,
            owned: true,
        }]
    );

    set_room_owner(&mut d, false);
    set_room_owner(&mut d, false);
    d.tick(0.2);
    assert_eq!(d.is_locally_owned(&door_ref), Ownership::No);
    assert_eq!(d.drain_events().len(), 1);
    assert_eq!(d.context().unwrap().registry().len(), 5);
}

#[test]
fn test_group_owner_for_default_group_is_policy_violation() {
    let mut d = joined(SessionConfig::default());
    deliver(
        &mut d,
        SessionMessage::GroupOwner {
            groups: vec![GroupOwnerEntry {
                location: LocationId::LOCAL_PLAYER,
                owned: false,
            }],
        },
    );

    d.tick(0.1);

    assert_eq!(d.diagnostics().count(DiagnosticCategory::PolicyViolation), 1);
    assert_eq!(
        d.context().unwrap().registry().ownership_of(LocationId::LOCAL_PLAYER),
        Ownership::Yes
    );
}

#[test]
fn test_remote_touch_takes_physical_object_from_owned_group() {
    let mut d = joined(SessionConfig::default());
    let ball = d.world_mut().add("Ball", ROOM, true, true);
    let ball_ref = SimulatedObjectRef::new(ball.clone());
    set_room_owner(&mut d, true);
    d.tick(0.1);
    assert_eq!(d.is_locally_owned(&ball_ref), Ownership::Yes);

    deliver(
        &mut d,
        SessionMessage::ObjectTouched {
            object: ball.clone(),
            toucher: SessionId(2),
        },
    );
    d.tick(0.2);

    assert_eq!(d.is_locally_owned(&ball_ref), Ownership::No);
}

#[test]
fn test_record_local_touch_claims_object_and_broadcasts() {
    let mut d = joined(SessionConfig::default());
    let ball = d.world_mut().add("Ball", ROOM, true, true);
    let ball_ref = SimulatedObjectRef::new(ball.clone());
    set_room_owner(&mut d, false);
    d.tick(0.1);
    assert_eq!(d.is_locally_owned(&ball_ref), Ownership::No);

    assert!(d.record_local_touch(&ball).unwrap());

    assert_eq!(d.is_locally_owned(&ball_ref), Ownership::Yes);
    assert_eq!(
        sent(&mut d),
        vec![SessionMessage::ObjectTouched {
            object: ball,
            toucher: ME,
        }]
    );
}

#[test]
fn test_record_local_touch_on_unloaded_object_does_nothing() {
    let mut d = joined(SessionConfig::default());
    let ball = d.world_mut().add("Ball", ROOM, true, false);

    assert!(!d.record_local_touch(&ball).unwrap());
    assert!(sent(&mut d).is_empty());
}

#[test]
fn test_networking_disabled_owns_everything() {
    let mut d = dispatcher_with(SessionConfig::default());
    d.set_networking_enabled(false);
    let ghost = SimulatedObjectRef::new(Uoid::new(ROOM, 1, "Ghost"));

    assert_eq!(d.is_locally_owned(&ghost), Ownership::Yes);
}

#[test]
fn test_ownership_without_session_is_unknown() {
    let mut d = dispatcher_with(SessionConfig::default());
    let door = d.world_mut().add("Door", LocationId::LOCAL_PLAYER, false, true);

    assert_eq!(d.is_locally_owned(&SimulatedObjectRef::new(door)), Ownership::Unknown);
}

// =========================================================================
// Outbound state
// =========================================================================

#[test]
fn test_send_state_only_when_locally_owned() {
    let mut d = joined(SessionConfig::default());
    let door = d.world_mut().add("Door", ROOM, false, true);
    let door_ref = SimulatedObjectRef::new(door.clone());

    set_room_owner(&mut d, false);
    d.tick(0.1);
    assert_eq!(d.send_state(&door_ref, state("Door")).unwrap(), Ownership::No);
    assert!(sent(&mut d).is_empty());
    assert_eq!(d.diagnostics().count(DiagnosticCategory::PolicyViolation), 1);

    set_room_owner(&mut d, true);
    d.tick(0.2);
    assert_eq!(d.send_state(&door_ref, state("Door")).unwrap(), Ownership::Yes);
    assert_eq!(
        sent(&mut d),
        vec![SessionMessage::SdlState {
            object: door,
            origin: Some(ME),
            initial: false,
            state: state("Door"),
        }]
    );
}

#[test]
fn test_send_before_join_is_not_joined_error() {
    let mut d = dispatcher_with(SessionConfig::default());
    let door = d.world_mut().add("Door", ROOM, false, true);

    let result = d.send_state(&SimulatedObjectRef::new(door), state("Door"));
    assert!(matches!(result, Err(ShardlinkError::NotJoined)));
    assert!(matches!(
        d.send_game_message(vec![1]),
        Err(ShardlinkError::NotJoined)
    ));
}

#[test]
fn test_send_on_closed_connection_is_transport_error() {
    let mut d = joined(SessionConfig::default());
    d.transport_mut().close(conn());

    let result = d.send_game_message(vec![1, 2]);
    assert!(matches!(result, Err(ShardlinkError::Transport(_))));
}

// =========================================================================
// Inbound state and the pending queue
// =========================================================================

#[test]
fn test_state_for_loaded_object_applies_on_arrival() {
    let mut d = joined(SessionConfig::default());
    let door = d.world_mut().add("Door", ROOM, false, true);
    deliver(&mut d, sdl(&door, false, "Door"));

    d.tick(0.1);

    assert_eq!(d.world().object(&door).applied, vec![state("Door")]);
    assert_eq!(
        d.drain_events(),
        vec![SessionEvent::StateApplied {
            object: door,
            origin: Some(SessionId(9)),
        }]
    );
    assert!(d.context().unwrap().pending().is_empty());
}

#[test]
fn test_state_waits_until_object_pages_in_then_applies_once() {
    let mut d = joined(SessionConfig::default());
    let door = d.world_mut().add("Door", ROOM, false, false);
    deliver(&mut d, sdl(&door, false, "Door"));

    d.tick(0.1);
    d.tick(0.2);
    assert_eq!(d.context().unwrap().pending().len(), 1);
    assert!(d.world().object(&door).applied.is_empty());

    d.world_mut().load(&door);
    d.tick(0.3);
    d.tick(0.4);

    assert_eq!(d.world().object(&door).applied.len(), 1);
    assert!(d.context().unwrap().pending().is_empty());
    let applied = d
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::StateApplied { .. }))
        .count();
    assert_eq!(applied, 1);
}

#[test]
fn test_pending_state_times_out_with_one_report() {
    let mut config = SessionConfig::default();
    config.pending.max_queue_resets = 3;
    let mut d = joined(config);
    let door = d.world_mut().add("Door", ROOM, false, false);
    deliver(&mut d, sdl(&door, false, "Door"));

    for i in 1..=10 {
        d.tick(f64::from(i) * 0.1);
    }

    assert!(d.context().unwrap().pending().is_empty());
    assert_eq!(d.diagnostics().count(DiagnosticCategory::PendingTimeout), 1);
}

#[test]
fn test_state_for_object_missing_from_dataset_is_discarded() {
    let mut d = joined(SessionConfig::default());
    let ghost = Uoid::new(ROOM, 1, "Ghost");
    d.world_mut().missing_from_dataset.insert(ghost.clone());
    deliver(&mut d, sdl(&ghost, false, "Door"));

    d.tick(0.1);

    assert!(d.context().unwrap().pending().is_empty());
    assert_eq!(d.diagnostics().count(DiagnosticCategory::PendingDiscarded), 1);
}

#[test]
fn test_rejected_state_is_reported_and_not_retried() {
    let mut d = joined(SessionConfig::default());
    let door = d.world_mut().add("Door", ROOM, false, true);
    deliver(&mut d, sdl(&door, false, "Broken"));

    d.tick(0.1);
    d.tick(0.2);

    assert_eq!(d.diagnostics().count(DiagnosticCategory::StateRejected), 1);
    assert!(d.context().unwrap().pending().is_empty());
}

#[test]
fn test_initial_state_gates_regular_state_until_complete() {
    let mut d = joined(SessionConfig::default());
    let door = d.world_mut().add("Door", ROOM, false, true);
    let lamp = d.world_mut().add("Lamp", ROOM, false, true);

    deliver(&mut d, SessionMessage::InitialStateCount { count: 2 });
    deliver(&mut d, sdl(&door, false, "Door"));
    deliver(&mut d, sdl(&door, true, "Door"));
    deliver(&mut d, sdl(&lamp, true, "Lamp"));
    deliver(&mut d, sdl(&lamp, false, "Lamp"));
    d.tick(0.1);

    assert_eq!(d.diagnostics().count(DiagnosticCategory::DroppedMessage), 1);
    assert_eq!(d.world().object(&door).applied.len(), 1);
    assert_eq!(d.world().object(&lamp).applied.len(), 2);
    assert!(d.context().unwrap().initial_state().complete);
    assert!(
        d.drain_events()
            .contains(&SessionEvent::InitialStateComplete { count: 2 })
    );
}

#[test]
fn test_initial_state_count_zero_completes_at_once() {
    let mut d = joined(SessionConfig::default());
    deliver(&mut d, SessionMessage::InitialStateCount { count: 0 });

    d.tick(0.1);

    assert_eq!(
        d.drain_events(),
        vec![SessionEvent::InitialStateComplete { count: 0 }]
    );
}

// =========================================================================
// Voice
// =========================================================================

fn voice_config(cap: Option<usize>, max_dist_sq: f32) -> SessionConfig {
    SessionConfig {
        voice: VoiceConfig {
            max_listen_list_size: cap,
            max_listen_dist_sq: max_dist_sq,
            update_interval: 0.5,
            force_resync_interval: 1_000.0,
            max_updates_before_force: 10,
        },
        ..SessionConfig::default()
    }
}

fn joined_with_proximity(config: SessionConfig, proximity: &SharedProximity) -> TestDispatcher {
    let mut d = dispatcher_with(config).with_proximity(proximity.clone());
    d.join(conn(), "Cleft").unwrap();
    deliver(&mut d, SessionMessage::JoinAck { session: ME });
    d.tick(0.0);
    d.transport_mut().take_sent();
    d.drain_events();
    d
}

#[test]
fn test_join_then_four_participants_hears_three_closest() {
    let proximity = SharedProximity::default();
    let mut d = joined_with_proximity(voice_config(Some(3), 36.0), &proximity);
    add_members(&mut d, &[2, 3, 4, 5]);
    proximity.place(&[(2, 2.0), (3, 4.0), (4, 6.0), (5, 9.0)]);

    d.tick(1.0);

    assert_eq!(d.listen_members(), &[SessionId(2), SessionId(3), SessionId(4)]);
    assert_eq!(
        sent(&mut d),
        vec![SessionMessage::ListenListUpdate {
            sender: ME,
            action: ListenAction::Replace,
            receivers: vec![SessionId(2), SessionId(3), SessionId(4)],
        }]
    );
}

#[test]
fn test_proximity_ignores_unknown_participants() {
    let proximity = SharedProximity::default();
    let mut d = joined_with_proximity(voice_config(None, 100.0), &proximity);
    add_members(&mut d, &[2]);
    proximity.place(&[(2, 1.0), (7, 1.0), (1, 0.0)]);

    d.tick(1.0);

    assert_eq!(d.listen_members(), &[SessionId(2)]);
}

#[test]
fn test_participant_walking_away_is_removed_next_sample() {
    let proximity = SharedProximity::default();
    let mut d = joined_with_proximity(voice_config(None, 36.0), &proximity);
    add_members(&mut d, &[2, 3]);
    proximity.place(&[(2, 2.0), (3, 4.0)]);
    d.tick(1.0);
    sent(&mut d);

    proximity.place(&[(2, 2.0), (3, 40.0)]);
    d.tick(1.2);
    assert!(sent(&mut d).is_empty(), "sample not due yet");

    d.tick(1.6);
    assert_eq!(d.listen_members(), &[SessionId(2)]);
    assert_eq!(
        sent(&mut d),
        vec![SessionMessage::ListenListUpdate {
            sender: ME,
            action: ListenAction::Remove,
            receivers: vec![SessionId(3)],
        }]
    );
}

#[test]
fn test_listen_update_addressed_to_us_updates_talk_list() {
    let mut d = joined(SessionConfig::default());
    add_members(&mut d, &[2, 3]);
    deliver(
        &mut d,
        SessionMessage::ListenListUpdate {
            sender: SessionId(2),
            action: ListenAction::Add,
            receivers: vec![ME, SessionId(3)],
        },
    );
    deliver(
        &mut d,
        SessionMessage::ListenListUpdate {
            sender: SessionId(3),
            action: ListenAction::Add,
            receivers: vec![SessionId(2)],
        },
    );

    d.tick(0.1);

    assert_eq!(d.talk_members(), &[SessionId(2)]);
    assert!(
        d.drain_events()
            .contains(&SessionEvent::TalkListChanged {
                members: vec![SessionId(2)],
            })
    );

    d.tick(0.2);
    assert!(d.drain_events().is_empty(), "talk list flushed only once");
}

#[test]
fn test_listen_update_from_unknown_sender_is_dropped() {
    let mut d = joined(SessionConfig::default());
    deliver(
        &mut d,
        SessionMessage::ListenListUpdate {
            sender: SessionId(8),
            action: ListenAction::Add,
            receivers: vec![ME],
        },
    );

    d.tick(0.1);

    assert!(d.talk_members().is_empty());
    assert_eq!(d.diagnostics().count(DiagnosticCategory::DroppedMessage), 1);
}

#[test]
fn test_member_leaving_drops_from_voice_lists() {
    let mut d = joined(SessionConfig::default());
    add_members(&mut d, &[2]);
    deliver(
        &mut d,
        SessionMessage::ListenListUpdate {
            sender: SessionId(2),
            action: ListenAction::Add,
            receivers: vec![ME],
        },
    );
    d.tick(0.1);
    assert_eq!(d.talk_members(), &[SessionId(2)]);

    deliver(
        &mut d,
        SessionMessage::MemberUpdate {
            member: SessionId(2),
            joined: false,
        },
    );
    d.tick(0.2);

    assert!(d.talk_members().is_empty());
    assert!(d.context().unwrap().members().is_empty());
    assert!(d.drain_events().contains(&SessionEvent::MemberLeft(SessionId(2))));
}

#[test]
fn test_forced_listen_sends_list_and_stops_sampling() {
    let proximity = SharedProximity::default();
    let mut d = joined_with_proximity(voice_config(None, 100.0), &proximity);
    add_members(&mut d, &[2, 3]);
    proximity.place(&[(2, 1.0)]);

    d.set_forced_listen(Some(vec![SessionId(3)])).unwrap();
    assert_eq!(
        sent(&mut d),
        vec![SessionMessage::ListenListUpdate {
            sender: ME,
            action: ListenAction::Replace,
            receivers: vec![SessionId(3)],
        }]
    );

    d.tick(5.0);
    assert_eq!(d.listen_members(), &[SessionId(3)]);
    assert!(sent(&mut d).is_empty());
}

#[test]
fn test_failed_voice_send_is_reported_not_fatal() {
    let proximity = SharedProximity::default();
    let mut d = joined_with_proximity(voice_config(None, 100.0), &proximity);
    add_members(&mut d, &[2]);
    proximity.place(&[(2, 1.0)]);
    d.transport_mut().close(conn());

    d.tick(1.0);

    assert_eq!(d.diagnostics().count(DiagnosticCategory::SendFailed), 1);
    assert_eq!(d.listen_members(), &[SessionId(2)]);
}

#[test]
fn test_failed_voice_send_skips_synced_event_and_resyncs_next_sample() {
    let proximity = SharedProximity::default();
    let mut d = joined_with_proximity(voice_config(None, 100.0), &proximity);
    add_members(&mut d, &[2, 3]);
    proximity.place(&[(2, 1.0)]);
    d.tick(1.0);
    sent(&mut d);
    d.drain_events();

    proximity.place(&[(2, 1.0), (3, 2.0)]);
    d.transport_mut().close(conn());
    d.tick(1.5);

    assert_eq!(d.diagnostics().count(DiagnosticCategory::SendFailed), 1);
    assert!(
        !d.drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::ListenListSynced { .. }))
    );
    assert!(d.context().unwrap().voice().listen_list().resync_requested());

    d.transport_mut().reopen(conn());
    d.tick(2.0);

    assert_eq!(
        sent(&mut d),
        vec![SessionMessage::ListenListUpdate {
            sender: ME,
            action: ListenAction::Replace,
            receivers: vec![SessionId(2), SessionId(3)],
        }]
    );
    assert!(d.drain_events().contains(&SessionEvent::ListenListSynced {
        full_resync: true,
        members: vec![SessionId(2), SessionId(3)],
    }));
}

/// Joined and acknowledged as `local`, with the join traffic cleared.
fn joined_as(local: SessionId) -> TestDispatcher {
    let mut d = SessionDispatcher::new(
        local,
        LoopbackTransport::new(),
        MapWorld::default(),
        DiagnosticLog::new(),
        SessionConfig::default(),
    );
    d.join(conn(), "Cleft").unwrap();
    deliver(&mut d, SessionMessage::JoinAck { session: local });
    d.tick(0.0);
    d.transport_mut().take_sent();
    d.drain_events();
    d
}

/// Hands everything `from` sent to `to`, as a server would.
fn relay(from: &mut TestDispatcher, to: &mut TestDispatcher) {
    for message in sent(from) {
        deliver(to, message);
    }
}

#[test]
fn test_full_resync_repairs_lost_removal_at_listener() {
    let proximity = SharedProximity::default();
    let mut config = voice_config(None, 36.0);
    config.voice.max_updates_before_force = 1;
    let mut a = joined_with_proximity(config, &proximity);
    add_members(&mut a, &[2]);
    let mut b = joined_as(SessionId(2));
    add_members(&mut b, &[1]);
    b.tick(0.1);

    proximity.place(&[(2, 2.0)]);
    a.tick(1.0);
    relay(&mut a, &mut b);
    b.tick(1.0);
    assert_eq!(b.talk_members(), &[ME]);
    b.drain_events();

    // The removal is lost on the way.
    proximity.place(&[(2, 40.0)]);
    a.tick(1.5);
    assert_eq!(
        sent(&mut a),
        vec![SessionMessage::ListenListUpdate {
            sender: ME,
            action: ListenAction::Remove,
            receivers: vec![SessionId(2)],
        }]
    );
    b.tick(1.5);
    assert_eq!(b.talk_members(), &[ME]);

    a.tick(2.0);
    assert_eq!(
        a.transport_mut().sent().len(),
        1,
        "an empty full resync still goes on the wire"
    );
    relay(&mut a, &mut b);
    b.tick(2.0);

    assert!(b.talk_members().is_empty());
    assert!(
        b.drain_events()
            .contains(&SessionEvent::TalkListChanged { members: vec![] })
    );
}

#[test]
fn test_replace_listen_update_without_us_removes_sender_from_talk_list() {
    let mut d = joined(SessionConfig::default());
    add_members(&mut d, &[2, 3]);
    deliver(
        &mut d,
        SessionMessage::ListenListUpdate {
            sender: SessionId(2),
            action: ListenAction::Add,
            receivers: vec![ME],
        },
    );
    d.tick(0.1);
    assert_eq!(d.talk_members(), &[SessionId(2)]);

    deliver(
        &mut d,
        SessionMessage::ListenListUpdate {
            sender: SessionId(2),
            action: ListenAction::Replace,
            receivers: vec![SessionId(3)],
        },
    );
    deliver(
        &mut d,
        SessionMessage::ListenListUpdate {
            sender: SessionId(3),
            action: ListenAction::Replace,
            receivers: vec![ME],
        },
    );
    d.tick(0.2);

    assert_eq!(d.talk_members(), &[SessionId(3)]);
}
