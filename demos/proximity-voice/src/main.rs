use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shardlink::prelude::*;
use shardlink_protocol::GroupOwnerEntry;
use tokio::sync::watch;
use tracing::{info, warn};

const ME: SessionId = SessionId(1);
const PLAZA: LocationId = LocationId(0x40);

const CONFIG: &str = r#"{
    "voice": { "max_listen_list_size": 3, "max_listen_dist_sq": 400.0 },
    "pending": { "max_queue_resets": 90 }
}"#;

// ---------------------------------------------------------------------------
// In-memory world
// ---------------------------------------------------------------------------

struct Prop {
    physical: bool,
    loaded: bool,
    toucher: Option<SessionId>,
    states: usize,
}

/// A plaza with a fountain that is always loaded and a cart that pages in
/// a second after joining.
struct Plaza {
    props: Vec<Prop>,
    names: HashMap<Uoid, usize>,
}

impl Plaza {
    fn new() -> Self {
        let mut plaza = Self {
            props: Vec::new(),
            names: HashMap::new(),
        };
        plaza.add("Fountain", false, true);
        plaza.add("Cart", true, false);
        plaza
    }

    fn add(&mut self, name: &str, physical: bool, loaded: bool) {
        self.names.insert(prop(name), self.props.len());
        self.props.push(Prop {
            physical,
            loaded,
            toucher: None,
            states: 0,
        });
    }

    fn page_in(&mut self, name: &str) {
        if let Some(&idx) = self.names.get(&prop(name)) {
            if !self.props[idx].loaded {
                info!(name, "paged in");
                self.props[idx].loaded = true;
            }
        }
    }
}

fn prop(name: &str) -> Uoid {
    Uoid::new(PLAZA, 1, name)
}

impl WorldObjectStore for Plaza {
    fn resolve_object(&self, uoid: &Uoid) -> Option<ObjectHandle> {
        let idx = *self.names.get(uoid)?;
        self.props[idx].loaded.then_some(ObjectHandle(idx as u64))
    }

    fn is_known(&self, uoid: &Uoid) -> bool {
        self.names.contains_key(uoid)
    }

    fn object_group(&self, _: ObjectHandle) -> LocationId {
        PLAZA
    }

    fn is_physical(&self, handle: ObjectHandle) -> bool {
        self.props[handle.0 as usize].physical
    }

    fn last_toucher(&self, handle: ObjectHandle) -> Option<SessionId> {
        self.props[handle.0 as usize].toucher
    }

    fn record_touch(&mut self, handle: ObjectHandle, toucher: SessionId) {
        self.props[handle.0 as usize].toucher = Some(toucher);
    }

    fn apply_state(&mut self, handle: ObjectHandle, _: &StateRecord) -> Result<(), WorldError> {
        self.props[handle.0 as usize].states += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Avatars
// ---------------------------------------------------------------------------

/// Four remote avatars. Avatar 5 walks toward us, avatar 2 walks away.
#[derive(Clone, Default)]
struct Crowd(Arc<Mutex<f64>>);

impl Crowd {
    fn advance(&self, now: f64) {
        if let Ok(mut t) = self.0.lock() {
            *t = now;
        }
    }
}

impl ProximitySource for Crowd {
    fn sample(&self) -> Option<ProximitySample> {
        let t = *self.0.lock().ok()? as f32;
        let at = |x: f32| Position::new(x, 0.0, 0.0);
        Some(ProximitySample {
            listener: Position::default(),
            candidates: vec![
                (SessionId(2), at(3.0 + 8.0 * t)),
                (SessionId(3), at(6.0)),
                (SessionId(4), at(9.0)),
                (SessionId(5), at((30.0 - 10.0 * t).max(1.0))),
            ],
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted server traffic
// ---------------------------------------------------------------------------

fn server_script(connection: ConnectionId, transport: &mut LoopbackTransport) {
    let mut messages = vec![
        SessionMessage::JoinAck { session: ME },
        SessionMessage::GroupOwner {
            groups: vec![GroupOwnerEntry {
                location: PLAZA,
                owned: true,
            }],
        },
        SessionMessage::InitialStateCount { count: 2 },
    ];
    for name in ["Fountain", "Cart"] {
        messages.push(SessionMessage::SdlState {
            object: prop(name),
            origin: None,
            initial: true,
            state: StateRecord::new("PropState", vec![1]),
        });
    }
    for member in 2..=5 {
        messages.push(SessionMessage::MemberUpdate {
            member: SessionId(member),
            joined: true,
        });
    }
    messages.push(SessionMessage::ListenListUpdate {
        sender: SessionId(3),
        action: ListenAction::Add,
        receivers: vec![ME],
    });

    for message in messages {
        match message.encode() {
            Ok(bytes) => transport.push_inbound(connection, bytes),
            Err(e) => warn!(error = %e, "could not encode scripted message"),
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), ShardlinkError> {
    shardlink::init_tracing();

    let config = SessionConfig::from_json(CONFIG).unwrap_or_else(|e| {
        warn!(error = %e, "bad config, using defaults");
        SessionConfig::default()
    });

    let crowd = Crowd::default();
    let connection = ConnectionId::new(1);
    let mut transport = LoopbackTransport::new();
    server_script(connection, &mut transport);

    let mut dispatcher =
        SessionDispatcher::new(ME, transport, Plaza::new(), TracingDiagnostics, config)
            .with_proximity(crowd.clone());
    dispatcher.join(connection, "Plaza")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let _ = shutdown_tx.send(true);
    });

    let mut driver = SessionDriver::new(TickConfig::with_rate(10));
    let ticks = driver
        .run_with(&mut dispatcher, shutdown_rx, |d, tick| {
            crowd.advance(tick.now);
            if tick.now > 1.0 {
                d.world_mut().page_in("Cart");
            }
            for event in d.drain_events() {
                info!(tick = tick.tick, ?event, "session event");
            }
            for (_, bytes) in d.transport_mut().take_sent() {
                if let Ok(message) = SessionMessage::decode(&bytes) {
                    info!(message = message.name(), "to server: {message:?}");
                }
            }
        })
        .await;

    let cart = SimulatedObjectRef::new(prop("Cart"));
    info!(
        ticks,
        listening_to = ?dispatcher.listen_members(),
        heard_by = ?dispatcher.talk_members(),
        cart_owned = %dispatcher.is_locally_owned(&cart),
        "demo finished"
    );

    dispatcher.leave();
    Ok(())
}
