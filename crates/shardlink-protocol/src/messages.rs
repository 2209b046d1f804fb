//! Typed session messages for the `cli2game` protocol.
//!
//! [`SessionMessage`] is a sum type: one variant per message id. The
//! dispatcher matches on it exhaustively, so adding a message means adding a
//! variant here, a descriptor in [`session_schema`], and the compiler then
//! points at every `match` that has to learn about it.
//!
//! Conversion is two-step:
//!
//! ```text
//! bytes ⇄ WireMessage (generic, framing.rs) ⇄ SessionMessage (typed, here)
//! ```

use std::sync::LazyLock;

use crate::framing::{
    FieldDescriptor, FieldValue, IntWidth, MessageDescriptor, ProtocolSchema, WireMessage,
};
use crate::{LocationId, ProtocolError, SessionId, Uoid};

/// Name of the client ↔ game-server protocol.
pub const PROTOCOL_NAME: &str = "cli2game";

/// Message-type ids. Stable: new ids may be added, existing ids never move.
pub mod ids {
    pub const JOIN_REQUEST: u16 = 1;
    pub const JOIN_ACK: u16 = 2;
    pub const GROUP_OWNER: u16 = 3;
    pub const OBJECT_TOUCHED: u16 = 4;
    pub const LISTEN_LIST_UPDATE: u16 = 5;
    pub const MEMBER_UPDATE: u16 = 6;
    pub const SDL_STATE: u16 = 7;
    pub const INITIAL_STATE_COUNT: u16 = 8;
    pub const GAME_MESSAGE: u16 = 9;
}

/// Capacity of object-name and age-name string fields (63 bytes + NUL).
pub const NAME_CAPACITY: usize = 64;
/// Capacity of the state-descriptor name field.
pub const DESCRIPTOR_CAPACITY: usize = 32;
/// Most group entries one `GroupOwner` message may carry.
pub const MAX_GROUP_ENTRIES: u32 = 256;
/// Most receivers one `ListenListUpdate` message may carry.
pub const MAX_LISTEN_RECEIVERS: u32 = 64;
/// Largest state or game-message payload, in bytes.
pub const MAX_PAYLOAD_LEN: u32 = 65_536;

const GROUP_ENTRY_SIZE: usize = 5;
const SESSION_ID_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// Message payload types
// ---------------------------------------------------------------------------

/// A persisted state record: which state descriptor it follows, plus the
/// opaque encoded state. The session core never looks inside `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub descriptor: String,
    pub payload: Vec<u8>,
}

impl StateRecord {
    pub fn new(descriptor: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            descriptor: descriptor.into(),
            payload,
        }
    }
}

/// One entry of a [`SessionMessage::GroupOwner`] message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupOwnerEntry {
    pub location: LocationId,
    pub owned: bool,
}

/// What a [`SessionMessage::ListenListUpdate`] does to the sender's entry
/// in each receiver's talk list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenAction {
    /// Receivers stop hearing from the sender.
    Remove,
    /// Receivers start hearing from the sender.
    Add,
    /// The receivers are the sender's whole listen list: listed sessions
    /// hear the sender, every other session stops hearing it.
    Replace,
}

impl ListenAction {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Remove => 0,
            Self::Add => 1,
            Self::Replace => 2,
        }
    }
}

impl TryFrom<u64> for ListenAction {
    type Error = ProtocolError;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Remove),
            1 => Ok(Self::Add),
            2 => Ok(Self::Replace),
            other => Err(ProtocolError::InvalidMessage(format!(
                "field `action` value {other} is not a listen action"
            ))),
        }
    }
}

/// Every message of the `cli2game` protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    /// Client → server: join the named age.
    JoinRequest { session: SessionId, age: String },

    /// Server → client: the join was accepted.
    JoinAck { session: SessionId },

    /// Server → client: ownership of one or more network groups changed.
    GroupOwner { groups: Vec<GroupOwnerEntry> },

    /// Either direction: `toucher` produced a physics-affecting interaction
    /// with `object`.
    ObjectTouched { object: Uoid, toucher: SessionId },

    /// Either direction: `sender` changed whom it listens to. See
    /// [`ListenAction`] for how `receivers` is read.
    ListenListUpdate {
        sender: SessionId,
        action: ListenAction,
        receivers: Vec<SessionId>,
    },

    /// Server → client: a remote participant joined or left the session.
    MemberUpdate { member: SessionId, joined: bool },

    /// Either direction: persisted state for one object.
    SdlState {
        object: Uoid,
        origin: Option<SessionId>,
        initial: bool,
        state: StateRecord,
    },

    /// Server → client: how many initial state records will follow the join.
    InitialStateCount { count: u32 },

    /// Either direction: an opaque application message.
    GameMessage { sender: SessionId, payload: Vec<u8> },
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

static SESSION_SCHEMA: LazyLock<ProtocolSchema> = LazyLock::new(build_session_schema);

/// The `cli2game` schema, built once on first use.
pub fn session_schema() -> &'static ProtocolSchema {
    &SESSION_SCHEMA
}

fn object_fields() -> [FieldDescriptor; 3] {
    [
        FieldDescriptor::u32("location"),
        FieldDescriptor::u16("class_type"),
        FieldDescriptor::string("name", NAME_CAPACITY),
    ]
}

fn build_session_schema() -> ProtocolSchema {
    let [location, class_type, name] = object_fields();

    ProtocolSchema::new(PROTOCOL_NAME)
        .with(MessageDescriptor::new(
            ids::JOIN_REQUEST,
            "JoinRequest",
            vec![
                FieldDescriptor::u32("session"),
                FieldDescriptor::string("age", NAME_CAPACITY),
            ],
        ))
        .with(MessageDescriptor::new(
            ids::JOIN_ACK,
            "JoinAck",
            vec![FieldDescriptor::u32("session")],
        ))
        .with(MessageDescriptor::new(
            ids::GROUP_OWNER,
            "GroupOwner",
            vec![FieldDescriptor::var_array(
                "groups",
                IntWidth::U16,
                GROUP_ENTRY_SIZE,
                0,
                MAX_GROUP_ENTRIES,
            )],
        ))
        .with(MessageDescriptor::new(
            ids::OBJECT_TOUCHED,
            "ObjectTouched",
            vec![location, class_type, name, FieldDescriptor::u32("toucher")],
        ))
        .with(MessageDescriptor::new(
            ids::LISTEN_LIST_UPDATE,
            "ListenListUpdate",
            vec![
                FieldDescriptor::u32("sender"),
                FieldDescriptor::u8("action"),
                FieldDescriptor::var_array(
                    "receivers",
                    IntWidth::U16,
                    SESSION_ID_SIZE,
                    0,
                    MAX_LISTEN_RECEIVERS,
                ),
            ],
        ))
        .with(MessageDescriptor::new(
            ids::MEMBER_UPDATE,
            "MemberUpdate",
            vec![FieldDescriptor::u32("member"), FieldDescriptor::u8("joined")],
        ))
        .with(MessageDescriptor::new(
            ids::SDL_STATE,
            "SdlState",
            vec![
                location,
                class_type,
                name,
                FieldDescriptor::u8("has_origin"),
                FieldDescriptor::u32("origin"),
                FieldDescriptor::u8("initial"),
                FieldDescriptor::string("descriptor", DESCRIPTOR_CAPACITY),
                FieldDescriptor::var_array("payload", IntWidth::U32, 1, 0, MAX_PAYLOAD_LEN),
            ],
        ))
        .with(MessageDescriptor::new(
            ids::INITIAL_STATE_COUNT,
            "InitialStateCount",
            vec![FieldDescriptor::u32("count")],
        ))
        .with(MessageDescriptor::new(
            ids::GAME_MESSAGE,
            "GameMessage",
            vec![
                FieldDescriptor::u32("sender"),
                FieldDescriptor::var_array("payload", IntWidth::U32, 1, 0, MAX_PAYLOAD_LEN),
            ],
        ))
}

// ---------------------------------------------------------------------------
// Typed ⇄ generic conversion
// ---------------------------------------------------------------------------

impl SessionMessage {
    /// The wire id of this message.
    pub fn message_id(&self) -> u16 {
        match self {
            Self::JoinRequest { .. } => ids::JOIN_REQUEST,
            Self::JoinAck { .. } => ids::JOIN_ACK,
            Self::GroupOwner { .. } => ids::GROUP_OWNER,
            Self::ObjectTouched { .. } => ids::OBJECT_TOUCHED,
            Self::ListenListUpdate { .. } => ids::LISTEN_LIST_UPDATE,
            Self::MemberUpdate { .. } => ids::MEMBER_UPDATE,
            Self::SdlState { .. } => ids::SDL_STATE,
            Self::InitialStateCount { .. } => ids::INITIAL_STATE_COUNT,
            Self::GameMessage { .. } => ids::GAME_MESSAGE,
        }
    }

    /// Human-readable message name, for logs.
    pub fn name(&self) -> &'static str {
        session_schema()
            .descriptor(self.message_id())
            .map_or("unknown", |d| d.name)
    }

    /// Encodes into a `cli2game` frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        session_schema().encode(&self.to_wire())
    }

    /// Decodes a `cli2game` frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_wire(session_schema().decode(bytes)?)
    }

    /// Lowers this message to its generic field values.
    pub fn to_wire(&self) -> WireMessage {
        let values = match self {
            Self::JoinRequest { session, age } => {
                vec![int(session.0), FieldValue::Str(age.clone())]
            }

            Self::JoinAck { session } => vec![int(session.0)],

            Self::GroupOwner { groups } => {
                let mut bytes = Vec::with_capacity(groups.len() * GROUP_ENTRY_SIZE);
                for entry in groups {
                    bytes.extend_from_slice(&entry.location.0.to_le_bytes());
                    bytes.push(u8::from(entry.owned));
                }
                vec![FieldValue::Array(bytes)]
            }

            Self::ObjectTouched { object, toucher } => {
                let mut values = uoid_values(object);
                values.push(int(toucher.0));
                values
            }

            Self::ListenListUpdate {
                sender,
                action,
                receivers,
            } => {
                let mut bytes = Vec::with_capacity(receivers.len() * SESSION_ID_SIZE);
                for receiver in receivers {
                    bytes.extend_from_slice(&receiver.0.to_le_bytes());
                }
                vec![int(sender.0), int(action.as_u8()), FieldValue::Array(bytes)]
            }

            Self::MemberUpdate { member, joined } => vec![int(member.0), boolean(*joined)],

            Self::SdlState {
                object,
                origin,
                initial,
                state,
            } => {
                let mut values = uoid_values(object);
                values.push(boolean(origin.is_some()));
                values.push(int(origin.map_or(0, |s| s.0)));
                values.push(boolean(*initial));
                values.push(FieldValue::Str(state.descriptor.clone()));
                values.push(FieldValue::Array(state.payload.clone()));
                values
            }

            Self::InitialStateCount { count } => vec![int(*count)],

            Self::GameMessage { sender, payload } => {
                vec![int(sender.0), FieldValue::Array(payload.clone())]
            }
        };

        WireMessage::new(self.message_id(), values)
    }

    /// Lifts generic field values into the typed message.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownType`] for an id outside this protocol, and
    /// [`ProtocolError::InvalidMessage`] when a value has the wrong kind or
    /// breaks a typed rule (a boolean byte other than 0 or 1).
    pub fn from_wire(msg: WireMessage) -> Result<Self, ProtocolError> {
        let id = msg.id;
        let mut f = Fields::new(msg.values);

        let message = match id {
            ids::JOIN_REQUEST => Self::JoinRequest {
                session: f.session("session")?,
                age: f.string("age")?,
            },

            ids::JOIN_ACK => Self::JoinAck {
                session: f.session("session")?,
            },

            ids::GROUP_OWNER => {
                let bytes = f.array("groups")?;
                let groups = bytes
                    .chunks_exact(GROUP_ENTRY_SIZE)
                    .map(|c| -> Result<GroupOwnerEntry, ProtocolError> {
                        Ok(GroupOwnerEntry {
                            location: LocationId(u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
                            owned: to_bool("owned", u64::from(c[4]))?,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Self::GroupOwner { groups }
            }

            ids::OBJECT_TOUCHED => Self::ObjectTouched {
                object: f.uoid()?,
                toucher: f.session("toucher")?,
            },

            ids::LISTEN_LIST_UPDATE => {
                let sender = f.session("sender")?;
                let action = ListenAction::try_from(f.int("action")?)?;
                let receivers = f
                    .array("receivers")?
                    .chunks_exact(SESSION_ID_SIZE)
                    .map(|c| SessionId(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                    .collect();
                Self::ListenListUpdate {
                    sender,
                    action,
                    receivers,
                }
            }

            ids::MEMBER_UPDATE => Self::MemberUpdate {
                member: f.session("member")?,
                joined: f.boolean("joined")?,
            },

            ids::SDL_STATE => {
                let object = f.uoid()?;
                let has_origin = f.boolean("has_origin")?;
                let origin = f.session("origin")?;
                let initial = f.boolean("initial")?;
                let descriptor = f.string("descriptor")?;
                let payload = f.array("payload")?;
                Self::SdlState {
                    object,
                    origin: has_origin.then_some(origin),
                    initial,
                    state: StateRecord { descriptor, payload },
                }
            }

            ids::INITIAL_STATE_COUNT => Self::InitialStateCount {
                count: f.u32("count")?,
            },

            ids::GAME_MESSAGE => Self::GameMessage {
                sender: f.session("sender")?,
                payload: f.array("payload")?,
            },

            other => {
                return Err(ProtocolError::UnknownType {
                    protocol: PROTOCOL_NAME,
                    id: other,
                });
            }
        };

        f.finish(id)?;
        Ok(message)
    }
}

fn int(v: impl Into<u64>) -> FieldValue {
    FieldValue::Int(v.into())
}

fn boolean(v: bool) -> FieldValue {
    FieldValue::Int(u64::from(v))
}

fn uoid_values(uoid: &Uoid) -> Vec<FieldValue> {
    vec![
        int(uoid.location.0),
        int(uoid.class_type),
        FieldValue::Str(uoid.name.clone()),
    ]
}

fn to_bool(field: &str, v: u64) -> Result<bool, ProtocolError> {
    match v {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtocolError::InvalidMessage(format!(
            "field `{field}` must be 0 or 1, got {other}"
        ))),
    }
}

/// Pulls typed values off a decoded value list in order.
struct Fields {
    values: std::vec::IntoIter<FieldValue>,
}

impl Fields {
    fn new(values: Vec<FieldValue>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    fn next(&mut self, field: &str) -> Result<FieldValue, ProtocolError> {
        self.values
            .next()
            .ok_or_else(|| ProtocolError::InvalidMessage(format!("missing field `{field}`")))
    }

    fn int(&mut self, field: &str) -> Result<u64, ProtocolError> {
        match self.next(field)? {
            FieldValue::Int(v) => Ok(v),
            other => Err(wrong_kind(field, "integer", &other)),
        }
    }

    fn u32(&mut self, field: &str) -> Result<u32, ProtocolError> {
        let v = self.int(field)?;
        u32::try_from(v).map_err(|_| {
            ProtocolError::InvalidMessage(format!("field `{field}` value {v} exceeds u32"))
        })
    }

    fn u16(&mut self, field: &str) -> Result<u16, ProtocolError> {
        let v = self.int(field)?;
        u16::try_from(v).map_err(|_| {
            ProtocolError::InvalidMessage(format!("field `{field}` value {v} exceeds u16"))
        })
    }

    fn session(&mut self, field: &str) -> Result<SessionId, ProtocolError> {
        self.u32(field).map(SessionId)
    }

    fn boolean(&mut self, field: &str) -> Result<bool, ProtocolError> {
        let v = self.int(field)?;
        to_bool(field, v)
    }

    fn string(&mut self, field: &str) -> Result<String, ProtocolError> {
        match self.next(field)? {
            FieldValue::Str(s) => Ok(s),
            other => Err(wrong_kind(field, "string", &other)),
        }
    }

    fn array(&mut self, field: &str) -> Result<Vec<u8>, ProtocolError> {
        match self.next(field)? {
            FieldValue::Array(bytes) => Ok(bytes),
            other => Err(wrong_kind(field, "array", &other)),
        }
    }

    fn uoid(&mut self) -> Result<Uoid, ProtocolError> {
        Ok(Uoid {
            location: LocationId(self.u32("location")?),
            class_type: self.u16("class_type")?,
            name: self.string("name")?,
        })
    }

    fn finish(mut self, id: u16) -> Result<(), ProtocolError> {
        match self.values.next() {
            None => Ok(()),
            Some(_) => Err(ProtocolError::InvalidMessage(format!(
                "message {id} has more values than fields"
            ))),
        }
    }
}

fn wrong_kind(field: &str, expected: &str, got: &FieldValue) -> ProtocolError {
    ProtocolError::InvalidMessage(format!("field `{field}` expected {expected}, got {got:?}"))
}
