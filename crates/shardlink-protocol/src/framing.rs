//! Declarative wire framing.
//!
//! Every protocol message is described once, as an ordered list of
//! [`FieldDescriptor`]s, and the same generic [`ProtocolSchema::encode`] /
//! [`ProtocolSchema::decode`] pair handles all of them. Nobody writes a
//! per-message parser.
//!
//! # Frame layout
//!
//! ```text
//! ┌──────────────┬─────────┬─────────┬─────┬─────────┐
//! │ id: u16 (LE) │ field 0 │ field 1 │ ... │ field n │
//! └──────────────┴─────────┴─────────┴─────┴─────────┘
//! ```
//!
//! Integers and reals are little-endian and fixed width. Raw buffers and
//! strings occupy exactly their declared size (null-padded). Variable-length
//! arrays are a count (of a declared integer width) immediately followed by
//! `count * element_size` bytes.
//!
//! Decoding is strict: a frame must consume exactly the bytes it was given,
//! every count must sit inside its declared `min..=max`, and unknown message
//! ids are rejected.

use std::collections::HashMap;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Field kinds
// ---------------------------------------------------------------------------

/// Width of a fixed-size integer field (also used for array counts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntWidth {
    U8,
    U16,
    U32,
    U64,
}

impl IntWidth {
    /// Encoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }

    /// Largest value representable at this width.
    pub const fn max_value(self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64,
            Self::U16 => u16::MAX as u64,
            Self::U32 => u32::MAX as u64,
            Self::U64 => u64::MAX,
        }
    }

    fn write(self, value: u64, out: &mut Vec<u8>) {
        // The caller has already range-checked `value`, so the truncating
        // casts below cannot lose information.
        match self {
            Self::U8 => out.push(value as u8),
            Self::U16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
            Self::U32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
            Self::U64 => out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    fn read(self, bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        u64::from_le_bytes(buf)
    }
}

/// Width of a floating-point field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealWidth {
    F32,
    F64,
}

impl RealWidth {
    /// Encoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// What a field looks like on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Fixed-width little-endian unsigned integer.
    Integer(IntWidth),

    /// Fixed-width little-endian IEEE-754 float.
    Real(RealWidth),

    /// Exactly `len` opaque bytes. Shorter values are null-padded on encode;
    /// decode always yields `len` bytes.
    Raw { len: usize },

    /// A UTF-8 string stored in `capacity` bytes, null-padded. One byte is
    /// reserved for the terminator, so the longest string is `capacity - 1`.
    String { capacity: usize },

    /// A count of width `count_width`, then `count * element_size` bytes.
    /// The count must lie in `min_count..=max_count`.
    VarArray {
        count_width: IntWidth,
        element_size: usize,
        min_count: u32,
        max_count: u32,
    },
}

/// One named field of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name, used in error messages and diagnostics.
    pub name: &'static str,
    /// Wire shape.
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub const fn u8(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Integer(IntWidth::U8) }
    }

    pub const fn u16(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Integer(IntWidth::U16) }
    }

    pub const fn u32(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Integer(IntWidth::U32) }
    }

    pub const fn u64(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Integer(IntWidth::U64) }
    }

    pub const fn f32(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Real(RealWidth::F32) }
    }

    pub const fn f64(name: &'static str) -> Self {
        Self { name, kind: FieldKind::Real(RealWidth::F64) }
    }

    pub const fn raw(name: &'static str, len: usize) -> Self {
        Self { name, kind: FieldKind::Raw { len } }
    }

    /// # Panics
    /// Panics if `capacity` is zero (there would be no room for the
    /// terminator). Descriptors are built at startup, so this is a
    /// programming error, not a runtime condition.
    pub const fn string(name: &'static str, capacity: usize) -> Self {
        assert!(capacity > 0, "string capacity must be non-zero");
        Self { name, kind: FieldKind::String { capacity } }
    }

    /// # Panics
    /// Panics if `element_size` is zero or `min_count > max_count`.
    pub const fn var_array(
        name: &'static str,
        count_width: IntWidth,
        element_size: usize,
        min_count: u32,
        max_count: u32,
    ) -> Self {
        assert!(element_size > 0, "array element size must be non-zero");
        assert!(min_count <= max_count, "min_count must not exceed max_count");
        Self {
            name,
            kind: FieldKind::VarArray {
                count_width,
                element_size,
                min_count,
                max_count,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A decoded (or to-be-encoded) field value.
///
/// Variants line up with [`FieldKind`]: `Int` for `Integer`, `Real` for
/// `Real`, `Raw` for `Raw`, `Str` for `String`, `Array` for `VarArray`.
/// `Array` holds the element bytes only; the count is derived from its
/// length on encode.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(u64),
    Real(f64),
    Raw(Vec<u8>),
    Str(String),
    Array(Vec<u8>),
}

/// A message as the framing layer sees it: a type id plus one value per
/// field, in descriptor order.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    pub id: u16,
    pub values: Vec<FieldValue>,
}

impl WireMessage {
    pub fn new(id: u16, values: Vec<FieldValue>) -> Self {
        Self { id, values }
    }
}

// ---------------------------------------------------------------------------
// Message descriptors and protocol schema
// ---------------------------------------------------------------------------

/// The layout of one message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub id: u16,
    pub name: &'static str,
    pub fields: Vec<FieldDescriptor>,
}

impl MessageDescriptor {
    pub fn new(id: u16, name: &'static str, fields: Vec<FieldDescriptor>) -> Self {
        Self { id, name, fields }
    }
}

/// All message types of one named protocol (for example `"cli2game"`).
///
/// Ids are scoped to the protocol: the same number may mean different
/// things in two protocols. Within a protocol ids must stay stable across
/// client versions; new ids can be added, existing ones never renumbered.
#[derive(Debug, Clone)]
pub struct ProtocolSchema {
    name: &'static str,
    messages: HashMap<u16, MessageDescriptor>,
}

impl ProtocolSchema {
    /// Creates an empty schema.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            messages: HashMap::new(),
        }
    }

    /// Adds a message type to the schema (builder style).
    ///
    /// Registering the same id twice is a programming error: it asserts in
    /// debug builds and the later descriptor wins in release builds.
    pub fn with(mut self, descriptor: MessageDescriptor) -> Self {
        let id = descriptor.id;
        let previous = self.messages.insert(id, descriptor);
        debug_assert!(
            previous.is_none(),
            "message id {id} registered twice in protocol `{}`",
            self.name
        );
        self
    }

    /// The protocol's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Looks up the descriptor for a message id.
    pub fn descriptor(&self, id: u16) -> Option<&MessageDescriptor> {
        self.messages.get(&id)
    }

    /// Number of registered message types.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if no message types are registered.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Encodes a message into a frame.
    ///
    /// # Errors
    /// - [`ProtocolError::UnknownType`] if `msg.id` isn't registered.
    /// - [`ProtocolError::FieldMismatch`] if the values don't fit the
    ///   descriptor (wrong count, wrong kind, too large, too long).
    /// - [`ProtocolError::CountOutOfRange`] if an array's element count is
    ///   outside the declared range.
    pub fn encode(&self, msg: &WireMessage) -> Result<Vec<u8>, ProtocolError> {
        let descriptor = self.descriptor(msg.id).ok_or(ProtocolError::UnknownType {
            protocol: self.name,
            id: msg.id,
        })?;

        if descriptor.fields.len() != msg.values.len() {
            return Err(ProtocolError::FieldMismatch {
                field: descriptor.name,
                reason: format!(
                    "expected {} values, got {}",
                    descriptor.fields.len(),
                    msg.values.len()
                ),
            });
        }

        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&msg.id.to_le_bytes());

        for (field, value) in descriptor.fields.iter().zip(&msg.values) {
            encode_field(field, value, &mut out)?;
        }

        Ok(out)
    }

    /// Decodes a frame.
    ///
    /// # Errors
    /// - [`ProtocolError::Truncated`] if the frame ends early.
    /// - [`ProtocolError::UnknownType`] for an unregistered id.
    /// - [`ProtocolError::CountOutOfRange`] for an out-of-range array count.
    /// - [`ProtocolError::TrailingBytes`] if bytes remain after the last field.
    /// - [`ProtocolError::InvalidUtf8`] for a malformed string field.
    pub fn decode(&self, data: &[u8]) -> Result<WireMessage, ProtocolError> {
        let mut cursor = Cursor::new(data);
        let id_bytes = cursor.take("message_id", 2)?;
        let id = u16::from_le_bytes([id_bytes[0], id_bytes[1]]);

        let descriptor = self.descriptor(id).ok_or(ProtocolError::UnknownType {
            protocol: self.name,
            id,
        })?;

        let mut values = Vec::with_capacity(descriptor.fields.len());
        for field in &descriptor.fields {
            values.push(decode_field(field, &mut cursor)?);
        }

        if cursor.remaining() > 0 {
            return Err(ProtocolError::TrailingBytes {
                id,
                extra: cursor.remaining(),
            });
        }

        Ok(WireMessage { id, values })
    }
}

// ---------------------------------------------------------------------------
// Field encode/decode
// ---------------------------------------------------------------------------

fn mismatch(field: &FieldDescriptor, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::FieldMismatch {
        field: field.name,
        reason: reason.into(),
    }
}

fn encode_field(
    field: &FieldDescriptor,
    value: &FieldValue,
    out: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    match (field.kind, value) {
        (FieldKind::Integer(width), FieldValue::Int(v)) => {
            if *v > width.max_value() {
                return Err(mismatch(
                    field,
                    format!("{v} does not fit in {} bytes", width.size()),
                ));
            }
            width.write(*v, out);
        }

        (FieldKind::Real(RealWidth::F32), FieldValue::Real(v)) => {
            out.extend_from_slice(&(*v as f32).to_le_bytes());
        }

        (FieldKind::Real(RealWidth::F64), FieldValue::Real(v)) => {
            out.extend_from_slice(&v.to_le_bytes());
        }

        (FieldKind::Raw { len }, FieldValue::Raw(bytes)) => {
            if bytes.len() > len {
                return Err(mismatch(
                    field,
                    format!("{} bytes exceed fixed size {len}", bytes.len()),
                ));
            }
            out.extend_from_slice(bytes);
            out.resize(out.len() + (len - bytes.len()), 0);
        }

        (FieldKind::String { capacity }, FieldValue::Str(s)) => {
            let bytes = s.as_bytes();
            if bytes.len() >= capacity {
                return Err(mismatch(
                    field,
                    format!("string of {} bytes needs capacity > {}", bytes.len(), capacity),
                ));
            }
            if bytes.contains(&0) {
                return Err(mismatch(field, "string contains an interior NUL"));
            }
            out.extend_from_slice(bytes);
            out.resize(out.len() + (capacity - bytes.len()), 0);
        }

        (
            FieldKind::VarArray {
                count_width,
                element_size,
                min_count,
                max_count,
            },
            FieldValue::Array(bytes),
        ) => {
            if bytes.len() % element_size != 0 {
                return Err(mismatch(
                    field,
                    format!(
                        "{} bytes is not a multiple of element size {element_size}",
                        bytes.len()
                    ),
                ));
            }
            let count = (bytes.len() / element_size) as u64;
            if count < u64::from(min_count) || count > u64::from(max_count) {
                return Err(ProtocolError::CountOutOfRange {
                    field: field.name,
                    count,
                    min: min_count,
                    max: max_count,
                });
            }
            if count > count_width.max_value() {
                return Err(mismatch(
                    field,
                    format!("count {count} does not fit in {} bytes", count_width.size()),
                ));
            }
            count_width.write(count, out);
            out.extend_from_slice(bytes);
        }

        (kind, value) => {
            return Err(mismatch(
                field,
                format!("value {value:?} does not match kind {kind:?}"),
            ));
        }
    }

    Ok(())
}

fn decode_field(
    field: &FieldDescriptor,
    cursor: &mut Cursor<'_>,
) -> Result<FieldValue, ProtocolError> {
    let value = match field.kind {
        FieldKind::Integer(width) => {
            FieldValue::Int(width.read(cursor.take(field.name, width.size())?))
        }

        FieldKind::Real(RealWidth::F32) => {
            let bytes = cursor.take(field.name, 4)?;
            let v = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            FieldValue::Real(f64::from(v))
        }

        FieldKind::Real(RealWidth::F64) => {
            let bytes = cursor.take(field.name, 8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            FieldValue::Real(f64::from_le_bytes(buf))
        }

        FieldKind::Raw { len } => FieldValue::Raw(cursor.take(field.name, len)?.to_vec()),

        FieldKind::String { capacity } => {
            let bytes = cursor.take(field.name, capacity)?;
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
            let s = std::str::from_utf8(&bytes[..end])
                .map_err(|_| ProtocolError::InvalidUtf8 { field: field.name })?;
            FieldValue::Str(s.to_owned())
        }

        FieldKind::VarArray {
            count_width,
            element_size,
            min_count,
            max_count,
        } => {
            let count = count_width.read(cursor.take(field.name, count_width.size())?);
            // Validate before computing the byte length: the count came off
            // the wire and must not drive an allocation until it's bounded.
            if count < u64::from(min_count) || count > u64::from(max_count) {
                return Err(ProtocolError::CountOutOfRange {
                    field: field.name,
                    count,
                    min: min_count,
                    max: max_count,
                });
            }
            let len = count as usize * element_size;
            FieldValue::Array(cursor.take(field.name, len)?.to_vec())
        }
    };

    Ok(value)
}

/// A read position over an inbound frame.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                field,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}
