//! AMQP field types, as carried in method arguments, field tables and content headers.

use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt};

pub type Boolean = bool;
pub type ShortShortInt = i8;
pub type ShortShortUInt = u8;
pub type ShortInt = i16;
pub type ShortUInt = u16;
pub type LongInt = i32;
pub type LongUInt = u32;
pub type LongLongInt = i64;
pub type LongLongUInt = u64;
pub type Float = f32;
pub type Double = f64;
pub type Timestamp = u64;

pub type ChannelId = u16;
pub type ChunkSize = u32;
pub type ConsumerCount = u32;
pub type DeliveryTag = u64;
pub type FrameSize = u32;
pub type Heartbeat = u16;
pub type Identifier = u16;
pub type MessageCount = u32;
pub type PayloadSize = u64;
pub type ReplyCode = u16;

/// A string of at most 255 bytes, length-prefixed by a single octet on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct ShortString(String);

impl ShortString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for ShortString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ShortString {
    fn from(s: &str) -> Self {
        s.to_owned().into()
    }
}

impl From<&ShortString> for ShortString {
    fn from(s: &ShortString) -> Self {
        s.clone()
    }
}

impl Borrow<str> for ShortString {
    fn borrow(&self) -> &str {
        self.0.borrow()
    }
}

impl fmt::Display for ShortString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Raw bytes, length-prefixed by a 32 bits integer on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct LongString(Vec<u8>);

impl LongString {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for LongString {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for LongString {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl From<String> for LongString {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&str> for LongString {
    fn from(s: &str) -> Self {
        s.to_owned().into()
    }
}

impl fmt::Display for LongString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        String::from_utf8_lossy(&self.0).fmt(f)
    }
}

/// A raw byte array (RabbitMQ extension).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ByteArray(Vec<u8>);

impl ByteArray {
    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }
}

impl From<Vec<u8>> for ByteArray {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for ByteArray {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

/// A decimal number: `value / 10^scale`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct DecimalValue {
    pub scale: ShortShortUInt,
    pub value: LongUInt,
}

/// The tags identifying each kind of field value on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AMQPType {
    Boolean,
    ShortShortInt,
    ShortShortUInt,
    ShortInt,
    ShortUInt,
    LongInt,
    LongUInt,
    LongLongInt,
    LongLongUInt,
    Float,
    Double,
    DecimalValue,
    ShortString,
    LongString,
    FieldArray,
    Timestamp,
    FieldTable,
    ByteArray,
    Void,
}

impl AMQPType {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            b't' => Some(Self::Boolean),
            b'b' => Some(Self::ShortShortInt),
            b'B' => Some(Self::ShortShortUInt),
            b'U' => Some(Self::ShortInt),
            b'u' => Some(Self::ShortUInt),
            b'I' => Some(Self::LongInt),
            b'i' => Some(Self::LongUInt),
            b'L' => Some(Self::LongLongInt),
            b'l' => Some(Self::LongLongUInt),
            b'f' => Some(Self::Float),
            b'd' => Some(Self::Double),
            b'D' => Some(Self::DecimalValue),
            b's' => Some(Self::ShortString),
            b'S' => Some(Self::LongString),
            b'A' => Some(Self::FieldArray),
            b'T' => Some(Self::Timestamp),
            b'F' => Some(Self::FieldTable),
            b'x' => Some(Self::ByteArray),
            b'V' => Some(Self::Void),
            _ => None,
        }
    }

    pub fn get_id(self) -> u8 {
        match self {
            Self::Boolean => b't',
            Self::ShortShortInt => b'b',
            Self::ShortShortUInt => b'B',
            Self::ShortInt => b'U',
            Self::ShortUInt => b'u',
            Self::LongInt => b'I',
            Self::LongUInt => b'i',
            Self::LongLongInt => b'L',
            Self::LongLongUInt => b'l',
            Self::Float => b'f',
            Self::Double => b'd',
            Self::DecimalValue => b'D',
            Self::ShortString => b's',
            Self::LongString => b'S',
            Self::FieldArray => b'A',
            Self::Timestamp => b'T',
            Self::FieldTable => b'F',
            Self::ByteArray => b'x',
            Self::Void => b'V',
        }
    }
}

/// A field value, as found in a [`FieldTable`] or a [`FieldArray`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum AMQPValue {
    Boolean(Boolean),
    ShortShortInt(ShortShortInt),
    ShortShortUInt(ShortShortUInt),
    ShortInt(ShortInt),
    ShortUInt(ShortUInt),
    LongInt(LongInt),
    LongUInt(LongUInt),
    LongLongInt(LongLongInt),
    LongLongUInt(LongLongUInt),
    Float(Float),
    Double(Double),
    DecimalValue(DecimalValue),
    ShortString(ShortString),
    LongString(LongString),
    FieldArray(FieldArray),
    Timestamp(Timestamp),
    FieldTable(FieldTable),
    ByteArray(ByteArray),
    Void,
}

impl AMQPValue {
    pub fn get_type(&self) -> AMQPType {
        match self {
            Self::Boolean(_) => AMQPType::Boolean,
            Self::ShortShortInt(_) => AMQPType::ShortShortInt,
            Self::ShortShortUInt(_) => AMQPType::ShortShortUInt,
            Self::ShortInt(_) => AMQPType::ShortInt,
            Self::ShortUInt(_) => AMQPType::ShortUInt,
            Self::LongInt(_) => AMQPType::LongInt,
            Self::LongUInt(_) => AMQPType::LongUInt,
            Self::LongLongInt(_) => AMQPType::LongLongInt,
            Self::LongLongUInt(_) => AMQPType::LongLongUInt,
            Self::Float(_) => AMQPType::Float,
            Self::Double(_) => AMQPType::Double,
            Self::DecimalValue(_) => AMQPType::DecimalValue,
            Self::ShortString(_) => AMQPType::ShortString,
            Self::LongString(_) => AMQPType::LongString,
            Self::FieldArray(_) => AMQPType::FieldArray,
            Self::Timestamp(_) => AMQPType::Timestamp,
            Self::FieldTable(_) => AMQPType::FieldTable,
            Self::ByteArray(_) => AMQPType::ByteArray,
            Self::Void => AMQPType::Void,
        }
    }

    pub fn as_bool(&self) -> Option<Boolean> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long_string(&self) -> Option<&LongString> {
        match self {
            Self::LongString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_field_table(&self) -> Option<&FieldTable> {
        match self {
            Self::FieldTable(t) => Some(t),
            _ => None,
        }
    }
}

impl From<Boolean> for AMQPValue {
    fn from(b: Boolean) -> Self {
        Self::Boolean(b)
    }
}

impl From<LongInt> for AMQPValue {
    fn from(i: LongInt) -> Self {
        Self::LongInt(i)
    }
}

impl From<LongString> for AMQPValue {
    fn from(s: LongString) -> Self {
        Self::LongString(s)
    }
}

impl From<ShortString> for AMQPValue {
    fn from(s: ShortString) -> Self {
        Self::ShortString(s)
    }
}

impl From<FieldTable> for AMQPValue {
    fn from(t: FieldTable) -> Self {
        Self::FieldTable(t)
    }
}

impl From<FieldArray> for AMQPValue {
    fn from(a: FieldArray) -> Self {
        Self::FieldArray(a)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct FieldArray(Vec<AMQPValue>);

impl FieldArray {
    pub fn push(&mut self, v: AMQPValue) {
        self.0.push(v);
    }

    pub fn as_slice(&self) -> &[AMQPValue] {
        &self.0[..]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<AMQPValue>> for FieldArray {
    fn from(v: Vec<AMQPValue>) -> Self {
        Self(v)
    }
}

/// An ordered map of field values, keyed by short strings.
///
/// Insertion order is kept so that what we serialise matches what was built.
/// Inserting an already present key replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct FieldTable(Vec<(ShortString, AMQPValue)>);

impl FieldTable {
    pub fn insert(&mut self, k: ShortString, v: AMQPValue) {
        match self.0.iter_mut().find(|(key, _)| key == &k) {
            Some(entry) => entry.1 = v,
            None => self.0.push((k, v)),
        }
    }

    pub fn get(&self, k: &str) -> Option<&AMQPValue> {
        self.0
            .iter()
            .find(|(key, _)| key.as_str() == k)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, k: &str) -> bool {
        self.get(k).is_some()
    }

    pub fn remove(&mut self, k: &str) -> Option<AMQPValue> {
        let idx = self.0.iter().position(|(key, _)| key.as_str() == k)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ShortString, &AMQPValue)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ShortString, AMQPValue)> for FieldTable {
    fn from_iter<I: IntoIterator<Item = (ShortString, AMQPValue)>>(iter: I) -> Self {
        let mut table = Self::default();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}
