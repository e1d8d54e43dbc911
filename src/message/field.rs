//! Tagged field model.
//!
//! A [`MessageField`] is a name, an optional numeric identifier and exactly one
//! [`FieldValue`] payload. The payload enum is the type tag.

use std::fmt;

use super::datetime::DateTime;
use super::MessageValue;
use crate::types::{Error, Result};

/// Longest accepted field name, in characters.
pub const MAX_FIELD_NAME_LEN: usize = 127;

/// Field type tag. Discriminants are the codec's on-wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Bool = 1,
    I8 = 2,
    U8 = 3,
    I16 = 4,
    U16 = 5,
    I32 = 6,
    U32 = 7,
    I64 = 8,
    U64 = 9,
    F32 = 10,
    F64 = 11,
    String = 12,
    DateTime = 13,
    Message = 14,
    I8Array = 20,
    U8Array = 21,
    I16Array = 22,
    U16Array = 23,
    I32Array = 24,
    U32Array = 25,
    I64Array = 26,
    U64Array = 27,
    F32Array = 28,
    F64Array = 29,
}

impl DataType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        let ty = match tag {
            1 => DataType::Bool,
            2 => DataType::I8,
            3 => DataType::U8,
            4 => DataType::I16,
            5 => DataType::U16,
            6 => DataType::I32,
            7 => DataType::U32,
            8 => DataType::I64,
            9 => DataType::U64,
            10 => DataType::F32,
            11 => DataType::F64,
            12 => DataType::String,
            13 => DataType::DateTime,
            14 => DataType::Message,
            20 => DataType::I8Array,
            21 => DataType::U8Array,
            22 => DataType::I16Array,
            23 => DataType::U16Array,
            24 => DataType::I32Array,
            25 => DataType::U32Array,
            26 => DataType::I64Array,
            27 => DataType::U64Array,
            28 => DataType::F32Array,
            29 => DataType::F64Array,
            _ => return None,
        };
        Some(ty)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::I8 => "i8",
            DataType::U8 => "u8",
            DataType::I16 => "i16",
            DataType::U16 => "u16",
            DataType::I32 => "i32",
            DataType::U32 => "u32",
            DataType::I64 => "i64",
            DataType::U64 => "u64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::String => "string",
            DataType::DateTime => "datetime",
            DataType::Message => "message",
            DataType::I8Array => "i8[]",
            DataType::U8Array => "u8[]",
            DataType::I16Array => "i16[]",
            DataType::U16Array => "u16[]",
            DataType::I32Array => "i32[]",
            DataType::U32Array => "u32[]",
            DataType::I64Array => "i64[]",
            DataType::U64Array => "u64[]",
            DataType::F32Array => "f32[]",
            DataType::F64Array => "f64[]",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    DateTime(DateTime),
    Message(Box<MessageValue>),
    I8Array(Vec<i8>),
    U8Array(Vec<u8>),
    I16Array(Vec<i16>),
    U16Array(Vec<u16>),
    I32Array(Vec<i32>),
    U32Array(Vec<u32>),
    I64Array(Vec<i64>),
    U64Array(Vec<u64>),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
}

impl FieldValue {
    pub fn data_type(&self) -> DataType {
        match self {
            FieldValue::Bool(_) => DataType::Bool,
            FieldValue::I8(_) => DataType::I8,
            FieldValue::U8(_) => DataType::U8,
            FieldValue::I16(_) => DataType::I16,
            FieldValue::U16(_) => DataType::U16,
            FieldValue::I32(_) => DataType::I32,
            FieldValue::U32(_) => DataType::U32,
            FieldValue::I64(_) => DataType::I64,
            FieldValue::U64(_) => DataType::U64,
            FieldValue::F32(_) => DataType::F32,
            FieldValue::F64(_) => DataType::F64,
            FieldValue::String(_) => DataType::String,
            FieldValue::DateTime(_) => DataType::DateTime,
            FieldValue::Message(_) => DataType::Message,
            FieldValue::I8Array(_) => DataType::I8Array,
            FieldValue::U8Array(_) => DataType::U8Array,
            FieldValue::I16Array(_) => DataType::I16Array,
            FieldValue::U16Array(_) => DataType::U16Array,
            FieldValue::I32Array(_) => DataType::I32Array,
            FieldValue::U32Array(_) => DataType::U32Array,
            FieldValue::I64Array(_) => DataType::I64Array,
            FieldValue::U64Array(_) => DataType::U64Array,
            FieldValue::F32Array(_) => DataType::F32Array,
            FieldValue::F64Array(_) => DataType::F64Array,
        }
    }
}

fn write_array<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::I8(v) => write!(f, "{v}"),
            FieldValue::U8(v) => write!(f, "{v}"),
            FieldValue::I16(v) => write!(f, "{v}"),
            FieldValue::U16(v) => write!(f, "{v}"),
            FieldValue::I32(v) => write!(f, "{v}"),
            FieldValue::U32(v) => write!(f, "{v}"),
            FieldValue::I64(v) => write!(f, "{v}"),
            FieldValue::U64(v) => write!(f, "{v}"),
            FieldValue::F32(v) => write!(f, "{v}"),
            FieldValue::F64(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, "{v:?}"),
            FieldValue::DateTime(v) => write!(f, "{v}"),
            FieldValue::Message(v) => write!(f, "{v}"),
            FieldValue::I8Array(v) => write_array(f, v),
            FieldValue::U8Array(v) => write_array(f, v),
            FieldValue::I16Array(v) => write_array(f, v),
            FieldValue::U16Array(v) => write_array(f, v),
            FieldValue::I32Array(v) => write_array(f, v),
            FieldValue::U32Array(v) => write_array(f, v),
            FieldValue::I64Array(v) => write_array(f, v),
            FieldValue::U64Array(v) => write_array(f, v),
            FieldValue::F32Array(v) => write_array(f, v),
            FieldValue::F64Array(v) => write_array(f, v),
        }
    }
}

/// One named, typed entry of a [`MessageValue`].
#[derive(Debug, Clone, PartialEq)]
pub struct MessageField {
    name: String,
    id: u16,
    value: FieldValue,
}

impl MessageField {
    /// Build a field, validating the name.
    pub fn new(name: impl Into<String>, id: u16, value: FieldValue) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, id, value })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Numeric identifier; 0 means none.
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn data_type(&self) -> DataType {
        self.value.data_type()
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn into_value(self) -> FieldValue {
        self.value
    }

    pub(crate) fn set_value(&mut self, value: FieldValue) {
        self.value = value;
    }

    pub(crate) fn matches(&self, key: &FieldKey<'_>) -> bool {
        self.name == key.name && self.id == key.id
    }
}

impl fmt::Display for MessageField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id == 0 {
            write!(f, "{}={}", self.name, self.value)
        } else {
            write!(f, "{}#{}={}", self.name, self.id, self.value)
        }
    }
}

/// Field address: a name plus an optional identifier (0 = none).
///
/// `&str` converts to `(name, 0)`; `(&str, u16)` sets the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldKey<'a> {
    pub name: &'a str,
    pub id: u16,
}

impl<'a> FieldKey<'a> {
    pub fn new(name: &'a str, id: u16) -> Self {
        Self { name, id }
    }
}

impl<'a> From<&'a str> for FieldKey<'a> {
    fn from(name: &'a str) -> Self {
        Self { name, id: 0 }
    }
}

impl<'a> From<&'a String> for FieldKey<'a> {
    fn from(name: &'a String) -> Self {
        Self { name, id: 0 }
    }
}

impl<'a> From<(&'a str, u16)> for FieldKey<'a> {
    fn from((name, id): (&'a str, u16)) -> Self {
        Self { name, id }
    }
}

impl fmt::Display for FieldKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}#{}", self.name, self.id)
        }
    }
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument("field name cannot be empty"));
    }
    let len = name.chars().count();
    if len > MAX_FIELD_NAME_LEN {
        return Err(Error::invalid_argument(format!(
            "field name is {} characters, limit is {}",
            len, MAX_FIELD_NAME_LEN
        )));
    }
    Ok(())
}
