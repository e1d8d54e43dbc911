//! Compile-time typed access to field payloads.
//!
//! Writing goes through `Into<FieldValue>`; reading through [`FieldType`],
//! which only succeeds when the stored tag matches the requested Rust type.

use super::datetime::DateTime;
use super::field::{DataType, FieldValue};
use super::MessageValue;
use crate::types::Result;

mod sealed {
    pub trait Sealed {}
}

/// Rust types that can be read back out of a [`FieldValue`].
pub trait FieldType: Sized + sealed::Sealed {
    const DATA_TYPE: DataType;

    fn from_value(value: &FieldValue) -> Option<Self>;
}

macro_rules! field_type {
    ($ty:ty => $variant:ident) => {
        impl sealed::Sealed for $ty {}

        impl FieldType for $ty {
            const DATA_TYPE: DataType = DataType::$variant;

            fn from_value(value: &FieldValue) -> Option<Self> {
                match value {
                    FieldValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }

        impl From<$ty> for FieldValue {
            fn from(value: $ty) -> Self {
                FieldValue::$variant(value)
            }
        }
    };
}

field_type!(bool => Bool);
field_type!(i8 => I8);
field_type!(u8 => U8);
field_type!(i16 => I16);
field_type!(u16 => U16);
field_type!(i32 => I32);
field_type!(u32 => U32);
field_type!(i64 => I64);
field_type!(u64 => U64);
field_type!(f32 => F32);
field_type!(f64 => F64);
field_type!(String => String);
field_type!(DateTime => DateTime);
field_type!(Vec<i8> => I8Array);
field_type!(Vec<u8> => U8Array);
field_type!(Vec<i16> => I16Array);
field_type!(Vec<u16> => U16Array);
field_type!(Vec<i32> => I32Array);
field_type!(Vec<u32> => U32Array);
field_type!(Vec<i64> => I64Array);
field_type!(Vec<u64> => U64Array);
field_type!(Vec<f32> => F32Array);
field_type!(Vec<f64> => F64Array);

impl sealed::Sealed for MessageValue {}

impl FieldType for MessageValue {
    const DATA_TYPE: DataType = DataType::Message;

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Message(m) => Some(m.create_copy_unchecked()),
            _ => None,
        }
    }
}

impl From<MessageValue> for FieldValue {
    fn from(value: MessageValue) -> Self {
        FieldValue::Message(Box::new(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for FieldValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        FieldValue::DateTime(value.into())
    }
}

/// A read that may have substituted a caller-supplied default.
///
/// `status` keeps the underlying lookup result, so a substituted default still
/// reports `NotFound` instead of silently looking like a hit.
#[derive(Debug)]
pub struct Defaulted<T> {
    pub value: T,
    pub status: Result<()>,
}

impl<T> Defaulted<T> {
    pub(crate) fn resolve(lookup: Result<T>, default: T) -> Self {
        match lookup {
            Ok(value) => Self {
                value,
                status: Ok(()),
            },
            Err(err) => Self {
                value: default,
                status: Err(err),
            },
        }
    }

    /// True when `value` is the default rather than the stored field.
    pub fn is_substituted(&self) -> bool {
        self.status.is_err()
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
