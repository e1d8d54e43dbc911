//! Per-width coercing accessors.
//!
//! Integer setters take an `i128` and truncate to the field width with
//! two's-complement wraparound: `add_i8("A", 0xFFFF)` stores `-1`,
//! `add_u8("B", 0xFFFF)` stores `0xFF`. No overflow error is ever raised.
//!
//! `add_f32` rounds to single precision on store and `get_f32` widens the
//! stored value back to `f64`, so `add_f32("X", 1.3)` reads back as
//! `1.2999999523162842`.

use super::convert::Defaulted;
use super::field::{FieldKey, FieldValue};
use super::MessageValue;
use crate::types::Result;

macro_rules! integer_accessors {
    ($($ty:ty => $variant:ident: $add:ident, $update:ident, $get:ident, $get_or:ident;)*) => {
        impl MessageValue {
            $(
                #[doc = concat!("Add a `", stringify!($ty), "` field, truncating `value` to that width.")]
                pub fn $add<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: i128) -> Result<()> {
                    self.add(key, FieldValue::$variant(value as $ty))
                }

                #[doc = concat!("Create-or-replace a `", stringify!($ty), "` field, truncating `value`.")]
                pub fn $update<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: i128) -> Result<()> {
                    self.update(key, FieldValue::$variant(value as $ty))
                }

                pub fn $get<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<$ty> {
                    self.get::<$ty>(key)
                }

                pub fn $get_or<'k>(&self, key: impl Into<FieldKey<'k>>, default: $ty) -> Defaulted<$ty> {
                    self.get_or::<$ty>(key, default)
                }
            )*
        }
    };
}

integer_accessors! {
    i8 => I8: add_i8, update_i8, get_i8, get_i8_or;
    u8 => U8: add_u8, update_u8, get_u8, get_u8_or;
    i16 => I16: add_i16, update_i16, get_i16, get_i16_or;
    u16 => U16: add_u16, update_u16, get_u16, get_u16_or;
    i32 => I32: add_i32, update_i32, get_i32, get_i32_or;
    u32 => U32: add_u32, update_u32, get_u32, get_u32_or;
    i64 => I64: add_i64, update_i64, get_i64, get_i64_or;
    u64 => U64: add_u64, update_u64, get_u64, get_u64_or;
}

impl MessageValue {
    /// Add an `f32` field; `value` is rounded to single precision.
    pub fn add_f32<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: f64) -> Result<()> {
        self.add(key, FieldValue::F32(value as f32))
    }

    pub fn update_f32<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: f64) -> Result<()> {
        self.update(key, FieldValue::F32(value as f32))
    }

    /// Read an `f32` field widened to `f64`. The single-precision rounding
    /// applied on store is not undone.
    pub fn get_f32<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<f64> {
        self.get::<f32>(key).map(f64::from)
    }

    pub fn get_f32_or<'k>(&self, key: impl Into<FieldKey<'k>>, default: f64) -> Defaulted<f64> {
        Defaulted::resolve(self.get_f32(key), default)
    }

    pub fn add_f64<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: f64) -> Result<()> {
        self.add(key, FieldValue::F64(value))
    }

    pub fn update_f64<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: f64) -> Result<()> {
        self.update(key, FieldValue::F64(value))
    }

    pub fn get_f64<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<f64> {
        self.get::<f64>(key)
    }

    pub fn add_bool<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: bool) -> Result<()> {
        self.add(key, FieldValue::Bool(value))
    }

    pub fn get_bool<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<bool> {
        self.get::<bool>(key)
    }

    pub fn add_string<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: &str) -> Result<()> {
        self.add(key, value)
    }

    pub fn update_string<'k>(&mut self, key: impl Into<FieldKey<'k>>, value: &str) -> Result<()> {
        self.update(key, value)
    }

    pub fn get_string<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<String> {
        self.get::<String>(key)
    }

    pub fn get_string_or<'k>(
        &self,
        key: impl Into<FieldKey<'k>>,
        default: &str,
    ) -> Defaulted<String> {
        self.get_or::<String>(key, default.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_truncation_law() {
        let mut msg = MessageValue::new();
        msg.add_i8("A", 0xFFFF).unwrap();
        msg.add_u8("B", 0xFFFF).unwrap();
        msg.add_i16("C", 0x1_FFFF).unwrap();
        msg.add_u16("D", 0x1_2345).unwrap();
        msg.add_i32("E", 0xFFFF_FFFF).unwrap();
        msg.add_u32("F", -1).unwrap();
        msg.add_i64("G", 0xFFFF_FFFF_FFFF_FFFF).unwrap();
        msg.add_u64("H", -2).unwrap();

        assert_eq!(msg.get_i8("A").unwrap(), -1);
        assert_eq!(msg.get_u8("B").unwrap(), 0xFF);
        assert_eq!(msg.get_i16("C").unwrap(), -1);
        assert_eq!(msg.get_u16("D").unwrap(), 0x2345);
        assert_eq!(msg.get_i32("E").unwrap(), -1);
        assert_eq!(msg.get_u32("F").unwrap(), u32::MAX);
        assert_eq!(msg.get_i64("G").unwrap(), -1);
        assert_eq!(msg.get_u64("H").unwrap(), u64::MAX - 1);
    }

    #[test]
    fn test_in_range_values_are_unchanged() {
        let mut msg = MessageValue::new();
        msg.add_i8("A", -128).unwrap();
        msg.add_u16("B", 65535).unwrap();
        assert_eq!(msg.get_i8("A").unwrap(), i8::MIN);
        assert_eq!(msg.get_u16("B").unwrap(), u16::MAX);
    }

    #[test]
    fn test_f32_single_precision_rounding_is_observable() {
        let mut msg = MessageValue::new();
        msg.add_f32("X", 1.3).unwrap();

        let read = msg.get_f32("X").unwrap();
        assert_eq!(read, 1.2999999523162842);
        assert_ne!(read, 1.3);
        assert_eq!(read, f64::from(1.3f32));
    }

    #[test]
    fn test_update_truncates_too() {
        let mut msg = MessageValue::new();
        msg.update_u8("B", 256 + 7).unwrap();
        assert_eq!(msg.get_u8("B").unwrap(), 7);
        msg.update_u8("B", -1).unwrap();
        assert_eq!(msg.get_u8("B").unwrap(), 255);
    }

    #[test]
    fn test_typed_default_helpers() {
        let msg = MessageValue::new();
        let read = msg.get_u32_or("nope", 9);
        assert_eq!(read.value, 9);
        assert!(read.status.unwrap_err().is_not_found());

        let read = msg.get_string_or("nope", "fallback");
        assert_eq!(read.value, "fallback");
        assert!(read.is_substituted());
    }

    #[test]
    fn test_width_mismatch_is_invalid_field() {
        let mut msg = MessageValue::new();
        msg.add_i16("W", 5).unwrap();
        assert_eq!(msg.get_i32("W").unwrap_err().code(), "INVALID_FIELD");
    }
}
