//! Property tests for the message codec and the integer truncation law.

use msgbus_core::codec::{decode, encode};
use msgbus_core::{DateTime, FieldValue, MessageValue};
use proptest::collection::vec;
use proptest::prelude::*;

fn finite_f64() -> impl Strategy<Value = f64> {
    -1.0e12f64..1.0e12f64
}

fn finite_f32() -> impl Strategy<Value = f32> {
    -1.0e6f32..1.0e6f32
}

fn scalar_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i8>().prop_map(FieldValue::I8),
        any::<u8>().prop_map(FieldValue::U8),
        any::<i16>().prop_map(FieldValue::I16),
        any::<u16>().prop_map(FieldValue::U16),
        any::<i32>().prop_map(FieldValue::I32),
        any::<u32>().prop_map(FieldValue::U32),
        any::<i64>().prop_map(FieldValue::I64),
        any::<u64>().prop_map(FieldValue::U64),
        finite_f32().prop_map(FieldValue::F32),
        finite_f64().prop_map(FieldValue::F64),
        ".{0,24}".prop_map(FieldValue::String),
        (any::<i64>(), 0i64..1_000_000_000)
            .prop_map(|(s, n)| FieldValue::DateTime(DateTime::new(s, n))),
        vec(any::<i16>(), 0..8).prop_map(FieldValue::I16Array),
        vec(any::<u64>(), 0..8).prop_map(FieldValue::U64Array),
        vec(finite_f64(), 0..8).prop_map(FieldValue::F64Array),
        vec(finite_f32(), 0..8).prop_map(FieldValue::F32Array),
    ]
}

fn message_from(fields: Vec<FieldValue>) -> MessageValue {
    let mut msg = MessageValue::new();
    for (i, value) in fields.into_iter().enumerate() {
        msg.add(format!("F{i}").as_str(), value).unwrap();
    }
    msg
}

fn message() -> impl Strategy<Value = MessageValue> {
    (vec(scalar_value(), 0..12), vec(scalar_value(), 0..4), any::<bool>()).prop_map(
        |(outer, inner, with_subject)| {
            let mut msg = message_from(outer);
            if !inner.is_empty() {
                msg.add("NESTED", message_from(inner)).unwrap();
            }
            if with_subject {
                msg.set_send_subject("PROP.TEST").unwrap();
                msg.set_reply_subject("_INBOX.PROP").unwrap();
            }
            msg
        },
    )
}

proptest! {
    #[test]
    fn prop_encode_decode_round_trip(msg in message()) {
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn prop_truncated_input_never_panics(msg in message(), cut in any::<prop::sample::Index>()) {
        let bytes = encode(&msg).unwrap();
        let len = cut.index(bytes.len());
        prop_assert!(decode(&bytes[..len]).is_err());
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in vec(any::<u8>(), 0..256)) {
        let _ = decode(&bytes);
    }

    #[test]
    fn prop_integer_setters_truncate(value in any::<i64>()) {
        let v = i128::from(value);
        let mut msg = MessageValue::new();
        msg.add_i8("I8", v).unwrap();
        msg.add_u8("U8", v).unwrap();
        msg.add_i16("I16", v).unwrap();
        msg.add_u16("U16", v).unwrap();
        msg.add_i32("I32", v).unwrap();
        msg.add_u32("U32", v).unwrap();
        msg.add_i64("I64", v).unwrap();
        msg.add_u64("U64", v).unwrap();

        prop_assert_eq!(msg.get_i8("I8").unwrap(), value as i8);
        prop_assert_eq!(msg.get_u8("U8").unwrap(), value as u8);
        prop_assert_eq!(msg.get_i16("I16").unwrap(), value as i16);
        prop_assert_eq!(msg.get_u16("U16").unwrap(), value as u16);
        prop_assert_eq!(msg.get_i32("I32").unwrap(), value as i32);
        prop_assert_eq!(msg.get_u32("U32").unwrap(), value as u32);
        prop_assert_eq!(msg.get_i64("I64").unwrap(), value);
        prop_assert_eq!(msg.get_u64("U64").unwrap(), value as u64);
    }

    #[test]
    fn prop_f32_reads_single_precision(value in finite_f64()) {
        let mut msg = MessageValue::new();
        msg.add_f32("X", value).unwrap();
        prop_assert_eq!(msg.get_f32("X").unwrap(), f64::from(value as f32));
    }
}

#[test]
fn test_scenario_subject_and_string_survive() {
    let mut msg = MessageValue::new();
    msg.set_send_subject("A.B").unwrap();
    msg.add("DATA", "hello").unwrap();

    let decoded = decode(&encode(&msg).unwrap()).unwrap();
    assert_eq!(decoded.send_subject().unwrap(), Some("A.B"));
    assert_eq!(decoded.get_str("DATA").unwrap(), "hello");
}
