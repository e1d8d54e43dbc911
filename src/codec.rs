//! Binary codec for [`MessageValue`].
//!
//! Message format:
//! ```text
//! ┌────────────┬─────────┬──────────┬──────────────┬───────────────┬────────────┬────────┐
//! │ magic (2B) │ ver(1B) │ flags(1B)│ send subject │ reply subject │ count (4B) │ fields │
//! │ "MB"       │ u8      │ u8       │ u8 len + utf8│ u8 len + utf8 │ u32 BE     │        │
//! └────────────┴─────────┴──────────┴──────────────┴───────────────┴────────────┴────────┘
//! ```
//! Subjects are present only when the matching flag bit is set. Each field is:
//! ```text
//! ┌───────────┬──────┬─────────┬──────────┬──────────────┬─────────┐
//! │ name len  │ name │ id (2B) │ tag (1B) │ payload len  │ payload │
//! │ u16 BE    │ utf8 │ u16 BE  │ DataType │ u32 BE       │         │
//! └───────────┴──────┴─────────┴──────────┴──────────────┴─────────┘
//! ```
//! Scalars are big-endian; arrays are packed elements; nested messages are a
//! complete message frame. Field order is preserved.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::message::{DataType, DateTime, FieldValue, MessageField, MessageValue};
use crate::subject::Subject;
use crate::types::{Error, Result};

/// Frame magic: ASCII "MB".
pub const MAGIC: u16 = 0x4D42;
/// Current codec version.
pub const VERSION: u8 = 1;
/// Nested messages deeper than this are rejected by both encode and decode.
pub const MAX_NESTING_DEPTH: usize = 32;

const FLAG_SEND_SUBJECT: u8 = 0x01;
const FLAG_REPLY_SUBJECT: u8 = 0x02;

/// magic + version + flags + field count
const HEADER_LEN: usize = 2 + 1 + 1 + 4;
/// name len + id + tag + payload len
const FIELD_HEADER_LEN: usize = 2 + 2 + 1 + 4;

/// Encode a message into a new buffer.
pub fn encode(message: &MessageValue) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(encoded_len(message));
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a message onto the end of `buf`.
///
/// Fails with `InvalidArgument` when nested messages go deeper than
/// [`MAX_NESTING_DEPTH`]; nothing is written in that case.
pub fn encode_into(message: &MessageValue, buf: &mut BytesMut) -> Result<()> {
    message.num_fields()?;
    let depth = nesting_depth(message);
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::invalid_argument(format!(
            "message nesting of {} levels exceeds {}",
            depth, MAX_NESTING_DEPTH
        )));
    }
    write_message(message, buf);
    Ok(())
}

/// Levels of nested messages below `message`; zero when it has none.
pub fn nesting_depth(message: &MessageValue) -> usize {
    message
        .fields()
        .filter_map(|f| match f.value() {
            FieldValue::Message(m) => Some(1 + nesting_depth(m)),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}

fn write_message(message: &MessageValue, buf: &mut BytesMut) {
    buf.put_u16(MAGIC);
    buf.put_u8(VERSION);

    let send = message.send_subject_ref();
    let reply = message.reply_subject_ref();
    let mut flags = 0u8;
    if send.is_some() {
        flags |= FLAG_SEND_SUBJECT;
    }
    if reply.is_some() {
        flags |= FLAG_REPLY_SUBJECT;
    }
    buf.put_u8(flags);
    for subject in [send, reply].into_iter().flatten() {
        // Subjects are capped at 255 bytes on construction.
        buf.put_u8(subject.as_str().len() as u8);
        buf.put_slice(subject.as_str().as_bytes());
    }

    buf.put_u32(message.fields().count() as u32);
    for field in message.fields() {
        buf.put_u16(field.name().len() as u16);
        buf.put_slice(field.name().as_bytes());
        buf.put_u16(field.id());
        buf.put_u8(field.data_type().tag());
        buf.put_u32(payload_len(field.value()) as u32);
        encode_payload(field.value(), buf);
    }
}

/// Exact size of `encode(message)` in bytes.
pub fn encoded_len(message: &MessageValue) -> usize {
    let subjects: usize = [message.send_subject_ref(), message.reply_subject_ref()]
        .into_iter()
        .flatten()
        .map(|s| 1 + s.as_str().len())
        .sum();
    let fields: usize = message
        .fields()
        .map(|f| FIELD_HEADER_LEN + f.name().len() + payload_len(f.value()))
        .sum();
    HEADER_LEN + subjects + fields
}

fn payload_len(value: &FieldValue) -> usize {
    match value {
        FieldValue::Bool(_) | FieldValue::I8(_) | FieldValue::U8(_) => 1,
        FieldValue::I16(_) | FieldValue::U16(_) => 2,
        FieldValue::I32(_) | FieldValue::U32(_) | FieldValue::F32(_) => 4,
        FieldValue::I64(_) | FieldValue::U64(_) | FieldValue::F64(_) => 8,
        FieldValue::String(s) => s.len(),
        FieldValue::DateTime(_) => 12,
        FieldValue::Message(m) => encoded_len(m),
        FieldValue::I8Array(v) => v.len(),
        FieldValue::U8Array(v) => v.len(),
        FieldValue::I16Array(v) => v.len() * 2,
        FieldValue::U16Array(v) => v.len() * 2,
        FieldValue::I32Array(v) => v.len() * 4,
        FieldValue::U32Array(v) => v.len() * 4,
        FieldValue::F32Array(v) => v.len() * 4,
        FieldValue::I64Array(v) => v.len() * 8,
        FieldValue::U64Array(v) => v.len() * 8,
        FieldValue::F64Array(v) => v.len() * 8,
    }
}

fn encode_payload(value: &FieldValue, buf: &mut BytesMut) {
    match value {
        FieldValue::Bool(v) => buf.put_u8(u8::from(*v)),
        FieldValue::I8(v) => buf.put_i8(*v),
        FieldValue::U8(v) => buf.put_u8(*v),
        FieldValue::I16(v) => buf.put_i16(*v),
        FieldValue::U16(v) => buf.put_u16(*v),
        FieldValue::I32(v) => buf.put_i32(*v),
        FieldValue::U32(v) => buf.put_u32(*v),
        FieldValue::I64(v) => buf.put_i64(*v),
        FieldValue::U64(v) => buf.put_u64(*v),
        FieldValue::F32(v) => buf.put_f32(*v),
        FieldValue::F64(v) => buf.put_f64(*v),
        FieldValue::String(s) => buf.put_slice(s.as_bytes()),
        FieldValue::DateTime(dt) => {
            buf.put_i64(dt.seconds());
            buf.put_u32(dt.nanoseconds());
        }
        FieldValue::Message(m) => write_message(m, buf),
        FieldValue::I8Array(v) => v.iter().for_each(|x| buf.put_i8(*x)),
        FieldValue::U8Array(v) => buf.put_slice(v),
        FieldValue::I16Array(v) => v.iter().for_each(|x| buf.put_i16(*x)),
        FieldValue::U16Array(v) => v.iter().for_each(|x| buf.put_u16(*x)),
        FieldValue::I32Array(v) => v.iter().for_each(|x| buf.put_i32(*x)),
        FieldValue::U32Array(v) => v.iter().for_each(|x| buf.put_u32(*x)),
        FieldValue::I64Array(v) => v.iter().for_each(|x| buf.put_i64(*x)),
        FieldValue::U64Array(v) => v.iter().for_each(|x| buf.put_u64(*x)),
        FieldValue::F32Array(v) => v.iter().for_each(|x| buf.put_f32(*x)),
        FieldValue::F64Array(v) => v.iter().for_each(|x| buf.put_f64(*x)),
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a complete message. Trailing bytes are an error.
pub fn decode(bytes: &[u8]) -> Result<MessageValue> {
    let mut buf = bytes;
    let message = decode_message(&mut buf, 0)?;
    if buf.has_remaining() {
        return Err(Error::decode(format!(
            "{} trailing bytes after message",
            buf.remaining()
        )));
    }
    Ok(message)
}

fn need(buf: &[u8], n: usize, context: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::decode(format!(
            "truncated {}: need {} bytes, have {}",
            context,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn decode_message(buf: &mut &[u8], depth: usize) -> Result<MessageValue> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::decode(format!(
            "message nesting exceeds {} levels",
            MAX_NESTING_DEPTH
        )));
    }

    need(buf, 4, "message header")?;
    let magic = buf.get_u16();
    if magic != MAGIC {
        return Err(Error::decode(format!(
            "bad magic {:#06x}, expected {:#06x}",
            magic, MAGIC
        )));
    }
    let version = buf.get_u8();
    if version != VERSION {
        return Err(Error::decode(format!("unsupported codec version {}", version)));
    }
    let flags = buf.get_u8();

    let send = if flags & FLAG_SEND_SUBJECT != 0 {
        Some(decode_subject(buf)?)
    } else {
        None
    };
    let reply = if flags & FLAG_REPLY_SUBJECT != 0 {
        Some(decode_subject(buf)?)
    } else {
        None
    };

    need(buf, 4, "field count")?;
    let count = buf.get_u32() as usize;

    let mut message = MessageValue::new();
    message.set_subjects(send, reply);
    for _ in 0..count {
        let field = decode_field(buf, depth)?;
        message.push_decoded(field);
    }
    Ok(message)
}

fn decode_subject(buf: &mut &[u8]) -> Result<Subject> {
    need(buf, 1, "subject length")?;
    let len = buf.get_u8() as usize;
    need(buf, len, "subject")?;
    let raw = std::str::from_utf8(&buf[..len])
        .map_err(|e| Error::decode(format!("subject is not utf-8: {}", e)))?;
    let subject = Subject::publishable(raw).map_err(|e| Error::decode(e.to_string()))?;
    buf.advance(len);
    Ok(subject)
}

fn decode_field(buf: &mut &[u8], depth: usize) -> Result<MessageField> {
    need(buf, 2, "field name length")?;
    let name_len = buf.get_u16() as usize;
    need(buf, name_len, "field name")?;
    let name = std::str::from_utf8(&buf[..name_len])
        .map_err(|e| Error::decode(format!("field name is not utf-8: {}", e)))?
        .to_string();
    buf.advance(name_len);

    need(buf, 7, "field header")?;
    let id = buf.get_u16();
    let tag = buf.get_u8();
    let data_type =
        DataType::from_tag(tag).ok_or_else(|| Error::decode(format!("unknown field tag {}", tag)))?;
    let len = buf.get_u32() as usize;
    need(buf, len, "field payload")?;

    let data: &[u8] = *buf;
    let (mut payload, rest) = data.split_at(len);
    *buf = rest;
    let value = decode_payload(data_type, &mut payload, depth).map_err(|e| match e {
        Error::Decode(inner) => Error::decode(format!("field {}: {}", name, inner)),
        other => other,
    })?;
    if payload.has_remaining() {
        return Err(Error::decode(format!(
            "field {}: {} unread payload bytes",
            name,
            payload.remaining()
        )));
    }

    MessageField::new(name, id, value).map_err(|e| Error::decode(e.to_string()))
}

fn fixed(buf: &[u8], width: usize, data_type: DataType) -> Result<()> {
    if buf.remaining() != width {
        return Err(Error::decode(format!(
            "{} payload is {} bytes, expected {}",
            data_type,
            buf.remaining(),
            width
        )));
    }
    Ok(())
}

fn array<T>(buf: &mut &[u8], width: usize, mut read: impl FnMut(&mut &[u8]) -> T) -> Result<Vec<T>> {
    if buf.remaining() % width != 0 {
        return Err(Error::decode(format!(
            "array payload of {} bytes is not a multiple of {}",
            buf.remaining(),
            width
        )));
    }
    let mut out = Vec::with_capacity(buf.remaining() / width);
    while buf.has_remaining() {
        out.push(read(buf));
    }
    Ok(out)
}

fn decode_payload(data_type: DataType, buf: &mut &[u8], depth: usize) -> Result<FieldValue> {
    let value = match data_type {
        DataType::Bool => {
            fixed(buf, 1, data_type)?;
            FieldValue::Bool(buf.get_u8() != 0)
        }
        DataType::I8 => {
            fixed(buf, 1, data_type)?;
            FieldValue::I8(buf.get_i8())
        }
        DataType::U8 => {
            fixed(buf, 1, data_type)?;
            FieldValue::U8(buf.get_u8())
        }
        DataType::I16 => {
            fixed(buf, 2, data_type)?;
            FieldValue::I16(buf.get_i16())
        }
        DataType::U16 => {
            fixed(buf, 2, data_type)?;
            FieldValue::U16(buf.get_u16())
        }
        DataType::I32 => {
            fixed(buf, 4, data_type)?;
            FieldValue::I32(buf.get_i32())
        }
        DataType::U32 => {
            fixed(buf, 4, data_type)?;
            FieldValue::U32(buf.get_u32())
        }
        DataType::I64 => {
            fixed(buf, 8, data_type)?;
            FieldValue::I64(buf.get_i64())
        }
        DataType::U64 => {
            fixed(buf, 8, data_type)?;
            FieldValue::U64(buf.get_u64())
        }
        DataType::F32 => {
            fixed(buf, 4, data_type)?;
            FieldValue::F32(buf.get_f32())
        }
        DataType::F64 => {
            fixed(buf, 8, data_type)?;
            FieldValue::F64(buf.get_f64())
        }
        DataType::String => {
            let s = std::str::from_utf8(buf)
                .map_err(|e| Error::decode(format!("string is not utf-8: {}", e)))?
                .to_string();
            buf.advance(buf.remaining());
            FieldValue::String(s)
        }
        DataType::DateTime => {
            fixed(buf, 12, data_type)?;
            let seconds = buf.get_i64();
            let nanos = buf.get_u32();
            if nanos >= 1_000_000_000 {
                return Err(Error::decode(format!("datetime nanoseconds {} out of range", nanos)));
            }
            FieldValue::DateTime(DateTime::new(seconds, i64::from(nanos)))
        }
        DataType::Message => FieldValue::Message(Box::new(decode_message(buf, depth + 1)?)),
        DataType::I8Array => FieldValue::I8Array(array(buf, 1, |b| b.get_i8())?),
        DataType::U8Array => FieldValue::U8Array(array(buf, 1, |b| b.get_u8())?),
        DataType::I16Array => FieldValue::I16Array(array(buf, 2, |b| b.get_i16())?),
        DataType::U16Array => FieldValue::U16Array(array(buf, 2, |b| b.get_u16())?),
        DataType::I32Array => FieldValue::I32Array(array(buf, 4, |b| b.get_i32())?),
        DataType::U32Array => FieldValue::U32Array(array(buf, 4, |b| b.get_u32())?),
        DataType::I64Array => FieldValue::I64Array(array(buf, 8, |b| b.get_i64())?),
        DataType::U64Array => FieldValue::U64Array(array(buf, 8, |b| b.get_u64())?),
        DataType::F32Array => FieldValue::F32Array(array(buf, 4, |b| b.get_f32())?),
        DataType::F64Array => FieldValue::F64Array(array(buf, 8, |b| b.get_f64())?),
    };
    Ok(value)
}
