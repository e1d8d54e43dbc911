//! Message container.
//!
//! A [`MessageValue`] is an ordered list of [`MessageField`]s plus optional send
//! and reply subjects. Fields are addressed three ways:
//!
//! - by key: exact `(name, id)` pair, see [`FieldKey`]
//! - by position: [`MessageValue::field_by_index`]
//! - by instance: the k-th field sharing a name, see [`MessageValue::field_instance`]
//!
//! Field identifiers other than 0 are unique within one message.
//!
//! Messages handed to listener callbacks belong to the runtime and are
//! reclaimed when the callback returns unless the callback calls
//! [`MessageValue::detach`].

use std::fmt;

use crate::codec;
use crate::subject::Subject;
use crate::types::{Error, Result};

mod accessors;
pub mod convert;
pub mod datetime;
pub mod field;

pub use convert::{Defaulted, FieldType};
pub use datetime::DateTime;
pub use field::{DataType, FieldKey, FieldValue, MessageField, MAX_FIELD_NAME_LEN};

/// Rough per-field byte estimate used to turn `expand()` hints into capacity.
const FIELD_SIZE_ESTIMATE: usize = 32;

/// Who reclaims a message's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Ownership {
    /// Created by the caller.
    #[default]
    Owned,
    /// Lent to a callback; dropped by the runtime when the callback returns.
    Runtime,
    /// Storage already moved out by `detach()`.
    Detached,
}

/// Typed, ordered, named-field container.
#[derive(Debug, Default)]
pub struct MessageValue {
    fields: Vec<MessageField>,
    send_subject: Option<Subject>,
    reply_subject: Option<Subject>,
    capacity_hint: usize,
    ownership: Ownership,
    destroyed: bool,
}

impl MessageValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a byte-size hint.
    pub fn with_capacity(capacity_hint: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity_hint / FIELD_SIZE_ESTIMATE),
            capacity_hint,
            ..Self::default()
        }
    }

    /// Independent deep copy owned by the caller.
    pub fn create_copy(src: &MessageValue) -> Result<Self> {
        src.ensure_live()?;
        Ok(src.create_copy_unchecked())
    }

    pub(crate) fn create_copy_unchecked(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            send_subject: self.send_subject.clone(),
            reply_subject: self.reply_subject.clone(),
            capacity_hint: self.capacity_hint,
            ownership: Ownership::Owned,
            destroyed: false,
        }
    }

    /// Take ownership of a runtime-lent message.
    ///
    /// Moves the storage into a new caller-owned message and leaves `self`
    /// empty. Fails when `self` is already caller-owned or already detached.
    pub fn detach(&mut self) -> Result<MessageValue> {
        self.ensure_live()?;
        match self.ownership {
            Ownership::Runtime => {}
            Ownership::Owned => {
                return Err(Error::invalid_argument(
                    "message is already owned by the caller",
                ))
            }
            Ownership::Detached => {
                return Err(Error::invalid_argument("message was already detached"))
            }
        }

        self.ownership = Ownership::Detached;
        Ok(Self {
            fields: std::mem::take(&mut self.fields),
            send_subject: self.send_subject.take(),
            reply_subject: self.reply_subject.take(),
            capacity_hint: self.capacity_hint,
            ownership: Ownership::Owned,
            destroyed: false,
        })
    }

    pub(crate) fn lend_to_runtime(mut self) -> Self {
        self.ownership = Ownership::Runtime;
        self
    }

    /// True when the runtime reclaims this message after the current callback.
    pub fn is_runtime_owned(&self) -> bool {
        self.ownership == Ownership::Runtime
    }

    /// Explicitly destroy the message. Later operations fail with `InvalidContainer`.
    pub fn destroy(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.fields = Vec::new();
        self.send_subject = None;
        self.reply_subject = None;
        self.destroyed = true;
        Ok(())
    }

    /// Remove all fields and subjects.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.fields.clear();
        self.send_subject = None;
        self.reply_subject = None;
        Ok(())
    }

    /// Capacity hint only; never changes observable content.
    pub fn expand(&mut self, extra_bytes: usize) -> Result<()> {
        self.ensure_live()?;
        self.capacity_hint = self.capacity_hint.saturating_add(extra_bytes);
        self.fields.reserve(extra_bytes / FIELD_SIZE_ESTIMATE);
        Ok(())
    }

    // =========================================================================
    // Subjects
    // =========================================================================

    pub fn send_subject(&self) -> Result<Option<&str>> {
        self.ensure_live()?;
        Ok(self.send_subject.as_ref().map(Subject::as_str))
    }

    /// Set the publish subject. Wildcards are rejected.
    pub fn set_send_subject(&mut self, subject: &str) -> Result<()> {
        self.ensure_live()?;
        self.send_subject = Some(Subject::publishable(subject)?);
        Ok(())
    }

    pub fn reply_subject(&self) -> Result<Option<&str>> {
        self.ensure_live()?;
        Ok(self.reply_subject.as_ref().map(Subject::as_str))
    }

    /// Set the subject replies should be sent to. Wildcards are rejected.
    pub fn set_reply_subject(&mut self, subject: &str) -> Result<()> {
        self.ensure_live()?;
        self.reply_subject = Some(Subject::publishable(subject)?);
        Ok(())
    }

    pub(crate) fn send_subject_ref(&self) -> Option<&Subject> {
        self.send_subject.as_ref()
    }

    pub(crate) fn reply_subject_ref(&self) -> Option<&Subject> {
        self.reply_subject.as_ref()
    }

    pub(crate) fn set_subjects(&mut self, send: Option<Subject>, reply: Option<Subject>) {
        self.send_subject = send;
        self.reply_subject = reply;
    }

    // =========================================================================
    // Keyed access
    // =========================================================================

    /// Append a field. Fails with `AlreadyExists` when the key is present or a
    /// non-zero id is already used by another field.
    pub fn add<'k, V: Into<FieldValue>>(
        &mut self,
        key: impl Into<FieldKey<'k>>,
        value: V,
    ) -> Result<()> {
        self.ensure_live()?;
        let key = key.into();
        if self.position(&key)?.is_some() {
            return Err(Error::already_exists(format!("field {} already present", key)));
        }
        self.fields
            .push(MessageField::new(key.name, key.id, value.into())?);
        Ok(())
    }

    /// Replace the value stored under `key`, or append it when absent.
    pub fn update<'k, V: Into<FieldValue>>(
        &mut self,
        key: impl Into<FieldKey<'k>>,
        value: V,
    ) -> Result<()> {
        self.ensure_live()?;
        let key = key.into();
        match self.position(&key)? {
            Some(idx) => self.fields[idx].set_value(value.into()),
            None => self
                .fields
                .push(MessageField::new(key.name, key.id, value.into())?),
        }
        Ok(())
    }

    /// Typed read. `NotFound` when absent, `InvalidField` on a type mismatch.
    pub fn get<'k, T: FieldType>(&self, key: impl Into<FieldKey<'k>>) -> Result<T> {
        let key = key.into();
        let field = self.field(key)?;
        T::from_value(field.value()).ok_or_else(|| {
            Error::invalid_field(format!(
                "field {} is {}, requested {}",
                key,
                field.data_type(),
                T::DATA_TYPE
            ))
        })
    }

    /// Typed read with a default. The default is substituted on failure and
    /// the failure is kept in [`Defaulted::status`].
    pub fn get_or<'k, T: FieldType>(
        &self,
        key: impl Into<FieldKey<'k>>,
        default: T,
    ) -> Defaulted<T> {
        Defaulted::resolve(self.get(key), default)
    }

    /// Borrow the field stored under `key`.
    pub fn field<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<&MessageField> {
        self.ensure_live()?;
        let key = key.into();
        match self.position(&key)? {
            Some(idx) => Ok(&self.fields[idx]),
            None => Err(Error::not_found(format!("field {}", key))),
        }
    }

    pub fn contains<'k>(&self, key: impl Into<FieldKey<'k>>) -> bool {
        let key = key.into();
        !self.destroyed && matches!(self.position(&key), Ok(Some(_)))
    }

    /// Remove the field stored under `key`.
    pub fn remove_field<'k>(&mut self, key: impl Into<FieldKey<'k>>) -> Result<MessageField> {
        self.ensure_live()?;
        let key = key.into();
        match self.position(&key)? {
            Some(idx) => Ok(self.fields.remove(idx)),
            None => Err(Error::not_found(format!("field {}", key))),
        }
    }

    /// Borrow a string field without copying.
    pub fn get_str<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<&str> {
        let key = key.into();
        match self.field(key)?.value() {
            FieldValue::String(s) => Ok(s),
            other => Err(Error::invalid_field(format!(
                "field {} is {}, requested string",
                key,
                other.data_type()
            ))),
        }
    }

    /// Borrow a nested message without copying.
    pub fn get_message<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<&MessageValue> {
        let key = key.into();
        match self.field(key)?.value() {
            FieldValue::Message(m) => Ok(m),
            other => Err(Error::invalid_field(format!(
                "field {} is {}, requested message",
                key,
                other.data_type()
            ))),
        }
    }

    // =========================================================================
    // Positional access
    // =========================================================================

    pub fn field_by_index(&self, index: usize) -> Result<&MessageField> {
        self.ensure_live()?;
        self.fields.get(index).ok_or_else(|| {
            Error::not_found(format!(
                "field index {} out of range ({} fields)",
                index,
                self.fields.len()
            ))
        })
    }

    /// The `instance`-th field (1-based) named `name`, whatever its id.
    pub fn field_instance(&self, name: &str, instance: usize) -> Result<&MessageField> {
        self.ensure_live()?;
        let idx = self.instance_position(name, instance)?;
        Ok(&self.fields[idx])
    }

    pub fn remove_field_instance(&mut self, name: &str, instance: usize) -> Result<MessageField> {
        self.ensure_live()?;
        let idx = self.instance_position(name, instance)?;
        Ok(self.fields.remove(idx))
    }

    pub fn fields(&self) -> impl Iterator<Item = &MessageField> {
        self.fields.iter()
    }

    pub fn num_fields(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(self.fields.len())
    }

    /// Size of the encoded form, in bytes.
    pub fn byte_size(&self) -> Result<usize> {
        self.ensure_live()?;
        Ok(codec::encoded_len(self))
    }

    /// Debug rendering; not a stable wire format.
    pub fn to_display_string(&self) -> Result<String> {
        self.ensure_live()?;
        Ok(self.to_string())
    }

    pub(crate) fn push_decoded(&mut self, field: MessageField) {
        self.fields.push(field);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed {
            return Err(Error::invalid_container("message has been destroyed"));
        }
        Ok(())
    }

    /// Locate `key`. A non-zero id that belongs to a differently named field
    /// is an `AlreadyExists` conflict rather than a miss.
    fn position(&self, key: &FieldKey<'_>) -> Result<Option<usize>> {
        field::validate_name(key.name)?;
        if key.id != 0 {
            if let Some((idx, f)) = self.fields.iter().enumerate().find(|(_, f)| f.id() == key.id)
            {
                if f.name() != key.name {
                    return Err(Error::already_exists(format!(
                        "field id {} is bound to field {}",
                        key.id,
                        f.name()
                    )));
                }
                return Ok(Some(idx));
            }
            return Ok(None);
        }
        Ok(self.fields.iter().position(|f| f.matches(key)))
    }

    fn instance_position(&self, name: &str, instance: usize) -> Result<usize> {
        if instance == 0 {
            return Err(Error::invalid_argument("field instances are numbered from 1"));
        }
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name() == name)
            .nth(instance - 1)
            .map(|(idx, _)| idx)
            .ok_or_else(|| Error::not_found(format!("instance {} of field {}", instance, name)))
    }
}

impl Clone for MessageValue {
    /// Clones are always caller-owned, even when cloning a lent message.
    fn clone(&self) -> Self {
        let mut copy = self.create_copy_unchecked();
        copy.destroyed = self.destroyed;
        copy
    }
}

impl PartialEq for MessageValue {
    /// Structural equality: fields in order plus both subjects.
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
            && self.send_subject == other.send_subject
            && self.reply_subject == other.reply_subject
    }
}

impl fmt::Display for MessageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str("}")
    }
}
