//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context. Variants are grouped into classes
//! (container, resource, timing, fatal) via [`Error::class`].

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the message bus runtime.
#[derive(Error, Debug)]
pub enum Error {
    // -------------------------------------------------------------------------
    // Container errors
    // -------------------------------------------------------------------------
    /// Message used after `destroy()`.
    #[error("invalid container: {0}")]
    InvalidContainer(String),

    /// Field exists but cannot satisfy the request (type mismatch, bad index).
    #[error("invalid field: {0}")]
    InvalidField(String),

    /// Field, event or other addressed item not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// (name, id) pair already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Ill-formed input (empty name, bad subject, zero interval, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Encoded bytes could not be decoded into a message.
    #[error("decode error: {0}")]
    Decode(String),

    // -------------------------------------------------------------------------
    // Resource errors
    // -------------------------------------------------------------------------
    /// Queue handle is stale, destroyed, or the operation is not allowed on it.
    #[error("invalid queue: {0}")]
    InvalidQueue(String),

    /// Transport is missing or no longer valid.
    #[error("invalid transport: {0}")]
    InvalidTransport(String),

    /// Dispatcher already destroyed.
    #[error("invalid dispatcher: {0}")]
    InvalidDispatcher(String),

    /// Event spec carries no callback.
    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    /// Event identity is already bound to an active registration.
    #[error("id in use: {0}")]
    IdInUse(String),

    /// Resource still referenced (queue with a bound dispatcher).
    #[error("resource in use: {0}")]
    ResourceInUse(String),

    // -------------------------------------------------------------------------
    // Timing errors
    // -------------------------------------------------------------------------
    /// Bounded wait elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    // -------------------------------------------------------------------------
    // Fatal errors
    // -------------------------------------------------------------------------
    /// Runtime failed to initialize. Not recoverable without reopening.
    #[error("runtime initialization failed: {0}")]
    FatalInit(String),

    /// Runtime has been closed.
    #[error("runtime closed: {0}")]
    Closed(String),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Container,
    Resource,
    Timing,
    Fatal,
    Environment,
}

impl Error {
    /// Class the error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::InvalidContainer(_)
            | Error::InvalidField(_)
            | Error::NotFound(_)
            | Error::AlreadyExists(_)
            | Error::InvalidArgument(_)
            | Error::Decode(_) => ErrorClass::Container,
            Error::InvalidQueue(_)
            | Error::InvalidTransport(_)
            | Error::InvalidDispatcher(_)
            | Error::InvalidCallback(_)
            | Error::IdInUse(_)
            | Error::ResourceInUse(_) => ErrorClass::Resource,
            Error::Timeout(_) => ErrorClass::Timing,
            Error::FatalInit(_) | Error::Closed(_) => ErrorClass::Fatal,
            Error::Config(_) | Error::Io(_) => ErrorClass::Environment,
        }
    }

    /// Stable status code for logging or wire mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidContainer(_) => "INVALID_CONTAINER",
            Error::InvalidField(_) => "INVALID_FIELD",
            Error::NotFound(_) => "NOT_FOUND",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::Decode(_) => "DECODE",
            Error::InvalidQueue(_) => "INVALID_QUEUE",
            Error::InvalidTransport(_) => "INVALID_TRANSPORT",
            Error::InvalidDispatcher(_) => "INVALID_DISPATCHER",
            Error::InvalidCallback(_) => "INVALID_CALLBACK",
            Error::IdInUse(_) => "ID_IN_USE",
            Error::ResourceInUse(_) => "RESOURCE_IN_USE",
            Error::Timeout(_) => "TIMEOUT",
            Error::FatalInit(_) => "FATAL_INIT",
            Error::Closed(_) => "CLOSED",
            Error::Config(_) => "CONFIG",
            Error::Io(_) => "IO",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

// Convenience constructors
impl Error {
    pub fn invalid_container(msg: impl Into<String>) -> Self {
        Self::InvalidContainer(msg.into())
    }

    pub fn invalid_field(msg: impl Into<String>) -> Self {
        Self::InvalidField(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn invalid_queue(msg: impl Into<String>) -> Self {
        Self::InvalidQueue(msg.into())
    }

    pub fn invalid_transport(msg: impl Into<String>) -> Self {
        Self::InvalidTransport(msg.into())
    }

    pub fn invalid_dispatcher(msg: impl Into<String>) -> Self {
        Self::InvalidDispatcher(msg.into())
    }

    pub fn invalid_callback(msg: impl Into<String>) -> Self {
        Self::InvalidCallback(msg.into())
    }

    pub fn id_in_use(msg: impl Into<String>) -> Self {
        Self::IdInUse(msg.into())
    }

    pub fn resource_in_use(msg: impl Into<String>) -> Self {
        Self::ResourceInUse(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn fatal_init(msg: impl Into<String>) -> Self {
        Self::FatalInit(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert_eq!(Error::not_found("x").class(), ErrorClass::Container);
        assert_eq!(Error::resource_in_use("q").class(), ErrorClass::Resource);
        assert_eq!(Error::timeout("t").class(), ErrorClass::Timing);
        assert_eq!(Error::fatal_init("boom").class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_codes_and_messages() {
        let err = Error::already_exists("field X");
        assert_eq!(err.code(), "ALREADY_EXISTS");
        assert_eq!(err.to_string(), "already exists: field X");
        assert!(Error::not_found("y").is_not_found());
        assert!(Error::timeout("z").is_timeout());
    }
}
