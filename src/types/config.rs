//! Configuration structures.
//!
//! Every section defaults sensibly, so `Config::default()` is a working
//! runtime configuration. Partial JSON documents are accepted.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::Result;
use crate::queue::QueueLimits;

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Dispatcher thread configuration.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Defaults applied to newly created queues.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Event lifecycle configuration.
    #[serde(default)]
    pub events: EventConfig,

    /// Transport boundary configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse a (possibly partial) JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// How long a dispatcher waits for work before re-checking its stop flag.
    /// Bounds dispatcher shutdown latency.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Thread name prefix for dispatcher threads.
    pub thread_name_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(100),
            thread_name_prefix: "msgbus-dispatch".to_string(),
        }
    }
}

/// Queue defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Priority assigned to queues created without one.
    pub default_priority: u32,

    /// Pending-depth threshold past which an admission is logged at warn.
    /// Zero disables the warning.
    pub depth_warning: usize,

    /// Admission limits for queues created without explicit limits.
    /// Never applied to the default queue.
    #[serde(default)]
    pub default_limits: QueueLimits,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_priority: 1,
            depth_warning: 10_000,
            default_limits: QueueLimits::default(),
        }
    }
}

/// What `destroy()` does about a callback already running for the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DestroyPolicy {
    /// Wait for an in-flight invocation on another thread to finish.
    #[default]
    Barrier,
    /// Return immediately; the in-flight invocation may finish afterwards.
    BestEffort,
}

/// Event lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EventConfig {
    pub destroy_policy: DestroyPolicy,
}

/// Transport boundary configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Timeout used by `send_request` callers that do not pick one.
    #[serde(with = "humantime_serde")]
    pub default_request_timeout: Duration,

    /// Largest encoded message the in-process transport accepts.
    pub max_message_bytes: usize,

    /// Prefix for inbox subjects.
    pub inbox_prefix: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_request_timeout: Duration::from_secs(5),
            max_message_bytes: 8 * 1024 * 1024,
            inbox_prefix: "_INBOX".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json_str(
            r#"{ "dispatcher": { "idle_timeout": "250ms", "thread_name_prefix": "d" },
                 "events": { "destroy_policy": "best_effort" } }"#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.idle_timeout, Duration::from_millis(250));
        assert_eq!(config.events.destroy_policy, DestroyPolicy::BestEffort);
        assert_eq!(config.transport.inbox_prefix, "_INBOX");
        assert_eq!(config.queue.default_priority, 1);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = Config::from_json_str("{ not json").unwrap_err();
        assert_eq!(err.code(), "CONFIG");
    }
}
