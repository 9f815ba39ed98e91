//! Configuration types for http-courier

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Dispatcher configuration
///
/// Every field has a default, so `Config::default()` (or `{}` in JSON) yields
/// a working dispatcher with four workers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Number of workers, i.e. the maximum number of concurrent requests (default: 4)
    #[serde(default = "default_connections")]
    pub connections: usize,

    /// Size of the chunks used when streaming bodies, in bytes (default: 4096)
    ///
    /// Cancellation is checked and progress reported once per chunk, so this
    /// also bounds cancellation latency.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Capacity of the dispatcher event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Connect timeout applied to tasks that don't set their own (None = transport default)
    #[serde(default, with = "optional_duration_serde")]
    pub default_connect_timeout: Option<Duration>,

    /// Read timeout applied to tasks that don't set their own (None = no timeout)
    #[serde(default, with = "optional_duration_serde")]
    pub default_read_timeout: Option<Duration>,

    /// User-Agent header sent unless a task sets one
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            chunk_size: default_chunk_size(),
            event_buffer: default_event_buffer(),
            default_connect_timeout: None,
            default_read_timeout: None,
            user_agent: None,
        }
    }
}

impl Config {
    /// Configuration with `connections` workers and defaults everywhere else
    pub fn with_connections(connections: usize) -> Self {
        Self {
            connections,
            ..Default::default()
        }
    }

    /// Check the configuration for values the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.connections < 1 {
            return Err(Error::config("connections", "at least 1 connection has to be granted"));
        }
        if self.chunk_size < 1 {
            return Err(Error::config("chunk_size", "chunk size must be at least 1 byte"));
        }
        if self.event_buffer < 1 {
            return Err(Error::config(
                "event_buffer",
                "event buffer must hold at least 1 event",
            ));
        }
        Ok(())
    }
}

fn default_connections() -> usize {
    4
}

fn default_chunk_size() -> usize {
    4096
}

fn default_event_buffer() -> usize {
    1000
}

// Optional Duration serialization helper (whole seconds)
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.connections, 4);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.event_buffer, 1000);
        assert!(config.default_read_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn timeouts_deserialize_from_seconds() {
        let config: Config = serde_json::from_str(
            r#"{"connections": 2, "default_connect_timeout": 5, "default_read_timeout": 30}"#,
        )
        .unwrap();
        assert_eq!(config.connections, 2);
        assert_eq!(config.default_connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.default_read_timeout, Some(Duration::from_secs(30)));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["default_read_timeout"], 30);
    }

    #[test]
    fn zero_connections_is_rejected_with_key() {
        let err = Config::with_connections(0).validate().unwrap_err();
        match err {
            Error::InvalidConfiguration { key, .. } => {
                assert_eq!(key.as_deref(), Some("connections"))
            }
            other => panic!("expected InvalidConfiguration, got: {:?}", other),
        }
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let config = Config {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration { key: Some(k), .. }) if k == "chunk_size"
        ));
    }
}
