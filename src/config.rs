//! Link configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a device link.
///
/// Host, port, and timers are inputs to the link engine; how they are sourced
/// (CLI flags, config file, UI field) is up to the embedding application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Instrument (or simulator) address.
    pub host: String,
    /// Instrument TCP port.
    pub port: u16,
    /// Single-shot timeout armed for each connect attempt.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Cadence of the automatic `GET_STATUS` poll while connected.
    #[serde(with = "duration_ms")]
    pub status_poll_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 8888,
            connect_timeout: Duration::from_millis(3000),
            status_poll_interval: Duration::from_millis(2000),
        }
    }
}

impl LinkConfig {
    /// Create a configuration for the given endpoint with default timers.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, ..Self::default() }
    }
}

/// Durations serialize as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_endpoint() {
        let config = LinkConfig::default();
        assert_eq!(config.host, "192.168.1.100");
        assert_eq!(config.port, 8888);
        assert_eq!(config.connect_timeout, Duration::from_millis(3000));
        assert_eq!(config.status_poll_interval, Duration::from_millis(2000));
    }

    #[test]
    fn round_trips_through_json_with_millisecond_timers() {
        let config = LinkConfig::new("10.0.0.7", 9000);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"connect_timeout\":3000"));

        let back: LinkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
