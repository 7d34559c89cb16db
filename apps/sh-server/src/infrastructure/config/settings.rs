//! Server Configuration Settings
//!
//! Configuration types for the Sh server, loaded from environment variables.

use std::time::Duration;

use crate::application::services::{DEFAULT_NOTIFY_INTERVAL, DispatcherConfig};
use crate::domain::peer::PeerIdentity;

/// Push notification settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationSettings {
    /// Interval between push notifications for recurring subscriptions.
    pub interval: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_NOTIFY_INTERVAL,
        }
    }
}

impl From<NotificationSettings> for DispatcherConfig {
    fn from(settings: NotificationSettings) -> Self {
        Self {
            notify_interval: settings.interval,
        }
    }
}

/// Event loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLoopSettings {
    /// Capacity of the inbound event channel.
    pub queue_capacity: usize,
}

impl Default for EventLoopSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// Push notification settings.
    pub notification: NotificationSettings,
    /// Event loop settings.
    pub event_loop: EventLoopSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Peers announced by the in-process transport.
    pub peers: Vec<PeerIdentity>,
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable or zero value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is unparsable or zero where a positive
    /// value is required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let interval_ms = parse_positive(
            &lookup,
            "SH_SERVER_NOTIFY_INTERVAL_MS",
            u64::try_from(DEFAULT_NOTIFY_INTERVAL.as_millis()).unwrap_or(u64::MAX),
        )?;

        let queue_capacity = parse_positive(
            &lookup,
            "SH_SERVER_EVENT_QUEUE_CAPACITY",
            EventLoopSettings::default().queue_capacity,
        )?;

        let health_port = parse_or_default(
            &lookup,
            "SH_SERVER_HEALTH_PORT",
            ServerSettings::default().health_port,
        )?;

        let peers = lookup("SH_SERVER_PEERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PeerIdentity::new)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            notification: NotificationSettings {
                interval: Duration::from_millis(interval_ms),
            },
            event_loop: EventLoopSettings { queue_capacity },
            server: ServerSettings { health_port },
            peers,
        })
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// Environment variable must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    MustBePositive(String),
}

fn parse_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
    }
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let value = parse_or_default(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::MustBePositive(key.to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.notification.interval, Duration::from_millis(5000));
        assert_eq!(config.event_loop.queue_capacity, 1024);
        assert_eq!(config.server.health_port, 8083);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn overrides_are_applied() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SH_SERVER_NOTIFY_INTERVAL_MS", "250"),
            ("SH_SERVER_EVENT_QUEUE_CAPACITY", "16"),
            ("SH_SERVER_HEALTH_PORT", "9000"),
            ("SH_SERVER_PEERS", "aaa://hss-a:3868, ,aaa://hss-b:3868"),
        ]))
        .unwrap();

        assert_eq!(config.notification.interval, Duration::from_millis(250));
        assert_eq!(config.event_loop.queue_capacity, 16);
        assert_eq!(config.server.health_port, 9000);
        assert_eq!(
            config.peers,
            vec![
                PeerIdentity::new("aaa://hss-a:3868"),
                PeerIdentity::new("aaa://hss-b:3868")
            ]
        );
    }

    #[test_case("SH_SERVER_NOTIFY_INTERVAL_MS", "soon" ; "non-numeric interval")]
    #[test_case("SH_SERVER_EVENT_QUEUE_CAPACITY", "-1" ; "negative capacity")]
    #[test_case("SH_SERVER_HEALTH_PORT", "70000" ; "port out of range")]
    fn invalid_values_are_rejected(key: &str, value: &str) {
        let err = ServerConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();

        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string()
            }
        );
    }

    #[test_case("SH_SERVER_NOTIFY_INTERVAL_MS" ; "zero interval")]
    #[test_case("SH_SERVER_EVENT_QUEUE_CAPACITY" ; "zero capacity")]
    fn zero_is_rejected(key: &str) {
        let err = ServerConfig::from_lookup(lookup(&[(key, "0")])).unwrap_err();

        assert_eq!(err, ConfigError::MustBePositive(key.to_string()));
    }

    #[test]
    fn notification_settings_into_dispatcher_config() {
        let config: DispatcherConfig = NotificationSettings {
            interval: Duration::from_millis(10),
        }
        .into();

        assert_eq!(config.notify_interval, Duration::from_millis(10));
    }
}
