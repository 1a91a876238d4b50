//! Connection configuration.
//!
//! A [`ConnConfig`] is immutable after validation; the connection copies
//! the initial handler map out of it and mutates its own copy under the
//! connection lock. The plain-data knobs are `Deserialize` so a config
//! layer can produce a pre-validated record; TLS settings and handlers
//! are wired up in code.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WireError};
use crate::handler::{default_handlers, HandlerMap};
use crate::protocol::{DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use crate::tls::TlsSettings;

/// Default maximum reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: usize = 10;

/// Default wait between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default ping interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default receive timeout.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection configuration.
#[derive(Clone, Deserialize)]
pub struct ConnConfig {
    /// The address to connect to.
    pub address: String,
    /// The name of the connection. Only significant in logs.
    #[serde(default)]
    pub name: String,

    /// Whether to perform a TLS client handshake after TCP connect.
    #[serde(default)]
    pub use_tls: bool,
    /// TLS client settings; required when `use_tls` is set.
    #[serde(skip)]
    pub tls: Option<TlsSettings>,

    /// Whether failed heartbeats trigger a reconnect instead of a close.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Maximum dial attempts per reconnect.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: usize,
    /// The amount of time to wait between reconnection attempts.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,

    /// The interval at which to send pings. Zero disables the heartbeat.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// The maximum amount of time to wait for a message to be sent.
    #[serde(default = "default_send_timeout")]
    pub send_timeout: Duration,
    /// The maximum amount of time to wait for a message to be received.
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout: Duration,

    /// Advisory header size cap; the header codec itself is fixed-size.
    #[serde(default = "default_max_header_size")]
    pub max_header_size: u64,
    /// Frames whose length field exceeds this are fatal to the connection.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u64,

    /// Handlers installed when the connection is constructed.
    #[serde(skip, default = "default_handlers")]
    pub handlers: HandlerMap,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_max_reconnect_attempts() -> usize {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_reconnect_delay() -> Duration {
    DEFAULT_RECONNECT_DELAY
}

fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

fn default_send_timeout() -> Duration {
    DEFAULT_SEND_TIMEOUT
}

fn default_recv_timeout() -> Duration {
    DEFAULT_RECV_TIMEOUT
}

fn default_max_header_size() -> u64 {
    DEFAULT_MAX_HEADER_SIZE
}

fn default_max_message_size() -> u64 {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl ConnConfig {
    /// Build a config with the default knobs and control-plane handlers.
    ///
    /// `use_tls` follows from whether TLS settings are supplied, matching
    /// the common case; set the flag manually to force a mismatch in
    /// tests.
    pub fn default_for(
        address: impl Into<String>,
        name: impl Into<String>,
        tls: Option<TlsSettings>,
    ) -> Self {
        Self {
            address: address.into(),
            name: name.into(),

            use_tls: tls.is_some(),
            tls,

            auto_reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,

            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,

            send_timeout: DEFAULT_SEND_TIMEOUT,
            recv_timeout: DEFAULT_RECV_TIMEOUT,

            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,

            handlers: default_handlers(),
        }
    }

    /// Validate the config.
    ///
    /// A missing TLS config with `use_tls` set is not rejected here; it
    /// surfaces from the upgrade itself.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(WireError::AddressRequired);
        }
        Ok(())
    }
}

impl fmt::Debug for ConnConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnConfig")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("use_tls", &self.use_tls)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("send_timeout", &self.send_timeout)
            .field("recv_timeout", &self.recv_timeout)
            .field("max_header_size", &self.max_header_size)
            .field("max_message_size", &self.max_message_size)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;

    #[test]
    fn test_defaults() {
        let cfg = ConnConfig::default_for("127.0.0.1:7000", "agent-1", None);

        assert!(!cfg.use_tls);
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.max_reconnect_attempts, 10);
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(5));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(cfg.send_timeout, Duration::from_secs(5));
        assert_eq!(cfg.recv_timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_header_size, 1 << 20);
        assert_eq!(cfg.max_message_size, 4 << 20);
        assert!(cfg.handlers.contains_key(&Action::PING));
        assert!(cfg.handlers.contains_key(&Action::PONG));
    }

    #[test]
    fn test_validate_rejects_empty_address() {
        let cfg = ConnConfig::default_for("", "nameless", None);
        assert!(matches!(cfg.validate(), Err(WireError::AddressRequired)));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let cfg: ConnConfig = serde_json::from_str(r#"{"address": "10.0.0.2:7000"}"#).unwrap();

        assert_eq!(cfg.address, "10.0.0.2:7000");
        assert!(cfg.name.is_empty());
        assert!(!cfg.use_tls);
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.max_reconnect_attempts, 10);
        assert_eq!(cfg.max_message_size, 4 << 20);
        assert!(cfg.handlers.contains_key(&Action::PING));
    }

    #[test]
    fn test_deserialize_overrides() {
        let cfg: ConnConfig = serde_json::from_str(
            r#"{
                "address": "10.0.0.2:7000",
                "name": "agent-2",
                "auto_reconnect": false,
                "max_reconnect_attempts": 3,
                "reconnect_delay": {"secs": 1, "nanos": 0},
                "max_message_size": 1024
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.name, "agent-2");
        assert!(!cfg.auto_reconnect);
        assert_eq!(cfg.max_reconnect_attempts, 3);
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(1));
        assert_eq!(cfg.max_message_size, 1024);
    }
}
