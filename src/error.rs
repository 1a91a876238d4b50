//! Error types for flagwire.

use thiserror::Error;

/// Main error type for all connection operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer than `HEADER_SIZE` bytes were handed to the header decoder.
    #[error("invalid packet header")]
    InvalidHeader,

    /// A frame's length field exceeds the configured maximum.
    ///
    /// This is the one protocol violation that is fatal to the connection.
    #[error("payload too large: {len} > {max}")]
    PayloadTooLarge {
        /// Length claimed by the frame header.
        len: u64,
        /// Configured maximum message size.
        max: u64,
    },

    /// Reserved for callers validating action tags out of band; unknown
    /// tags on the wire are dispatched as "no handler" instead.
    #[error("invalid action: {0}")]
    InvalidAction(u8),

    /// The connection reached its terminal Closed state.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation requires an Open connection.
    #[error("connection not established")]
    NotEstablished,

    /// A reconnect is already in progress.
    #[error("connection already reconnecting")]
    AlreadyReconnecting,

    /// TLS client handshake failed.
    #[error("tls upgrade failed: {0}")]
    TlsUpgradeFailed(#[source] std::io::Error),

    /// TLS was requested but no TLS settings were supplied.
    #[error("tls config is required")]
    MissingTlsConfig,

    /// `ConnConfig.address` is empty.
    #[error("address is required")]
    AddressRequired,

    /// A write did not complete within the configured send timeout.
    #[error("send timed out")]
    SendTimeout,

    /// No pong answered a ping within the pong deadline.
    #[error("pong timeout")]
    PongTimeout,

    /// The reconnect loop ran out of attempts; carries every per-attempt
    /// cause.
    #[error("exhausted reconnect attempts after {attempts} attempts: [{}]", format_causes(.causes))]
    ExhaustedReconnectAttempts {
        /// How many attempts were made.
        attempts: usize,
        /// The error from each failed attempt, in order.
        causes: Vec<WireError>,
    },
}

fn format_causes(causes: &[WireError]) -> String {
    causes
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_attempts_joins_causes() {
        let err = WireError::ExhaustedReconnectAttempts {
            attempts: 2,
            causes: vec![WireError::NotEstablished, WireError::MissingTlsConfig],
        };
        let msg = err.to_string();
        assert!(msg.contains("after 2 attempts"));
        assert!(msg.contains("connection not established"));
        assert!(msg.contains("tls config is required"));
    }
}
