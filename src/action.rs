//! Action tags identifying frame types.
//!
//! The action is the first byte of every frame header. Any tag value is
//! representable so headers round-trip bit-exactly; unknown tags parse
//! fine and only fail at dispatch time when no handler is registered.

use std::fmt;

/// 1-byte opcode carried in byte 0 of every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Action(pub u8);

impl Action {
    /// Zero value, never dispatched.
    pub const INVALID: Action = Action(0);
    /// Generic acknowledgment.
    pub const ACK: Action = Action(1);
    /// Error message.
    pub const ERROR: Action = Action(2);

    // Control & lifecycle

    /// Keepalive & healthcheck probe.
    pub const PING: Action = Action(3);
    /// Response to a ping.
    pub const PONG: Action = Action(4);
    /// Initial handshake (agent info).
    pub const HELLO: Action = Action(5);
    /// Disconnect notification.
    pub const GOODBYE: Action = Action(6);

    // Config management

    /// Agent asking for config.
    pub const REQUEST_CONFIG: Action = Action(7);
    /// Daemon pushing config.
    pub const PUSH_CONFIG: Action = Action(8);

    // File transfers

    /// Agent uploads a file (e.g., flag, log).
    pub const SEND_FILE: Action = Action(9);
    /// Daemon requests logs from an agent.
    pub const REQUEST_LOGS: Action = Action(10);
    /// Chunked file part.
    pub const SEND_FILE_CHUNK: Action = Action(11);

    // Status and logs

    /// Agent pushes a status update.
    pub const PUSH_STATUS: Action = Action(12);
    /// Daemon requests current status.
    pub const REQUEST_STATUS: Action = Action(13);

    /// Human-readable tag name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Action::INVALID => "invalid",
            Action::ACK => "ack",
            Action::ERROR => "error",
            Action::PING => "ping",
            Action::PONG => "pong",
            Action::HELLO => "hello",
            Action::GOODBYE => "goodbye",
            Action::REQUEST_CONFIG => "request-config",
            Action::PUSH_CONFIG => "push-config",
            Action::SEND_FILE => "send-file",
            Action::REQUEST_LOGS => "request-logs",
            Action::SEND_FILE_CHUNK => "send-file-chunk",
            Action::PUSH_STATUS => "push-status",
            Action::REQUEST_STATUS => "request-status",
            _ => "unknown",
        }
    }

    /// Whether this tag is one of the reserved, named actions.
    #[inline]
    pub fn is_known(self) -> bool {
        self.0 <= Action::REQUEST_STATUS.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl From<u8> for Action {
    #[inline]
    fn from(tag: u8) -> Self {
        Action(tag)
    }
}

impl From<Action> for u8 {
    #[inline]
    fn from(action: Action) -> u8 {
        action.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_tags_are_contiguous() {
        assert_eq!(Action::INVALID.0, 0);
        assert_eq!(Action::ACK.0, 1);
        assert_eq!(Action::ERROR.0, 2);
        assert_eq!(Action::PING.0, 3);
        assert_eq!(Action::PONG.0, 4);
        assert_eq!(Action::HELLO.0, 5);
        assert_eq!(Action::GOODBYE.0, 6);
        assert_eq!(Action::REQUEST_CONFIG.0, 7);
        assert_eq!(Action::PUSH_CONFIG.0, 8);
        assert_eq!(Action::SEND_FILE.0, 9);
        assert_eq!(Action::REQUEST_LOGS.0, 10);
        assert_eq!(Action::SEND_FILE_CHUNK.0, 11);
        assert_eq!(Action::PUSH_STATUS.0, 12);
        assert_eq!(Action::REQUEST_STATUS.0, 13);
    }

    #[test]
    fn test_unknown_tags_are_representable() {
        let action = Action::from(0xEEu8);
        assert_eq!(u8::from(action), 0xEE);
        assert!(!action.is_known());
        assert_eq!(action.name(), "unknown");
    }

    #[test]
    fn test_display() {
        assert_eq!(Action::PING.to_string(), "ping(3)");
        assert_eq!(Action(200).to_string(), "unknown(200)");
    }
}
