//! # flagwire
//!
//! Persistent, length-prefixed, action-dispatched TCP messaging link used
//! by agent and daemon components of a CTF platform.
//!
//! ## Architecture
//!
//! - **Wire format**: every message is `[action:1][length:8 BE][payload]`;
//!   no delimiter, no checksum, no version byte.
//! - **Connection**: one [`Conn`] owns one byte stream and runs a reader
//!   task, serialized writes, and an optional Ping/Pong heartbeat, with
//!   bounded automatic reconnection on liveness failures.
//! - **Dispatch**: incoming frames are routed by action tag to registered
//!   handlers, each invocation on its own task.
//! - **Transport**: plain TCP, optionally upgraded to TLS right after the
//!   connect.
//!
//! ## Example
//!
//! ```ignore
//! use flagwire::{handler_fn, Action, Conn, ConnConfig};
//!
//! #[tokio::main]
//! async fn main() -> flagwire::Result<()> {
//!     let cfg = ConnConfig::default_for("10.0.0.2:7000", "agent-1", None);
//!     let conn = Conn::new(cfg);
//!     conn.register(
//!         Action::PUSH_CONFIG,
//!         handler_fn(|_conn, _header, payload| async move {
//!             tracing::info!(len = payload.len(), "daemon pushed config");
//!             Ok(())
//!         }),
//!     )
//!     .await;
//!
//!     conn.connect().await?;
//!     conn.send_frame(Action::HELLO, b"agent-1").await?;
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod config;
pub mod conn;
pub mod dial;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod tls;

pub use action::Action;
pub use config::ConnConfig;
pub use conn::{Conn, ConnState, StreamLike};
pub use dial::dial_with_retry;
pub use error::{Result, WireError};
pub use handler::{handler_fn, Handler, HandlerMap};
pub use tls::TlsSettings;
