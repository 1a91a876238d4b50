//! Handler registry and default control-plane handlers.
//!
//! Each received frame is dispatched by its action tag to a registered
//! [`Handler`] on a freshly spawned task, so a slow handler never blocks
//! the reader. Handlers get the connection itself, the decoded header,
//! and the payload bytes; outbound frames must go through
//! [`Conn::write`](crate::conn::Conn::write) (or the frame helpers on
//! `Conn`) so writes stay serialized.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::action::Action;
use crate::conn::Conn;
use crate::error::Result;
use crate::protocol::Header;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for per-action frame handlers.
///
/// Invoked once per received frame of the registered action. Handlers must
/// not assume exclusive access to the underlying stream.
pub trait Handler: Send + Sync {
    /// Handle one received frame.
    fn call(&self, conn: Conn, header: Header, payload: Bytes) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Conn, Header, Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, conn: Conn, header: Header, payload: Bytes) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.0)(conn, header, payload))
    }
}

/// Wrap an async closure as a shareable handler.
///
/// # Example
///
/// ```ignore
/// let handler = handler_fn(|conn, header, payload| async move {
///     tracing::info!(len = payload.len(), "got status update");
///     Ok(())
/// });
/// conn.register(Action::PUSH_STATUS, handler).await;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Conn, Header, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Action → handler map.
///
/// Lives under the connection lock: `Conn::register` mutates it, the
/// dispatch path reads it.
pub type HandlerMap = HashMap<Action, Arc<dyn Handler>>;

/// The default control-plane handlers.
///
/// Ping replies with a Pong; Pong feeds the heartbeat's single-slot
/// signal, dropping the event when the slot is already full.
pub fn default_handlers() -> HandlerMap {
    let mut handlers: HandlerMap = HashMap::new();

    handlers.insert(
        Action::PING,
        handler_fn(|conn, _header, _payload| async move {
            if let Err(e) = conn.send_pong().await {
                tracing::error!(name = %conn.name(), error = %e, "failed to send pong");
            }
            Ok(())
        }),
    );

    handlers.insert(
        Action::PONG,
        handler_fn(|conn, _header, _payload| async move {
            conn.signal_pong().await;
            Ok(())
        }),
    );

    handlers
}
