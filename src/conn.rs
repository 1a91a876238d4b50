//! The connection state machine.
//!
//! A [`Conn`] owns one byte stream and coordinates three concerns on top
//! of it:
//!
//! - a reader task that decodes incoming frames and dispatches each one
//!   to its registered handler on a fresh task,
//! - serialized frame writes behind a dedicated send lock,
//! - an optional heartbeat task probing liveness with Ping/Pong frames.
//!
//! ```text
//! caller ──► write ──────────► send lock ──► stream
//! stream ──► reader task ──► header codec ──► handler map ──► spawned handler
//! ticker ──► heartbeat ──► ping ──► (pong signal | timeout) ──► reconnect-or-close
//! ```
//!
//! Failures split three ways: transient read errors are logged and
//! tolerated, peer close and oversized payloads are fatal, and heartbeat
//! failures feed the bounded reconnect path.
//!
//! Lock order is conn lock, then send lock, then the leaf locks (reader
//! half, pong receiver). Never the reverse.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::config::ConnConfig;
use crate::error::{Result, WireError};
use crate::handler::{Handler, HandlerMap};
use crate::protocol::{build_frame, Header, HEADER_SIZE};
use crate::tls;

/// Fixed deadline for a pong to answer a ping.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive non-EOF header-read failures tolerated before the
/// connection is closed.
const MAX_HEADER_READ_ERRORS: u32 = 5;

/// Connection lifecycle states.
///
/// `Unknown` is entered only when a close itself fails and the true
/// socket state can no longer be asserted. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Constructed, never opened.
    Idle,
    /// Close failed; socket state unasserted.
    Unknown,
    /// Reader running, writes accepted.
    Open,
    /// Terminal.
    Closed,
    /// Reconnect in progress.
    Reconnecting,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnState::Idle => "idle",
            ConnState::Open => "open",
            ConnState::Closed => "closed",
            ConnState::Reconnecting => "reconnecting",
            ConnState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Marker for duplex byte streams the connection can own: plain TCP or a
/// TLS-wrapped stream.
pub trait StreamLike: AsyncRead + AsyncWrite + Send + Unpin {}

impl<S: AsyncRead + AsyncWrite + Send + Unpin> StreamLike for S {}

type BoxedStream = Box<dyn StreamLike>;

/// Why the reader loop stopped.
enum ReadExit {
    /// Close cancelled the loop.
    Cancelled,
    /// Clean EOF on a header boundary.
    PeerClosed,
    /// A frame announced more bytes than the configured maximum.
    PayloadTooLarge { len: u64 },
    /// Too many consecutive header-read failures.
    ReadFailed(std::io::Error),
}

/// State protected by the conn lock.
struct Shared {
    state: ConnState,
    /// Bumped on every successful connect; stale reader tasks must not
    /// close a newer stream.
    epoch: u64,
    last_ping: Instant,
    handlers: HandlerMap,
    /// Single-slot pong sender; recreated on each connect.
    pong_tx: Option<mpsc::Sender<()>>,
    /// Latched broadcast flipped exactly once when the connection closes.
    read_done_tx: Option<watch::Sender<bool>>,
    read_done_rx: Option<watch::Receiver<bool>>,
    /// Cancels the reader and heartbeat of the current epoch.
    cancel: CancellationToken,
}

struct Inner {
    config: ConnConfig,
    shared: RwLock<Shared>,
    /// Send lock: serializes writes and brackets the send timeout.
    send: Mutex<Option<WriteHalf<BoxedStream>>>,
    /// Reader half; held by the reader task for the duration of each frame.
    recv: Mutex<Option<ReadHalf<BoxedStream>>>,
    /// Pong receiver; consumed by the heartbeat (or by tests via
    /// [`Conn::wait_pong`]).
    pong_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

/// A persistent, framed, bi-directional messaging connection.
///
/// Cheaply cloneable; all clones share one underlying stream and state
/// machine.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<Inner>,
}

impl Conn {
    /// Create an idle connection that will dial `config.address` on
    /// [`Conn::connect`].
    pub fn new(config: ConnConfig) -> Conn {
        Self::build(None, config)
    }

    /// Create an idle connection around a pre-established stream, e.g. the
    /// server side of an accept. Call [`Conn::listen`] to start reading.
    pub fn with_stream<S>(stream: S, config: ConnConfig) -> Conn
    where
        S: StreamLike + 'static,
    {
        Self::build(Some(Box::new(stream)), config)
    }

    fn build(stream: Option<BoxedStream>, config: ConnConfig) -> Conn {
        let (reader, writer) = match stream {
            Some(s) => {
                let (r, w) = tokio::io::split(s);
                (Some(r), Some(w))
            }
            None => (None, None),
        };

        let handlers = config.handlers.clone();
        Conn {
            inner: Arc::new(Inner {
                config,
                shared: RwLock::new(Shared {
                    state: ConnState::Idle,
                    epoch: 0,
                    last_ping: Instant::now(),
                    handlers,
                    pong_tx: None,
                    read_done_tx: None,
                    read_done_rx: None,
                    cancel: CancellationToken::new(),
                }),
                send: Mutex::new(writer),
                recv: Mutex::new(reader),
                pong_rx: Mutex::new(None),
            }),
        }
    }

    /// The connection's display name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The connection's configuration.
    pub fn config(&self) -> &ConnConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ConnState {
        self.inner.shared.read().await.state
    }

    /// True iff the connection is Open.
    pub async fn is_open(&self) -> bool {
        self.inner.shared.read().await.state == ConnState::Open
    }

    /// When the last heartbeat round completed (or the connection opened).
    pub async fn last_ping(&self) -> Instant {
        self.inner.shared.read().await.last_ping
    }

    /// A latched signal that flips to `true` when the connection closes
    /// and the reader is done. `None` before the first connect.
    pub async fn read_done(&self) -> Option<watch::Receiver<bool>> {
        self.inner.shared.read().await.read_done_rx.clone()
    }

    /// Register a handler for an action.
    ///
    /// Safe to call while Open; takes effect for subsequently received
    /// frames.
    pub async fn register(&self, action: Action, handler: Arc<dyn Handler>) {
        let mut shared = self.inner.shared.write().await;
        shared.handlers.insert(action, handler);
    }

    /// Dial the configured address (upgrading to TLS when enabled), spawn
    /// the reader and heartbeat tasks, and transition to Open.
    ///
    /// A no-op while a reconnect is in progress or when already Open.
    pub async fn connect(&self) -> Result<()> {
        let mut shared = self.inner.shared.write().await;
        let mut send = self.inner.send.lock().await;

        if shared.state == ConnState::Reconnecting {
            return Ok(());
        }
        self.connect_locked(&mut shared, &mut send).await
    }

    /// Transition a connection built with [`Conn::with_stream`] to Open
    /// and run the reader loop inline; the caller controls the task
    /// boundary. A no-op when already Open.
    ///
    /// No heartbeat task is started; the dialing side drives the
    /// keepalive.
    pub async fn listen(&self) -> Result<()> {
        let (cancel, epoch) = {
            let mut shared = self.inner.shared.write().await;
            if shared.state == ConnState::Open {
                return Ok(());
            }
            shared.state = ConnState::Open;
            shared.last_ping = Instant::now();
            shared.cancel = CancellationToken::new();
            shared.epoch += 1;

            let (pong_tx, pong_rx) = mpsc::channel(1);
            shared.pong_tx = Some(pong_tx);
            *self.inner.pong_rx.lock().await = Some(pong_rx);

            let (done_tx, done_rx) = watch::channel(false);
            shared.read_done_tx = Some(done_tx);
            shared.read_done_rx = Some(done_rx);

            (shared.cancel.clone(), shared.epoch)
        };

        self.read_loop(cancel, epoch).await
    }

    /// Write raw bytes to the stream under the send lock, bounded by the
    /// configured send timeout. Returns the number of bytes written.
    ///
    /// Rejected with [`WireError::NotEstablished`] unless the connection
    /// is Open.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        {
            let shared = self.inner.shared.read().await;
            if shared.state != ConnState::Open {
                return Err(WireError::NotEstablished);
            }
        }

        let mut send = self.inner.send.lock().await;
        let writer = send.as_mut().ok_or(WireError::NotEstablished)?;

        let io = async {
            writer.write_all(buf).await?;
            writer.flush().await
        };
        match timeout(self.inner.config.send_timeout, io).await {
            Ok(Ok(())) => Ok(buf.len()),
            Ok(Err(e)) => Err(WireError::Io(e)),
            Err(_) => Err(WireError::SendTimeout),
        }
    }

    /// As [`Conn::write`], discarding the byte count.
    pub async fn safe_write(&self, buf: &[u8]) -> Result<()> {
        self.write(buf).await.map(|_| ())
    }

    /// Read raw bytes from the stream.
    ///
    /// Out-of-band use only (tests, handshake probes); the reader task
    /// owns routine reads and this call blocks while it holds the reader
    /// half.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        {
            let shared = self.inner.shared.read().await;
            if shared.state != ConnState::Open {
                return Err(WireError::NotEstablished);
            }
        }

        let mut recv = self.inner.recv.lock().await;
        let reader = recv.as_mut().ok_or(WireError::NotEstablished)?;
        Ok(reader.read(buf).await?)
    }

    /// Encode and emit one frame as a single serialized write.
    pub async fn send_frame(&self, action: Action, payload: &[u8]) -> Result<()> {
        let header = Header::new(action, payload.len() as u64);
        self.safe_write(&build_frame(&header, payload)).await
    }

    /// Emit a Ping control frame.
    pub async fn send_ping(&self) -> Result<()> {
        self.safe_write(&Header::control(Action::PING).encode())
            .await?;
        tracing::debug!(name = %self.name(), "sent ping");
        Ok(())
    }

    /// Emit a Pong control frame.
    pub async fn send_pong(&self) -> Result<()> {
        self.safe_write(&Header::control(Action::PONG).encode())
            .await?;
        tracing::debug!(name = %self.name(), "sent pong");
        Ok(())
    }

    /// Non-blocking notification that a pong arrived; dropped when the
    /// single slot is already full.
    pub async fn signal_pong(&self) {
        let tx = self.inner.shared.read().await.pong_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.try_send(());
        }
    }

    /// Await the pong signal for at most `dur`.
    ///
    /// Fails with [`WireError::PongTimeout`] on deadline,
    /// [`WireError::ConnectionClosed`] when the signal was torn down, and
    /// [`WireError::NotEstablished`] before the first connect.
    pub async fn wait_pong(&self, dur: Duration) -> Result<()> {
        let mut slot = self.inner.pong_rx.lock().await;
        let rx = slot.as_mut().ok_or(WireError::NotEstablished)?;
        match timeout(dur, rx.recv()).await {
            Ok(Some(())) => Ok(()),
            Ok(None) => Err(WireError::ConnectionClosed),
            Err(_) => Err(WireError::PongTimeout),
        }
    }

    /// Empty the pong slot so a stale pong cannot satisfy the next ping.
    async fn drain_pong(&self) {
        let mut slot = self.inner.pong_rx.lock().await;
        if let Some(rx) = slot.as_mut() {
            while rx.try_recv().is_ok() {}
        }
    }

    /// Close the underlying stream and transition to Closed.
    ///
    /// On stream-close failure the state becomes Unknown and the error is
    /// surfaced. Safe to call repeatedly; the read-done signal fires at
    /// most once.
    pub async fn close(&self) -> Result<()> {
        let mut shared = self.inner.shared.write().await;
        let mut send = self.inner.send.lock().await;
        self.close_locked(&mut shared, &mut send).await
    }

    /// Close only if `epoch` still names the current stream; reader tasks
    /// outliving a reconnect use this so they cannot kill the replacement.
    async fn close_epoch(&self, epoch: u64) -> Result<()> {
        let mut shared = self.inner.shared.write().await;
        if shared.epoch != epoch {
            return Ok(());
        }
        let mut send = self.inner.send.lock().await;
        self.close_locked(&mut shared, &mut send).await
    }

    async fn close_locked(
        &self,
        shared: &mut Shared,
        send: &mut Option<WriteHalf<BoxedStream>>,
    ) -> Result<()> {
        let cfg = &self.inner.config;
        tracing::debug!(
            name = %cfg.name,
            peer = %cfg.address,
            state = %shared.state,
            "closing connection"
        );

        shared.cancel.cancel();

        if let Some(mut writer) = send.take() {
            if let Err(e) = writer.shutdown().await {
                *send = Some(writer);
                shared.state = ConnState::Unknown;
                tracing::error!(name = %cfg.name, error = %e, "failed to close connection");
                return Err(WireError::Io(e));
            }
        }

        if let Some(tx) = shared.read_done_tx.take() {
            let _ = tx.send(true);
        }

        shared.pong_tx = None;
        *self.inner.recv.lock().await = None;

        shared.state = ConnState::Closed;
        Ok(())
    }

    /// Attempt to reconnect up to the configured maximum, sleeping the
    /// reconnect delay between attempts.
    ///
    /// Fails fast with [`WireError::ConnectionClosed`] on a Closed
    /// connection and [`WireError::AlreadyReconnecting`] when another
    /// reconnect is in flight. Total failure aggregates every per-attempt
    /// cause into [`WireError::ExhaustedReconnectAttempts`].
    pub async fn reconnect(&self) -> Result<()> {
        {
            let shared = self.inner.shared.read().await;
            if shared.state == ConnState::Closed {
                return Err(WireError::ConnectionClosed);
            }
            if shared.state == ConnState::Reconnecting {
                return Err(WireError::AlreadyReconnecting);
            }
        }

        let cfg = &self.inner.config;
        let attempts = cfg.max_reconnect_attempts;
        let mut causes = Vec::with_capacity(attempts);

        for attempt in 0..attempts {
            match self.reconnect_once().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(
                        name = %cfg.name,
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "reconnect attempt failed"
                    );
                    causes.push(e);
                    tokio::time::sleep(cfg.reconnect_delay).await;
                }
            }
        }

        tracing::debug!(name = %cfg.name, attempts, "reconnect failed");
        Err(WireError::ExhaustedReconnectAttempts { attempts, causes })
    }

    /// One reconnect attempt: mark Reconnecting and run the internal
    /// connect under both locks.
    async fn reconnect_once(&self) -> Result<()> {
        let mut shared = self.inner.shared.write().await;
        let mut send = self.inner.send.lock().await;

        if shared.state == ConnState::Closed {
            return Err(WireError::ConnectionClosed);
        }
        shared.state = ConnState::Reconnecting;

        tracing::debug!(name = %self.inner.config.name, "reconnecting");
        self.connect_locked(&mut shared, &mut send).await
    }

    /// Reconnect when auto-reconnect is enabled; otherwise, or when the
    /// reconnect fails, close. The reconnect error wins over a secondary
    /// close error, which is logged.
    pub async fn reconnect_or_close(&self) -> Result<()> {
        if self.inner.config.auto_reconnect {
            match self.reconnect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if let Err(close_err) = self.close().await {
                        tracing::error!(
                            name = %self.name(),
                            error = %close_err,
                            "close after failed reconnect also failed"
                        );
                    }
                    return Err(e);
                }
            }
        }
        self.close().await
    }

    /// Internal connect. The caller holds both locks.
    ///
    /// Boxed rather than `async fn` to break the opaque-type cycle with
    /// [`Conn::heartbeat_loop`] → [`Conn::reconnect_or_close`] → this
    /// function, which otherwise defeats rustc's auto-trait inference for
    /// the returned future's `Send`-ness.
    fn connect_locked<'a>(
        &'a self,
        shared: &'a mut Shared,
        send: &'a mut Option<WriteHalf<BoxedStream>>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if shared.state == ConnState::Open {
                return Ok(());
            }

            let cfg = &self.inner.config;
            tracing::debug!(name = %cfg.name, peer = %cfg.address, state = %shared.state, "connecting");

            let stream = match TcpStream::connect(&cfg.address).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!(name = %cfg.name, peer = %cfg.address, error = %e, "dial failed");
                    return Err(WireError::Io(e));
                }
            };

            let stream: BoxedStream = if cfg.use_tls {
                match tls::upgrade_client(stream, cfg.tls.as_ref()).await {
                    Ok(s) => Box::new(s),
                    Err(e) => {
                        tracing::debug!(name = %cfg.name, peer = %cfg.address, error = %e, "tls wrap failed");
                        return Err(e);
                    }
                }
            } else {
                Box::new(stream)
            };

            let (reader, writer) = tokio::io::split(stream);

            // Tear down any previous reader and heartbeat before installing
            // the new stream.
            shared.cancel.cancel();
            shared.cancel = CancellationToken::new();
            shared.epoch += 1;

            let (pong_tx, pong_rx) = mpsc::channel(1);
            shared.pong_tx = Some(pong_tx);
            *self.inner.pong_rx.lock().await = Some(pong_rx);

            let (done_tx, done_rx) = watch::channel(false);
            shared.read_done_tx = Some(done_tx);
            shared.read_done_rx = Some(done_rx);

            *self.inner.recv.lock().await = Some(reader);
            *send = Some(writer);

            shared.state = ConnState::Open;
            shared.last_ping = Instant::now();

            tracing::debug!(name = %cfg.name, peer = %cfg.address, tls = cfg.use_tls, "connected");

            let conn = self.clone();
            let cancel = shared.cancel.clone();
            let epoch = shared.epoch;
            tokio::spawn(async move {
                let _ = conn.read_loop(cancel, epoch).await;
            });

            if !cfg.heartbeat_interval.is_zero() {
                let conn = self.clone();
                let cancel = shared.cancel.clone();
                tokio::spawn(async move {
                    conn.heartbeat_loop(cancel).await;
                });
            }

            Ok(())
        })
    }

    /// The reader loop: one frame per iteration while the connection is
    /// Open.
    ///
    /// Per-frame decode and payload-read failures are logged and
    /// tolerated. EOF on a header boundary and an oversized length field
    /// are fatal. A frame for an unregistered action is fully consumed
    /// before the loop continues, keeping the stream framed.
    async fn read_loop(&self, cancel: CancellationToken, epoch: u64) -> Result<()> {
        let cfg = &self.inner.config;
        tracing::debug!(name = %cfg.name, peer = %cfg.address, "starting read loop");

        let mut header_errors: u32 = 0;

        loop {
            {
                let shared = self.inner.shared.read().await;
                if shared.state != ConnState::Open {
                    tracing::debug!(name = %cfg.name, "connection not open, exiting read loop");
                    return Ok(());
                }
            }

            // Hold the reader half across the whole frame so header and
            // payload cannot be torn apart by an out-of-band read.
            let (header, payload) = {
                let mut recv = self.inner.recv.lock().await;
                let reader = match recv.as_mut() {
                    Some(r) => r,
                    None => return Ok(()),
                };

                let mut header_buf = [0u8; HEADER_SIZE];
                let read = tokio::select! {
                    _ = cancel.cancelled() => return self.exit_read_loop(ReadExit::Cancelled, epoch).await,
                    r = reader.read_exact(&mut header_buf) => r,
                };
                if let Err(e) = read {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        drop(recv);
                        return self.exit_read_loop(ReadExit::PeerClosed, epoch).await;
                    }
                    header_errors += 1;
                    tracing::error!(name = %cfg.name, error = %e, "failed to read header");
                    if header_errors >= MAX_HEADER_READ_ERRORS {
                        drop(recv);
                        return self.exit_read_loop(ReadExit::ReadFailed(e), epoch).await;
                    }
                    continue;
                }
                header_errors = 0;

                let header = match Header::decode(&header_buf) {
                    Ok(h) => h,
                    Err(e) => {
                        tracing::error!(name = %cfg.name, error = %e, "failed to decode header");
                        continue;
                    }
                };

                if header.len > cfg.max_message_size {
                    drop(recv);
                    return self
                        .exit_read_loop(ReadExit::PayloadTooLarge { len: header.len }, epoch)
                        .await;
                }

                let mut payload = vec![0u8; header.len as usize];
                let read = tokio::select! {
                    _ = cancel.cancelled() => return self.exit_read_loop(ReadExit::Cancelled, epoch).await,
                    r = reader.read_exact(&mut payload) => r,
                };
                if let Err(e) = read {
                    tracing::error!(name = %cfg.name, action = %header.action, error = %e, "failed to read payload");
                    continue;
                }

                (header, Bytes::from(payload))
            };

            let handler = {
                let shared = self.inner.shared.read().await;
                shared.handlers.get(&header.action).cloned()
            };
            let Some(handler) = handler else {
                tracing::info!(name = %cfg.name, action = %header.action, "no handler for action");
                continue;
            };

            let conn = self.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.call(conn, header, payload).await {
                    tracing::error!(action = %header.action, error = %e, "handler error");
                }
            });
        }
    }

    /// Resolve a reader-loop exit: log it, close the connection when the
    /// exit is fatal, and produce the loop's result.
    async fn exit_read_loop(&self, exit: ReadExit, epoch: u64) -> Result<()> {
        let cfg = &self.inner.config;
        match exit {
            ReadExit::Cancelled => Ok(()),
            ReadExit::PeerClosed => {
                tracing::info!(name = %cfg.name, peer = %cfg.address, "connection closed by peer");
                self.close_epoch(epoch).await
            }
            ReadExit::PayloadTooLarge { len } => {
                tracing::error!(
                    name = %cfg.name,
                    len,
                    max = cfg.max_message_size,
                    "payload too large, killing connection"
                );
                let _ = self.close_epoch(epoch).await;
                Err(WireError::PayloadTooLarge {
                    len,
                    max: cfg.max_message_size,
                })
            }
            ReadExit::ReadFailed(e) => {
                tracing::error!(
                    name = %cfg.name,
                    error = %e,
                    "too many consecutive header read failures, killing connection"
                );
                let _ = self.close_epoch(epoch).await;
                Err(WireError::Io(e))
            }
        }
    }

    /// The heartbeat loop: ping, await pong, repeat.
    ///
    /// A failed send or a missed pong hands the connection to
    /// [`Conn::reconnect_or_close`] on a fresh task and ends this loop;
    /// the reconnect spawns its own replacement.
    async fn heartbeat_loop(&self, cancel: CancellationToken) {
        let interval = self.inner.config.heartbeat_interval;
        if interval.is_zero() {
            tracing::debug!(name = %self.name(), "heartbeat loop not started");
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so the first
        // ping happens one interval after connect.
        ticker.tick().await;

        tracing::debug!(name = %self.name(), "starting heartbeat loop");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if self.state().await == ConnState::Closed {
                tracing::debug!(name = %self.name(), "connection closed, exiting heartbeat loop");
                return;
            }

            // A stale pong must not satisfy this cycle.
            self.drain_pong().await;

            if let Err(e) = self.send_ping().await {
                tracing::debug!(name = %self.name(), error = %e, "failed to send ping");
                let conn = self.clone();
                tokio::spawn(async move {
                    let _ = conn.reconnect_or_close().await;
                });
                return;
            }

            match self.wait_pong(PONG_TIMEOUT).await {
                Ok(()) => {
                    self.inner.shared.write().await.last_ping = Instant::now();
                }
                Err(WireError::PongTimeout) => {
                    tracing::warn!(name = %self.name(), "pong timeout");
                    let conn = self.clone();
                    tokio::spawn(async move {
                        let _ = conn.reconnect_or_close().await;
                    });
                    return;
                }
                // The pong channel was torn down by a close or a
                // concurrent reconnect; that path owns the recovery.
                Err(_) => return,
            }

            // The extra sleep keeps the effective period at twice the
            // configured interval.
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("name", &self.inner.config.name)
            .field("address", &self.inner.config.address)
            .field("use_tls", &self.inner.config.use_tls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(address: &str) -> ConnConfig {
        let mut cfg = ConnConfig::default_for(address, "unit-test", None);
        cfg.reconnect_delay = Duration::from_millis(10);
        cfg.heartbeat_interval = Duration::ZERO;
        cfg
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnState::Idle.to_string(), "idle");
        assert_eq!(ConnState::Open.to_string(), "open");
        assert_eq!(ConnState::Closed.to_string(), "closed");
        assert_eq!(ConnState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnState::Unknown.to_string(), "unknown");
    }

    #[tokio::test]
    async fn test_write_rejected_when_idle() {
        let conn = Conn::new(test_config("127.0.0.1:1"));

        assert_eq!(conn.state().await, ConnState::Idle);
        let err = conn.write(b"never sent").await.unwrap_err();
        assert!(matches!(err, WireError::NotEstablished));
    }

    #[tokio::test]
    async fn test_read_rejected_when_idle() {
        let conn = Conn::new(test_config("127.0.0.1:1"));

        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, WireError::NotEstablished));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let conn = Conn::new(test_config("127.0.0.1:1"));

        conn.close().await.unwrap();
        assert_eq!(conn.state().await, ConnState::Closed);
        assert!(!conn.is_open().await);

        // Closing again must not double-fire the read-done signal.
        conn.close().await.unwrap();
        assert_eq!(conn.state().await, ConnState::Closed);
    }

    #[tokio::test]
    async fn test_reconnect_on_closed_fails_fast() {
        let conn = Conn::new(test_config("127.0.0.1:1"));
        conn.close().await.unwrap();

        let err = conn.reconnect().await.unwrap_err();
        assert!(matches!(err, WireError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_reconnect_guard_rejects_concurrent_reconnects() {
        // Nothing listens on this port, so the first reconnect cycles
        // through dial attempts and the state stays Reconnecting.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut cfg = test_config(&addr);
        cfg.max_reconnect_attempts = 50;
        cfg.reconnect_delay = Duration::from_millis(50);

        let conn = Conn::new(cfg);
        let background = conn.clone();
        let task = tokio::spawn(async move { background.reconnect().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = conn.reconnect().await.unwrap_err();
        assert!(matches!(err, WireError::AlreadyReconnecting));

        task.abort();
    }

    #[tokio::test]
    async fn test_wait_pong_before_connect_is_rejected() {
        let conn = Conn::new(test_config("127.0.0.1:1"));
        let err = conn.wait_pong(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, WireError::NotEstablished));
    }
}
