//! Dial with bounded retry.

use tokio::net::TcpStream;

use crate::config::ConnConfig;
use crate::conn::Conn;
use crate::error::{Result, WireError};
use crate::tls;

/// Repeatedly attempt a TCP dial (plus TLS upgrade when enabled),
/// sleeping the configured reconnect delay between failures.
///
/// Returns an idle [`Conn`] wrapping the ready stream; call
/// [`Conn::listen`] to start reading. Total failure returns
/// [`WireError::ExhaustedReconnectAttempts`] aggregating every
/// per-attempt cause.
pub async fn dial_with_retry(cfg: ConnConfig) -> Result<Conn> {
    cfg.validate()?;

    let mut causes = Vec::with_capacity(cfg.max_reconnect_attempts);
    for attempt in 0..cfg.max_reconnect_attempts {
        let stream = match TcpStream::connect(&cfg.address).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(peer = %cfg.address, attempt = attempt + 1, error = %e, "failed to dial");
                causes.push(WireError::Io(e));
                tokio::time::sleep(cfg.reconnect_delay).await;
                continue;
            }
        };

        if cfg.use_tls {
            // The half-open TCP stream is dropped (and so closed) when
            // the handshake fails.
            match tls::upgrade_client(stream, cfg.tls.as_ref()).await {
                Ok(tls_stream) => return Ok(Conn::with_stream(tls_stream, cfg)),
                Err(e) => {
                    tracing::warn!(peer = %cfg.address, attempt = attempt + 1, error = %e, "failed to handshake");
                    causes.push(e);
                    tokio::time::sleep(cfg.reconnect_delay).await;
                    continue;
                }
            }
        }

        return Ok(Conn::with_stream(stream, cfg));
    }

    Err(WireError::ExhaustedReconnectAttempts {
        attempts: cfg.max_reconnect_attempts,
        causes,
    })
}
