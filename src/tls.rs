//! Client-side TLS upgrade for established byte streams.
//!
//! When a connection is configured with TLS, the upgrade happens
//! immediately after the TCP connect: the raw stream is handed to a
//! rustls client handshake and the wrapped stream replaces it. The
//! server side of a `listen` is expected to hand in an already-upgraded
//! stream.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Result, WireError};

/// TLS client settings: a rustls config plus the server name presented
/// during the handshake (SNI and certificate validation).
#[derive(Clone)]
pub struct TlsSettings {
    /// Client-side rustls configuration.
    pub config: Arc<rustls::ClientConfig>,
    /// Name the server certificate is validated against.
    pub server_name: String,
}

impl TlsSettings {
    /// Create new TLS settings.
    pub fn new(config: Arc<rustls::ClientConfig>, server_name: impl Into<String>) -> Self {
        Self {
            config,
            server_name: server_name.into(),
        }
    }
}

/// Wrap an established byte stream in a client-side TLS session.
///
/// Fails with [`WireError::MissingTlsConfig`] when no settings are
/// supplied and with [`WireError::TlsUpgradeFailed`] when the handshake
/// does not complete. On success the original stream is consumed and must
/// not be used again.
pub async fn upgrade_client<S>(stream: S, settings: Option<&TlsSettings>) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let settings = settings.ok_or(WireError::MissingTlsConfig)?;

    let server_name = ServerName::try_from(settings.server_name.clone()).map_err(|e| {
        WireError::TlsUpgradeFailed(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;

    let connector = TlsConnector::from(settings.config.clone());
    connector
        .connect(server_name, stream)
        .await
        .map_err(WireError::TlsUpgradeFailed)
}

/// Build a client config that accepts any server certificate.
///
/// For deployments where daemons run on self-signed certificates and peer
/// trust comes from the platform's own enrollment rather than PKI.
pub fn insecure_client_config() -> Arc<rustls::ClientConfig> {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    Arc::new(config)
}

/// Certificate verifier that accepts any server certificate.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insecure_client_config_builds() {
        let config = insecure_client_config();
        assert!(Arc::strong_count(&config) >= 1);
    }

    #[tokio::test]
    async fn test_upgrade_without_settings_fails() {
        let (client, _server) = tokio::io::duplex(64);
        let result = upgrade_client(client, None).await;
        assert!(matches!(result, Err(WireError::MissingTlsConfig)));
    }

    #[tokio::test]
    async fn test_upgrade_with_invalid_server_name_fails() {
        let (client, _server) = tokio::io::duplex(64);
        let settings = TlsSettings::new(insecure_client_config(), "not a hostname");
        let result = upgrade_client(client, Some(&settings)).await;
        assert!(matches!(result, Err(WireError::TlsUpgradeFailed(_))));
    }
}
