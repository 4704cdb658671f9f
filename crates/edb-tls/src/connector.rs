//! TLS connector for establishing encrypted connections.

use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{SecurityMode, TlsConfig};
use crate::error::TlsError;

/// Chain verification without the host name check.
#[derive(Debug)]
struct NoHostVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

fn is_name_mismatch(error: &rustls::Error) -> bool {
    match error {
        rustls::Error::InvalidCertificate(CertificateError::NotValidForName) => true,
        // newer rustls attaches context in a sibling variant
        rustls::Error::InvalidCertificate(other) => {
            format!("{other:?}").starts_with("NotValidForName")
        }
        _ => false,
    }
}

impl ServerCertVerifier for NoHostVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(e) if is_name_mismatch(&e) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// TLS connector for server connections.
pub struct TlsConnector {
    config: TlsConfig,
    mode: SecurityMode,
    client_config: Arc<ClientConfig>,
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Create a new TLS connector with the given configuration.
    ///
    /// Fails for [`SecurityMode::Insecure`], which does not use TLS.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let mode = config.effective_mode();
        let client_config = Arc::new(Self::build_client_config(&config, mode)?);
        let inner = TokioTlsConnector::from(Arc::clone(&client_config));
        Ok(Self {
            config,
            mode,
            client_config,
            inner,
        })
    }

    fn build_client_config(
        config: &TlsConfig,
        mode: SecurityMode,
    ) -> Result<ClientConfig, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let roots = Arc::new(Self::build_root_store(config)?);

        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;

        let mut client_config = match mode {
            SecurityMode::Insecure => {
                return Err(TlsError::Configuration(
                    "insecure security mode does not use TLS".into(),
                ));
            }
            SecurityMode::NoHostVerification => {
                tracing::warn!("TLS host name verification is disabled");
                let inner = Self::webpki_verifier(roots, provider)?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoHostVerifier { inner }))
                    .with_no_client_auth()
            }
            SecurityMode::Strict | SecurityMode::Default => builder
                .with_webpki_verifier(Self::webpki_verifier(roots, provider)?)
                .with_no_client_auth(),
        };
        client_config.alpn_protocols = config.alpn_protocols.clone();
        Ok(client_config)
    }

    fn webpki_verifier(
        roots: Arc<RootCertStore>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Arc<WebPkiServerVerifier>, TlsError> {
        WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .map_err(|e| TlsError::Configuration(format!("certificate verifier: {e}")))
    }

    fn build_root_store(config: &TlsConfig) -> Result<RootCertStore, TlsError> {
        let mut root_store = RootCertStore::empty();
        if config.root_certificates.is_empty() {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            for cert in &config.root_certificates {
                root_store
                    .add(cert.clone())
                    .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
            }
        }
        Ok(root_store)
    }

    /// Connect and perform the TLS handshake over `stream`.
    ///
    /// When ALPN protocols are configured the server must select one of them.
    pub async fn connect<S>(&self, stream: S, host: &str) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = self.config.server_name.as_deref().unwrap_or(host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| TlsError::InvalidServerName(name.to_string()))?;

        tracing::debug!(server_name = %name, mode = %self.mode, "performing TLS handshake");

        let tls_stream = self
            .inner
            .connect(server_name, stream)
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        if let Some(wanted) = self.config.alpn_protocols.first() {
            let (_, session) = tls_stream.get_ref();
            if session.alpn_protocol().is_none() {
                return Err(TlsError::AlpnMismatch(
                    String::from_utf8_lossy(wanted).into_owned(),
                ));
            }
        }

        tracing::debug!("TLS handshake completed");
        Ok(tls_stream)
    }

    /// The rustls client configuration, shared with the HTTP transport.
    #[must_use]
    pub fn client_config(&self) -> &Arc<ClientConfig> {
        &self.client_config
    }

    /// The resolved security mode.
    #[must_use]
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Get the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let connector = TlsConnector::new(TlsConfig::default()).unwrap();
        assert_eq!(connector.mode(), SecurityMode::Strict);
        assert_eq!(
            connector.client_config().alpn_protocols,
            vec![b"edgedb-binary".to_vec()]
        );
    }

    #[test]
    fn test_no_host_verification() {
        let config = TlsConfig::new().security_mode(SecurityMode::NoHostVerification);
        let connector = TlsConnector::new(config).unwrap();
        assert_eq!(connector.mode(), SecurityMode::NoHostVerification);
    }

    #[test]
    fn test_insecure_has_no_connector() {
        let config = TlsConfig::new().security_mode(SecurityMode::Insecure);
        assert!(matches!(
            TlsConnector::new(config),
            Err(TlsError::Configuration(_))
        ));
    }

    #[test]
    fn test_name_mismatch_detection() {
        assert!(is_name_mismatch(&rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName
        )));
        assert!(!is_name_mismatch(&rustls::Error::InvalidCertificate(
            CertificateError::Expired
        )));
        assert!(!is_name_mismatch(&rustls::Error::DecryptError));
    }

    #[tokio::test]
    async fn test_invalid_server_name() {
        let connector = TlsConnector::new(TlsConfig::default()).unwrap();
        let (client, _server) = tokio::io::duplex(64);
        assert!(matches!(
            connector.connect(client, "not a host!").await,
            Err(TlsError::InvalidServerName(_))
        ));
    }
}
