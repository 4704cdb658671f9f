//! TLS configuration options.

use std::fmt;
use std::str::FromStr;

use rustls::pki_types::CertificateDer;

use crate::error::TlsError;

/// ALPN protocol id of the binary protocol.
pub const BINARY_ALPN: &[u8] = b"edgedb-binary";

/// How strictly the server is authenticated.
///
/// Only [`SecurityMode::Insecure`] selects a plaintext transport; every
/// other mode encrypts and differs only in certificate checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityMode {
    /// `Strict`, or `NoHostVerification` when custom roots are supplied.
    #[default]
    Default,
    /// Verify the certificate chain and the host name.
    Strict,
    /// Verify the certificate chain but not the host name.
    NoHostVerification,
    /// No TLS at all.
    Insecure,
}

impl SecurityMode {
    /// Whether connections in this mode are encrypted.
    #[must_use]
    pub fn uses_tls(self) -> bool {
        !matches!(self, Self::Insecure)
    }

    /// Resolve `Default` to a concrete mode.
    #[must_use]
    pub fn effective(self, has_custom_roots: bool) -> Self {
        match self {
            Self::Default if has_custom_roots => Self::NoHostVerification,
            Self::Default => Self::Strict,
            other => other,
        }
    }

    /// The option value used in DSNs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Strict => "strict",
            Self::NoHostVerification => "no_host_verification",
            Self::Insecure => "insecure",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = TlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(Self::Default),
            "strict" => Ok(Self::Strict),
            "no_host_verification" | "verify_host_off" => Ok(Self::NoHostVerification),
            "insecure" => Ok(Self::Insecure),
            other => Err(TlsError::Configuration(format!(
                "unknown security mode {other:?}"
            ))),
        }
    }
}

/// TLS configuration for server connections.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TlsConfig {
    /// Verification strictness.
    pub security_mode: SecurityMode,

    /// Custom root certificates to trust.
    ///
    /// If empty, the Mozilla root store is used.
    pub root_certificates: Vec<CertificateDer<'static>>,

    /// Server name for SNI and verification; defaults to the connect host.
    pub server_name: Option<String>,

    /// Application-layer protocol negotiation (ALPN) protocols.
    pub alpn_protocols: Vec<Vec<u8>>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            security_mode: SecurityMode::Default,
            root_certificates: Vec::new(),
            server_name: None,
            alpn_protocols: vec![BINARY_ALPN.to_vec()],
        }
    }
}

impl TlsConfig {
    /// Create a new TLS configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the security mode.
    #[must_use]
    pub fn security_mode(mut self, mode: SecurityMode) -> Self {
        self.security_mode = mode;
        self
    }

    /// Add a custom root certificate to trust.
    #[must_use]
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Trust the certificates in a PEM document, replacing existing roots.
    pub fn with_ca_pem(mut self, pem: &str) -> Result<Self, TlsError> {
        let certs = rustls_pemfile::certs(&mut pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        if certs.is_empty() {
            return Err(TlsError::InvalidCertificate(
                "no certificates found in PEM data".into(),
            ));
        }
        self.root_certificates = certs;
        Ok(self)
    }

    /// Set the server name for certificate validation.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Set ALPN protocols.
    #[must_use]
    pub fn with_alpn_protocols(mut self, protocols: Vec<Vec<u8>>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// The concrete mode after resolving `Default`.
    #[must_use]
    pub fn effective_mode(&self) -> SecurityMode {
        self.security_mode
            .effective(!self.root_certificates.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_security_mode_parsing() {
        assert_eq!("strict".parse::<SecurityMode>().unwrap(), SecurityMode::Strict);
        assert_eq!(
            "verify-host-off".parse::<SecurityMode>().unwrap(),
            SecurityMode::NoHostVerification
        );
        assert_eq!(
            "NO_HOST_VERIFICATION".parse::<SecurityMode>().unwrap(),
            SecurityMode::NoHostVerification
        );
        assert!("paranoid".parse::<SecurityMode>().is_err());
    }

    #[test]
    fn test_default_mode_resolution() {
        assert_eq!(TlsConfig::new().effective_mode(), SecurityMode::Strict);
        let custom = TlsConfig::new().add_root_certificate(CertificateDer::from(vec![0u8; 4]));
        assert_eq!(custom.effective_mode(), SecurityMode::NoHostVerification);
        let strict = custom.security_mode(SecurityMode::Strict);
        assert_eq!(strict.effective_mode(), SecurityMode::Strict);
    }

    #[test]
    fn test_only_insecure_is_plaintext() {
        assert!(!SecurityMode::Insecure.uses_tls());
        for mode in [
            SecurityMode::Default,
            SecurityMode::Strict,
            SecurityMode::NoHostVerification,
        ] {
            assert!(mode.uses_tls(), "{mode}");
        }
    }

    #[test]
    fn test_empty_pem_rejected() {
        assert!(matches!(
            TlsConfig::new().with_ca_pem("not a certificate"),
            Err(TlsError::InvalidCertificate(_))
        ));
    }
}
