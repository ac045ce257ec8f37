// TLS options and the rustls client/server configurations built from them
use hio_core::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme, SupportedProtocolVersion,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Protocol versions offered or accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    /// TLS 1.2 and 1.3.
    #[default]
    Default,
    Tls12,
    Tls13,
}

/// How hard the peer's certificate is checked.
///
/// On the client side `Optional` behaves like `Required`: a server always
/// presents a certificate, so there is nothing optional to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Certify {
    None,
    Optional,
    #[default]
    Required,
}

/// TLS settings shared by clients and servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub version: Version,
    pub certify: Certify,
    /// Check the server certificate against the server name (client only).
    pub hostify: bool,
    /// Private key in PEM. Required for servers; for clients enables client auth.
    pub keypath: Option<PathBuf>,
    /// Certificate chain in PEM matching `keypath`.
    pub certpath: Option<PathBuf>,
    /// Trust anchors in PEM. Without one the bundled Mozilla roots are used.
    pub cafilepath: Option<PathBuf>,
    /// Name presented for SNI and hostname checks; defaults to the connect host.
    pub servername: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            version: Version::Default,
            certify: Certify::Required,
            hostify: true,
            keypath: None,
            certpath: None,
            cafilepath: None,
            servername: None,
        }
    }
}

impl TlsConfig {
    /// Reject combinations that neither side can honour.
    pub fn validate(&self) -> Result<()> {
        if self.keypath.is_some() != self.certpath.is_some() {
            return Err(Error::Config("keypath and certpath must be given together".into()));
        }
        Ok(())
    }

    /// Client checks on top of [`validate`](Self::validate): a hostname check
    /// needs a verified certificate.
    pub fn validate_client(&self) -> Result<()> {
        self.validate()?;
        if self.hostify && self.certify == Certify::None {
            return Err(Error::Config("hostify requires certify to be optional or required".into()));
        }
        Ok(())
    }

    fn versions(&self) -> &'static [&'static SupportedProtocolVersion] {
        match self.version {
            Version::Default => rustls::ALL_VERSIONS,
            Version::Tls12 => TLS12_ONLY,
            Version::Tls13 => TLS13_ONLY,
        }
    }

    fn roots(&self) -> Result<RootCertStore> {
        let mut roots = RootCertStore::empty();
        match &self.cafilepath {
            Some(path) => {
                for cert in load_certs(path)? {
                    roots
                        .add(cert)
                        .map_err(|e| Error::Config(format!("Bad CA certificate in {}: {}", path.display(), e)))?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }
        Ok(roots)
    }

    fn identity(&self) -> Result<Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>> {
        match (&self.certpath, &self.keypath) {
            (Some(certpath), Some(keypath)) => Ok(Some((load_certs(certpath)?, load_private_key(keypath)?))),
            _ => Ok(None),
        }
    }

    /// Build the client side configuration.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>> {
        self.validate_client()?;
        let provider = provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(self.versions())
            .map_err(tls_error)?;

        let builder = match self.certify {
            Certify::None => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureVerifier)),
            Certify::Optional | Certify::Required => {
                let roots = Arc::new(self.roots()?);
                if self.hostify {
                    builder.with_root_certificates(roots)
                } else {
                    let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
                        .build()
                        .map_err(|e| Error::Config(format!("Failed to build server verifier: {}", e)))?;
                    builder
                        .dangerous()
                        .with_custom_certificate_verifier(Arc::new(NoHostnameVerifier { inner }))
                }
            }
        };

        let config = match self.identity()? {
            Some((certs, key)) => builder.with_client_auth_cert(certs, key).map_err(tls_error)?,
            None => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }

    /// Build the server side configuration. A certificate and key are mandatory;
    /// `hostify` is ignored.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        self.validate()?;
        let (certs, key) = self
            .identity()?
            .ok_or_else(|| Error::Config("TLS server requires certpath and keypath".into()))?;
        let provider = provider();
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(self.versions())
            .map_err(tls_error)?;

        let builder = match self.certify {
            Certify::None => builder.with_no_client_auth(),
            certify => {
                let roots = Arc::new(self.roots()?);
                let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider);
                let verifier = if certify == Certify::Optional {
                    verifier.allow_unauthenticated()
                } else {
                    verifier
                };
                let verifier = verifier
                    .build()
                    .map_err(|e| Error::Config(format!("Failed to build client verifier: {}", e)))?;
                builder.with_client_cert_verifier(verifier)
            }
        };

        let config = builder.with_single_cert(certs, key).map_err(tls_error)?;
        Ok(Arc::new(config))
    }

    /// Server name for a client connecting to `host`.
    pub fn server_name(&self, host: &str) -> Result<ServerName<'static>> {
        let name = self.servername.clone().unwrap_or_else(|| host.to_string());
        ServerName::try_from(name.clone()).map_err(|_| Error::Config(format!("Invalid server name: {}", name)))
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

pub(crate) fn tls_error(e: rustls::Error) -> Error {
    Error::Tls(e.to_string())
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open certificate file {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("No certificate found in {}", path.display())));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open key file {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    let items = rustls_pemfile::read_all(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse private key: {}", e)))?;

    for item in items {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }

    Err(Error::Config(format!("No valid private key found in {}", path.display())))
}

/// Full chain validation that tolerates a name mismatch.
#[derive(Debug)]
struct NoHostnameVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for NoHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any server certificate (`certify = none`).
#[derive(Debug)]
struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_verify_everything() {
        let config = TlsConfig::default();
        assert_eq!(config.certify, Certify::Required);
        assert!(config.hostify);
        assert_eq!(config.version, Version::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn hostify_without_certify_is_rejected() {
        let config = TlsConfig {
            certify: Certify::None,
            ..TlsConfig::default()
        };
        // fine for a server, which never checks hostnames
        assert!(config.validate().is_ok());
        assert!(matches!(config.validate_client(), Err(Error::Config(_))));
        assert!(matches!(config.client_config(), Err(Error::Config(_))));

        let relaxed = TlsConfig {
            certify: Certify::None,
            hostify: false,
            ..TlsConfig::default()
        };
        assert!(relaxed.validate_client().is_ok());
        assert!(relaxed.client_config().is_ok());
    }

    #[test]
    fn key_without_cert_is_rejected() {
        let config = TlsConfig {
            keypath: Some("key.pem".into()),
            ..TlsConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn server_needs_an_identity() {
        let config = TlsConfig::default();
        assert!(matches!(config.server_config(), Err(Error::Config(_))));
    }

    #[test]
    fn client_falls_back_to_bundled_roots() {
        for version in [Version::Default, Version::Tls12, Version::Tls13] {
            let config = TlsConfig {
                version,
                ..TlsConfig::default()
            };
            assert!(config.client_config().is_ok());
        }
    }

    #[test]
    fn server_name_prefers_configured_name() {
        let config = TlsConfig {
            servername: Some("localhost".into()),
            ..TlsConfig::default()
        };
        assert_eq!(config.server_name("127.0.0.1").unwrap(), ServerName::try_from("localhost").unwrap());
        let ip = TlsConfig::default().server_name("127.0.0.1").unwrap();
        assert!(matches!(ip, ServerName::IpAddress(_)));
        assert!(TlsConfig::default().server_name("not a name!").is_err());
    }

    #[test]
    fn missing_ca_file_is_config_error() {
        let config = TlsConfig {
            cafilepath: Some("/nonexistent/hio/ca.pem".into()),
            ..TlsConfig::default()
        };
        assert!(matches!(config.client_config(), Err(Error::Config(_))));
    }
}
