//! TLS for secure destinations.
//!
//! Client configurations are built from a key's TLS settings and cached, so
//! every connection to the same kind of endpoint shares one
//! [`ClientConfig`]. Trust comes from the bundled web PKI roots unless a CA
//! path is given, in which case only the certificates found there are
//! trusted. Certificate revocation lists found under the CA path are
//! enforced when revocation checking is on.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector as RustlsConnector;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::transport::io::BoxedSocket;
use crate::transport::key::ConnectionKey;

// ============================================================================
// TlsSettings
// ============================================================================

/// The part of a key that shapes the client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TlsSettings {
    verify: bool,
    revocation_check: bool,
    ca_path: Option<PathBuf>,
}

impl TlsSettings {
    fn from_key(key: &ConnectionKey) -> Self {
        Self {
            verify: key.tls_verify(),
            revocation_check: key.tls_revocation_check(),
            ca_path: key.ca_path().cloned(),
        }
    }
}

// ============================================================================
// TlsConfigs
// ============================================================================

/// Cache of client configurations keyed by TLS settings.
#[derive(Debug, Default)]
pub(crate) struct TlsConfigs {
    configs: Mutex<FxHashMap<TlsSettings, Arc<ClientConfig>>>,
}

impl TlsConfigs {
    /// Returns the client configuration for `key`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the CA path cannot be read or holds no
    /// certificates.
    pub(crate) fn client_config(&self, key: &ConnectionKey) -> Result<Arc<ClientConfig>> {
        let settings = TlsSettings::from_key(key);
        if let Some(config) = self.configs.lock().get(&settings) {
            return Ok(Arc::clone(config));
        }

        // Built outside the lock; a racing builder produces an equal config.
        let config = Arc::new(build_client_config(&settings)?);
        self.configs.lock().insert(settings, Arc::clone(&config));
        Ok(config)
    }

    /// Runs the TLS handshake over an established socket.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if the handshake fails
    /// - [`Error::Timeout`] if it takes longer than `timeout`
    /// - [`Error::Cancelled`] if `ctx` is cancelled
    pub(crate) async fn handshake(
        &self,
        key: &ConnectionKey,
        socket: BoxedSocket,
        timeout: Duration,
        ctx: &Context,
    ) -> Result<BoxedSocket> {
        let destination = key.destination();
        let host = destination.host().trim_start_matches('[').trim_end_matches(']');
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| Error::config(format!("invalid TLS server name '{host}': {e}")))?;

        let connector = RustlsConnector::from(self.client_config(key)?);
        let handshake = async {
            match tokio::time::timeout(timeout, connector.connect(name, socket)).await {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(Error::transport(format!("TLS handshake with {destination} failed: {e}"))),
                Err(_) => Err(Error::timeout(
                    format!("TLS handshake with {destination}"),
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                )),
            }
        };

        let stream = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(Error::cancelled("TLS handshake")),
            result = handshake => result?,
        };

        let (_, session) = stream.get_ref();
        debug!(
            destination = %destination,
            version = ?session.protocol_version(),
            verify = key.tls_verify(),
            "TLS established"
        );
        Ok(Box::new(stream))
    }
}

// ============================================================================
// Config Building
// ============================================================================

fn provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
}

fn build_client_config(settings: &TlsSettings) -> Result<ClientConfig> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::config(format!("TLS protocol versions: {e}")))?;

    let mut config = if settings.verify {
        let roots = match &settings.ca_path {
            Some(path) => load_roots(path)?,
            None => webpki_roots(),
        };

        let mut verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider);
        if settings.revocation_check
            && let Some(path) = &settings.ca_path
        {
            let crls = load_crls(path)?;
            if !crls.is_empty() {
                verifier = verifier.with_crls(crls).allow_unknown_revocation_status();
            }
        }
        let verifier = verifier
            .build()
            .map_err(|e| Error::config(format!("TLS verifier: {e}")))?;

        builder.with_webpki_verifier(verifier).with_no_client_auth()
    } else {
        warn!("TLS certificate verification is disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    };

    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

fn webpki_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// PEM files under `path`: the file itself, or every file in the directory.
fn pem_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let entries = std::fs::read_dir(path)
        .map_err(|e| Error::config(format!("cannot read CA directory {}: {e}", path.display())))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();

    for file in pem_files(path)? {
        let certs = CertificateDer::pem_file_iter(&file)
            .map_err(|e| Error::config(format!("cannot read CA file {}: {e}", file.display())))?;
        for cert in certs.flatten() {
            if let Err(e) = roots.add(cert) {
                debug!(file = %file.display(), error = %e, "Skipping unusable CA certificate");
            }
        }
    }

    if roots.is_empty() {
        return Err(Error::config(format!("no CA certificates found in {}", path.display())));
    }
    debug!(path = %path.display(), roots = roots.len(), "Loaded CA certificates");
    Ok(roots)
}

fn load_crls(path: &Path) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let mut crls = Vec::new();
    for file in pem_files(path)? {
        if let Ok(found) = CertificateRevocationListDer::pem_file_iter(&file) {
            crls.extend(found.flatten());
        }
    }
    Ok(crls)
}

// ============================================================================
// AcceptAnyCertificate
// ============================================================================

/// Verifier used when certificate verification is turned off. Handshake
/// signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use crate::options::TransportOptions;
    use crate::transport::key::Destination;

    fn key(options: &TransportOptions) -> ConnectionKey {
        ConnectionKey::new(Destination::new("https", "localhost", 443), options)
    }

    #[test]
    fn test_configs_are_cached_per_settings() {
        let configs = TlsConfigs::default();
        let verified = TransportOptions::default();
        let unverified = TransportOptions::default().with_tls_verify(false);

        let a = configs.client_config(&key(&verified)).unwrap();
        let b = configs.client_config(&key(&verified)).unwrap();
        let c = configs.client_config(&key(&unverified)).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_missing_ca_path_is_config_error() {
        let options = TransportOptions::default().with_ca_path("/nonexistent/ca.pem");
        let result = TlsConfigs::default().client_config(&key(&options));
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_ca_path_without_certificates_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();

        let options = TransportOptions::default().with_ca_path(file.path());
        let err = TlsConfigs::default().client_config(&key(&options)).unwrap_err();
        assert!(err.to_string().contains("no CA certificates"), "{err}");
    }

    #[test]
    fn test_ca_directory_is_loaded() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("local.pem"), cert.cert.pem()).unwrap();
        std::fs::write(dir.path().join("README"), "ignored").unwrap();

        let roots = load_roots(dir.path()).unwrap();
        assert_eq!(roots.len(), 1);
    }
}
