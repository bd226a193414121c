//! TLS configuration for https transport handles.
//!
//! [`SslOptions`] are resolved once into [`TlsSettings`] (certificate files
//! are read at that point so bad paths fail fast), and every transport handle
//! then gets a freshly built rustls `ClientConfig` from those settings.
//!
//! Native root certificates are loaded from the OS store once and cached,
//! since that lookup can be slow on some platforms.

use crate::config::{SslOptions, TlsVersion};
use crate::error::TransportError;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::{self, PemObject};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Cached native root certificates.
/// Always stores Ok; empty vec means no certs found (warned, not errored).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

/// Counter for test verification that the loader only runs once.
#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs_inner() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();

    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    let certs: Vec<CertificateDer<'static>> = result.certs;

    if certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = certs.len(), "loaded native root certificates");
    }

    certs
}

/// Native root certificates from the OS store, loaded on first use.
#[must_use]
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE
        .get_or_init(load_native_certs_inner)
        .as_slice()
}

/// Get the crypto provider for TLS connections.
///
/// Uses the process-wide default provider when one is installed, otherwise an
/// aws-lc-rs provider that is not installed globally.
#[must_use]
pub fn get_crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// An opaque trust-store handle.
///
/// When set as [`SslOptions::cert_store`] it replaces the system default
/// trust store for peer verification. Cloning is cheap.
#[derive(Clone)]
pub struct CertStore(Arc<RootCertStore>);

impl CertStore {
    #[must_use]
    pub fn new(roots: RootCertStore) -> Self {
        Self(Arc::new(roots))
    }

    /// The system default trust store (native OS roots).
    #[must_use]
    pub fn system() -> Self {
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(native_root_certs().iter().cloned());
        if ignored > 0 {
            tracing::warn!(
                added,
                ignored,
                "some native root certificates could not be parsed"
            );
        }
        Self::new(roots)
    }

    /// Trust store holding every certificate of a PEM file.
    ///
    /// # Errors
    /// Returns [`TransportError::Configuration`] if the file cannot be read or
    /// holds no usable certificate.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let certs = read_certs(path.as_ref(), "cert_store")?;
        let mut roots = RootCertStore::empty();
        add_trust_anchors(&mut roots, certs, path.as_ref())?;
        Ok(Self::new(roots))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn roots(&self) -> &RootCertStore {
        &self.0
    }
}

impl fmt::Debug for CertStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertStore")
            .field("roots", &self.0.len())
            .finish()
    }
}

/// Client identity for mutual TLS.
struct ClientIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

/// TLS material resolved from [`SslOptions`].
pub struct TlsSettings {
    verify: bool,
    cert_store: Option<CertStore>,
    extra_roots: Vec<CertificateDer<'static>>,
    identity: Option<ClientIdentity>,
    verify_depth: Option<usize>,
    version: Option<TlsVersion>,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("verify", &self.verify)
            .field("cert_store", &self.cert_store)
            .field("extra_roots", &self.extra_roots.len())
            .field("client_identity", &self.identity.is_some())
            .field("verify_depth", &self.verify_depth)
            .field("version", &self.version)
            .finish()
    }
}

impl TlsSettings {
    /// Read every file referenced by `ssl`.
    ///
    /// # Errors
    /// Returns [`TransportError::Configuration`] for unreadable or empty PEM
    /// files, or when only one of `client_cert` / `client_key` is set.
    pub(crate) fn load(ssl: &SslOptions) -> Result<Self, TransportError> {
        let mut extra_roots = Vec::new();

        if let Some(ca_file) = &ssl.ca_file {
            extra_roots.extend(read_certs(ca_file, "ca_file")?);
        }

        if let Some(ca_path) = &ssl.ca_path {
            extra_roots.extend(read_cert_dir(ca_path)?);
        }

        let identity = match (&ssl.client_cert, &ssl.client_key) {
            (Some(cert), Some(key)) => Some(ClientIdentity {
                chain: read_certs(cert, "client_cert")?,
                key: PrivateKeyDer::from_pem_file(key).map_err(|e| {
                    TransportError::configuration(format!(
                        "failed to read client_key '{}': {e}",
                        key.display()
                    ))
                })?,
            }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(TransportError::configuration(
                    "ssl.client_cert is set but ssl.client_key is missing",
                ));
            }
            (None, Some(_)) => {
                return Err(TransportError::configuration(
                    "ssl.client_key is set but ssl.client_cert is missing",
                ));
            }
        };

        if !ssl.verify_peer() {
            tracing::warn!(
                target: "oauth2_transport::security",
                "TLS peer verification disabled (ssl.verify = false)"
            );
        }

        Ok(Self {
            verify: ssl.verify_peer(),
            cert_store: ssl.cert_store.clone(),
            extra_roots,
            identity,
            verify_depth: ssl.verify_depth,
            version: ssl.version,
        })
    }

    /// Build a fresh rustls `ClientConfig` for one transport handle.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionFailed`] if rustls rejects the
    /// configuration (for example an empty trust store with verification on,
    /// or a client key that does not match its certificate).
    pub(crate) fn client_config(&self) -> Result<rustls::ClientConfig, TransportError> {
        let provider = get_crypto_provider();

        let versions: &[&'static rustls::SupportedProtocolVersion] = match self.version {
            Some(TlsVersion::Tls12) => &[&rustls::version::TLS12],
            Some(TlsVersion::Tls13) => &[&rustls::version::TLS13],
            None => rustls::DEFAULT_VERSIONS,
        };

        let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(versions)
            .map_err(TransportError::connection_failed)?
            .dangerous()
            .with_custom_certificate_verifier(self.server_verifier(provider)?);

        let config = match &self.identity {
            Some(identity) => builder
                .with_client_auth_cert(identity.chain.clone(), identity.key.clone_key())
                .map_err(TransportError::connection_failed)?,
            None => builder.with_no_client_auth(),
        };

        Ok(config)
    }

    fn server_verifier(
        &self,
        provider: Arc<CryptoProvider>,
    ) -> Result<Arc<dyn ServerCertVerifier>, TransportError> {
        if !self.verify {
            return Ok(Arc::new(NoVerification(provider)));
        }

        let mut roots = match &self.cert_store {
            Some(store) => store.roots().clone(),
            None => CertStore::system().roots().clone(),
        };
        let (_, ignored) = roots.add_parsable_certificates(self.extra_roots.iter().cloned());
        if ignored > 0 {
            tracing::warn!(ignored, "some configured CA certificates could not be parsed");
        }

        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(TransportError::connection_failed)?;

        let Some(max_intermediates) = self.verify_depth else {
            return Ok(webpki);
        };
        Ok(Arc::new(DepthLimitedVerifier {
            inner: webpki,
            max_intermediates,
        }))
    }
}

fn parse_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, pem::Error> {
    CertificateDer::pem_file_iter(path)?.collect()
}

fn read_certs(path: &Path, option: &str) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = parse_pem_certs(path).map_err(|e| {
        TransportError::configuration(format!(
            "failed to read {option} '{}': {e}",
            path.display()
        ))
    })?;

    if certs.is_empty() {
        return Err(TransportError::configuration(format!(
            "no certificates found in {option} '{}'",
            path.display()
        )));
    }

    Ok(certs)
}

/// Collect certificates from every PEM file in a directory.
///
/// Files that do not parse as PEM certificates are skipped.
fn read_cert_dir(dir: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        TransportError::configuration(format!("failed to read ca_path '{}': {e}", dir.display()))
    })?;

    let mut certs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match parse_pem_certs(&path) {
            Ok(found) => certs.extend(found),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping file in ca_path");
            }
        }
    }

    if certs.is_empty() {
        tracing::warn!(ca_path = %dir.display(), "no certificates found in ca_path");
    }

    Ok(certs)
}

fn add_trust_anchors(
    roots: &mut RootCertStore,
    certs: Vec<CertificateDer<'static>>,
    path: &Path,
) -> Result<(), TransportError> {
    let (added, _) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(TransportError::configuration(format!(
            "no valid trust anchors in '{}'",
            path.display()
        )));
    }
    Ok(())
}

/// Verifier used when `ssl.verify` is false.
///
/// Accepts any server certificate; handshake signatures are still checked.
#[derive(Debug)]
struct NoVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Standard chain verification with a cap on the number of intermediates
/// (`ssl.verify_depth`).
#[derive(Debug)]
struct DepthLimitedVerifier {
    inner: Arc<WebPkiServerVerifier>,
    max_intermediates: usize,
}

impl ServerCertVerifier for DepthLimitedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if intermediates.len() > self.max_intermediates {
            return Err(rustls::Error::General(format!(
                "certificate chain has {} intermediates, verify_depth allows {}",
                intermediates.len(),
                self.max_intermediates
            )));
        }
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
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
