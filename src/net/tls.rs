//! TLS acceptor setup and peer-certificate policy.
//!
//! The acceptor always asks connecting clients for a certificate. What
//! happens to the answer is policy: `require_mutual_auth` fails the
//! handshake when no certificate arrives, and `accept_invalid_peer_cert`
//! (or the absence of a `client_ca_path` trust bundle) skips validation of
//! whatever was presented. rustls negotiates TLS 1.2 or newer only.

use std::fs::File;
use std::io::{self, BufReader};
use std::sync::Arc;

use log::*;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};

use crate::common::error::ConfigError;
use crate::config::Tls;

/// Build a TLS acceptor from configuration.
///
/// Loads the PEM certificate chain and private key and wires in the
/// client-certificate verifier matching the configured policy.
pub fn build_tls_acceptor(tls: &Tls) -> Result<tokio_rustls::TlsAcceptor, ConfigError> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_key(&tls.key_path)?;
    let verifier = client_verifier(tls)?;

    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| ConfigError::Tls(e.to_string()))?;

    Ok(tokio_rustls::TlsAcceptor::from(Arc::new(config)))
}

/// Check a completed handshake against the configured peer policy.
///
/// The handshake itself already enforced `require_mutual_auth`; this
/// re-checks the outcome and records opportunistically presented client
/// certificates.
pub fn verify_policy<S>(
    stream: &tokio_rustls::server::TlsStream<S>,
    tls: &Tls,
) -> io::Result<()> {
    let (_, conn) = stream.get_ref();
    match conn.peer_certificates() {
        Some(certs) if !certs.is_empty() => {
            debug!("peer presented {} certificate(s)", certs.len());
            Ok(())
        }
        _ if tls.require_mutual_auth => Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "peer did not present a certificate",
        )),
        _ => Ok(()),
    }
}

/// Whether a handshake failure is routine peer behavior (close, reset)
/// rather than something worth a full log line.
pub fn is_benign_handshake_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
    ) || e.to_string().to_ascii_lowercase().contains("close_notify")
}

/// Pick the client-certificate verifier for the configured policy.
///
/// Validation runs only when a trust bundle is configured and
/// `accept_invalid_peer_cert` is off; every variant still requests a
/// certificate so that clients carrying one are visible in the logs.
fn client_verifier(tls: &Tls) -> Result<Arc<dyn ClientCertVerifier>, ConfigError> {
    if !tls.accept_invalid_peer_cert && !tls.client_ca_path.is_empty() {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&tls.client_ca_path)? {
            roots
                .add(cert)
                .map_err(|e| ConfigError::Tls(e.to_string()))?;
        }
        let builder = WebPkiClientVerifier::builder(Arc::new(roots));
        let builder = if tls.require_mutual_auth {
            builder
        } else {
            builder.allow_unauthenticated()
        };
        return builder.build().map_err(|e| ConfigError::Tls(e.to_string()));
    }

    Ok(Arc::new(PermissiveClientVerifier::new(
        tls.require_mutual_auth,
    )))
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let file =
        File::open(path).map_err(|e| ConfigError::Tls(format!("read {}: {}", path, e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("parse {}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(ConfigError::Tls(format!("no certificates in {}", path)));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let file =
        File::open(path).map_err(|e| ConfigError::Tls(format!("read {}: {}", path, e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ConfigError::Tls(format!("parse {}: {}", path, e)))?
        .ok_or_else(|| ConfigError::Tls(format!("no private key in {}", path)))
}

/// Requests a client certificate and accepts whatever comes back; the
/// handshake fails without one only when `mandatory` is set.
#[derive(Debug)]
struct PermissiveClientVerifier {
    mandatory: bool,
    supported: WebPkiSupportedAlgorithms,
}

impl PermissiveClientVerifier {
    fn new(mandatory: bool) -> Self {
        Self {
            mandatory,
            supported: rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms,
        }
    }
}

impl ClientCertVerifier for PermissiveClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}
