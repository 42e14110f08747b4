//! TLS certificate probe.
//!
//! Performs a verified TLS handshake and reports the leaf certificate's
//! names and validity window. Verification is always on, independent of the
//! HTTP probe's `insecure` option.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

use super::{ProbeError, ProbeResult};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Details of a peer's leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub issuer: String,
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Whole days until expiry, rounded down; negative once expired.
    pub days_left: i64,
    pub valid: bool,
}

impl CertificateInfo {
    /// Parse a DER certificate and evaluate it at `now`.
    pub fn from_der(der: &[u8], now: DateTime<Utc>) -> Result<Self, ProbeError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| ProbeError::Tls(format!("unparseable certificate: {}", e)))?;

        let validity = cert.validity();
        let not_before = to_utc(validity.not_before.timestamp())?;
        let not_after = to_utc(validity.not_after.timestamp())?;

        Ok(Self {
            issuer: common_name(cert.issuer()),
            subject: common_name(cert.subject()),
            not_before,
            not_after,
            days_left: days_left(not_after, now),
            valid: is_within_validity(now, not_before, not_after),
        })
    }
}

/// Floor of the remaining time in 24-hour units.
pub fn days_left(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Strictly inside the validity window.
pub fn is_within_validity(now: DateTime<Utc>, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> bool {
    now > not_before && now < not_after
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>, ProbeError> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| ProbeError::Tls(format!("certificate time out of range: {}", timestamp)))
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Delegates every check to webpki and keeps a copy of the leaf, so a
/// rejected certificate can still be reported.
#[derive(Debug)]
struct LeafCapture {
    inner: Arc<WebPkiServerVerifier>,
    leaf: Mutex<Option<CertificateDer<'static>>>,
}

impl LeafCapture {
    fn new(inner: Arc<WebPkiServerVerifier>) -> Self {
        Self {
            inner,
            leaf: Mutex::new(None),
        }
    }

    fn take(&self) -> Option<CertificateDer<'static>> {
        self.leaf.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl ServerCertVerifier for LeafCapture {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Ok(mut slot) = self.leaf.lock() {
            *slot = Some(end_entity.clone().into_owned());
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

/// TLS certificate probe bound to a set of trust anchors.
#[derive(Clone)]
pub struct TlsProbe {
    provider: Arc<CryptoProvider>,
    verifier: Arc<WebPkiServerVerifier>,
}

impl TlsProbe {
    /// Trust the Mozilla root set.
    pub fn with_webpki_roots() -> Result<Self, ProbeError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    /// Trust only the given roots.
    pub fn with_roots(roots: RootCertStore) -> Result<Self, ProbeError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(|e| ProbeError::Config(format!("failed to build certificate verifier: {}", e)))?;
        Ok(Self { provider, verifier })
    }

    /// Handshake with `host:port` and report on the leaf certificate.
    pub async fn probe(&self, target: &str, host: &str, port: u16, timeout: Duration) -> ProbeResult {
        let start = Instant::now();
        let capture = Arc::new(LeafCapture::new(self.verifier.clone()));
        let outcome = tokio::time::timeout(timeout, self.handshake(host, port, capture.clone())).await;
        let duration = start.elapsed();
        let now = Utc::now();

        let leaf = match outcome {
            Ok(Ok(leaf)) => leaf,
            Ok(Err(e)) => {
                tracing::debug!("TLS {}:{} failed: {}", host, port, e);
                let mut result = ProbeResult::failed(target, e, duration);
                result.certificate = capture
                    .take()
                    .and_then(|der| CertificateInfo::from_der(&der, now).ok());
                return result;
            }
            Err(_) => return ProbeResult::failed(target, ProbeError::Timeout(timeout), duration),
        };

        let cert = match CertificateInfo::from_der(&leaf, now) {
            Ok(c) => c,
            Err(e) => return ProbeResult::failed(target, e, duration),
        };

        tracing::debug!(
            "TLS {}:{} issuer={:?} subject={:?} days_left={}",
            host,
            port,
            cert.issuer,
            cert.subject,
            cert.days_left
        );

        ProbeResult {
            target: target.to_string(),
            success: cert.valid,
            info: cert
                .valid
                .then(|| format!("Valid ({} days)", cert.days_left)),
            duration,
            certificate: Some(cert),
            ..Default::default()
        }
    }

    async fn handshake(
        &self,
        host: &str,
        port: u16,
        capture: Arc<LeafCapture>,
    ) -> Result<CertificateDer<'static>, ProbeError> {
        let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
            ProbeError::InvalidTarget {
                target: host.to_string(),
                reason: e.to_string(),
            }
        })?;

        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ProbeError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(capture)
            .with_no_client_auth();

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| ProbeError::Connect(format!("{}:{}: {}", host, port, e)))?;

        let tls = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(|e| ProbeError::Tls(e.to_string()))?;

        let (_, connection) = tls.get_ref();
        connection
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|leaf| leaf.clone().into_owned())
            .ok_or(ProbeError::NoCertificate)
    }
}
