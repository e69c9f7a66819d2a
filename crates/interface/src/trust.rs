use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::addr::ProxyConfig;
use crate::dial;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("certificate invalid: {0}")]
	CertificateInvalid(String),
	#[error("bootstrap network error: {0}")]
	BootstrapNetworkError(#[from] std::io::Error),
	#[error("bootstrap exhausted after {0} attempts with no certificate")]
	BootstrapExhausted(u32),
	#[error("tls error: {0}")]
	Tls(#[from] rustls::Error),
}

const BOOTSTRAP_ATTEMPTS: u32 = 10;
const BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

static CRYPTO_PROVIDER: Lazy<()> = Lazy::new(|| {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
});

fn ensure_crypto_provider() {
	Lazy::force(&CRYPTO_PROVIDER);
}

#[derive(Clone, Debug)]
struct Expiration {
	not_before: SystemTime,
	not_after: SystemTime,
}

impl Expiration {
	fn is_valid_now(&self) -> bool {
		let now = SystemTime::now();
		now >= self.not_before && now <= self.not_after
	}
}

/// On-disk per-host certificate cache, deciding between the CA-validated
/// path and a trust-on-first-use pinned self-signed certificate.
#[derive(Debug, Clone)]
pub struct TrustStore {
	certs_dir: PathBuf,
}

impl TrustStore {
	pub fn new(certs_dir: impl Into<PathBuf>) -> Self {
		TrustStore { certs_dir: certs_dir.into() }
	}

	fn cert_path(&self, host: &str) -> PathBuf {
		self.certs_dir.join(host)
	}

	/// Produces a TLS config suitable for opening a session to `host:port`.
	pub async fn load_or_bootstrap(
		&self,
		host: &str,
		port: u16,
		proxy: Option<&ProxyConfig>,
	) -> Result<Arc<ClientConfig>, Error> {
		ensure_crypto_provider();
		let path = self.cert_path(host);

		match self.read_cached(&path).await? {
			Some(Cached::CaValidated) => return Ok(Arc::new(ca_config()?)),
			Some(Cached::Pinned(der)) => return Ok(Arc::new(pinned_config(der)?)),
			None => {},
		}

		self.bootstrap(host, port, proxy, &path).await
	}

	async fn read_cached(&self, path: &Path) -> Result<Option<Cached>, Error> {
		let bytes = match fs::read(path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		if bytes.is_empty() {
			return Ok(Some(Cached::CaValidated));
		}
		match parse_pinned_pem(&bytes) {
			Ok((der, expiry)) => {
				if expiry.is_valid_now() {
					Ok(Some(Cached::Pinned(der)))
				} else {
					fs::remove_file(path).await?;
					Ok(None)
				}
			},
			// Syntactically broken file: treat as absent, bootstrap will overwrite it.
			Err(_) => Ok(None),
		}
	}

	async fn bootstrap(
		&self,
		host: &str,
		port: u16,
		proxy: Option<&ProxyConfig>,
		path: &Path,
	) -> Result<Arc<ClientConfig>, Error> {
		match self.probe_ca(host, port, proxy).await {
			Ok(()) => {
				info!(%host, "CA-validated certificate, pinning empty sentinel");
				write_atomic(path, &[]).await?;
				Ok(Arc::new(ca_config()?))
			},
			Err(ProbeFailure::VerificationFailed) => {
				let der = self.bootstrap_pin(host, port, proxy).await?;
				let pem = der_to_pem(&der);
				write_atomic(path, pem.as_bytes()).await?;
				Ok(Arc::new(pinned_config(der)?))
			},
			Err(ProbeFailure::Network(e)) => Err(Error::BootstrapNetworkError(e)),
		}
	}

	async fn probe_ca(&self, host: &str, port: u16, proxy: Option<&ProxyConfig>) -> Result<(), ProbeFailure> {
		let config = ca_config().map_err(|e| ProbeFailure::Network(std::io::Error::other(e)))?;
		let stream = dial::dial(host, port, proxy).await.map_err(ProbeFailure::Network)?;
		let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
		let server_name = ServerName::try_from(host.to_string())
			.map_err(|e| ProbeFailure::Network(std::io::Error::other(e)))?;
		match connector.connect(server_name, stream).await {
			Ok(mut tls) => {
				let _ = tls.shutdown().await;
				Ok(())
			},
			Err(e) if is_verification_failure(&e) => Err(ProbeFailure::VerificationFailed),
			Err(e) => Err(ProbeFailure::Network(e)),
		}
	}

	async fn bootstrap_pin(
		&self,
		host: &str,
		port: u16,
		proxy: Option<&ProxyConfig>,
	) -> Result<CertificateDer<'static>, Error> {
		for attempt in 0..BOOTSTRAP_ATTEMPTS {
			match self.capture_peer_cert(host, port, proxy).await {
				Ok(der) => return Ok(der),
				Err(e) => {
					warn!(%host, attempt, "certificate bootstrap attempt failed: {e}");
					sleep(BOOTSTRAP_RETRY_INTERVAL).await;
				},
			}
		}
		Err(Error::BootstrapExhausted(BOOTSTRAP_ATTEMPTS))
	}

	async fn capture_peer_cert(
		&self,
		host: &str,
		port: u16,
		proxy: Option<&ProxyConfig>,
	) -> Result<CertificateDer<'static>, Error> {
		let captured: Arc<StdMutex<Option<CertificateDer<'static>>>> = Arc::new(StdMutex::new(None));
		let verifier = Arc::new(CapturingVerifier { captured: captured.clone() });
		let config = ClientConfig::builder()
			.dangerous()
			.with_custom_certificate_verifier(verifier)
			.with_no_client_auth();
		let stream = dial::dial(host, port, proxy).await?;
		let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
		let server_name =
			ServerName::try_from(host.to_string()).map_err(|e| Error::CertificateInvalid(e.to_string()))?;
		let mut tls = connector.connect(server_name, stream).await?;
		let _ = tls.shutdown().await;
		captured
			.lock()
			.unwrap()
			.take()
			.ok_or_else(|| Error::CertificateInvalid("handshake completed without a peer certificate".into()))
	}
}

enum Cached {
	CaValidated,
	Pinned(CertificateDer<'static>),
}

enum ProbeFailure {
	VerificationFailed,
	Network(std::io::Error),
}

fn is_verification_failure(e: &std::io::Error) -> bool {
	e.get_ref().map(|inner| inner.to_string().to_lowercase().contains("certificate")).unwrap_or(false)
		|| e.to_string().to_lowercase().contains("certificate")
}

fn ca_config() -> Result<ClientConfig, Error> {
	let mut roots = RootCertStore::empty();
	for cert in rustls_native_certs::load_native_certs().certs {
		let _ = roots.add(cert);
	}
	Ok(ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
}

/// The pin subsumes hostname verification: the only way a peer presents this
/// exact certificate is if it holds the matching private key.
fn pinned_config(der: CertificateDer<'static>) -> Result<ClientConfig, Error> {
	let mut roots = RootCertStore::empty();
	roots.add(der).map_err(Error::Tls)?;
	let verifier = rustls::client::WebPkiServerVerifier::builder(Arc::new(roots))
		.build()
		.map_err(|e| Error::CertificateInvalid(e.to_string()))?;
	Ok(
		ClientConfig::builder()
			.dangerous()
			.with_custom_certificate_verifier(PinnedHostnameless(verifier))
			.with_no_client_auth(),
	)
}

/// Wraps a webpki verifier but skips hostname/SAN matching, since pinning
/// the exact certificate already proves identity.
#[derive(Debug)]
struct PinnedHostnameless(Arc<rustls::client::WebPkiServerVerifier>);

impl ServerCertVerifier for PinnedHostnameless {
	fn verify_server_cert(
		&self,
		end_entity: &CertificateDer<'_>,
		intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		ocsp_response: &[u8],
		now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		// Re-derive a server name from the pin itself so webpki's name check
		// always succeeds; the byte-for-byte match of `end_entity` against
		// our single trust anchor is what actually establishes trust.
		let placeholder = ServerName::try_from("localhost").expect("static name is valid");
		self.0.verify_server_cert(end_entity, intermediates, &placeholder, ocsp_response, now)
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		self.0.verify_tls12_signature(message, cert, dss)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		self.0.verify_tls13_signature(message, cert, dss)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.0.supported_verify_schemes()
	}
}

/// Accepts any certificate, capturing the leaf DER for pinning. Only used
/// transiently during the trust-on-first-use bootstrap probe.
#[derive(Debug)]
struct CapturingVerifier {
	captured: Arc<StdMutex<Option<CertificateDer<'static>>>>,
}

impl ServerCertVerifier for CapturingVerifier {
	fn verify_server_cert(
		&self,
		end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		*self.captured.lock().unwrap() = Some(end_entity.clone().into_owned());
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn verify_tls13_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		vec![
			SignatureScheme::RSA_PKCS1_SHA256,
			SignatureScheme::ECDSA_NISTP256_SHA256,
			SignatureScheme::ED25519,
			SignatureScheme::RSA_PSS_SHA256,
		]
	}
}

fn parse_pinned_pem(bytes: &[u8]) -> Result<(CertificateDer<'static>, Expiration), Error> {
	let mut reader = std::io::BufReader::new(Cursor::new(bytes));
	let item = rustls_pemfile::read_one(&mut reader)
		.map_err(|e| Error::CertificateInvalid(e.to_string()))?
		.ok_or_else(|| Error::CertificateInvalid("empty pin file".into()))?;
	let rustls_pemfile::Item::X509Certificate(der) = item else {
		return Err(Error::CertificateInvalid("pin file is not a certificate".into()));
	};
	let (_, parsed) =
		x509_parser::parse_x509_certificate(&der).map_err(|e| Error::CertificateInvalid(e.to_string()))?;
	let expiry = Expiration {
		not_before: UNIX_EPOCH + Duration::from_secs(parsed.validity.not_before.timestamp().try_into().unwrap_or_default()),
		not_after: UNIX_EPOCH + Duration::from_secs(parsed.validity.not_after.timestamp().try_into().unwrap_or_default()),
	};
	Ok((der, expiry))
}

fn der_to_pem(der: &CertificateDer<'_>) -> String {
	use base64::Engine;
	let b64 = base64::engine::general_purpose::STANDARD.encode(der.as_ref());
	let mut body = String::from("-----BEGIN CERTIFICATE-----\n");
	for chunk in b64.as_bytes().chunks(64) {
		body.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
		body.push('\n');
	}
	// Ensure the END marker always sits on its own line, regardless of how
	// the final body chunk happened to wrap.
	body.push_str("-----END CERTIFICATE-----\n");
	body
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Error> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).await?;
	}
	let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
	tmp_name.push(".tmp");
	let tmp_path = path.with_file_name(tmp_name);
	let mut file = fs::File::create(&tmp_path).await?;
	file.write_all(contents).await?;
	file.flush().await?;
	file.sync_all().await?;
	drop(file);
	fs::rename(&tmp_path, path).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn absent_cert_file_reads_as_none() {
		let dir = tempfile::tempdir().unwrap();
		let store = TrustStore::new(dir.path());
		let cached = store.read_cached(&dir.path().join("example.org")).await.unwrap();
		assert!(cached.is_none());
	}

	#[tokio::test]
	async fn empty_sentinel_file_means_ca_validated() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("example.org");
		fs::write(&path, []).await.unwrap();
		let store = TrustStore::new(dir.path());
		let cached = store.read_cached(&path).await.unwrap();
		assert!(matches!(cached, Some(Cached::CaValidated)));
	}

	#[tokio::test]
	async fn syntactically_broken_pin_file_is_treated_as_absent() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("example.org");
		fs::write(&path, b"not a certificate").await.unwrap();
		let store = TrustStore::new(dir.path());
		let cached = store.read_cached(&path).await.unwrap();
		assert!(cached.is_none());
	}

	#[test]
	fn end_marker_always_lands_on_its_own_line() {
		let der = CertificateDer::from(vec![0u8; 300]);
		let pem = der_to_pem(&der);
		assert!(pem.ends_with("-----END CERTIFICATE-----\n"));
		let end_line_start = pem.rfind("-----END").unwrap();
		assert_eq!(&pem[end_line_start - 1..end_line_start], "\n");
	}
}
