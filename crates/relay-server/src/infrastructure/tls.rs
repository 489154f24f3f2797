//! Self-signed TLS certificate management.
//!
//! The relay's TLS listener needs a certificate that browsers on the local
//! network can be pointed at without any manual provisioning. This module
//! owns the full lifecycle:
//!
//! 1. On first use, generate a 2048-bit RSA key pair and a self-signed
//!    certificate valid from one day in the past through one year ahead,
//!    with subject alternative names covering `localhost`, the loopback
//!    addresses, and every non-loopback IPv4 address bound to an up
//!    interface.
//! 2. Persist the record as a passphrase-sealed bundle next to the
//!    executable, written atomically (temp file + rename) so no reader can
//!    ever observe a half-written bundle.
//! 3. On later runs, load the bundle and reuse it while its expiry is more
//!    than 30 days away; otherwise regenerate and overwrite.
//!
//! # Concurrency
//!
//! `get_or_create` may be hit by several TLS handshakes at once before the
//! first record exists. All callers serialize on one mutex, so at most one
//! generation runs at a time and every caller receives the same fully
//! persisted record.
//!
//! # Bundle format
//!
//! A 4-byte magic (`SRB1`), a random 12-byte nonce, then the JSON record
//! encrypted with ChaCha20-Poly1305 under a key derived from the passphrase
//! by SHA-256. The AEAD tag doubles as the wrong-passphrase detector.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, KeyPair,
    KeyUsagePurpose, SanType,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

/// Regenerate when the certificate expires within this margin.
pub const RENEWAL_MARGIN_SECS: i64 = 30 * 86_400;

/// Certificates are backdated by one day to absorb clock skew.
const VALIDITY_BACKDATE_SECS: i64 = 86_400;

/// Certificates are valid for one year.
const VALIDITY_SECS: i64 = 365 * 86_400;

/// RSA modulus size in bits.
const KEY_BITS: usize = 2048;

/// Bundle file magic, bumped on format changes.
const BUNDLE_MAGIC: &[u8; 4] = b"SRB1";

/// AEAD nonce length for ChaCha20-Poly1305.
const NONCE_LEN: usize = 12;

const CERT_SUBJECT: &str = "CN=localhost, O=Signal Relay, OU=Development, C=US";

/// Error type for certificate operations.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// File-system failure reading or writing the bundle.
    #[error("I/O error accessing certificate bundle at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The bundle is truncated, corrupt, or sealed with another passphrase.
    #[error("certificate bundle is corrupt or the passphrase is wrong")]
    Unseal,
    /// The record could not be serialized or deserialized.
    #[error("certificate bundle encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// RSA key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    /// Certificate construction failed.
    #[error("certificate generation failed: {0}")]
    Generation(String),
    /// rustls rejected the certificate or key.
    #[error("TLS configuration rejected the certificate: {0}")]
    Tls(#[from] rustls::Error),
}

/// The active TLS identity: certificate, key, and validity metadata.
///
/// Immutable once constructed; exactly one record is active at a time and
/// concurrent callers share it through an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Distinguished name of the certificate subject.
    pub subject: String,
    /// Validity start, unix seconds.
    pub not_before: i64,
    /// Validity end, unix seconds.
    pub not_after: i64,
    /// Human-readable subject-alternative-name entries.
    pub subject_alt_names: Vec<String>,
    /// DER-encoded X.509 certificate.
    #[serde(with = "b64")]
    pub certificate_der: Vec<u8>,
    /// DER-encoded PKCS#8 private key.
    #[serde(with = "b64")]
    pub private_key_der: Vec<u8>,
}

impl CertificateRecord {
    /// Whether the record expires within `margin_secs` of `now`.
    pub fn expires_within(&self, margin_secs: i64, now: i64) -> bool {
        self.not_after - now <= margin_secs
    }

    /// Builds a rustls server configuration serving this record.
    pub fn server_config(&self) -> Result<Arc<rustls::ServerConfig>, CertificateError> {
        let certs = vec![CertificateDer::from(self.certificate_der.clone())];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.private_key_der.clone()));
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Arc::new(config))
    }
}

struct ManagerState {
    record: Option<Arc<CertificateRecord>>,
    /// Acceptor built from `record`; rebuilt only when the record rotates.
    acceptor: Option<(Arc<CertificateRecord>, TlsAcceptor)>,
}

/// Owns the acquire-or-generate-and-rotate logic for the TLS identity.
pub struct CertificateManager {
    bundle_path: PathBuf,
    passphrase: String,
    state: Mutex<ManagerState>,
}

impl CertificateManager {
    /// Creates a manager persisting its bundle at `bundle_path`.
    pub fn new(bundle_path: PathBuf, passphrase: String) -> Self {
        Self {
            bundle_path,
            passphrase,
            state: Mutex::new(ManagerState {
                record: None,
                acceptor: None,
            }),
        }
    }

    /// Returns the active certificate record, generating one if needed.
    ///
    /// Safe to call from concurrent TLS handshakes: callers serialize on an
    /// internal lock and never observe a partially generated or partially
    /// persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError`] when generation or persistence fails.
    /// Such a failure is fatal to the TLS listener only; the plain listener
    /// does not depend on this path.
    pub fn get_or_create(&self) -> Result<Arc<CertificateRecord>, CertificateError> {
        let mut state = self.state.lock().expect("lock poisoned");
        let now = unix_now();

        if let Some(record) = &state.record {
            if !record.expires_within(RENEWAL_MARGIN_SECS, now) {
                return Ok(Arc::clone(record));
            }
            warn!("cached certificate is inside the renewal margin, rotating");
        }

        match self.load_bundle() {
            Ok(Some(record)) if !record.expires_within(RENEWAL_MARGIN_SECS, now) => {
                info!(
                    "loaded certificate bundle, valid until {}",
                    format_unix(record.not_after)
                );
                let record = Arc::new(record);
                state.record = Some(Arc::clone(&record));
                state.acceptor = None;
                return Ok(record);
            }
            Ok(Some(record)) => {
                warn!(
                    "persisted certificate expires {} (within the {}-day margin), regenerating",
                    format_unix(record.not_after),
                    RENEWAL_MARGIN_SECS / 86_400
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!("could not load certificate bundle ({e}), regenerating");
            }
        }

        let record = Arc::new(self.generate(now)?);
        self.persist(&record)?;
        info!(
            "generated self-signed certificate, valid until {}",
            format_unix(record.not_after)
        );
        state.record = Some(Arc::clone(&record));
        state.acceptor = None;
        Ok(record)
    }

    /// Returns a TLS acceptor for the active record.
    ///
    /// The acceptor is cached and rebuilt only when the record rotates.
    pub fn acceptor(&self) -> Result<TlsAcceptor, CertificateError> {
        let record = self.get_or_create()?;
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some((cached_record, acceptor)) = &state.acceptor {
            if Arc::ptr_eq(cached_record, &record) {
                return Ok(acceptor.clone());
            }
        }
        let acceptor = TlsAcceptor::from(record.server_config()?);
        state.acceptor = Some((record, acceptor.clone()));
        Ok(acceptor)
    }

    /// Reads and unseals the persisted bundle; `Ok(None)` when absent.
    fn load_bundle(&self) -> Result<Option<CertificateRecord>, CertificateError> {
        let bytes = match std::fs::read(&self.bundle_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CertificateError::Io {
                    path: self.bundle_path.clone(),
                    source: e,
                })
            }
        };
        unseal(&bytes, &self.passphrase).map(Some)
    }

    /// Seals and writes the bundle atomically, overwriting any prior file.
    fn persist(&self, record: &CertificateRecord) -> Result<(), CertificateError> {
        let sealed = seal(record, &self.passphrase)?;

        let io_err = |source| CertificateError::Io {
            path: self.bundle_path.clone(),
            source,
        };

        if let Some(dir) = self.bundle_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(io_err)?;
            }
        }

        // Write-then-rename so a concurrent loader never sees a torn file.
        let temp_path = self.bundle_path.with_extension("sealed.tmp");
        std::fs::write(&temp_path, &sealed).map_err(io_err)?;
        std::fs::rename(&temp_path, &self.bundle_path).map_err(io_err)?;
        Ok(())
    }

    /// Generates a fresh RSA-2048 self-signed record.
    fn generate(&self, now: i64) -> Result<CertificateRecord, CertificateError> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| CertificateError::KeyGeneration(e.to_string()))?;
        let key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CertificateError::KeyGeneration(e.to_string()))?;
        let key_der = private_key
            .to_pkcs8_der()
            .map_err(|e| CertificateError::KeyGeneration(e.to_string()))?
            .as_bytes()
            .to_vec();

        // rcgen cannot generate RSA keys itself, but it signs with one
        // supplied externally.
        let key_pair = KeyPair::from_pem(&key_pem)
            .map_err(|e| CertificateError::Generation(e.to_string()))?;

        let not_before = now - VALIDITY_BACKDATE_SECS;
        let not_after = now + VALIDITY_SECS;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "localhost");
        dn.push(DnType::OrganizationName, "Signal Relay");
        dn.push(DnType::OrganizationalUnitName, "Development");
        dn.push(DnType::CountryName, "US");
        params.distinguished_name = dn;
        params.not_before = OffsetDateTime::from_unix_timestamp(not_before)
            .map_err(|e| CertificateError::Generation(e.to_string()))?;
        params.not_after = OffsetDateTime::from_unix_timestamp(not_after)
            .map_err(|e| CertificateError::Generation(e.to_string()))?;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DataEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let entries = san_entries();
        for entry in &entries {
            params.subject_alt_names.push(entry.to_san_type()?);
        }

        let certificate = params
            .self_signed(&key_pair)
            .map_err(|e| CertificateError::Generation(e.to_string()))?;

        Ok(CertificateRecord {
            subject: CERT_SUBJECT.to_string(),
            not_before,
            not_after,
            subject_alt_names: entries.iter().map(SanEntry::label).collect(),
            certificate_der: certificate.der().as_ref().to_vec(),
            private_key_der: key_der,
        })
    }
}

// ── Subject alternative names ─────────────────────────────────────────────────

/// One SAN entry, kept in both typed and printable form.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SanEntry {
    Dns(String),
    Ip(IpAddr),
}

impl SanEntry {
    fn label(&self) -> String {
        match self {
            SanEntry::Dns(name) => name.clone(),
            SanEntry::Ip(ip) => ip.to_string(),
        }
    }

    fn to_san_type(&self) -> Result<SanType, CertificateError> {
        Ok(match self {
            SanEntry::Dns(name) => SanType::DnsName(
                Ia5String::try_from(name.as_str())
                    .map_err(|e| CertificateError::Generation(e.to_string()))?,
            ),
            SanEntry::Ip(ip) => SanType::IpAddress(*ip),
        })
    }
}

/// Names the certificate must cover: `localhost`, the loopback addresses,
/// and every non-loopback IPv4 bound to an up interface.
fn san_entries() -> Vec<SanEntry> {
    let mut entries = vec![
        SanEntry::Dns("localhost".to_string()),
        // Some clients dial the loopback IP as a host name.
        SanEntry::Dns("127.0.0.1".to_string()),
        SanEntry::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanEntry::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ];

    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for interface in interfaces {
                let ip = interface.ip();
                if interface.is_loopback() || !ip.is_ipv4() {
                    continue;
                }
                let entry = SanEntry::Ip(ip);
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
        }
        Err(e) => {
            // A SAN set with only loopback entries still serves localhost.
            warn!("could not enumerate network interfaces: {e}");
        }
    }

    entries
}

// ── Sealed bundle codec ───────────────────────────────────────────────────────

/// Encrypts a record into bundle bytes.
fn seal(record: &CertificateRecord, passphrase: &str) -> Result<Vec<u8>, CertificateError> {
    let plaintext = serde_json::to_vec(record)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&derive_key(passphrase)));

    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| CertificateError::Unseal)?;

    let mut bundle = Vec::with_capacity(BUNDLE_MAGIC.len() + NONCE_LEN + ciphertext.len());
    bundle.extend_from_slice(BUNDLE_MAGIC);
    bundle.extend_from_slice(&nonce);
    bundle.extend_from_slice(&ciphertext);
    Ok(bundle)
}

/// Decrypts bundle bytes back into a record.
fn unseal(bundle: &[u8], passphrase: &str) -> Result<CertificateRecord, CertificateError> {
    let header_len = BUNDLE_MAGIC.len() + NONCE_LEN;
    if bundle.len() <= header_len || &bundle[..BUNDLE_MAGIC.len()] != BUNDLE_MAGIC {
        return Err(CertificateError::Unseal);
    }
    let nonce = &bundle[BUNDLE_MAGIC.len()..header_len];
    let ciphertext = &bundle[header_len..];

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&derive_key(passphrase)));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CertificateError::Unseal)?;

    Ok(serde_json::from_slice(&plaintext)?)
}

/// Derives the sealing key from the passphrase.
fn derive_key(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

/// Current time as unix seconds.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Formats a unix timestamp for logs.
fn format_unix(secs: i64) -> String {
    OffsetDateTime::from_unix_timestamp(secs)
        .map(|t| t.to_string())
        .unwrap_or_else(|_| secs.to_string())
}

/// Base64 (de)serialization for DER byte fields inside the JSON record.
mod b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(serde::de::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
