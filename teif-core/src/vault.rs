//! Certificate custody: encryption at rest, PIN hashes and PKCS#12 inspection.
//!
//! Records are `base64(IV ‖ tag ‖ ciphertext)` under AES-256-GCM with a
//! 16-byte nonce. Decrypted containers only ever live in [`Zeroizing`]
//! buffers.
mod pkcs12;
mod record;

pub use record::{CertificateRecord, CertificateStatus, ExpiryStatus};

use crate::config::{Config, EncryptionKey, PinHashCost};
use aes_gcm::{
    AesGcm, KeyInit,
    aead::{AeadInPlace, consts::U16, generic_array::GenericArray},
    aes::Aes256,
};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x509_cert::{Certificate, der::Decode, time::Time};
use zeroize::Zeroizing;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

pub const PIN_MIN_LEN: usize = 4;
pub const PIN_MAX_LEN: usize = 20;

/// Vault errors.
///
/// [`code`](VaultError::code) is specific; [`user_message`](VaultError::user_message)
/// stays generic for anything cryptographic.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("failed to hash PIN: {0}")]
    PinHash(String),
    #[error("PIN must be between {min} and {max} characters")]
    InvalidPinFormat { min: usize, max: usize },
    #[error("PKCS#12 container could not be parsed: {0}")]
    InvalidContainer(String),
    #[error("PKCS#12 passphrase rejected")]
    InvalidPassphrase,
    #[error("PKCS#12 container holds no certificate")]
    NoCertificateFound,
    #[error("PKCS#12 container holds no private key")]
    NoPrivateKeyFound,
    #[error("certificate could not be decoded: {0}")]
    MalformedCertificate(String),
    #[error("certificate is not valid before {valid_from}")]
    NotYetValid {
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    },
    #[error("certificate expired on {valid_until}")]
    Expired {
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    },
}

impl VaultError {
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::EncryptionFailed => "ENCRYPTION_FAILED",
            VaultError::DecryptionFailed => "DECRYPTION_FAILED",
            VaultError::PinHash(_) => "PIN_HASH_FAILED",
            VaultError::InvalidPinFormat { .. } => "INVALID_PIN_FORMAT",
            VaultError::InvalidContainer(_) => "INVALID_CERTIFICATE",
            VaultError::InvalidPassphrase => "INVALID_PASSPHRASE",
            VaultError::NoCertificateFound => "NO_CERTIFICATE_FOUND",
            VaultError::NoPrivateKeyFound => "NO_PRIVATE_KEY_FOUND",
            VaultError::MalformedCertificate(_) => "MALFORMED_CERTIFICATE",
            VaultError::NotYetValid { .. } => "CERTIFICATE_NOT_YET_VALID",
            VaultError::Expired { .. } => "CERTIFICATE_EXPIRED",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            VaultError::InvalidPinFormat { min, max } => {
                format!("The PIN must be between {min} and {max} characters.")
            }
            VaultError::NotYetValid { valid_from, .. } => format!(
                "The certificate is not valid before {}.",
                valid_from.format("%Y-%m-%d")
            ),
            VaultError::Expired { valid_until, .. } => format!(
                "The certificate expired on {}.",
                valid_until.format("%Y-%m-%d")
            ),
            _ => "The certificate or PIN could not be verified.".to_owned(),
        }
    }
}

/// Metadata extracted from a PKCS#12 leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub subject: String,
    pub issuer: String,
    /// Lowercase hex without leading zeros.
    pub serial_number: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub algorithm: String,
}

/// Leaf certificate and private key unlocked from a PKCS#12 container.
pub struct Pkcs12Bundle {
    pub certificate: Certificate,
    pub certificate_der: Vec<u8>,
    pub private_key_der: Zeroizing<Vec<u8>>,
}

/// Encrypts certificates at rest and guards them with PIN hashes.
///
/// # Examples
/// ```rust
/// use teif_core::config::{EncryptionKey, PinHashCost};
/// use teif_core::vault::CertificateVault;
///
/// let cost = PinHashCost { memory_kib: 1024, iterations: 1, parallelism: 1 };
/// let vault = CertificateVault::new(EncryptionKey::from_bytes([3; 32]), cost);
///
/// let record = vault.encrypt(b"pkcs12 bytes")?;
/// assert_eq!(vault.decrypt(&record)?.as_slice(), b"pkcs12 bytes");
///
/// let hash = vault.hash_pin("1234")?;
/// assert!(vault.verify_pin("1234", &hash));
/// assert!(!vault.verify_pin("4321", &hash));
/// # Ok::<(), teif_core::vault::VaultError>(())
/// ```
#[derive(Debug, Clone)]
pub struct CertificateVault {
    key: EncryptionKey,
    pin_cost: PinHashCost,
}

impl CertificateVault {
    pub fn new(key: EncryptionKey, pin_cost: PinHashCost) -> Self {
        Self { key, pin_cost }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.encryption_key().clone(), config.pin_cost())
    }

    fn cipher(&self) -> Aes256Gcm16 {
        Aes256Gcm16::new(self.key.as_bytes().into())
    }

    pub fn encrypt(&self, blob: &[u8]) -> Result<String, VaultError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = blob.to_vec();
        let tag = self
            .cipher()
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut record = Vec::with_capacity(IV_LEN + TAG_LEN + buffer.len());
        record.extend_from_slice(&iv);
        record.extend_from_slice(&tag);
        record.extend_from_slice(&buffer);
        Ok(Base64::encode_string(&record))
    }

    /// Inverse of [`encrypt`](Self::encrypt); never returns partial data.
    pub fn decrypt(&self, record: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let raw = Base64::decode_vec(record.trim()).map_err(|_| VaultError::DecryptionFailed)?;
        if raw.len() < IV_LEN + TAG_LEN {
            return Err(VaultError::DecryptionFailed);
        }
        let (iv, rest) = raw.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut buffer = Zeroizing::new(ciphertext.to_vec());
        self.cipher()
            .decrypt_in_place_detached(
                GenericArray::from_slice(iv),
                b"",
                buffer.as_mut_slice(),
                GenericArray::from_slice(tag),
            )
            .map_err(|_| VaultError::DecryptionFailed)?;
        Ok(buffer)
    }

    fn argon2(&self) -> Result<Argon2<'static>, VaultError> {
        let params = Params::new(
            self.pin_cost.memory_kib,
            self.pin_cost.iterations,
            self.pin_cost.parallelism,
            None,
        )
        .map_err(|e| VaultError::PinHash(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Salted Argon2id PHC string.
    pub fn hash_pin(&self, pin: &str) -> Result<String, VaultError> {
        check_pin_format(pin)?;
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|e| VaultError::PinHash(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Check a PIN against a stored hash. The cost is read from the hash.
    pub fn verify_pin(&self, pin: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "stored PIN hash is unreadable");
                return false;
            }
        };
        Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok()
    }

    /// Unlock a container and extract its leaf certificate metadata.
    pub fn validate(&self, blob: &[u8], pin: &str) -> Result<CertificateMetadata, VaultError> {
        self.validate_at(blob, pin, Utc::now())
    }

    pub fn validate_at(
        &self,
        blob: &[u8],
        pin: &str,
        now: DateTime<Utc>,
    ) -> Result<CertificateMetadata, VaultError> {
        let bundle = open_pkcs12(blob, pin)?;
        let metadata = certificate_metadata(&bundle.certificate)?;
        check_validity(&metadata, now)?;
        tracing::debug!(
            subject = %metadata.subject,
            serial = %metadata.serial_number,
            "validated PKCS#12 certificate"
        );
        Ok(metadata)
    }
}

pub fn check_pin_format(pin: &str) -> Result<(), VaultError> {
    let len = pin.chars().count();
    if (PIN_MIN_LEN..=PIN_MAX_LEN).contains(&len) {
        Ok(())
    } else {
        Err(VaultError::InvalidPinFormat {
            min: PIN_MIN_LEN,
            max: PIN_MAX_LEN,
        })
    }
}

/// Verify the container MAC with the PIN, then pull out the first
/// certificate bag and the first key bag.
pub fn open_pkcs12(blob: &[u8], pin: &str) -> Result<Pkcs12Bundle, VaultError> {
    let contents = pkcs12::open(blob, pin)?;
    let certificate_der = contents
        .certificates
        .into_iter()
        .next()
        .ok_or(VaultError::NoCertificateFound)?;
    let private_key_der = contents
        .keys
        .into_iter()
        .next()
        .ok_or(VaultError::NoPrivateKeyFound)?;

    let certificate = Certificate::from_der(&certificate_der)
        .map_err(|e| VaultError::MalformedCertificate(format!("{e:?}")))?;
    Ok(Pkcs12Bundle {
        certificate,
        certificate_der,
        private_key_der,
    })
}

pub fn certificate_metadata(cert: &Certificate) -> Result<CertificateMetadata, VaultError> {
    let tbs = &cert.tbs_certificate;
    Ok(CertificateMetadata {
        subject: tbs.subject.to_string(),
        issuer: tbs.issuer.to_string(),
        serial_number: serial_hex(tbs.serial_number.as_bytes()),
        valid_from: to_utc(&tbs.validity.not_before)?,
        valid_until: to_utc(&tbs.validity.not_after)?,
        algorithm: signature_algorithm_name(&cert.signature_algorithm.oid.to_string()),
    })
}

/// Reject certificates outside their validity window.
pub fn check_validity(metadata: &CertificateMetadata, now: DateTime<Utc>) -> Result<(), VaultError> {
    if now < metadata.valid_from {
        return Err(VaultError::NotYetValid {
            valid_from: metadata.valid_from,
            valid_until: metadata.valid_until,
        });
    }
    if now > metadata.valid_until {
        return Err(VaultError::Expired {
            valid_from: metadata.valid_from,
            valid_until: metadata.valid_until,
        });
    }
    Ok(())
}

fn serial_hex(bytes: &[u8]) -> String {
    let hex = hex::encode(bytes);
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_owned()
    } else {
        trimmed.to_owned()
    }
}

fn to_utc(time: &Time) -> Result<DateTime<Utc>, VaultError> {
    let secs = i64::try_from(time.to_unix_duration().as_secs())
        .map_err(|e| VaultError::MalformedCertificate(e.to_string()))?;
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| VaultError::MalformedCertificate(format!("timestamp {secs} out of range")))
}

fn signature_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.11" => "RSA-SHA256",
        "1.2.840.113549.1.1.12" => "RSA-SHA384",
        "1.2.840.113549.1.1.13" => "RSA-SHA512",
        "1.2.840.113549.1.1.5" => "RSA-SHA1",
        "1.2.840.10045.4.3.2" => "ECDSA-SHA256",
        "1.2.840.10045.4.3.3" => "ECDSA-SHA384",
        other => other,
    }
    .to_owned()
}
