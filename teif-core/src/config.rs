//! Configuration and environment selection.
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const ENV_VAR: &str = "TEIF_ENV";
pub const ENCRYPTION_KEY_VAR: &str = "SIGNATURE_ENCRYPTION_KEY";
pub const MAX_CERT_SIZE_VAR: &str = "SIGNATURE_MAX_CERT_SIZE";
pub const PIN_MEMORY_VAR: &str = "SIGNATURE_PIN_MEMORY_KIB";
pub const PIN_ITERATIONS_VAR: &str = "SIGNATURE_PIN_ITERATIONS";
pub const EXPIRY_WARNING_VAR: &str = "SIGNATURE_EXPIRY_WARNING_DAYS";

pub const DEFAULT_MAX_CERT_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_EXPIRY_WARNING_DAYS: i64 = 30;

/// Deployment environment.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use teif_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("production")?;
/// assert_eq!(env, EnvironmentType::Production);
/// # Ok::<(), teif_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentType {
    #[default]
    Development,
    Test,
    Production,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(EnvironmentType::Development),
            "test" => Ok(EnvironmentType::Test),
            "production" | "prod" => Ok(EnvironmentType::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Development => "development",
            EnvironmentType::Test => "test",
            EnvironmentType::Production => "production",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("encryption key must be 64 hex characters: {reason}")]
    InvalidKey { reason: String },
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error(transparent)]
    Environment(#[from] EnvironmentParseError),
}

/// 256-bit key protecting certificates at rest.
///
/// Wiped on drop; `Debug` never prints the bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// # Examples
    /// ```rust
    /// use teif_core::config::EncryptionKey;
    ///
    /// assert!(EncryptionKey::from_hex(&"ab".repeat(32)).is_ok());
    /// assert!(EncryptionKey::from_hex("abcd").is_err());
    /// ```
    pub fn from_hex(hex_key: &str) -> Result<Self, ConfigError> {
        let hex_key = hex_key.trim();
        if hex_key.len() != 64 {
            return Err(ConfigError::InvalidKey {
                reason: format!("got {} characters", hex_key.len()),
            });
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_key, &mut bytes).map_err(|e| ConfigError::InvalidKey {
            reason: e.to_string(),
        })?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Argon2id cost parameters for PIN hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinHashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl PinHashCost {
    /// argon2 crate defaults; anything at or below this is flagged.
    pub const LIBRARY_DEFAULT: PinHashCost = PinHashCost {
        memory_kib: 19 * 1024,
        iterations: 2,
        parallelism: 1,
    };

    fn is_weak(&self) -> bool {
        self.memory_kib <= Self::LIBRARY_DEFAULT.memory_kib
            && self.iterations <= Self::LIBRARY_DEFAULT.iterations
    }
}

impl Default for PinHashCost {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

/// Process-wide settings for certificate custody and signing.
///
/// # Examples
/// ```rust
/// use teif_core::config::{Config, EncryptionKey, EnvironmentType};
///
/// let key = EncryptionKey::from_bytes([7; 32]);
/// let config = Config::new(EnvironmentType::Test, key).with_expiry_warning_days(14);
/// assert_eq!(config.expiry_warning_days(), 14);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    env: EnvironmentType,
    encryption_key: EncryptionKey,
    max_certificate_size: usize,
    pin_cost: PinHashCost,
    expiry_warning_days: i64,
}

impl Config {
    pub fn new(env: EnvironmentType, encryption_key: EncryptionKey) -> Self {
        Self {
            env,
            encryption_key,
            max_certificate_size: DEFAULT_MAX_CERT_SIZE,
            pin_cost: PinHashCost::default(),
            expiry_warning_days: DEFAULT_EXPIRY_WARNING_DAYS,
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any name -> value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = match lookup(ENV_VAR) {
            Some(value) if !value.trim().is_empty() => value.parse()?,
            _ => EnvironmentType::default(),
        };
        let key = lookup(ENCRYPTION_KEY_VAR)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing(ENCRYPTION_KEY_VAR))?;
        let mut config = Self::new(env, EncryptionKey::from_hex(&key)?);

        if let Some(size) = number(&lookup, MAX_CERT_SIZE_VAR)? {
            config.max_certificate_size = size;
        }
        if let Some(memory) = number(&lookup, PIN_MEMORY_VAR)? {
            config.pin_cost.memory_kib = memory;
        }
        if let Some(iterations) = number(&lookup, PIN_ITERATIONS_VAR)? {
            config.pin_cost.iterations = iterations;
        }
        if let Some(days) = number(&lookup, EXPIRY_WARNING_VAR)? {
            config.expiry_warning_days = days;
        }
        Ok(config)
    }

    pub fn with_max_certificate_size(mut self, bytes: usize) -> Self {
        self.max_certificate_size = bytes;
        self
    }

    pub fn with_pin_cost(mut self, cost: PinHashCost) -> Self {
        self.pin_cost = cost;
        self
    }

    pub fn with_expiry_warning_days(mut self, days: i64) -> Self {
        self.expiry_warning_days = days;
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption_key
    }

    pub fn max_certificate_size(&self) -> usize {
        self.max_certificate_size
    }

    pub fn pin_cost(&self) -> PinHashCost {
        self.pin_cost
    }

    pub fn expiry_warning_days(&self) -> i64 {
        self.expiry_warning_days
    }

    /// Human-readable notes about weak settings.
    pub fn security_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.pin_cost.is_weak() {
            let note = format!(
                "PIN hashing cost ({} KiB, {} passes) is at or below the argon2 default",
                self.pin_cost.memory_kib, self.pin_cost.iterations
            );
            if self.env == EnvironmentType::Production {
                warnings.push(format!("{note}; raise it for production"));
            } else {
                warnings.push(note);
            }
        }
        if self.encryption_key.as_bytes().iter().all(|b| *b == self.encryption_key.as_bytes()[0]) {
            warnings.push("encryption key is a repeated byte pattern".to_owned());
        }
        if self.max_certificate_size > DEFAULT_MAX_CERT_SIZE {
            warnings.push(format!(
                "maximum certificate size {} exceeds the recommended {} bytes",
                self.max_certificate_size, DEFAULT_MAX_CERT_SIZE
            ));
        }
        warnings
    }
}

fn number<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn key_is_required() {
        let err = Config::from_lookup(lookup(&[])).expect_err("missing key");
        assert!(matches!(err, ConfigError::Missing(ENCRYPTION_KEY_VAR)));
    }

    #[test]
    fn reads_overrides() {
        let key = "0123456789abcdef".repeat(4);
        let config = Config::from_lookup(lookup(&[
            (ENV_VAR, "production"),
            (ENCRYPTION_KEY_VAR, &key),
            (MAX_CERT_SIZE_VAR, "2048"),
            (PIN_MEMORY_VAR, "8192"),
            (PIN_ITERATIONS_VAR, "1"),
            (EXPIRY_WARNING_VAR, "7"),
        ]))
        .expect("config");
        assert_eq!(config.env(), EnvironmentType::Production);
        assert_eq!(config.max_certificate_size(), 2048);
        assert_eq!(config.pin_cost().memory_kib, 8192);
        assert_eq!(config.expiry_warning_days(), 7);
        assert_eq!(config.encryption_key().as_bytes()[0], 0x01);

        let warnings = config.security_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("production"));
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_lookup(lookup(&[(ENCRYPTION_KEY_VAR, "zz")])).expect_err("short");
        assert!(matches!(err, ConfigError::InvalidKey { .. }));

        let key = "g".repeat(64);
        let err = Config::from_lookup(lookup(&[(ENCRYPTION_KEY_VAR, &key)])).expect_err("hex");
        assert!(matches!(err, ConfigError::InvalidKey { .. }));

        let key = "a".repeat(64);
        let err = Config::from_lookup(lookup(&[
            (ENCRYPTION_KEY_VAR, &key),
            (MAX_CERT_SIZE_VAR, "lots"),
        ]))
        .expect_err("number");
        assert!(matches!(err, ConfigError::InvalidNumber { var: MAX_CERT_SIZE_VAR, .. }));

        let err = Config::from_lookup(lookup(&[(ENV_VAR, "staging"), (ENCRYPTION_KEY_VAR, &key)]))
            .expect_err("env");
        assert!(matches!(err, ConfigError::Environment(_)));
    }

    #[test]
    fn debug_hides_key_bytes() {
        let key = EncryptionKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{key:?}"), "EncryptionKey(..)");
    }
}
