use super::CertificateMetadata;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Verified,
    Revoked,
}

/// Persisted certificate for one user.
///
/// Holds ciphertext and a PIN hash only. Revocation drops the ciphertext but
/// keeps the metadata for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub user_id: String,
    pub filename: String,
    ciphertext: Option<String>,
    pin_hash: String,
    pub metadata: CertificateMetadata,
    pub status: CertificateStatus,
    pub uploaded_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpiryStatus {
    pub valid_until: DateTime<Utc>,
    /// Whole days left; negative once expired.
    pub days_remaining: i64,
    pub expired: bool,
}

impl CertificateRecord {
    pub fn new(
        user_id: impl Into<String>,
        filename: impl Into<String>,
        ciphertext: String,
        pin_hash: String,
        metadata: CertificateMetadata,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            filename: filename.into(),
            ciphertext: Some(ciphertext),
            pin_hash,
            metadata,
            status: CertificateStatus::Verified,
            uploaded_at,
            last_used_at: None,
        }
    }

    /// Encrypted container, absent after revocation.
    pub fn ciphertext(&self) -> Option<&str> {
        self.ciphertext.as_deref()
    }

    pub fn pin_hash(&self) -> &str {
        &self.pin_hash
    }

    pub fn is_active(&self) -> bool {
        self.status == CertificateStatus::Verified && self.ciphertext.is_some()
    }

    pub fn revoke(&mut self) {
        self.status = CertificateStatus::Revoked;
        self.ciphertext = None;
    }

    pub fn mark_used(&mut self, at: DateTime<Utc>) {
        self.last_used_at = Some(at);
    }

    pub fn expiry_status(&self, now: DateTime<Utc>) -> ExpiryStatus {
        let valid_until = self.metadata.valid_until;
        ExpiryStatus {
            valid_until,
            days_remaining: (valid_until - now).num_days(),
            expired: now > valid_until,
        }
    }

    pub fn expiring_soon(&self, now: DateTime<Utc>, days: i64) -> bool {
        let status = self.expiry_status(now);
        !status.expired && self.metadata.valid_until - now <= Duration::days(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(valid_until: DateTime<Utc>) -> CertificateRecord {
        let metadata = CertificateMetadata {
            subject: "CN=Test".into(),
            issuer: "CN=Test".into(),
            serial_number: "1".into(),
            valid_from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            valid_until,
            algorithm: "RSA-SHA256".into(),
        };
        CertificateRecord::new(
            "user-1",
            "cert.p12",
            "ciphertext".into(),
            "$argon2id$...".into(),
            metadata,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn revocation_clears_ciphertext_and_keeps_metadata() {
        let mut record = record(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        assert!(record.is_active());
        record.revoke();
        assert!(!record.is_active());
        assert_eq!(record.ciphertext(), None);
        assert_eq!(record.status, CertificateStatus::Revoked);
        assert_eq!(record.metadata.subject, "CN=Test");
    }

    #[test]
    fn expiry_window() {
        let until = Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap();
        let record = record(until);

        let early = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(!record.expiring_soon(early, 30));

        let close = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let status = record.expiry_status(close);
        assert_eq!(status.days_remaining, 20);
        assert!(!status.expired);
        assert!(record.expiring_soon(close, 30));

        let after = Utc.with_ymd_and_hms(2025, 7, 2, 0, 0, 0).unwrap();
        let status = record.expiry_status(after);
        assert!(status.expired);
        assert_eq!(status.days_remaining, -2);
        assert!(!record.expiring_soon(after, 30));
    }
}
