//! Upload, sign and revoke boundaries over the vault and signature engine.
//!
//! Key material is only ever opened inside [`CertificateService::sign_at`]:
//! decrypted into a zeroizing buffer, turned into a signer, used once and
//! dropped before the result is returned.
use crate::audit::{AuditAction, AuditEntry, AuditLog, AuditOutcome, record_best_effort};
use crate::config::DEFAULT_EXPIRY_WARNING_DAYS;
use crate::invoice::sign::{InvoiceSigner, SigningError, SigningStage};
use crate::vault::{
    CertificateMetadata, CertificateRecord, CertificateVault, ExpiryStatus, VaultError,
    check_pin_format, check_validity,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, sync::Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("certificate store unavailable: {0}")]
    Unavailable(String),
    #[error("certificate store holds corrupt data: {0}")]
    Corrupt(String),
}

/// Persistence for certificate records, one per user.
pub trait CertificateStore: Send + Sync {
    fn fetch(&self, user_id: &str) -> Result<Option<CertificateRecord>, StoreError>;

    /// Insert or replace the record for `record.user_id`.
    fn save(&self, record: &CertificateRecord) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    records: Mutex<HashMap<String, CertificateRecord>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn fetch(&self, user_id: &str) -> Result<Option<CertificateRecord>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(records.get(user_id).cloned())
    }

    fn save(&self, record: &CertificateRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Vault(e) => e.code(),
            ServiceError::Signing(e) => e.code(),
            ServiceError::Store(_) => "STORAGE_ERROR",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Vault(e) => e.user_message(),
            ServiceError::Signing(e) => e.user_message(),
            ServiceError::Store(_) => "The certificate store is unavailable.".to_owned(),
        }
    }

    fn redacted(&self) -> String {
        format!("{}: {}", self.code(), self.user_message())
    }
}

pub struct UploadRequest<'a> {
    pub user_id: &'a str,
    pub filename: &'a str,
    pub blob: &'a [u8],
    pub pin: &'a str,
}

pub struct SignRequest<'a> {
    pub user_id: &'a str,
    /// Invoice number, recorded in the audit trail.
    pub invoice_ref: &'a str,
    pub xml: &'a str,
    pub pin: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureResult {
    pub signature_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub signed_xml: String,
}

pub struct CertificateService<S, A> {
    vault: CertificateVault,
    store: S,
    audit: A,
    expiry_warning_days: i64,
}

impl<S: CertificateStore, A: AuditLog> CertificateService<S, A> {
    pub fn new(vault: CertificateVault, store: S, audit: A) -> Self {
        Self {
            vault,
            store,
            audit,
            expiry_warning_days: DEFAULT_EXPIRY_WARNING_DAYS,
        }
    }

    pub fn with_expiry_warning_days(mut self, days: i64) -> Self {
        self.expiry_warning_days = days;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub fn upload(&self, request: UploadRequest<'_>) -> Result<CertificateMetadata, ServiceError> {
        self.upload_at(request, Utc::now())
    }

    /// Validate, encrypt and persist a PKCS#12 container, replacing any
    /// previous certificate of the user. Returns metadata only.
    pub fn upload_at(
        &self,
        request: UploadRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<CertificateMetadata, ServiceError> {
        let metadata = match check_pin_format(request.pin)
            .and_then(|()| self.vault.validate_at(request.blob, request.pin, now))
        {
            Ok(metadata) => metadata,
            Err(e) => {
                let err = ServiceError::from(e);
                tracing::info!(user = request.user_id, code = err.code(), "certificate rejected");
                self.audit_event(
                    AuditEntry::new(request.user_id, AuditAction::ValidateFailed, AuditOutcome::Failed)
                        .with_target(request.filename)
                        .with_message(err.redacted())
                        .at(now),
                );
                return Err(err);
            }
        };

        let ciphertext = self.vault.encrypt(request.blob)?;
        let pin_hash = self.vault.hash_pin(request.pin)?;
        let record = CertificateRecord::new(
            request.user_id,
            request.filename,
            ciphertext,
            pin_hash,
            metadata.clone(),
            now,
        );
        self.store.save(&record)?;

        tracing::info!(
            user = request.user_id,
            serial = %metadata.serial_number,
            valid_until = %metadata.valid_until,
            "certificate uploaded"
        );
        self.audit_event(
            AuditEntry::new(request.user_id, AuditAction::Upload, AuditOutcome::Success)
                .with_target(metadata.serial_number.clone())
                .at(now),
        );
        Ok(metadata)
    }

    pub fn sign(&self, request: SignRequest<'_>) -> Result<SignatureResult, ServiceError> {
        self.sign_at(request, Utc::now())
    }

    /// Sign an XML document with the user's stored certificate.
    ///
    /// The PIN is verified on every call. Nothing is returned on failure.
    pub fn sign_at(
        &self,
        request: SignRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<SignatureResult, ServiceError> {
        let result = self.sign_inner(&request, now);
        let entry = AuditEntry::new(request.user_id, AuditAction::Sign, AuditOutcome::Success)
            .with_target(request.invoice_ref)
            .at(now);
        match &result {
            Ok(signature) => {
                tracing::info!(
                    user = request.user_id,
                    invoice = request.invoice_ref,
                    signature_id = %signature.signature_id,
                    "invoice signed"
                );
                self.audit_event(entry);
            }
            Err(e) => {
                tracing::info!(
                    user = request.user_id,
                    invoice = request.invoice_ref,
                    code = e.code(),
                    "invoice signing failed"
                );
                self.audit_event(AuditEntry {
                    outcome: AuditOutcome::Failed,
                    ..entry.with_message(e.redacted())
                });
            }
        }
        result
    }

    fn sign_inner(
        &self,
        request: &SignRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<SignatureResult, ServiceError> {
        let mut record = self
            .store
            .fetch(request.user_id)?
            .filter(CertificateRecord::is_active)
            .ok_or(SigningError::NoCertificateOnFile)?;
        let ciphertext = record
            .ciphertext()
            .ok_or(SigningError::NoCertificateOnFile)?;

        if !self.vault.verify_pin(request.pin, record.pin_hash()) {
            return Err(SigningError::InvalidPin.into());
        }
        check_validity(&record.metadata, now).map_err(|_| SigningError::CertificateExpired {
            valid_from: record.metadata.valid_from,
            valid_until: record.metadata.valid_until,
        })?;

        let signed = {
            let blob = self.vault.decrypt(ciphertext).map_err(|e| SigningError::SigningFailed {
                stage: SigningStage::KeyExtracted,
                message: e.to_string(),
            })?;
            let signer = InvoiceSigner::from_pkcs12(&blob, request.pin, now)?;
            signer.sign_xml_at(request.xml, now)?
        };

        record.mark_used(now);
        if let Err(e) = self.store.save(&record) {
            tracing::warn!(user = request.user_id, error = %e, "failed to record certificate use");
        }

        Ok(SignatureResult {
            signature_id: Uuid::new_v4(),
            timestamp: now,
            signed_xml: signed.xml,
        })
    }

    pub fn revoke(&self, user_id: &str) -> Result<CertificateMetadata, ServiceError> {
        self.revoke_at(user_id, Utc::now())
    }

    /// Soft-revoke the user's certificate. The ciphertext is discarded.
    pub fn revoke_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CertificateMetadata, ServiceError> {
        let result = self.revoke_inner(user_id);
        let entry = AuditEntry::new(user_id, AuditAction::Revoke, AuditOutcome::Success).at(now);
        match &result {
            Ok(metadata) => {
                tracing::info!(user = user_id, serial = %metadata.serial_number, "certificate revoked");
                self.audit_event(entry.with_target(metadata.serial_number.clone()));
            }
            Err(e) => {
                tracing::info!(user = user_id, code = e.code(), "certificate revocation failed");
                self.audit_event(AuditEntry {
                    outcome: AuditOutcome::Failed,
                    ..entry.with_message(e.redacted())
                });
            }
        }
        result
    }

    fn revoke_inner(&self, user_id: &str) -> Result<CertificateMetadata, ServiceError> {
        let mut record = self
            .store
            .fetch(user_id)?
            .ok_or(SigningError::NoCertificateOnFile)?;
        record.revoke();
        self.store.save(&record)?;
        Ok(record.metadata)
    }

    pub fn expiry_status(&self, user_id: &str) -> Result<Option<ExpiryStatus>, ServiceError> {
        self.expiry_status_at(user_id, Utc::now())
    }

    /// Read the expiry window of the stored certificate, warning when it
    /// falls inside the configured number of days.
    pub fn expiry_status_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExpiryStatus>, ServiceError> {
        let Some(record) = self.store.fetch(user_id)? else {
            return Ok(None);
        };
        let status = record.expiry_status(now);

        if record.is_active() && record.expiring_soon(now, self.expiry_warning_days) {
            tracing::warn!(
                user = user_id,
                days_remaining = status.days_remaining,
                "certificate expires soon"
            );
            self.audit_event(
                AuditEntry::new(user_id, AuditAction::ExpiryWarning, AuditOutcome::Success)
                    .with_target(record.metadata.serial_number.clone())
                    .with_message(format!("{} days remaining", status.days_remaining))
                    .at(now),
            );
        }
        Ok(Some(status))
    }

    fn audit_event(&self, entry: AuditEntry) {
        record_best_effort(&self.audit, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::config::{EncryptionKey, PinHashCost};

    fn service() -> CertificateService<MemoryCertificateStore, MemoryAuditLog> {
        let vault = CertificateVault::new(
            EncryptionKey::from_bytes([7; 32]),
            PinHashCost {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        );
        CertificateService::new(vault, MemoryCertificateStore::new(), MemoryAuditLog::new())
    }

    #[test]
    fn short_pin_is_rejected_and_audited() {
        let service = service();
        let err = service
            .upload(UploadRequest {
                user_id: "u1",
                filename: "cert.p12",
                blob: b"irrelevant",
                pin: "12",
            })
            .expect_err("short pin");
        assert_eq!(err.code(), "INVALID_PIN_FORMAT");

        let entries = service.audit().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::ValidateFailed);
        assert_eq!(entries[0].outcome, AuditOutcome::Failed);
        assert!(service.store().fetch("u1").expect("fetch").is_none());
    }

    #[test]
    fn signing_without_certificate_fails_closed() {
        let service = service();
        let err = service
            .sign(SignRequest {
                user_id: "nobody",
                invoice_ref: "F-1",
                xml: "<TEIF></TEIF>",
                pin: "1234",
            })
            .expect_err("no certificate");
        assert!(matches!(err, ServiceError::Signing(SigningError::NoCertificateOnFile)));

        let entries = service.audit().entries();
        assert_eq!(entries[0].outcome, AuditOutcome::Failed);
        assert_eq!(
            entries[0].message.as_deref(),
            Some("NO_CERTIFICATE: No signing certificate is on file. Upload one first.")
        );
    }

    #[test]
    fn unknown_user_has_no_expiry_status() {
        assert!(service().expiry_status("ghost").expect("status").is_none());
    }
}
