mod common;

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use teif_core::audit::{AuditAction, AuditOutcome, MemoryAuditLog};
use teif_core::invoice::compute_totals;
use teif_core::invoice::sign::SigningError;
use teif_core::invoice::xml::{XmlFormat, to_xml_with_format};
use teif_core::service::{
    CertificateService, CertificateStore, MemoryCertificateStore, ServiceError, SignRequest,
    StoreError, UploadRequest,
};
use teif_core::vault::{CertificateRecord, CertificateStatus, VaultError};

type Service = CertificateService<MemoryCertificateStore, Arc<MemoryAuditLog>>;

fn service() -> (Service, Arc<MemoryAuditLog>) {
    let audit = Arc::new(MemoryAuditLog::new());
    let service = CertificateService::new(
        common::test_vault(),
        MemoryCertificateStore::new(),
        Arc::clone(&audit),
    );
    (service, audit)
}

fn upload(service: &Service, blob: &[u8]) -> Result<teif_core::vault::CertificateMetadata, ServiceError> {
    service.upload_at(
        UploadRequest {
            user_id: "user-7",
            filename: "medina.p12",
            blob,
            pin: common::PIN,
        },
        common::now(),
    )
}

fn unsigned_xml() -> String {
    let invoice = common::sample_invoice();
    to_xml_with_format(&invoice, &compute_totals(&invoice), XmlFormat::Compact).expect("xml")
}

fn sign(service: &Service, pin: &str) -> Result<teif_core::service::SignatureResult, ServiceError> {
    let xml = unsigned_xml();
    service.sign_at(
        SignRequest {
            user_id: "user-7",
            invoice_ref: "F-2024-0042",
            xml: &xml,
            pin,
        },
        common::now(),
    )
}

#[test]
fn upload_then_sign() {
    let (service, audit) = service();
    let metadata = upload(&service, &common::valid_pkcs12()).expect("upload");
    assert_eq!(metadata.serial_number, "c0ffee");

    let record = service
        .store()
        .fetch("user-7")
        .expect("fetch")
        .expect("record");
    assert_eq!(record.status, CertificateStatus::Verified);
    assert!(record.pin_hash().starts_with("$argon2id$"));
    assert!(record.last_used_at.is_none());

    let result = sign(&service, common::PIN).expect("sign");
    assert_eq!(result.timestamp, common::now());
    assert_eq!(result.signed_xml.matches("<ds:SignatureValue>").count(), 1);

    let record = service.store().fetch("user-7").expect("fetch").expect("record");
    assert_eq!(record.last_used_at, Some(common::now()));

    let actions: Vec<(AuditAction, AuditOutcome)> =
        audit.entries().iter().map(|e| (e.action, e.outcome)).collect();
    assert_eq!(
        actions,
        vec![
            (AuditAction::Upload, AuditOutcome::Success),
            (AuditAction::Sign, AuditOutcome::Success),
        ]
    );
}

#[test]
fn wrong_pin_fails_without_output() {
    let (service, audit) = service();
    upload(&service, &common::valid_pkcs12()).expect("upload");

    let err = sign(&service, "1357").expect_err("wrong pin");
    assert!(matches!(err, ServiceError::Signing(SigningError::InvalidPin)));
    assert_eq!(err.code(), "INVALID_PIN");

    let last = audit.entries().pop().expect("audit entry");
    assert_eq!(last.action, AuditAction::Sign);
    assert_eq!(last.outcome, AuditOutcome::Failed);
    assert_eq!(last.target.as_deref(), Some("F-2024-0042"));
    assert!(!last.message.unwrap_or_default().contains("1357"));
}

#[test]
fn expired_uploads_are_rejected() {
    let (service, audit) = service();
    let err = upload(&service, &common::expired_pkcs12()).expect_err("expired");
    assert!(matches!(err, ServiceError::Vault(VaultError::Expired { .. })));
    assert!(service.store().fetch("user-7").expect("fetch").is_none());
    assert_eq!(audit.entries()[0].action, AuditAction::ValidateFailed);
}

#[test]
fn stored_certificate_past_expiry_cannot_sign() {
    let (service, _audit) = service();
    upload(&service, &common::valid_pkcs12()).expect("upload");

    let xml = unsigned_xml();
    let err = service
        .sign_at(
            SignRequest {
                user_id: "user-7",
                invoice_ref: "F-2026-0001",
                xml: &xml,
                pin: common::PIN,
            },
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
        )
        .expect_err("expired");
    assert!(matches!(
        err,
        ServiceError::Signing(SigningError::CertificateExpired { .. })
    ));
}

#[test]
fn revoked_certificates_cannot_sign() {
    let (service, audit) = service();
    upload(&service, &common::valid_pkcs12()).expect("upload");

    let metadata = service.revoke("user-7").expect("revoke");
    assert_eq!(metadata.serial_number, "c0ffee");

    let record = service.store().fetch("user-7").expect("fetch").expect("record");
    assert_eq!(record.status, CertificateStatus::Revoked);
    assert!(record.ciphertext().is_none());

    let err = sign(&service, common::PIN).expect_err("revoked");
    assert!(matches!(err, ServiceError::Signing(SigningError::NoCertificateOnFile)));
    assert!(audit
        .entries()
        .iter()
        .any(|e| e.action == AuditAction::Revoke && e.outcome == AuditOutcome::Success));
}

#[test]
fn revocation_is_audited_at_the_given_time() {
    let (service, audit) = service();
    upload(&service, &common::valid_pkcs12()).expect("upload");

    let at = common::now() + Duration::days(3);
    service.revoke_at("user-7", at).expect("revoke");
    let last = audit.entries().pop().expect("audit entry");
    assert_eq!(last.action, AuditAction::Revoke);
    assert_eq!(last.outcome, AuditOutcome::Success);
    assert_eq!(last.target.as_deref(), Some("c0ffee"));
    assert_eq!(last.at, at);
}

#[test]
fn failed_revocation_is_audited() {
    let (service, audit) = service();
    let err = service
        .revoke_at("user-7", common::now())
        .expect_err("nothing on file");
    assert!(matches!(err, ServiceError::Signing(SigningError::NoCertificateOnFile)));

    let last = audit.entries().pop().expect("audit entry");
    assert_eq!(last.action, AuditAction::Revoke);
    assert_eq!(last.outcome, AuditOutcome::Failed);
    assert_eq!(last.at, common::now());
    assert!(last.message.is_some());
}

struct UnavailableStore;

impl CertificateStore for UnavailableStore {
    fn fetch(&self, _user_id: &str) -> Result<Option<CertificateRecord>, StoreError> {
        Err(StoreError::Unavailable("disk detached".into()))
    }

    fn save(&self, _record: &CertificateRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk detached".into()))
    }
}

#[test]
fn revocation_store_errors_are_audited() {
    let audit = Arc::new(MemoryAuditLog::new());
    let service = CertificateService::new(common::test_vault(), UnavailableStore, Arc::clone(&audit));

    let err = service
        .revoke_at("user-7", common::now())
        .expect_err("store down");
    assert_eq!(err.code(), "STORAGE_ERROR");

    let last = audit.entries().pop().expect("audit entry");
    assert_eq!(last.outcome, AuditOutcome::Failed);
    assert!(!last.message.unwrap_or_default().contains("disk detached"));
}

#[test]
fn expiry_warning_is_audited_inside_the_window() {
    let (service, audit) = service();
    upload(&service, &common::valid_pkcs12()).expect("upload");

    let far = service
        .expiry_status_at("user-7", common::now())
        .expect("status")
        .expect("record");
    assert!(!far.expired);
    assert!(!audit.entries().iter().any(|e| e.action == AuditAction::ExpiryWarning));

    let valid_until = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let close = service
        .expiry_status_at("user-7", valid_until - Duration::days(10))
        .expect("status")
        .expect("record");
    assert_eq!(close.days_remaining, 10);
    assert!(audit.entries().iter().any(|e| e.action == AuditAction::ExpiryWarning));
}
