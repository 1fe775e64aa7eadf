//! Tunisian TEIF e-invoicing: totals, XML generation, certificate custody and
//! XML signing.
//!
//! # Examples
//! ```rust
//! use teif_core::invoice::{compute_totals, xml::to_xml_with_format, xml::XmlFormat, Invoice};
//!
//! let invoice: Invoice = serde_json::from_str(include_str!("../tests/fixtures/three_rates.json"))?;
//! let totals = compute_totals(&invoice);
//! let xml = to_xml_with_format(&invoice, &totals, XmlFormat::Compact)?;
//! assert!(xml.contains("<TEIF controlingAgency=\"TTN\" version=\"1.8.8\">"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod amount;
pub mod audit;
pub mod config;
pub mod invoice;
pub mod rate_limit;
pub mod service;
pub mod vault;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Invoice(#[from] invoice::InvoiceError),
    #[error(transparent)]
    Xml(#[from] invoice::xml::InvoiceXmlError),
    #[error(transparent)]
    Qr(#[from] invoice::QrCodeError),
    #[error(transparent)]
    Signing(#[from] invoice::sign::SigningError),
    #[error(transparent)]
    Vault(#[from] vault::VaultError),
    #[error(transparent)]
    Service(#[from] service::ServiceError),
    #[error(transparent)]
    Store(#[from] service::StoreError),
    #[error(transparent)]
    Audit(#[from] audit::AuditError),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    RateLimit(#[from] rate_limit::RateLimitError),
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::{
        audit::AuditError,
        config::ConfigError,
        invoice::{
            InvoiceError, InvoiceField, QrCodeError, ValidationError, ValidationIssue,
            ValidationKind,
        },
        rate_limit::RateLimitError,
        service::{ServiceError, StoreError},
        vault::VaultError,
    };
    use crate::invoice::sign::{SigningError, SigningStage};
    use crate::invoice::xml::InvoiceXmlError;
    use quick_xml::se::SeError;
    use std::time::Duration;

    #[test]
    fn error_conversions_cover_variants() {
        let invoice_err = InvoiceError::Validation(ValidationError::new(vec![
            ValidationIssue::new(InvoiceField::DocumentNumber, ValidationKind::Missing),
        ]));
        let err: Error = invoice_err.into();
        assert!(matches!(err, Error::Invoice(_)));

        let xml_err = InvoiceXmlError::Serialize {
            source: SeError::Custom("xml".into()),
        };
        let err: Error = xml_err.into();
        assert!(matches!(err, Error::Xml(_)));

        let err: Error = QrCodeError::SeparatorInField { field: "supplier_name" }.into();
        assert!(matches!(err, Error::Qr(_)));

        let err: Error = SigningError::SigningFailed {
            stage: SigningStage::Signed,
            message: "sign".into(),
        }
        .into();
        assert!(matches!(err, Error::Signing(_)));

        let err: Error = VaultError::DecryptionFailed.into();
        assert!(matches!(err, Error::Vault(_)));

        let err: Error = ServiceError::from(SigningError::InvalidPin).into();
        assert!(matches!(err, Error::Service(_)));

        let err: Error = StoreError::Unavailable("down".into()).into();
        assert!(matches!(err, Error::Store(_)));

        let err: Error = AuditError::Unavailable("down".into()).into();
        assert!(matches!(err, Error::Audit(_)));

        let err: Error = ConfigError::Missing("SIGNATURE_ENCRYPTION_KEY").into();
        assert!(matches!(err, Error::Config(_)));

        let err: Error = RateLimitError::Exceeded {
            retry_after: Duration::from_secs(1),
        }
        .into();
        assert!(matches!(err, Error::RateLimit(_)));
    }
}
