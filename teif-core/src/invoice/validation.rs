//! Field-level compliance checks.
//!
//! These never run as part of pricing or serialization; callers decide when
//! to block on [`ComplianceReport::errors`].
use super::{
    DocumentType, Invoice, InvoiceField, Partner, PaymentMeans, ValidationError, ValidationIssue,
    ValidationKind,
};
use crate::amount::{DISPLAY_SCALE, exceeds_scale};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Blocking errors and advisory warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ComplianceReport {
    pub fn is_compliant(&self) -> bool {
        self.errors.is_empty()
    }

    /// Errors as a [`ValidationError`], or `Ok` when there are none.
    pub fn into_result(self) -> Result<Vec<ValidationIssue>, ValidationError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ValidationError::new(self.errors))
        }
    }

    fn error(&mut self, field: InvoiceField, kind: ValidationKind) {
        self.errors.push(ValidationIssue::new(field, kind));
    }

    fn line_error(&mut self, field: InvoiceField, kind: ValidationKind, index: usize) {
        self.errors.push(ValidationIssue::on_line(field, kind, index));
    }
}

/// Run every compliance rule against an invoice.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::{check_compliance, Invoice, InvoiceField};
///
/// let mut invoice: Invoice = serde_json::from_str(include_str!("../../tests/fixtures/three_rates.json"))?;
/// assert!(check_compliance(&invoice).is_compliant());
///
/// invoice.supplier.name.clear();
/// let report = check_compliance(&invoice);
/// assert_eq!(report.errors[0].field, InvoiceField::SupplierName);
/// # Ok::<(), serde_json::Error>(())
/// ```
pub fn check_compliance(invoice: &Invoice) -> ComplianceReport {
    let mut report = ComplianceReport::default();

    if invoice.document_number.trim().is_empty() {
        report.error(InvoiceField::DocumentNumber, ValidationKind::Missing);
    }
    check_partner(&mut report, &invoice.supplier, PartnerFields::SUPPLIER);
    check_partner(&mut report, &invoice.buyer, PartnerFields::BUYER);

    if let Some(due) = invoice.dates.due {
        if due < invoice.dates.issue {
            report
                .warnings
                .push(ValidationIssue::new(InvoiceField::DueDate, ValidationKind::Ordering));
        }
    }
    if let (Some(start), Some(end)) = (invoice.dates.period_start, invoice.dates.period_end) {
        if end < start {
            report.error(InvoiceField::ServicePeriod, ValidationKind::Ordering);
        }
    }

    check_lines(&mut report, invoice);

    if invoice.global_discount < Decimal::ZERO {
        report.error(InvoiceField::GlobalDiscount, ValidationKind::OutOfRange);
    }
    if invoice.stamp_duty < Decimal::ZERO {
        report.error(InvoiceField::StampDuty, ValidationKind::OutOfRange);
    } else if invoice.stamp_duty > Decimal::ZERO && !invoice.document_type.carries_stamp_duty() {
        report
            .warnings
            .push(ValidationIssue::new(InvoiceField::StampDuty, ValidationKind::OutOfRange));
    }
    if let Some(rate) = invoice.withholding_rate {
        if !is_fraction(rate) {
            report.error(InvoiceField::WithholdingRate, ValidationKind::OutOfRange);
        }
    }
    if invoice.allowances.iter().any(|a| a.amount < Decimal::ZERO) {
        report.error(InvoiceField::Allowance, ValidationKind::OutOfRange);
    }

    if let PaymentMeans::BankTransfer { rib, .. } = &invoice.payment {
        if !validate_rib(rib) {
            report.error(InvoiceField::BankRib, ValidationKind::InvalidChecksum);
        }
    }

    tracing::debug!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "compliance check finished"
    );
    report
}

struct PartnerFields {
    name: InvoiceField,
    id: InvoiceField,
    city: InvoiceField,
    postal_code: InvoiceField,
    email: InvoiceField,
}

impl PartnerFields {
    const SUPPLIER: Self = Self {
        name: InvoiceField::SupplierName,
        id: InvoiceField::SupplierId,
        city: InvoiceField::SupplierCity,
        postal_code: InvoiceField::SupplierPostalCode,
        email: InvoiceField::SupplierEmail,
    };
    const BUYER: Self = Self {
        name: InvoiceField::BuyerName,
        id: InvoiceField::BuyerId,
        city: InvoiceField::BuyerCity,
        postal_code: InvoiceField::BuyerPostalCode,
        email: InvoiceField::BuyerEmail,
    };
}

fn check_partner(report: &mut ComplianceReport, partner: &Partner, fields: PartnerFields) {
    let required = [
        (fields.name, &partner.name),
        (fields.id, &partner.id_value),
        (fields.city, &partner.address.city),
        (fields.postal_code, &partner.address.postal_code),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            report.error(field, ValidationKind::Missing);
        }
    }
    if let Some(email) = partner.email.as_deref().filter(|e| !e.trim().is_empty()) {
        if !EMAIL.is_match(email.trim()) {
            report.error(fields.email, ValidationKind::InvalidFormat);
        }
    }
}

fn check_lines(report: &mut ComplianceReport, invoice: &Invoice) {
    if invoice.lines.is_empty() {
        report.error(InvoiceField::Lines, ValidationKind::Empty);
        return;
    }
    let needs_item_code = invoice.document_type.is_service();

    for (index, line) in invoice.lines.iter().enumerate() {
        if line.description.trim().is_empty() {
            report.line_error(InvoiceField::LineDescription, ValidationKind::Missing, index);
        }
        if needs_item_code && line.item_code.trim().is_empty() {
            report.line_error(InvoiceField::LineItemCode, ValidationKind::Missing, index);
        }
        if line.quantity <= Decimal::ZERO {
            report.line_error(InvoiceField::LineQuantity, ValidationKind::OutOfRange, index);
        }
        if line.unit_price <= Decimal::ZERO {
            report.line_error(InvoiceField::LineUnitPrice, ValidationKind::OutOfRange, index);
        }
        if !is_fraction(line.discount_rate) {
            report.line_error(InvoiceField::LineDiscountRate, ValidationKind::OutOfRange, index);
        }
        if !is_fraction(line.tax_rate) {
            report.line_error(InvoiceField::LineTaxRate, ValidationKind::OutOfRange, index);
        } else if line.is_zero_rated() && line.exemption_reference().is_none() {
            report.line_error(InvoiceField::LineExemptionReason, ValidationKind::Missing, index);
        }
        if line.allowances.iter().any(|a| a.amount < Decimal::ZERO) {
            report.line_error(InvoiceField::Allowance, ValidationKind::OutOfRange, index);
        }
        if exceeds_scale(line.quantity * line.unit_price, DISPLAY_SCALE) {
            report.warnings.push(ValidationIssue::on_line(
                InvoiceField::LineAmount,
                ValidationKind::Precision,
                index,
            ));
        }
    }

    if invoice.document_type == DocumentType::CreditNote && invoice.references.entries().is_empty() {
        report.warnings.push(ValidationIssue::new(
            InvoiceField::DocumentNumber,
            ValidationKind::Missing,
        ));
    }
}

fn is_fraction(rate: Decimal) -> bool {
    rate >= Decimal::ZERO && rate <= Decimal::ONE
}

/// Check a 20-digit Tunisian RIB against its two-digit key.
///
/// The key is `98 - (digits[2..] ‖ digits[..2]) mod 97`, zero-padded.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::validate_rib;
///
/// assert!(validate_rib("49000000000000000000"));
/// assert!(!validate_rib("48000000000000000000"));
/// assert!(!validate_rib("4900000000000000000"));
/// ```
pub fn validate_rib(rib: &str) -> bool {
    let rib = rib.trim();
    if rib.len() != 20 || !rib.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let rotated = rib[2..].bytes().chain(rib[..2].bytes());
    let remainder = rotated.fold(0u32, |acc, digit| (acc * 10 + u32::from(digit - b'0')) % 97);
    let expected = format!("{:02}", 98 - remainder);
    rib[..2] == expected
}
