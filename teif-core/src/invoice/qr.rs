use super::{Invoice, totals::ComputedTotals};
use crate::amount::format_amount;
use base64ct::{Base64, Encoding};
use thiserror::Error;

const SEPARATOR: char = '|';
const MISSING: &str = "N/A";

#[derive(Debug, Error)]
pub enum QrCodeError {
    #[error("QR field {field} contains the '|' separator")]
    SeparatorInField { field: &'static str },
}

pub type QrResult<T> = std::result::Result<T, QrCodeError>;

/// Pipe-separated verification payload carried in `ReferenceCEV`.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::QrPayload;
///
/// let payload = QrPayload::new(
///     "1234567A", "F-1", "150324", "Acme", "07654321", "119.000", "19.000", "TTN-1",
/// );
/// assert_eq!(
///     payload.to_payload_string()?,
///     "1234567A|F-1|150324|Acme|07654321|119.000|19.000|TTN-1"
/// );
/// # Ok::<(), teif_core::invoice::QrCodeError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    supplier_id: String,
    document_number: String,
    issue_date: String,
    supplier_name: String,
    buyer_id: String,
    grand_total: String,
    total_tax: String,
    ttn_reference: String,
}

impl QrPayload {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        supplier_id: impl Into<String>,
        document_number: impl Into<String>,
        issue_date: impl Into<String>,
        supplier_name: impl Into<String>,
        buyer_id: impl Into<String>,
        grand_total: impl Into<String>,
        total_tax: impl Into<String>,
        ttn_reference: impl Into<String>,
    ) -> Self {
        Self {
            supplier_id: supplier_id.into(),
            document_number: document_number.into(),
            issue_date: issue_date.into(),
            supplier_name: supplier_name.into(),
            buyer_id: buyer_id.into(),
            grand_total: grand_total.into(),
            total_tax: total_tax.into(),
            ttn_reference: ttn_reference.into(),
        }
    }

    /// Blank identity fields read `N/A`; a missing TTN reference falls back
    /// to `TTN-{document number}`.
    pub fn from_invoice(invoice: &Invoice, totals: &ComputedTotals) -> Self {
        let document_number = invoice.document_number.trim();
        let ttn_reference = match invoice.ttn_reference.trim() {
            "" => format!("TTN-{document_number}"),
            reference => reference.to_owned(),
        };
        Self::new(
            or_missing(&invoice.supplier.id_value),
            or_missing(document_number),
            invoice.dates.issue.format("%d%m%y").to_string(),
            or_missing(&invoice.supplier.name),
            or_missing(&invoice.buyer.id_value),
            format_amount(totals.grand_total()),
            format_amount(totals.total_tax()),
            ttn_reference,
        )
    }

    pub fn to_payload_string(&self) -> QrResult<String> {
        let fields = [
            ("supplier_id", &self.supplier_id),
            ("document_number", &self.document_number),
            ("issue_date", &self.issue_date),
            ("supplier_name", &self.supplier_name),
            ("buyer_id", &self.buyer_id),
            ("grand_total", &self.grand_total),
            ("total_tax", &self.total_tax),
            ("ttn_reference", &self.ttn_reference),
        ];
        if let Some((field, _)) = fields.iter().find(|(_, v)| v.contains(SEPARATOR)) {
            return Err(QrCodeError::SeparatorInField { field: *field });
        }
        Ok(fields
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join("|"))
    }

    /// Base64 of the payload string.
    pub fn encode(&self) -> QrResult<String> {
        Ok(Base64::encode_string(self.to_payload_string()?.as_bytes()))
    }
}

fn or_missing(field: &str) -> &str {
    match field.trim() {
        "" => MISSING,
        trimmed => trimmed,
    }
}
