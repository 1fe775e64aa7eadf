use super::{
    AllowanceCharge, DocumentType, Invoice, InvoiceDates, InvoiceError, InvoiceField, InvoiceLine,
    Partner, PaymentMeans, References, ValidationError, ValidationIssue, ValidationKind,
    totals::{ComputedTotals, compute_totals},
};
use chrono::{NaiveDate, NaiveDateTime};
use iso_currency::Currency;
use rust_decimal::Decimal;

/// Invoice paired with its computed totals.
///
/// Construction checks the identity preconditions (document number, supplier
/// and buyer identifiers); everything else is left to
/// [`check_compliance`](super::check_compliance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedInvoice {
    invoice: Invoice,
    totals: ComputedTotals,
}

/// Fields every invoice needs before optional data is added.
#[derive(Debug, Clone)]
pub struct RequiredInvoiceFields {
    pub document_type: DocumentType,
    pub document_number: String,
    pub issue_date: NaiveDate,
    pub supplier: Partner,
    pub buyer: Partner,
    pub lines: Vec<InvoiceLine>,
    pub payment: PaymentMeans,
}

/// Builder for [`FinalizedInvoice`].
///
/// # Examples
/// ```rust
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
/// use teif_core::invoice::{
///     Address, DocumentType, IdType, InvoiceBuilder, InvoiceLine, LineFields, Partner,
///     PaymentMeans, RequiredInvoiceFields,
/// };
///
/// let supplier = Partner::new(IdType::TaxId, "1234567A/B/M/000", "Acme SARL", Address::new("Tunis", "1000"));
/// let buyer = Partner::new(IdType::NationalId, "07654321", "Client", Address::new("Sfax", "3000"));
/// let line = InvoiceLine::new(LineFields {
///     item_code: "A-1".into(),
///     description: "Widget".into(),
///     quantity: Decimal::from(2),
///     unit: "U".into(),
///     unit_price: Decimal::from(100),
///     tax_rate: Decimal::new(19, 2),
/// });
///
/// let invoice = InvoiceBuilder::new(RequiredInvoiceFields {
///     document_type: DocumentType::Invoice,
///     document_number: "F-2024-001".into(),
///     issue_date: NaiveDate::from_ymd_opt(2024, 3, 15).expect("valid date"),
///     supplier,
///     buyer,
///     lines: vec![line],
///     payment: PaymentMeans::Cash,
/// })
/// .stamp_duty(Decimal::ONE)
/// .build()?;
///
/// assert_eq!(invoice.totals().grand_total(), Decimal::new(239_000, 3));
/// # Ok::<(), teif_core::invoice::InvoiceError>(())
/// ```
pub struct InvoiceBuilder {
    invoice: Invoice,
}

impl InvoiceBuilder {
    pub fn new(fields: RequiredInvoiceFields) -> Self {
        Self {
            invoice: Invoice {
                document_type: fields.document_type,
                document_number: fields.document_number,
                dates: InvoiceDates::new(fields.issue_date),
                currency: Currency::TND,
                supplier: fields.supplier,
                buyer: fields.buyer,
                lines: fields.lines,
                global_discount: Decimal::ZERO,
                stamp_duty: Decimal::ZERO,
                withholding_rate: None,
                payment: fields.payment,
                references: References::default(),
                allowances: Vec::new(),
                ttn_reference: String::new(),
                qr_enabled: false,
                amount_in_words: None,
            },
        }
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.invoice.currency = currency;
        self
    }

    pub fn due_date(mut self, date: NaiveDate) -> Self {
        self.invoice.dates.due = Some(date);
        self
    }

    pub fn delivery_date(mut self, date: NaiveDate) -> Self {
        self.invoice.dates.delivery = Some(date);
        self
    }

    pub fn dispatch_date(mut self, date: NaiveDate) -> Self {
        self.invoice.dates.dispatch = Some(date);
        self
    }

    pub fn payment_date(mut self, date: NaiveDate) -> Self {
        self.invoice.dates.payment = Some(date);
        self
    }

    pub fn service_period(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.invoice.dates.period_start = Some(start);
        self.invoice.dates.period_end = Some(end);
        self
    }

    pub fn signature_time(mut self, at: NaiveDateTime) -> Self {
        self.invoice.dates.signature = Some(at);
        self
    }

    pub fn other_date(mut self, date: NaiveDate) -> Self {
        self.invoice.dates.other = Some(date);
        self
    }

    pub fn global_discount(mut self, amount: Decimal) -> Self {
        self.invoice.global_discount = amount;
        self
    }

    pub fn stamp_duty(mut self, amount: Decimal) -> Self {
        self.invoice.stamp_duty = amount;
        self
    }

    /// Withholding rate as a fraction (`0.015` for 1.5 %).
    pub fn withholding_rate(mut self, rate: Decimal) -> Self {
        self.invoice.withholding_rate = Some(rate);
        self
    }

    pub fn references(mut self, references: References) -> Self {
        self.invoice.references = references;
        self
    }

    pub fn allowance(mut self, allowance: AllowanceCharge) -> Self {
        self.invoice.allowances.push(allowance);
        self
    }

    pub fn ttn_reference(mut self, reference: impl Into<String>) -> Self {
        self.invoice.ttn_reference = reference.into();
        self
    }

    pub fn enable_qr(mut self) -> Self {
        self.invoice.qr_enabled = true;
        self
    }

    pub fn amount_in_words(mut self, words: impl Into<String>) -> Self {
        self.invoice.amount_in_words = Some(words.into());
        self
    }

    pub fn build(self) -> Result<FinalizedInvoice, InvoiceError> {
        FinalizedInvoice::new(self.invoice)
    }
}

impl FinalizedInvoice {
    /// Check identity preconditions and compute totals.
    pub fn new(invoice: Invoice) -> Result<Self, InvoiceError> {
        let required = [
            (InvoiceField::DocumentNumber, &invoice.document_number),
            (InvoiceField::SupplierId, &invoice.supplier.id_value),
            (InvoiceField::BuyerId, &invoice.buyer.id_value),
        ];
        let issues: Vec<ValidationIssue> = required
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| ValidationIssue::new(field, ValidationKind::Empty))
            .collect();
        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }

        let totals = compute_totals(&invoice);
        Ok(Self { invoice, totals })
    }

    pub fn invoice(&self) -> &Invoice {
        &self.invoice
    }

    pub fn totals(&self) -> &ComputedTotals {
        &self.totals
    }

    pub fn into_parts(self) -> (Invoice, ComputedTotals) {
        (self.invoice, self.totals)
    }
}
