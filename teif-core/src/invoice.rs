//! Invoice domain types and builders.
mod builder;
pub mod qr;
pub mod sign;
pub mod totals;
pub mod validation;
pub mod words;
pub mod xml;
pub use builder::{FinalizedInvoice, InvoiceBuilder, RequiredInvoiceFields};
pub use qr::{QrCodeError, QrPayload};
pub use totals::{ComputedTotals, LineTotals, TaxBucket, compute_totals};
pub use validation::{ComplianceReport, check_compliance, validate_rib};

use chrono::{NaiveDate, NaiveDateTime};
use iso_currency::Currency;
use isocountry::{CountryCode, CountryCodeParseErr};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invoice-related errors.
#[derive(Debug, Error)]
pub enum InvoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Invalid country code: {0}")]
    InvalidCountryCode(#[from] CountryCodeParseErr),
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),
}

/// Structured validation error with field-level issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invoice validation failed")]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }
}

/// Single validation issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: InvoiceField,
    pub kind: ValidationKind,
    pub line_item_index: Option<usize>,
}

impl ValidationIssue {
    pub fn new(field: InvoiceField, kind: ValidationKind) -> Self {
        Self {
            field,
            kind,
            line_item_index: None,
        }
    }

    pub fn on_line(field: InvoiceField, kind: ValidationKind, index: usize) -> Self {
        Self {
            field,
            kind,
            line_item_index: Some(index),
        }
    }
}

#[non_exhaustive]
/// Field associated with a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InvoiceField {
    DocumentNumber,
    DueDate,
    SupplierName,
    SupplierId,
    SupplierCity,
    SupplierPostalCode,
    SupplierEmail,
    BuyerName,
    BuyerId,
    BuyerCity,
    BuyerPostalCode,
    BuyerEmail,
    Lines,
    LineItemCode,
    LineDescription,
    LineQuantity,
    LineUnitPrice,
    LineDiscountRate,
    LineTaxRate,
    LineExemptionReason,
    LineAmount,
    GlobalDiscount,
    StampDuty,
    WithholdingRate,
    Allowance,
    BankRib,
    ServicePeriod,
}

#[non_exhaustive]
/// Classification of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationKind {
    Missing,
    Empty,
    InvalidFormat,
    InvalidChecksum,
    OutOfRange,
    Precision,
    Ordering,
}

/// Tax identifier scheme of a partner.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::IdType;
///
/// assert!(IdType::TaxId.is_business());
/// assert!(!IdType::NationalId.is_business());
/// assert_eq!(IdType::Other.code(), "I-04");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    /// Matricule fiscal.
    #[serde(rename = "I-01")]
    TaxId,
    /// Carte d'identité nationale.
    #[serde(rename = "I-02")]
    NationalId,
    /// Carte de séjour.
    #[serde(rename = "I-03")]
    ResidencePermit,
    #[serde(rename = "I-04")]
    Other,
}

impl IdType {
    pub fn code(&self) -> &'static str {
        match self {
            IdType::TaxId => "I-01",
            IdType::NationalId => "I-02",
            IdType::ResidencePermit => "I-03",
            IdType::Other => "I-04",
        }
    }

    /// Business schemes may carry a trade registry number and a capital reference.
    pub fn is_business(&self) -> bool {
        matches!(self, IdType::TaxId | IdType::Other)
    }
}

/// Postal address of a partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub street: String,
    pub city: String,
    pub postal_code: String,
    #[serde(with = "codes::country", default = "codes::default_country")]
    pub country_code: CountryCode,
}

impl Address {
    /// Tunisian address without street details.
    pub fn new(city: impl Into<String>, postal_code: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            street: String::new(),
            city: city.into(),
            postal_code: postal_code.into(),
            country_code: CountryCode::TUN,
        }
    }

    pub fn with_street(mut self, street: impl Into<String>) -> Self {
        self.street = street.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// # Errors
    /// Returns [`InvoiceError::InvalidCountryCode`] for unknown alpha-2 codes.
    pub fn with_country(mut self, alpha2: &str) -> Result<Self, InvoiceError> {
        self.country_code = CountryCode::for_alpha2(alpha2)?;
        Ok(self)
    }
}

/// Supplier or buyer of an invoice.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::{Address, IdType, Partner};
///
/// let supplier = Partner::new(IdType::TaxId, "1234567A/B/M/000", "Acme SARL", Address::new("Tunis", "1000"))
///     .with_registry("B0123452019")
///     .with_email("billing@acme.tn");
/// assert_eq!(supplier.registry_reference(), Some("B0123452019"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    pub id_type: IdType,
    pub id_value: String,
    pub name: String,
    pub address: Address,
    #[serde(default)]
    pub registry_number: Option<String>,
    #[serde(default)]
    pub capital: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Partner {
    pub fn new(
        id_type: IdType,
        id_value: impl Into<String>,
        name: impl Into<String>,
        address: Address,
    ) -> Self {
        Self {
            id_type,
            id_value: id_value.into(),
            name: name.into(),
            address,
            registry_number: None,
            capital: None,
            phone: None,
            email: None,
        }
    }

    pub fn with_registry(mut self, registry_number: impl Into<String>) -> Self {
        self.registry_number = Some(registry_number.into());
        self
    }

    pub fn with_capital(mut self, capital: impl Into<String>) -> Self {
        self.capital = Some(capital.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Registry number, only for business identifier schemes.
    pub fn registry_reference(&self) -> Option<&str> {
        self.business_only(self.registry_number.as_deref())
    }

    /// Capital reference, only for business identifier schemes.
    pub fn capital_reference(&self) -> Option<&str> {
        self.business_only(self.capital.as_deref())
    }

    fn business_only<'a>(&self, value: Option<&'a str>) -> Option<&'a str> {
        value
            .filter(|_| self.id_type.is_business())
            .filter(|v| !v.trim().is_empty())
    }
}

/// Whether an allowance reduces or a charge increases the net amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceKind {
    Allowance,
    Charge,
}

/// Level an allowance or charge is attached to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceLevel {
    Line,
    #[default]
    Invoice,
}

/// Allowance (discount) or charge entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceCharge {
    pub kind: AllowanceKind,
    /// Coded reason, e.g. `I-151`.
    pub code: String,
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub level: AllowanceLevel,
}

impl AllowanceCharge {
    pub fn allowance(code: impl Into<String>, description: impl Into<String>, amount: Decimal) -> Self {
        Self {
            kind: AllowanceKind::Allowance,
            code: code.into(),
            description: description.into(),
            amount,
            level: AllowanceLevel::Invoice,
        }
    }

    pub fn charge(code: impl Into<String>, description: impl Into<String>, amount: Decimal) -> Self {
        Self {
            kind: AllowanceKind::Charge,
            code: code.into(),
            description: description.into(),
            amount,
            level: AllowanceLevel::Invoice,
        }
    }

    pub fn at_line_level(mut self) -> Self {
        self.level = AllowanceLevel::Line;
        self
    }

    pub fn is_invoice_level(&self) -> bool {
        self.level == AllowanceLevel::Invoice
    }

    /// `I-176` for allowances, `I-174` for charges.
    pub fn amount_type_code(&self) -> &'static str {
        match self.kind {
            AllowanceKind::Allowance => "I-176",
            AllowanceKind::Charge => "I-174",
        }
    }
}

/// Fields for creating an invoice line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineFields {
    pub item_code: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

/// Single invoice line. Rates are fractions (`0.19` for 19 %).
///
/// # Examples
/// ```rust
/// use rust_decimal::Decimal;
/// use teif_core::invoice::{InvoiceLine, LineFields};
///
/// let line = InvoiceLine::new(LineFields {
///     item_code: "SRV-1".into(),
///     description: "Consulting".into(),
///     quantity: Decimal::from(2),
///     unit: "H".into(),
///     unit_price: Decimal::from(150),
///     tax_rate: Decimal::new(19, 2),
/// })
/// .with_discount(Decimal::new(10, 2))
/// .with_fodec();
/// assert!(line.fodec);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub item_code: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_rate: Decimal,
    pub tax_rate: Decimal,
    #[serde(default)]
    pub fodec: bool,
    #[serde(default)]
    pub exemption_reason: Option<String>,
    #[serde(default)]
    pub allowances: Vec<AllowanceCharge>,
}

impl InvoiceLine {
    pub fn new(fields: LineFields) -> Self {
        Self {
            item_code: fields.item_code,
            description: fields.description,
            quantity: fields.quantity,
            unit: fields.unit,
            unit_price: fields.unit_price,
            discount_rate: Decimal::ZERO,
            tax_rate: fields.tax_rate,
            fodec: false,
            exemption_reason: None,
            allowances: Vec::new(),
        }
    }

    pub fn with_discount(mut self, rate: Decimal) -> Self {
        self.discount_rate = rate;
        self
    }

    pub fn with_fodec(mut self) -> Self {
        self.fodec = true;
        self
    }

    pub fn with_exemption(mut self, reason: impl Into<String>) -> Self {
        self.exemption_reason = Some(reason.into());
        self
    }

    pub fn with_allowance(mut self, allowance: AllowanceCharge) -> Self {
        self.allowances.push(allowance.at_line_level());
        self
    }

    pub fn is_zero_rated(&self) -> bool {
        self.tax_rate.is_zero()
    }

    /// Exemption justification, rendered only for zero-rated lines.
    pub fn exemption_reference(&self) -> Option<&str> {
        self.exemption_reason
            .as_deref()
            .filter(|_| self.is_zero_rated())
            .filter(|reason| !reason.trim().is_empty())
    }
}

/// TEIF document type.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::DocumentType;
///
/// assert_eq!(DocumentType::Invoice.code(), "I-11");
/// assert_eq!(DocumentType::CreditNote.label(), "Facture d'avoir");
/// assert!(DocumentType::DeliveryNote.is_receipt());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "I-11")]
    Invoice,
    #[serde(rename = "I-12")]
    CreditNote,
    #[serde(rename = "I-13")]
    FeeNote,
    #[serde(rename = "I-14")]
    PublicContractStatement,
    #[serde(rename = "I-15")]
    ExportInvoice,
    #[serde(rename = "I-16")]
    PurchaseOrder,
    #[serde(rename = "I-30")]
    DeliveryNote,
    #[serde(rename = "I-31")]
    ReceiptNote,
    #[serde(rename = "I-32")]
    ReturnNote,
    #[serde(rename = "I-33")]
    PaymentSlip,
    #[serde(rename = "I-34")]
    PaymentOrder,
    #[serde(rename = "I-50")]
    ExpenseNote,
    #[serde(rename = "I-51")]
    ServiceCertificate,
}

impl DocumentType {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "I-11",
            DocumentType::CreditNote => "I-12",
            DocumentType::FeeNote => "I-13",
            DocumentType::PublicContractStatement => "I-14",
            DocumentType::ExportInvoice => "I-15",
            DocumentType::PurchaseOrder => "I-16",
            DocumentType::DeliveryNote => "I-30",
            DocumentType::ReceiptNote => "I-31",
            DocumentType::ReturnNote => "I-32",
            DocumentType::PaymentSlip => "I-33",
            DocumentType::PaymentOrder => "I-34",
            DocumentType::ExpenseNote => "I-50",
            DocumentType::ServiceCertificate => "I-51",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "Facture",
            DocumentType::CreditNote => "Facture d'avoir",
            DocumentType::FeeNote => "Note d'honoraire",
            DocumentType::PublicContractStatement => "Décompte (marché public)",
            DocumentType::ExportInvoice => "Facture Export",
            DocumentType::PurchaseOrder => "Bon de commande",
            DocumentType::DeliveryNote => "Bon de délivrance",
            DocumentType::ReceiptNote => "Bon de réception",
            DocumentType::ReturnNote => "Bon de retour",
            DocumentType::PaymentSlip => "Bulletin de versement",
            DocumentType::PaymentOrder => "Ordre de paiement",
            DocumentType::ExpenseNote => "Note de frais",
            DocumentType::ServiceCertificate => "Attestation de service",
        }
    }

    /// Delivery and receipt notes, whose entry forms hide due dates and
    /// payment terms. The XML still carries whatever the invoice holds.
    pub fn is_receipt(&self) -> bool {
        matches!(self, DocumentType::DeliveryNote | DocumentType::ReceiptNote)
    }

    /// Service documents carry a service period and require item codes.
    pub fn is_service(&self) -> bool {
        matches!(self, DocumentType::ExpenseNote | DocumentType::ServiceCertificate)
    }

    pub fn carries_stamp_duty(&self) -> bool {
        !matches!(
            self,
            DocumentType::DeliveryNote
                | DocumentType::ReceiptNote
                | DocumentType::ReturnNote
                | DocumentType::PaymentSlip
        )
    }
}

/// Issue date plus the optional date roles of the `Dtm` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDates {
    pub issue: NaiveDate,
    #[serde(default)]
    pub due: Option<NaiveDate>,
    #[serde(default)]
    pub delivery: Option<NaiveDate>,
    #[serde(default)]
    pub dispatch: Option<NaiveDate>,
    #[serde(default)]
    pub payment: Option<NaiveDate>,
    #[serde(default)]
    pub period_start: Option<NaiveDate>,
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
    #[serde(default)]
    pub signature: Option<NaiveDateTime>,
    #[serde(default)]
    pub other: Option<NaiveDate>,
}

impl InvoiceDates {
    pub fn new(issue: NaiveDate) -> Self {
        Self {
            issue,
            due: None,
            delivery: None,
            dispatch: None,
            payment: None,
            period_start: None,
            period_end: None,
            signature: None,
            other: None,
        }
    }

    /// Service period, only when both ends are known.
    pub fn service_period(&self) -> Option<(NaiveDate, NaiveDate)> {
        self.period_start.zip(self.period_end)
    }
}

/// Payment method together with the attributes that apply to it.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::PaymentMeans;
///
/// let means = PaymentMeans::Check { check_number: "0042".into() };
/// assert_eq!(means.code(), "I-117");
/// assert_eq!(means.label(), "Chèque");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentMeans {
    BankTransfer {
        rib: String,
        #[serde(default)]
        account_owner: Option<String>,
        #[serde(default)]
        bank_code: Option<String>,
        #[serde(default)]
        bank_name: Option<String>,
    },
    Postal {
        account_number: String,
        #[serde(default)]
        account_owner: Option<String>,
        #[serde(default)]
        branch_code: Option<String>,
        #[serde(default)]
        service_name: Option<String>,
    },
    Cash,
    Check {
        check_number: String,
    },
    Card {
        reference: String,
        #[serde(default)]
        card_type: Option<String>,
        #[serde(default)]
        last4: Option<String>,
    },
    EPayment {
        transaction_id: String,
        #[serde(default)]
        gateway: Option<String>,
    },
    Other {
        reference: String,
        #[serde(default)]
        description: Option<String>,
    },
    BillOfExchange,
}

impl PaymentMeans {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentMeans::BankTransfer { .. } => "I-114",
            PaymentMeans::Postal { .. } => "I-115",
            PaymentMeans::Cash => "I-116",
            PaymentMeans::Check { .. } => "I-117",
            PaymentMeans::Card { .. } => "I-118",
            PaymentMeans::EPayment { .. } => "I-119",
            PaymentMeans::Other { .. } => "I-120",
            PaymentMeans::BillOfExchange => "I-131",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaymentMeans::BankTransfer { .. } => "Virement bancaire",
            PaymentMeans::Postal { .. } => "Courrier postal",
            PaymentMeans::Cash => "Espèce",
            PaymentMeans::Check { .. } => "Chèque",
            PaymentMeans::Card { .. } => "Carte bancaire",
            PaymentMeans::EPayment { .. } => "Paiement électronique",
            PaymentMeans::Other { .. } => "Autre",
            PaymentMeans::BillOfExchange => "Paiement par effet",
        }
    }

    /// Function code of the institution block, if the method has one.
    pub fn institution_function_code(&self) -> Option<&'static str> {
        match self {
            PaymentMeans::BankTransfer { .. } | PaymentMeans::Postal { .. } => Some("I-141"),
            PaymentMeans::Check { .. } => Some("I-142"),
            PaymentMeans::Card { .. } => Some("I-143"),
            PaymentMeans::EPayment { .. } => Some("I-144"),
            PaymentMeans::Other { .. } => Some("I-145"),
            PaymentMeans::Cash | PaymentMeans::BillOfExchange => None,
        }
    }
}

/// Order, contract and delivery-note references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct References {
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(default)]
    pub delivery_note: Option<String>,
}

impl References {
    /// `(refID, value)` pairs in document order.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("I-81", self.order.as_deref()),
            ("I-82", self.contract.as_deref()),
            ("I-83", self.delivery_note.as_deref()),
        ]
        .into_iter()
        .filter_map(|(code, value)| value.filter(|v| !v.trim().is_empty()).map(|v| (code, v)))
        .collect()
    }
}

/// Raw invoice as entered by the user.
///
/// Instances are assembled by [`InvoiceBuilder`] or deserialized from JSON,
/// and priced by [`compute_totals`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub document_type: DocumentType,
    pub document_number: String,
    pub dates: InvoiceDates,
    #[serde(with = "codes::currency", default = "codes::default_currency")]
    pub currency: Currency,
    pub supplier: Partner,
    pub buyer: Partner,
    #[serde(default)]
    pub lines: Vec<InvoiceLine>,
    #[serde(default)]
    pub global_discount: Decimal,
    #[serde(default)]
    pub stamp_duty: Decimal,
    /// Withholding (IRC) rate as a fraction.
    #[serde(default)]
    pub withholding_rate: Option<Decimal>,
    pub payment: PaymentMeans,
    #[serde(default)]
    pub references: References,
    #[serde(default)]
    pub allowances: Vec<AllowanceCharge>,
    #[serde(default)]
    pub ttn_reference: String,
    #[serde(default)]
    pub qr_enabled: bool,
    #[serde(default)]
    pub amount_in_words: Option<String>,
}

impl Invoice {
    /// Allowances and charges that take part in the invoice totals.
    pub fn invoice_level_allowances(&self) -> impl Iterator<Item = &AllowanceCharge> {
        self.allowances.iter().filter(|a| a.is_invoice_level())
    }
}

mod codes {
    use iso_currency::Currency;
    use isocountry::CountryCode;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn default_country() -> CountryCode {
        CountryCode::TUN
    }

    pub(super) fn default_currency() -> Currency {
        Currency::TND
    }

    pub(super) mod country {
        use super::*;

        pub fn serialize<S: Serializer>(code: &CountryCode, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(code.alpha2())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<CountryCode, D::Error> {
            let raw = String::deserialize(d)?;
            CountryCode::for_alpha2(raw.trim())
                .or_else(|_| CountryCode::for_alpha3(raw.trim()))
                .map_err(|_| D::Error::custom(format!("unknown country code: {raw}")))
        }
    }

    pub(super) mod currency {
        use super::*;

        pub fn serialize<S: Serializer>(currency: &Currency, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(currency.code())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Currency, D::Error> {
            let raw = String::deserialize(d)?;
            Currency::from_code(raw.trim())
                .ok_or_else(|| D::Error::custom(format!("unknown currency code: {raw}")))
        }
    }
}
