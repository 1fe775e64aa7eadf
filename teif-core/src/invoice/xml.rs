//! XML serialization for TEIF documents.
use super::{
    AllowanceCharge, FinalizedInvoice, Invoice, InvoiceLine, Partner, PaymentMeans,
    qr::{QrCodeError, QrPayload},
    totals::{ComputedTotals, TaxBucket},
    words::amount_in_words,
};
use crate::amount::{format_amount, format_quantity, format_rate_percent};

use constants::{
    CONTROLLING_AGENCY, COUNTRY_CODE_LIST, CURRENCY_CODE_LIST, DATE_FORMAT, DATETIME_FORMAT, DS_NS,
    LANG, PERIOD_FORMAT, SIGNATURE_ID, TEIF_VERSION, XML_DECLARATION,
};
use helpers::{Wrap, tagged};
use lazy_static::lazy_static;
use quick_xml::se::{QuoteLevel, SeError, Serializer as QuickXmlSerializer};
use regex::Regex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::borrow::Cow;
use thiserror::Error;

pub(crate) mod constants;

lazy_static! {
    static ref INTER_TAG_WHITESPACE: Regex = Regex::new(r">\s+<").unwrap();
}

/// XML serialization error.
#[derive(Debug, Error)]
pub enum InvoiceXmlError {
    #[error("failed to serialize invoice to XML: {source}")]
    Serialize {
        #[from]
        source: SeError,
    },
    #[error("failed to build QR payload: {0}")]
    Qr(#[from] QrCodeError),
}

/// XML formatting options.
#[derive(Debug, Clone, Copy, Default)]
pub enum XmlFormat {
    /// No whitespace between tags.
    #[default]
    Compact,
    Pretty {
        indent_char: char,
        indent_size: usize,
    },
}

/// Escape `& < > " '` once.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::xml::escape_text;
///
/// assert_eq!(
///     escape_text(r#"C&B <test> "q" 'a'"#),
///     "C&amp;B &lt;test&gt; &quot;q&quot; &apos;a&apos;"
/// );
/// ```
pub fn escape_text(raw: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(raw)
}

/// Drop whitespace between tags and around the document.
pub fn minify(xml: &str) -> String {
    INTER_TAG_WHITESPACE.replace_all(xml.trim(), "><").into_owned()
}

pub(crate) mod helpers {
    use serde::ser::{Serialize, SerializeStruct, Serializer};

    /// Element with attributes and a text body.
    pub(crate) struct Tagged<'a, const N: usize> {
        attrs: [(&'static str, &'a str); N],
        text: &'a str,
    }

    pub(crate) fn tagged<'a, const N: usize>(
        attrs: [(&'static str, &'a str); N],
        text: &'a str,
    ) -> Tagged<'a, N> {
        Tagged { attrs, text }
    }

    impl<const N: usize> Serialize for Tagged<'_, N> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct("Tagged", N + 1)?;
            for (name, value) in self.attrs {
                st.serialize_field(name, value)?;
            }
            st.serialize_field("$text", self.text)?;
            st.end()
        }
    }

    /// Container holding a single child element.
    pub(crate) struct Wrap<'a, T: ?Sized>(pub &'static str, pub &'a T);

    impl<T: Serialize + ?Sized> Serialize for Wrap<'_, T> {
        fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut st = s.serialize_struct(self.0, 1)?;
            st.serialize_field(self.0, self.1)?;
            st.end()
        }
    }
}

/// Serializable view of an invoice with its totals.
///
/// The amount-in-words text and the QR payload are resolved up front so that
/// serialization itself cannot fail on domain data.
pub struct InvoiceXml<'a> {
    invoice: &'a Invoice,
    totals: &'a ComputedTotals,
    amount_words: String,
    qr: Option<String>,
}

impl<'a> InvoiceXml<'a> {
    pub fn new(invoice: &'a Invoice, totals: &'a ComputedTotals) -> Result<Self, InvoiceXmlError> {
        let amount_words = invoice
            .amount_in_words
            .clone()
            .filter(|words| !words.trim().is_empty())
            .unwrap_or_else(|| amount_in_words(totals.grand_total()));
        let qr = if invoice.qr_enabled && totals.grand_total() > Decimal::ZERO {
            Some(QrPayload::from_invoice(invoice, totals).encode()?)
        } else {
            None
        };
        Ok(Self {
            invoice,
            totals,
            amount_words,
            qr,
        })
    }

    fn currency(&self) -> &'static str {
        self.invoice.currency.code()
    }
}

/// Serialize invoices to XML.
///
/// # Examples
/// ```rust
/// use teif_core::invoice::{FinalizedInvoice, Invoice};
/// use teif_core::invoice::xml::ToXml;
///
/// let invoice: Invoice = serde_json::from_str(include_str!("../../tests/fixtures/three_rates.json"))?;
/// let xml = FinalizedInvoice::new(invoice)?.to_xml()?;
/// assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
/// assert!(xml.contains(r#"<TEIF controlingAgency="TTN" version="1.8.8">"#));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub trait ToXml {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError>;

    fn to_xml(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_pretty()
    }

    fn to_xml_pretty(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
    }

    fn to_xml_minified(&self) -> Result<String, InvoiceXmlError> {
        self.to_xml_with_format(XmlFormat::Compact)
    }
}

impl ToXml for FinalizedInvoice {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError> {
        to_xml_with_format(self.invoice(), self.totals(), format)
    }
}

impl ToXml for InvoiceXml<'_> {
    fn to_xml_with_format(&self, format: XmlFormat) -> Result<String, InvoiceXmlError> {
        write_document(self, format)
    }
}

pub fn to_xml_with_format(
    invoice: &Invoice,
    totals: &ComputedTotals,
    format: XmlFormat,
) -> Result<String, InvoiceXmlError> {
    write_document(&InvoiceXml::new(invoice, totals)?, format)
}

fn write_document(view: &InvoiceXml<'_>, format: XmlFormat) -> Result<String, InvoiceXmlError> {
    let mut buffer = String::with_capacity(8192);
    buffer.push_str(XML_DECLARATION);
    if matches!(format, XmlFormat::Pretty { .. }) {
        buffer.push('\n');
    }

    {
        let mut serializer = QuickXmlSerializer::new(&mut buffer);
        serializer.set_quote_level(QuoteLevel::Full);
        if let XmlFormat::Pretty {
            indent_char,
            indent_size,
        } = format
        {
            serializer.indent(indent_char, indent_size);
        }
        view.serialize(serializer)?;
    }

    tracing::debug!(
        document = %view.invoice.document_number,
        bytes = buffer.len(),
        "rendered TEIF document"
    );
    Ok(buffer)
}

impl Serialize for InvoiceXml<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut root = serializer.serialize_struct("TEIF", 0)?;
        root.serialize_field("@controlingAgency", CONTROLLING_AGENCY)?;
        root.serialize_field("@version", TEIF_VERSION)?;
        root.serialize_field("InvoiceHeader", &HeaderXml(self.invoice))?;
        root.serialize_field("InvoiceBody", &BodyXml(self))?;
        root.serialize_field("RefTtnVal", &RefTtnValXml(self))?;
        root.serialize_field("ds:Signature", &SignaturePlaceholderXml)?;
        root.end()
    }
}

struct HeaderXml<'a>(&'a Invoice);

impl Serialize for HeaderXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let invoice = self.0;
        let mut st = s.serialize_struct("InvoiceHeader", 0)?;
        st.serialize_field(
            "MessageSenderIdentifier",
            &tagged(
                [("@type", invoice.supplier.id_type.code())],
                &invoice.supplier.id_value,
            ),
        )?;
        st.serialize_field(
            "MessageRecieverIdentifier",
            &tagged(
                [("@type", invoice.buyer.id_type.code())],
                &invoice.buyer.id_value,
            ),
        )?;
        st.end()
    }
}

struct BodyXml<'a>(&'a InvoiceXml<'a>);

impl Serialize for BodyXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let view = self.0;
        let invoice = view.invoice;
        let mut st = s.serialize_struct("InvoiceBody", 0)?;

        // ---- document ----
        st.serialize_field("Bgm", &BgmXml(invoice))?;
        st.serialize_field("Dtm", &DtmXml(invoice))?;

        // ---- partners ----
        st.serialize_field("PartnerSection", &PartnerSectionXml(invoice))?;

        // ---- payment ----
        st.serialize_field(
            "PytSection",
            &Wrap("PytSectionDetails", &PytSectionDetailsXml(&invoice.payment)),
        )?;

        // ---- references ----
        let references = invoice.references.entries();
        if !references.is_empty() {
            st.serialize_field("RffSection", &ReferencesXml(&references))?;
        }

        // ---- lines ----
        st.serialize_field("LinSection", &LinSectionXml(view))?;

        // ---- invoice level ----
        let allowances: Vec<&AllowanceCharge> = invoice.invoice_level_allowances().collect();
        if view.totals.global_discount() > Decimal::ZERO || !allowances.is_empty() {
            st.serialize_field(
                "InvoiceAlc",
                &InvoiceAlcXml {
                    discount: view.totals.global_discount(),
                    allowances: &allowances,
                    currency: view.currency(),
                },
            )?;
        }
        st.serialize_field("InvoiceMoa", &InvoiceMoaXml(view))?;
        st.serialize_field("InvoiceTax", &InvoiceTaxXml(view))?;
        st.end()
    }
}

struct BgmXml<'a>(&'a Invoice);

impl Serialize for BgmXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let invoice = self.0;
        let mut st = s.serialize_struct("Bgm", 0)?;
        st.serialize_field("DocumentIdentifier", &invoice.document_number)?;
        st.serialize_field(
            "DocumentType",
            &tagged(
                [("@code", invoice.document_type.code())],
                invoice.document_type.label(),
            ),
        )?;
        st.end()
    }
}

fn ttn_date(date: chrono::NaiveDate) -> String {
    date.format("%d%m%y").to_string()
}

struct DtmXml<'a>(&'a Invoice);

impl Serialize for DtmXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let invoice = self.0;
        let dates = &invoice.dates;
        let mut st = s.serialize_struct("Dtm", 0)?;

        let single = [
            ("I-31", Some(dates.issue)),
            ("I-32", dates.due),
            ("I-33", dates.delivery),
            ("I-34", dates.dispatch),
            ("I-35", dates.payment),
        ];
        for (code, date) in single {
            if let Some(date) = date {
                st.serialize_field(
                    "DateText",
                    &tagged(
                        [("@format", DATE_FORMAT), ("@functionCode", code)],
                        &ttn_date(date),
                    ),
                )?;
            }
        }
        if let Some((start, end)) = dates.service_period() {
            st.serialize_field(
                "DateText",
                &tagged(
                    [("@format", PERIOD_FORMAT), ("@functionCode", "I-36")],
                    &format!("{}-{}", ttn_date(start), ttn_date(end)),
                ),
            )?;
        }
        if let Some(at) = dates.signature {
            st.serialize_field(
                "DateText",
                &tagged(
                    [("@format", DATETIME_FORMAT), ("@functionCode", "I-37")],
                    &at.format("%d%m%y%H%M").to_string(),
                ),
            )?;
        }
        if let Some(other) = dates.other {
            st.serialize_field(
                "DateText",
                &tagged(
                    [("@format", DATE_FORMAT), ("@functionCode", "I-38")],
                    &ttn_date(other),
                ),
            )?;
        }
        st.end()
    }
}

struct PartnerSectionXml<'a>(&'a Invoice);

impl Serialize for PartnerSectionXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("PartnerSection", 0)?;
        st.serialize_field("PartnerDetails", &PartnerDetailsXml("I-62", &self.0.supplier))?;
        st.serialize_field("PartnerDetails", &PartnerDetailsXml("I-64", &self.0.buyer))?;
        st.end()
    }
}

struct PartnerDetailsXml<'a>(&'static str, &'a Partner);

impl Serialize for PartnerDetailsXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let partner = self.1;
        let mut st = s.serialize_struct("PartnerDetails", 0)?;
        st.serialize_field("@functionCode", self.0)?;
        st.serialize_field("Nad", &NadXml(partner))?;
        if let Some(rc) = partner.registry_reference() {
            st.serialize_field(
                "RffSection",
                &Wrap("Reference", &tagged([("@refID", "I-815")], rc)),
            )?;
        }
        if let Some(capital) = partner.capital_reference() {
            st.serialize_field(
                "RffSection",
                &Wrap("Reference", &tagged([("@refID", "I-816")], capital)),
            )?;
        }
        st.serialize_field("CtaSection", &CtaSectionXml(partner))?;
        st.end()
    }
}

struct NadXml<'a>(&'a Partner);

impl Serialize for NadXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let partner = self.0;
        let mut st = s.serialize_struct("Nad", 0)?;
        st.serialize_field(
            "PartnerIdentifier",
            &tagged([("@type", partner.id_type.code())], &partner.id_value),
        )?;
        st.serialize_field(
            "PartnerName",
            &tagged([("@nameType", "Qualification")], &partner.name),
        )?;
        st.serialize_field("PartnerAdresses", &AddressXml(partner))?;
        st.end()
    }
}

struct AddressXml<'a>(&'a Partner);

impl Serialize for AddressXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let address = &self.0.address;
        let mut st = s.serialize_struct("PartnerAdresses", 0)?;
        st.serialize_field("@lang", LANG)?;
        st.serialize_field("AdressDescription", &address.description)?;
        st.serialize_field("Street", &address.street)?;
        st.serialize_field("CityName", &address.city)?;
        st.serialize_field("PostalCode", &address.postal_code)?;
        st.serialize_field(
            "Country",
            &tagged(
                [("@codeList", COUNTRY_CODE_LIST)],
                address.country_code.alpha2(),
            ),
        )?;
        st.end()
    }
}

struct CtaSectionXml<'a>(&'a Partner);

impl Serialize for CtaSectionXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let partner = self.0;
        let mut st = s.serialize_struct("CtaSection", 0)?;
        st.serialize_field("Contact", &ContactXml(&partner.name))?;
        let channels = [("I-101", partner.phone.as_deref()), ("I-103", partner.email.as_deref())];
        for (means, address) in channels {
            if let Some(address) = address.filter(|a| !a.trim().is_empty()) {
                st.serialize_field("Communication", &CommunicationXml { means, address })?;
            }
        }
        st.end()
    }
}

struct ContactXml<'a>(&'a str);

impl Serialize for ContactXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Contact", 0)?;
        st.serialize_field("@functionCode", "I-94")?;
        st.serialize_field("ContactName", self.0)?;
        st.end()
    }
}

struct CommunicationXml<'a> {
    means: &'static str,
    address: &'a str,
}

impl Serialize for CommunicationXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Communication", 0)?;
        st.serialize_field("ComMeansType", self.means)?;
        st.serialize_field("ComAdress", self.address)?;
        st.end()
    }
}

struct PytSectionDetailsXml<'a>(&'a PaymentMeans);

impl Serialize for PytSectionDetailsXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let means = self.0;
        let mut st = s.serialize_struct("PytSectionDetails", 0)?;
        st.serialize_field("Pyt", &PytXml(means))?;
        if means.institution_function_code().is_some() {
            st.serialize_field("PytFii", &PytFiiXml(means))?;
        }
        st.end()
    }
}

struct PytXml<'a>(&'a PaymentMeans);

impl Serialize for PytXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Pyt", 0)?;
        st.serialize_field("PaymentTearmsTypeCode", self.0.code())?;
        st.serialize_field("PaymentTearmsDescription", self.0.label())?;
        st.end()
    }
}

struct PytFiiXml<'a>(&'a PaymentMeans);

impl Serialize for PytFiiXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let means = self.0;
        let mut st = s.serialize_struct("PytFii", 0)?;
        if let Some(code) = means.institution_function_code() {
            st.serialize_field("@functionCode", code)?;
        }
        match means {
            PaymentMeans::BankTransfer {
                rib,
                account_owner,
                bank_code,
                bank_name,
            } => {
                st.serialize_field(
                    "AccountHolder",
                    &AccountHolderXml {
                        number: rib,
                        owner: account_owner.as_deref().unwrap_or_default(),
                    },
                )?;
                st.serialize_field(
                    "InstitutionIdentification",
                    &InstitutionXml {
                        name_code: bank_code.as_deref().unwrap_or_default(),
                        identifier: bank_code.as_deref(),
                        branch: None,
                        name: bank_name.as_deref().unwrap_or("BANK"),
                    },
                )?;
            }
            PaymentMeans::Postal {
                account_number,
                account_owner,
                branch_code,
                service_name,
            } => {
                let branch = branch_code.as_deref().unwrap_or("0000");
                st.serialize_field(
                    "AccountHolder",
                    &AccountHolderXml {
                        number: account_number,
                        owner: account_owner.as_deref().unwrap_or_default(),
                    },
                )?;
                st.serialize_field(
                    "InstitutionIdentification",
                    &InstitutionXml {
                        name_code: branch,
                        identifier: None,
                        branch: Some(branch),
                        name: service_name.as_deref().unwrap_or("La Poste"),
                    },
                )?;
            }
            PaymentMeans::Check { check_number } => {
                st.serialize_field("CheckReference", check_number)?;
            }
            PaymentMeans::Card {
                reference,
                card_type,
                last4,
            } => {
                st.serialize_field(
                    "CardIdentification",
                    &CardXml {
                        card_type: card_type.as_deref().unwrap_or("VISA"),
                        number: last4.as_deref().unwrap_or_default(),
                        authorization: reference,
                    },
                )?;
            }
            PaymentMeans::EPayment {
                transaction_id,
                gateway,
            } => {
                st.serialize_field(
                    "EPaymentReference",
                    &PairXml {
                        first: ("Gateway", gateway.as_deref().unwrap_or("ELECTRONIC")),
                        second: ("TransactionId", transaction_id),
                    },
                )?;
            }
            PaymentMeans::Other {
                reference,
                description,
            } => {
                st.serialize_field(
                    "OtherPaymentReference",
                    &PairXml {
                        first: ("Description", description.as_deref().unwrap_or("Other")),
                        second: ("Reference", reference),
                    },
                )?;
            }
            PaymentMeans::Cash | PaymentMeans::BillOfExchange => {}
        }
        st.end()
    }
}

struct AccountHolderXml<'a> {
    number: &'a str,
    owner: &'a str,
}

impl Serialize for AccountHolderXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("AccountHolder", 0)?;
        st.serialize_field("AccountNumber", self.number)?;
        st.serialize_field("OwnerIdentifier", self.owner)?;
        st.end()
    }
}

struct InstitutionXml<'a> {
    name_code: &'a str,
    identifier: Option<&'a str>,
    branch: Option<&'a str>,
    name: &'a str,
}

impl Serialize for InstitutionXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("InstitutionIdentification", 0)?;
        st.serialize_field("@nameCode", self.name_code)?;
        if let Some(identifier) = self.identifier {
            st.serialize_field("InstitutionIdentifier", identifier)?;
        }
        if let Some(branch) = self.branch {
            st.serialize_field("BranchIdentifier", branch)?;
        }
        st.serialize_field("InstitutionName", self.name)?;
        st.end()
    }
}

struct CardXml<'a> {
    card_type: &'a str,
    number: &'a str,
    authorization: &'a str,
}

impl Serialize for CardXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("CardIdentification", 0)?;
        st.serialize_field("CardType", self.card_type)?;
        st.serialize_field("CardNumber", self.number)?;
        st.serialize_field("AuthorizationCode", self.authorization)?;
        st.end()
    }
}

struct PairXml<'a> {
    first: (&'static str, &'a str),
    second: (&'static str, &'a str),
}

impl Serialize for PairXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Pair", 2)?;
        st.serialize_field(self.first.0, self.first.1)?;
        st.serialize_field(self.second.0, self.second.1)?;
        st.end()
    }
}

struct ReferencesXml<'a>(&'a [(&'static str, &'a str)]);

impl Serialize for ReferencesXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("RffSection", 0)?;
        for (code, value) in self.0 {
            st.serialize_field("Reference", &tagged([("@refID", *code)], value))?;
        }
        st.end()
    }
}

struct MoaXml<'a> {
    code: &'static str,
    currency: &'a str,
    amount: Decimal,
    description: Option<&'a str>,
}

impl<'a> MoaXml<'a> {
    fn new(code: &'static str, currency: &'a str, amount: Decimal) -> Self {
        Self {
            code,
            currency,
            amount,
            description: None,
        }
    }
}

impl Serialize for MoaXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Moa", 0)?;
        st.serialize_field("@amountTypeCode", self.code)?;
        st.serialize_field("@currencyCodeList", CURRENCY_CODE_LIST)?;
        st.serialize_field(
            "Amount",
            &tagged(
                [("@currencyIdentifier", self.currency)],
                &format_amount(self.amount),
            ),
        )?;
        if let Some(description) = self.description {
            st.serialize_field("AmountDescription", &tagged([("@lang", LANG)], description))?;
        }
        st.end()
    }
}

/// `Tax` body shared by line and invoice tax blocks.
struct TaxXml<'a> {
    code: &'static str,
    name: &'static str,
    rate: String,
    exemption: Option<&'a str>,
}

impl<'a> TaxXml<'a> {
    fn vat(rate: Decimal, exemption: Option<&'a str>) -> Self {
        Self {
            code: "I-1602",
            name: "TVA",
            rate: format_rate_percent(rate),
            exemption: exemption.filter(|_| rate.is_zero()),
        }
    }
}

impl Serialize for TaxXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Tax", 0)?;
        st.serialize_field("TaxTypeName", &tagged([("@code", self.code)], self.name))?;
        st.serialize_field("TaxDetails", &Wrap("TaxRate", self.rate.as_str()))?;
        if let Some(reason) = self.exemption {
            st.serialize_field("TaxExemptionReference", reason)?;
        }
        st.end()
    }
}

struct AlcXml<'a> {
    code: &'a str,
    reason: &'a str,
    amount_type: &'static str,
    amount: Decimal,
    currency: &'a str,
}

impl<'a> AlcXml<'a> {
    fn from_entry(entry: &'a AllowanceCharge, currency: &'a str) -> Self {
        Self {
            code: &entry.code,
            reason: &entry.description,
            amount_type: entry.amount_type_code(),
            amount: entry.amount,
            currency,
        }
    }
}

impl Serialize for AlcXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("Alc", 0)?;
        st.serialize_field("AlcDetails", &AlcDetailsXml(self.code, self.reason))?;
        st.serialize_field(
            "AlcMonetaryAmount",
            &AlcAmountXml(MoaXml::new(self.amount_type, self.currency, self.amount)),
        )?;
        st.end()
    }
}

struct AlcDetailsXml<'a>(&'a str, &'a str);

impl Serialize for AlcDetailsXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("AlcDetails", 0)?;
        st.serialize_field("AllowanceChargeCode", self.0)?;
        st.serialize_field("AllowanceChargeReasonCode", self.1)?;
        st.end()
    }
}

struct AlcAmountXml<'a>(MoaXml<'a>);

impl Serialize for AlcAmountXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("AlcMonetaryAmount", 0)?;
        st.serialize_field("@currencyCodeList", CURRENCY_CODE_LIST)?;
        st.serialize_field("Moa", &self.0)?;
        st.end()
    }
}

struct LinSectionXml<'a>(&'a InvoiceXml<'a>);

impl Serialize for LinSectionXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let view = self.0;
        let mut st = s.serialize_struct("LinSection", 0)?;
        for (index, (line, totals)) in view
            .invoice
            .lines
            .iter()
            .zip(view.totals.lines())
            .enumerate()
        {
            st.serialize_field(
                "Lin",
                &LinXml {
                    position: index + 1,
                    line,
                    net: totals.net,
                    currency: view.currency(),
                },
            )?;
        }
        st.end()
    }
}

struct LinXml<'a> {
    position: usize,
    line: &'a InvoiceLine,
    net: Decimal,
    currency: &'a str,
}

impl Serialize for LinXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let line = self.line;
        let mut st = s.serialize_struct("Lin", 0)?;
        st.serialize_field("ItemIdentifier", &self.position)?;
        st.serialize_field("LinImd", &LinImdXml(line))?;
        st.serialize_field(
            "LinQty",
            &Wrap(
                "Quantity",
                &tagged(
                    [("@measurementUnit", line.unit.as_str())],
                    &format_quantity(line.quantity),
                ),
            ),
        )?;
        st.serialize_field(
            "LinTax",
            &TaxXml::vat(line.tax_rate, line.exemption_reference()),
        )?;
        if line.fodec {
            st.serialize_field(
                "LinTax",
                &TaxXml {
                    code: "I-162",
                    name: "FODEC",
                    rate: "1.0".to_owned(),
                    exemption: None,
                },
            )?;
        }
        for allowance in &line.allowances {
            st.serialize_field("LinAlc", &Wrap("Alc", &AlcXml::from_entry(allowance, self.currency)))?;
        }
        st.serialize_field(
            "LinMoa",
            &LinMoaXml {
                unit_price: line.unit_price,
                net: self.net,
                currency: self.currency,
            },
        )?;
        st.end()
    }
}

struct LinImdXml<'a>(&'a InvoiceLine);

impl Serialize for LinImdXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("LinImd", 0)?;
        st.serialize_field("@lang", LANG)?;
        st.serialize_field("ItemCode", &self.0.item_code)?;
        st.serialize_field("ItemDescription", &self.0.description)?;
        st.end()
    }
}

struct LinMoaXml<'a> {
    unit_price: Decimal,
    net: Decimal,
    currency: &'a str,
}

impl Serialize for LinMoaXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("LinMoa", 0)?;
        st.serialize_field(
            "MoaDetails",
            &Wrap("Moa", &MoaXml::new("I-183", self.currency, self.unit_price)),
        )?;
        st.serialize_field(
            "MoaDetails",
            &Wrap("Moa", &MoaXml::new("I-171", self.currency, self.net)),
        )?;
        st.end()
    }
}

struct InvoiceAlcXml<'a> {
    discount: Decimal,
    allowances: &'a [&'a AllowanceCharge],
    currency: &'a str,
}

impl Serialize for InvoiceAlcXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("InvoiceAlc", 0)?;
        if self.discount > Decimal::ZERO {
            st.serialize_field(
                "Alc",
                &AlcXml {
                    code: "I-153",
                    reason: "Discount",
                    amount_type: "I-176",
                    amount: self.discount,
                    currency: self.currency,
                },
            )?;
        }
        for entry in self.allowances {
            st.serialize_field("Alc", &AlcXml::from_entry(entry, self.currency))?;
        }
        st.end()
    }
}

struct InvoiceMoaXml<'a>(&'a InvoiceXml<'a>);

impl Serialize for InvoiceMoaXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let view = self.0;
        let mut st = s.serialize_struct("InvoiceMoa", 0)?;
        st.serialize_field(
            "AmountDetails",
            &Wrap("Moa", &MoaXml::new("I-176", view.currency(), view.totals.total_net())),
        )?;
        st.serialize_field(
            "AmountDetails",
            &Wrap(
                "Moa",
                &MoaXml {
                    description: Some(view.amount_words.as_str()),
                    ..MoaXml::new("I-180", view.currency(), view.totals.grand_total())
                },
            ),
        )?;
        st.end()
    }
}

struct InvoiceTaxDetailsXml<'a> {
    tax: TaxXml<'a>,
    amounts: Vec<(&'static str, Decimal)>,
    currency: &'a str,
}

impl Serialize for InvoiceTaxDetailsXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("InvoiceTaxDetails", 0)?;
        st.serialize_field("Tax", &self.tax)?;
        for (code, amount) in &self.amounts {
            st.serialize_field(
                "AmountDetails",
                &Wrap("Moa", &MoaXml::new(*code, self.currency, *amount)),
            )?;
        }
        st.end()
    }
}

struct InvoiceTaxXml<'a>(&'a InvoiceXml<'a>);

impl<'a> InvoiceTaxXml<'a> {
    fn details(&self) -> Vec<InvoiceTaxDetailsXml<'a>> {
        let view = self.0;
        let totals = view.totals;
        let currency = view.currency();

        let mut details = vec![InvoiceTaxDetailsXml {
            tax: TaxXml {
                code: "I-1601",
                name: "droit de timbre",
                rate: "0.0".to_owned(),
                exemption: None,
            },
            amounts: vec![("I-178", totals.stamp_duty())],
            currency,
        }];
        if totals.total_surcharge() > Decimal::ZERO {
            details.push(InvoiceTaxDetailsXml {
                tax: TaxXml {
                    code: "I-1603",
                    name: "FODEC",
                    rate: "1.0".to_owned(),
                    exemption: None,
                },
                amounts: vec![("I-178", totals.total_surcharge())],
                currency,
            });
        }
        if totals.withheld() > Decimal::ZERO {
            details.push(InvoiceTaxDetailsXml {
                tax: TaxXml {
                    code: "I-1604",
                    name: "IRC Withholding",
                    rate: format_rate_percent(view.invoice.withholding_rate.unwrap_or_default()),
                    exemption: None,
                },
                amounts: vec![("I-178", totals.withheld())],
                currency,
            });
        }
        details.extend(totals.buckets().iter().map(|bucket: &'a TaxBucket| {
            InvoiceTaxDetailsXml {
                tax: TaxXml::vat(bucket.rate, bucket.exemption_reason.as_deref()),
                amounts: vec![("I-177", bucket.base), ("I-178", bucket.amount)],
                currency,
            }
        }));
        details
    }
}

impl Serialize for InvoiceTaxXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("InvoiceTax", 0)?;
        for detail in self.details() {
            st.serialize_field("InvoiceTaxDetails", &detail)?;
        }
        st.end()
    }
}

struct RefTtnValXml<'a>(&'a InvoiceXml<'a>);

impl Serialize for RefTtnValXml<'_> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let view = self.0;
        let mut st = s.serialize_struct("RefTtnVal", 0)?;
        st.serialize_field(
            "ReferenceTTN",
            &tagged([("@refID", "I-88")], &view.invoice.ttn_reference),
        )?;
        if let Some(qr) = view.qr.as_deref() {
            st.serialize_field("ReferenceCEV", qr)?;
        }
        st.end()
    }
}

/// Empty `ds:Signature` slot, replaced when the document is signed.
struct SignaturePlaceholderXml;

impl Serialize for SignaturePlaceholderXml {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = s.serialize_struct("ds:Signature", 2)?;
        st.serialize_field("@xmlns:ds", DS_NS)?;
        st.serialize_field("@Id", SIGNATURE_ID)?;
        st.end()
    }
}
