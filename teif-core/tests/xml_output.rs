mod common;

use base64ct::{Base64, Encoding};
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use teif_core::invoice::xml::{ToXml, XmlFormat, minify, to_xml_with_format};
use teif_core::invoice::{
    AllowanceCharge, DocumentType, FinalizedInvoice, PaymentMeans, QrPayload, compute_totals,
};

fn render(invoice: &teif_core::invoice::Invoice) -> String {
    to_xml_with_format(invoice, &compute_totals(invoice), XmlFormat::Compact).expect("render")
}

#[test]
fn document_skeleton_and_order() {
    let xml = render(&common::sample_invoice());

    assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><TEIF controlingAgency="TTN" version="1.8.8">"#));
    let order = [
        "<InvoiceHeader>",
        "<Bgm>",
        "<Dtm>",
        "<PartnerSection>",
        "<PytSection>",
        "<LinSection>",
        "<InvoiceMoa>",
        "<InvoiceTax>",
        "<RefTtnVal>",
        "<ds:Signature",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|tag| xml.find(tag).unwrap_or_else(|| panic!("missing {tag}")))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    assert!(xml.ends_with("</TEIF>"));
}

#[test]
fn totals_render_at_three_decimals() {
    let xml = render(&common::sample_invoice());

    assert!(xml.contains(r#"<Moa amountTypeCode="I-176" currencyCodeList="ISO_4217"><Amount currencyIdentifier="TND">310.000</Amount></Moa>"#));
    assert!(xml.contains(r#"<Amount currencyIdentifier="TND">325.900</Amount>"#));
    assert!(xml.contains("<TaxRate>7.0</TaxRate>"));
    assert!(xml.contains("<TaxRate>19.0</TaxRate>"));
    assert!(xml.contains("<TaxExemptionReference>Article 1 du code de la TVA</TaxExemptionReference>"));
    assert!(xml.contains(r#"<Amount currencyIdentifier="TND">11.400</Amount>"#));
    assert!(xml.contains(
        r#"<TaxTypeName code="I-1601">droit de timbre</TaxTypeName>"#
    ));
}

#[test]
fn partner_text_is_escaped() {
    let xml = render(&common::sample_invoice());
    assert!(xml.contains("Client &amp; Fils"));
    assert!(!xml.contains("Client & Fils"));
}

#[test]
fn receipt_documents_keep_payment_terms_and_dates() {
    let mut invoice = common::sample_invoice();
    invoice.document_type = DocumentType::DeliveryNote;
    invoice.dates.due = NaiveDate::from_ymd_opt(2024, 4, 15);
    invoice.dates.delivery = NaiveDate::from_ymd_opt(2024, 3, 20);

    let xml = render(&invoice);
    assert!(xml.contains(r#"<DocumentType code="I-30">"#));
    assert!(xml.contains("<PytSection>"));
    assert!(xml.contains(r#"<DateText format="ddMMyy" functionCode="I-32">150424</DateText>"#));
    assert!(xml.contains(r#"<DateText format="ddMMyy" functionCode="I-33">200324</DateText>"#));
}

#[test]
fn service_period_is_rendered_as_a_range() {
    let mut invoice = common::sample_invoice();
    invoice.document_type = DocumentType::ServiceCertificate;
    invoice.dates.period_start = NaiveDate::from_ymd_opt(2024, 2, 1);
    invoice.dates.period_end = NaiveDate::from_ymd_opt(2024, 2, 29);

    let xml = render(&invoice);
    assert!(xml.contains(
        r#"<DateText format="ddMMyy-ddMMyy" functionCode="I-36">010224-290224</DateText>"#
    ));
}

#[test]
fn bank_transfer_carries_institution_block() {
    let mut invoice = common::sample_invoice();
    invoice.payment = PaymentMeans::BankTransfer {
        rib: "49000000000000000000".into(),
        account_owner: Some("Atelier Medina".into()),
        bank_code: Some("08".into()),
        bank_name: Some("BIAT".into()),
    };

    let xml = render(&invoice);
    assert!(xml.contains("PytFii"));
    assert!(xml.contains("<AccountNumber>49000000000000000000</AccountNumber>"));
    assert!(xml.contains("<InstitutionName>BIAT</InstitutionName>"));
}

#[test]
fn invoice_level_discount_and_allowances_appear_once() {
    let mut invoice = common::sample_invoice();
    invoice.global_discount = dec!(10);
    invoice
        .allowances
        .push(AllowanceCharge::charge("I-155", "Transport", dec!(4)));

    let xml = render(&invoice);
    assert_eq!(xml.matches("<InvoiceAlc>").count(), 1);
    assert!(xml.contains("<AllowanceChargeReasonCode>Transport</AllowanceChargeReasonCode>"));
    // 310 - 10 + 4
    assert!(xml.contains(r#"<Amount currencyIdentifier="TND">304.000</Amount>"#));
}

#[test]
fn qr_reference_holds_base64_payload() {
    let xml = render(&common::sample_invoice());
    let encoded = common::text(&xml, "ReferenceCEV").expect("qr reference");
    let decoded = String::from_utf8(Base64::decode_vec(encoded).expect("base64")).expect("utf-8");
    assert_eq!(
        decoded,
        "1234567A/B/M/000|F-2024-0042|150324|Atelier Medina SARL|7654321Z/A/M/000|325.900|14.900|TTN-2024-0042"
    );
}

#[test]
fn qr_payload_fills_blank_fields() {
    let mut invoice = common::sample_invoice();
    invoice.ttn_reference = "  ".into();
    invoice.buyer.id_value = String::new();
    invoice.supplier.name = " ".into();

    let payload = QrPayload::from_invoice(&invoice, &compute_totals(&invoice))
        .to_payload_string()
        .expect("payload");
    assert_eq!(
        payload,
        "1234567A/B/M/000|F-2024-0042|150324|N/A|N/A|325.900|14.900|TTN-F-2024-0042"
    );
}

#[test]
fn pretty_output_only_differs_in_whitespace() {
    let finalized = FinalizedInvoice::new(common::sample_invoice()).expect("finalize");
    let pretty = finalized
        .to_xml_with_format(XmlFormat::Pretty {
            indent_char: ' ',
            indent_size: 2,
        })
        .expect("pretty");
    let compact = finalized.to_xml_minified().expect("compact");

    assert!(pretty.contains("\n  <InvoiceHeader>"));
    assert_eq!(minify(&pretty), minify(&compact));
}
