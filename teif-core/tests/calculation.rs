mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use teif_core::invoice::{
    AllowanceCharge, FinalizedInvoice, InvoiceError, InvoiceField, ValidationKind,
    DocumentType, check_compliance, compute_totals,
};

#[test]
fn three_rate_invoice_reconciles() {
    let totals = compute_totals(&common::sample_invoice());

    assert_eq!(totals.total_net(), dec!(310.000));
    assert_eq!(totals.total_tax(), dec!(14.900));
    assert_eq!(totals.stamp_duty(), dec!(1.000));
    assert_eq!(totals.grand_total(), dec!(325.900));
    assert!(totals.is_reconciled());

    let buckets: Vec<(Decimal, Decimal, Decimal)> = totals
        .buckets()
        .iter()
        .map(|b| (b.rate, b.base, b.amount))
        .collect();
    assert_eq!(
        buckets,
        vec![
            (dec!(0), dec!(200), dec!(0)),
            (dec!(0.07), dec!(50), dec!(3.5)),
            (dec!(0.19), dec!(60), dec!(11.4)),
        ]
    );
    assert_eq!(
        totals.buckets()[0].exemption_reason.as_deref(),
        Some("Article 1 du code de la TVA")
    );
}

#[test]
fn totals_are_deterministic() {
    let invoice = common::sample_invoice();
    assert_eq!(compute_totals(&invoice), compute_totals(&invoice));
}

#[test]
fn bucket_sum_matches_total_tax_with_discounts_and_fodec() {
    let mut invoice = common::sample_invoice();
    invoice.lines[1].discount_rate = dec!(0.125);
    invoice.lines[2].fodec = true;
    invoice.lines[2].unit_price = dec!(19.995);
    invoice.global_discount = dec!(5);
    invoice
        .allowances
        .push(AllowanceCharge::charge("I-155", "Transport", dec!(7.5)));

    let totals = compute_totals(&invoice);
    let bucket_sum: Decimal = totals.buckets().iter().map(|b| b.amount).sum();
    assert_eq!(bucket_sum, totals.total_tax());
    assert!(totals.is_reconciled());
    assert!(totals.total_surcharge() > Decimal::ZERO);
    assert_eq!(totals.charge_total(), dec!(7.5));
}

#[test]
fn withholding_reduces_the_payable_amount() {
    let mut invoice = common::sample_invoice();
    invoice.withholding_rate = Some(dec!(0.015));

    let totals = compute_totals(&invoice);
    // 1.5 % of (310 + 14.9)
    assert_eq!(totals.withheld(), dec!(4.8735));
    assert_eq!(totals.grand_total(), dec!(321.0265));
}

#[test]
fn sample_invoice_is_compliant_and_finalizes() {
    let invoice = common::sample_invoice();
    let report = check_compliance(&invoice);
    assert!(report.is_compliant(), "{:?}", report.errors);

    let finalized = FinalizedInvoice::new(invoice).expect("finalize");
    assert_eq!(finalized.totals().grand_total(), dec!(325.9));
}

#[test]
fn zero_rate_without_reason_is_reported() {
    let mut invoice = common::sample_invoice();
    invoice.lines[0].exemption_reason = None;

    let report = check_compliance(&invoice);
    let issue = report
        .errors
        .iter()
        .find(|i| i.field == InvoiceField::LineExemptionReason)
        .expect("exemption issue");
    assert_eq!(issue.kind, ValidationKind::Missing);
    assert_eq!(issue.line_item_index, Some(0));
}

#[test]
fn blank_identifiers_block_finalization() {
    let mut invoice = common::sample_invoice();
    invoice.document_number = "   ".into();

    match FinalizedInvoice::new(invoice) {
        Err(InvoiceError::Validation(err)) => {
            assert!(err.issues.iter().any(|i| i.field == InvoiceField::DocumentNumber));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn stamp_duty_on_a_delivery_note_is_a_warning() {
    let mut invoice = common::sample_invoice();
    invoice.document_type = DocumentType::DeliveryNote;

    let report = check_compliance(&invoice);
    assert!(report.is_compliant(), "{:?}", report.errors);
    assert!(report
        .warnings
        .iter()
        .any(|i| i.field == InvoiceField::StampDuty));
}
