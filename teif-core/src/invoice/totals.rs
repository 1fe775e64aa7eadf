//! Deterministic invoice pricing.
//!
//! Every monetary intermediate is rounded to [`INTERNAL_SCALE`] places,
//! midpoint away from zero, before it is accumulated.
//!
//! [`INTERNAL_SCALE`]: crate::amount::INTERNAL_SCALE
use super::{AllowanceKind, Invoice, InvoiceLine};
use crate::amount::{apply_rate, multiply, round_internal, sum};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// FODEC levy applied to flagged lines.
pub const FODEC_RATE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Breakdown of a single line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineTotals {
    pub gross: Decimal,
    pub discount: Decimal,
    pub net: Decimal,
    pub surcharge: Decimal,
    pub tax_base: Decimal,
    pub tax: Decimal,
}

impl LineTotals {
    fn from_line(line: &InvoiceLine) -> Self {
        let gross = multiply(line.quantity, line.unit_price);
        let discount = apply_rate(gross, line.discount_rate);
        let net = round_internal(gross - discount);
        let surcharge = if line.fodec {
            apply_rate(net, FODEC_RATE)
        } else {
            Decimal::ZERO
        };
        let tax_base = round_internal(net + surcharge);
        let tax = apply_rate(tax_base, line.tax_rate);
        Self {
            gross,
            discount,
            net,
            surcharge,
            tax_base,
            tax,
        }
    }
}

/// Aggregate of all lines sharing a tax rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxBucket {
    pub rate: Decimal,
    pub base: Decimal,
    pub amount: Decimal,
    pub exemption_reason: Option<String>,
}

/// Output of [`compute_totals`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComputedTotals {
    lines: Vec<LineTotals>,
    buckets: Vec<TaxBucket>,
    subtotal_net: Decimal,
    global_discount: Decimal,
    allowance_total: Decimal,
    charge_total: Decimal,
    total_net: Decimal,
    total_surcharge: Decimal,
    total_tax: Decimal,
    stamp_duty: Decimal,
    withheld: Decimal,
    grand_total: Decimal,
}

/// Price an invoice.
///
/// Pure and total: the same invoice always yields the same totals, and an
/// invoice without lines yields zeros (plus stamp duty).
///
/// # Examples
/// ```rust
/// use rust_decimal::Decimal;
/// use teif_core::invoice::{compute_totals, Invoice};
///
/// let invoice: Invoice = serde_json::from_str(include_str!("../../tests/fixtures/three_rates.json"))?;
/// let totals = compute_totals(&invoice);
/// assert_eq!(totals.total_net(), Decimal::new(310, 0));
/// assert_eq!(totals.total_tax(), Decimal::new(149, 1));
/// assert_eq!(totals.grand_total(), Decimal::new(3259, 1));
/// # Ok::<(), serde_json::Error>(())
/// ```
pub fn compute_totals(invoice: &Invoice) -> ComputedTotals {
    let lines: Vec<LineTotals> = invoice.lines.iter().map(LineTotals::from_line).collect();

    let mut buckets: BTreeMap<Decimal, TaxBucket> = BTreeMap::new();
    for (line, totals) in invoice.lines.iter().zip(&lines) {
        let rate = line.tax_rate.normalize();
        let bucket = buckets.entry(rate).or_insert_with(|| TaxBucket {
            rate,
            base: Decimal::ZERO,
            amount: Decimal::ZERO,
            exemption_reason: None,
        });
        bucket.base = round_internal(bucket.base + totals.tax_base);
        bucket.amount = round_internal(bucket.amount + totals.tax);
        if bucket.exemption_reason.is_none() {
            bucket.exemption_reason = line.exemption_reference().map(str::to_owned);
        }
    }
    let buckets: Vec<TaxBucket> = buckets.into_values().collect();

    let subtotal_net = sum(lines.iter().map(|l| l.net));
    let global_discount = round_internal(invoice.global_discount);
    let allowance_total = sum(
        invoice
            .invoice_level_allowances()
            .filter(|a| a.kind == AllowanceKind::Allowance)
            .map(|a| round_internal(a.amount)),
    );
    let charge_total = sum(
        invoice
            .invoice_level_allowances()
            .filter(|a| a.kind == AllowanceKind::Charge)
            .map(|a| round_internal(a.amount)),
    );
    let total_net = round_internal(subtotal_net - global_discount - allowance_total + charge_total);
    let total_surcharge = sum(lines.iter().map(|l| l.surcharge));
    let total_tax = sum(buckets.iter().map(|b| b.amount));
    let stamp_duty = round_internal(invoice.stamp_duty);

    let withheld = match invoice.withholding_rate {
        Some(rate) if rate > Decimal::ZERO => {
            apply_rate(round_internal(total_net + total_surcharge + total_tax), rate)
        }
        _ => Decimal::ZERO,
    };
    let grand_total =
        round_internal(total_net + total_surcharge + total_tax + stamp_duty - withheld);

    tracing::debug!(
        lines = lines.len(),
        buckets = buckets.len(),
        %grand_total,
        "computed invoice totals"
    );

    ComputedTotals {
        lines,
        buckets,
        subtotal_net,
        global_discount,
        allowance_total,
        charge_total,
        total_net,
        total_surcharge,
        total_tax,
        stamp_duty,
        withheld,
        grand_total,
    }
}

impl ComputedTotals {
    pub fn lines(&self) -> &[LineTotals] {
        &self.lines
    }

    /// Buckets in ascending rate order.
    pub fn buckets(&self) -> &[TaxBucket] {
        &self.buckets
    }

    pub fn subtotal_net(&self) -> Decimal {
        self.subtotal_net
    }

    pub fn global_discount(&self) -> Decimal {
        self.global_discount
    }

    pub fn allowance_total(&self) -> Decimal {
        self.allowance_total
    }

    pub fn charge_total(&self) -> Decimal {
        self.charge_total
    }

    pub fn total_net(&self) -> Decimal {
        self.total_net
    }

    pub fn total_surcharge(&self) -> Decimal {
        self.total_surcharge
    }

    pub fn total_tax(&self) -> Decimal {
        self.total_tax
    }

    pub fn stamp_duty(&self) -> Decimal {
        self.stamp_duty
    }

    pub fn withheld(&self) -> Decimal {
        self.withheld
    }

    pub fn grand_total(&self) -> Decimal {
        self.grand_total
    }

    /// Whether the bucket amounts add up to the reported tax total.
    pub fn is_reconciled(&self) -> bool {
        sum(self.buckets.iter().map(|b| b.amount)) == self.total_tax
    }
}
