//! Fixed-precision amount helpers.
//!
//! Monetary intermediates are rounded to [`INTERNAL_SCALE`] places before they
//! are accumulated; rendered amounts use [`DISPLAY_SCALE`] places, the
//! millime precision of the Tunisian dinar.
use rust_decimal::{Decimal, RoundingStrategy};

/// Scale every intermediate is rounded to.
pub const INTERNAL_SCALE: u32 = 5;
/// Scale of rendered amounts and quantities.
pub const DISPLAY_SCALE: u32 = 3;
/// Scale of rendered percentages.
pub const RATE_SCALE: u32 = 1;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Round to the internal precision, midpoint away from zero.
///
/// # Examples
/// ```rust
/// use rust_decimal::Decimal;
/// use teif_core::amount::round_internal;
///
/// let value = Decimal::new(1_234_567, 6); // 1.234567
/// assert_eq!(round_internal(value), Decimal::new(123_457, 5));
/// ```
pub fn round_internal(value: Decimal) -> Decimal {
    round_to(value, INTERNAL_SCALE)
}

pub fn round_to(value: Decimal, places: u32) -> Decimal {
    value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
}

/// `base × rate`, rounded to the internal precision.
pub fn apply_rate(base: Decimal, rate: Decimal) -> Decimal {
    round_internal(base * rate)
}

/// Product of two factors, rounded to the internal precision.
pub fn multiply(left: Decimal, right: Decimal) -> Decimal {
    round_internal(left * right)
}

/// Sum of already rounded values, rounded again so scale never grows.
pub fn sum<I>(values: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    round_internal(values.into_iter().fold(Decimal::ZERO, |acc, v| acc + v))
}

/// Fraction (`0.07`) to percentage (`7`).
pub fn to_percent(rate: Decimal) -> Decimal {
    rate * HUNDRED
}

/// Render with exactly `places` decimals, e.g. `60` -> `"60.000"`.
pub fn format_fixed(value: Decimal, places: u32) -> String {
    format!("{:.1$}", round_to(value, places), places as usize)
}

/// Render a currency amount with three decimals.
pub fn format_amount(value: Decimal) -> String {
    format_fixed(value, DISPLAY_SCALE)
}

/// Render a quantity with three decimals.
pub fn format_quantity(value: Decimal) -> String {
    format_fixed(value, DISPLAY_SCALE)
}

/// Render a fractional rate as a percentage with one decimal (`0.19` -> `"19.0"`).
pub fn format_rate_percent(rate: Decimal) -> String {
    format_fixed(to_percent(rate), RATE_SCALE)
}

/// Whether the value carries more significant decimals than `places`.
pub fn exceeds_scale(value: Decimal, places: u32) -> bool {
    value.normalize().scale() > places
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn internal_rounding_is_half_away_from_zero() {
        assert_eq!(round_internal(dec!(0.000005)), dec!(0.00001));
        assert_eq!(round_internal(dec!(-0.000005)), dec!(-0.00001));
        assert_eq!(round_internal(dec!(1.000004)), dec!(1.00000));
    }

    #[test]
    fn display_formatting_pads_and_rounds() {
        assert_eq!(format_amount(dec!(60)), "60.000");
        assert_eq!(format_amount(dec!(3.5)), "3.500");
        assert_eq!(format_amount(dec!(0.0005)), "0.001");
        assert_eq!(format_quantity(dec!(2)), "2.000");
    }

    #[test]
    fn rates_render_as_percentages() {
        assert_eq!(format_rate_percent(dec!(0.19)), "19.0");
        assert_eq!(format_rate_percent(dec!(0.07)), "7.0");
        assert_eq!(format_rate_percent(Decimal::ZERO), "0.0");
        assert_eq!(format_rate_percent(dec!(0.015)), "1.5");
    }

    #[test]
    fn sum_keeps_internal_scale() {
        let total = sum([dec!(0.33333), dec!(0.33333), dec!(0.33334)]);
        assert_eq!(total, dec!(1.00000));
    }

    #[test]
    fn scale_check_ignores_trailing_zeros() {
        assert!(!exceeds_scale(dec!(1.2300), 3));
        assert!(exceeds_scale(dec!(1.2345), 3));
    }
}
