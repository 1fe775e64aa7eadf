//! French amount-in-words text for the grand total.
use crate::amount::{DISPLAY_SCALE, round_to};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

pub const AMOUNT_IN_WORDS_PREFIX: &str = "ARRÊTÉ LA PRÉSENTE FACTURE À LA SOMME DE : ";

const UNITS: [&str; 10] = [
    "", "un", "deux", "trois", "quatre", "cinq", "six", "sept", "huit", "neuf",
];
const TEENS: [&str; 10] = [
    "dix", "onze", "douze", "treize", "quatorze", "quinze", "seize", "dix-sept", "dix-huit",
    "dix-neuf",
];
const TENS: [&str; 10] = [
    "", "dix", "vingt", "trente", "quarante", "cinquante", "soixante", "soixante", "quatre-vingt",
    "quatre-vingt",
];

/// Dinars and millimes spelled out in upper-case French.
///
/// # Examples
/// ```rust
/// use rust_decimal::Decimal;
/// use teif_core::invoice::words::amount_in_words;
///
/// assert_eq!(
///     amount_in_words(Decimal::new(1, 3)),
///     "ARRÊTÉ LA PRÉSENTE FACTURE À LA SOMME DE : ZÉRO DINAR ET UN MILLIME"
/// );
/// ```
pub fn amount_in_words(amount: Decimal) -> String {
    let rounded = round_to(amount.abs(), DISPLAY_SCALE);
    let whole = rounded.trunc();
    let dinars = whole.to_u128().unwrap_or_default();
    let millimes = ((rounded - whole) * Decimal::ONE_THOUSAND)
        .to_u128()
        .unwrap_or_default();

    // "deux millions de dinars": an exact million or milliard takes "de".
    let joiner = if dinars > 0 && dinars % 1_000_000 == 0 {
        " de "
    } else {
        " "
    };
    let mut text = format!("{}{joiner}{}", spell(dinars), plural("dinar", dinars));
    if millimes > 0 {
        text.push_str(&format!(" et {} {}", spell(millimes), plural("millime", millimes)));
    }
    format!("{AMOUNT_IN_WORDS_PREFIX}{}", text.to_uppercase())
}

fn plural(word: &str, count: u128) -> String {
    if count > 1 {
        format!("{word}s")
    } else {
        word.to_owned()
    }
}

fn spell(n: u128) -> String {
    if n == 0 {
        return "zéro".to_owned();
    }
    let mut parts = Vec::new();
    let billions = n / 1_000_000_000;
    let millions = (n / 1_000_000) % 1000;
    let thousands = (n / 1000) % 1000;
    let rest = n % 1000;

    if billions > 0 {
        parts.push(format!("{} {}", spell(billions), plural("milliard", billions)));
    }
    if millions > 0 {
        parts.push(format!("{} {}", below_thousand(millions, false), plural("million", millions)));
    }
    if thousands == 1 {
        parts.push("mille".to_owned());
    } else if thousands > 1 {
        parts.push(format!("{} mille", below_thousand(thousands, true)));
    }
    if rest > 0 {
        parts.push(below_thousand(rest, false));
    }
    parts.join(" ")
}

/// `n` in 1..1000. `before_mille` keeps "cent" and "quatre-vingt" invariable.
fn below_thousand(n: u128, before_mille: bool) -> String {
    let hundreds = (n / 100) as usize;
    let rest = (n % 100) as usize;
    let mut text = match hundreds {
        0 => String::new(),
        1 => "cent".to_owned(),
        h if rest == 0 && !before_mille => format!("{} cents", UNITS[h]),
        h => format!("{} cent", UNITS[h]),
    };
    if rest > 0 {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&below_hundred(rest, before_mille));
    }
    text
}

fn below_hundred(n: usize, before_mille: bool) -> String {
    let (tens, units) = (n / 10, n % 10);
    match tens {
        0 => UNITS[units].to_owned(),
        1 => TEENS[units].to_owned(),
        // soixante-dix and quatre-vingt-dix count through the teens
        7 | 9 => {
            let teen = TEENS[units];
            if tens == 7 && units == 1 {
                format!("{} et {teen}", TENS[tens])
            } else {
                format!("{}-{teen}", TENS[tens])
            }
        }
        8 if units == 0 && !before_mille => "quatre-vingts".to_owned(),
        8 => match units {
            0 => TENS[8].to_owned(),
            u => format!("{}-{}", TENS[8], UNITS[u]),
        },
        t => match units {
            0 => TENS[t].to_owned(),
            1 => format!("{} et un", TENS[t]),
            u => format!("{}-{}", TENS[t], UNITS[u]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn words(value: Decimal) -> String {
        amount_in_words(value)
            .strip_prefix(AMOUNT_IN_WORDS_PREFIX)
            .map(str::to_owned)
            .unwrap_or_default()
    }

    #[test]
    fn spells_small_numbers() {
        assert_eq!(words(dec!(1)), "UN DINAR");
        assert_eq!(words(dec!(21)), "VINGT ET UN DINARS");
        assert_eq!(words(dec!(71)), "SOIXANTE ET ONZE DINARS");
        assert_eq!(words(dec!(80)), "QUATRE-VINGTS DINARS");
        assert_eq!(words(dec!(99)), "QUATRE-VINGT-DIX-NEUF DINARS");
    }

    #[test]
    fn spells_hundreds_and_thousands() {
        assert_eq!(words(dec!(200)), "DEUX CENTS DINARS");
        assert_eq!(words(dec!(1000)), "MILLE DINARS");
        assert_eq!(
            words(dec!(1234.567)),
            "MILLE DEUX CENT TRENTE-QUATRE DINARS ET CINQ CENT SOIXANTE-SEPT MILLIMES"
        );
        assert_eq!(words(dec!(2_000_000)), "DEUX MILLIONS DE DINARS");
        assert_eq!(words(dec!(3_000_000_000)), "TROIS MILLIARDS DE DINARS");
        assert_eq!(words(dec!(2_000_001)), "DEUX MILLIONS UN DINARS");
        assert_eq!(words(dec!(1_000_000.5)), "UN MILLION DE DINARS ET CINQ CENTS MILLIMES");
    }

    #[test]
    fn millimes_are_rounded_and_omitted_when_zero() {
        assert_eq!(words(dec!(325.9)), "TROIS CENT VINGT-CINQ DINARS ET NEUF CENTS MILLIMES");
        assert_eq!(words(dec!(5.0004)), "CINQ DINARS");
        assert_eq!(words(dec!(0.0005)), "ZÉRO DINAR ET UN MILLIME");
    }
}
