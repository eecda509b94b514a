//! Credit and currency amount handling.
//!
//! Amounts arrive from the API as strings and are parsed into [`Decimal`]. Credit
//! amounts keep up to [`CREDIT_SCALE`] decimal places; currency amounts are rounded
//! to the minor unit of their currency.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Decimal places kept on credit amounts.
pub const CREDIT_SCALE: u32 = 5;

/// Currencies without a minor unit.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// Currencies with a thousandth minor unit.
const THREE_DECIMAL_CURRENCIES: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// Parses a non-negative decimal amount, rounded to [`CREDIT_SCALE`].
///
/// Returns `None` for empty, non-numeric or negative input.
#[must_use]
pub fn parse_credit_amount(raw: &str) -> Option<Decimal> {
    let value = Decimal::from_str(raw.trim()).ok()?;
    if value.is_zero() {
        return Some(Decimal::ZERO);
    }
    if value.is_sign_negative() {
        return None;
    }
    Some(value.round_dp_with_strategy(CREDIT_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

/// Parses an optional credit amount; an absent value is zero.
///
/// Returns `None` only when a value was supplied and is invalid.
#[must_use]
pub fn parse_optional_credit_amount(raw: Option<&str>) -> Option<Decimal> {
    raw.map_or(Some(Decimal::ZERO), parse_credit_amount)
}

/// Whether `code` looks like an ISO 4217 code (three ASCII uppercase letters).
#[must_use]
pub fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Number of decimal places of the currency's minor unit.
#[must_use]
pub fn currency_precision(code: &str) -> u32 {
    if ZERO_DECIMAL_CURRENCIES.contains(&code) {
        0
    } else if THREE_DECIMAL_CURRENCIES.contains(&code) {
        3
    } else {
        2
    }
}

/// Converts credits to an amount in `currency` at `rate_amount` per credit.
#[must_use]
pub fn credits_to_currency(credits: Decimal, rate_amount: Decimal, currency: &str) -> Decimal {
    (credits * rate_amount).round_dp_with_strategy(
        currency_precision(currency),
        RoundingStrategy::MidpointAwayFromZero,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credit_amount() {
        assert_eq!(parse_credit_amount("1.00"), Some(Decimal::ONE));
        assert_eq!(parse_credit_amount(" 15 "), Some(Decimal::from(15)));
        assert_eq!(parse_credit_amount("0"), Some(Decimal::ZERO));
        assert_eq!(parse_credit_amount("-0.00"), Some(Decimal::ZERO));
        assert_eq!(
            parse_credit_amount("0.1234567"),
            Some(Decimal::new(12346, 5))
        );

        assert_eq!(parse_credit_amount("-15.00"), None);
        assert_eq!(parse_credit_amount("abc"), None);
        assert_eq!(parse_credit_amount(""), None);
    }

    #[test]
    fn test_parse_optional_credit_amount() {
        assert_eq!(parse_optional_credit_amount(None), Some(Decimal::ZERO));
        assert_eq!(parse_optional_credit_amount(Some("2.5")), Some(Decimal::new(25, 1)));
        assert_eq!(parse_optional_credit_amount(Some("two")), None);
    }

    #[test]
    fn test_currency_validation() {
        assert!(is_valid_currency("EUR"));
        assert!(!is_valid_currency("eur"));
        assert!(!is_valid_currency("EURO"));
        assert!(!is_valid_currency(""));
    }

    #[test]
    fn test_credits_to_currency_rounds_to_minor_unit() {
        let rate = Decimal::new(15, 1); // 1.5
        assert_eq!(
            credits_to_currency(Decimal::new(3333, 3), rate, "EUR"),
            Decimal::new(500, 2)
        );
        assert_eq!(
            credits_to_currency(Decimal::new(3333, 3), rate, "JPY"),
            Decimal::from(5)
        );
        assert_eq!(
            credits_to_currency(Decimal::new(3333, 3), rate, "KWD"),
            Decimal::new(5000, 3)
        );
    }
}
