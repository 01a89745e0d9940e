use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount `{0}` is not a decimal number")]
    Unparseable(String),
    #[error("amount `{0}` is negative")]
    Negative(String),
    #[error("amount `{0}` does not fit in minor units")]
    Overflow(String),
    #[error("amount `{0}` must be greater than zero")]
    NotPositive(String),
}

/// Truncates toward zero to two places; never reports more than was charged.
pub fn truncate(amount: Decimal) -> Decimal {
    let mut out = amount.round_dp_with_strategy(2, RoundingStrategy::ToZero);
    out.rescale(2);
    out
}

/// `1000` -> `"1000.00"`, `1234.5` -> `"1234.50"`, `9.999` -> `"9.99"`.
pub fn to_display_string(amount: Decimal) -> String {
    truncate(amount).to_string()
}

pub fn parse_display(value: &str) -> Result<Decimal, AmountError> {
    let parsed = Decimal::from_str(value.trim())
        .map_err(|_| AmountError::Unparseable(value.to_string()))?;
    if parsed.is_sign_negative() && !parsed.is_zero() {
        return Err(AmountError::Negative(value.to_string()));
    }
    Ok(truncate(parsed))
}

/// Payable amounts: a fee of zero or below cannot start a payment.
pub fn ensure_positive(amount: Decimal) -> Result<Decimal, AmountError> {
    let truncated = truncate(amount);
    if truncated <= Decimal::ZERO {
        return Err(AmountError::NotPositive(to_display_string(amount)));
    }
    Ok(truncated)
}

pub fn to_minor_units(display: &str) -> Result<i64, AmountError> {
    let amount = parse_display(display)?;
    (amount * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| AmountError::Overflow(display.to_string()))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// String-exact comparison of normalized forms. Anything unparseable is a mismatch.
pub fn matches_expected(expected: Decimal, reported: &str) -> bool {
    match parse_display(reported) {
        Ok(amount) => to_display_string(amount) == to_display_string(expected),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn always_two_places() {
        assert_eq!(to_display_string(dec("1000")), "1000.00");
        assert_eq!(to_display_string(dec("1234.5")), "1234.50");
        assert_eq!(to_display_string(dec("0")), "0.00");
    }

    #[test]
    fn truncates_instead_of_rounding() {
        assert_eq!(to_display_string(dec("9.999")), "9.99");
        assert_eq!(to_display_string(dec("10.005")), "10.00");
    }

    #[test]
    fn minor_units_round_trip() {
        for minor in [0_i64, 1, 99, 100, 5000, 123_456] {
            let display = to_display_string(from_minor_units(minor));
            assert_eq!(to_minor_units(&display).unwrap(), minor);
        }
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert_eq!(
            to_minor_units("-1.00"),
            Err(AmountError::Negative("-1.00".to_string()))
        );
        assert!(matches!(to_minor_units("ten"), Err(AmountError::Unparseable(_))));
    }

    #[test]
    fn payable_amounts_are_positive() {
        assert_eq!(ensure_positive(dec("1500")).unwrap().to_string(), "1500.00");
        assert_eq!(
            ensure_positive(dec("0.004")),
            Err(AmountError::NotPositive("0.00".to_string()))
        );
        assert!(ensure_positive(dec("-5")).is_err());
    }

    #[test]
    fn provider_formatting_is_normalized_before_comparison() {
        assert!(matches_expected(dec("100"), "100.0"));
        assert!(matches_expected(dec("100"), " 100.00 "));
        assert!(!matches_expected(dec("100"), "10.00"));
        assert!(!matches_expected(dec("100"), "1,000.0"));
    }
}
