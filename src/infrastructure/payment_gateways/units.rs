//! Money unit conversion. The ledger's unit is always integer minor units;
//! providers that speak decimal major-unit strings (PayPal, Mollie) are
//! converted exactly once, here, by the adapter that owns the call.

use super::GatewayError;

/// ISO-4217 exponent, limited to the currencies the platform sells in.
/// Zero-decimal currencies have no fractional unit on the wire.
fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "JPY" | "KRW" | "VND" => 0,
        _ => 2,
    }
}

/// 1999 minor units of USD -> "19.99"; 500 minor units of JPY -> "500".
pub fn minor_to_major_string(amount_minor: i64, currency: &str) -> String {
    let exponent = currency_exponent(currency);
    if exponent == 0 {
        return amount_minor.to_string();
    }

    let factor = 10_i64.pow(exponent);
    let sign = if amount_minor < 0 { "-" } else { "" };
    let magnitude = amount_minor.unsigned_abs();
    let units = magnitude / factor as u64;
    let fraction = magnitude % factor as u64;
    format!("{sign}{units}.{fraction:0width$}", width = exponent as usize)
}

/// Parses a provider's decimal major-unit string back into minor units.
/// Rejects more fractional digits than the currency carries rather than
/// rounding; a provider sending "19.999" USD is a bug we want to see.
pub fn major_string_to_minor(amount: &str, currency: &str) -> Result<i64, GatewayError> {
    let exponent = currency_exponent(currency);
    let trimmed = amount.trim();
    let (sign, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1_i64, rest),
        None => (1_i64, trimmed),
    };

    let (units_part, fraction_part) = match unsigned.split_once('.') {
        Some((units, fraction)) => (units, fraction),
        None => (unsigned, ""),
    };

    if units_part.is_empty() || !units_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GatewayError::Provider(format!(
            "unparseable amount: {amount:?}"
        )));
    }
    if fraction_part.len() > exponent as usize
        || !fraction_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(GatewayError::Provider(format!(
            "amount {amount:?} does not fit currency {currency}"
        )));
    }

    let factor = 10_i64.pow(exponent);
    let units: i64 = units_part
        .parse()
        .map_err(|_| GatewayError::Provider(format!("amount out of range: {amount:?}")))?;
    let mut fraction: i64 = if fraction_part.is_empty() {
        0
    } else {
        fraction_part
            .parse()
            .map_err(|_| GatewayError::Provider(format!("unparseable amount: {amount:?}")))?
    };
    for _ in fraction_part.len()..exponent as usize {
        fraction *= 10;
    }

    units
        .checked_mul(factor)
        .and_then(|minor| minor.checked_add(fraction))
        .map(|minor| sign * minor)
        .ok_or_else(|| GatewayError::Provider(format!("amount out of range: {amount:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_two_decimal_currencies() {
        assert_eq!(minor_to_major_string(1999, "USD"), "19.99");
        assert_eq!(minor_to_major_string(500, "EUR"), "5.00");
        assert_eq!(minor_to_major_string(7, "USD"), "0.07");
    }

    #[test]
    fn formats_zero_decimal_currencies() {
        assert_eq!(minor_to_major_string(500, "JPY"), "500");
    }

    #[test]
    fn parses_major_strings_back_to_minor() {
        assert_eq!(major_string_to_minor("19.99", "USD").unwrap(), 1999);
        assert_eq!(major_string_to_minor("19.9", "USD").unwrap(), 1990);
        assert_eq!(major_string_to_minor("19", "USD").unwrap(), 1900);
        assert_eq!(major_string_to_minor("500", "JPY").unwrap(), 500);
    }

    #[test]
    fn round_trips_minor_amounts() {
        for amount in [0_i64, 1, 99, 100, 1999, 123_456_789] {
            let major = minor_to_major_string(amount, "USD");
            assert_eq!(major_string_to_minor(&major, "USD").unwrap(), amount);
        }
    }

    #[test]
    fn rejects_excess_precision() {
        assert!(major_string_to_minor("19.999", "USD").is_err());
        assert!(major_string_to_minor("1.5", "JPY").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(major_string_to_minor("19,99", "USD").is_err());
        assert!(major_string_to_minor("", "USD").is_err());
        assert!(major_string_to_minor("abc", "USD").is_err());
    }
}
