//! Kubernetes-style quantity parsing.
//!
//! Volume sizes arrive as quantity literals such as `"1Gi"`, `"500M"` or
//! `"1.5e9"`.  [`parse_quantity`] turns them into an exact byte count using
//! the orchestrator's canonical grammar:
//!
//! ```text
//! <quantity>        ::= <signedNumber><suffix>
//! <signedNumber>    ::= [+-] <digits> | [+-] <digits> . <digits> | [+-] . <digits>
//! <suffix>          ::= <binarySI> | <decimalExponent> | <decimalSI>
//! <binarySI>        ::= Ki | Mi | Gi | Ti | Pi | Ei
//! <decimalSI>       ::= n | u | m | "" | k | M | G | T | P | E
//! <decimalExponent> ::= e <signedInteger> | E <signedInteger>
//! ```
//!
//! Fractional byte counts are rounded up, matching `Quantity.Value()`, so any
//! positive literal, however small its exponent, is at least one byte.

use crate::error::CsiError;

/// Scale applied by a suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    /// Multiply by `1024^n`.
    Binary(u32),
    /// Multiply by `10^n` (may be negative).
    Decimal(i64),
}

/// Parse a quantity literal into a byte count.
///
/// Fails with [`CsiError::InvalidArgument`] carrying the literal when the
/// string does not match the grammar, is negative, or does not fit in `u64`.
pub fn parse_quantity(literal: &str) -> Result<u64, CsiError> {
    parse(literal).map_err(|reason| {
        CsiError::InvalidArgument(format!("invalid size format {literal:?}: {reason}"))
    })
}

fn parse(s: &str) -> Result<u64, &'static str> {
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        Some(_) => (false, s),
        None => return Err("empty quantity"),
    };

    let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    let (int_digits, rest) = rest.split_at(int_len);
    let (frac_digits, suffix) = match rest.strip_prefix('.') {
        Some(after_dot) => {
            let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
            after_dot.split_at(frac_len)
        }
        None => ("", rest),
    };
    if int_digits.is_empty() && frac_digits.is_empty() {
        return Err("missing numeric value");
    }

    let scale = parse_suffix(suffix)?;

    let mut mantissa: u128 = 0;
    for digit in int_digits.bytes().chain(frac_digits.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add(u128::from(digit - b'0')))
            .ok_or("value too large")?;
    }
    if mantissa == 0 {
        return Ok(0);
    }
    if negative {
        return Err("negative quantity");
    }

    // value = mantissa * scale / 10^frac, rounded up
    let frac_exp = i64::try_from(frac_digits.len()).map_err(|_| "value too precise")?;
    let (numerator_scale, decimal_exp) = match scale {
        Scale::Binary(power) => (1u128 << (10 * power), -frac_exp),
        Scale::Decimal(exp) => (1, exp.saturating_sub(frac_exp)),
    };
    let mut numerator = mantissa
        .checked_mul(numerator_scale)
        .ok_or("value too large")?;

    if decimal_exp >= 0 {
        let exp = u32::try_from(decimal_exp).map_err(|_| "value too large")?;
        let factor = 10u128.checked_pow(exp).ok_or("value too large")?;
        numerator = numerator.checked_mul(factor).ok_or("value too large")?;
        return u64::try_from(numerator).map_err(|_| "value too large");
    }

    let denominator = u32::try_from(decimal_exp.unsigned_abs())
        .ok()
        .and_then(|exp| 10u128.checked_pow(exp));
    let value = match denominator {
        Some(denominator) => numerator.div_ceil(denominator),
        // Any positive value divided by more than u128::MAX rounds up to one.
        None => 1,
    };
    u64::try_from(value).map_err(|_| "value too large")
}

fn parse_suffix(suffix: &str) -> Result<Scale, &'static str> {
    let scale = match suffix {
        "" => Scale::Decimal(0),
        "Ki" => Scale::Binary(1),
        "Mi" => Scale::Binary(2),
        "Gi" => Scale::Binary(3),
        "Ti" => Scale::Binary(4),
        "Pi" => Scale::Binary(5),
        "Ei" => Scale::Binary(6),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        other => {
            let exponent = other
                .strip_prefix('e')
                .or_else(|| other.strip_prefix('E'))
                .ok_or("unknown suffix")?;
            Scale::Decimal(parse_exponent(exponent)?)
        }
    };
    Ok(scale)
}

fn parse_exponent(s: &str) -> Result<i64, &'static str> {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("malformed exponent");
    }
    s.parse().map_err(|_| "exponent out of range")
}
