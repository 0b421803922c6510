//! Kubernetes resource quantity parsing.
//!
//! Quantities are converted to milli-units with the same rounding the API
//! machinery applies (ceiling), so `"100m"` CPU becomes `100` and `"1Mi"`
//! memory becomes `1_048_576_000`.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Quantity parse failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid number in quantity `{0}`")]
    InvalidNumber(String),
    #[error("unknown suffix `{suffix}` in quantity `{quantity}`")]
    UnknownSuffix { quantity: String, suffix: String },
}

/// Parses a quantity string into milli-units, rounding up.
///
/// Values that do not fit in an `i64` saturate.
pub fn parse_milli(quantity: &str) -> Result<i64, QuantityError> {
    let trimmed = quantity.trim();
    if trimmed.is_empty() {
        return Err(QuantityError::Empty);
    }

    let (negative, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let number_end = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_end);

    let (mantissa, scale) = parse_decimal(number)
        .ok_or_else(|| QuantityError::InvalidNumber(quantity.to_string()))?;
    let (binary_multiplier, exponent) =
        suffix_factor(suffix).ok_or_else(|| QuantityError::UnknownSuffix {
            quantity: quantity.to_string(),
            suffix: suffix.to_string(),
        })?;

    let Some(value) = mantissa.checked_mul(binary_multiplier) else {
        return Ok(saturate(negative));
    };

    // +3 converts base units to milli-units.
    let exponent = exponent + 3 - scale;
    let milli = if exponent >= 0 {
        match 10_i128
            .checked_pow(exponent as u32)
            .and_then(|factor| value.checked_mul(factor))
        {
            Some(milli) => milli,
            None => return Ok(saturate(negative)),
        }
    } else {
        match 10_i128.checked_pow(exponent.unsigned_abs()) {
            Some(divisor) => ceil_div(value, divisor),
            None => i128::from(value > 0),
        }
    };

    let milli = i64::try_from(milli).unwrap_or(i64::MAX);
    Ok(if negative { -milli } else { milli })
}

/// Milli-value of a quantity, or zero when it cannot be parsed.
pub fn milli_value(quantity: &Quantity) -> i64 {
    match parse_milli(&quantity.0) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(quantity = %quantity.0, "Ignoring malformed quantity: {e}");
            0
        }
    }
}

/// Base value (milli-value / 1000) of a quantity, used for byte-denominated resources.
pub fn base_value(quantity: &Quantity) -> i64 {
    milli_value(quantity) / 1000
}

/// Looks up a resource in a quantity map and returns its milli-value.
pub fn resource_milli(resources: Option<&BTreeMap<String, Quantity>>, name: &str) -> Option<i64> {
    resources.and_then(|map| map.get(name)).map(milli_value)
}

fn parse_decimal(number: &str) -> Option<(i128, i32)> {
    if number.is_empty() || number == "." {
        return None;
    }
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if fraction.contains('.') {
        return None;
    }
    // Digits beyond i128 precision carry no meaning for resource figures.
    let fraction = &fraction[..fraction.len().min(18)];
    let digits = format!("{whole}{fraction}");
    let mantissa = digits.parse::<i128>().ok()?;
    Some((mantissa, fraction.len() as i32))
}

fn suffix_factor(suffix: &str) -> Option<(i128, i32)> {
    let factor = match suffix {
        "" => (1, 0),
        "n" => (1, -9),
        "u" => (1, -6),
        "m" => (1, -3),
        "k" => (1, 3),
        "M" => (1, 6),
        "G" => (1, 9),
        "T" => (1, 12),
        "P" => (1, 15),
        "E" => (1, 18),
        "Ki" => (1 << 10, 0),
        "Mi" => (1 << 20, 0),
        "Gi" => (1 << 30, 0),
        "Ti" => (1 << 40, 0),
        "Pi" => (1 << 50, 0),
        "Ei" => (1 << 60, 0),
        other => {
            let exponent = other
                .strip_prefix('e')
                .or_else(|| other.strip_prefix('E'))?;
            (1, exponent.parse::<i32>().ok()?)
        }
    };
    Some(factor)
}

fn ceil_div(value: i128, divisor: i128) -> i128 {
    let quotient = value / divisor;
    if value % divisor > 0 {
        quotient + 1
    } else {
        quotient
    }
}

fn saturate(negative: bool) -> i64 {
    if negative {
        i64::MIN
    } else {
        i64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpu_quantities() {
        assert_eq!(parse_milli("100m"), Ok(100));
        assert_eq!(parse_milli("1"), Ok(1000));
        assert_eq!(parse_milli("0.5"), Ok(500));
        assert_eq!(parse_milli("2.25"), Ok(2250));
        assert_eq!(parse_milli("250000u"), Ok(250));
    }

    #[test]
    fn rounds_sub_milli_values_up() {
        assert_eq!(parse_milli("1n"), Ok(1));
        assert_eq!(parse_milli("1500u"), Ok(2));
    }

    #[test]
    fn parses_memory_quantities() {
        assert_eq!(parse_milli("1Ki"), Ok(1_024_000));
        assert_eq!(parse_milli("128Mi"), Ok(128 * 1_048_576 * 1000));
        assert_eq!(parse_milli("1G"), Ok(1_000_000_000_000));
        assert_eq!(parse_milli("1e3"), Ok(1_000_000));
        assert_eq!(base_value(&Quantity("64Mi".to_string())), 64 * 1_048_576);
    }

    #[test]
    fn rejects_malformed_quantities() {
        assert_eq!(parse_milli(""), Err(QuantityError::Empty));
        assert!(matches!(
            parse_milli("abc"),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_milli("10Qi"),
            Err(QuantityError::UnknownSuffix { .. })
        ));
        assert_eq!(milli_value(&Quantity("bogus".to_string())), 0);
    }

    #[test]
    fn saturates_huge_values() {
        assert_eq!(parse_milli("100Ei"), Ok(i64::MAX));
    }
}
