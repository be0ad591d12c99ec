use crate::error::{CoreError, Result};

/// Binary and decimal suffixes as (numerator, denominator) of the multiplier
const SUFFIXES: &[(&str, i128, i128)] = &[
    ("Ki", 1 << 10, 1),
    ("Mi", 1 << 20, 1),
    ("Gi", 1 << 30, 1),
    ("Ti", 1 << 40, 1),
    ("Pi", 1 << 50, 1),
    ("Ei", 1 << 60, 1),
    ("n", 1, 1_000_000_000),
    ("u", 1, 1_000_000),
    ("m", 1, 1_000),
    ("k", 1_000, 1),
    ("M", 1_000_000, 1),
    ("G", 1_000_000_000, 1),
    ("T", 1_000_000_000_000, 1),
    ("P", 1_000_000_000_000_000, 1),
    ("E", 1_000_000_000_000_000_000, 1),
];

/// Parse a quantity into base units, rounding up (e.g. "128Mi" -> 134217728, "1500m" -> 2)
pub fn parse_quantity(s: &str) -> Result<i64> {
    scaled(s, 1)
}

/// Parse a quantity into thousandths of a unit (e.g. "2" -> 2000, "0.5" -> 500, "100m" -> 100)
pub fn parse_milli_quantity(s: &str) -> Result<i64> {
    scaled(s, 1_000)
}

fn scaled(s: &str, scale: i128) -> Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CoreError::invalid_quantity(s, "empty quantity"));
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let (negative, digits) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };

    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(CoreError::invalid_quantity(s, "missing numeric value"));
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return Err(CoreError::invalid_quantity(s, "malformed number"));
    }
    if frac_part.len() > 18 {
        return Err(CoreError::invalid_quantity(s, "too many fractional digits"));
    }

    let mantissa: i128 = format!("{}{}", int_part, frac_part)
        .parse()
        .map_err(|e| CoreError::invalid_quantity(s, format!("{}", e)))?;
    let mut numerator = mantissa * scale;
    let mut denominator: i128 = 10i128.pow(frac_part.len() as u32);

    if let Some((_, num, den)) = SUFFIXES.iter().find(|(name, _, _)| *name == suffix) {
        numerator *= num;
        denominator *= den;
    } else if let Some(exp) = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
        .and_then(|e| e.parse::<i32>().ok())
    {
        if exp.abs() > 18 {
            return Err(CoreError::invalid_quantity(s, "exponent out of range"));
        }
        if exp >= 0 {
            numerator *= 10i128.pow(exp as u32);
        } else {
            denominator *= 10i128.pow(exp.unsigned_abs());
        }
    } else if !suffix.is_empty() {
        return Err(CoreError::invalid_quantity(
            s,
            format!("unknown suffix '{}'", suffix),
        ));
    }

    // Round away from zero so that fractional requests never under-count
    let mut value = numerator / denominator;
    if numerator % denominator != 0 {
        value += 1;
    }
    if negative {
        value = -value;
    }

    i64::try_from(value).map_err(|_| CoreError::invalid_quantity(s, "value out of range"))
}
