//! Human-readable byte sizes ("16K", "4M", "1.5G") for CLI and config values.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeParseError {
    #[error("empty size value")]
    Empty,
    #[error("invalid size value: {0}")]
    InvalidNumber(String),
    #[error("unknown size unit: {0}")]
    UnknownUnit(char),
}

/// Convert a human-readable size string into a byte count.
///
/// Accepts a plain integer ("4096"), a decimal with a unit ("1.5M") or an
/// integer with a unit ("128K"). Units are case-insensitive and an optional
/// trailing "B" is tolerated ("64KB").
pub fn parse_size(input: &str) -> Result<u64, SizeParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SizeParseError::Empty);
    }

    let lower = trimmed.to_ascii_lowercase();
    let mut number = lower.as_str();
    let mut multiplier = 1u64;

    if let Some(stripped) = number.strip_suffix('b') {
        number = stripped;
    }
    if let Some(last) = number.chars().last()
        && last.is_ascii_alphabetic()
    {
        multiplier = match last {
            'k' => 1 << 10,
            'm' => 1 << 20,
            'g' => 1 << 30,
            other => return Err(SizeParseError::UnknownUnit(other)),
        };
        number = &number[..number.len() - 1];
    }

    let value: f64 = number
        .parse()
        .map_err(|_| SizeParseError::InvalidNumber(trimmed.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(SizeParseError::InvalidNumber(trimmed.to_string()));
    }

    Ok((value * multiplier as f64).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_bytes() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("4096").unwrap(), 4096);
    }

    #[test]
    fn test_units() {
        assert_eq!(parse_size("16K").unwrap(), 16 * 1024);
        assert_eq!(parse_size("4M").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_case_and_byte_suffix() {
        assert_eq!(parse_size("16k").unwrap(), 16 * 1024);
        assert_eq!(parse_size("64KB").unwrap(), 64 * 1024);
        assert_eq!(parse_size(" 128K ").unwrap(), 128 * 1024);
    }

    #[test]
    fn test_decimal_values() {
        assert_eq!(parse_size("1.5M").unwrap(), 1_572_864);
        assert_eq!(parse_size("0.5K").unwrap(), 512);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(parse_size(""), Err(SizeParseError::Empty)));
        assert!(matches!(
            parse_size("12X"),
            Err(SizeParseError::UnknownUnit('x'))
        ));
        assert!(matches!(
            parse_size("abc"),
            Err(SizeParseError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_size("-1K"),
            Err(SizeParseError::InvalidNumber(_))
        ));
    }
}
