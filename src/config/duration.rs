//! Duration strings such as `90s`, `5m`, `1h30m`.

use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Parses a duration string made of `<number><unit>` segments.
///
/// Units are `ms`, `s`, `m` and `h`.
///
/// # Errors
///
/// Returns an error if the string is empty or malformed.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let invalid = || ConfigError::InvalidDuration {
        value: value.to_string(),
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid().into());
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits_end == 0 {
            return Err(invalid().into());
        }
        let (digits, tail) = rest.split_at(digits_end);
        let amount: u64 = digits.parse().map_err(|_| invalid())?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let segment = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "h" => Duration::from_secs(amount.saturating_mul(3600)),
            _ => return Err(invalid().into()),
        };

        total = total.saturating_add(segment);
        rest = next;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        assert_eq!(parse_duration("90s").expect("valid"), Duration::from_secs(90));
        assert_eq!(parse_duration("5m").expect("valid"), Duration::from_secs(300));
        assert_eq!(parse_duration("250ms").expect("valid"), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_compound() {
        assert_eq!(
            parse_duration("1h30m").expect("valid"),
            Duration::from_secs(5400)
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5d").is_err());
    }
}
