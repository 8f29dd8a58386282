//! Duration parsing (§6): `<int>(h|d|w)`, case-insensitive.

use chrono::Duration;

#[must_use]
pub fn parse(input: &str) -> Option<Duration> {
    let input = input.trim();
    let (digits, unit) = input.split_at_checked(input.len().checked_sub(1)?)?;
    let n: i64 = digits.parse().ok()?;
    match unit.to_ascii_lowercase().as_str() {
        "h" => Some(Duration::hours(n)),
        "d" => Some(Duration::days(n)),
        "w" => Some(Duration::weeks(n)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit_case_insensitively() {
        assert_eq!(parse("8h"), Some(Duration::hours(8)));
        assert_eq!(parse("2D"), Some(Duration::days(2)));
        assert_eq!(parse("1W"), Some(Duration::weeks(1)));
    }

    #[test]
    fn rejects_unknown_unit_or_non_numeric() {
        assert_eq!(parse("8x"), None);
        assert_eq!(parse("abch"), None);
        assert_eq!(parse(""), None);
    }
}
