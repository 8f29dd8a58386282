//! Date parsing (§6): `DD.MM.YYYY`.

use chrono::NaiveDate;

#[must_use]
pub fn parse(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%d.%m.%Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_month_year() {
        assert_eq!(parse("15.01.2024"), Some(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()));
    }

    #[test]
    fn rejects_other_formats() {
        assert_eq!(parse("2024-01-15"), None);
        assert_eq!(parse("not a date"), None);
    }
}
