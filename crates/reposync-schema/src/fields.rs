//! Lenient conversions for index field text.
//!
//! A malformed field never aborts parsing: numbers fall back to a sentinel and
//! dates to `None`, so one bad value does not discard an otherwise valid record.

use chrono::{DateTime, NaiveDate};

/// Parse a decimal integer, returning `fallback` when absent or malformed.
///
/// # Example
///
/// ```
/// use reposync_schema::fields::parse_int_or;
///
/// assert_eq!(parse_int_or(Some("42"), -1), 42);
/// assert_eq!(parse_int_or(Some("4x2"), -1), -1);
/// assert_eq!(parse_int_or(None, 0), 0);
/// ```
pub fn parse_int_or<T: std::str::FromStr>(s: Option<&str>, fallback: T) -> T {
    s.and_then(|s| s.trim().parse().ok()).unwrap_or(fallback)
}

/// Parse an index date (`YYYY-MM-DD`), tolerating RFC 3339 timestamps.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
}

/// Collapse every run of whitespace into a single space.
///
/// # Example
///
/// ```
/// use reposync_schema::fields::collapse_whitespace;
///
/// assert_eq!(collapse_whitespace("Main\n\t  Repo"), "Main Repo");
/// ```
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_parsing_sentinels() {
        assert_eq!(parse_int_or::<i32>(Some(" 7 "), -1), 7);
        assert_eq!(parse_int_or::<i32>(Some(""), -1), -1);
        assert_eq!(parse_int_or::<i64>(Some("12345678901"), 0), 12_345_678_901);
        assert_eq!(parse_int_or::<i32>(Some("99999999999"), -1), -1);
    }

    #[test]
    fn date_parsing() {
        assert_eq!(
            parse_date("2015-06-01"),
            NaiveDate::from_ymd_opt(2015, 6, 1)
        );
        assert_eq!(
            parse_date("2015-06-01T10:00:00Z"),
            NaiveDate::from_ymd_opt(2015, 6, 1)
        );
        assert_eq!(parse_date("yesterday"), None);
        assert_eq!(parse_date("2015-13-40"), None);
    }

    #[test]
    fn whitespace_runs_collapse_without_trimming() {
        assert_eq!(collapse_whitespace("  a  b "), " a b ");
        assert_eq!(collapse_whitespace("plain"), "plain");
    }
}
