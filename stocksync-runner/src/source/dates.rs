//! Date formats used by the exchange and the filings system.

use chrono::{NaiveDate, NaiveDateTime};
use stocksync_core::error::SourceError;

const MK_MONTHS: [&str; 12] = [
    "јануари",
    "февруари",
    "март",
    "април",
    "мај",
    "јуни",
    "јули",
    "август",
    "септември",
    "октомври",
    "ноември",
    "декември",
];

/// `Friday, January 10, 2025`
pub fn parse_english_long(raw: &str) -> Result<NaiveDate, SourceError> {
    NaiveDate::parse_from_str(raw.trim(), "%A, %B %d, %Y")
        .map_err(|e| SourceError::ResponseFormat(format!("english date '{raw}': {e}")))
}

/// `петок, 10 јануари 2025`
pub fn parse_macedonian_long(raw: &str) -> Result<NaiveDate, SourceError> {
    let bad = |why: &str| SourceError::ResponseFormat(format!("macedonian date '{raw}': {why}"));

    let parts: Vec<&str> = raw.split_whitespace().collect();
    let [_, day, month, year] = parts.as_slice() else {
        return Err(bad("expected four fields"));
    };
    let day: u32 = day.parse().map_err(|_| bad("day"))?;
    let month = MK_MONTHS
        .iter()
        .position(|m| *m == month.to_lowercase())
        .ok_or_else(|| bad("month"))?;
    let year: i32 = year.parse().map_err(|_| bad("year"))?;

    NaiveDate::from_ymd_opt(year, month as u32 + 1, day).ok_or_else(|| bad("out of range"))
}

/// `2024-01-12T10:22:33.123` (fractional seconds optional).
pub fn parse_published(raw: &str) -> Result<NaiveDate, SourceError> {
    let whole_seconds = raw.split('.').next().unwrap_or(raw);
    NaiveDateTime::parse_from_str(whole_seconds, "%Y-%m-%dT%H:%M:%S")
        .map(|dt| dt.date())
        .map_err(|e| SourceError::ResponseFormat(format!("published date '{raw}': {e}")))
}

/// Date parameter format of the history page: `dd,mm,yyyy`.
pub fn history_param(date: NaiveDate) -> String {
    date.format("%d,%m,%Y").to_string()
}

/// Timestamp parameter format of the filings search.
pub fn filings_param(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn english_long_form() {
        assert_eq!(parse_english_long("Friday, January 10, 2025").unwrap(), d(2025, 1, 10));
        assert!(parse_english_long("10/01/2025").is_err());
    }

    #[test]
    fn macedonian_long_form() {
        assert_eq!(parse_macedonian_long("петок, 10 јануари 2025").unwrap(), d(2025, 1, 10));
        assert_eq!(parse_macedonian_long("среда, 4 декември 2024").unwrap(), d(2024, 12, 4));
        assert!(parse_macedonian_long("петок, 10 јануар 2025").is_err());
        assert!(parse_macedonian_long("10 јануари 2025").is_err());
    }

    #[test]
    fn published_timestamp_drops_fraction() {
        assert_eq!(parse_published("2024-01-12T10:22:33.123").unwrap(), d(2024, 1, 12));
        assert_eq!(parse_published("2024-01-12T10:22:33").unwrap(), d(2024, 1, 12));
        assert!(parse_published("12.01.2024").is_err());
    }

    #[test]
    fn request_parameters() {
        assert_eq!(history_param(d(2024, 1, 5)), "05,01,2024");
        let at = d(2024, 1, 5).and_hms_opt(8, 0, 0).unwrap();
        assert_eq!(filings_param(at), "2024-01-05T08:00:00");
    }
}
