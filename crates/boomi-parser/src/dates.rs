use chrono::{DateTime, NaiveDate, NaiveDateTime};

const DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Parses the timestamp layouts the upstream feeds produce.
///
/// Offsets in RFC 3339 input are normalised to UTC. Date-only input lands on
/// midnight.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.naive_utc());
    }

    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    parse_datetime(text).map(|parsed| parsed.date())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_badge_journal_timestamp() {
        let parsed = parse_datetime("9/1/2016 12:00:05 AM").expect("journal timestamp");
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2016, 9, 1)
                .unwrap()
                .and_hms_opt(0, 0, 5)
                .unwrap()
        );
    }

    #[test]
    fn parses_billing_and_iso_layouts() {
        let expected = NaiveDate::from_ymd_opt(2018, 3, 31).unwrap();
        assert_eq!(parse_date("2018/03/31 23:59:59"), Some(expected));
        assert_eq!(parse_date("2018-03-31"), Some(expected));
        assert_eq!(parse_date("2018-03-31T23:59:59Z"), Some(expected));
        assert_eq!(parse_date("3/31/2018"), Some(expected));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_datetime("not a date"), None);
        assert_eq!(parse_datetime(""), None);
        assert_eq!(parse_datetime("13/45/2016 99:00:00 AM"), None);
    }
}
