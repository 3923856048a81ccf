//! Parsing user-typed dates and rendering durations compactly.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{IanError, IanResult};

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %I:%M%p",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %I:%M%p",
    "%d-%m-%Y %H:%M",
    "%d %b %Y %H:%M",
    "%d %B %Y %H:%M",
    "%b %d %Y %H:%M",
    "%B %d %Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d %b %Y", "%d %B %Y", "%b %d %Y", "%B %d %Y",
];

// Parsed with the current year prepended.
const YEARLESS_DATE_TIME_FORMATS: &[&str] = &[
    "%d/%m %H:%M",
    "%d/%m %I:%M%p",
    "%d %b %H:%M",
    "%d %B %H:%M",
    "%b %d %H:%M",
    "%B %d %H:%M",
];

const YEARLESS_DATE_FORMATS: &[&str] = &["%d/%m", "%d %b", "%d %B", "%b %d", "%B %d"];

/// Parse a date or date-time in one of the common layouts, read in `tz`.
///
/// RFC 3339 input keeps its own offset. A missing year means the current one.
pub fn parse_date_time(input: &str, tz: Tz) -> IanResult<DateTime<Utc>> {
    parse_date_time_at(input, tz, Utc::now())
}

/// [`parse_date_time`] with an explicit "now" for the year fallback.
pub fn parse_date_time_at(input: &str, tz: Tz, now: DateTime<Utc>) -> IanResult<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(input) {
        return Ok(t.with_timezone(&Utc));
    }

    let year = now.with_timezone(&tz).year();
    let with_year = format!("{year} {input}");

    let naive = DATE_TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(input, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(input, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            YEARLESS_DATE_TIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(&with_year, &format!("%Y {f}")).ok())
        })
        .or_else(|| {
            YEARLESS_DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(&with_year, &format!("%Y {f}")).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| {
            IanError::Validation(format!("'{input}' does not match any date/time format"))
        })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| IanError::Validation(format!("'{input}' does not exist in {tz}")))
}

/// Render at most the two largest units, e.g. `1d 2h`, `1h 30m`, `45s`.
/// Five days or more render as days only.
pub fn format_duration(d: Duration) -> String {
    let sign = if d < Duration::zero() { "-" } else { "" };
    let total = d.num_seconds().unsigned_abs();

    let days = total / 86_400;
    let units = [
        (days, "d"),
        (total % 86_400 / 3600, "h"),
        (total % 3600 / 60, "m"),
        (total % 60, "s"),
    ];

    let Some(first) = units.iter().position(|(n, _)| *n > 0) else {
        return "0s".to_string();
    };

    let mut parts = vec![format!("{}{}", units[first].0, units[first].1)];
    if days < 5 {
        if let Some((n, unit)) = units.get(first + 1).filter(|(n, _)| *n > 0) {
            parts.push(format!("{n}{unit}"));
        }
    }

    format!("{sign}{}", parts.join(" "))
}
