use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

/// Trailing timezone names ("EDT", "(CET)") that the strict formats below
/// cannot consume. Stripped before the offset and naive formats are retried.
static TRAILING_ZONE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+(?:\([A-Za-z/ ]+\)|[A-Z]{2,5})$").unwrap());

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M %z",
    "%Y-%m-%dT%H:%M:%S%z",
];

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parses the free-form timestamps trackers emit: RFC 3339, RFC 2822,
/// `2013-06-25 11:57:23 +0100`, and offset-less variants (assumed UTC).
pub fn parse_date(input: &str) -> Result<DateTime<FixedOffset>> {
    let trimmed = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Ok(dt);
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }

    // A zone name may follow an offset ("-0700 (PDT)"), so the offset
    // formats get a second chance against the stripped string.
    let stripped = TRAILING_ZONE_NAME.replace(trimmed, "");
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&stripped, fmt) {
            return Ok(dt);
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&stripped, fmt) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(&stripped, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }

    bail!("Unrecognized timestamp: {input}");
}

/// Wall-clock ISO 8601 rendering without the offset, e.g. `2013-06-25T11:57:23`.
pub fn iso_wall_time(dt: &DateTime<FixedOffset>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Fractional days between two instants, rounded to two decimals.
/// Negative when `end` precedes `start`.
pub fn time_diff_days(start: &DateTime<FixedOffset>, end: &DateTime<FixedOffset>) -> f64 {
    let days = (*end - *start).num_seconds() as f64 / 86_400.0;
    (days * 100.0).round() / 100.0
}
