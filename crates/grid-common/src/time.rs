//! Time handling for dataset time axes.
//!
//! Time coordinates are carried as whole seconds since the Unix epoch
//! (`ArrayValues::Time`). Datasets encode them either as CF numeric offsets
//! (`"days since 1981-09-01"`) or as text, and requests select a step with a
//! date such as `"2024-01-15"` or `"2024-01-15T12:00:00Z"`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a timestamp string found in a dataset or a request.
///
/// Accepts RFC 3339, naive date-times (assumed UTC, `T` or space separated,
/// optional fractional seconds) and bare dates (midnight UTC).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = s
        .strip_suffix(" UTC")
        .or_else(|| s.strip_suffix('Z'))
        .unwrap_or(s);

    for fmt in DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .ok_or_else(|| TimeParseError::InvalidFormat(s.to_string()))
}

/// Parse a time selector from a request.
///
/// Only the date portion (everything before the first `T`) is significant;
/// the result is midnight UTC of that date.
pub fn parse_time_selector(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let date = s.trim().split('T').next().unwrap_or_default();
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| TimeParseError::InvalidFormat(s.to_string()))?;
    date.and_hms_opt(0, 0, 0)
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .ok_or_else(|| TimeParseError::InvalidFormat(s.to_string()))
}

/// Format seconds since the epoch the way time values are reported.
pub fn format_timestamp(seconds: i64) -> String {
    match Utc.timestamp_opt(seconds, 0).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => seconds.to_string(),
    }
}

/// CF-convention time units, e.g. `"hours since 1900-01-01 00:00:00"`.
///
/// Calendars other than the standard one are decoded as proleptic Gregorian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfTimeUnits {
    seconds_per_unit: f64,
    epoch: i64,
}

impl CfTimeUnits {
    pub fn parse(units: &str) -> Result<Self, TimeParseError> {
        let (unit, since) = units
            .split_once(" since ")
            .ok_or_else(|| TimeParseError::InvalidUnits(units.to_string()))?;

        let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3_600.0,
            "days" | "day" | "d" => 86_400.0,
            "weeks" | "week" => 604_800.0,
            _ => return Err(TimeParseError::InvalidUnits(units.to_string())),
        };

        let epoch = parse_timestamp(since)
            .map_err(|_| TimeParseError::InvalidUnits(units.to_string()))?
            .timestamp();

        Ok(Self {
            seconds_per_unit,
            epoch,
        })
    }

    /// Decode an encoded offset to seconds since the Unix epoch.
    ///
    /// Returns `None` for fill values (NaN or infinite).
    pub fn decode(&self, value: f64) -> Option<i64> {
        if !value.is_finite() {
            return None;
        }
        Some(self.epoch + (value * self.seconds_per_unit).round() as i64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported time units: {0}")]
    InvalidUnits(String),
}
