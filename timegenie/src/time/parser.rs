//! Free-text time parsing
//!
//! The intake flow only depends on the `TimeParser` trait. The built-in
//! `SimpleTimeParser` understands absolute dates, `today`/`tomorrow`,
//! relative durations, and an optional trailing zone id that overrides
//! the configured zone.

use super::{parse_zone, RawTime, TimeRejection};
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// Turns user text into a candidate timestamp
pub trait TimeParser: Send + Sync {
    fn parse(&self, text: &str, reference_now: DateTime<Utc>) -> Result<RawTime, TimeRejection>;
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

const TIME_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S"];

/// Parser for a fixed set of formats, interpreting wall-clock input in
/// `zone` unless the text names another zone
#[derive(Debug, Clone)]
pub struct SimpleTimeParser {
    zone: String,
}

impl SimpleTimeParser {
    pub fn new(zone: impl Into<String>) -> Self {
        Self { zone: zone.into() }
    }

    /// Split a trailing zone token off `text`
    fn split_zone<'a>(&'a self, text: &'a str) -> Result<(&'a str, &'a str), TimeRejection> {
        if let Some((rest, last)) = text.rsplit_once(char::is_whitespace) {
            if last.parse::<Tz>().is_ok() {
                return Ok((rest.trim_end(), last));
            }
            if last.contains('/') {
                return Err(TimeRejection::UnknownZone(last.to_string()));
            }
        }
        Ok((text, self.zone.as_str()))
    }
}

impl TimeParser for SimpleTimeParser {
    fn parse(&self, text: &str, reference_now: DateTime<Utc>) -> Result<RawTime, TimeRejection> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TimeRejection::Unparseable);
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(RawTime::Aware(dt));
        }

        let (text, zone) = self.split_zone(text)?;
        let lowered = text.to_lowercase();

        for format in DATE_TIME_FORMATS {
            if let Ok(local) = NaiveDateTime::parse_from_str(text, format) {
                return Ok(RawTime::naive(local, zone));
            }
        }

        if let Some((day, time)) = lowered.split_once(char::is_whitespace) {
            let offset_days = match day {
                "today" => Some(0),
                "tomorrow" => Some(1),
                _ => None,
            };

            if let Some(offset_days) = offset_days {
                let time = parse_time_of_day(time.trim()).ok_or(TimeRejection::Unparseable)?;
                let tz = parse_zone(zone)?;
                let date = reference_now.with_timezone(&tz).date_naive() + Duration::days(offset_days);
                return Ok(RawTime::naive(date.and_time(time), zone));
            }
        }

        let relative = lowered.strip_prefix("in ").unwrap_or(&lowered);
        if let Some(seconds) = parse_duration(relative) {
            // Huge durations are valid text but land outside chrono's range
            return Duration::try_seconds(seconds)
                .and_then(|delta| reference_now.checked_add_signed(delta))
                .map(RawTime::from)
                .ok_or(TimeRejection::Unparseable);
        }

        Err(TimeRejection::Unparseable)
    }
}

fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
}

/// Parse a duration like "30m", "2h", "1d" or "1h30m" into seconds
pub fn parse_duration(text: &str) -> Option<i64> {
    let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut total_seconds: i64 = 0;
    let mut current_number = String::new();

    for c in text.chars() {
        if c.is_ascii_digit() {
            current_number.push(c);
            continue;
        }

        if current_number.is_empty() {
            return None;
        }

        let value: i64 = current_number.parse().ok()?;
        current_number.clear();

        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 60 * 60 * 24,
            'w' => 60 * 60 * 24 * 7,
            _ => return None,
        };
        total_seconds = total_seconds.checked_add(value.checked_mul(unit)?)?;
    }

    // A trailing number without a unit is ambiguous
    if !current_number.is_empty() || total_seconds == 0 {
        return None;
    }

    Some(total_seconds)
}
