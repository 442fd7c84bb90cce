//! Time normalization
//!
//! Everything the engine stores or compares is an absolute UTC instant.
//! `normalize` is the one place a user-supplied timestamp becomes one.

pub mod parser;

pub use parser::{SimpleTimeParser, TimeParser};

use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Why a timestamp could not become a reminder instant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeRejection {
    #[error("that time is not in the future")]
    PastInstant,

    #[error("unknown timezone '{0}'")]
    UnknownZone(String),

    #[error("could not understand that time")]
    Unparseable,
}

/// A timestamp as produced by a `TimeParser`, before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTime {
    /// Carries its own UTC offset
    Aware(DateTime<FixedOffset>),
    /// Wall-clock time in the named IANA zone
    Naive { local: NaiveDateTime, zone: String },
}

impl RawTime {
    pub fn naive(local: NaiveDateTime, zone: impl Into<String>) -> Self {
        RawTime::Naive {
            local,
            zone: zone.into(),
        }
    }
}

impl From<DateTime<Utc>> for RawTime {
    fn from(instant: DateTime<Utc>) -> Self {
        RawTime::Aware(instant.fixed_offset())
    }
}

/// Resolve a zone identifier such as `Europe/Oslo`
pub fn parse_zone(zone: &str) -> Result<Tz, TimeRejection> {
    zone.trim()
        .parse::<Tz>()
        .map_err(|_| TimeRejection::UnknownZone(zone.trim().to_string()))
}

/// Convert `raw` to a UTC instant strictly after `reference_now`.
///
/// Ambiguous wall-clock times (DST fall-back) resolve to the earlier
/// instant; times inside a DST gap do not exist and are unparseable.
pub fn normalize(
    raw: &RawTime,
    reference_now: DateTime<Utc>,
) -> Result<DateTime<Utc>, TimeRejection> {
    let instant = match raw {
        RawTime::Aware(dt) => dt.with_timezone(&Utc),
        RawTime::Naive { local, zone } => {
            let tz = parse_zone(zone)?;
            match tz.from_local_datetime(local) {
                LocalResult::Single(dt) => dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
                LocalResult::None => return Err(TimeRejection::Unparseable),
            }
        }
    };

    if instant <= reference_now {
        return Err(TimeRejection::PastInstant);
    }

    Ok(instant)
}
