//! Cache timestamps and freshness bands.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Display format for cache timestamps handed to the web layer.
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Coarse age band of a cached node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Good,
    Moderate,
    Old,
    Unknown,
}

impl Freshness {
    /// Band for a cache entry of the given age.
    ///
    /// Fresh up to 3 days, good up to 10, moderate up to 20, old beyond.
    pub fn from_age(age: TimeDelta) -> Self {
        let days = age_days(age);
        if days <= 3.0 {
            Freshness::Fresh
        } else if days <= 10.0 {
            Freshness::Good
        } else if days <= 20.0 {
            Freshness::Moderate
        } else {
            Freshness::Old
        }
    }

    pub fn of(cached_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        cached_at.map_or(Freshness::Unknown, |at| Freshness::from_age(now - at))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Good => "good",
            Freshness::Moderate => "moderate",
            Freshness::Old => "old",
            Freshness::Unknown => "unknown",
        }
    }
}

/// Fractional days in `age`.
pub fn age_days(age: TimeDelta) -> f64 {
    age.num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 as well as naive `YYYY-MM-DD HH:MM:SS[.f]` values, which are read as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(DISPLAY_FORMAT).to_string()
}
