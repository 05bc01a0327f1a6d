//! Duration resolution
//!
//! A client asks for an auto-revert either relative to now
//! (`minutes`/`seconds`/`milliseconds`) or at an absolute `end_date`.
//! Both resolve to a single offset from "now"; anything that is not strictly
//! positive means no revert is armed.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::RelayError;

/// Client-supplied revert duration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationSpec {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub minutes: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seconds: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub milliseconds: i64,
    #[serde(default, alias = "endDate", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl DurationSpec {
    pub fn relative(minutes: i64, seconds: i64, milliseconds: i64) -> Self {
        Self {
            minutes,
            seconds,
            milliseconds,
            end_date: None,
        }
    }

    pub fn until(end_date: impl Into<String>) -> Self {
        Self {
            end_date: Some(end_date.into()),
            ..Self::default()
        }
    }

    /// Raw offset from `now` in milliseconds; may be zero or negative.
    ///
    /// An empty `end_date` string counts as absent.
    pub fn offset_millis(&self, now: DateTime<Utc>) -> Result<i64, RelayError> {
        match self.end_date.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => {
                let end = parse_end_date(raw)?;
                Ok(end.signed_duration_since(now).num_milliseconds())
            }
            None => Ok(self
                .minutes
                .saturating_mul(60_000)
                .saturating_add(self.seconds.saturating_mul(1_000))
                .saturating_add(self.milliseconds)),
        }
    }
}

/// Resolve an optional spec to the delay before the revert fires.
///
/// `Ok(None)` means no revert: no spec, a zero/negative offset, or an
/// `end_date` already in the past.
pub fn resolve(
    spec: Option<&DurationSpec>,
    now: DateTime<Utc>,
) -> Result<Option<Duration>, RelayError> {
    let Some(spec) = spec else {
        return Ok(None);
    };
    let millis = spec.offset_millis(now)?;
    if millis <= 0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_millis(millis.unsigned_abs())))
}

/// Parse an absolute end timestamp.
///
/// Accepts RFC 3339 (`2019-10-10T10:00:00Z`, `2019-10-10T10:00:00-05:00`),
/// RFC 3339 with an extra `Z` appended after the offset
/// (`2019-10-10T10:00:00-05:00Z`, as older clients echo it back), and a bare
/// `2019-10-10T10:00:00[.fff]` taken as UTC.
pub fn parse_end_date(raw: &str) -> Result<DateTime<Utc>, RelayError> {
    let trimmed = raw.trim();
    let stripped = trimmed.strip_suffix('Z').unwrap_or(trimmed);

    DateTime::parse_from_rfc3339(stripped)
        .or_else(|_| DateTime::parse_from_rfc3339(trimmed))
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        })
        .map_err(|_| RelayError::InvalidDurationFormat {
            value: raw.to_string(),
        })
}
