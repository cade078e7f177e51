//! Calendar-date planning for an import run.
//!
//! Dates travel through the pipeline as [`DateKey`] strings (`YYYY-MM-DD`),
//! which sort lexicographically in chronological order. Instants are only
//! materialised when a day is fetched, through [`day_bounds`].

use crate::error::ImportError;
use chrono::{DateTime, Days, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
const DST_PROBE_LIMIT_MINUTES: i64 = 4 * 60;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(String);

impl DateKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format(DATE_FORMAT).to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, ImportError> {
        parse_date("date", raw).map(Self::from_date)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn date(&self) -> Result<NaiveDate, ImportError> {
        parse_date("date key", &self.0)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_date(label: &str, raw: &str) -> Result<NaiveDate, ImportError> {
    let trimmed = raw.trim();
    let parsed = NaiveDate::parse_from_str(trimmed, DATE_FORMAT).map_err(|err| {
        ImportError::InvalidRange(format!(
            "invalid {label} `{trimmed}`, expected YYYY-MM-DD: {err}"
        ))
    })?;
    // chrono accepts unpadded fields; keys must stay lexicographically sortable.
    if parsed.format(DATE_FORMAT).to_string() != trimmed {
        return Err(ImportError::InvalidRange(format!(
            "invalid {label} `{trimmed}`, expected zero-padded YYYY-MM-DD"
        )));
    }
    Ok(parsed)
}

/// Expand `start..=end` into ascending, gap-free date keys.
pub fn plan_range(start: &str, end: &str) -> Result<Vec<DateKey>, ImportError> {
    let start = parse_date("start date", start)?;
    let end = parse_date("end date", end)?;
    if start > end {
        return Err(ImportError::InvalidRange(format!(
            "start date {} is after end date {}",
            start.format(DATE_FORMAT),
            end.format(DATE_FORMAT)
        )));
    }
    Ok(start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(DateKey::from_date)
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSpec {
    Explicit { start: String, end: String },
    DaysBack(u32),
}

impl RangeSpec {
    /// Explicit dates take precedence when both modes are present.
    pub fn from_parts(
        start: Option<&str>,
        end: Option<&str>,
        days_back: Option<u32>,
    ) -> Result<Self, ImportError> {
        match (start, end, days_back) {
            (Some(start), Some(end), _) => Ok(Self::Explicit {
                start: start.trim().to_string(),
                end: end.trim().to_string(),
            }),
            (_, _, Some(days)) => Ok(Self::DaysBack(days)),
            _ => Err(ImportError::Configuration(
                "either --days-back OR both --start-date and --end-date must be provided"
                    .to_string(),
            )),
        }
    }

    /// Resolve to inclusive `(start, end)` keys, validating order.
    pub fn resolve(&self, tz: Tz, now: DateTime<Utc>) -> Result<(DateKey, DateKey), ImportError> {
        match self {
            Self::Explicit { start, end } => {
                let first = parse_date("start date", start)?;
                let last = parse_date("end date", end)?;
                if first > last {
                    return Err(ImportError::InvalidRange(format!(
                        "start date {start} is after end date {end}"
                    )));
                }
                Ok((DateKey::from_date(first), DateKey::from_date(last)))
            }
            Self::DaysBack(days) => {
                let today = now.with_timezone(&tz).date_naive();
                let first = today
                    .checked_sub_days(Days::new(u64::from(*days)))
                    .ok_or_else(|| {
                        ImportError::InvalidRange(format!("{days} days back underflows the calendar"))
                    })?;
                Ok((DateKey::from_date(first), DateKey::from_date(today)))
            }
        }
    }
}

/// The closed instant interval covering one calendar date in a timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBounds {
    pub date: DateKey,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl DayBounds {
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.end.with_timezone(&Utc)
    }
}

/// Resolve a local time to an instant, walking minute by minute out of a DST
/// gap. Ambiguous times resolve to the earlier instant going forward and the
/// later one going backward.
fn first_valid_instant(tz: Tz, local: NaiveDateTime, forward: bool) -> Option<DateTime<Tz>> {
    (0..=DST_PROBE_LIMIT_MINUTES).find_map(|step| {
        let offset = Duration::minutes(step);
        if forward {
            tz.from_local_datetime(&(local + offset)).earliest()
        } else {
            tz.from_local_datetime(&(local - offset)).latest()
        }
    })
}

/// Compute `[00:00:00.000000000, 23:59:59.999999999]` of `date` in `tz`.
pub fn day_bounds(date: &DateKey, tz: Tz) -> Result<DayBounds, ImportError> {
    let day = date.date()?;
    let invalid = || ImportError::InvalidRange(format!("cannot build day boundary for {date}"));
    let midnight = day.and_hms_nano_opt(0, 0, 0, 0).ok_or_else(invalid)?;
    let last = day
        .and_hms_nano_opt(23, 59, 59, 999_999_999)
        .ok_or_else(invalid)?;
    let start = first_valid_instant(tz, midnight, true).ok_or_else(invalid)?;
    let end = first_valid_instant(tz, last, false).ok_or_else(invalid)?;
    Ok(DayBounds {
        date: date.clone(),
        start,
        end,
    })
}
