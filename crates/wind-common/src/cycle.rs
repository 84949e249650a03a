//! Forecast cycle arithmetic.
//!
//! GFS runs four times a day at 00, 06, 12 and 18 UTC. Every instant maps to
//! exactly one of those cycles by flooring its UTC hour to a multiple of six.
//! Cycles are identified by a `YYYYMMDDHH` label, which is also the key used
//! for stored artifacts (keyed by valid time, i.e. cycle + forecast offset).

use std::fmt;

use chrono::{
    DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize};

/// Hours between consecutive model cycles.
pub const CYCLE_HOURS: u32 = 6;

const LABEL_FORMAT: &str = "%Y%m%d%H";

/// Round `hour` down to the nearest multiple of `interval`.
///
/// An interval of zero leaves the hour unchanged.
pub fn round_hours(hour: u32, interval: u32) -> u32 {
    if interval == 0 {
        return hour;
    }
    (hour / interval) * interval
}

/// 00:00 UTC on the date of `instant`.
pub fn start_of_day<Tz: TimeZone>(instant: &DateTime<Tz>) -> DateTime<Utc> {
    let utc = instant.with_timezone(&Utc);
    Utc.from_utc_datetime(&utc.date_naive().and_time(NaiveTime::MIN))
}

/// Label of the cycle containing `instant`, e.g. `2024011512`.
pub fn cycle_label_for<Tz: TimeZone>(instant: &DateTime<Tz>) -> String {
    Cycle::containing(instant).label()
}

/// A model initialization instant aligned to 00/06/12/18 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cycle {
    start: DateTime<Utc>,
}

impl Cycle {
    /// The cycle containing `instant`, after normalising it to UTC.
    pub fn containing<Tz: TimeZone>(instant: &DateTime<Tz>) -> Self {
        let utc = instant.with_timezone(&Utc);
        let hour = round_hours(utc.hour(), CYCLE_HOURS);
        let midnight = utc.date_naive().and_time(NaiveTime::MIN);
        Self {
            start: Utc.from_utc_datetime(&(midnight + Duration::hours(hour as i64))),
        }
    }

    /// Parse a `YYYYMMDDHH` label.
    pub fn parse_label(label: &str) -> Result<Self, TimeParseError> {
        if label.len() != 10 || !label.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeParseError::InvalidLabel(label.to_string()));
        }

        let ndt = NaiveDateTime::parse_from_str(&format!("{}00", label), "%Y%m%d%H%M")
            .map_err(|_| TimeParseError::InvalidLabel(label.to_string()))?;

        if ndt.hour() % CYCLE_HOURS != 0 {
            return Err(TimeParseError::UnalignedHour(ndt.hour()));
        }

        Ok(Self {
            start: Utc.from_utc_datetime(&ndt),
        })
    }

    /// Initialization instant of this cycle.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Cycle hour (0, 6, 12 or 18).
    pub fn hour(&self) -> u32 {
        self.start.hour()
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// Canonical `YYYYMMDDHH` label.
    pub fn label(&self) -> String {
        self.start.format(LABEL_FORMAT).to_string()
    }

    /// `YYYYMMDD` part of the label.
    pub fn date_label(&self) -> String {
        self.start.format("%Y%m%d").to_string()
    }

    /// Zero-padded `HH` part of the label.
    pub fn hour_label(&self) -> String {
        format!("{:02}", self.hour())
    }

    /// The cycle six hours earlier, or `None` past the representable range.
    pub fn previous(&self) -> Option<Self> {
        self.start
            .checked_sub_signed(Duration::hours(CYCLE_HOURS as i64))
            .map(|start| Self { start })
    }

    /// The cycle six hours later, or `None` past the representable range.
    pub fn next(&self) -> Option<Self> {
        self.start
            .checked_add_signed(Duration::hours(CYCLE_HOURS as i64))
            .map(|start| Self { start })
    }

    /// The cycle `offset` hours after this one, floored to a cycle boundary.
    pub fn offset_by(&self, offset: ForecastOffset) -> Self {
        Self::containing(&(self.start + Duration::hours(offset.hours() as i64)))
    }

    /// Absolute time between this cycle's start and `instant`.
    pub fn distance_from(&self, instant: &DateTime<Utc>) -> Duration {
        if self.start > *instant {
            self.start - *instant
        } else {
            *instant - self.start
        }
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.format(LABEL_FORMAT))
    }
}

/// Hours ahead of a cycle identifying one forecast horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForecastOffset(u32);

impl ForecastOffset {
    pub fn new(hours: u32) -> Self {
        Self(hours)
    }

    /// The analysis (f000) offset.
    pub fn analysis() -> Self {
        Self(0)
    }

    pub fn hours(&self) -> u32 {
        self.0
    }

    pub fn is_analysis(&self) -> bool {
        self.0 == 0
    }

    /// File suffix used upstream and in the staging area, e.g. `f006`.
    pub fn label(&self) -> String {
        format!("f{:03}", self.0)
    }
}

impl fmt::Display for ForecastOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{:03}", self.0)
    }
}

/// Represents a valid time for meteorological data.
///
/// Combines the model cycle and forecast offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidTime {
    /// Model run cycle
    pub cycle: Cycle,
    /// Forecast hour offset from the cycle
    pub offset: ForecastOffset,
}

impl ValidTime {
    pub fn new(cycle: Cycle, offset: ForecastOffset) -> Self {
        Self { cycle, offset }
    }

    /// Create from analysis time (offset = 0)
    pub fn analysis(cycle: Cycle) -> Self {
        Self {
            cycle,
            offset: ForecastOffset::analysis(),
        }
    }

    /// The valid time expressed as a cycle (cycle + offset).
    pub fn as_cycle(&self) -> Cycle {
        self.cycle.offset_by(self.offset)
    }

    /// Calculate the actual valid time (cycle + forecast offset)
    pub fn valid_datetime(&self) -> DateTime<Utc> {
        self.cycle.start() + Duration::hours(self.offset.hours() as i64)
    }

    /// Storage key for this valid time.
    pub fn label(&self) -> String {
        self.as_cycle().label()
    }

    /// Staging file name for the raw upstream payload, e.g. `2024011512.f006`.
    pub fn staging_name(&self) -> String {
        format!("{}.{}", self.cycle.label(), self.offset.label())
    }
}

/// Parse an ISO 8601 timestamp into UTC.
///
/// Accepts RFC 3339 with any offset, a naive date-time (assumed UTC) with or
/// without seconds, or a bare date.
pub fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = s.trim();

    // Try full datetime with timezone
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try without timezone (assume UTC)
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    // Try date only
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Invalid cycle label: {0}")]
    InvalidLabel(String),

    #[error("Cycle hour {0} is not a multiple of 6")]
    UnalignedHour(u32),
}
