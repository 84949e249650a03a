//! Common types and utilities shared across the wind services.

pub mod cycle;
pub mod error;

pub use cycle::{
    cycle_label_for, parse_iso8601, round_hours, start_of_day, Cycle, ForecastOffset,
    TimeParseError, ValidTime, CYCLE_HOURS,
};
pub use error::{WindError, WindResult};
