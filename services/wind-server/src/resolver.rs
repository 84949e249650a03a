//! Nearest stored cycle lookup.
//!
//! The search is an explicit loop over 6-hour steps. Starting at the cycle
//! containing the target, it walks backward first and forward second, so on
//! equal distance the earlier cycle wins.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use wind_common::{Cycle, WindError, WindResult};

use crate::store::Availability;

/// Bound applied to a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBound {
    /// Only cycles whose start is at most this far from the target, in either direction.
    Within(Duration),
    /// Backward search only, never past this instant.
    NotBefore(DateTime<Utc>),
}

/// Whether `cycle` is close enough to `target` under `limit`.
pub fn within_limit(target: &DateTime<Utc>, cycle: &Cycle, limit: Duration) -> bool {
    cycle.distance_from(target) <= limit
}

/// Whether `cycle` starts at or after `floor`.
pub fn not_before(cycle: &Cycle, floor: &DateTime<Utc>) -> bool {
    cycle.start() >= *floor
}

/// Find the stored cycle nearest to `target`.
pub fn resolve<A>(availability: &A, target: DateTime<Utc>, bound: SearchBound) -> WindResult<Cycle>
where
    A: Availability + ?Sized,
{
    let candidate = Cycle::containing(&target);

    match bound {
        SearchBound::Within(limit) => {
            let eligible = |c: &Cycle| within_limit(&target, c, limit);

            if eligible(&candidate) && availability.exists(&candidate.label()) {
                return Ok(candidate);
            }

            let mut step = candidate.previous();
            while let Some(cycle) = step.filter(|c| eligible(c)) {
                if availability.exists(&cycle.label()) {
                    debug!(target = %target, cycle = %cycle, "Resolved backward");
                    return Ok(cycle);
                }
                step = cycle.previous();
            }

            let mut step = candidate.next();
            while let Some(cycle) = step.filter(|c| eligible(c)) {
                if availability.exists(&cycle.label()) {
                    debug!(target = %target, cycle = %cycle, "Resolved forward");
                    return Ok(cycle);
                }
                step = cycle.next();
            }

            Err(WindError::NoDataWithinLimit(format!(
                "no stored cycle within {}h of {}",
                limit.num_hours(),
                target.to_rfc3339()
            )))
        }
        SearchBound::NotBefore(floor) => {
            let mut step = Some(candidate);
            while let Some(cycle) = step.filter(|c| not_before(c, &floor)) {
                if availability.exists(&cycle.label()) {
                    return Ok(cycle);
                }
                step = cycle.previous();
            }

            Err(WindError::NoDataAvailable(format!(
                "no stored cycle between {} and {}",
                floor.to_rfc3339(),
                target.to_rfc3339()
            )))
        }
    }
}
