//! Acquisition scheduler.
//!
//! Runs the pipeline once at start and then again `poll_interval` after each
//! run completes, so a slow run delays the next one instead of overlapping it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::pipeline::{AcquisitionPipeline, AcquisitionResult};
use crate::state::{AcquisitionLedger, RunRecord};

/// Schedule details for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInfo {
    pub poll_interval_secs: u64,
    pub forecast_hours: Vec<u32>,
    pub max_concurrent: usize,
    pub upstream: String,
}

impl From<&ServiceConfig> for ScheduleInfo {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            poll_interval_secs: config.schedule.poll_interval_secs,
            forecast_hours: config
                .forecast_offsets()
                .iter()
                .map(|o| o.hours())
                .collect(),
            max_concurrent: config.schedule.max_concurrent,
            upstream: config.upstream.base_url.clone(),
        }
    }
}

pub struct Scheduler {
    pipeline: Arc<AcquisitionPipeline>,
    ledger: Option<AcquisitionLedger>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(pipeline: Arc<AcquisitionPipeline>, poll_interval: Duration) -> Self {
        Self {
            pipeline,
            ledger: None,
            poll_interval,
        }
    }

    pub fn with_ledger(mut self, ledger: AcquisitionLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// One housekeeping + acquisition run as of `now`.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> AcquisitionResult {
        let started_at = Utc::now();
        let timer = Instant::now();

        match self.pipeline.store().clear_staging().await {
            Ok(removed) if removed > 0 => info!(removed = removed, "Cleared staged payloads"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to clear staging area"),
        }

        let result = self.pipeline.acquire_current_cycle(now).await;
        let outcome = result.outcome();
        let elapsed = timer.elapsed();

        counter!("wind_runs_total", "outcome" => outcome.as_str()).increment(1);
        histogram!("wind_run_duration_seconds").record(elapsed.as_secs_f64());

        if let Some(ledger) = &self.ledger {
            let run = RunRecord::new(
                started_at,
                Utc::now(),
                result.cycle().map(|c| c.label()),
                outcome,
                result.stored_count() as u32,
                result.failed_count() as u32,
            );
            if let Err(e) = ledger.record_run(&run).await {
                warn!(error = %e, "Failed to record run");
            }
        }

        match &result {
            AcquisitionResult::BaseFailed { cycle, error } => {
                error!(cycle = %cycle, error = %error, "Acquisition run failed");
            }
            _ => {
                info!(
                    outcome = outcome.as_str(),
                    cycle = ?result.cycle().map(|c| c.label()),
                    stored = result.stored_count(),
                    failed = result.failed_count(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Acquisition run complete"
                );
            }
        }

        result
    }

    /// Run until `shutdown` fires, sleeping `poll_interval` after each run.
    pub async fn run_forever(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            self.run_once_at(Utc::now()).await;

            info!(
                next_run_in_secs = self.poll_interval.as_secs(),
                "Scheduled next run"
            );

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_info_from_config() {
        let info = ScheduleInfo::from(&ServiceConfig::default());
        assert_eq!(info.poll_interval_secs, 3600);
        assert_eq!(info.forecast_hours.len(), 40);
        assert_eq!(info.forecast_hours[0], 6);
        assert!(info.upstream.contains("filter_gfs_1p00.pl"));
    }
}
