//! Acquisition pipeline.
//!
//! One run finds the newest cycle whose analysis file upstream will serve,
//! publishes it, then publishes every configured forecast offset of that
//! cycle. Each artifact goes through the same steps:
//!
//! fetch -> stage raw payload -> convert -> round -> compress -> publish
//!
//! The base cycle steps backward on upstream failure, bounded by the start of
//! the current UTC day. Forecast offsets run concurrently and independently;
//! each retries transient upstream failures with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, instrument, warn};
use wind_common::{start_of_day, Cycle, ForecastOffset, ValidTime, WindError, WindResult};

use crate::config::{RetryConfig, ServiceConfig};
use crate::convert::{normalize, Converter};
use crate::resolver::not_before;
use crate::state::{AcquisitionLedger, ArtifactRecord, RunOutcome};
use crate::store::{ArtifactStore, Availability, Publish};
use crate::upstream::{ByteStream, UpstreamSource};

/// Tunables for one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Offsets published after the analysis file, in hours
    pub forecast_offsets: Vec<ForecastOffset>,
    /// Forecast jobs in flight at once
    pub max_concurrent: usize,
    /// Decimal places kept by the rounding pass
    pub round_decimals: u32,
    pub retry: RetryConfig,
}

impl PipelineConfig {
    pub fn from_service(config: &ServiceConfig) -> Self {
        Self {
            forecast_offsets: config.forecast_offsets(),
            max_concurrent: config.schedule.max_concurrent,
            round_decimals: config.storage.round_decimals,
            retry: config.retry.clone(),
        }
    }
}

/// One fetch-to-publish unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionJob {
    pub cycle: Cycle,
    pub offset: ForecastOffset,
    pub attempts_remaining: u32,
}

impl AcquisitionJob {
    pub fn new(cycle: Cycle, offset: ForecastOffset, attempts_remaining: u32) -> Self {
        Self {
            cycle,
            offset,
            attempts_remaining,
        }
    }

    pub fn valid_time(&self) -> ValidTime {
        ValidTime::new(self.cycle, self.offset)
    }
}

/// Result of a single forecast job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Stored { valid_time: String, bytes: u64 },
    /// An artifact for the valid time already existed.
    Skipped { valid_time: String },
    /// Upstream never served the file, retries included.
    Unavailable { valid_time: String, error: WindError },
    /// Conversion or storage failed.
    Failed { valid_time: String, error: WindError },
}

impl JobOutcome {
    pub fn valid_time(&self) -> &str {
        match self {
            Self::Stored { valid_time, .. }
            | Self::Skipped { valid_time }
            | Self::Unavailable { valid_time, .. }
            | Self::Failed { valid_time, .. } => valid_time,
        }
    }
}

/// Counts of forecast job outcomes for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastSummary {
    pub stored: usize,
    pub skipped: usize,
    pub unavailable: usize,
    pub failed: usize,
}

impl ForecastSummary {
    pub fn from_outcomes(outcomes: &[JobOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome {
                JobOutcome::Stored { .. } => summary.stored += 1,
                JobOutcome::Skipped { .. } => summary.skipped += 1,
                JobOutcome::Unavailable { .. } => summary.unavailable += 1,
                JobOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.stored + self.skipped + self.unavailable + self.failed
    }
}

/// Result of one acquisition run.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionResult {
    /// The analysis artifact for `cycle` was published and forecasts processed.
    Acquired {
        cycle: Cycle,
        forecasts: ForecastSummary,
    },
    /// Upstream served `cycle`, but its artifact was already stored.
    AlreadyCurrent { cycle: Cycle },
    /// No cycle between `searched_from` and the start of its day was served.
    NoUpstreamData { searched_from: Cycle },
    /// Upstream served `cycle`, but it could not be converted or stored.
    BaseFailed { cycle: Cycle, error: WindError },
}

impl AcquisitionResult {
    pub fn outcome(&self) -> RunOutcome {
        match self {
            Self::Acquired { .. } => RunOutcome::Acquired,
            Self::AlreadyCurrent { .. } => RunOutcome::AlreadyCurrent,
            Self::NoUpstreamData { .. } => RunOutcome::NoUpstreamData,
            Self::BaseFailed { .. } => RunOutcome::BaseFailed,
        }
    }

    pub fn cycle(&self) -> Option<Cycle> {
        match self {
            Self::Acquired { cycle, .. }
            | Self::AlreadyCurrent { cycle }
            | Self::BaseFailed { cycle, .. } => Some(*cycle),
            Self::NoUpstreamData { .. } => None,
        }
    }

    /// Artifacts published by this run, analysis included.
    pub fn stored_count(&self) -> usize {
        match self {
            Self::Acquired { forecasts, .. } => 1 + forecasts.stored,
            _ => 0,
        }
    }

    pub fn failed_count(&self) -> usize {
        match self {
            Self::Acquired { forecasts, .. } => forecasts.failed + forecasts.unavailable,
            Self::BaseFailed { .. } => 1,
            _ => 0,
        }
    }
}

pub struct AcquisitionPipeline {
    store: ArtifactStore,
    upstream: Arc<dyn UpstreamSource>,
    converter: Arc<dyn Converter>,
    ledger: Option<AcquisitionLedger>,
    config: PipelineConfig,
}

impl AcquisitionPipeline {
    pub fn new(
        store: ArtifactStore,
        upstream: Arc<dyn UpstreamSource>,
        converter: Arc<dyn Converter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            upstream,
            converter,
            ledger: None,
            config,
        }
    }

    pub fn with_ledger(mut self, ledger: AcquisitionLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Acquire the newest cycle available upstream as of `now`.
    #[instrument(skip(self))]
    pub async fn acquire_current_cycle(&self, now: DateTime<Utc>) -> AcquisitionResult {
        let searched_from = Cycle::containing(&now);

        if let Err(e) = self.store.ensure_dirs().await {
            error!(error = %e, "Cannot prepare storage");
            return AcquisitionResult::BaseFailed {
                cycle: searched_from,
                error: e,
            };
        }

        let floor = start_of_day(&now);
        let mut step = Some(searched_from);

        while let Some(cycle) = step.filter(|c| not_before(c, &floor)) {
            let base = ValidTime::analysis(cycle);

            let body = match self.upstream.request(&cycle, base.offset).await {
                Ok(body) => body,
                Err(e) => {
                    counter!("wind_upstream_misses_total").increment(1);
                    info!(cycle = %cycle, error = %e, "Cycle not available upstream, trying previous");
                    step = cycle.previous();
                    continue;
                }
            };

            if self.store.exists(&base.label()) {
                counter!("wind_artifacts_skipped_total").increment(1);
                info!(cycle = %cycle, "Already have current cycle, not looking further");
                return AcquisitionResult::AlreadyCurrent { cycle };
            }

            return match self.process(&base, body).await {
                Ok(Publish::Stored { .. }) => {
                    let forecasts = self.run_forecasts(cycle).await;
                    info!(
                        cycle = %cycle,
                        stored = forecasts.stored,
                        skipped = forecasts.skipped,
                        unavailable = forecasts.unavailable,
                        failed = forecasts.failed,
                        "Cycle acquired"
                    );
                    AcquisitionResult::Acquired { cycle, forecasts }
                }
                Ok(Publish::Skipped) => AcquisitionResult::AlreadyCurrent { cycle },
                Err(e) => {
                    counter!("wind_jobs_failed_total").increment(1);
                    error!(cycle = %cycle, error = %e, "Failed to publish analysis artifact");
                    AcquisitionResult::BaseFailed { cycle, error: e }
                }
            };
        }

        warn!(searched_from = %searched_from, "Reached end of today's data");
        AcquisitionResult::NoUpstreamData { searched_from }
    }

    /// Run every configured forecast offset of `cycle`.
    ///
    /// A failing job never affects its siblings.
    pub async fn run_forecasts(&self, cycle: Cycle) -> ForecastSummary {
        let jobs: Vec<AcquisitionJob> = self
            .config
            .forecast_offsets
            .iter()
            .map(|offset| AcquisitionJob::new(cycle, *offset, self.config.retry.max_retries))
            .collect();

        let outcomes: Vec<JobOutcome> = stream::iter(jobs)
            .map(|job| self.run_job(job))
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        ForecastSummary::from_outcomes(&outcomes)
    }

    /// Run one job to completion, retrying upstream failures.
    #[instrument(skip(self, job), fields(cycle = %job.cycle, offset = %job.offset))]
    pub async fn run_job(&self, mut job: AcquisitionJob) -> JobOutcome {
        let valid_time = job.valid_time().label();
        let mut retries = 0;

        loop {
            match self.attempt(&job).await {
                Ok(outcome) => return outcome,
                Err(e) if e.is_upstream() && job.attempts_remaining > 0 => {
                    job.attempts_remaining -= 1;
                    let delay = backoff_delay(
                        self.config.retry.initial_delay(),
                        self.config.retry.max_delay(),
                        retries,
                    );
                    retries += 1;
                    debug!(
                        error = %e,
                        attempts_remaining = job.attempts_remaining,
                        delay_ms = delay.as_millis() as u64,
                        "Upstream request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_upstream() => {
                    counter!("wind_upstream_misses_total").increment(1);
                    warn!(valid_time = %valid_time, error = %e, "Forecast not available upstream");
                    return JobOutcome::Unavailable {
                        valid_time,
                        error: e,
                    };
                }
                Err(e) => {
                    counter!("wind_jobs_failed_total").increment(1);
                    error!(valid_time = %valid_time, error = %e, "Forecast job failed");
                    return JobOutcome::Failed {
                        valid_time,
                        error: e,
                    };
                }
            }
        }
    }

    async fn attempt(&self, job: &AcquisitionJob) -> WindResult<JobOutcome> {
        let valid_time = job.valid_time();
        let label = valid_time.label();

        let body = self.upstream.request(&job.cycle, job.offset).await?;

        if self.store.exists(&label) {
            counter!("wind_artifacts_skipped_total").increment(1);
            debug!(valid_time = %label, "Already have valid time, skipping");
            return Ok(JobOutcome::Skipped { valid_time: label });
        }

        Ok(match self.process(&valid_time, body).await? {
            Publish::Stored { bytes, .. } => JobOutcome::Stored {
                valid_time: label,
                bytes,
            },
            Publish::Skipped => JobOutcome::Skipped { valid_time: label },
        })
    }

    /// Stage, convert, round and publish one payload.
    async fn process(&self, valid_time: &ValidTime, body: ByteStream) -> WindResult<Publish> {
        let label = valid_time.label();
        let staged = self.store.staging_path(valid_time);
        let converted = self.store.converted_path(&label);

        let mut file = fs::File::create(&staged).await.map_err(|e| {
            WindError::StorageFailure(format!("Failed to create {}: {}", staged.display(), e))
        })?;
        let mut reader = StreamReader::new(body);
        let staged_bytes = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
            WindError::UpstreamUnavailable(format!("Payload for {} interrupted: {}", label, e))
        })?;
        file.flush().await?;
        drop(file);

        debug!(
            valid_time = %label,
            path = %staged.display(),
            bytes = staged_bytes,
            "Staged raw payload"
        );

        self.converter.convert(&staged, &converted).await?;

        let raw = fs::read(&converted).await.map_err(|e| {
            WindError::StorageFailure(format!("Failed to read {}: {}", converted.display(), e))
        })?;
        let json = normalize(&raw, self.config.round_decimals);
        fs::remove_file(&converted).await.ok();
        let published = self.store.publish(&label, &json?).await?;

        match &published {
            Publish::Stored { bytes, .. } => {
                counter!("wind_artifacts_stored_total").increment(1);
                if let Some(ledger) = &self.ledger {
                    if let Err(e) = ledger
                        .record_artifact(&ArtifactRecord::new(valid_time, *bytes))
                        .await
                    {
                        warn!(valid_time = %label, error = %e, "Failed to record artifact");
                    }
                }
            }
            Publish::Skipped => {
                counter!("wind_artifacts_skipped_total").increment(1);
            }
        }

        Ok(published)
    }
}

/// Backoff before retry `n` (zero-based), capped at `max`.
pub fn backoff_delay(initial: Duration, max: Duration, n: u32) -> Duration {
    let factor = 2u32.saturating_pow(n);
    std::cmp::min(initial.saturating_mul(factor), max)
}
