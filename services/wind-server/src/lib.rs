//! GFS wind acquisition and serving.
//!
//! Polls NOMADS for the newest GFS cycle, converts the 10 m U/V wind fields
//! of its analysis and forecast files into rounded, gzip-compressed JSON
//! artifacts keyed by valid time, and serves the artifact nearest to a
//! requested time over HTTP.

pub mod config;
pub mod convert;
pub mod pipeline;
pub mod resolver;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod store;
pub mod upstream;

pub use config::ServiceConfig;
pub use convert::{Converter, Grib2JsonConverter};
pub use pipeline::{AcquisitionPipeline, AcquisitionResult, PipelineConfig};
pub use resolver::{resolve, SearchBound};
pub use scheduler::{ScheduleInfo, Scheduler};
pub use server::{create_router, AppState};
pub use state::AcquisitionLedger;
pub use store::{ArtifactStore, Availability};
pub use upstream::{NomadsSource, UpstreamSource};
