//! Upstream GFS source.
//!
//! NOMADS exposes each GRIB2 file through a filter CGI that cuts it down to
//! the requested levels, variables and bounding box. A request selects the
//! file by cycle directory (`/gfs.YYYYMMDD/HH/atmos`) and file name
//! (`gfs.tHHz.pgrb2.1p00.fNNN`).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use wind_common::{Cycle, ForecastOffset, WindError, WindResult};

use crate::config::UpstreamConfig;

/// Raw payload body as it arrives from upstream.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A remote source of raw GRIB2 payloads.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Request the payload for `cycle` at `offset`.
    ///
    /// Transport errors and non-success statuses are `UpstreamUnavailable`.
    async fn request(&self, cycle: &Cycle, offset: ForecastOffset) -> WindResult<ByteStream>;
}

/// NOMADS GRIB filter client.
pub struct NomadsSource {
    client: Client,
    config: UpstreamConfig,
}

impl NomadsSource {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Upstream file name, e.g. `gfs.t06z.pgrb2.1p00.f012`.
    pub fn file_name(&self, cycle: &Cycle, offset: ForecastOffset) -> String {
        format!(
            "gfs.t{}z.pgrb2.{}.{}",
            cycle.hour_label(),
            self.config.resolution,
            offset.label()
        )
    }

    /// Cycle directory, e.g. `/gfs.20240115/06/atmos`.
    pub fn directory(cycle: &Cycle) -> String {
        format!("/gfs.{}/{}/atmos", cycle.date_label(), cycle.hour_label())
    }

    /// Query parameters selecting one filtered file.
    pub fn query_params(&self, cycle: &Cycle, offset: ForecastOffset) -> Vec<(String, String)> {
        let mut params = vec![("file".to_string(), self.file_name(cycle, offset))];

        for flag in self.config.levels.iter().chain(self.config.variables.iter()) {
            params.push((flag.clone(), "on".to_string()));
        }

        let bbox = &self.config.bbox;
        params.push(("leftlon".to_string(), bbox.left_lon.to_string()));
        params.push(("rightlon".to_string(), bbox.right_lon.to_string()));
        params.push(("toplat".to_string(), bbox.top_lat.to_string()));
        params.push(("bottomlat".to_string(), bbox.bottom_lat.to_string()));
        params.push(("dir".to_string(), Self::directory(cycle)));

        params
    }
}

#[async_trait]
impl UpstreamSource for NomadsSource {
    #[instrument(skip(self), fields(cycle = %cycle, offset = %offset))]
    async fn request(&self, cycle: &Cycle, offset: ForecastOffset) -> WindResult<ByteStream> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&self.query_params(cycle, offset))
            .send()
            .await
            .map_err(|e| {
                WindError::UpstreamUnavailable(format!("{}.{}: {}", cycle, offset, e))
            })?;

        let status = response.status();
        debug!(status = %status, "Upstream responded");

        if status != StatusCode::OK {
            return Err(WindError::UpstreamUnavailable(format!(
                "{}.{}: HTTP {}",
                cycle, offset, status
            )));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
            .boxed())
    }
}
