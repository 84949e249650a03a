//! Service configuration.
//!
//! Loaded from a single YAML file. Every field has a default, so a missing
//! file or a partial file still yields a runnable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wind_common::ForecastOffset;

/// Root configuration loaded from the service YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub upstream: UpstreamConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    pub converter: ConverterConfig,
    pub server: ServerConfig,
    pub retry: RetryConfig,
}

/// NOMADS GRIB filter endpoint and the subset it should return.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Filter CGI URL (e.g. https://nomads.ncep.noaa.gov/cgi-bin/filter_gfs_1p00.pl)
    pub base_url: String,
    /// Grid resolution used in the file name (`1p00`, `0p25`, ...)
    pub resolution: String,
    /// Level flags, sent as `<level>=on`
    pub levels: Vec<String>,
    /// Variable flags, sent as `<variable>=on`
    pub variables: Vec<String>,
    pub bbox: BBox,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nomads.ncep.noaa.gov/cgi-bin/filter_gfs_1p00.pl".to_string(),
            resolution: "1p00".to_string(),
            levels: vec![
                "lev_10_m_above_ground".to_string(),
                "lev_surface".to_string(),
            ],
            variables: vec!["var_UGRD".to_string(), "var_VGRD".to_string()],
            bbox: BBox::default(),
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
        }
    }
}

/// Geographic subset requested from the filter (whole globe by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BBox {
    pub left_lon: f64,
    pub right_lon: f64,
    pub top_lat: f64,
    pub bottom_lat: f64,
}

impl Default for BBox {
    fn default() -> Self {
        Self {
            left_lon: 0.0,
            right_lon: 360.0,
            top_lat: 90.0,
            bottom_lat: -90.0,
        }
    }
}

/// Acquisition schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Seconds between the end of one run and the start of the next
    pub poll_interval_secs: u64,
    /// Forecast horizon processed after each new base cycle
    pub forecast_hours: ForecastHoursConfig,
    /// Forecast offsets processed concurrently
    pub max_concurrent: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3600,
            forecast_hours: ForecastHoursConfig::default(),
            max_concurrent: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastHoursConfig {
    pub start: u32,
    pub end: u32,
    pub step: u32,
}

impl Default for ForecastHoursConfig {
    fn default() -> Self {
        Self {
            start: 6,
            end: 240,
            step: 6,
        }
    }
}

impl ForecastHoursConfig {
    /// Generate the list of forecast hours.
    pub fn hours(&self) -> Vec<u32> {
        (self.start..=self.end)
            .step_by(self.step.max(1) as usize)
            .collect()
    }
}

/// Where artifacts, raw payloads and the run ledger live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Published `<label>.json.gz` artifacts
    pub artifact_dir: PathBuf,
    /// Raw upstream payloads and transient converter output
    pub staging_dir: PathBuf,
    /// SQLite run ledger
    pub ledger_path: PathBuf,
    /// Decimal places kept for floating-point values
    pub round_decimals: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("data/wind"),
            staging_dir: PathBuf::from("data/grib"),
            ledger_path: PathBuf::from("data/wind-server.db"),
            round_decimals: 2,
        }
    }
}

/// External GRIB2 to JSON converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub binary: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("converter/bin/grib2json"),
            timeout_secs: 300,
        }
    }
}

/// HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// CORS allow-list; empty allows any origin
    pub allowed_origins: Vec<String>,
    /// Upper bound applied to `searchLimit`
    pub max_search_days: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7000,
            allowed_origins: vec![
                "http://localhost:63342".to_string(),
                "http://localhost:3000".to_string(),
                "http://localhost:4000".to_string(),
                "http://danwild.github.io".to_string(),
            ],
            max_search_days: 30.0,
        }
    }
}

/// Retry policy for forecast-offset downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_delay_ms: u64,
    /// Maximum retry delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl ServiceConfig {
    /// Load a configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ServiceConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(path = %path.display(), "Loaded service config");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    ///
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let config = Self::load(path)?;
        info!(
            path = %path.display(),
            poll_interval_secs = config.schedule.poll_interval_secs,
            forecast_offsets = config.forecast_offsets().len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Forecast offsets processed after the analysis file, excluding f000.
    pub fn forecast_offsets(&self) -> Vec<ForecastOffset> {
        self.schedule
            .forecast_hours
            .hours()
            .into_iter()
            .filter(|h| *h > 0)
            .map(ForecastOffset::new)
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_hours() {
        let fh = ForecastHoursConfig {
            start: 0,
            end: 12,
            step: 3,
        };
        assert_eq!(fh.hours(), vec![0, 3, 6, 9, 12]);
    }

    #[test]
    fn test_zero_step_does_not_panic() {
        let fh = ForecastHoursConfig {
            start: 6,
            end: 8,
            step: 0,
        };
        assert_eq!(fh.hours(), vec![6, 7, 8]);
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        let offsets = config.forecast_offsets();
        assert_eq!(offsets.len(), 40);
        assert_eq!(offsets[0], ForecastOffset::new(6));
        assert_eq!(offsets[39], ForecastOffset::new(240));
        assert_eq!(config.poll_interval(), Duration::from_secs(3600));
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.storage.round_decimals, 2);
    }

    #[test]
    fn test_analysis_hour_excluded_from_forecast_offsets() {
        let mut config = ServiceConfig::default();
        config.schedule.forecast_hours = ForecastHoursConfig {
            start: 0,
            end: 12,
            step: 6,
        };
        assert_eq!(
            config.forecast_offsets(),
            vec![ForecastOffset::new(6), ForecastOffset::new(12)]
        );
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r#"
schedule:
  poll_interval_secs: 21600
  forecast_hours:
    start: 6
    end: 120
    step: 6

storage:
  artifact_dir: /var/www/html/weather/tile/wind_particles

server:
  allowed_origins: []
"#;

        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.schedule.poll_interval_secs, 21600);
        assert_eq!(config.forecast_offsets().len(), 20);
        assert_eq!(
            config.storage.artifact_dir,
            PathBuf::from("/var/www/html/weather/tile/wind_particles")
        );
        // Untouched sections keep their defaults
        assert_eq!(config.storage.staging_dir, PathBuf::from("data/grib"));
        assert_eq!(config.upstream.resolution, "1p00");
        assert!(config.server.allowed_origins.is_empty());
        assert_eq!(config.schedule.max_concurrent, 4);
    }

    #[test]
    fn test_sample_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/wind-server.yaml");
        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.forecast_offsets().len(), 40);
        assert_eq!(config.server.allowed_origins.len(), 4);
        assert_eq!(config.server.max_search_days, 30.0);
        assert_eq!(config.upstream.bbox.bottom_lat, -90.0);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            ServiceConfig::load_or_default(Path::new("/nonexistent/wind-server.yaml")).unwrap();
        assert_eq!(config.upstream.variables, vec!["var_UGRD", "var_VGRD"]);
    }
}
