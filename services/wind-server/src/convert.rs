//! GRIB2 to JSON conversion and numeric normalization.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, instrument};
use wind_common::{WindError, WindResult};

/// Converts a raw payload file into a JSON document file.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path) -> WindResult<()>;
}

/// Runs the external `grib2json` tool.
#[derive(Debug, Clone)]
pub struct Grib2JsonConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl Grib2JsonConverter {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for Grib2JsonConverter {
    #[instrument(skip(self), fields(input = %input.display()))]
    async fn convert(&self, input: &Path, output: &Path) -> WindResult<()> {
        let mut command = Command::new(&self.binary);
        command
            .arg("--data")
            .arg("--output")
            .arg(output)
            .arg("--names")
            .arg("--compact")
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                WindError::ConversionFailure(format!(
                    "{} timed out after {}s",
                    self.binary.display(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                WindError::ConversionFailure(format!(
                    "Failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(WindError::ConversionFailure(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                result.status,
                tail(stderr.trim(), 500)
            )));
        }

        debug!(output = %output.display(), "Conversion completed");
        Ok(())
    }
}

/// Last `max` bytes of `s`, on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Round `value` to `decimals` places.
pub fn round_value(value: f64, decimals: u32) -> f64 {
    let formatted = format!("{:.*}", decimals as usize, value);
    formatted.parse().unwrap_or(value)
}

/// Round every floating-point number in `value` in place.
///
/// Integers, strings and structure are left untouched.
pub fn round_numbers(value: &mut Value, decimals: u32) {
    match value {
        Value::Number(n) if n.is_f64() => {
            if let Some(rounded) = n
                .as_f64()
                .map(|f| round_value(f, decimals))
                .and_then(serde_json::Number::from_f64)
            {
                *n = rounded;
            }
        }
        Value::Array(items) => {
            for item in items {
                round_numbers(item, decimals);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                round_numbers(item, decimals);
            }
        }
        _ => {}
    }
}

/// Parse converter output, round it and re-serialize compactly.
pub fn normalize(raw: &[u8], decimals: u32) -> WindResult<Vec<u8>> {
    let mut doc: Value = serde_json::from_slice(raw)
        .map_err(|e| WindError::ConversionFailure(format!("Unparsable converter output: {}", e)))?;

    round_numbers(&mut doc, decimals);

    serde_json::to_vec(&doc)
        .map_err(|e| WindError::ConversionFailure(format!("Failed to serialize document: {}", e)))
}
