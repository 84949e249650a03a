//! Error types for the wind services.

use thiserror::Error;

/// Result type alias using WindError.
pub type WindResult<T> = Result<T, WindError>;

/// Primary error type for acquisition and lookup operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WindError {
    // === Upstream ===
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    // === Lookup ===
    #[error("No data available: {0}")]
    NoDataAvailable(String),

    #[error("No data within searchLimit: {0}")]
    NoDataWithinLimit(String),

    // === Processing ===
    #[error("Conversion failed: {0}")]
    ConversionFailure(String),

    #[error("Storage error: {0}")]
    StorageFailure(String),

    // === Client ===
    #[error("Invalid params: {0}")]
    InvalidRequest(String),
}

impl WindError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            WindError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            WindError::NoDataAvailable(_) => "NoDataAvailable",
            WindError::NoDataWithinLimit(_) => "NoDataWithinLimit",
            WindError::ConversionFailure(_) => "ConversionFailure",
            WindError::StorageFailure(_) => "StorageFailure",
            WindError::InvalidRequest(_) => "InvalidRequest",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            WindError::InvalidRequest(_) => 400,

            WindError::NoDataAvailable(_) | WindError::NoDataWithinLimit(_) => 404,

            WindError::UpstreamUnavailable(_) => 502,

            WindError::ConversionFailure(_) | WindError::StorageFailure(_) => 500,
        }
    }

    /// Whether a caller may recover by trying an earlier cycle.
    pub fn is_upstream(&self) -> bool {
        matches!(self, WindError::UpstreamUnavailable(_))
    }
}

impl From<std::io::Error> for WindError {
    fn from(err: std::io::Error) -> Self {
        WindError::StorageFailure(err.to_string())
    }
}
