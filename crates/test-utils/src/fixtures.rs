//! Common fixtures for artifact tests.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Valid-time labels used by the nearest-cycle scenarios.
pub mod labels {
    pub const JAN_1_00Z: &str = "2024010100";
    pub const JAN_1_06Z: &str = "2024010106";
    pub const JAN_1_12Z: &str = "2024010112";
    pub const DEC_31_18Z: &str = "2023123118";
}

/// Gzip-compress `data`.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("Failed to gzip test data");
    encoder.finish().expect("Failed to finish gzip stream")
}

/// Decompress gzip `data`.
pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .expect("Failed to gunzip test data");
    out
}

/// Decompress gzip `data` and parse it as JSON.
pub fn gunzip_json(data: &[u8]) -> serde_json::Value {
    serde_json::from_slice(&gunzip(data)).expect("Artifact is not valid JSON")
}
