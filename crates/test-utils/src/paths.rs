//! Temporary directories for storage tests.

use std::path::PathBuf;

use tempfile::TempDir;

/// Creates a temporary directory for test output.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Creates a temporary directory with a specific prefix.
pub fn temp_test_dir_with_prefix(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("Failed to create temporary test directory")
}

/// Artifact and staging directories under one temporary root.
///
/// Neither subdirectory exists until the code under test creates it.
pub struct StoreDirs {
    pub root: TempDir,
    pub artifact_dir: PathBuf,
    pub staging_dir: PathBuf,
}

impl StoreDirs {
    pub fn new() -> Self {
        let root = temp_test_dir_with_prefix("wind_store");
        let artifact_dir = root.path().join("wind");
        let staging_dir = root.path().join("grib");
        Self {
            root,
            artifact_dir,
            staging_dir,
        }
    }
}

impl Default for StoreDirs {
    fn default() -> Self {
        Self::new()
    }
}
