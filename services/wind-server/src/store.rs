//! On-disk artifact storage.
//!
//! Layout:
//! - `<artifact_dir>/<validTime>.json.gz` - published artifacts
//! - `<staging_dir>/<cycle>.<fNNN>` - raw upstream payloads
//! - `<staging_dir>/<validTime>.json` - transient converter output
//!
//! Artifacts are published by writing `<validTime>.json.gz.partial` and
//! renaming it into place, so readers never see a partially written file.
//! An artifact is never replaced once published.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::fs;
use tracing::{debug, info, warn};
use wind_common::{ValidTime, WindError, WindResult};

const ARTIFACT_SUFFIX: &str = ".json.gz";

/// Answers whether an artifact exists for a valid-time label.
///
/// Implementations must not create or modify anything.
pub trait Availability: Send + Sync {
    fn exists(&self, label: &str) -> bool;
}

/// Result of publishing an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publish {
    /// Written to the given path, compressed size in bytes.
    Stored { path: PathBuf, bytes: u64 },
    /// An artifact for this valid time already existed and was left as is.
    Skipped,
}

/// Filesystem-backed artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    artifact_dir: PathBuf,
    staging_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(artifact_dir: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Create the artifact and staging directories if missing.
    pub async fn ensure_dirs(&self) -> WindResult<()> {
        fs::create_dir_all(&self.artifact_dir).await.map_err(|e| {
            WindError::StorageFailure(format!(
                "Failed to create {}: {}",
                self.artifact_dir.display(),
                e
            ))
        })?;
        fs::create_dir_all(&self.staging_dir).await.map_err(|e| {
            WindError::StorageFailure(format!(
                "Failed to create {}: {}",
                self.staging_dir.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Path of the published artifact for `label`.
    pub fn artifact_path(&self, label: &str) -> PathBuf {
        self.artifact_dir.join(format!("{}{}", label, ARTIFACT_SUFFIX))
    }

    /// Path of the raw upstream payload for a cycle and offset.
    pub fn staging_path(&self, valid_time: &ValidTime) -> PathBuf {
        self.staging_dir.join(valid_time.staging_name())
    }

    /// Path of the converter output for `label` before compression.
    pub fn converted_path(&self, label: &str) -> PathBuf {
        self.staging_dir.join(format!("{}.json", label))
    }

    /// Gzip `json` and publish it as the artifact for `label`.
    pub async fn publish(&self, label: &str, json: &[u8]) -> WindResult<Publish> {
        let final_path = self.artifact_path(label);
        if fs::try_exists(&final_path).await? {
            debug!(label = %label, "Artifact already published, not replacing");
            return Ok(Publish::Skipped);
        }

        let compressed = gzip(json)?;
        let partial_path = self
            .artifact_dir
            .join(format!("{}{}.partial", label, ARTIFACT_SUFFIX));

        if let Err(e) = fs::write(&partial_path, &compressed).await {
            fs::remove_file(&partial_path).await.ok();
            return Err(WindError::StorageFailure(format!(
                "Failed to write {}: {}",
                partial_path.display(),
                e
            )));
        }

        if let Err(e) = fs::rename(&partial_path, &final_path).await {
            fs::remove_file(&partial_path).await.ok();
            return Err(WindError::StorageFailure(format!(
                "Failed to publish {}: {}",
                final_path.display(),
                e
            )));
        }

        info!(
            label = %label,
            path = %final_path.display(),
            raw_bytes = json.len(),
            bytes = compressed.len(),
            "Published artifact"
        );

        Ok(Publish::Stored {
            path: final_path,
            bytes: compressed.len() as u64,
        })
    }

    /// Read the stored (gzip) bytes for `label`.
    pub async fn read(&self, label: &str) -> WindResult<Vec<u8>> {
        let path = self.artifact_path(label);
        fs::read(&path).await.map_err(|e| {
            WindError::StorageFailure(format!("Failed to read {}: {}", path.display(), e))
        })
    }

    /// Remove every file in the staging area, returning how many were removed.
    ///
    /// A missing staging directory counts as already clean.
    pub async fn clear_staging(&self) -> WindResult<usize> {
        let mut entries = match fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staged file"),
                }
            }
        }

        debug!(removed = removed, dir = %self.staging_dir.display(), "Cleared staging area");
        Ok(removed)
    }

    /// Sorted labels of all published artifacts.
    pub async fn list_labels(&self) -> WindResult<Vec<String>> {
        let mut entries = match fs::read_dir(&self.artifact_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut labels = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(label) = name.strip_suffix(ARTIFACT_SUFFIX) {
                labels.push(label.to_string());
            }
        }

        labels.sort();
        Ok(labels)
    }
}

impl Availability for ArtifactStore {
    fn exists(&self, label: &str) -> bool {
        self.artifact_path(label).is_file()
    }
}

fn gzip(data: &[u8]) -> WindResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| WindError::StorageFailure(format!("Compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| WindError::StorageFailure(format!("Compression failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{gunzip, StoreDirs};
    use wind_common::{Cycle, ForecastOffset};

    fn store(dirs: &StoreDirs) -> ArtifactStore {
        ArtifactStore::new(&dirs.artifact_dir, &dirs.staging_dir)
    }

    #[test]
    fn test_paths() {
        let store = ArtifactStore::new("/data/wind", "/data/grib");
        let vt = ValidTime::new(
            Cycle::parse_label("2024011512").unwrap(),
            ForecastOffset::new(6),
        );
        assert_eq!(
            store.artifact_path("2024011518"),
            PathBuf::from("/data/wind/2024011518.json.gz")
        );
        assert_eq!(
            store.staging_path(&vt),
            PathBuf::from("/data/grib/2024011512.f006")
        );
        assert_eq!(
            store.converted_path("2024011518"),
            PathBuf::from("/data/grib/2024011518.json")
        );
    }

    #[test]
    fn test_exists_does_not_create_directories() {
        let dirs = StoreDirs::new();
        let store = store(&dirs);
        assert!(!store.exists("2024010100"));
        assert!(!dirs.artifact_dir.exists());
    }

    #[tokio::test]
    async fn test_publish_and_read() {
        let dirs = StoreDirs::new();
        let store = store(&dirs);
        store.ensure_dirs().await.unwrap();

        let json = br#"[{"data":[1.25,2.5]}]"#;
        let outcome = store.publish("2024010100", json).await.unwrap();
        assert!(matches!(outcome, Publish::Stored { .. }));
        assert!(store.exists("2024010100"));

        let stored = store.read("2024010100").await.unwrap();
        assert_eq!(gunzip(&stored), json);

        // No partial file left behind
        let leftovers: Vec<_> = std::fs::read_dir(&dirs.artifact_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_publish_never_overwrites() {
        let dirs = StoreDirs::new();
        let store = store(&dirs);
        store.ensure_dirs().await.unwrap();

        store.publish("2024010106", b"[1]").await.unwrap();
        let second = store.publish("2024010106", b"[2]").await.unwrap();
        assert_eq!(second, Publish::Skipped);

        let stored = store.read("2024010106").await.unwrap();
        assert_eq!(gunzip(&stored), b"[1]");
    }

    #[tokio::test]
    async fn test_publish_without_dirs_is_storage_failure() {
        let dirs = StoreDirs::new();
        let store = store(&dirs);
        let err = store.publish("2024010100", b"[]").await.unwrap_err();
        assert_eq!(err.kind(), "StorageFailure");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_write_removes_partial_file() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }

        let dirs = StoreDirs::new();
        let store = store(&dirs);
        store.ensure_dirs().await.unwrap();

        // Writes through the partial path fail with ENOSPC
        let partial = dirs.artifact_dir.join("2024010100.json.gz.partial");
        std::os::unix::fs::symlink(full, &partial).unwrap();

        let err = store.publish("2024010100", b"[1]").await.unwrap_err();
        assert!(matches!(err, WindError::StorageFailure(_)));
        assert!(std::fs::symlink_metadata(&partial).is_err());
        assert!(!store.exists("2024010100"));
    }

    #[tokio::test]
    async fn test_read_missing_is_storage_failure() {
        let dirs = StoreDirs::new();
        let err = store(&dirs).read("2024010100").await.unwrap_err();
        assert!(matches!(err, WindError::StorageFailure(_)));
    }

    #[tokio::test]
    async fn test_clear_staging() {
        let dirs = StoreDirs::new();
        let store = store(&dirs);
        assert_eq!(store.clear_staging().await.unwrap(), 0);

        store.ensure_dirs().await.unwrap();
        std::fs::write(dirs.staging_dir.join("2024010100.f000"), b"GRIB").unwrap();
        std::fs::write(dirs.staging_dir.join("2024010100.json"), b"[]").unwrap();
        store.publish("2024010100", b"[]").await.unwrap();

        assert_eq!(store.clear_staging().await.unwrap(), 2);
        assert_eq!(std::fs::read_dir(&dirs.staging_dir).unwrap().count(), 0);
        // Published artifacts are untouched
        assert!(store.exists("2024010100"));
    }

    #[tokio::test]
    async fn test_list_labels_sorted() {
        let dirs = StoreDirs::new();
        let store = store(&dirs);
        assert!(store.list_labels().await.unwrap().is_empty());

        store.ensure_dirs().await.unwrap();
        for label in ["2024010112", "2023123118", "2024010100"] {
            store.publish(label, b"[]").await.unwrap();
        }
        std::fs::write(dirs.artifact_dir.join("notes.txt"), b"x").unwrap();

        assert_eq!(
            store.list_labels().await.unwrap(),
            vec!["2023123118", "2024010100", "2024010112"]
        );
    }
}
