//! Checkpoint and results file storage for layer runs.
//!
//! Checkpoints are written as new timestamped files and never replaced:
//! `<checkpoint_dir>/layer_<N>_checkpoint_<YYYYMMDD_HHMMSS>.json`. The
//! lexicographically greatest name is the most recent one. A save that lands
//! in the same second as an earlier one gets a `_NNN` suffix, which still
//! sorts after the unsuffixed name and before the next second.
//!
//! Results files are a single file per layer in `results_dir`, replaced
//! atomically via a temporary file and rename.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Suffixes tried for same-second collisions before giving up.
const MAX_SAME_SECOND_SAVES: u32 = 1000;

/// Errors that can occur during checkpoint storage operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Failed to read or write to the filesystem.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize layer data.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage directory could not be created.
    #[error("Failed to create storage directory: {0}")]
    DirectoryCreationFailed(String),

    /// A results file required by a later layer is missing.
    #[error("Results file not found: {}", .0.display())]
    ResultsNotFound(PathBuf),

    /// Too many checkpoints were written within one second.
    #[error("Could not allocate a unique checkpoint name for layer {0}")]
    NameExhausted(u8),
}

/// File name of the persisted results for a layer.
pub fn results_file_name(layer: u8) -> String {
    let kind = match layer {
        1 => "structure",
        2 => "execution",
        3 => "output",
        _ => "unknown",
    };
    format!("layer_{}_{}_evaluation.json", layer, kind)
}

/// Fixed-width `YYYYMMDD_HHMMSS` stamp used in file names.
///
/// Stamps are UTC so that name order matches write order across DST changes.
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

fn checkpoint_prefix(layer: u8) -> String {
    format!("layer_{}_checkpoint_", layer)
}

/// Local file storage for layer checkpoints and results.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    checkpoint_dir: PathBuf,
    results_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(checkpoint_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            results_dir: results_dir.into(),
        }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Path of the persisted results file for a layer.
    pub fn results_path(&self, layer: u8) -> PathBuf {
        self.results_dir.join(results_file_name(layer))
    }

    async fn ensure_directory(dir: &Path) -> Result<(), CheckpointError> {
        if !dir.exists() {
            fs::create_dir_all(dir).await.map_err(|e| {
                CheckpointError::DirectoryCreationFailed(format!(
                    "Failed to create directory {:?}: {}",
                    dir, e
                ))
            })?;
        }
        Ok(())
    }

    /// Writes `data` as a new checkpoint file for `layer` and returns its path.
    pub async fn save<T: Serialize>(&self, layer: u8, data: &T) -> Result<PathBuf, CheckpointError> {
        Self::ensure_directory(&self.checkpoint_dir).await?;

        let json = serde_json::to_string_pretty(data)?;
        let stamp = file_stamp(Utc::now());

        for seq in 0..MAX_SAME_SECOND_SAVES {
            let name = if seq == 0 {
                format!("{}{}.json", checkpoint_prefix(layer), stamp)
            } else {
                format!("{}{}_{:03}.json", checkpoint_prefix(layer), stamp, seq)
            };
            let path = self.checkpoint_dir.join(name);

            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;

            info!(layer, path = %path.display(), "Checkpoint saved");
            return Ok(path);
        }

        Err(CheckpointError::NameExhausted(layer))
    }

    /// Path of the most recent checkpoint for `layer`, if any.
    pub async fn latest_checkpoint_path(&self, layer: u8) -> Option<PathBuf> {
        let mut entries = fs::read_dir(&self.checkpoint_dir).await.ok()?;
        let prefix = checkpoint_prefix(layer);

        let mut latest: Option<String> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            if latest.as_ref().map_or(true, |current| name > *current) {
                latest = Some(name);
            }
        }

        latest.map(|name| self.checkpoint_dir.join(name))
    }

    /// Loads the most recent checkpoint for `layer`.
    ///
    /// A missing directory, no matching file, or an unreadable/corrupt file all
    /// yield `None`.
    pub async fn load<T: DeserializeOwned>(&self, layer: u8) -> Option<T> {
        let path = match self.latest_checkpoint_path(layer).await {
            Some(path) => path,
            None => {
                debug!(layer, dir = %self.checkpoint_dir.display(), "No checkpoint found");
                return None;
            }
        };

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(layer, path = %path.display(), error = %e, "Failed to read checkpoint");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(data) => {
                info!(layer, path = %path.display(), "Loaded checkpoint");
                Some(data)
            }
            Err(e) => {
                warn!(layer, path = %path.display(), error = %e, "Ignoring corrupt checkpoint");
                None
            }
        }
    }

    /// Replaces the results file for `layer` and returns its path.
    pub async fn save_results<T: Serialize>(
        &self,
        layer: u8,
        data: &T,
    ) -> Result<PathBuf, CheckpointError> {
        let path = self.results_path(layer);
        write_json_atomic(&path, data).await?;
        info!(layer, path = %path.display(), "Results saved");
        Ok(path)
    }

    /// Loads the persisted results for `layer`.
    pub async fn load_results<T: DeserializeOwned>(&self, layer: u8) -> Result<T, CheckpointError> {
        let path = self.results_path(layer);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CheckpointError::ResultsNotFound(path))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Writes pretty JSON to `path` through a sibling temporary file and rename.
pub async fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        CheckpointStore::ensure_directory(parent).await?;
    }

    let json = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}
