//! Error types for codexctl.

use std::path::PathBuf;

use thiserror::Error;

use crate::hardware::HardwareClass;

pub type Result<T> = std::result::Result<T, UpdateError>;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Version {version} is not known for {hardware}. Try `codexctl list` or refresh version-ids.json")]
    UnknownVersion {
        version: String,
        hardware: HardwareClass,
    },

    #[error("{0} does not support toltec")]
    ToltecUnsupported(HardwareClass),

    #[error("Not found: {url}")]
    NotFound { url: String },

    #[error("Network error while fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("{file} is too small to be a firmware image ({size} bytes)")]
    TooSmall { file: String, size: u64 },

    #[error("{0}")]
    EngineMismatch(String),

    #[error("{hardware} has no legacy update engine, version {version} cannot be installed")]
    LegacyEngineUnavailable {
        hardware: HardwareClass,
        version: String,
    },

    #[error("version-ids.json @ {} is corrupted ({reason}). Please delete it and try again", path.display())]
    CorruptCache { path: PathBuf, reason: String },

    #[error("Invalid version format: {0:?}")]
    InvalidVersionFormat(String),

    #[error("Command `{command}` failed with exit code {code}: {stderr}")]
    RemoteCommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Device {0} is not reachable")]
    Unreachable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Expected {expected:?} in {}, found {found:?}", package.display())]
    BootloaderExtraction {
        package: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl UpdateError {
    /// Download integrity failures leave nothing on disk and may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpdateError::Network { .. }
                | UpdateError::ChecksumMismatch { .. }
                | UpdateError::TooSmall { .. }
        )
    }
}
