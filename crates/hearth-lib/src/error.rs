//! Error taxonomy for the launcher core.
//!
//! Source and discovery errors are recovered locally by their callers (a dead
//! mirror is dropped, a failed probe marks a source unavailable). Registry and
//! download errors travel up to the UI with a short message and the technical
//! detail kept for logs.

use std::path::PathBuf;

/// Failures while fingerprinting a candidate mirror URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    /// Network failure or timeout reaching the candidate.
    #[error("Mirror is unreachable: {0}")]
    Unreachable(String),

    /// The URL answered but matched neither a JSON index nor a known file layout.
    #[error("No supported mirror layout found at {0}")]
    Unrecognized(String),

    /// Empty or malformed URL, or unusable custom headers.
    #[error("Invalid mirror URL: {0}")]
    InvalidInput(String),
}

/// Per-source failures. Never aborts a cross-source merge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Sign in required to use the official source")]
    Unauthenticated,

    #[error("Source unreachable: {0}")]
    Unreachable(String),

    #[error("Source is rate limiting requests")]
    RateLimited,

    #[error("Source returned malformed data: {0}")]
    Malformed(String),

    #[error("Version {0} is not available from this source")]
    VersionUnavailable(u32),
}

/// Mirror descriptor persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Mirror store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize mirror record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid mirror id '{0}' (use lowercase letters, digits, '-' and '_')")]
    InvalidId(String),
}

/// Instance registry failures, surfaced directly to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Instance I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Instance '{0}' not found")]
    NotFound(String),

    #[error("Target already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("Instance index is corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Invalid target directory: {0}")]
    InvalidTarget(String),

    #[error("Failed to persist configuration: {0}")]
    ConfigPersist(String),

    /// The instances root is being relocated; changes wait until it finishes.
    #[error("Instances are being moved")]
    MoveInProgress,
}

impl RegistryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegistryError::IoError {
            path: path.into(),
            source,
        }
    }
}

/// Terminal failures of a download run.
///
/// `Cancelled` shares the terminal exit with the others but is not a failure;
/// callers read `DownloadOutcome::cancelled` rather than matching on this.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    #[error("Could not resolve a version to download: {0}")]
    ResolutionFailed(String),

    #[error("Download failed: {0}")]
    TransferFailed(String),

    #[error("Failed to apply update: {0}")]
    PatchFailed(String),

    #[error("Installation is incomplete, missing: {}", .missing.join(", "))]
    ValidationFailed { missing: Vec<String> },

    #[error("A download is already running")]
    AlreadyRunning,

    #[error("Download cancelled")]
    Cancelled,
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failure_lists_missing_components() {
        let err = DownloadError::ValidationFailed {
            missing: vec!["executable".into(), "assets".into()],
        };
        assert_eq!(
            err.to_string(),
            "Installation is incomplete, missing: executable, assets"
        );
    }

    #[test]
    fn cancelled_is_distinguished() {
        assert!(DownloadError::Cancelled.is_cancelled());
        assert!(!DownloadError::TransferFailed("x".into()).is_cancelled());
    }
}
