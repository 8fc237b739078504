use crate::error::DownloadError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::watch;

/// Outward event sink for download and game-state notifications.
/// Implementations forward updates to the UI transport; delivery is best effort.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, event: &ProgressEvent);

    /// Game lifecycle changes. `exit_code` is only set for `Stopped` after a run.
    fn state_changed(&self, state: GameState, exit_code: Option<i32>);

    fn error(&self, event: &ErrorEvent);
}

/// A sink that drops everything.
/// Useful for background work or tests.
pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn progress(&self, _event: &ProgressEvent) {}
    fn state_changed(&self, _state: GameState, _exit_code: Option<i32>) {}
    fn error(&self, _event: &ErrorEvent) {}
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DownloadPhase {
    Idle,
    Resolving,
    Transferring,
    Patching,
    Validating,
    Complete,
    Failed,
    Cancelled,
}

impl DownloadPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadPhase::Complete | DownloadPhase::Failed | DownloadPhase::Cancelled
        )
    }

    /// Cancellation is honoured until patching starts.
    pub fn allows_cancel(&self) -> bool {
        matches!(
            self,
            DownloadPhase::Idle | DownloadPhase::Resolving | DownloadPhase::Transferring
        )
    }
}

/// Snapshot of the single active download.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadState {
    pub phase: DownloadPhase,
    /// Known once the target instance is resolved
    pub instance_id: Option<String>,
    pub bytes_downloaded: u64,
    pub bytes_total: Option<u64>,
    pub current_file_name: Option<String>,
}

impl Default for DownloadState {
    fn default() -> Self {
        Self {
            phase: DownloadPhase::Idle,
            instance_id: None,
            bytes_downloaded: 0,
            bytes_total: None,
            current_file_name: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: DownloadPhase,
    /// 0-100, or -1 for indeterminate
    pub percent: f64,
    /// Translation key; the core never renders text
    pub message_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum GameState {
    Downloading,
    Running,
    Stopped,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    ResolutionFailed,
    TransferFailed,
    PatchFailed,
    InstallValidationFailed,
    AlreadyRunning,
    LaunchFailed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub technical: Option<String>,
}

impl ErrorEvent {
    /// `None` for cancellation, which is never reported as an error.
    pub fn from_download_error(err: &DownloadError) -> Option<Self> {
        let (kind, message) = match err {
            DownloadError::Cancelled => return None,
            DownloadError::ResolutionFailed(_) => (
                ErrorKind::ResolutionFailed,
                "Could not find a version to download",
            ),
            DownloadError::TransferFailed(_) => (
                ErrorKind::TransferFailed,
                "The download failed on every available source",
            ),
            DownloadError::PatchFailed(_) => (ErrorKind::PatchFailed, "Could not apply the update"),
            DownloadError::ValidationFailed { .. } => (
                ErrorKind::InstallValidationFailed,
                "The installation is incomplete, try downloading again",
            ),
            DownloadError::AlreadyRunning => {
                (ErrorKind::AlreadyRunning, "A download is already running")
            }
        };
        Some(Self {
            kind,
            message: message.to_string(),
            technical: Some(err.to_string()),
        })
    }
}

/// Cancellation token wrapper
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Sender/token pair; `send(true)` cancels.
    pub fn pair() -> (watch::Sender<bool>, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (tx, CancelToken::new(rx))
    }

    /// Token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelToken::new(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; never resolves if the sender is gone uncancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
