//! Client download pipeline: staging, patching and the orchestrator that drives it.

pub mod config;
pub mod core;
pub mod orchestrator;
pub mod transaction;
pub mod types;

pub use self::core::traits::{LaunchHandoff, LaunchRequest};
pub use orchestrator::{DownloadOrchestrator, DownloadOutcome, DownloadRequest};
pub use types::{
    CancelToken, DownloadPhase, DownloadState, ErrorEvent, ErrorKind, GameState, ProgressEvent,
    ProgressSink, SilentSink,
};
