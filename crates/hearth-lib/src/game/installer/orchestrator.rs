//! Download orchestration: resolve, transfer, patch, validate, hand off.
//!
//! One download may be active per orchestrator. A second request while one is
//! running is rejected, not queued.

use super::config::PROGRESS_INTERVAL_MS;
use super::core::downloader::{stage_artifact, StageRequest};
use super::core::patcher;
use super::core::traits::{LaunchHandoff, LaunchRequest};
use super::types::{
    CancelToken, DownloadPhase, DownloadState, ErrorEvent, ErrorKind, GameState, ProgressEvent,
    ProgressSink,
};
use crate::error::DownloadError;
use crate::game::instance::{InstanceLayout, InstanceMeta, InstanceRegistry};
use crate::game::resolution::VersionResolutionService;
use crate::game::sources::{TransferPlan, VersionSource};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    /// Falls back to the selected instance
    pub instance_id: Option<String>,
}

/// Terminal result of a run. `cancelled` is never reported as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub success: bool,
    pub cancelled: bool,
    pub error: Option<DownloadError>,
    /// Version materialised on success
    pub installed_version: Option<u32>,
}

impl DownloadOutcome {
    fn succeeded(version: u32) -> Self {
        Self {
            success: true,
            cancelled: false,
            error: None,
            installed_version: Some(version),
        }
    }

    fn cancelled() -> Self {
        Self {
            success: false,
            cancelled: true,
            error: None,
            installed_version: None,
        }
    }

    fn failed(error: DownloadError) -> Self {
        Self {
            success: false,
            cancelled: false,
            error: Some(error),
            installed_version: None,
        }
    }
}

struct ActiveDownload {
    cancel_tx: watch::Sender<bool>,
    state: DownloadState,
}

/// Clears the active slot when the run ends, however it ends.
struct ActiveGuard<'a> {
    slot: &'a Mutex<Option<ActiveDownload>>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct DownloadOrchestrator {
    registry: Arc<InstanceRegistry>,
    resolver: Arc<VersionResolutionService>,
    sink: Arc<dyn ProgressSink>,
    launcher: Option<Arc<dyn LaunchHandoff>>,
    client: Client,
    active: Mutex<Option<ActiveDownload>>,
}

/// Running byte counters across the artifacts of one plan.
struct TransferProgress {
    completed_bytes: u64,
    expected_total: Option<u64>,
    last_emit: Option<Instant>,
}

impl DownloadOrchestrator {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        resolver: Arc<VersionResolutionService>,
        sink: Arc<dyn ProgressSink>,
        client: Client,
    ) -> Self {
        Self {
            registry,
            resolver,
            sink,
            launcher: None,
            client,
            active: Mutex::new(None),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn LaunchHandoff>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Snapshot of the active download, if any.
    pub fn state(&self) -> Option<DownloadState> {
        lock(&self.active).as_ref().map(|a| a.state.clone())
    }

    /// Request cancellation. Returns whether a cancellable download was signalled;
    /// once patching has started the request is ignored.
    pub fn cancel(&self) -> bool {
        let active = lock(&self.active);
        match active.as_ref() {
            Some(download) if download.state.phase.allows_cancel() => {
                log::info!("[download] Cancellation requested during {:?}", download.state.phase);
                download.cancel_tx.send_replace(true);
                true
            }
            Some(download) => {
                log::debug!(
                    "[download] Cancellation ignored during {:?}",
                    download.state.phase
                );
                false
            }
            None => false,
        }
    }

    fn try_begin(&self) -> Option<(CancelToken, ActiveGuard<'_>)> {
        let mut active = lock(&self.active);
        if active.is_some() {
            return None;
        }
        let (cancel_tx, token) = CancelToken::pair();
        *active = Some(ActiveDownload {
            cancel_tx,
            state: DownloadState::default(),
        });
        Some((token, ActiveGuard { slot: &self.active }))
    }

    fn update_state(&self, f: impl FnOnce(&mut DownloadState)) {
        if let Some(active) = lock(&self.active).as_mut() {
            f(&mut active.state);
        }
    }

    fn set_phase(&self, phase: DownloadPhase) {
        self.update_state(|s| s.phase = phase);
    }

    fn emit(&self, phase: DownloadPhase, percent: f64, key: &str, args: BTreeMap<String, String>) {
        let (bytes_done, bytes_total) = self
            .state()
            .map(|s| (s.bytes_downloaded, s.bytes_total))
            .unwrap_or((0, None));
        self.sink.progress(&ProgressEvent {
            phase,
            percent,
            message_key: key.to_string(),
            args,
            bytes_done,
            bytes_total,
        });
    }

    /// Enter Patching unless a cancel already arrived. Holding the slot lock
    /// orders this against `cancel()`, so no cancel is accepted afterwards.
    fn begin_patching(&self, cancel: &CancelToken) -> Result<(), DownloadError> {
        let mut active = lock(&self.active);
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        if let Some(active) = active.as_mut() {
            active.state.phase = DownloadPhase::Patching;
        }
        Ok(())
    }

    fn enter(&self, phase: DownloadPhase, key: &str, args: BTreeMap<String, String>) {
        self.set_phase(phase);
        self.emit(phase, -1.0, key, args);
    }

    /// Download (if needed) and optionally launch the target instance.
    ///
    /// Never returns an error: failures arrive in the outcome and as sink events.
    pub async fn download_and_launch<F>(&self, request: DownloadRequest, should_launch_after: F) -> DownloadOutcome
    where
        F: FnOnce() -> bool + Send,
    {
        let Some((cancel, guard)) = self.try_begin() else {
            log::warn!("[download] Rejected download request: another download is active");
            return DownloadOutcome::failed(DownloadError::AlreadyRunning);
        };

        self.sink.state_changed(GameState::Downloading, None);
        let result = self.run(&request, &cancel).await;

        let outcome = match result {
            Ok((meta, layout)) => {
                let version = meta.installed_version.unwrap_or_default();
                self.set_phase(DownloadPhase::Complete);
                self.emit(
                    DownloadPhase::Complete,
                    100.0,
                    "download.complete",
                    args([("version", version.to_string())]),
                );
                // A new download may start while the game runs.
                drop(guard);

                match (&self.launcher, should_launch_after()) {
                    (Some(launcher), true) => self.launch(launcher.as_ref(), meta, layout).await,
                    _ => self.sink.state_changed(GameState::Stopped, None),
                }
                return DownloadOutcome::succeeded(version);
            }
            Err(DownloadError::Cancelled) => {
                self.set_phase(DownloadPhase::Cancelled);
                log::info!("[download] Download cancelled");
                DownloadOutcome::cancelled()
            }
            Err(e) => {
                self.set_phase(DownloadPhase::Failed);
                log::error!("[download] Download failed: {}", e);
                if let Some(event) = ErrorEvent::from_download_error(&e) {
                    self.sink.error(&event);
                }
                DownloadOutcome::failed(e)
            }
        };
        drop(guard);
        self.sink.state_changed(GameState::Stopped, None);
        outcome
    }

    async fn launch(&self, launcher: &dyn LaunchHandoff, instance: InstanceMeta, layout: InstanceLayout) {
        log::info!("[download] Handing instance {} to launcher", instance.id);
        if let Err(e) = launcher
            .launch(LaunchRequest { instance, layout }, self.sink.clone())
            .await
        {
            log::error!("[download] Launch failed: {:#}", e);
            self.sink.error(&ErrorEvent {
                kind: ErrorKind::LaunchFailed,
                message: "The game could not be started".to_string(),
                technical: Some(format!("{:#}", e)),
            });
            self.sink.state_changed(GameState::Stopped, None);
        }
    }

    async fn run(
        &self,
        request: &DownloadRequest,
        cancel: &CancelToken,
    ) -> Result<(InstanceMeta, InstanceLayout), DownloadError> {
        self.enter(DownloadPhase::Resolving, "download.resolving", BTreeMap::new());
        if self.registry.is_moving() {
            return Err(DownloadError::ResolutionFailed(
                "the instances directory is being moved".to_string(),
            ));
        }

        let meta = match &request.instance_id {
            Some(id) => self.registry.get(id).await.ok_or_else(|| {
                DownloadError::ResolutionFailed(format!("instance '{}' not found", id))
            })?,
            None => self
                .registry
                .selected()
                .await
                .ok_or_else(|| DownloadError::ResolutionFailed("no instance selected".to_string()))?,
        };
        let layout = self
            .registry
            .layout(&meta.id)
            .await
            .ok_or_else(|| DownloadError::ResolutionFailed(format!("instance '{}' not found", meta.id)))?;
        self.update_state(|s| s.instance_id = Some(meta.id.clone()));

        // Instances tracking latest are re-resolved every time.
        let target = if meta.tracks_latest() {
            self.resolver
                .latest_version(meta.branch, true)
                .await
                .ok_or_else(|| {
                    DownloadError::ResolutionFailed(format!("no source offers a {} build", meta.branch))
                })?
        } else {
            meta.version
        };
        log::info!(
            "[download] Instance {} ({}) target version {}",
            meta.id,
            meta.branch,
            target
        );
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let installed_valid = self.registry.validate(&layout.game_dir()).is_valid;
        if installed_valid && meta.installed_version == Some(target) {
            log::info!("[download] Version {} already installed, skipping transfer", target);
        } else {
            let base = meta.installed_version.filter(|_| installed_valid);
            self.fetch_and_apply(&meta, &layout, target, base, cancel).await?;
        }

        self.enter(DownloadPhase::Validating, "download.validating", BTreeMap::new());
        let validation = self.registry.validate(&layout.game_dir());
        if !validation.is_valid {
            // Leave files and staging in place for inspection or a retry.
            if let Err(e) = self.registry.mark_not_installed(&meta.id).await {
                log::warn!("[download] Could not update instance {}: {}", meta.id, e);
            }
            return Err(DownloadError::ValidationFailed {
                missing: validation.missing_components,
            });
        }

        let meta = self
            .registry
            .record_installed(&meta.id, target)
            .await
            .map_err(|e| DownloadError::PatchFailed(format!("recording install: {}", e)))?;
        match tokio::fs::remove_dir_all(layout.staging_dir()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("[download] Could not clear staging: {}", e),
        }
        Ok((meta, layout))
    }

    /// Try each candidate source in failover order. A failed delta is retried
    /// once as a full archive from the same source before moving on.
    ///
    /// A delta that failed while patching may have rewritten part of `game/`.
    /// From then on only full archives are tried, and if none succeeds the
    /// installed build is discarded so the next run cannot patch over it.
    async fn fetch_and_apply(
        &self,
        meta: &InstanceMeta,
        layout: &InstanceLayout,
        target: u32,
        base: Option<u32>,
        cancel: &CancelToken,
    ) -> Result<(), DownloadError> {
        let candidates = self.resolver.candidates_for(meta.branch, target).await;
        if candidates.is_empty() {
            return Err(DownloadError::ResolutionFailed(format!(
                "no source can serve {} {}",
                meta.branch, target
            )));
        }

        let mut base = base;
        let mut base_damaged = false;
        let mut last_error = None;
        for source in &candidates {
            let mut bases = vec![base];
            if base.is_some() {
                bases.push(None);
            }

            for plan_base in bases {
                let plan = match source.resolve_transfer_plan(meta.branch, target, plan_base).await {
                    Ok(plan) => plan,
                    Err(e) => {
                        log::warn!("[download] Source '{}' cannot plan {}: {}", source.id(), target, e);
                        last_error = Some(DownloadError::ResolutionFailed(format!("{}: {}", source.id(), e)));
                        break;
                    }
                };

                match self.execute_plan(source, &plan, layout, cancel).await {
                    Ok(()) => return Ok(()),
                    Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                    Err(e) => {
                        let was_delta = plan.is_delta();
                        log::warn!(
                            "[download] {} plan from '{}' failed: {}",
                            if was_delta { "Delta" } else { "Full" },
                            source.id(),
                            e
                        );
                        if was_delta && matches!(e, DownloadError::PatchFailed(_)) {
                            base = None;
                            base_damaged = true;
                        }
                        last_error = Some(e);
                        if !was_delta {
                            break;
                        }
                    }
                }
            }
        }

        if base_damaged {
            log::warn!(
                "[download] Instance {} was partly patched; its installed build is discarded",
                meta.id
            );
            if let Err(e) = self.registry.discard_install(&meta.id).await {
                log::warn!("[download] Could not update instance {}: {}", meta.id, e);
            }
        }
        Err(last_error.unwrap_or_else(|| {
            DownloadError::TransferFailed("no source completed the download".to_string())
        }))
    }

    async fn execute_plan(
        &self,
        source: &VersionSource,
        plan: &TransferPlan,
        layout: &InstanceLayout,
        cancel: &CancelToken,
    ) -> Result<(), DownloadError> {
        let staging = layout.staging_dir();
        let mut progress = TransferProgress {
            completed_bytes: 0,
            expected_total: plan.expected_bytes(),
            last_emit: None,
        };
        self.update_state(|s| {
            s.bytes_downloaded = 0;
            s.bytes_total = progress.expected_total;
            s.current_file_name = None;
        });
        self.enter(
            DownloadPhase::Transferring,
            "download.transferring",
            args([("source", source.display_name().to_string())]),
        );

        let mut staged: Vec<(_, PathBuf)> = Vec::with_capacity(plan.artifacts.len());
        for artifact in &plan.artifacts {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            self.update_state(|s| s.current_file_name = Some(artifact.file_name.clone()));

            let stage = StageRequest {
                artifact,
                staged_name: artifact.staged_name(plan.branch),
                headers: &plan.headers,
            };
            let completed = progress.completed_bytes;
            let mut on_bytes = |done: u64, total: Option<u64>| {
                self.report_bytes(&mut progress, completed + done, total.map(|t| completed + t), &artifact.file_name);
            };
            let path = stage_artifact(&self.client, &staging, &stage, cancel, &mut on_bytes).await?;

            let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            progress.completed_bytes += size;
            staged.push((artifact.clone(), path));
        }

        self.begin_patching(cancel)?;
        self.emit(
            DownloadPhase::Patching,
            -1.0,
            "download.patching",
            args([("version", plan.version.to_string())]),
        );
        patcher::apply_staged(layout, staged).await
    }

    fn report_bytes(&self, progress: &mut TransferProgress, done: u64, artifact_total: Option<u64>, file: &str) {
        let total = progress.expected_total.or(artifact_total);
        self.update_state(|s| {
            s.bytes_downloaded = done;
            s.bytes_total = total;
        });

        let now = Instant::now();
        let finished = total.is_some_and(|t| done >= t);
        if let Some(last) = progress.last_emit {
            if !finished && now.duration_since(last) < Duration::from_millis(PROGRESS_INTERVAL_MS) {
                return;
            }
        }
        progress.last_emit = Some(now);

        let percent = match total {
            Some(t) if t > 0 => (done as f64 * 100.0 / t as f64).min(100.0),
            _ => -1.0,
        };
        self.sink.progress(&ProgressEvent {
            phase: DownloadPhase::Transferring,
            percent,
            message_key: "download.transferring".to_string(),
            args: args([("file", file.to_string())]),
            bytes_done: done,
            bytes_total: total,
        });
    }
}

fn args<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
