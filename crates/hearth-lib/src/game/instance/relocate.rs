//! Copy-then-delete relocation of the instances root.
//!
//! The old tree is only removed after the new location has been durably
//! recorded in settings, so an interruption at any step leaves at least one
//! complete copy on disk.

use crate::error::RegistryError;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use walkdir::WalkDir;

const COPY_CHUNK: usize = 1024 * 1024;
/// A mid-file report is sent after this much time or this many bytes.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);
const PROGRESS_BYTES: u64 = 16 * COPY_CHUNK as u64;

#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub source: PathBuf,
    /// Path relative to the root being moved
    pub relative: PathBuf,
    pub size: u64,
}

/// Everything under a root, files ordered largest first.
#[derive(Debug, Clone, Default)]
pub struct MovePlan {
    pub files: Vec<PlannedFile>,
    /// Relative directories, recreated even when empty
    pub dirs: Vec<PathBuf>,
    pub total_bytes: u64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MoveProgress {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub current_file: String,
    pub files_done: usize,
    pub files_total: usize,
}

impl MoveProgress {
    pub fn percent(&self) -> f64 {
        if self.bytes_total == 0 {
            100.0
        } else {
            self.bytes_done as f64 * 100.0 / self.bytes_total as f64
        }
    }
}

/// Lexically absolute form of `path` (no `.`/`..`), without touching the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_default()
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Walk `root` and order its files largest first.
pub async fn plan_move(root: &Path) -> Result<MovePlan, RegistryError> {
    let root = root.to_path_buf();
    let walk_root = root.clone();
    tokio::task::spawn_blocking(move || {
        let mut plan = MovePlan::default();
        for entry in WalkDir::new(&walk_root).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| walk_root.clone());
                RegistryError::io(path, std::io::Error::other(e.to_string()))
            })?;
            let relative = entry
                .path()
                .strip_prefix(&walk_root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(entry.file_name()));

            if entry.file_type().is_dir() {
                plan.dirs.push(relative);
                continue;
            }
            let size = entry
                .metadata()
                .map(|m| m.len())
                .map_err(|e| RegistryError::io(entry.path(), std::io::Error::other(e.to_string())))?;
            plan.total_bytes += size;
            plan.files.push(PlannedFile {
                source: entry.path().to_path_buf(),
                relative,
                size,
            });
        }
        plan.files
            .sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.relative.cmp(&b.relative)));
        Ok(plan)
    })
    .await
    .map_err(|e| RegistryError::io(root, std::io::Error::other(e.to_string())))?
}

/// Copy every planned file under `target`.
///
/// Progress is reported while a file is copied and once more when it completes.
pub async fn copy_planned<F>(plan: &MovePlan, target: &Path, mut on_progress: F) -> Result<(), RegistryError>
where
    F: FnMut(MoveProgress),
{
    fs::create_dir_all(target)
        .await
        .map_err(|e| RegistryError::io(target, e))?;
    for dir in &plan.dirs {
        let dest = target.join(dir);
        fs::create_dir_all(&dest)
            .await
            .map_err(|e| RegistryError::io(&dest, e))?;
    }

    let mut bytes_done = 0u64;
    let mut buf = vec![0u8; COPY_CHUNK];
    for (i, file) in plan.files.iter().enumerate() {
        let dest = target.join(&file.relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RegistryError::io(parent, e))?;
        }
        let current_file = file.relative.to_string_lossy().into_owned();
        let mut report = |bytes_done: u64, files_done: usize| {
            on_progress(MoveProgress {
                bytes_done,
                bytes_total: plan.total_bytes,
                current_file: current_file.clone(),
                files_done,
                files_total: plan.files.len(),
            })
        };

        let mut reader = fs::File::open(&file.source)
            .await
            .map_err(|e| RegistryError::io(&file.source, e))?;
        let mut writer = fs::File::create(&dest)
            .await
            .map_err(|e| RegistryError::io(&dest, e))?;
        let mut last_report = Instant::now();
        let mut reported_bytes = bytes_done;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| RegistryError::io(&file.source, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| RegistryError::io(&dest, e))?;
            bytes_done += n as u64;
            if last_report.elapsed() >= PROGRESS_INTERVAL || bytes_done - reported_bytes >= PROGRESS_BYTES {
                last_report = Instant::now();
                reported_bytes = bytes_done;
                report(bytes_done, i);
            }
        }
        writer.flush().await.map_err(|e| RegistryError::io(&dest, e))?;
        drop(writer);

        // Keep the executable bit on the client binary.
        let permissions = fs::metadata(&file.source)
            .await
            .map_err(|e| RegistryError::io(&file.source, e))?
            .permissions();
        fs::set_permissions(&dest, permissions)
            .await
            .map_err(|e| RegistryError::io(&dest, e))?;

        report(bytes_done, i + 1);
    }
    Ok(())
}

/// Remove the old tree. Failure leaves a duplicate copy behind, never data loss.
pub async fn remove_old_tree(root: &Path) {
    match fs::remove_dir_all(root).await {
        Ok(()) => log::info!("[registry] Removed old instances root {:?}", root),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(
            "[registry] Could not remove old instances root {:?}: {}",
            root,
            e
        ),
    }
}
