//! Materialise staged archives into an instance's client directory.

use crate::error::DownloadError;
use crate::game::installer::config::{BACKUP_DIR, EXTRACT_DIR, REMOVED_LIST_ENTRY};
use crate::game::installer::transaction::ClientSwap;
use crate::game::instance::InstanceLayout;
use crate::game::sources::{Artifact, ArtifactKind};
use anyhow::{Context, Result};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

/// Apply staged artifacts, in plan order, to the instance's `game/` directory.
pub async fn apply_staged(layout: &InstanceLayout, staged: Vec<(Artifact, PathBuf)>) -> Result<(), DownloadError> {
    let layout = layout.clone();
    tokio::task::spawn_blocking(move || {
        for (artifact, archive) in &staged {
            let result = match artifact.kind() {
                ArtifactKind::FullArchive => install_full(&layout, archive, artifact.version),
                ArtifactKind::PatchDelta { from } => apply_delta(&layout.game_dir(), archive, from),
            };
            result.map_err(|e| {
                DownloadError::PatchFailed(format!("{}: {:#}", artifact.file_name, e))
            })?;
        }
        Ok(())
    })
    .await
    .map_err(|e| DownloadError::PatchFailed(format!("patch task failed: {}", e)))?
}

/// Extract a full archive beside the instance, then swap it in for `game/`.
fn install_full(layout: &InstanceLayout, archive: &Path, version: u32) -> Result<()> {
    let staging = layout.staging_dir();
    let extract_dir = staging.join(EXTRACT_DIR);
    if extract_dir.exists() {
        fs::remove_dir_all(&extract_dir)
            .with_context(|| format!("Remove stale extraction {:?}", extract_dir))?;
    }
    let written = extract_archive(archive, &extract_dir)?;
    log::info!(
        "[download] Extracted {} file(s) from {:?}",
        written,
        archive.file_name().unwrap_or_default()
    );

    let swap = ClientSwap::new(
        format!("install-{}", version),
        &layout.game_dir(),
        &staging.join(BACKUP_DIR),
    );
    swap.begin()?;
    if let Err(e) = swap.install(&extract_dir) {
        let _ = swap.rollback(&e.to_string());
        return Err(e);
    }
    swap.commit()
}

/// Overlay a delta onto an existing installation and honour its removal list.
fn apply_delta(game_dir: &Path, archive: &Path, from: u32) -> Result<()> {
    if !game_dir.is_dir() {
        anyhow::bail!("delta from version {} needs an existing installation", from);
    }
    let written = extract_archive(archive, game_dir)?;

    let removed = read_removed_list(archive)?;
    for relative in &removed {
        let target = game_dir.join(relative);
        let outcome = if target.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        };
        match outcome {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Remove {:?}", target)),
        }
    }
    log::info!(
        "[download] Applied delta from {}: {} written, {} removed",
        from,
        written,
        removed.len()
    );
    Ok(())
}

/// Extract every entry under `output_dir`, skipping entries that would escape it.
/// Returns the number of files written.
fn extract_archive(archive: &Path, output_dir: &Path) -> Result<usize> {
    let file = fs::File::open(archive).with_context(|| format!("Failed to open archive {:?}", archive))?;
    let mut zip = zip::ZipArchive::new(file).with_context(|| format!("Failed to read archive {:?}", archive))?;
    fs::create_dir_all(output_dir).with_context(|| format!("Create {:?}", output_dir))?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            log::warn!("[download] Skipping unsafe archive entry '{}'", entry.name());
            continue;
        };
        if relative.as_os_str() == REMOVED_LIST_ENTRY {
            continue;
        }

        let output_path = output_dir.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&output_path)?;
            continue;
        }
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output_file = fs::File::create(&output_path)
            .with_context(|| format!("Create {:?}", output_path))?;
        std::io::copy(&mut entry, &mut output_file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&output_path, fs::Permissions::from_mode(mode & 0o777))?;
        }
        written += 1;
    }
    Ok(written)
}

fn read_removed_list(archive: &Path) -> Result<Vec<PathBuf>> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    let mut contents = String::new();
    match zip.by_name(REMOVED_LIST_ENTRY) {
        Ok(mut entry) => {
            entry.read_to_string(&mut contents)?;
        }
        Err(zip::result::ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let path = sanitize_relative(line);
            if path.is_none() {
                log::warn!("[download] Ignoring unsafe removal path '{}'", line);
            }
            path
        })
        .collect())
}

/// Accept only plain relative paths without `..`.
fn sanitize_relative(raw: &str) -> Option<PathBuf> {
    let path = Path::new(raw.trim_start_matches(['/', '\\']));
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
