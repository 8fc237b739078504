use super::types::{is_valid_id, MirrorDescriptor};
use crate::error::StoreError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;

const MIRRORS_DIR: &str = "mirrors";
const RECORD_EXTENSION: &str = "json";

/// File-backed mirror configuration: one JSON record per mirror under
/// `<appDir>/mirrors/<id>.json`. The store is the union of all records on disk.
///
/// Writes are last-writer-wins; in-process serialisation of reloads is the
/// resolution service's job.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    dir: PathBuf,
}

impl MirrorStore {
    pub fn new(app_dir: &Path) -> Self {
        Self {
            dir: app_dir.join(MIRRORS_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    /// Load every record, ordered by `(priority, id)`.
    ///
    /// Malformed records are skipped with a warning; only directory-level I/O
    /// failures abort the listing.
    pub async fn list(&self) -> Result<Vec<MirrorDescriptor>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut seen = HashSet::new();
        let mut mirrors = Vec::with_capacity(paths.len());
        for path in paths {
            match load_record(&path).await {
                Ok(descriptor) => {
                    if !seen.insert(descriptor.id.clone()) {
                        log::warn!(
                            "[mirrors] Duplicate mirror id '{}' in {:?}, skipping",
                            descriptor.id,
                            path
                        );
                        continue;
                    }
                    mirrors.push(descriptor);
                }
                Err(e) => {
                    log::warn!("[mirrors] Skipping malformed mirror record {:?}: {}", path, e);
                }
            }
        }

        mirrors.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        Ok(mirrors)
    }

    pub async fn get(&self, id: &str) -> Result<Option<MirrorDescriptor>, StoreError> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        match load_record(&path).await {
            Ok(descriptor) => Ok(Some(descriptor)),
            Err(e) => {
                log::warn!("[mirrors] Mirror record {:?} is unreadable: {}", path, e);
                Ok(None)
            }
        }
    }

    pub async fn exists(&self, id: &str) -> bool {
        is_valid_id(id) && self.record_path(id).exists()
    }

    /// Upsert by id. An existing record with the same id is overwritten.
    pub async fn save(&self, descriptor: &MirrorDescriptor) -> Result<(), StoreError> {
        if !is_valid_id(&descriptor.id) {
            return Err(StoreError::InvalidId(descriptor.id.clone()));
        }
        fs::create_dir_all(&self.dir).await?;

        let path = self.record_path(&descriptor.id);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(descriptor)?;
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &path).await?;

        log::debug!("[mirrors] Saved mirror '{}' to {:?}", descriptor.id, path);
        Ok(())
    }

    /// Remove a record. Returns whether anything was removed; absent ids are not an error.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => {
                log::info!("[mirrors] Deleted mirror '{}'", id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// First free id among `base`, `base-2`, `base-3`, …
    ///
    /// `save` never renames on conflict; callers creating new mirrors use this.
    pub async fn unique_id(&self, base: &str) -> String {
        if !self.exists(base).await {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !self.exists(&candidate).await {
                return candidate;
            }
            n += 1;
        }
    }
}

async fn load_record(path: &Path) -> anyhow::Result<MirrorDescriptor> {
    let contents = fs::read_to_string(path).await?;
    let descriptor: MirrorDescriptor = serde_json::from_str(&contents)?;
    if !is_valid_id(&descriptor.id) {
        anyhow::bail!("invalid mirror id '{}'", descriptor.id);
    }
    Ok(descriptor)
}
