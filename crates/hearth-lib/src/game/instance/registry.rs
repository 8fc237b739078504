use super::relocate::{self, normalize_path, MoveProgress};
use super::types::{
    CreateInstance, InstanceLayout, InstanceMeta, InstanceState, ValidationResult, DEFAULT_ROOT_DIR,
    INDEX_FILE,
};
use super::validation;
use crate::error::RegistryError;
use crate::game::types::{Branch, LATEST};
use crate::settings::SettingsStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::Mutex;

/// On-disk index: every known instance plus the selection pointer.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct InstanceIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected_id: Option<String>,
    #[serde(default)]
    instances: Vec<InstanceMeta>,
}

impl InstanceIndex {
    fn find(&self, id: &str) -> Option<&InstanceMeta> {
        self.instances.iter().find(|i| i.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut InstanceMeta> {
        self.instances.iter_mut().find(|i| i.id == id)
    }
}

struct RegistryState {
    root: PathBuf,
    index: InstanceIndex,
}

impl RegistryState {
    fn layout(&self, id: &str) -> InstanceLayout {
        InstanceLayout::new(self.root.join(id))
    }

    async fn persist(&self) -> Result<(), RegistryError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| RegistryError::io(&self.root, e))?;
        let path = self.root.join(INDEX_FILE);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.index)
            .map_err(|e| RegistryError::IndexCorrupt(e.to_string()))?;
        fs::write(&tmp, json)
            .await
            .map_err(|e| RegistryError::io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| RegistryError::io(&path, e))?;
        Ok(())
    }
}

/// Entity store for instances. One lock guards every read-modify-write of the
/// index; the index file itself is last-writer-wins against other processes.
///
/// While the root is being moved the lock is free for readers, and every
/// mutation fails with `MoveInProgress`.
pub struct InstanceRegistry {
    state: Mutex<RegistryState>,
    moving: AtomicBool,
}

/// Clears the move flag however `move_root` ends.
struct MovingGuard<'a>(&'a AtomicBool);

impl Drop for MovingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl InstanceRegistry {
    /// Open the registry rooted at `root`, creating nothing until first write.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let root = root.into();
        let index = load_index(&root).await?;
        log::info!(
            "[registry] Opened {:?} with {} instance(s)",
            root,
            index.instances.len()
        );
        Ok(Self {
            state: Mutex::new(RegistryState { root, index }),
            moving: AtomicBool::new(false),
        })
    }

    pub fn is_moving(&self) -> bool {
        self.moving.load(Ordering::SeqCst)
    }

    /// Checked with the state lock held; `move_root` raises the flag under the same lock.
    fn ensure_not_moving(&self) -> Result<(), RegistryError> {
        if self.is_moving() {
            return Err(RegistryError::MoveInProgress);
        }
        Ok(())
    }

    /// Root from the settings override, or `<app_dir>/Instances`.
    pub fn default_root(app_dir: &Path, settings: &dyn SettingsStore) -> PathBuf {
        settings
            .instance_directory()
            .unwrap_or_else(|| app_dir.join(DEFAULT_ROOT_DIR))
    }

    pub async fn root(&self) -> PathBuf {
        self.state.lock().await.root.clone()
    }

    pub async fn list(&self) -> Vec<InstanceMeta> {
        self.state.lock().await.index.instances.clone()
    }

    pub async fn get(&self, id: &str) -> Option<InstanceMeta> {
        self.state.lock().await.index.find(id).cloned()
    }

    /// Directory of a known instance. Never creates anything.
    pub async fn resolve_path(&self, id: &str) -> Option<PathBuf> {
        let state = self.state.lock().await;
        state.index.find(id).map(|_| state.root.join(id))
    }

    pub async fn layout(&self, id: &str) -> Option<InstanceLayout> {
        self.resolve_path(id).await.map(InstanceLayout::new)
    }

    pub async fn create(&self, request: CreateInstance) -> Result<InstanceMeta, RegistryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_moving()?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let layout = state.layout(&id);
        let user_data = layout.user_data_dir();
        fs::create_dir_all(&user_data)
            .await
            .map_err(|e| RegistryError::io(&user_data, e))?;

        let meta = InstanceMeta {
            id: id.clone(),
            branch: request.branch,
            version: request.version,
            installed_version: None,
            custom_name: request.custom_name.filter(|n| !n.trim().is_empty()),
            created_at: Utc::now(),
            is_latest: request.is_latest.unwrap_or(request.version == LATEST),
            installed: false,
        };
        state.index.instances.push(meta.clone());
        if state.index.selected_id.is_none() {
            state.index.selected_id = Some(id.clone());
        }
        state.persist().await?;

        log::info!(
            "[registry] Created instance {} ({} {})",
            id,
            meta.branch,
            meta.version
        );
        Ok(meta)
    }

    /// Remove an instance's directory and record. Unknown ids are a no-op.
    /// Returns whether anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_moving()?;
        let known = state.index.find(id).is_some();
        if !known {
            log::debug!("[registry] Delete of unknown instance {} ignored", id);
            return Ok(false);
        }

        let dir = state.root.join(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RegistryError::io(&dir, e)),
        }

        state.index.instances.retain(|i| i.id != id);
        if state.index.selected_id.as_deref() == Some(id) {
            state.index.selected_id = state.index.instances.first().map(|i| i.id.clone());
        }
        state.persist().await?;
        log::info!("[registry] Deleted instance {}", id);
        Ok(true)
    }

    pub async fn rename(&self, id: &str, custom_name: Option<String>) -> Result<InstanceMeta, RegistryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_moving()?;
        let meta = state
            .index
            .find_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        meta.custom_name = custom_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let meta = meta.clone();
        state.persist().await?;
        Ok(meta)
    }

    /// Point an instance at another build. Client files are cleared, `UserData`
    /// is left untouched. Returns `false` for unknown ids.
    pub async fn change_version(&self, id: &str, branch: Branch, version: u32) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_moving()?;
        if state.index.find(id).is_none() {
            return Ok(false);
        }

        let layout = state.layout(id);
        for dir in [layout.game_dir(), layout.staging_dir()] {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RegistryError::io(&dir, e)),
            }
        }

        if let Some(meta) = state.index.find_mut(id) {
            meta.branch = branch;
            meta.version = version;
            meta.installed_version = None;
            meta.installed = false;
            meta.is_latest = false;
        }
        state.persist().await?;
        log::info!("[registry] Instance {} switched to {} {}", id, branch, version);
        Ok(true)
    }

    pub async fn select(&self, id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_moving()?;
        if state.index.find(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        state.index.selected_id = Some(id.to_string());
        state.persist().await
    }

    pub async fn selected(&self) -> Option<InstanceMeta> {
        let state = self.state.lock().await;
        state
            .index
            .selected_id
            .as_deref()
            .and_then(|id| state.index.find(id))
            .cloned()
    }

    /// Structural check of any client directory.
    pub fn validate(&self, game_dir: &Path) -> ValidationResult {
        validation::validate(game_dir)
    }

    pub async fn validate_instance(&self, id: &str) -> Result<ValidationResult, RegistryError> {
        let layout = self
            .layout(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        Ok(validation::validate(&layout.game_dir()))
    }

    pub async fn state(&self, id: &str) -> InstanceState {
        match self.layout(id).await {
            Some(layout) => validation::state_of(&layout),
            None => InstanceState::Deleted,
        }
    }

    /// Record a successful install. `version` and `is_latest` keep their pin state.
    pub async fn record_installed(&self, id: &str, installed_version: u32) -> Result<InstanceMeta, RegistryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_moving()?;
        let meta = state
            .index
            .find_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        meta.installed_version = Some(installed_version);
        meta.installed = true;
        let meta = meta.clone();
        state.persist().await?;
        Ok(meta)
    }

    /// Mark an instance as not (fully) installed after a failed install.
    pub async fn mark_not_installed(&self, id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_moving()?;
        match state.index.find_mut(id) {
            Some(meta) if meta.installed => meta.installed = false,
            _ => return Ok(()),
        }
        state.persist().await
    }

    /// Forget the installed build after its files were partly overwritten.
    /// The next download then starts from a full archive instead of a delta.
    pub async fn discard_install(&self, id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_moving()?;
        match state.index.find_mut(id) {
            Some(meta) if meta.installed || meta.installed_version.is_some() => {
                meta.installed = false;
                meta.installed_version = None;
            }
            _ => return Ok(()),
        }
        state.persist().await
    }

    /// Re-derive every `installed` flag from disk. Nothing else is touched.
    /// Returns how many instances changed.
    pub async fn sync_with_config(&self) -> Result<usize, RegistryError> {
        let mut state = self.state.lock().await;
        self.ensure_not_moving()?;
        let root = state.root.clone();
        let mut changed = 0;
        for meta in state.index.instances.iter_mut() {
            let layout = InstanceLayout::new(root.join(&meta.id));
            let installed = validation::validate(&layout.game_dir()).is_valid;
            if meta.installed != installed {
                log::info!(
                    "[registry] Instance {} installed flag {} -> {}",
                    meta.id,
                    meta.installed,
                    installed
                );
                meta.installed = installed;
                changed += 1;
            }
        }
        if changed > 0 {
            state.persist().await?;
        }
        Ok(changed)
    }

    /// Create the single instance implied by a pre-instance settings file.
    pub async fn migrate_legacy(&self, settings: &dyn SettingsStore) -> Result<Option<InstanceMeta>, RegistryError> {
        if !self.state.lock().await.index.instances.is_empty() {
            return Ok(None);
        }
        let Some(version) = settings.selected_version() else {
            return Ok(None);
        };

        let branch = settings.launcher_branch();
        let meta = self
            .create(CreateInstance {
                branch,
                version,
                custom_name: None,
                is_latest: Some(version == LATEST),
            })
            .await?;
        self.select(&meta.id).await?;
        log::info!(
            "[registry] Migrated legacy install ({} {}) to instance {}",
            branch,
            version,
            meta.id
        );
        Ok(Some(meta))
    }

    /// Relocate every instance to `new_root`.
    ///
    /// Copies largest files first, persists the new location through
    /// `settings`, then deletes the old tree. A settings failure aborts with
    /// `ConfigPersist` and keeps the old tree as the live one. Reads proceed
    /// during the copy; mutations fail with `MoveInProgress`.
    pub async fn move_root<F>(
        &self,
        new_root: &Path,
        settings: &dyn SettingsStore,
        on_progress: F,
    ) -> Result<(), RegistryError>
    where
        F: FnMut(MoveProgress),
    {
        let target = normalize_path(new_root);
        let (old_root, _moving) = {
            let state = self.state.lock().await;
            self.ensure_not_moving()?;
            let old_root = state.root.clone();
            let current = normalize_path(&old_root);

            if target == current || target.starts_with(&current) {
                return Err(RegistryError::InvalidTarget(format!(
                    "{:?} is inside the current instances directory",
                    target
                )));
            }
            if target.join(INDEX_FILE).exists() {
                return Err(RegistryError::AlreadyExists(target));
            }

            state.persist().await?;
            self.moving.store(true, Ordering::SeqCst);
            (old_root, MovingGuard(&self.moving))
        };

        log::info!("[registry] Moving instances {:?} -> {:?}", old_root, target);
        let plan = relocate::plan_move(&old_root).await?;
        log::info!(
            "[registry] {} file(s), {} bytes to copy",
            plan.files.len(),
            plan.total_bytes
        );
        relocate::copy_planned(&plan, &target, on_progress).await?;
        log::info!("[registry] Copy complete, updating configuration");

        let previous = settings.instance_directory();
        settings.set_instance_directory(Some(target.clone()));
        if let Err(e) = settings.save() {
            settings.set_instance_directory(previous);
            log::error!("[registry] Could not persist new instances directory: {:#}", e);
            return Err(RegistryError::ConfigPersist(format!("{:#}", e)));
        }

        self.state.lock().await.root = target;
        relocate::remove_old_tree(&old_root).await;
        log::info!("[registry] Move complete");
        Ok(())
    }
}

async fn load_index(root: &Path) -> Result<InstanceIndex, RegistryError> {
    let path = root.join(INDEX_FILE);
    let contents = match fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(InstanceIndex::default()),
        Err(e) => return Err(RegistryError::io(&path, e)),
    };
    serde_json::from_str(&contents)
        .map_err(|e| RegistryError::IndexCorrupt(format!("{:?}: {}", path, e)))
}
