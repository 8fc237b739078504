//! # Configuration
//!
//! A single JSON document, `config.json`, in the application data directory.
//! Missing fields take their defaults and unknown fields are ignored, so older
//! and newer launcher builds can share one file.
//!
//! The store also implements the core's `SettingsStore`.

use anyhow::{Context, Result};
use directories::BaseDirs;
use hearth_lib::{Branch, SettingsStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const CONFIG_FILE: &str = "config.json";
/// Overrides the application data directory
pub const HOME_ENV: &str = "HEARTH_HOME";
const APP_DIR_NAME: &str = ".HearthLauncher";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown config field '{0}'")]
    UnknownField(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub launcher_branch: Branch,
    /// Pinned version from launchers predating instances
    pub selected_version: Option<u32>,
    pub instance_directory: Option<PathBuf>,
    pub debug_logging: bool,
    pub official_api_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            launcher_branch: Branch::Release,
            selected_version: None,
            instance_directory: None,
            debug_logging: false,
            official_api_url: None,
        }
    }
}

/// Application data directory: `$HEARTH_HOME`, else `<config dir>/.HearthLauncher`.
pub fn get_app_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        Some(home) => PathBuf::from(home),
        None => {
            let base_dirs = BaseDirs::new()
                .ok_or_else(|| anyhow::anyhow!("Failed to determine user's config directory"))?;
            base_dirs.config_dir().join(APP_DIR_NAME)
        }
    };

    if !dir.exists() {
        std::fs::create_dir_all(&dir).with_context(|| format!("Create app dir {:?}", dir))?;
    }
    Ok(dir)
}

/// Read the config without constructing a store, e.g. to pick a log level
/// before logging is up. Any failure yields the defaults.
pub fn peek_config(app_dir: &Path) -> AppConfig {
    std::fs::read_to_string(app_dir.join(CONFIG_FILE))
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub struct ConfigStore {
    path: PathBuf,
    config: RwLock<AppConfig>,
}

impl ConfigStore {
    /// Load `config.json` from `app_dir`. A missing file gives the defaults; a
    /// corrupt one is set aside as `config.json.bad` so the launcher still starts.
    pub fn load(app_dir: &Path) -> Result<Self> {
        let path = app_dir.join(CONFIG_FILE);
        let config = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("[config] {:?} is unreadable ({}), using defaults", path, e);
                    let _ = std::fs::rename(&path, path.with_extension("json.bad"));
                    AppConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
            Err(e) => return Err(e).with_context(|| format!("Read config {:?}", path)),
        };
        Ok(Self {
            path,
            config: RwLock::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> AppConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set(&self, config: AppConfig) -> Result<()> {
        self.modify(|c| *c = config);
        self.save()
    }

    /// Merge a partial JSON object into the config, then save.
    ///
    /// Only known fields are accepted; the merged document must still parse.
    pub fn update_fields(&self, fields: &serde_json::Map<String, serde_json::Value>) -> Result<AppConfig> {
        let mut document = serde_json::to_value(self.get())?;
        let object = document
            .as_object_mut()
            .ok_or_else(|| anyhow::anyhow!("config did not serialise to an object"))?;
        for (key, value) in fields {
            if !object.contains_key(key) {
                return Err(ConfigError::UnknownField(key.clone()).into());
            }
            object.insert(key.clone(), value.clone());
        }

        let updated: AppConfig = serde_json::from_value(document).map_err(|e| {
            let field = fields.keys().cloned().collect::<Vec<_>>().join(", ");
            ConfigError::InvalidValue {
                field,
                reason: e.to_string(),
            }
        })?;
        self.set(updated.clone())?;
        Ok(updated)
    }

    fn modify(&self, f: impl FnOnce(&mut AppConfig)) {
        match self.config.write() {
            Ok(mut config) => f(&mut config),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn write_atomically(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Create config dir {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("Write {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Replace {:?}", self.path))?;
        Ok(())
    }
}

impl SettingsStore for ConfigStore {
    fn launcher_branch(&self) -> Branch {
        self.get().launcher_branch
    }

    fn selected_version(&self) -> Option<u32> {
        self.get().selected_version
    }

    fn instance_directory(&self) -> Option<PathBuf> {
        self.get().instance_directory
    }

    fn set_instance_directory(&self, path: Option<PathBuf>) {
        self.modify(|c| c.instance_directory = path);
    }

    fn save(&self) -> Result<()> {
        let config = self.get();
        self.write_atomically(&config)?;
        log::debug!("[config] Saved {:?}", self.path);
        Ok(())
    }
}
