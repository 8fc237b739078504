use crate::game::types::{Branch, LATEST};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "instances.json";
pub const DEFAULT_ROOT_DIR: &str = "Instances";

pub const GAME_DIR: &str = "game";
pub const USER_DATA_DIR: &str = "UserData";
pub const STAGING_DIR: &str = ".staging";

pub const CLIENT_DIR: &str = "Client";
pub const ASSETS_ARCHIVE: &str = "Assets.zip";
pub const ASSETS_DIR: &str = "Assets";
/// Relative to the client directory
pub const LIBRARIES_DIR: &str = "Data";
/// Relative to the client directory; written by the client on first run
pub const CONFIG_FILE: &str = "config.json";

pub fn client_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "HearthClient.exe"
    } else {
        "HearthClient"
    }
}

/// Persisted record for one instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMeta {
    pub id: String,
    pub branch: Branch,
    /// 0 tracks the latest build
    pub version: u32,
    #[serde(default)]
    pub installed_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_latest: bool,
    /// Derived from the last validation, refreshed by downloads and sync
    #[serde(default)]
    pub installed: bool,
}

impl InstanceMeta {
    pub fn display_name(&self) -> String {
        if let Some(name) = self.custom_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        if self.tracks_latest() {
            format!("{} (latest)", self.branch)
        } else {
            format!("{} {}", self.branch, self.version)
        }
    }

    pub fn tracks_latest(&self) -> bool {
        self.is_latest || self.version == LATEST
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstance {
    #[serde(default)]
    pub branch: Branch,
    #[serde(default)]
    pub version: u32,
    pub custom_name: Option<String>,
    /// Defaults to `version == 0`
    pub is_latest: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InstanceState {
    /// Known to the registry, no client files on disk
    Uninitialized,
    Installed,
    /// Client directory present but incomplete
    Corrupted,
    Deleted,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub has_executable: bool,
    pub has_assets: bool,
    pub has_libraries: bool,
    pub has_config: bool,
    pub missing_components: Vec<String>,
}

/// Paths inside one instance directory.
#[derive(Debug, Clone)]
pub struct InstanceLayout {
    root: PathBuf,
}

impl InstanceLayout {
    pub fn new(instance_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: instance_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn game_dir(&self) -> PathBuf {
        self.root.join(GAME_DIR)
    }

    pub fn user_data_dir(&self) -> PathBuf {
        self.root.join(USER_DATA_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn client_dir(&self) -> PathBuf {
        self.game_dir().join(CLIENT_DIR)
    }

    pub fn executable(&self) -> PathBuf {
        self.client_dir().join(client_binary_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_serializes_camel_case() {
        let meta = InstanceMeta {
            id: "abc".into(),
            branch: Branch::PreRelease,
            version: 0,
            installed_version: Some(5),
            custom_name: None,
            created_at: Utc::now(),
            is_latest: true,
            installed: true,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["branch"], "pre-release");
        assert_eq!(json["installedVersion"], 5);
        assert_eq!(json["isLatest"], true);
        assert!(json.get("customName").is_none());
        assert_eq!(meta.display_name(), "pre-release (latest)");
    }

    #[test]
    fn layout_paths() {
        let layout = InstanceLayout::new("/data/Instances/abc");
        assert_eq!(layout.game_dir(), PathBuf::from("/data/Instances/abc/game"));
        assert_eq!(
            layout.executable(),
            PathBuf::from("/data/Instances/abc/game/Client").join(client_binary_name())
        );
    }
}
