use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version number meaning "unresolved / track the latest build".
pub const LATEST: u32 = 0;

/// Release channel; versions are scoped per branch.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, Debug, Default, PartialOrd, Ord)]
pub enum Branch {
    #[default]
    #[serde(rename = "release")]
    Release,

    #[serde(rename = "pre-release", alias = "prerelease", alias = "pre_release")]
    PreRelease,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Release => "release",
            Branch::PreRelease => "pre-release",
        }
    }

    /// Normalise the spellings found in older configs and mirror manifests.
    pub fn normalize(raw: &str) -> Option<Branch> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "release" | "stable" => Some(Branch::Release),
            "pre-release" | "prerelease" | "pre_release" | "beta" => Some(Branch::PreRelease),
            _ => None,
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Branch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Branch::normalize(s).ok_or_else(|| format!("unknown branch '{}'", s))
    }
}

/// Where a merged version entry is displayed as coming from.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VersionOrigin {
    Official,
    #[serde(rename_all = "camelCase")]
    Mirror { mirror_id: String },
}

impl VersionOrigin {
    pub fn is_official(&self) -> bool {
        matches!(self, VersionOrigin::Official)
    }
}

/// One entry of a resolved version list. Recomputed on every resolution.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub version: u32,
    pub source: VersionOrigin,
    pub is_latest: bool,
}

/// Operating system tag used in artifact URLs
pub fn os_tag() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "darwin"
    } else {
        "linux"
    }
}

/// Architecture tag used in artifact URLs
pub fn arch_tag() -> &'static str {
    if cfg!(target_arch = "aarch64") {
        "arm64"
    } else {
        "amd64"
    }
}
