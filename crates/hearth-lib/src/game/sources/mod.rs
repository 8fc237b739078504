//! Version sources: the official account-gated API and community mirrors.
//!
//! The set of source kinds is closed, so dispatch is a plain enum rather than
//! a trait object registry.

pub mod mirror;
pub mod official;
pub mod speed;

pub use mirror::MirrorSource;
pub use official::OfficialSource;
pub use speed::SpeedTestResult;

use crate::error::SourceError;
use crate::game::types::{Branch, VersionOrigin};
use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};

pub const OFFICIAL_SOURCE_ID: &str = "official";

/// How an artifact is materialised into the client directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Complete client archive; replaces whatever is installed.
    FullArchive,
    /// Delta applied on top of an installation of `from`.
    PatchDelta { from: u32 },
}

/// One retrievable file of a transfer plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub url: String,
    /// Display name reported in progress events
    pub file_name: String,
    /// Version this artifact brings the installation to
    pub version: u32,
    /// 0 for full archives
    pub from_version: u32,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        if self.from_version == 0 {
            ArtifactKind::FullArchive
        } else {
            ArtifactKind::PatchDelta {
                from: self.from_version,
            }
        }
    }

    /// File name used in the staging directory.
    ///
    /// Mirrors serve identical content for the same (branch, from, version), so
    /// the name is source-independent and a partial file can be resumed from
    /// whichever source wins the next attempt.
    pub fn staged_name(&self, branch: Branch) -> String {
        format!("{}-{}-to-{}.zip", branch.as_str(), self.from_version, self.version)
    }
}

/// Resolved download target for one (branch, version). Recomputed per attempt.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub source_id: String,
    pub branch: Branch,
    pub version: u32,
    pub artifacts: Vec<Artifact>,
    pub total_size: Option<u64>,
    /// Headers to send with every artifact request
    pub headers: HeaderMap,
}

impl TransferPlan {
    pub fn is_delta(&self) -> bool {
        self.artifacts
            .iter()
            .any(|a| matches!(a.kind(), ArtifactKind::PatchDelta { .. }))
    }

    /// Total size from the source, or the sum of artifact sizes when all are known.
    pub fn expected_bytes(&self) -> Option<u64> {
        self.total_size.or_else(|| {
            self.artifacts
                .iter()
                .map(|a| a.size)
                .sum::<Option<u64>>()
        })
    }
}

#[derive(Clone)]
pub enum VersionSource {
    Official(OfficialSource),
    Mirror(MirrorSource),
}

impl VersionSource {
    /// Stable key: `official` or `mirror:<id>`.
    pub fn id(&self) -> String {
        match self {
            VersionSource::Official(_) => OFFICIAL_SOURCE_ID.to_string(),
            VersionSource::Mirror(m) => format!("mirror:{}", m.descriptor().id),
        }
    }

    pub fn origin(&self) -> VersionOrigin {
        match self {
            VersionSource::Official(_) => VersionOrigin::Official,
            VersionSource::Mirror(m) => VersionOrigin::Mirror {
                mirror_id: m.descriptor().id.clone(),
            },
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            VersionSource::Official(_) => "Official",
            VersionSource::Mirror(m) => &m.descriptor().name,
        }
    }

    /// All version numbers this source can serve for `branch`, unordered.
    pub async fn list_versions(&self, branch: Branch) -> Result<Vec<u32>, SourceError> {
        match self {
            VersionSource::Official(s) => s.list_versions(branch).await,
            VersionSource::Mirror(s) => s.list_versions(branch).await,
        }
    }

    /// Build a plan for `version` (0 = this source's latest). `base` is the
    /// version currently installed, which lets sources offer deltas.
    pub async fn resolve_transfer_plan(
        &self,
        branch: Branch,
        version: u32,
        base: Option<u32>,
    ) -> Result<TransferPlan, SourceError> {
        match self {
            VersionSource::Official(s) => s.resolve_transfer_plan(branch, version, base).await,
            VersionSource::Mirror(s) => s.resolve_transfer_plan(branch, version, base).await,
        }
    }

    /// Uncached latency + throughput probe.
    pub async fn measure_speed(&self) -> SpeedTestResult {
        match self {
            VersionSource::Official(s) => s.measure_speed().await,
            VersionSource::Mirror(s) => s.measure_speed().await,
        }
    }
}

/// Map a non-success status to a `SourceError`. `version` is set for plan
/// requests, where a 404 means the source cannot serve that version.
pub(crate) fn check_status(response: Response, version: Option<u32>) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match (status, version) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => Err(SourceError::Unauthenticated),
        (StatusCode::TOO_MANY_REQUESTS, _) => Err(SourceError::RateLimited),
        (StatusCode::NOT_FOUND, Some(version)) => Err(SourceError::VersionUnavailable(version)),
        _ => Err(SourceError::Unreachable(format!(
            "HTTP {} from {}",
            status,
            response.url()
        ))),
    }
}

/// Keep only the last path segment of a URL, stripped of query and anything
/// that could escape a directory.
pub fn file_name_from_url(url: &str, fallback: &str) -> String {
    let name = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | ':' | '*' | '"' | '<' | '>' | '|'))
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        fallback.to_string()
    } else {
        cleaned
    }
}
