//! Community mirror sources: JSON-index manifests and URL-pattern layouts.

use super::speed::{self, SpeedTestResult};
use super::{check_status, file_name_from_url, Artifact, TransferPlan};
use crate::error::SourceError;
use crate::game::mirrors::{MirrorDescriptor, MirrorSourceConfig};
use crate::game::types::{arch_tag, os_tag, Branch, LATEST};
use crate::utils::http::{self, LISTING_TIMEOUT, PROBE_TIMEOUT};
use reqwest::header::{HeaderMap, RANGE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Manifest served at a json-index mirror's `apiUrl`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct JsonIndexManifest {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Keyed by branch name as the mirror spells it
    pub branches: HashMap<String, Vec<IndexEntry>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub version: u32,
    pub url: String,
    #[serde(default)]
    pub from_version: u32,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

impl JsonIndexManifest {
    /// Entries for `branch`, merging every key that normalises to it.
    pub fn entries(&self, branch: Branch) -> Vec<&IndexEntry> {
        self.branches
            .iter()
            .filter(|(key, _)| Branch::normalize(key) == Some(branch))
            .flat_map(|(_, entries)| entries.iter())
            .collect()
    }

    pub fn versions(&self, branch: Branch) -> Vec<u32> {
        let mut versions: Vec<u32> = self
            .entries(branch)
            .into_iter()
            .map(|e| e.version)
            .filter(|v| *v != LATEST)
            .collect();
        versions.sort_unstable();
        versions.dedup();
        versions
    }

    /// Chain of entries that takes an installation of `base` to `target`.
    ///
    /// Prefers deltas, each hop jumping as far as it can without passing the
    /// target; falls back to the full archive when no chain exists.
    pub fn plan_entries(&self, branch: Branch, target: u32, base: Option<u32>) -> Option<Vec<&IndexEntry>> {
        let entries = self.entries(branch);

        if let Some(base) = base.filter(|b| *b > 0 && *b < target) {
            let mut chain = Vec::new();
            let mut current = base;
            while current < target {
                let hop = entries
                    .iter()
                    .filter(|e| e.from_version == current && e.version > current && e.version <= target)
                    .max_by_key(|e| e.version);
                match hop {
                    Some(entry) => {
                        current = entry.version;
                        chain.push(*entry);
                    }
                    None => break,
                }
            }
            if current == target {
                return Some(chain);
            }
        }

        entries
            .into_iter()
            .find(|e| e.version == target && e.from_version == 0)
            .map(|e| vec![e])
    }
}

/// Fill in `{branch}`, `{version}`, `{from}`, `{os}` and `{arch}`.
pub fn expand_template(template: &str, branch: Branch, version: u32, from: u32) -> String {
    template
        .replace("{branch}", branch.as_str())
        .replace("{version}", &version.to_string())
        .replace("{from}", &from.to_string())
        .replace("{os}", os_tag())
        .replace("{arch}", arch_tag())
}

/// Static part of a template, used as the ping target for pattern mirrors.
fn template_prefix(template: &str) -> &str {
    let end = template.find('{').unwrap_or(template.len());
    let prefix = &template[..end];
    match prefix.rfind('/') {
        Some(slash) => &prefix[..=slash],
        None => prefix,
    }
}

#[derive(Clone)]
pub struct MirrorSource {
    descriptor: MirrorDescriptor,
    headers: HeaderMap,
    client: Client,
}

impl MirrorSource {
    pub fn new(descriptor: MirrorDescriptor, client: Client) -> Self {
        let headers = http::header_map_lossy(&descriptor.headers);
        Self {
            descriptor,
            headers,
            client,
        }
    }

    pub fn descriptor(&self) -> &MirrorDescriptor {
        &self.descriptor
    }

    fn source_id(&self) -> String {
        format!("mirror:{}", self.descriptor.id)
    }

    pub async fn list_versions(&self, branch: Branch) -> Result<Vec<u32>, SourceError> {
        match &self.descriptor.source {
            MirrorSourceConfig::JsonIndex { api_url } => {
                let manifest = self.fetch_manifest(api_url).await?;
                Ok(manifest.versions(branch))
            }
            // Pattern layouts cannot be enumerated.
            MirrorSourceConfig::Pattern { .. } => Ok(Vec::new()),
        }
    }

    pub async fn resolve_transfer_plan(
        &self,
        branch: Branch,
        version: u32,
        base: Option<u32>,
    ) -> Result<TransferPlan, SourceError> {
        match &self.descriptor.source {
            MirrorSourceConfig::JsonIndex { api_url } => {
                let manifest = self.fetch_manifest(api_url).await?;
                let version = if version == LATEST {
                    manifest
                        .versions(branch)
                        .into_iter()
                        .max()
                        .ok_or(SourceError::VersionUnavailable(LATEST))?
                } else {
                    version
                };
                let entries = manifest
                    .plan_entries(branch, version, base)
                    .ok_or(SourceError::VersionUnavailable(version))?;

                let api = Url::parse(api_url).map_err(|e| SourceError::Malformed(e.to_string()))?;
                let artifacts = entries
                    .into_iter()
                    .map(|e| {
                        let url = api.join(&e.url).map(String::from).map_err(|err| {
                            SourceError::Malformed(format!("artifact url '{}': {}", e.url, err))
                        })?;
                        Ok(Artifact {
                            file_name: file_name_from_url(&url, &format!("{}.zip", e.version)),
                            url,
                            version: e.version,
                            from_version: e.from_version,
                            size: e.size,
                            sha256: e.sha256.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, SourceError>>()?;

                Ok(self.plan(branch, version, artifacts))
            }
            MirrorSourceConfig::Pattern { url_template } => {
                if version == LATEST {
                    return Err(SourceError::VersionUnavailable(LATEST));
                }
                let from = match base {
                    Some(b) if b > 0 && b < version && url_template.contains("{from}") => b,
                    _ => 0,
                };
                let url = expand_template(url_template, branch, version, from);
                let artifact = Artifact {
                    file_name: file_name_from_url(&url, &format!("{}.zip", version)),
                    url,
                    version,
                    from_version: from,
                    size: None,
                    sha256: None,
                };
                Ok(self.plan(branch, version, vec![artifact]))
            }
        }
    }

    pub async fn measure_speed(&self) -> SpeedTestResult {
        let (ping_url, sample_url) = match &self.descriptor.source {
            MirrorSourceConfig::JsonIndex { api_url } => (api_url.clone(), api_url.clone()),
            MirrorSourceConfig::Pattern { url_template } => (
                template_prefix(url_template).to_string(),
                expand_template(url_template, Branch::Release, 1, 0),
            ),
        };
        let ping = self
            .client
            .head(&ping_url)
            .headers(self.headers.clone())
            .timeout(PROBE_TIMEOUT);
        let sample = self
            .client
            .get(&sample_url)
            .headers(self.headers.clone())
            .header(RANGE, format!("bytes=0-{}", speed::SAMPLE_BYTES - 1))
            .timeout(LISTING_TIMEOUT);
        speed::measure(ping, sample).await
    }

    fn plan(&self, branch: Branch, version: u32, artifacts: Vec<Artifact>) -> TransferPlan {
        TransferPlan {
            source_id: self.source_id(),
            branch,
            version,
            artifacts,
            total_size: None,
            headers: self.headers.clone(),
        }
    }

    async fn fetch_manifest(&self, api_url: &str) -> Result<JsonIndexManifest, SourceError> {
        let response = self
            .client
            .get(api_url)
            .headers(self.headers.clone())
            .timeout(LISTING_TIMEOUT)
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(http::describe_error(&e)))?;
        let response = check_status(response, None)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Unreachable(http::describe_error(&e)))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            log::debug!("[mirrors] Manifest at {} did not parse: {}", api_url, e);
            SourceError::Malformed(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(from: u32, version: u32) -> IndexEntry {
        IndexEntry {
            version,
            url: format!("{}-{}.zip", from, version),
            from_version: from,
            size: None,
            sha256: None,
        }
    }

    fn manifest(entries: Vec<IndexEntry>) -> JsonIndexManifest {
        let mut branches = HashMap::new();
        branches.insert("release".to_string(), entries);
        JsonIndexManifest {
            name: None,
            description: None,
            branches,
        }
    }

    #[test]
    fn versions_are_deduplicated_per_branch() {
        let mut m = manifest(vec![entry(0, 3), entry(2, 3), entry(0, 2)]);
        m.branches.insert("beta".to_string(), vec![entry(0, 9)]);
        assert_eq!(m.versions(Branch::Release), vec![2, 3]);
        assert_eq!(m.versions(Branch::PreRelease), vec![9]);
    }

    #[test]
    fn plan_chains_deltas_greedily() {
        let m = manifest(vec![entry(0, 8), entry(5, 6), entry(5, 7), entry(6, 7), entry(7, 8)]);
        let chain: Vec<(u32, u32)> = m
            .plan_entries(Branch::Release, 8, Some(5))
            .unwrap()
            .into_iter()
            .map(|e| (e.from_version, e.version))
            .collect();
        assert_eq!(chain, vec![(5, 7), (7, 8)]);
    }

    #[test]
    fn plan_falls_back_to_full_archive() {
        let m = manifest(vec![entry(0, 8), entry(5, 6)]);
        let chain = m.plan_entries(Branch::Release, 8, Some(5)).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].from_version, 0);
        assert!(m.plan_entries(Branch::Release, 9, None).is_none());
    }

    #[test]
    fn templates_expand_every_placeholder() {
        let url = expand_template(
            "https://m.example/{os}/{arch}/{branch}/{from}/{version}.zip",
            Branch::PreRelease,
            7,
            5,
        );
        assert_eq!(
            url,
            format!("https://m.example/{}/{}/pre-release/5/7.zip", os_tag(), arch_tag())
        );
    }

    #[test]
    fn template_prefix_stops_at_first_placeholder() {
        assert_eq!(
            template_prefix("https://m.example/files/{branch}/{version}.zip"),
            "https://m.example/files/"
        );
    }

    #[tokio::test]
    async fn pattern_plan_uses_delta_only_when_template_supports_it() {
        let descriptor = |template: &str| MirrorDescriptor {
            id: "m".into(),
            name: "m".into(),
            description: String::new(),
            priority: 1,
            enabled: true,
            source: MirrorSourceConfig::Pattern {
                url_template: template.into(),
            },
            headers: Default::default(),
        };

        let full_only = MirrorSource::new(
            descriptor("https://m.example/{branch}/{version}.zip"),
            http::build_client().unwrap(),
        );
        let plan = full_only
            .resolve_transfer_plan(Branch::Release, 7, Some(5))
            .await
            .unwrap();
        assert!(!plan.is_delta());
        assert_eq!(plan.artifacts[0].url, "https://m.example/release/7.zip");
        assert_eq!(plan.source_id, "mirror:m");

        let with_from = MirrorSource::new(
            descriptor("https://m.example/{branch}/{from}/{version}.zip"),
            http::build_client().unwrap(),
        );
        let plan = with_from
            .resolve_transfer_plan(Branch::Release, 7, Some(5))
            .await
            .unwrap();
        assert!(plan.is_delta());
        assert_eq!(plan.artifacts[0].url, "https://m.example/release/5/7.zip");

        assert_eq!(
            with_from
                .resolve_transfer_plan(Branch::Release, LATEST, None)
                .await
                .unwrap_err(),
            SourceError::VersionUnavailable(LATEST)
        );
    }
}
