use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Priority given to mirrors created by discovery; manual edits usually go lower.
pub const DEFAULT_MIRROR_PRIORITY: i32 = 100;

/// Configuration record for one community mirror.
///
/// `id` is unique across the store. `priority` is not: ties are broken by id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MirrorDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Lower is tried (and displayed) first
    pub priority: i32,
    pub enabled: bool,
    #[serde(flatten)]
    pub source: MirrorSourceConfig,
    /// Extra request headers sent with every request to this mirror
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Indexing scheme implemented by a mirror, tagged on disk as `sourceType`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "sourceType")]
pub enum MirrorSourceConfig {
    /// A JSON manifest listing every version and artifact the mirror serves.
    #[serde(rename = "json-index", rename_all = "camelCase")]
    JsonIndex { api_url: String },

    /// Artifacts live at URLs synthesised from a template, e.g.
    /// `https://host/{os}/{arch}/{branch}/{from}/{version}.zip`.
    #[serde(rename = "pattern", rename_all = "camelCase")]
    Pattern { url_template: String },
}

impl MirrorSourceConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            MirrorSourceConfig::JsonIndex { .. } => "json-index",
            MirrorSourceConfig::Pattern { .. } => "pattern",
        }
    }
}

impl MirrorDescriptor {
    /// Sort key used everywhere mirrors are ordered.
    pub fn order_key(&self) -> (i32, &str) {
        (self.priority, self.id.as_str())
    }
}

/// Ids double as file names, so keep them to a conservative slug alphabet.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Derive an id slug from a host name: `Mirror.Example.org` -> `mirror-example-org`.
pub fn slug_from_host(host: &str) -> String {
    let mut slug = String::with_capacity(host.len());
    let mut last_dash = true;
    for c in host.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "mirror".to_string()
    } else {
        slug.chars().take(56).collect()
    }
}
