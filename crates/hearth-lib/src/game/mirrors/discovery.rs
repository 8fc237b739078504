//! Mirror discovery: fingerprint an arbitrary URL into a mirror descriptor.
//!
//! Discovery is a pure probe. Nothing is persisted and the returned id may
//! collide with an existing record; see `MirrorStore::unique_id`.

use super::types::{slug_from_host, MirrorDescriptor, MirrorSourceConfig, DEFAULT_MIRROR_PRIORITY};
use crate::error::DiscoveryError;
use crate::game::sources::mirror::{expand_template, JsonIndexManifest};
use crate::game::types::Branch;
use crate::utils::http::{self, LISTING_TIMEOUT, PROBE_TIMEOUT};
use reqwest::header::{HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use url::Url;

/// File layouts tried, in order, when the URL is not a JSON index.
pub const PATTERN_LAYOUTS: &[&str] = &[
    "{base}/{os}/{arch}/{branch}/{from}/{version}.zip",
    "{base}/{branch}/{version}.zip",
    "{base}/{branch}/{os}/{version}.zip",
];

/// Version probed for pattern layouts; every branch starts at build 1.
const PROBE_VERSION: u32 = 1;

enum Probe {
    Present,
    Absent,
    Failed(String),
}

pub struct MirrorDiscoveryService {
    client: Client,
}

impl MirrorDiscoveryService {
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self {
            client: http::build_client()?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub async fn discover(
        &self,
        url: &str,
        headers: Option<&BTreeMap<String, String>>,
    ) -> Result<MirrorDescriptor, DiscoveryError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DiscoveryError::InvalidInput("URL is empty".to_string()));
        }

        let custom_headers = headers.cloned().unwrap_or_default();
        let header_map =
            http::header_map(&custom_headers).map_err(DiscoveryError::InvalidInput)?;

        // A user may paste a ready-made template instead of a base URL.
        if url.contains("{version}") {
            return self.discover_template(url, custom_headers, &header_map).await;
        }

        let parsed = parse_http_url(url)?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        log::info!("[mirrors] Discovering mirror at {}", url);

        let mut reached = false;
        let mut last_failure = None;

        match self.fetch_index(url, &header_map).await {
            Ok(Some(manifest)) => {
                log::info!("[mirrors] {} is a JSON index mirror", url);
                return Ok(MirrorDescriptor {
                    id: slug_from_host(&host),
                    name: manifest.name.clone().unwrap_or_else(|| host.clone()),
                    description: manifest.description.clone().unwrap_or_default(),
                    priority: DEFAULT_MIRROR_PRIORITY,
                    enabled: true,
                    source: MirrorSourceConfig::JsonIndex {
                        api_url: url.to_string(),
                    },
                    headers: custom_headers,
                });
            }
            Ok(None) => reached = true,
            Err(msg) => last_failure = Some(msg),
        }

        let base = url.trim_end_matches('/');
        for layout in PATTERN_LAYOUTS {
            let template = layout.replace("{base}", base);
            let probe_url = expand_template(&template, Branch::Release, PROBE_VERSION, 0);
            match self.probe(&probe_url, &header_map).await {
                Probe::Present => {
                    log::info!("[mirrors] {} serves files as {}", url, template);
                    return Ok(pattern_descriptor(&host, template, custom_headers));
                }
                Probe::Absent => reached = true,
                Probe::Failed(msg) => last_failure = Some(msg),
            }
        }

        if reached {
            Err(DiscoveryError::Unrecognized(url.to_string()))
        } else {
            Err(DiscoveryError::Unreachable(
                last_failure.unwrap_or_else(|| url.to_string()),
            ))
        }
    }

    async fn discover_template(
        &self,
        template: &str,
        custom_headers: BTreeMap<String, String>,
        header_map: &HeaderMap,
    ) -> Result<MirrorDescriptor, DiscoveryError> {
        let probe_url = expand_template(template, Branch::Release, PROBE_VERSION, 0);
        let parsed = parse_http_url(&probe_url)?;
        let host = parsed.host_str().unwrap_or_default().to_string();

        match self.probe(&probe_url, header_map).await {
            Probe::Present => Ok(pattern_descriptor(&host, template.to_string(), custom_headers)),
            Probe::Absent => Err(DiscoveryError::Unrecognized(template.to_string())),
            Probe::Failed(msg) => Err(DiscoveryError::Unreachable(msg)),
        }
    }

    /// `Ok(None)` means the URL answered but is not a JSON index.
    async fn fetch_index(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<Option<JsonIndexManifest>, String> {
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .timeout(LISTING_TIMEOUT)
            .send()
            .await
            .map_err(|e| http::describe_error(&e))?;

        if !response.status().is_success() {
            log::debug!("[mirrors] {} answered {}", url, response.status());
            return Ok(None);
        }

        let body = response.bytes().await.map_err(|e| http::describe_error(&e))?;
        Ok(serde_json::from_slice::<JsonIndexManifest>(&body).ok())
    }

    async fn probe(&self, url: &str, headers: &HeaderMap) -> Probe {
        let head = self
            .client
            .head(url)
            .headers(headers.clone())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        let status = match head {
            Ok(response) => response.status(),
            Err(e) => return Probe::Failed(http::describe_error(&e)),
        };
        if status.is_success() {
            return Probe::Present;
        }
        if status != StatusCode::METHOD_NOT_ALLOWED && status != StatusCode::NOT_IMPLEMENTED {
            return Probe::Absent;
        }

        // Some static hosts refuse HEAD; a one-byte ranged GET answers the same question.
        match self
            .client
            .get(url)
            .headers(headers.clone())
            .header(RANGE, "bytes=0-0")
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Probe::Present,
            Ok(_) => Probe::Absent,
            Err(e) => Probe::Failed(http::describe_error(&e)),
        }
    }
}

fn parse_http_url(url: &str) -> Result<Url, DiscoveryError> {
    let parsed =
        Url::parse(url).map_err(|e| DiscoveryError::InvalidInput(format!("{}: {}", url, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(DiscoveryError::InvalidInput(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(DiscoveryError::InvalidInput(format!("{} has no host", url)));
    }
    Ok(parsed)
}

fn pattern_descriptor(
    host: &str,
    url_template: String,
    headers: BTreeMap<String, String>,
) -> MirrorDescriptor {
    MirrorDescriptor {
        id: slug_from_host(host),
        name: host.to_string(),
        description: String::new(),
        priority: DEFAULT_MIRROR_PRIORITY,
        enabled: true,
        source: MirrorSourceConfig::Pattern { url_template },
        headers,
    }
}
