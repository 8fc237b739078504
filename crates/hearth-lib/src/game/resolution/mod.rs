//! Cross-source version resolution.
//!
//! Fans out to the official API and every enabled mirror, merges the answers
//! into one descending list and keeps short-lived caches of listings and speed
//! probes. All caches are owned by the service and driven by an injected clock.

mod merge;

pub use merge::merge_listings;

use crate::error::SourceError;
use crate::game::mirrors::{MirrorSourceConfig, MirrorStore};
use crate::game::sources::{MirrorSource, OfficialSource, SpeedTestResult, VersionSource};
use crate::game::types::{Branch, VersionOrigin, VersionRecord, LATEST};
use crate::utils::clock::{Cached, Clock, SystemClock};
use chrono::Duration;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// How long a listing (or a listing failure) is reused
const LISTING_TTL_SECS: i64 = 60;
/// How long a speed probe result is reused
const SPEED_TTL_MINUTES: i64 = 5;
/// Ceiling for one source's listing call during fan-out
const SOURCE_DEADLINE: std::time::Duration = std::time::Duration::from_secs(15);

/// Merged list plus the availability flags the UI uses for its banners.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionListing {
    pub versions: Vec<VersionRecord>,
    pub has_official_account: bool,
    pub official_source_available: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpeed {
    pub source_id: String,
    pub name: String,
    #[serde(flatten)]
    pub result: SpeedTestResult,
}

type ListingResult = Result<Vec<u32>, SourceError>;

pub struct VersionResolutionService {
    official: OfficialSource,
    store: MirrorStore,
    client: Client,
    clock: Arc<dyn Clock>,
    /// `None` until the first reload
    mirrors: RwLock<Option<Vec<MirrorSource>>>,
    reload_lock: Mutex<()>,
    listings: Mutex<HashMap<(String, Branch), Cached<ListingResult>>>,
    speeds: Mutex<HashMap<String, Cached<SpeedTestResult>>>,
}

impl VersionResolutionService {
    pub fn new(official: OfficialSource, store: MirrorStore, client: Client) -> Self {
        Self::with_clock(official, store, client, Arc::new(SystemClock))
    }

    pub fn with_clock(
        official: OfficialSource,
        store: MirrorStore,
        client: Client,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            official,
            store,
            client,
            clock,
            mirrors: RwLock::new(None),
            reload_lock: Mutex::new(()),
            listings: Mutex::new(HashMap::new()),
            speeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    pub fn has_official_account(&self) -> bool {
        self.official.has_credential()
    }

    /// Re-read the mirror store and rebuild the enabled mirror sources.
    ///
    /// Returns the number of enabled mirrors. Cached listings and speed
    /// results are dropped since the source set may have changed.
    pub async fn reload_mirrors(&self) -> usize {
        let _guard = self.reload_lock.lock().await;

        let descriptors = match self.store.list().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                log::warn!("[resolver] Failed to load mirror store: {}", e);
                Vec::new()
            }
        };
        let sources: Vec<MirrorSource> = descriptors
            .into_iter()
            .filter(|d| d.enabled)
            .map(|d| MirrorSource::new(d, self.client.clone()))
            .collect();
        let count = sources.len();

        *self.mirrors.write().await = Some(sources);
        self.invalidate().await;
        log::info!("[resolver] Loaded {} enabled mirror(s)", count);
        count
    }

    /// Forget cached listings and speed probes.
    pub async fn invalidate(&self) {
        self.listings.lock().await.clear();
        self.speeds.lock().await.clear();
    }

    async fn mirror_sources(&self) -> Vec<MirrorSource> {
        if let Some(mirrors) = self.mirrors.read().await.as_ref() {
            return mirrors.clone();
        }
        self.reload_mirrors().await;
        self.mirrors.read().await.clone().unwrap_or_default()
    }

    /// Official first, then enabled mirrors by `(priority, id)`.
    pub async fn active_sources(&self) -> Vec<VersionSource> {
        let mut sources = vec![VersionSource::Official(self.official.clone())];
        sources.extend(self.mirror_sources().await.into_iter().map(VersionSource::Mirror));
        sources
    }

    async fn listing(&self, source: &VersionSource, branch: Branch, force_refresh: bool) -> ListingResult {
        let key = (source.id(), branch);
        if !force_refresh {
            if let Some(cached) = self.listings.lock().await.get(&key) {
                if cached.is_fresh(self.clock.now(), Duration::seconds(LISTING_TTL_SECS)) {
                    return cached.value.clone();
                }
            }
        }

        let result = match tokio::time::timeout(SOURCE_DEADLINE, source.list_versions(branch)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Unreachable(format!(
                "no answer within {}s",
                SOURCE_DEADLINE.as_secs()
            ))),
        };
        self.listings
            .lock()
            .await
            .insert(key, Cached::new(result.clone(), self.clock.now()));
        result
    }

    async fn fan_out(&self, branch: Branch, force_refresh: bool) -> Vec<(VersionSource, ListingResult)> {
        let sources = self.active_sources().await;
        let results = join_all(
            sources
                .iter()
                .map(|source| self.listing(source, branch, force_refresh)),
        )
        .await;
        sources.into_iter().zip(results).collect()
    }

    pub async fn get_version_list(&self, branch: Branch) -> Vec<VersionRecord> {
        self.get_version_list_with_sources(branch).await.versions
    }

    pub async fn get_version_list_with_sources(&self, branch: Branch) -> VersionListing {
        self.resolve(branch, false).await
    }

    async fn resolve(&self, branch: Branch, force_refresh: bool) -> VersionListing {
        let mut official_source_available = false;
        let mut listings: Vec<(VersionOrigin, Vec<u32>)> = Vec::new();

        for (source, result) in self.fan_out(branch, force_refresh).await {
            match result {
                Ok(versions) => {
                    if source.origin().is_official() {
                        official_source_available = true;
                    }
                    listings.push((source.origin(), versions));
                }
                Err(SourceError::Unauthenticated) if source.origin().is_official() => {
                    log::debug!("[resolver] Official source skipped: not signed in");
                }
                Err(e) => {
                    log::warn!("[resolver] Dropping source '{}' for {}: {}", source.id(), branch, e);
                }
            }
        }

        let versions = merge_listings(&listings);
        log::debug!(
            "[resolver] {} version(s) for {} from {} source(s)",
            versions.len(),
            branch,
            listings.len()
        );

        VersionListing {
            versions,
            has_official_account: self.official.has_credential(),
            official_source_available,
        }
    }

    /// Highest version any source offers for `branch`, if any source answered.
    pub async fn latest_version(&self, branch: Branch, force_refresh: bool) -> Option<u32> {
        self.resolve(branch, force_refresh)
            .await
            .versions
            .first()
            .map(|r| r.version)
    }

    /// Ordered failover list for fetching `version`.
    ///
    /// Official (only with a credential), then json-index mirrors that list the
    /// version, then pattern mirrors, each group in priority order.
    pub async fn candidates_for(&self, branch: Branch, version: u32) -> Vec<VersionSource> {
        let mut candidates = Vec::new();
        if self.official.has_credential() {
            candidates.push(VersionSource::Official(self.official.clone()));
        }

        let mirrors = self.mirror_sources().await;
        for mirror in mirrors.iter().filter(|m| {
            matches!(m.descriptor().source, MirrorSourceConfig::JsonIndex { .. })
        }) {
            let source = VersionSource::Mirror(mirror.clone());
            match self.listing(&source, branch, false).await {
                Ok(versions) if version == LATEST || versions.contains(&version) => {
                    candidates.push(source)
                }
                Ok(_) => {}
                Err(e) => log::debug!("[resolver] '{}' not a candidate: {}", source.id(), e),
            }
        }

        candidates.extend(
            mirrors
                .into_iter()
                .filter(|m| matches!(m.descriptor().source, MirrorSourceConfig::Pattern { .. }))
                .map(VersionSource::Mirror),
        );
        candidates
    }

    /// Speed probe for one source (`official` or `mirror:<id>`); `None` for unknown ids.
    pub async fn test_source_speed(&self, source_id: &str, force_refresh: bool) -> Option<SpeedTestResult> {
        let source = self
            .active_sources()
            .await
            .into_iter()
            .find(|s| s.id() == source_id)?;
        Some(self.speed_of(&source, force_refresh).await)
    }

    /// Probe every active source concurrently.
    pub async fn test_all_speeds(&self, force_refresh: bool) -> Vec<SourceSpeed> {
        let sources = self.active_sources().await;
        let results = join_all(sources.iter().map(|s| self.speed_of(s, force_refresh))).await;
        sources
            .iter()
            .zip(results)
            .map(|(source, result)| SourceSpeed {
                source_id: source.id(),
                name: source.display_name().to_string(),
                result,
            })
            .collect()
    }

    async fn speed_of(&self, source: &VersionSource, force_refresh: bool) -> SpeedTestResult {
        let id = source.id();
        if !force_refresh {
            if let Some(cached) = self.speeds.lock().await.get(&id) {
                if cached.is_fresh(self.clock.now(), Duration::minutes(SPEED_TTL_MINUTES)) {
                    return cached.value.clone();
                }
            }
        }

        let result = source.measure_speed().await;
        log::debug!(
            "[resolver] Speed of '{}': available={} ping={:?}ms speed={:?}MB/s",
            id,
            result.is_available,
            result.ping_ms,
            result.speed_mbps
        );
        self.speeds
            .lock()
            .await
            .insert(id, Cached::new(result.clone(), self.clock.now()));
        result
    }
}
