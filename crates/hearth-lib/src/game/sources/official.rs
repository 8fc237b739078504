//! Official, account-gated version API.

use super::speed::{self, SpeedTestResult};
use super::{check_status, file_name_from_url, Artifact, TransferPlan, OFFICIAL_SOURCE_ID};
use crate::auth::{AuthToken, CredentialProvider};
use crate::error::SourceError;
use crate::game::types::{Branch, LATEST};
use crate::utils::http::{self, LISTING_TIMEOUT, PROBE_TIMEOUT};
use reqwest::header::{HeaderMap, AUTHORIZATION, RANGE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

pub const DEFAULT_OFFICIAL_API_URL: &str = "https://api.hearthgame.net/launcher/v1";

#[derive(Debug, Deserialize)]
struct VersionListResponse {
    versions: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanResponse {
    artifacts: Vec<PlanArtifact>,
    total_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanArtifact {
    url: String,
    file_name: Option<String>,
    size: Option<u64>,
    sha256: Option<String>,
    #[serde(default)]
    from_version: u32,
    version: Option<u32>,
}

#[derive(Clone)]
pub struct OfficialSource {
    client: Client,
    api_base: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl OfficialSource {
    pub fn new(client: Client, api_base: &str, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn has_credential(&self) -> bool {
        self.credentials.has_credential()
    }

    fn versions_url(&self, branch: Branch) -> String {
        format!("{}/branches/{}/versions", self.api_base, branch.as_str())
    }

    fn plan_url(&self, branch: Branch, version: u32, base: Option<u32>) -> String {
        let mut url = format!(
            "{}/branches/{}/versions/{}/plan",
            self.api_base,
            branch.as_str(),
            version
        );
        if let Some(from) = base.filter(|b| *b > 0 && *b < version) {
            url.push_str(&format!("?from={}", from));
        }
        url
    }

    /// Fails with `Unauthenticated` before touching the network when signed out,
    /// so the UI can tell "sign in" apart from "offline".
    fn token(&self) -> Result<AuthToken, SourceError> {
        self.credentials
            .credential()
            .ok_or(SourceError::Unauthenticated)
    }

    pub async fn list_versions(&self, branch: Branch) -> Result<Vec<u32>, SourceError> {
        let token = self.token()?;
        let body: VersionListResponse = self.get_json(&self.versions_url(branch), &token, None).await?;
        log::debug!(
            "[official] {} versions listed for {}",
            body.versions.len(),
            branch
        );
        Ok(body.versions.into_iter().filter(|v| *v != LATEST).collect())
    }

    pub async fn resolve_transfer_plan(
        &self,
        branch: Branch,
        version: u32,
        base: Option<u32>,
    ) -> Result<TransferPlan, SourceError> {
        let token = self.token()?;
        let version = if version == LATEST {
            self.list_versions(branch)
                .await?
                .into_iter()
                .max()
                .ok_or(SourceError::VersionUnavailable(LATEST))?
        } else {
            version
        };

        let url = self.plan_url(branch, version, base);
        let plan: PlanResponse = self.get_json(&url, &token, Some(version)).await?;
        if plan.artifacts.is_empty() {
            return Err(SourceError::Malformed(format!(
                "plan for {} {} has no artifacts",
                branch, version
            )));
        }

        let api = Url::parse(&format!("{}/", self.api_base))
            .map_err(|e| SourceError::Malformed(e.to_string()))?;
        let artifacts = plan
            .artifacts
            .into_iter()
            .map(|a| {
                let url = api
                    .join(&a.url)
                    .map(String::from)
                    .map_err(|e| SourceError::Malformed(format!("artifact url '{}': {}", a.url, e)))?;
                let fallback = format!("{}.zip", version);
                Ok(Artifact {
                    file_name: a
                        .file_name
                        .map(|n| file_name_from_url(&n, &fallback))
                        .unwrap_or_else(|| file_name_from_url(&url, &fallback)),
                    url,
                    version: a.version.unwrap_or(version),
                    from_version: a.from_version,
                    size: a.size,
                    sha256: a.sha256,
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?;

        // Artifact URLs are pre-signed; the bearer token stays on the API host.
        Ok(TransferPlan {
            source_id: OFFICIAL_SOURCE_ID.to_string(),
            branch,
            version,
            artifacts,
            total_size: plan.total_size,
            headers: HeaderMap::new(),
        })
    }

    pub async fn measure_speed(&self) -> SpeedTestResult {
        let token = match self.token() {
            Ok(token) => token,
            Err(_) => return SpeedTestResult::unavailable(),
        };
        let url = self.versions_url(Branch::Release);
        let ping = self
            .client
            .head(&url)
            .header(AUTHORIZATION, token.bearer())
            .timeout(PROBE_TIMEOUT);
        let sample = self
            .client
            .get(&url)
            .header(AUTHORIZATION, token.bearer())
            .header(RANGE, format!("bytes=0-{}", speed::SAMPLE_BYTES - 1))
            .timeout(LISTING_TIMEOUT);
        speed::measure(ping, sample).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &AuthToken,
        version: Option<u32>,
    ) -> Result<T, SourceError> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, token.bearer())
            .timeout(LISTING_TIMEOUT)
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(http::describe_error(&e)))?;

        let response = check_status(response, version)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Unreachable(http::describe_error(&e)))?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NoCredential, StaticCredential};

    fn source(credentials: Arc<dyn CredentialProvider>) -> OfficialSource {
        OfficialSource::new(
            http::build_client().unwrap(),
            "https://api.example.test/v1/",
            credentials,
        )
    }

    #[tokio::test]
    async fn signed_out_fails_without_network() {
        let s = source(Arc::new(NoCredential));
        assert_eq!(
            s.list_versions(Branch::Release).await,
            Err(SourceError::Unauthenticated)
        );
        assert!(!s.measure_speed().await.is_available);
    }

    #[test]
    fn plan_url_only_requests_forward_deltas() {
        let s = source(Arc::new(StaticCredential(AuthToken::new("t"))));
        assert_eq!(
            s.plan_url(Branch::Release, 7, Some(5)),
            "https://api.example.test/v1/branches/release/versions/7/plan?from=5"
        );
        assert_eq!(
            s.plan_url(Branch::PreRelease, 7, Some(7)),
            "https://api.example.test/v1/branches/pre-release/versions/7/plan"
        );
        assert_eq!(
            s.plan_url(Branch::Release, 7, None),
            "https://api.example.test/v1/branches/release/versions/7/plan"
        );
    }
}
