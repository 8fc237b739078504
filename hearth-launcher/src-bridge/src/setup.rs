//! Composition root: builds every core service once and shares them.

use crate::auth::SessionCredentials;
use crate::bridge::Outbox;
use crate::launch::ProcessLauncher;
use crate::utils::config::ConfigStore;
use anyhow::{Context, Result};
use hearth_lib::game::mirrors::MirrorDiscoveryService;
use hearth_lib::game::sources::official::DEFAULT_OFFICIAL_API_URL;
use hearth_lib::game::sources::OfficialSource;
use hearth_lib::utils::http::build_client;
use hearth_lib::{DownloadOrchestrator, InstanceRegistry, MirrorStore, VersionResolutionService};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct AppState {
    pub app_dir: PathBuf,
    pub config: Arc<ConfigStore>,
    pub credentials: Arc<SessionCredentials>,
    pub resolver: Arc<VersionResolutionService>,
    pub registry: Arc<InstanceRegistry>,
    pub orchestrator: Arc<DownloadOrchestrator>,
    pub launcher: Arc<ProcessLauncher>,
    pub discovery: MirrorDiscoveryService,
}

impl AppState {
    pub fn mirror_store(&self) -> &MirrorStore {
        self.resolver.store()
    }
}

pub async fn init(app_dir: &Path, outbox: Outbox) -> Result<AppState> {
    let config = Arc::new(ConfigStore::load(app_dir)?);
    let credentials = Arc::new(SessionCredentials::load(app_dir));
    let client = build_client().context("Failed to build HTTP client")?;

    let api_url = config
        .get()
        .official_api_url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_OFFICIAL_API_URL.to_string());
    log::info!("[setup] Official API at {}", api_url);
    let official = OfficialSource::new(client.clone(), &api_url, credentials.clone());

    let resolver = Arc::new(VersionResolutionService::new(
        official,
        MirrorStore::new(app_dir),
        client.clone(),
    ));
    resolver.reload_mirrors().await;

    let root = InstanceRegistry::default_root(app_dir, config.as_ref());
    let registry = Arc::new(
        InstanceRegistry::open(&root)
            .await
            .with_context(|| format!("Failed to open instances at {:?}", root))?,
    );
    if let Err(e) = registry.migrate_legacy(config.as_ref()).await {
        log::warn!("[setup] Legacy install migration failed: {}", e);
    }
    match registry.sync_with_config().await {
        Ok(0) => {}
        Ok(changed) => log::info!("[setup] Refreshed install state of {} instance(s)", changed),
        Err(e) => log::warn!("[setup] Could not refresh install state: {}", e),
    }

    let launcher = Arc::new(ProcessLauncher::new());
    let orchestrator = Arc::new(
        DownloadOrchestrator::new(registry.clone(), resolver.clone(), Arc::new(outbox), client.clone())
            .with_launcher(launcher.clone()),
    );

    Ok(AppState {
        app_dir: app_dir.to_path_buf(),
        config,
        credentials,
        resolver,
        registry,
        orchestrator,
        launcher,
        discovery: MirrorDiscoveryService::with_client(client),
    })
}
