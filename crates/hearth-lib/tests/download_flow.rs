mod common;

use common::*;
use hearth_lib::game::installer::{DownloadPhase, ErrorKind, GameState};
use hearth_lib::game::instance::CreateInstance;
use hearth_lib::game::mirrors::MirrorStore;
use hearth_lib::utils::http::build_client;
use hearth_lib::{
    Branch, DownloadError, DownloadOrchestrator, DownloadRequest, InstanceRegistry,
    VersionResolutionService,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    _app_dir: TempDir,
    server: MockServer,
    registry: Arc<InstanceRegistry>,
    resolver: Arc<VersionResolutionService>,
    sink: Arc<CapturingSink>,
    orchestrator: Arc<DownloadOrchestrator>,
}

/// One json-index mirror served by a mock server; the official source is signed out.
async fn harness() -> Harness {
    init_logging();
    let app_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;

    let store = MirrorStore::new(app_dir.path());
    store
        .save(&json_index_mirror("local", 1, &format!("{}/index.json", server.uri())))
        .await
        .unwrap();
    let resolver = Arc::new(VersionResolutionService::new(
        official(&server.uri(), signed_out()),
        store,
        build_client().unwrap(),
    ));
    let registry = Arc::new(InstanceRegistry::open(app_dir.path().join("Instances")).await.unwrap());
    let sink = Arc::new(CapturingSink::default());
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        registry.clone(),
        resolver.clone(),
        sink.clone(),
        build_client().unwrap(),
    ));

    Harness {
        _app_dir: app_dir,
        server,
        registry,
        resolver,
        sink,
        orchestrator,
    }
}

async fn serve_index(server: &MockServer, versions: &[u32]) {
    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(index_body(versions)))
        .mount(server)
        .await;
}

async fn serve_archive(server: &MockServer, version: u32, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{}.zip", version)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Mount a release index with explicit entries at `route`.
async fn serve_entries(server: &MockServer, route: &str, entries: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "branches": { "release": entries } })))
        .mount(server)
        .await;
}

fn full(version: u32) -> Value {
    json!({ "version": version, "url": format!("files/{}.zip", version) })
}

fn delta(from: u32, version: u32) -> Value {
    json!({ "version": version, "fromVersion": from, "url": format!("delta/{}-{}.zip", from, version) })
}

async fn serve_file(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Install version 1 into a latest-tracking instance, then swap the mock server's contents.
async fn installed_at_one(h: &Harness) -> String {
    serve_index(&h.server, &[1]).await;
    serve_archive(&h.server, 1, client_archive(1)).await;
    let instance = h.registry.create(pinned(0)).await.unwrap();
    let first = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || false)
        .await;
    assert_eq!(first.installed_version, Some(1));
    h.server.reset().await;
    instance.id
}

fn pinned(version: u32) -> CreateInstance {
    CreateInstance {
        branch: Branch::Release,
        version,
        ..Default::default()
    }
}

#[tokio::test]
async fn pinned_instance_downloads_and_validates() {
    let h = harness().await;
    serve_index(&h.server, &[7]).await;
    serve_archive(&h.server, 7, client_archive(7)).await;
    let instance = h.registry.create(pinned(7)).await.unwrap();

    let outcome = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || false)
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.installed_version, Some(7));
    let meta = h.registry.get(&instance.id).await.unwrap();
    assert_eq!(meta.installed_version, Some(7));
    assert!(meta.installed);
    assert!(h.registry.validate_instance(&instance.id).await.unwrap().is_valid);

    let layout = h.registry.layout(&instance.id).await.unwrap();
    assert!(!layout.staging_dir().exists());
    assert_eq!(h.sink.states(), vec![GameState::Downloading, GameState::Stopped]);
    assert!(h.sink.errors().is_empty());
    let keys = h.sink.progress_keys();
    assert_eq!(keys.first().map(String::as_str), Some("download.resolving"));
    assert_eq!(keys.last().map(String::as_str), Some("download.complete"));
    assert!(!h.orchestrator.is_active());
}

#[tokio::test]
async fn latest_tracking_instance_follows_new_builds() {
    let h = harness().await;
    serve_index(&h.server, &[5]).await;
    serve_archive(&h.server, 5, client_archive(5)).await;
    let instance = h.registry.create(pinned(0)).await.unwrap();

    let first = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || false)
        .await;
    assert_eq!(first.installed_version, Some(5));

    h.server.reset().await;
    serve_index(&h.server, &[5, 7]).await;
    serve_archive(&h.server, 7, client_archive(7)).await;

    let second = h
        .orchestrator
        .download_and_launch(
            DownloadRequest {
                instance_id: Some(instance.id.clone()),
            },
            || false,
        )
        .await;
    assert!(second.success, "{:?}", second.error);

    let meta = h.registry.get(&instance.id).await.unwrap();
    assert_eq!(meta.installed_version, Some(7));
    assert_eq!(meta.version, 0);
    assert!(meta.tracks_latest());
}

#[tokio::test]
async fn incomplete_archive_fails_validation() {
    let h = harness().await;
    serve_index(&h.server, &[3]).await;
    serve_archive(&h.server, 3, archive_without_assets()).await;
    let instance = h.registry.create(pinned(3)).await.unwrap();

    let outcome = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || true)
        .await;

    assert!(!outcome.success);
    assert!(!outcome.cancelled);
    assert_eq!(
        outcome.error,
        Some(DownloadError::ValidationFailed {
            missing: vec!["assets".to_string()]
        })
    );
    let errors = h.sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::InstallValidationFailed);

    let meta = h.registry.get(&instance.id).await.unwrap();
    assert!(!meta.installed);
    assert_eq!(meta.installed_version, None);
    assert_eq!(h.sink.states().last(), Some(&GameState::Stopped));
}

#[tokio::test]
async fn unknown_version_is_a_resolution_failure() {
    let h = harness().await;
    serve_index(&h.server, &[1]).await;
    h.registry.create(pinned(4)).await.unwrap();

    let outcome = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || false)
        .await;

    assert!(matches!(outcome.error, Some(DownloadError::ResolutionFailed(_))));
    assert_eq!(h.sink.errors()[0].kind, ErrorKind::ResolutionFailed);
}

#[tokio::test]
async fn cancel_during_transfer_stops_without_error() {
    let h = harness().await;
    serve_index(&h.server, &[2]).await;
    Mock::given(method("GET"))
        .and(path("/files/2.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(client_archive(2))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&h.server)
        .await;
    let instance = h.registry.create(pinned(2)).await.unwrap();

    let orchestrator = h.orchestrator.clone();
    let task = tokio::spawn(async move {
        orchestrator
            .download_and_launch(DownloadRequest::default(), || true)
            .await
    });

    let mut transferring = false;
    for _ in 0..200 {
        if h.orchestrator.state().map(|s| s.phase) == Some(DownloadPhase::Transferring) {
            transferring = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(transferring, "download never reached the transfer phase");

    let rejected = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || false)
        .await;
    assert_eq!(rejected.error, Some(DownloadError::AlreadyRunning));

    assert!(h.orchestrator.cancel());
    let outcome = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("cancellation should end the download promptly")
        .unwrap();

    assert!(outcome.cancelled);
    assert!(!outcome.success);
    assert_eq!(outcome.error, None);
    assert!(h.sink.errors().is_empty());
    assert_eq!(h.sink.states(), vec![GameState::Downloading, GameState::Stopped]);
    assert!(!h.orchestrator.is_active());
    assert!(!h.orchestrator.cancel());

    let meta = h.registry.get(&instance.id).await.unwrap();
    assert!(!meta.installed);
}

#[tokio::test]
async fn cancel_is_refused_once_patching_starts() {
    let h = harness().await;
    serve_index(&h.server, &[6]).await;
    serve_archive(&h.server, 6, client_archive(6)).await;
    let instance = h.registry.create(pinned(6)).await.unwrap();

    let accepted = Arc::new(Mutex::new(None));
    let orchestrator = Arc::downgrade(&h.orchestrator);
    h.sink.on_progress_key("download.patching", {
        let accepted = accepted.clone();
        move || {
            if let Some(orchestrator) = orchestrator.upgrade() {
                *accepted.lock().unwrap() = Some(orchestrator.cancel());
            }
        }
    });

    let outcome = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || false)
        .await;

    assert_eq!(*accepted.lock().unwrap(), Some(false));
    assert!(outcome.success, "{:?}", outcome.error);
    assert!(!outcome.cancelled);
    let meta = h.registry.get(&instance.id).await.unwrap();
    assert!(meta.installed);
    assert_eq!(meta.installed_version, Some(6));
}

#[tokio::test]
async fn failing_mirror_hands_off_to_the_next_candidate() {
    let h = harness().await;
    // "local" lists the build but cannot serve it.
    serve_index(&h.server, &[4]).await;
    serve_entries(&h.server, "/backup/index.json", vec![full(4)]).await;
    serve_file(&h.server, "/backup/files/4.zip", client_archive(4)).await;
    h.resolver
        .store()
        .save(&json_index_mirror("backup", 5, &format!("{}/backup/index.json", h.server.uri())))
        .await
        .unwrap();
    h.resolver.reload_mirrors().await;
    let instance = h.registry.create(pinned(4)).await.unwrap();

    let outcome = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || false)
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(h.registry.get(&instance.id).await.unwrap().installed_version, Some(4));
    assert!(h.sink.errors().is_empty());
}

#[tokio::test]
async fn unavailable_delta_falls_back_to_the_full_archive() {
    let h = harness().await;
    let id = installed_at_one(&h).await;

    // The 1 -> 2 delta is listed but missing; the full archive works.
    serve_entries(&h.server, "/index.json", vec![full(1), full(2), delta(1, 2)]).await;
    serve_archive(&h.server, 2, client_archive(2)).await;

    let outcome = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || false)
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    let meta = h.registry.get(&id).await.unwrap();
    assert_eq!(meta.installed_version, Some(2));
    let layout = h.registry.layout(&id).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(layout.game_dir().join("Client/Data/core.dat")).unwrap(),
        "2"
    );
}

#[tokio::test]
async fn broken_delta_chain_discards_the_installed_base() {
    let h = harness().await;
    let id = installed_at_one(&h).await;

    // First hop applies, the second is not an archive, and neither is the full build.
    serve_entries(&h.server, "/index.json", vec![full(3), delta(1, 2), delta(2, 3)]).await;
    serve_file(
        &h.server,
        "/delta/1-2.zip",
        zip_bytes(&[("Client/Data/core.dat", b"2".as_slice())]),
    )
    .await;
    serve_file(&h.server, "/delta/2-3.zip", b"not a zip".to_vec()).await;
    serve_file(&h.server, "/files/3.zip", b"not a zip either".to_vec()).await;

    let outcome = h
        .orchestrator
        .download_and_launch(DownloadRequest::default(), || false)
        .await;

    assert!(matches!(outcome.error, Some(DownloadError::PatchFailed(_))));
    let meta = h.registry.get(&id).await.unwrap();
    assert!(!meta.installed);
    assert_eq!(meta.installed_version, None);
    assert!(meta.tracks_latest());
}
