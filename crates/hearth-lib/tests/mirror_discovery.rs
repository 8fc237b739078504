mod common;

use common::*;
use hearth_lib::game::mirrors::{MirrorDiscoveryService, MirrorSourceConfig, MirrorStore};
use hearth_lib::DiscoveryError;
use std::collections::BTreeMap;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn json_index_is_recognised_with_manifest_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(index_body(&[1, 2])))
        .mount(&server)
        .await;

    let url = format!("{}/index.json", server.uri());
    let descriptor = MirrorDiscoveryService::new().unwrap().discover(&url, None).await.unwrap();

    assert_eq!(descriptor.name, "Test Mirror");
    assert_eq!(descriptor.id, "127-0-0-1");
    assert!(descriptor.enabled);
    assert_eq!(descriptor.source, MirrorSourceConfig::JsonIndex { api_url: url });
}

#[tokio::test]
async fn pattern_layout_is_found_by_probing() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/files/release/1.zip"))
        .and(header("x-mirror-key", "k"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut headers = BTreeMap::new();
    headers.insert("X-Mirror-Key".to_string(), "k".to_string());
    let base = format!("{}/files", server.uri());
    let descriptor = MirrorDiscoveryService::new().unwrap()
        .discover(&base, Some(&headers))
        .await
        .unwrap();

    assert_eq!(
        descriptor.source,
        MirrorSourceConfig::Pattern {
            url_template: format!("{}/{{branch}}/{{version}}.zip", base)
        }
    );
    assert_eq!(descriptor.headers, headers);
}

#[tokio::test]
async fn reachable_but_unknown_layout_is_unrecognized() {
    let server = MockServer::start().await;
    let err = MirrorDiscoveryService::new().unwrap()
        .discover(&server.uri(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::Unrecognized(_)));
}

#[tokio::test]
async fn store_round_trips_descriptors_with_headers() {
    let app_dir = TempDir::new().unwrap();
    let store = MirrorStore::new(app_dir.path());

    let mut descriptor = json_index_mirror("with-headers", 5, "https://m.example/index.json");
    descriptor
        .headers
        .insert("Authorization".to_string(), "Token abc".to_string());
    store.save(&descriptor).await.unwrap();
    store
        .save(&json_index_mirror("first", 1, "https://f.example/index.json"))
        .await
        .unwrap();

    let listed = store.list().await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "with-headers"]);
    assert_eq!(store.get("with-headers").await.unwrap(), Some(descriptor));

    assert!(store.delete("first").await.unwrap());
    assert!(!store.delete("first").await.unwrap());
    assert_eq!(store.unique_id("with-headers").await, "with-headers-2");
}
