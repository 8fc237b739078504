#![allow(dead_code)]

use hearth_lib::auth::{AuthToken, CredentialProvider, NoCredential, StaticCredential};
use hearth_lib::game::installer::{ErrorEvent, GameState, ProgressEvent, ProgressSink};
use hearth_lib::game::mirrors::{MirrorDescriptor, MirrorSourceConfig};
use hearth_lib::game::sources::OfficialSource;
use hearth_lib::utils::http::build_client;
use hearth_lib::{Branch, SettingsStore};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone)]
pub enum SinkEvent {
    Progress(ProgressEvent),
    State(GameState, Option<i32>),
    Error(ErrorEvent),
}

type ProgressHook = (String, Box<dyn Fn() + Send + Sync>);

/// Records every event for later assertions.
#[derive(Default)]
pub struct CapturingSink {
    events: Mutex<Vec<SinkEvent>>,
    hook: Mutex<Option<ProgressHook>>,
}

impl CapturingSink {
    /// Run `f` whenever a progress event with `key` arrives.
    pub fn on_progress_key(&self, key: &str, f: impl Fn() + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some((key.to_string(), Box::new(f)));
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<GameState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::State(state, _) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    pub fn progress_keys(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Progress(p) => Some(p.message_key),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for CapturingSink {
    fn progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(SinkEvent::Progress(event.clone()));
        if let Some((key, f)) = self.hook.lock().unwrap().as_ref() {
            if *key == event.message_key {
                f();
            }
        }
    }

    fn state_changed(&self, state: GameState, exit_code: Option<i32>) {
        self.events.lock().unwrap().push(SinkEvent::State(state, exit_code));
    }

    fn error(&self, event: &ErrorEvent) {
        self.events.lock().unwrap().push(SinkEvent::Error(event.clone()));
    }
}

/// In-memory settings; `fail_save` makes every save return an error.
#[derive(Default)]
pub struct MemorySettings {
    pub branch: Branch,
    pub selected_version: Option<u32>,
    pub instance_directory: Mutex<Option<PathBuf>>,
    pub fail_save: bool,
    pub saves: Mutex<u32>,
}

impl SettingsStore for MemorySettings {
    fn launcher_branch(&self) -> Branch {
        self.branch
    }

    fn selected_version(&self) -> Option<u32> {
        self.selected_version
    }

    fn instance_directory(&self) -> Option<PathBuf> {
        self.instance_directory.lock().unwrap().clone()
    }

    fn set_instance_directory(&self, path: Option<PathBuf>) {
        *self.instance_directory.lock().unwrap() = path;
    }

    fn save(&self) -> anyhow::Result<()> {
        if self.fail_save {
            anyhow::bail!("disk full");
        }
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}

pub fn signed_in() -> Arc<dyn CredentialProvider> {
    Arc::new(StaticCredential(AuthToken::new("test-token")))
}

pub fn signed_out() -> Arc<dyn CredentialProvider> {
    Arc::new(NoCredential)
}

pub fn official(base_url: &str, credentials: Arc<dyn CredentialProvider>) -> OfficialSource {
    OfficialSource::new(build_client().unwrap(), base_url, credentials)
}

pub fn json_index_mirror(id: &str, priority: i32, api_url: &str) -> MirrorDescriptor {
    MirrorDescriptor {
        id: id.to_string(),
        name: format!("Mirror {}", id),
        description: String::new(),
        priority,
        enabled: true,
        source: MirrorSourceConfig::JsonIndex {
            api_url: api_url.to_string(),
        },
        headers: BTreeMap::new(),
    }
}

/// Manifest body for a json-index mirror serving full archives under `files/`.
pub fn index_body(release_versions: &[u32]) -> serde_json::Value {
    let entries: Vec<_> = release_versions
        .iter()
        .map(|v| serde_json::json!({ "version": v, "url": format!("files/{}.zip", v) }))
        .collect();
    serde_json::json!({ "name": "Test Mirror", "branches": { "release": entries } })
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, body) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A complete client archive that passes validation.
pub fn client_archive(version: u32) -> Vec<u8> {
    let binary = format!("Client/{}", hearth_lib::game::instance::types::client_binary_name());
    let marker = version.to_string();
    zip_bytes(&[
        (binary.as_str(), b"binary"),
        ("Client/Data/core.dat", marker.as_bytes()),
        ("Assets.zip", b"assets"),
    ])
}

/// An archive whose client lacks assets.
pub fn archive_without_assets() -> Vec<u8> {
    let binary = format!("Client/{}", hearth_lib::game::instance::types::client_binary_name());
    zip_bytes(&[(binary.as_str(), b"binary"), ("Client/Data/core.dat", b"x")])
}
