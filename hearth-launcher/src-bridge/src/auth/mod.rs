//! Download credential for the official source.
//!
//! Sign-in itself happens in the UI; it leaves the resulting session in
//! `session.json` next to the config. `HEARTH_TOKEN` takes precedence, which is
//! handy for headless runs.

use chrono::{DateTime, Utc};
use hearth_lib::{AuthToken, CredentialProvider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const SESSION_FILE: &str = "session.json";
pub const TOKEN_ENV: &str = "HEARTH_TOKEN";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct SessionCredentials {
    path: PathBuf,
    session: RwLock<Option<StoredSession>>,
}

impl SessionCredentials {
    pub fn load(app_dir: &Path) -> Self {
        let credentials = Self {
            path: app_dir.join(SESSION_FILE),
            session: RwLock::new(None),
        };
        credentials.reload();
        credentials
    }

    /// Re-read the session, e.g. after the UI signed in or out.
    pub fn reload(&self) {
        let session = match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Some(StoredSession {
                token: token.trim().to_string(),
                expires_at: None,
            }),
            _ => read_session(&self.path),
        };
        log::debug!(
            "[auth] {}",
            if session.is_some() {
                "Official download credential available"
            } else {
                "Not signed in; official source disabled"
            }
        );
        if let Ok(mut slot) = self.session.write() {
            *slot = session;
        }
    }
}

fn read_session(path: &Path) -> Option<StoredSession> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            log::warn!("[auth] Could not read {:?}: {}", path, e);
            return None;
        }
    };
    match serde_json::from_str::<StoredSession>(&contents) {
        Ok(session) if !session.token.is_empty() => Some(session),
        Ok(_) => None,
        Err(e) => {
            log::warn!("[auth] Ignoring malformed session file: {}", e);
            None
        }
    }
}

impl CredentialProvider for SessionCredentials {
    fn credential(&self) -> Option<AuthToken> {
        let session = self.session.read().ok()?;
        session
            .as_ref()
            .filter(|s| !s.is_expired(Utc::now()))
            .map(|s| AuthToken::new(s.token.clone()))
    }
}
