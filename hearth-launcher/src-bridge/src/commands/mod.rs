//! Bridge channel handlers.
//!
//! Every handler returns JSON data or a `CommandError`; nothing is allowed to
//! panic or leak a raw error across the bridge.

pub mod config;
pub mod game;
pub mod instances;
pub mod mirrors;
pub mod versions;

use crate::bridge::Outbox;
use crate::setup::AppState;
use hearth_lib::{DiscoveryError, RegistryError, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error payload of a failed response: a stable `kind`, a short message for
/// the user and the full detail for logs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technical: Option<String>,
}

impl CommandError {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            technical: None,
        }
    }

    pub fn with_technical(mut self, technical: impl ToString) -> Self {
        self.technical = Some(technical.to_string());
        self
    }

    pub fn invalid_payload(err: impl ToString) -> Self {
        Self::new("invalidPayload", "The request was malformed").with_technical(err)
    }

    pub fn internal(err: &anyhow::Error) -> Self {
        Self::new("internal", "Something went wrong").with_technical(format!("{:#}", err))
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<RegistryError> for CommandError {
    fn from(err: RegistryError) -> Self {
        let (kind, message) = match &err {
            RegistryError::IoError { .. } => ("ioError", "Could not access the instance files"),
            RegistryError::NotFound(_) => ("notFound", "That instance no longer exists"),
            RegistryError::AlreadyExists(_) => (
                "alreadyExists",
                "The destination already contains an instances folder",
            ),
            RegistryError::IndexCorrupt(_) => ("indexCorrupt", "The instance list is damaged"),
            RegistryError::InvalidTarget(_) => (
                "invalidTarget",
                "Choose a folder outside the current instances folder",
            ),
            RegistryError::ConfigPersist(_) => (
                "configPersist",
                "The new location could not be saved; instances were left in place",
            ),
            RegistryError::MoveInProgress => ("busy", "Instances are being moved, try again shortly"),
        };
        CommandError::new(kind, message).with_technical(err)
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        let (kind, message) = match &err {
            StoreError::InvalidId(_) => ("invalidId", "Mirror ids may only use a-z, 0-9, '-' and '_'"),
            StoreError::Io(_) | StoreError::Serialize(_) => {
                ("storeError", "Could not save the mirror configuration")
            }
        };
        CommandError::new(kind, message).with_technical(err)
    }
}

impl From<DiscoveryError> for CommandError {
    fn from(err: DiscoveryError) -> Self {
        let (kind, message) = match &err {
            DiscoveryError::Unreachable(_) => ("unreachable", "The mirror could not be reached"),
            DiscoveryError::Unrecognized(_) => (
                "unrecognized",
                "No supported mirror layout was found at that address",
            ),
            DiscoveryError::InvalidInput(_) => ("invalidInput", "Check the address and headers"),
        };
        CommandError::new(kind, message).with_technical(err)
    }
}

pub(crate) fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, CommandError> {
    // Channels without arguments may be sent with no payload at all.
    let payload = if payload.is_null() {
        Value::Object(Default::default())
    } else {
        payload
    };
    serde_json::from_value(payload).map_err(CommandError::invalid_payload)
}

pub(crate) fn to_json<T: Serialize>(value: T) -> Result<Value, CommandError> {
    serde_json::to_value(value)
        .map_err(|e| CommandError::new("internal", "Could not encode the response").with_technical(e))
}

pub async fn dispatch(
    state: &AppState,
    outbox: &Outbox,
    channel: &str,
    payload: Value,
) -> Result<Value, CommandError> {
    match channel {
        "versions:list" => versions::list(state, parse(payload)?).await,
        "versions:listWithSources" => versions::list_with_sources(state, parse(payload)?).await,
        "versions:speedTest" => versions::speed_test(state, parse(payload)?).await,

        "mirrors:list" => mirrors::list(state).await,
        "mirrors:discover" => mirrors::discover(state, parse(payload)?).await,
        "mirrors:add" => mirrors::add(state, parse(payload)?).await,
        "mirrors:update" => mirrors::update(state, parse(payload)?).await,
        "mirrors:delete" => mirrors::delete(state, parse(payload)?).await,
        "mirrors:reload" => mirrors::reload(state).await,

        "instances:list" => instances::list(state).await,
        "instances:create" => instances::create(state, parse(payload)?).await,
        "instances:delete" => instances::delete(state, parse(payload)?).await,
        "instances:rename" => instances::rename(state, parse(payload)?).await,
        "instances:changeVersion" => instances::change_version(state, parse(payload)?).await,
        "instances:select" => instances::select(state, parse(payload)?).await,
        "instances:validate" => instances::validate(state, parse(payload)?).await,
        "instances:sync" => instances::sync(state).await,
        "instances:moveRoot" => instances::move_root(state, outbox, parse(payload)?).await,

        "game:downloadAndLaunch" => game::download_and_launch(state, parse(payload)?),
        "game:cancel" => game::cancel(state),
        "game:state" => game::state(state),

        "config:get" => config::get(state),
        "config:set" => config::set(state, payload),

        other => Err(CommandError::new("unknownChannel", format!("Unknown channel '{}'", other))),
    }
}
