use super::{to_json, CommandError};
use crate::setup::AppState;
use hearth_lib::game::mirrors::MirrorDescriptor;
use hearth_lib::utils::http;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverArgs {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MirrorArgs {
    pub mirror: MirrorDescriptor,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IdArgs {
    pub id: String,
}

pub async fn list(state: &AppState) -> Result<Value, CommandError> {
    to_json(state.mirror_store().list().await?)
}

/// Probe a URL; nothing is saved.
pub async fn discover(state: &AppState, args: DiscoverArgs) -> Result<Value, CommandError> {
    let headers = (!args.headers.is_empty()).then_some(&args.headers);
    let mut descriptor = state.discovery.discover(&args.url, headers).await?;
    descriptor.id = state.mirror_store().unique_id(&descriptor.id).await;
    to_json(descriptor)
}

/// Save a new mirror. A taken id gets a numeric suffix rather than overwriting.
pub async fn add(state: &AppState, args: MirrorArgs) -> Result<Value, CommandError> {
    let mut mirror = args.mirror;
    check_headers(&mirror)?;
    mirror.id = state.mirror_store().unique_id(&mirror.id).await;
    state.mirror_store().save(&mirror).await?;
    state.resolver.reload_mirrors().await;
    log::info!("[mirrors] Added mirror '{}'", mirror.id);
    to_json(mirror)
}

pub async fn update(state: &AppState, args: MirrorArgs) -> Result<Value, CommandError> {
    let mirror = args.mirror;
    if !state.mirror_store().exists(&mirror.id).await {
        return Err(CommandError::new(
            "notFound",
            format!("No mirror with id '{}'", mirror.id),
        ));
    }
    check_headers(&mirror)?;
    state.mirror_store().save(&mirror).await?;
    state.resolver.reload_mirrors().await;
    to_json(mirror)
}

pub async fn delete(state: &AppState, args: IdArgs) -> Result<Value, CommandError> {
    let deleted = state.mirror_store().delete(&args.id).await?;
    if deleted {
        state.resolver.reload_mirrors().await;
    }
    Ok(json!({ "deleted": deleted }))
}

pub async fn reload(state: &AppState) -> Result<Value, CommandError> {
    let enabled = state.resolver.reload_mirrors().await;
    Ok(json!({ "enabled": enabled }))
}

fn check_headers(mirror: &MirrorDescriptor) -> Result<(), CommandError> {
    http::header_map(&mirror.headers)
        .map(|_| ())
        .map_err(|e| CommandError::new("invalidInput", "A custom header is not valid").with_technical(e))
}
