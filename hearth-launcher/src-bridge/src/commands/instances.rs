use super::{to_json, CommandError};
use crate::bridge::{Outbox, Outgoing};
use crate::setup::AppState;
use hearth_lib::game::instance::CreateInstance;
use hearth_lib::{Branch, InstanceMeta, InstanceState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IdArgs {
    pub id: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RenameArgs {
    pub id: String,
    pub custom_name: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChangeVersionArgs {
    pub id: String,
    pub branch: Branch,
    pub version: u32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MoveRootArgs {
    pub path: PathBuf,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    #[serde(flatten)]
    pub meta: InstanceMeta,
    pub display_name: String,
    pub state: InstanceState,
}

pub async fn list(state: &AppState) -> Result<Value, CommandError> {
    let mut instances = Vec::new();
    for meta in state.registry.list().await {
        let instance_state = state.registry.state(&meta.id).await;
        instances.push(InstanceView {
            display_name: meta.display_name(),
            state: instance_state,
            meta,
        });
    }
    let selected_id = state.registry.selected().await.map(|m| m.id);
    Ok(json!({
        "instances": to_json(instances)?,
        "selectedId": selected_id,
        "root": state.registry.root().await,
    }))
}

pub async fn create(state: &AppState, args: CreateInstance) -> Result<Value, CommandError> {
    to_json(state.registry.create(args).await?)
}

pub async fn delete(state: &AppState, args: IdArgs) -> Result<Value, CommandError> {
    if is_downloading(state, &args.id) {
        return Err(busy());
    }
    let deleted = state.registry.delete(&args.id).await?;
    Ok(json!({ "deleted": deleted }))
}

pub async fn rename(state: &AppState, args: RenameArgs) -> Result<Value, CommandError> {
    to_json(state.registry.rename(&args.id, args.custom_name).await?)
}

pub async fn change_version(state: &AppState, args: ChangeVersionArgs) -> Result<Value, CommandError> {
    if is_downloading(state, &args.id) {
        return Err(busy());
    }
    let changed = state
        .registry
        .change_version(&args.id, args.branch, args.version)
        .await?;
    if !changed {
        return Err(CommandError::new("notFound", "That instance no longer exists"));
    }
    to_json(state.registry.get(&args.id).await)
}

pub async fn select(state: &AppState, args: IdArgs) -> Result<Value, CommandError> {
    state.registry.select(&args.id).await?;
    Ok(json!({ "selectedId": args.id }))
}

pub async fn validate(state: &AppState, args: IdArgs) -> Result<Value, CommandError> {
    to_json(state.registry.validate_instance(&args.id).await?)
}

pub async fn sync(state: &AppState) -> Result<Value, CommandError> {
    let changed = state.registry.sync_with_config().await?;
    Ok(json!({ "changed": changed }))
}

/// Relocate all instances. Progress arrives as `moveProgress` events.
pub async fn move_root(state: &AppState, outbox: &Outbox, args: MoveRootArgs) -> Result<Value, CommandError> {
    if state.orchestrator.is_active() {
        return Err(busy());
    }
    state
        .registry
        .move_root(&args.path, state.config.as_ref(), |progress| {
            outbox.send(Outgoing::MoveProgress(progress))
        })
        .await?;
    Ok(json!({ "root": state.registry.root().await }))
}

/// An active download whose target is not resolved yet may be any instance.
fn is_downloading(state: &AppState, id: &str) -> bool {
    match state.orchestrator.state() {
        Some(download) => download.instance_id.as_deref().map_or(true, |target| target == id),
        None => false,
    }
}

fn busy() -> CommandError {
    CommandError::new("busy", "Wait for the current download to finish")
}
