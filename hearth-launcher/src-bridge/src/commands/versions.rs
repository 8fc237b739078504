use super::{to_json, CommandError};
use crate::setup::AppState;
use hearth_lib::Branch;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BranchArgs {
    #[serde(default)]
    pub branch: Branch,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeedTestArgs {
    /// `official` or `mirror:<id>`; all active sources when absent
    pub source_id: Option<String>,
    pub force_refresh: bool,
}

pub async fn list(state: &AppState, args: BranchArgs) -> Result<Value, CommandError> {
    to_json(state.resolver.get_version_list(args.branch).await)
}

pub async fn list_with_sources(state: &AppState, args: BranchArgs) -> Result<Value, CommandError> {
    // The UI may have signed in or out since the last listing.
    state.credentials.reload();
    to_json(state.resolver.get_version_list_with_sources(args.branch).await)
}

pub async fn speed_test(state: &AppState, args: SpeedTestArgs) -> Result<Value, CommandError> {
    match args.source_id {
        Some(id) => {
            let result = state
                .resolver
                .test_source_speed(&id, args.force_refresh)
                .await
                .ok_or_else(|| CommandError::new("notFound", format!("Unknown source '{}'", id)))?;
            to_json(result)
        }
        None => to_json(state.resolver.test_all_speeds(args.force_refresh).await),
    }
}
