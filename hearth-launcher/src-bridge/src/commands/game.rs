use super::{to_json, CommandError};
use crate::setup::AppState;
use hearth_lib::DownloadRequest;
use serde::Deserialize;
use serde_json::{json, Value};

fn default_launch() -> bool {
    true
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DownloadArgs {
    /// Selected instance when absent
    pub instance_id: Option<String>,
    #[serde(default = "default_launch")]
    pub launch: bool,
}

/// Starts the download detached and answers at once; the outcome arrives as
/// progress, state and error events.
pub fn download_and_launch(state: &AppState, args: DownloadArgs) -> Result<Value, CommandError> {
    if state.orchestrator.is_active() {
        log::warn!("[game] Download requested while another is running");
        return Ok(json!({ "started": false }));
    }

    let orchestrator = state.orchestrator.clone();
    let request = DownloadRequest {
        instance_id: args.instance_id,
    };
    let launch = args.launch;
    tokio::spawn(async move {
        let outcome = orchestrator.download_and_launch(request, move || launch).await;
        log::info!(
            "[game] Download finished: success={} cancelled={}",
            outcome.success,
            outcome.cancelled
        );
    });
    Ok(json!({ "started": true }))
}

pub fn cancel(state: &AppState) -> Result<Value, CommandError> {
    Ok(json!({ "cancelled": state.orchestrator.cancel() }))
}

pub fn state(state: &AppState) -> Result<Value, CommandError> {
    Ok(json!({
        "download": to_json(state.orchestrator.state())?,
        "running": state.launcher.is_running(),
    }))
}
