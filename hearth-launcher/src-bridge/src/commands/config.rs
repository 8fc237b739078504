use super::{to_json, CommandError};
use crate::setup::AppState;
use serde_json::Value;

pub fn get(state: &AppState) -> Result<Value, CommandError> {
    to_json(state.config.get())
}

/// Merge the given fields into the config and save it.
pub fn set(state: &AppState, payload: Value) -> Result<Value, CommandError> {
    let Value::Object(fields) = payload else {
        return Err(CommandError::invalid_payload("expected an object of config fields"));
    };
    let updated = state
        .config
        .update_fields(&fields)
        .map_err(|e| CommandError::new("invalidConfig", "The setting could not be saved").with_technical(format!("{:#}", e)))?;
    to_json(updated)
}
