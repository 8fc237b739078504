//! Structural checks on an instance's client directory.
//!
//! Existence only, no hashing. Results are never cached: the directory can
//! change underneath us between two calls.

use super::types::{
    client_binary_name, InstanceLayout, InstanceState, ValidationResult, ASSETS_ARCHIVE, ASSETS_DIR,
    CLIENT_DIR, CONFIG_FILE, LIBRARIES_DIR,
};
use std::path::Path;

/// Validate a client directory (an instance's `game/`).
pub fn validate(game_dir: &Path) -> ValidationResult {
    let client_dir = game_dir.join(CLIENT_DIR);

    let has_executable = client_dir.join(client_binary_name()).is_file();
    let has_assets = game_dir.join(ASSETS_ARCHIVE).is_file() || game_dir.join(ASSETS_DIR).is_dir();
    let has_libraries = client_dir.join(LIBRARIES_DIR).is_dir();
    let has_config = client_dir.join(CONFIG_FILE).is_file();

    let mut missing_components = Vec::new();
    if !has_executable {
        missing_components.push("executable".to_string());
    }
    if !has_assets {
        missing_components.push("assets".to_string());
    }
    if !has_libraries {
        missing_components.push("libraries".to_string());
    }

    ValidationResult {
        is_valid: missing_components.is_empty(),
        has_executable,
        has_assets,
        has_libraries,
        has_config,
        missing_components,
    }
}

pub fn state_of(layout: &InstanceLayout) -> InstanceState {
    let game_dir = layout.game_dir();
    if !game_dir.exists() {
        InstanceState::Uninitialized
    } else if validate(&game_dir).is_valid {
        InstanceState::Installed
    } else {
        InstanceState::Corrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn install_client(game_dir: &Path) {
        let client = game_dir.join(CLIENT_DIR);
        fs::create_dir_all(client.join(LIBRARIES_DIR)).unwrap();
        fs::write(client.join(client_binary_name()), b"bin").unwrap();
        fs::write(game_dir.join(ASSETS_ARCHIVE), b"zip").unwrap();
    }

    #[test]
    fn empty_directory_misses_everything() {
        let tmp = tempdir().unwrap();
        let result = validate(tmp.path());
        assert!(!result.is_valid);
        assert_eq!(
            result.missing_components,
            vec!["executable", "assets", "libraries"]
        );
    }

    #[test]
    fn config_is_optional() {
        let tmp = tempdir().unwrap();
        install_client(tmp.path());
        let result = validate(tmp.path());
        assert!(result.is_valid);
        assert!(!result.has_config);
    }

    #[test]
    fn assets_directory_is_accepted() {
        let tmp = tempdir().unwrap();
        install_client(tmp.path());
        fs::remove_file(tmp.path().join(ASSETS_ARCHIVE)).unwrap();
        fs::create_dir(tmp.path().join(ASSETS_DIR)).unwrap();
        assert!(validate(tmp.path()).has_assets);
    }

    #[test]
    fn state_follows_game_directory() {
        let tmp = tempdir().unwrap();
        let layout = InstanceLayout::new(tmp.path());
        assert_eq!(state_of(&layout), InstanceState::Uninitialized);

        fs::create_dir_all(layout.game_dir()).unwrap();
        assert_eq!(state_of(&layout), InstanceState::Corrupted);

        install_client(&layout.game_dir());
        assert_eq!(state_of(&layout), InstanceState::Installed);
    }
}
