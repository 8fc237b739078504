//! Settings collaborator.
//!
//! Persistence is owned by the host; the core reads typed values and asks for
//! an explicit `save()` when it changes something.

use crate::game::types::Branch;
use std::path::PathBuf;

pub trait SettingsStore: Send + Sync {
    /// Branch the launcher was last pointed at (legacy single-install field).
    fn launcher_branch(&self) -> Branch;

    /// Version pinned by pre-instance launcher builds. `None` when never set.
    fn selected_version(&self) -> Option<u32>;

    /// Override for the directory holding all instances.
    fn instance_directory(&self) -> Option<PathBuf>;

    fn set_instance_directory(&self, path: Option<PathBuf>);

    fn save(&self) -> anyhow::Result<()>;

    /// Save and log a failure instead of returning it.
    fn save_or_warn(&self) {
        if let Err(e) = self.save() {
            log::warn!("[settings] Failed to save settings: {:#}", e);
        }
    }
}
