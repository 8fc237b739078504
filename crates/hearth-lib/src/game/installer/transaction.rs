use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// ClientSwap replaces an instance's client directory with a freshly extracted
/// one, keeping the previous directory as a backup until commit.
///
/// Blocking; run it from `spawn_blocking`.
pub struct ClientSwap {
    label: String,
    game_dir: PathBuf,
    backup_dir: PathBuf,
}

impl ClientSwap {
    pub fn new(label: impl Into<String>, game_dir: &Path, backup_dir: &Path) -> Self {
        Self {
            label: label.into(),
            game_dir: game_dir.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
        }
    }

    /// Move the current client directory aside.
    pub fn begin(&self) -> Result<()> {
        if self.backup_dir.exists() {
            fs::remove_dir_all(&self.backup_dir)
                .with_context(|| format!("Remove stale backup {:?}", self.backup_dir))?;
        }
        if self.game_dir.exists() {
            if let Some(parent) = self.backup_dir.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Create backup parent {:?}", parent))?;
            }
            move_dir(&self.game_dir, &self.backup_dir).with_context(|| {
                format!(
                    "Move existing client into backup {:?} -> {:?}",
                    self.game_dir, self.backup_dir
                )
            })?;
        }
        log::info!("[txn:{}] begin", self.label);
        Ok(())
    }

    /// Put `extracted` in place of the client directory.
    pub fn install(&self, extracted: &Path) -> Result<()> {
        if let Some(parent) = self.game_dir.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Create instance dir {:?}", parent))?;
        }
        move_dir(extracted, &self.game_dir)
            .with_context(|| format!("Install client {:?} -> {:?}", extracted, self.game_dir))?;
        log::debug!("[txn:{}] client directory in place", self.label);
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        if self.backup_dir.exists() {
            fs::remove_dir_all(&self.backup_dir)
                .with_context(|| format!("Remove client backup {:?}", self.backup_dir))?;
        }
        log::info!("[txn:{}] commit", self.label);
        Ok(())
    }

    pub fn rollback(&self, reason: &str) -> Result<()> {
        log::warn!("[txn:{}] rollback: {}", self.label, reason);
        if self.backup_dir.exists() {
            if self.game_dir.exists() {
                fs::remove_dir_all(&self.game_dir)
                    .with_context(|| format!("Remove failed install {:?}", self.game_dir))?;
            }
            move_dir(&self.backup_dir, &self.game_dir).with_context(|| {
                format!(
                    "Restore client from backup {:?} -> {:?}",
                    self.backup_dir, self.game_dir
                )
            })?;
        }
        Ok(())
    }
}

fn move_dir(src: &Path, dest: &Path) -> Result<()> {
    match fs::rename(src, dest) {
        Ok(_) => Ok(()),
        Err(err) if is_cross_device_link(&err) => {
            copy_dir_recursive(src, dest)?;
            fs::remove_dir_all(src).with_context(|| format!("Remove source dir {:?}", src))?;
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("Move dir {:?} -> {:?}", src, dest)),
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("Create copy dest {:?}", dest))?;
    for entry in fs::read_dir(src).with_context(|| format!("Read dir {:?}", src))? {
        let entry = entry?;
        let target_path = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target_path)?;
        } else {
            fs::copy(entry.path(), &target_path)
                .with_context(|| format!("Copy file {:?} -> {:?}", entry.path(), target_path))?;
        }
    }
    Ok(())
}

fn is_cross_device_link(err: &std::io::Error) -> bool {
    #[cfg(target_family = "unix")]
    {
        // EXDEV
        err.raw_os_error() == Some(18)
    }

    #[cfg(not(target_family = "unix"))]
    {
        // ERROR_NOT_SAME_DEVICE
        err.raw_os_error() == Some(17)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn swap_then_commit_replaces_client() {
        let tmp = tempdir().unwrap();
        let game = tmp.path().join("game");
        let extracted = tmp.path().join("extract");
        fs::create_dir_all(&game).unwrap();
        fs::write(game.join("old.txt"), b"old").unwrap();
        fs::create_dir_all(&extracted).unwrap();
        fs::write(extracted.join("new.txt"), b"new").unwrap();

        let swap = ClientSwap::new("t", &game, &tmp.path().join("game.bak"));
        swap.begin().unwrap();
        swap.install(&extracted).unwrap();
        swap.commit().unwrap();

        assert!(game.join("new.txt").exists());
        assert!(!game.join("old.txt").exists());
        assert!(!tmp.path().join("game.bak").exists());
    }

    #[test]
    fn rollback_restores_previous_client() {
        let tmp = tempdir().unwrap();
        let game = tmp.path().join("game");
        fs::create_dir_all(&game).unwrap();
        fs::write(game.join("old.txt"), b"old").unwrap();

        let swap = ClientSwap::new("t", &game, &tmp.path().join("game.bak"));
        swap.begin().unwrap();
        fs::create_dir_all(&game).unwrap();
        fs::write(game.join("partial.txt"), b"x").unwrap();
        swap.rollback("test").unwrap();

        assert!(game.join("old.txt").exists());
        assert!(!game.join("partial.txt").exists());
    }
}
