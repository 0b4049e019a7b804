//! Storage locations and atomic JSON writes.
//!
//! Three roots are involved:
//!
//! - **exchange dir**: shared with the agent side; triggers, responses, acks,
//!   speech files and the socket live here (default `/tmp`).
//! - **config dir**: `settings.json` (default `~/.config/review-gate-v2`,
//!   `%APPDATA%\ReviewGateV2` on Windows).
//! - **data dir**: the message history database.
//!
//! Tests use [`StorageConfig::with_root`] so everything lands in a temp dir.

use std::io::Write;
use std::path::{Path, PathBuf};

use review_gate_protocol::files;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{GateError, Result};

#[derive(Debug, Clone)]
pub struct StorageConfig {
    exchange_dir: PathBuf,
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl StorageConfig {
    /// Resolves the production locations.
    pub fn resolve() -> Result<Self> {
        Ok(Self {
            exchange_dir: files::default_exchange_dir(),
            config_dir: default_config_dir()?,
            data_dir: default_data_dir()?,
        })
    }

    /// Puts every root under `root`. Used by tests.
    pub fn with_root(root: &Path) -> Self {
        Self {
            exchange_dir: root.join("exchange"),
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    pub fn with_exchange_dir(mut self, dir: PathBuf) -> Self {
        self.exchange_dir = dir;
        self
    }

    pub fn exchange_dir(&self) -> &Path {
        &self.exchange_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    pub fn history_db(&self) -> PathBuf {
        self.data_dir.join("messages.db")
    }

    /// Creates the exchange directory if needed. The bridge cannot run without it.
    pub fn ensure_exchange_dir(&self) -> Result<()> {
        fs_err::create_dir_all(&self.exchange_dir)
            .map_err(|e| GateError::io("Failed to create exchange directory", e))
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if cfg!(windows) {
        dirs::config_dir()
            .map(|d| d.join("ReviewGateV2"))
            .ok_or(GateError::ConfigDirNotFound)
    } else {
        dirs::home_dir()
            .map(|h| h.join(".config").join("review-gate-v2"))
            .ok_or(GateError::ConfigDirNotFound)
    }
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("review-gate-v2"))
        .ok_or(GateError::ConfigDirNotFound)
}

/// Serializes `value` as pretty JSON and writes it via temp file + rename,
/// so readers never observe a half-written document.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|e| GateError::json(format!("Failed to serialize {}", path.display()), e))?;

    let parent_dir = path.parent().ok_or_else(|| {
        GateError::io(
            format!("{} has no parent directory", path.display()),
            std::io::Error::from(std::io::ErrorKind::InvalidInput),
        )
    })?;
    let mut temp_file = NamedTempFile::new_in(parent_dir)
        .map_err(|e| GateError::io(format!("Temp file error in {}", parent_dir.display()), e))?;
    temp_file
        .write_all(&content)
        .map_err(|e| GateError::io("Failed to write temp file", e))?;
    temp_file
        .flush()
        .map_err(|e| GateError::io("Failed to flush temp file", e))?;
    temp_file
        .persist(path)
        .map_err(|e| GateError::io(format!("Failed to write {}", path.display()), e.error))?;
    Ok(())
}

/// Removes a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs_err::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn with_root_keeps_everything_under_root() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path());
        assert!(storage.exchange_dir().starts_with(temp.path()));
        assert!(storage.settings_file().starts_with(temp.path()));
        assert!(storage.history_db().starts_with(temp.path()));
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("doc.json");
        std::fs::write(&path, "old").unwrap();

        write_json_atomic(&path, &json!({ "a": 1 })).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, json!({ "a": 1 }));
        // No stray temp files left next to the target.
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn atomic_write_fails_for_missing_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("missing").join("doc.json");
        assert!(write_json_atomic(&path, &json!({})).is_err());
    }

    #[test]
    fn remove_if_exists_ignores_missing_files() {
        let temp = tempdir().unwrap();
        assert!(remove_if_exists(&temp.path().join("nope.json")).is_ok());
    }
}
