//! User settings for the bridge.
//!
//! Settings live in `settings.json` (see [`crate::storage::StorageConfig`]).
//! Precedence, highest first: CLI overrides, the settings file, defaults.
//! Unknown keys in the file (for example `theme`, used by other front ends)
//! are preserved on save.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GateError, Result};
use crate::storage::write_json_atomic;

pub const MIN_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_AUTO_MESSAGE: &str = "Continue";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_SPEECH_TIMEOUT_SECS: u64 = 30;
pub const MIN_SPEECH_TIMEOUT_SECS: u64 = 1;
pub const MAX_SPEECH_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MIN_AUDIO_BYTES: u64 = 1000;
pub const DEFAULT_MAX_RECORDING_SECS: u64 = 300;
pub const MAX_RECORDING_LIMIT_SECS: u64 = 3600;
pub const DEFAULT_RECORDER_PROGRAM: &str = "sox";
pub const DEFAULT_STATUS_FRESHNESS_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Idle seconds before the auto message is submitted. Clamped to [30, 600].
    pub timeout: u64,
    /// Message submitted when the idle timer fires.
    pub auto_message: String,
    pub poll_interval_ms: u64,
    pub speech_timeout_secs: u64,
    /// Recordings smaller than this are treated as silence.
    pub min_audio_bytes: u64,
    pub max_recording_secs: u64,
    pub recorder_program: String,
    pub status_freshness_secs: u64,
    pub ipc_enabled: bool,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            auto_message: DEFAULT_AUTO_MESSAGE.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            speech_timeout_secs: DEFAULT_SPEECH_TIMEOUT_SECS,
            min_audio_bytes: DEFAULT_MIN_AUDIO_BYTES,
            max_recording_secs: DEFAULT_MAX_RECORDING_SECS,
            recorder_program: DEFAULT_RECORDER_PROGRAM.to_string(),
            status_freshness_secs: DEFAULT_STATUS_FRESHNESS_SECS,
            ipc_enabled: true,
            other: Map::new(),
        }
    }
}

impl Settings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn speech_timeout(&self) -> Duration {
        Duration::from_secs(
            self.speech_timeout_secs
                .clamp(MIN_SPEECH_TIMEOUT_SECS, MAX_SPEECH_TIMEOUT_SECS),
        )
    }

    pub fn max_recording(&self) -> Duration {
        Duration::from_secs(self.max_recording_secs.clamp(1, MAX_RECORDING_LIMIT_SECS))
    }

    pub fn status_freshness(&self) -> Duration {
        Duration::from_secs(self.status_freshness_secs)
    }

    pub fn apply(&mut self, overrides: &SettingsOverrides) {
        if let Some(timeout) = overrides.timeout {
            self.timeout = timeout.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        }
        if let Some(message) = overrides.auto_message.as_deref() {
            self.auto_message = message.to_string();
        }
        if let Some(program) = overrides.recorder_program.as_deref() {
            self.recorder_program = program.to_string();
        }
        if let Some(enabled) = overrides.ipc_enabled {
            self.ipc_enabled = enabled;
        }
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub timeout: Option<u64>,
    pub auto_message: Option<String>,
    pub recorder_program: Option<String>,
    pub ipc_enabled: Option<bool>,
}

/// Loads settings, returning defaults if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load(path: &Path) -> Result<Settings> {
    let content = match fs_err::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
        Err(err) => return Err(GateError::io("Failed to read settings", err)),
    };
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_json::from_str(&content).map_err(|e| GateError::SettingsMalformed {
        path: path.to_path_buf(),
        details: e.to_string(),
    })
}

/// Like [`load`], but a malformed file degrades to defaults with a warning.
pub fn load_or_default(path: &Path) -> Settings {
    load(path).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Failed to load settings; using defaults");
        Settings::default()
    })
}

pub fn save(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)
            .map_err(|e| GateError::io("Failed to create settings directory", e))?;
    }
    write_json_atomic(path, settings)
}
