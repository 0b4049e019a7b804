//! Error types for review-gate-core operations.

use std::path::PathBuf;

/// All errors that can occur in the bridge library.
///
/// Most of these never escape the controller loop: they are logged and the
/// loop keeps polling. They surface to callers of the individual components
/// and to the CLI at startup.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("Settings file malformed: {path}: {details}")]
    SettingsMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Exchange Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No response path could be written for trigger {trigger_id}")]
    ResponseNotWritten { trigger_id: String },

    // ─────────────────────────────────────────────────────────────────────
    // Attachment Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Attachment rejected: {path}: {reason}")]
    AttachmentRejected { path: PathBuf, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Speech Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Recording already in progress")]
    RecordingActive,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Recorder failed to start: {command}: {details}")]
    RecorderSpawn { command: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("History store error: {context}: {source}")]
    History {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("IPC error: {0}")]
    Ipc(String),

    /// Nothing accepted the connection; the request was never delivered.
    #[error("IPC socket unavailable: {0}")]
    IpcUnavailable(String),

    /// The request was delivered but no reply arrived in time.
    #[error("IPC request timed out")]
    IpcTimeout,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl GateError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        GateError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        GateError::Json {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn history(context: impl Into<String>, source: rusqlite::Error) -> Self {
        GateError::History {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using GateError.
pub type Result<T> = std::result::Result<T, GateError>;

impl From<GateError> for String {
    fn from(err: GateError) -> String {
        err.to_string()
    }
}
