//! File naming inside the exchange directory.
//!
//! ```text
//! review_gate_trigger.json              agent  -> bridge   (primary trigger)
//! review_gate_trigger_{0,1,2}.json      agent  -> bridge   (backup triggers)
//! review_gate_ack_<id>.json             bridge -> agent
//! review_gate_response_<id>.json        bridge -> agent    (four synonymous copies)
//! review_gate_response.json
//! mcp_response_<id>.json
//! mcp_response.json
//! review_gate_speech_trigger_<id>.json  bridge -> transcriber
//! review_gate_speech_response_<id>.json transcriber -> bridge
//! review_gate_audio_<millis>.wav        recorder output
//! review_gate_v2.log                    MCP server liveness log
//! review_gate.sock                      socket transport
//! ```

use std::path::{Path, PathBuf};

pub const EXCHANGE_DIR_ENV: &str = "REVIEW_GATE_EXCHANGE_DIR";
pub const PRIMARY_TRIGGER_FILE: &str = "review_gate_trigger.json";
pub const BACKUP_TRIGGER_COUNT: u32 = 3;
pub const SOCKET_NAME: &str = "review_gate.sock";
/// Log files the MCP server appends to; their mtime is the liveness signal.
pub const STATUS_LOG_FILES: [&str; 2] = ["review_gate_v2.log", "review_gate_v2_web.log"];

/// Returns the exchange directory: `$REVIEW_GATE_EXCHANGE_DIR`, else `/tmp`
/// on unix (the MCP server hardcodes it), else the OS temp dir.
pub fn default_exchange_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(EXCHANGE_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    if cfg!(unix) {
        PathBuf::from("/tmp")
    } else {
        std::env::temp_dir()
    }
}

/// Primary trigger path followed by the indexed backups, in polling order.
pub fn trigger_paths(dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(1 + BACKUP_TRIGGER_COUNT as usize);
    paths.push(dir.join(PRIMARY_TRIGGER_FILE));
    for index in 0..BACKUP_TRIGGER_COUNT {
        paths.push(backup_trigger_path(dir, index));
    }
    paths
}

pub fn backup_trigger_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("review_gate_trigger_{}.json", index))
}

/// Every path a response for `trigger_id` is written to. None is canonical.
pub fn response_paths(dir: &Path, trigger_id: &str) -> [PathBuf; 4] {
    [
        dir.join(format!("review_gate_response_{}.json", trigger_id)),
        dir.join("review_gate_response.json"),
        dir.join(format!("mcp_response_{}.json", trigger_id)),
        dir.join("mcp_response.json"),
    ]
}

pub fn ack_path(dir: &Path, trigger_id: &str) -> PathBuf {
    dir.join(format!("review_gate_ack_{}.json", trigger_id))
}

pub fn speech_trigger_path(dir: &Path, trigger_id: &str) -> PathBuf {
    dir.join(format!("review_gate_speech_trigger_{}.json", trigger_id))
}

pub fn speech_response_path(dir: &Path, trigger_id: &str) -> PathBuf {
    dir.join(format!("review_gate_speech_response_{}.json", trigger_id))
}

pub fn audio_path(dir: &Path, millis: i64) -> PathBuf {
    dir.join(format!("review_gate_audio_{}.wav", millis))
}

pub fn socket_path(dir: &Path) -> PathBuf {
    dir.join(SOCKET_NAME)
}

pub fn status_log_paths(dir: &Path) -> Vec<PathBuf> {
    STATUS_LOG_FILES.iter().map(|name| dir.join(name)).collect()
}
