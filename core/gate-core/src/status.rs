//! MCP server liveness, inferred from its log file's modification time.
//!
//! The server appends a heartbeat line every few seconds, so a log touched
//! within the freshness window means "active". This is a heuristic: a crashed
//! server looks active until the window passes.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use review_gate_protocol::files;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub active: bool,
    /// Most recently modified log, if any exists.
    pub log_path: Option<PathBuf>,
    pub last_modified: Option<SystemTime>,
}

impl ServerStatus {
    pub fn age(&self, now: SystemTime) -> Option<Duration> {
        self.last_modified
            .and_then(|modified| now.duration_since(modified).ok())
    }
}

/// Checks the known status logs in `exchange_dir`.
pub fn check_server_status(exchange_dir: &Path, freshness: Duration, now: SystemTime) -> ServerStatus {
    let newest = files::status_log_paths(exchange_dir)
        .into_iter()
        .filter_map(|path| {
            let modified = fs_err::metadata(&path).ok()?.modified().ok()?;
            Some((path, modified))
        })
        .max_by_key(|(_, modified)| *modified);

    match newest {
        Some((path, modified)) => {
            // A timestamp slightly in the future (clock skew) counts as fresh.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            ServerStatus {
                active: age <= freshness,
                log_path: Some(path),
                last_modified: Some(modified),
            }
        }
        None => ServerStatus {
            active: false,
            log_path: None,
            last_modified: None,
        },
    }
}

/// Reports transitions only, so the caller can log changes instead of every probe.
#[derive(Debug, Default)]
pub struct StatusMonitor {
    last_active: Option<bool>,
}

impl StatusMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(active)` when the status differs from the previous call.
    pub fn observe(&mut self, status: &ServerStatus) -> Option<bool> {
        if self.last_active == Some(status.active) {
            return None;
        }
        self.last_active = Some(status.active);
        Some(status.active)
    }
}
