//! Trigger file polling.
//!
//! Each call to [`TriggerWatcher::poll`] checks the primary trigger path and
//! its indexed backups once:
//!
//! ```text
//! missing file          → nothing to do (normal)
//! unparsable JSON       → leave in place, retry next cycle (writer may be mid-write);
//!                         delete after MAX_UNPARSABLE_CYCLES consecutive failures
//! valid JSON, bad shape → log, delete (it will never become valid)
//! new trigger_id        → mark processed, emit, delete
//! seen trigger_id       → delete without emitting
//! ```

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use review_gate_protocol::{files, parse_trigger, Trigger};

use crate::dedup::ProcessedTriggers;
use crate::storage::remove_if_exists;

/// Consecutive unparsable reads after which a trigger file is garbage rather
/// than an unfinished write.
pub const MAX_UNPARSABLE_CYCLES: u32 = 20;

#[derive(Debug, Clone)]
pub struct TriggerWatcher {
    paths: Vec<PathBuf>,
    unparsable: HashMap<PathBuf, u32>,
}

impl TriggerWatcher {
    pub fn new(exchange_dir: &Path) -> Self {
        Self {
            paths: files::trigger_paths(exchange_dir),
            unparsable: HashMap::new(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// One polling cycle. Returns newly seen triggers in path order.
    pub fn poll(&mut self, processed: &mut ProcessedTriggers) -> Vec<Trigger> {
        let mut fresh = Vec::new();
        for path in &self.paths {
            if let Some(trigger) = check_path(path, &mut self.unparsable, processed) {
                fresh.push(trigger);
            }
        }
        fresh
    }
}

fn check_path(
    path: &Path,
    unparsable: &mut HashMap<PathBuf, u32>,
    processed: &mut ProcessedTriggers,
) -> Option<Trigger> {
    let bytes = match fs_err::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            unparsable.remove(path);
            return None;
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read trigger file");
            return None;
        }
    };

    let trigger = match parse_trigger(&bytes) {
        Ok(trigger) => {
            unparsable.remove(path);
            trigger
        }
        Err(err) if err.code == "invalid_json" => {
            let failures = unparsable.entry(path.to_path_buf()).or_insert(0);
            *failures += 1;
            if *failures >= MAX_UNPARSABLE_CYCLES {
                tracing::warn!(
                    path = %path.display(),
                    cycles = *failures,
                    error = %err,
                    "Discarding unparsable trigger file"
                );
                unparsable.remove(path);
                discard(path);
            } else {
                tracing::debug!(
                    path = %path.display(),
                    error = %err,
                    "Trigger file not parseable yet; retrying next cycle"
                );
            }
            return None;
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Discarding malformed trigger");
            discard(path);
            return None;
        }
    };

    if !processed.mark(&trigger.trigger_id) {
        tracing::debug!(
            trigger_id = %trigger.trigger_id,
            path = %path.display(),
            "Removing duplicate trigger file"
        );
        discard(path);
        return None;
    }

    tracing::info!(
        trigger_id = %trigger.trigger_id,
        tool = %trigger.tool,
        path = %path.display(),
        "Trigger received"
    );
    discard(path);
    Some(trigger)
}

fn discard(path: &Path) {
    if let Err(err) = remove_if_exists(path) {
        tracing::warn!(error = %err, "Failed to delete trigger file");
    }
}
