//! Writes responses and acknowledgements to the exchange directory.
//!
//! A response goes to every path in [`files::response_paths`]. Each write is
//! independent and atomic (temp file + rename); one failing path does not stop
//! the others. There is no transaction across paths, so a consumer may see one
//! copy before the rest exist.

use std::path::{Path, PathBuf};

use review_gate_protocol::{files, Acknowledgement, ResponseRecord, Trigger};

use crate::error::{GateError, Result};
use crate::storage::write_json_atomic;

/// Outcome of writing one response to all of its paths.
#[derive(Debug, Default)]
pub struct WriteReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl WriteReport {
    pub fn any_written(&self) -> bool {
        !self.written.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.written.len() + self.failed.len()
    }
}

#[derive(Debug, Clone)]
pub struct ResponseWriter {
    exchange_dir: PathBuf,
}

impl ResponseWriter {
    pub fn new(exchange_dir: &Path) -> Self {
        Self {
            exchange_dir: exchange_dir.to_path_buf(),
        }
    }

    /// Writes `record` to every response path.
    pub fn write(&self, record: &ResponseRecord) -> WriteReport {
        let paths = files::response_paths(&self.exchange_dir, &record.trigger_id);
        self.write_to(&paths, record)
    }

    /// Writes `record` to `paths`, attempting all of them.
    pub fn write_to(&self, paths: &[PathBuf], record: &ResponseRecord) -> WriteReport {
        let mut report = WriteReport::default();
        for path in paths {
            match write_json_atomic(path, record) {
                Ok(()) => report.written.push(path.clone()),
                Err(err) => {
                    tracing::warn!(
                        trigger_id = %record.trigger_id,
                        path = %path.display(),
                        error = %err,
                        "Failed to write response file"
                    );
                    report.failed.push((path.clone(), err.to_string()));
                }
            }
        }

        tracing::info!(
            trigger_id = %record.trigger_id,
            event_type = ?record.event_type,
            written = report.written.len(),
            failed = report.failed.len(),
            attachments = record.attachments.len(),
            "Response written"
        );
        report
    }

    /// Like [`ResponseWriter::write`], but an error when no path was written.
    pub fn write_required(&self, record: &ResponseRecord) -> Result<WriteReport> {
        let report = self.write(record);
        if report.any_written() {
            Ok(report)
        } else {
            Err(GateError::ResponseNotWritten {
                trigger_id: record.trigger_id.clone(),
            })
        }
    }

    /// Signals that the popup for `trigger` is visible.
    pub fn acknowledge(&self, trigger: &Trigger) -> Result<PathBuf> {
        let path = files::ack_path(&self.exchange_dir, &trigger.trigger_id);
        let ack = Acknowledgement::new(&trigger.trigger_id, &trigger.tool);
        write_json_atomic(&path, &ack)?;
        tracing::debug!(trigger_id = %trigger.trigger_id, "Acknowledgement written");
        Ok(path)
    }
}
