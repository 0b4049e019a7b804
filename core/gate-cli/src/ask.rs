//! Agent side of the exchange: post a trigger, wait for the reply.
//!
//! Tries the bridge socket first. If nothing accepts the connection, falls
//! back to the file protocol: primary + backup trigger files, an acknowledgement within
//! [`ACK_TIMEOUT`], then a response file matching the trigger id.

use std::path::Path;
use std::time::Duration;

use review_gate_core::storage::{remove_if_exists, write_json_atomic};
use review_gate_core::{poll_until, CancellationToken};
use review_gate_protocol::{
    files, Attachment, ResponseEvent, ResponseRecord, ToolKind, Trigger, TriggerEnvelope,
};
use serde_json::Value;

pub const ACK_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct AskOptions {
    pub message: String,
    pub tool: String,
    pub title: Option<String>,
    pub context: Option<String>,
    pub trigger_id: Option<String>,
    /// Give up waiting for a response after this long. `None` waits forever.
    pub timeout: Option<Duration>,
    pub ack_timeout: Duration,
    pub use_socket: bool,
}

impl AskOptions {
    fn build_trigger(&self) -> Trigger {
        let trigger_id = self
            .trigger_id
            .clone()
            .unwrap_or_else(|| format!("review_{}", ulid::Ulid::new().to_string().to_lowercase()));
        let mut trigger =
            Trigger::new(trigger_id, ToolKind::from(self.tool.as_str())).with_message(&self.message);
        if let Some(title) = &self.title {
            trigger = trigger.with_title(title);
        }
        if let Some(context) = &self.context {
            trigger = trigger.with_context(context);
        }
        trigger
    }
}

pub fn run(
    exchange_dir: &Path,
    options: &AskOptions,
    token: &CancellationToken,
) -> Result<ResponseRecord, String> {
    let trigger = options.build_trigger();
    trigger.validate().map_err(|e| e.to_string())?;

    #[cfg(unix)]
    if options.use_socket {
        match ask_over_socket(exchange_dir, &trigger, options.timeout) {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(err) => return Err(err),
        }
    }

    ask_over_files(exchange_dir, &trigger, options, token)
}

/// `Ok(None)` when no bridge is listening on the socket. Once the request has
/// been delivered the answer comes from the socket or not at all; the bridge
/// has already claimed the trigger id.
#[cfg(unix)]
fn ask_over_socket(
    exchange_dir: &Path,
    trigger: &Trigger,
    timeout: Option<Duration>,
) -> Result<Option<ResponseRecord>, String> {
    use review_gate_core::GateError;
    use review_gate_protocol::{Method, Request};

    let socket = files::socket_path(exchange_dir);
    if !socket.exists() {
        return Ok(None);
    }

    let params = serde_json::to_value(trigger).map_err(|e| e.to_string())?;
    let request = Request::new(Method::Trigger, Some(trigger.trigger_id.clone()), Some(params));
    let response = match review_gate_core::send_request(&socket, &request, timeout) {
        Ok(response) => response,
        Err(GateError::IpcUnavailable(details)) => {
            tracing::info!(error = %details, "Socket unavailable; using trigger files");
            return Ok(None);
        }
        Err(GateError::IpcTimeout) => return Err("Timed out waiting for a response".to_string()),
        Err(err) => return Err(err.to_string()),
    };

    if !response.ok {
        let error = response
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(format!("Bridge rejected trigger: {}", error));
    }
    let data = response
        .data
        .ok_or_else(|| "Bridge response had no data".to_string())?;
    parse_response(&data, &trigger.trigger_id)
        .map(Some)
        .ok_or_else(|| "Bridge response was not a review response".to_string())
}

fn ask_over_files(
    exchange_dir: &Path,
    trigger: &Trigger,
    options: &AskOptions,
    token: &CancellationToken,
) -> Result<ResponseRecord, String> {
    fs_err::create_dir_all(exchange_dir).map_err(|e| e.to_string())?;
    let trigger_id = trigger.trigger_id.clone();

    // Stale replies from an earlier round would otherwise be picked up.
    cleanup_responses(exchange_dir, &trigger_id);

    for (index, path) in files::trigger_paths(exchange_dir).iter().enumerate() {
        let backup_id = (index > 0).then(|| index as u32 - 1);
        let envelope = TriggerEnvelope::new(trigger.clone(), backup_id);
        if let Err(err) = write_json_atomic(path, &envelope) {
            if index == 0 {
                return Err(format!("Failed to write trigger: {}", err));
            }
            tracing::warn!(path = %path.display(), error = %err, "Failed to write backup trigger");
        }
    }
    tracing::info!(trigger_id = %trigger_id, "Trigger written; waiting for acknowledgement");

    let ack_path = files::ack_path(exchange_dir, &trigger_id);
    let acked = poll_until(token, POLL_INTERVAL, Some(options.ack_timeout), || {
        ack_path.exists().then_some(())
    });
    if acked.is_none() {
        remove_triggers(exchange_dir);
        return Err(if token.is_cancelled() {
            "Cancelled".to_string()
        } else {
            format!(
                "No acknowledgement within {}s; is `review-gate watch` running?",
                options.ack_timeout.as_secs()
            )
        });
    }
    let _ = remove_if_exists(&ack_path);

    let paths = files::response_paths(exchange_dir, &trigger_id);
    let record = poll_until(token, POLL_INTERVAL, options.timeout, || {
        paths.iter().find_map(|path| read_response_file(path, &trigger_id))
    });
    cleanup_responses(exchange_dir, &trigger_id);

    record.ok_or_else(|| {
        if token.is_cancelled() {
            "Cancelled".to_string()
        } else {
            "Timed out waiting for a response".to_string()
        }
    })
}

fn read_response_file(path: &Path, trigger_id: &str) -> Option<ResponseRecord> {
    let bytes = fs_err::read(path).ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    parse_response(&value, trigger_id)
}

/// Accepts any of `user_input` / `response` / `message`. A document naming a
/// different trigger is ignored; one naming none is accepted.
pub fn parse_response(value: &Value, trigger_id: &str) -> Option<ResponseRecord> {
    let object = value.as_object()?;
    if let Some(id) = object.get("trigger_id").and_then(Value::as_str) {
        if id != trigger_id {
            return None;
        }
    }

    let text = ["user_input", "response", "message"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))?;
    let attachments: Vec<Attachment> = object
        .get("attachments")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    let event = object
        .get("event_type")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(ResponseEvent::McpResponse);

    let mut record = ResponseRecord::new(trigger_id, text, attachments, event);
    if let Some(timestamp) = object.get("timestamp").and_then(Value::as_str) {
        record.timestamp = timestamp.to_string();
    }
    Some(record)
}

fn cleanup_responses(exchange_dir: &Path, trigger_id: &str) {
    for path in files::response_paths(exchange_dir, trigger_id) {
        if let Err(err) = remove_if_exists(&path) {
            tracing::debug!(path = %path.display(), error = %err, "Failed to remove response file");
        }
    }
}

fn remove_triggers(exchange_dir: &Path) {
    for path in files::trigger_paths(exchange_dir) {
        let _ = remove_if_exists(&path);
    }
}
