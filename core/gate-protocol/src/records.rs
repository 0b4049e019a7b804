//! JSON records exchanged through the exchange directory and the socket.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ErrorInfo, MAX_TRIGGER_ID_LEN};

/// Value of the `system` field in trigger envelopes.
pub const TRIGGER_SYSTEM: &str = "review-gate-v2";
/// Value of the `source` field in response records.
pub const RESPONSE_SOURCE: &str = "review_gate_bridge";

/// The tool an agent invoked. Selects the popup template.
///
/// Unknown tool names are kept verbatim in [`ToolKind::Other`] and get the
/// default template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolKind {
    #[default]
    ReviewGateChat,
    QuickReview,
    FileReview,
    IngestText,
    ShutdownMcp,
    Other(String),
}

impl ToolKind {
    pub fn as_str(&self) -> &str {
        match self {
            ToolKind::ReviewGateChat => "review_gate_chat",
            ToolKind::QuickReview => "quick_review",
            ToolKind::FileReview => "file_review",
            ToolKind::IngestText => "ingest_text",
            ToolKind::ShutdownMcp => "shutdown_mcp",
            ToolKind::Other(name) => name,
        }
    }
}

impl From<String> for ToolKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "review_gate_chat" | "review_gate" => ToolKind::ReviewGateChat,
            "quick_review" => ToolKind::QuickReview,
            "file_review" => ToolKind::FileReview,
            "ingest_text" => ToolKind::IngestText,
            "shutdown_mcp" => ToolKind::ShutdownMcp,
            _ => ToolKind::Other(value),
        }
    }
}

impl From<&str> for ToolKind {
    fn from(value: &str) -> Self {
        ToolKind::from(value.to_string())
    }
}

impl From<ToolKind> for String {
    fn from(value: ToolKind) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request from the agent asking the user for input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub trigger_id: String,
    #[serde(default)]
    pub tool: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Tool-specific fields (`file_path`, `immediate_activation`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Trigger {
    pub fn new(trigger_id: impl Into<String>, tool: ToolKind) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            tool,
            message: None,
            title: None,
            context: None,
            urgent: false,
            timestamp: Some(Utc::now().to_rfc3339()),
            extra: Map::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.trigger_id.trim().is_empty() {
            return Err(ErrorInfo::new("missing_field", "trigger_id is required"));
        }
        if self.trigger_id.len() > MAX_TRIGGER_ID_LEN {
            return Err(ErrorInfo::new(
                "invalid_trigger_id",
                format!(
                    "trigger_id must be {} characters or fewer",
                    MAX_TRIGGER_ID_LEN
                ),
            ));
        }
        if self
            .trigger_id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(ErrorInfo::new(
                "invalid_trigger_id",
                "trigger_id must not contain path separators",
            ));
        }
        Ok(())
    }
}

/// On-disk wrapper written by the MCP server around a [`Trigger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEnvelope {
    pub timestamp: String,
    pub system: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    pub data: Trigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<u32>,
    #[serde(default)]
    pub mcp_integration: bool,
    #[serde(default)]
    pub immediate_activation: bool,
}

impl TriggerEnvelope {
    pub fn new(data: Trigger, backup_id: Option<u32>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            system: TRIGGER_SYSTEM.to_string(),
            editor: backup_id.is_none().then(|| "cursor".to_string()),
            data,
            pid: backup_id.is_none().then(std::process::id),
            backup_id,
            mcp_integration: true,
            immediate_activation: true,
        }
    }
}

/// Parses a trigger document, flat or wrapped in an envelope's `data` field.
pub fn parse_trigger(bytes: &[u8]) -> Result<Trigger, ErrorInfo> {
    let value: Value = serde_json::from_slice(bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("trigger was not valid JSON: {}", err),
        )
    })?;

    let body = match value {
        Value::Object(mut root) => match root.remove("data") {
            Some(Value::Object(data)) => Value::Object(data),
            Some(other) => {
                root.insert("data".to_string(), other);
                Value::Object(root)
            }
            None => Value::Object(root),
        },
        _ => {
            return Err(ErrorInfo::new(
                "invalid_json",
                "trigger must be a JSON object",
            ))
        }
    };

    let has_id = body
        .get("trigger_id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    if !has_id {
        return Err(ErrorInfo::new("missing_field", "trigger_id is required"));
    }

    let trigger: Trigger = serde_json::from_value(body).map_err(|err| {
        ErrorInfo::new(
            "invalid_trigger",
            format!("trigger fields are invalid: {}", err),
        )
    })?;
    trigger.validate()?;
    Ok(trigger)
}

/// A file attached to a response. Field names follow the consumer's camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub base64_data: String,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseEvent {
    /// The user submitted input for the active trigger.
    McpResponse,
    /// The idle timer fired and the canned message was submitted.
    IdleTimeout,
}

/// The user's reply to a trigger.
///
/// `response` and `message` mirror `user_input`; consumers look up any of the
/// three keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub trigger_id: String,
    pub user_input: String,
    pub response: String,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub event_type: ResponseEvent,
    pub timestamp: String,
    pub source: String,
}

impl ResponseRecord {
    pub fn new(
        trigger_id: &str,
        user_input: &str,
        attachments: Vec<Attachment>,
        event_type: ResponseEvent,
    ) -> Self {
        Self {
            trigger_id: trigger_id.to_string(),
            user_input: user_input.to_string(),
            response: user_input.to_string(),
            message: user_input.to_string(),
            attachments,
            event_type,
            timestamp: Utc::now().to_rfc3339(),
            source: RESPONSE_SOURCE.to_string(),
        }
    }
}

/// Written once per activated trigger to tell the agent the popup is visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub acknowledged: bool,
    pub trigger_id: String,
    pub tool_type: String,
    pub timestamp: String,
}

impl Acknowledgement {
    pub fn new(trigger_id: &str, tool: &ToolKind) -> Self {
        Self {
            acknowledged: true,
            trigger_id: trigger_id.to_string(),
            tool_type: tool.as_str().to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Asks the external transcriber to process a recorded audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub trigger_id: String,
    pub audio_file: String,
    pub format: String,
    pub timestamp: String,
}

impl SpeechRequest {
    pub fn new(trigger_id: &str, audio_file: &str) -> Self {
        Self {
            trigger_id: trigger_id.to_string(),
            audio_file: audio_file.to_string(),
            format: "wav".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechResult {
    #[serde(default)]
    pub transcription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
