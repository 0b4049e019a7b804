//! Exchange types for the review gate bridge.
//!
//! This crate is shared by the bridge and the agent side (MCP server, the
//! `review-gate ask` client) so both agree on the JSON written to the exchange
//! directory and on the socket framing. The bridge remains the authority on
//! validation.
//!
//! Two transports carry the same records:
//!
//! - **Files**: trigger, acknowledgement, response and speech documents in the
//!   exchange directory (see [`files`]).
//! - **Socket**: one newline-terminated [`Request`] per connection, answered
//!   by one newline-terminated [`Response`].

pub mod files;
mod records;

pub use records::{
    parse_trigger, Acknowledgement, Attachment, ResponseEvent, ResponseRecord, SpeechRequest,
    SpeechResult, ToolKind, Trigger, TriggerEnvelope, RESPONSE_SOURCE, TRIGGER_SYSTEM,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TRIGGER_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Trigger,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, id: Option<String>, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Parses the `params` of a [`Method::Trigger`] request.
///
/// Accepts the same shapes as trigger files (flat or wrapped in `data`).
pub fn parse_trigger_params(params: Value) -> Result<Trigger, ErrorInfo> {
    let bytes = serde_json::to_vec(&params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("trigger params could not be encoded: {}", err),
        )
    })?;
    parse_trigger(&bytes)
}
