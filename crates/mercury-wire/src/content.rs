//! Typed message content, one variant per consumed msg_type.
//!
//! The kernel protocol carries the message type in the header and the
//! content as a bare JSON object, so `Content` is not self-describing on the
//! wire: `Content::from_type_and_value` pairs the two at decode time, and
//! `Content::msg_type` / `Content::to_value` reverse it at encode time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::WireError;

/// Mime-type keyed payload of a display/result message.
pub type MimeBundle = BTreeMap<String, Value>;

/// Kernel execution state carried by `status` broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Starting,
    Idle,
    Busy,
    Dead,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Starting => write!(f, "starting"),
            ExecutionState::Idle => write!(f, "idle"),
            ExecutionState::Busy => write!(f, "busy"),
            ExecutionState::Dead => write!(f, "dead"),
            ExecutionState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Status field of reply messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    #[default]
    Ok,
    Error,
    #[serde(alias = "abort")]
    Aborted,
}

/// Which output stream a `stream` message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamName::Stdout => write!(f, "stdout"),
            StreamName::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_true")]
    pub store_history: bool,
    #[serde(default)]
    pub user_expressions: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub allow_stdin: bool,
    #[serde(default)]
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: BTreeMap::new(),
            allow_stdin: true,
            stop_on_error: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteReply {
    pub status: ReplyStatus,
    #[serde(default)]
    pub execution_count: Option<i64>,
}

/// Input echo broadcast on iopub when the kernel begins running code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteInput {
    pub code: String,
    pub execution_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub data: MimeBundle,
    #[serde(default)]
    pub metadata: Value,
    pub execution_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayData {
    pub data: MimeBundle,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOutput {
    pub name: StreamName,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOutput {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
    /// Present when the error came back inside an execute_reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub execution_state: ExecutionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub code: String,
    pub cursor_pos: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteReply {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
    #[serde(default)]
    pub metadata: Value,
    pub status: ReplyStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectRequest {
    pub code: String,
    pub cursor_pos: usize,
    #[serde(default)]
    pub detail_level: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectReply {
    pub status: ReplyStatus,
    pub found: bool,
    #[serde(default)]
    pub data: MimeBundle,
    #[serde(default)]
    pub metadata: Value,
}

/// Interactive input prompt from the kernel on the stdin channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
    pub prompt: String,
    #[serde(default)]
    pub password: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputReply {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

/// Message content, tagged by the header's msg_type.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    ExecuteRequest(ExecuteRequest),
    ExecuteReply(ExecuteReply),
    ExecuteInput(ExecuteInput),
    ExecuteResult(ExecuteResult),
    DisplayData(DisplayData),
    Stream(StreamOutput),
    Error(ErrorOutput),
    Status(Status),
    CompleteRequest(CompleteRequest),
    CompleteReply(CompleteReply),
    InspectRequest(InspectRequest),
    InspectReply(InspectReply),
    InputRequest(InputRequest),
    InputReply(InputReply),
    KernelInfoRequest,
    /// Kernel info replies vary wildly between kernels; kept opaque.
    KernelInfoReply(Value),
    ShutdownRequest(ShutdownRequest),
    ShutdownReply(ShutdownRequest),
    InterruptRequest,
    InterruptReply,
    /// Message types outside the consumed vocabulary, passed through intact.
    Unknown { msg_type: String, content: Value },
}

impl Content {
    /// Decode content once, at the transport boundary, based on the header's
    /// msg_type. Unrecognized types are preserved as `Unknown`.
    pub fn from_type_and_value(msg_type: &str, value: Value) -> Result<Self, WireError> {
        let decoded = match msg_type {
            "execute_request" => Content::ExecuteRequest(from_value(value)?),
            "execute_reply" => Content::ExecuteReply(from_value(value)?),
            "execute_input" => Content::ExecuteInput(from_value(value)?),
            "execute_result" => Content::ExecuteResult(from_value(value)?),
            "display_data" => Content::DisplayData(from_value(value)?),
            "stream" => Content::Stream(from_value(value)?),
            "error" => Content::Error(from_value(value)?),
            "status" => Content::Status(from_value(value)?),
            "complete_request" => Content::CompleteRequest(from_value(value)?),
            "complete_reply" => Content::CompleteReply(from_value(value)?),
            "inspect_request" => Content::InspectRequest(from_value(value)?),
            "inspect_reply" => Content::InspectReply(from_value(value)?),
            "input_request" => Content::InputRequest(from_value(value)?),
            "input_reply" => Content::InputReply(from_value(value)?),
            "kernel_info_request" => Content::KernelInfoRequest,
            "kernel_info_reply" => Content::KernelInfoReply(value),
            "shutdown_request" => Content::ShutdownRequest(from_value(value)?),
            "shutdown_reply" => Content::ShutdownReply(from_value(value)?),
            "interrupt_request" => Content::InterruptRequest,
            "interrupt_reply" => Content::InterruptReply,
            other => Content::Unknown {
                msg_type: other.to_string(),
                content: value,
            },
        };
        Ok(decoded)
    }

    /// The msg_type this content travels under.
    pub fn msg_type(&self) -> &str {
        match self {
            Content::ExecuteRequest(_) => "execute_request",
            Content::ExecuteReply(_) => "execute_reply",
            Content::ExecuteInput(_) => "execute_input",
            Content::ExecuteResult(_) => "execute_result",
            Content::DisplayData(_) => "display_data",
            Content::Stream(_) => "stream",
            Content::Error(_) => "error",
            Content::Status(_) => "status",
            Content::CompleteRequest(_) => "complete_request",
            Content::CompleteReply(_) => "complete_reply",
            Content::InspectRequest(_) => "inspect_request",
            Content::InspectReply(_) => "inspect_reply",
            Content::InputRequest(_) => "input_request",
            Content::InputReply(_) => "input_reply",
            Content::KernelInfoRequest => "kernel_info_request",
            Content::KernelInfoReply(_) => "kernel_info_reply",
            Content::ShutdownRequest(_) => "shutdown_request",
            Content::ShutdownReply(_) => "shutdown_reply",
            Content::InterruptRequest => "interrupt_request",
            Content::InterruptReply => "interrupt_reply",
            Content::Unknown { msg_type, .. } => msg_type,
        }
    }

    /// Serialize the content back to the bare JSON object the wire expects.
    pub fn to_value(&self) -> Result<Value, WireError> {
        let value = match self {
            Content::ExecuteRequest(c) => to_value(c)?,
            Content::ExecuteReply(c) => to_value(c)?,
            Content::ExecuteInput(c) => to_value(c)?,
            Content::ExecuteResult(c) => to_value(c)?,
            Content::DisplayData(c) => to_value(c)?,
            Content::Stream(c) => to_value(c)?,
            Content::Error(c) => to_value(c)?,
            Content::Status(c) => to_value(c)?,
            Content::CompleteRequest(c) => to_value(c)?,
            Content::CompleteReply(c) => to_value(c)?,
            Content::InspectRequest(c) => to_value(c)?,
            Content::InspectReply(c) => to_value(c)?,
            Content::InputRequest(c) => to_value(c)?,
            Content::InputReply(c) => to_value(c)?,
            Content::KernelInfoRequest => Value::Object(Default::default()),
            Content::KernelInfoReply(v) => v.clone(),
            Content::ShutdownRequest(c) => to_value(c)?,
            Content::ShutdownReply(c) => to_value(c)?,
            Content::InterruptRequest => Value::Object(Default::default()),
            Content::InterruptReply => Value::Object(Default::default()),
            Content::Unknown { content, .. } => content.clone(),
        };
        Ok(value)
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, WireError> {
    serde_json::from_value(value).map_err(|e| WireError::Decode(e.to_string()))
}

fn to_value<T: Serialize>(content: &T) -> Result<Value, WireError> {
    serde_json::to_value(content).map_err(WireError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_decodes_execution_state() {
        let content =
            Content::from_type_and_value("status", json!({"execution_state": "busy"})).unwrap();
        match content {
            Content::Status(s) => assert_eq!(s.execution_state, ExecutionState::Busy),
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_execution_state_maps_to_unknown() {
        let content =
            Content::from_type_and_value("status", json!({"execution_state": "restarting"}))
                .unwrap();
        match content {
            Content::Status(s) => assert_eq!(s.execution_state, ExecutionState::Unknown),
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_complete_reply_keeps_match_order() {
        let content = Content::from_type_and_value(
            "complete_reply",
            json!({
                "matches": ["foo.bar", "foo.baz"],
                "cursor_start": 0,
                "cursor_end": 4,
                "status": "ok"
            }),
        )
        .unwrap();
        match content {
            Content::CompleteReply(r) => assert_eq!(r.matches, vec!["foo.bar", "foo.baz"]),
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_content_is_a_decode_error() {
        let result = Content::from_type_and_value("stream", json!({"name": 42}));
        assert!(matches!(result, Err(WireError::Decode(_))));
    }

    #[test]
    fn test_unknown_msg_type_passes_through() {
        let value = json!({"comm_id": "x", "data": {}});
        let content = Content::from_type_and_value("comm_msg", value.clone()).unwrap();
        assert_eq!(content.msg_type(), "comm_msg");
        assert_eq!(content.to_value().unwrap(), value);
    }

    #[test]
    fn test_reply_status_accepts_legacy_abort() {
        let status: ReplyStatus = serde_json::from_str("\"abort\"").unwrap();
        assert_eq!(status, ReplyStatus::Aborted);
    }
}
