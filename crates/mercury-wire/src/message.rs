//! The full message envelope and the channel vocabulary.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::Content;
use crate::header::Header;

/// One of the independent logical streams to a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Request/reply traffic (execute, complete, inspect, kernel_info).
    Shell,
    /// Broadcast events (status, stream, display_data, results, errors).
    #[serde(rename = "iopub")]
    IoPub,
    /// Interactive input prompts and their replies.
    Stdin,
    /// Lifecycle requests (interrupt, shutdown).
    Control,
    /// Ping/pong aliveness probe.
    Heartbeat,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Shell => write!(f, "shell"),
            Channel::IoPub => write!(f, "iopub"),
            Channel::Stdin => write!(f, "stdin"),
            Channel::Control => write!(f, "control"),
            Channel::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone)]
pub struct Message {
    /// ZMQ routing identities seen before the delimiter frame.
    pub identities: Vec<Bytes>,
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Value,
    pub content: Content,
    pub buffers: Vec<Bytes>,
}

impl Message {
    /// Build an outbound message with a fresh correlation id and no parent.
    pub fn new(content: Content, session: &str) -> Self {
        let header = Header::new(content.msg_type(), session);
        Self {
            identities: Vec::new(),
            header,
            parent_header: None,
            metadata: Value::Object(Default::default()),
            content,
            buffers: Vec::new(),
        }
    }

    /// Build an outbound message that answers `parent` (e.g. an input_reply
    /// answering an input_request).
    pub fn reply_to(content: Content, session: &str, parent: Header) -> Self {
        let mut message = Self::new(content, session);
        message.parent_header = Some(parent);
        message
    }

    /// Correlation id of the request that caused this message, if any.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_header.as_ref().map(|h| h.msg_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ExecuteRequest;

    #[test]
    fn test_new_message_has_fresh_id_and_matching_type() {
        let msg = Message::new(
            Content::ExecuteRequest(ExecuteRequest::new("1 + 1")),
            "session-a",
        );
        assert_eq!(msg.header.msg_type, "execute_request");
        assert_eq!(msg.header.session, "session-a");
        assert!(msg.parent_header.is_none());
        assert!(!msg.header.msg_id.is_empty());
    }

    #[test]
    fn test_reply_carries_parent_id() {
        let parent = Header::new("input_request", "kernel-session");
        let parent_id = parent.msg_id.clone();
        let msg = Message::reply_to(
            Content::InputReply(crate::content::InputReply {
                value: "42".into(),
            }),
            "session-a",
            parent,
        );
        assert_eq!(msg.parent_id(), Some(parent_id.as_str()));
    }

    #[test]
    fn test_channel_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Channel::IoPub).unwrap(), "\"iopub\"");
    }
}
