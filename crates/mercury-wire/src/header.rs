//! Message headers and correlation ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::PROTOCOL_VERSION;

/// The header carried by every protocol message.
///
/// `msg_id` is the correlation id: replies and side-effect broadcasts caused
/// by a request echo the request's header in their `parent_header` field.
/// Field names and structure are wire-compatible with the Jupyter messaging
/// spec and must not be renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub msg_type: String,
    pub session: String,
    #[serde(default)]
    pub username: String,
    pub date: DateTime<Utc>,
    pub version: String,
}

impl Header {
    /// Build a header for a fresh outbound message with a new correlation id.
    pub fn new(msg_type: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            msg_type: msg_type.into(),
            session: session.into(),
            username: String::from("mercury"),
            date: Utc::now(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Convert a parent header value that may be a full header, `null`, or the
/// empty object `{}` that kernels send when a message has no parent.
pub(crate) fn parent_header_from_value(
    value: serde_json::Value,
) -> Result<Option<Header>, serde_json::Error> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(ref map) if map.is_empty() => Ok(None),
        other => serde_json::from_value(other).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = Header::new("execute_request", "test-session");
        let json = serde_json::to_string(&header).unwrap();
        let back: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(header, back);
    }

    #[test]
    fn test_fresh_headers_get_unique_ids() {
        let a = Header::new("execute_request", "s");
        let b = Header::new("execute_request", "s");
        assert_ne!(a.msg_id, b.msg_id);
    }

    #[test]
    fn test_parent_header_empty_object_is_none() {
        let parsed = parent_header_from_value(serde_json::json!({})).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_parent_header_null_is_none() {
        let parsed = parent_header_from_value(serde_json::Value::Null).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_parent_header_full_object() {
        let value = serde_json::json!({
            "msg_id": "abc",
            "msg_type": "execute_reply",
            "session": "s",
            "username": "kernel",
            "date": "2025-05-14T14:32:23.490Z",
            "version": "5.3"
        });
        let parsed = parent_header_from_value(value).unwrap().unwrap();
        assert_eq!(parsed.msg_id, "abc");
        assert_eq!(parsed.msg_type, "execute_reply");
    }
}
