//! Multipart wire framing and HMAC-SHA256 signing.
//!
//! On the wire a message is a sequence of ZMQ frames:
//!
//! ```text
//! [routing ids…] [<IDS|MSG>] [signature] [header] [parent_header] [metadata] [content] [buffers…]
//! ```
//!
//! The signature is the lowercase hex HMAC-SHA256 of the four JSON frames,
//! keyed by the connection file's `key`. An empty key means the connection
//! is unsigned and the signature frame is empty, per the protocol.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::content::Content;
use crate::header::{parent_header_from_value, Header};
use crate::message::Message;
use crate::{WireError, DELIMITER};

type HmacSha256 = Hmac<Sha256>;

/// Serialize and sign a message into wire frames.
pub fn encode(message: &Message, key: &str) -> Result<Vec<Bytes>, WireError> {
    let header = serde_json::to_vec(&message.header).map_err(WireError::Encode)?;
    let parent_header = match &message.parent_header {
        Some(parent) => serde_json::to_vec(parent).map_err(WireError::Encode)?,
        None => b"{}".to_vec(),
    };
    let metadata = serde_json::to_vec(&message.metadata).map_err(WireError::Encode)?;
    let content =
        serde_json::to_vec(&message.content.to_value()?).map_err(WireError::Encode)?;

    let signature = sign(key, [&header, &parent_header, &metadata, &content])?;

    let mut frames =
        Vec::with_capacity(message.identities.len() + 6 + message.buffers.len());
    frames.extend(message.identities.iter().cloned());
    frames.push(Bytes::from_static(DELIMITER));
    frames.push(Bytes::from(signature));
    frames.push(Bytes::from(header));
    frames.push(Bytes::from(parent_header));
    frames.push(Bytes::from(metadata));
    frames.push(Bytes::from(content));
    frames.extend(message.buffers.iter().cloned());
    Ok(frames)
}

/// Parse and verify wire frames into a message.
///
/// Fails with [`WireError::Decode`] on structural problems and
/// [`WireError::BadSignature`] when HMAC verification fails. Callers drop
/// the message and keep listening in both cases.
pub fn decode(frames: &[Bytes], key: &str) -> Result<Message, WireError> {
    let delimiter_index = frames
        .iter()
        .position(|frame| frame.as_ref() == DELIMITER)
        .ok_or_else(|| WireError::Decode("missing <IDS|MSG> delimiter".to_string()))?;

    let identities = frames[..delimiter_index].to_vec();
    let rest = &frames[delimiter_index + 1..];
    if rest.len() < 5 {
        return Err(WireError::Decode(format!(
            "expected at least 5 frames after delimiter, got {}",
            rest.len()
        )));
    }

    let (signature, header_bytes, parent_bytes, metadata_bytes, content_bytes) =
        (&rest[0], &rest[1], &rest[2], &rest[3], &rest[4]);
    verify(
        key,
        signature,
        [
            header_bytes.as_ref(),
            parent_bytes.as_ref(),
            metadata_bytes.as_ref(),
            content_bytes.as_ref(),
        ],
    )?;

    let header: Header = serde_json::from_slice(header_bytes)
        .map_err(|e| WireError::Decode(format!("bad header: {e}")))?;
    let parent_value: serde_json::Value = serde_json::from_slice(parent_bytes)
        .map_err(|e| WireError::Decode(format!("bad parent_header: {e}")))?;
    let parent_header = parent_header_from_value(parent_value)
        .map_err(|e| WireError::Decode(format!("bad parent_header: {e}")))?;
    let metadata: serde_json::Value = serde_json::from_slice(metadata_bytes)
        .map_err(|e| WireError::Decode(format!("bad metadata: {e}")))?;
    let content_value: serde_json::Value = serde_json::from_slice(content_bytes)
        .map_err(|e| WireError::Decode(format!("bad content: {e}")))?;
    let content = Content::from_type_and_value(&header.msg_type, content_value)?;

    Ok(Message {
        identities,
        header,
        parent_header,
        metadata,
        content,
        buffers: rest[5..].to_vec(),
    })
}

fn sign<'a>(
    key: &str,
    parts: impl IntoIterator<Item = &'a (impl AsRef<[u8]> + 'a)>,
) -> Result<String, WireError> {
    if key.is_empty() {
        return Ok(String::new());
    }
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| WireError::Decode(format!("invalid signing key: {e}")))?;
    for part in parts {
        mac.update(part.as_ref());
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify(key: &str, signature: &[u8], parts: [&[u8]; 4]) -> Result<(), WireError> {
    if key.is_empty() {
        return Ok(());
    }
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| WireError::Decode(format!("invalid signing key: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    let received = hex::decode(signature).map_err(|_| WireError::BadSignature)?;
    mac.verify_slice(&received).map_err(|_| WireError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::*;
    use serde_json::json;

    const KEY: &str = "6f2f4a2a-signing-key";

    fn roundtrip(content: Content) {
        let mut message = Message::new(content, "codec-test-session");
        message.parent_header = Some(Header::new("execute_request", "codec-test-session"));
        let frames = encode(&message, KEY).unwrap();
        let decoded = decode(&frames, KEY).unwrap();
        let reencoded = encode(&decoded, KEY).unwrap();
        assert_eq!(frames, reencoded);
        assert_eq!(decoded.header, message.header);
        assert_eq!(decoded.content, message.content);
        assert_eq!(decoded.parent_header, message.parent_header);
    }

    #[test]
    fn test_roundtrip_execute_reply() {
        roundtrip(Content::ExecuteReply(ExecuteReply {
            status: ReplyStatus::Ok,
            execution_count: Some(3),
        }));
    }

    #[test]
    fn test_roundtrip_complete_reply() {
        roundtrip(Content::CompleteReply(CompleteReply {
            matches: vec!["foo.bar".into(), "foo.baz".into()],
            cursor_start: 0,
            cursor_end: 4,
            metadata: json!({}),
            status: ReplyStatus::Ok,
        }));
    }

    #[test]
    fn test_roundtrip_inspect_reply() {
        roundtrip(Content::InspectReply(InspectReply {
            status: ReplyStatus::Ok,
            found: true,
            data: [("text/plain".to_string(), json!("int docs"))]
                .into_iter()
                .collect(),
            metadata: json!({}),
        }));
    }

    #[test]
    fn test_roundtrip_status() {
        roundtrip(Content::Status(Status {
            execution_state: ExecutionState::Idle,
        }));
    }

    #[test]
    fn test_roundtrip_stream() {
        roundtrip(Content::Stream(StreamOutput {
            name: StreamName::Stdout,
            text: "hello\n".into(),
        }));
    }

    #[test]
    fn test_roundtrip_display_data() {
        roundtrip(Content::DisplayData(DisplayData {
            data: [("image/png".to_string(), json!("aGk="))]
                .into_iter()
                .collect(),
            metadata: json!({}),
        }));
    }

    #[test]
    fn test_roundtrip_execute_result() {
        roundtrip(Content::ExecuteResult(ExecuteResult {
            data: [("text/plain".to_string(), json!("2"))]
                .into_iter()
                .collect(),
            metadata: json!({}),
            execution_count: 1,
        }));
    }

    #[test]
    fn test_roundtrip_error() {
        roundtrip(Content::Error(ErrorOutput {
            ename: "ZeroDivisionError".into(),
            evalue: "division by zero".into(),
            traceback: vec!["Traceback (most recent call last)".into()],
            execution_count: None,
        }));
    }

    #[test]
    fn test_roundtrip_input_request() {
        roundtrip(Content::InputRequest(InputRequest {
            prompt: "password: ".into(),
            password: true,
        }));
    }

    #[test]
    fn test_tampered_frame_fails_verification() {
        let message = Message::new(
            Content::ExecuteRequest(ExecuteRequest::new("1 + 1")),
            "codec-test-session",
        );
        let mut frames = encode(&message, KEY).unwrap();
        // Corrupt the content frame.
        let last = frames.len() - 1;
        frames[last] = Bytes::from_static(b"{\"code\": \"2 + 2\"}");
        assert!(matches!(
            decode(&frames, KEY),
            Err(WireError::BadSignature)
        ));
    }

    #[test]
    fn test_unsigned_connection_skips_verification() {
        let message = Message::new(
            Content::ExecuteRequest(ExecuteRequest::new("1 + 1")),
            "codec-test-session",
        );
        let frames = encode(&message, "").unwrap();
        let decoded = decode(&frames, "").unwrap();
        assert_eq!(decoded.header.msg_type, "execute_request");
    }

    #[test]
    fn test_missing_delimiter_is_decode_error() {
        let frames = vec![Bytes::from_static(b"{}"), Bytes::from_static(b"{}")];
        assert!(matches!(decode(&frames, KEY), Err(WireError::Decode(_))));
    }

    #[test]
    fn test_truncated_message_is_decode_error() {
        let frames = vec![
            Bytes::from_static(DELIMITER),
            Bytes::from_static(b""),
            Bytes::from_static(b"{}"),
        ];
        assert!(matches!(decode(&frames, ""), Err(WireError::Decode(_))));
    }

    #[test]
    fn test_identities_survive_roundtrip() {
        let mut message = Message::new(
            Content::ExecuteRequest(ExecuteRequest::new("x")),
            "codec-test-session",
        );
        message.identities = vec![Bytes::from_static(b"router-id")];
        let frames = encode(&message, KEY).unwrap();
        let decoded = decode(&frames, KEY).unwrap();
        assert_eq!(decoded.identities, message.identities);
    }
}
