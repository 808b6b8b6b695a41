//! mercury-wire - Jupyter wire protocol messages and the multipart codec.
//!
//! This crate owns everything that crosses the socket boundary: the message
//! envelope (header, parent header, metadata, content, buffers), a tagged
//! content enum with one variant per consumed message type, and the
//! `<IDS|MSG>`-delimited multipart framing with HMAC-SHA256 signatures.
//!
//! Content is decoded exactly once, at the transport boundary. Everything
//! above this crate works with typed variants, never raw JSON lookups.

pub mod codec;
pub mod connection_info;
pub mod content;
pub mod header;
pub mod message;

pub use codec::{decode, encode};
pub use connection_info::ConnectionInfo;
pub use content::{
    CompleteReply, CompleteRequest, Content, DisplayData, ErrorOutput, ExecuteInput, ExecuteReply,
    ExecuteRequest, ExecuteResult, ExecutionState, InputReply, InputRequest, InspectReply,
    InspectRequest, MimeBundle, ReplyStatus, ShutdownRequest, Status, StreamName, StreamOutput,
};
pub use header::Header;
pub use message::{Channel, Message};

/// Version of the Jupyter messaging protocol spoken by this crate.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Frame separating ZMQ routing identities from the signed message frames.
pub(crate) const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Errors produced at the wire boundary.
///
/// Decode failures are expected in the face of a misbehaving kernel; the
/// listener that hits one logs it and drops the message, it never tears the
/// channel down.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Outbound message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Inbound frames did not form a valid protocol message.
    #[error("malformed wire message: {0}")]
    Decode(String),

    /// Inbound message failed HMAC verification.
    #[error("message signature verification failed")]
    BadSignature,
}
