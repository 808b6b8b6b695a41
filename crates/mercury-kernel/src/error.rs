//! Error taxonomy for the session layer.
//!
//! Request timeouts are deliberately not represented here: `complete` and
//! `inspect` treat a missed deadline as an empty result and log it at info
//! level, since a slow kernel is an everyday condition, not a failure.

/// Errors surfaced by sessions, transports, and the registry.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connection to the kernel was lost. The session's execution state
    /// is `dead` and `is_alive()` reports false; the error is not retried.
    #[error("connection to the kernel was lost")]
    TransportClosed,

    /// The kernel process or connection could not be established.
    #[error("failed to start kernel: {0}")]
    KernelStart(String),

    /// Operation attempted on a session after `shutdown()`.
    #[error("session has been shut down")]
    Closed,

    /// No session is registered under the given id or binding handle.
    #[error("no session found for {0}")]
    NotFound(String),

    /// A session with this id is already registered.
    #[error("session {0} is already registered")]
    AlreadyRegistered(String),

    /// Outbound message could not be encoded.
    #[error(transparent)]
    Wire(#[from] mercury_wire::WireError),
}
