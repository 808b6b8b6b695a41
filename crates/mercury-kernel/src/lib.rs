//! mercury-kernel - live connections to Jupyter kernels.
//!
//! This crate is the connection core: it opens the three message channels to
//! a kernel (shell, iopub, stdin), runs one background listener task per
//! channel, correlates replies to outstanding requests by message id, and
//! exposes a small request API (`execute`, `complete`, `inspect`) plus
//! lifecycle operations on a [`session::KernelSession`].
//!
//! Unsolicited kernel events (status changes, stream output, display data,
//! input prompts) are forwarded to an [`events::EventSink`] implemented by
//! the embedding application. Kernel process/connection lifecycle is
//! delegated to a [`launcher::KernelLauncher`] collaborator; a ZeroMQ-backed
//! implementation is provided.
//!
//! Nothing here is a process-wide singleton: sessions live in an explicitly
//! constructed [`registry::SessionRegistry`], normally owned by a
//! [`client::KernelClient`] created at application startup and torn down at
//! shutdown.

pub mod client;
pub mod config;
pub mod demux;
pub mod error;
pub mod events;
pub(crate) mod heartbeat;
pub mod launcher;
pub mod registry;
pub mod session;
pub mod transport;

pub use client::{KernelClient, Prompter, SessionDescriptor};
pub use config::{CompleteWhileBusy, SessionConfig};
pub use error::SessionError;
pub use events::{EventSink, InputResponder};
pub use launcher::{KernelHandle, KernelLauncher, KernelSpec, ZmqLauncher};
pub use registry::{BindingHandle, SessionRegistry};
pub use session::{CompletionCandidate, KernelIdentity, KernelSession};
pub use transport::{KernelTransport, ZmqTransport};
