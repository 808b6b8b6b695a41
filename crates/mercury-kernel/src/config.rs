//! Session configuration.

use std::time::Duration;

use serde::Deserialize;

/// Policy for completion requests issued while the kernel is busy.
///
/// Some kernels cannot answer `complete_request` mid-execution and the
/// request would just sit on the shell channel until the run finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompleteWhileBusy {
    /// Skip the request and return no candidates immediately.
    #[default]
    Skip,
    /// Send the request anyway and let the caller's timeout decide.
    Send,
}

/// Tunables for a kernel session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Username placed in outbound message headers.
    pub username: String,
    /// How long to wait for the kernel_info handshake when attaching.
    pub startup_timeout_secs: u64,
    /// Bounded receive timeout of the listener loops; also the latency of
    /// noticing a shutdown request, and the worst-case wait a send can
    /// spend behind a listener holding the channel socket.
    pub recv_poll_ms: u64,
    /// What to do with completion requests while the kernel is busy.
    pub complete_while_busy: CompleteWhileBusy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: "mercury".to_string(),
            startup_timeout_secs: 30,
            recv_poll_ms: 200,
            complete_while_busy: CompleteWhileBusy::Skip,
        }
    }
}

impl SessionConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn recv_poll(&self) -> Duration {
        Duration::from_millis(self.recv_poll_ms)
    }
}
