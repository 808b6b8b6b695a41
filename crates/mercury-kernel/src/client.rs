//! Kernel client: the application-facing facade over launcher, registry and
//! sessions.
//!
//! The client owns the registry and the launcher; the embedding application
//! owns the client. Operation methods take a [`BindingHandle`] so callers
//! (views, buffers) never hold sessions directly.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use mercury_wire::ConnectionInfo;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::EventSink;
use crate::launcher::{KernelLauncher, KernelSpec};
use crate::registry::{BindingHandle, SessionRegistry};
use crate::session::{CompletionCandidate, KernelSession};

/// Snapshot of one registered session, for listing UIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub session_id: String,
    pub kernel_name: String,
    pub display_name: Option<String>,
    pub alive: bool,
}

/// Interactive prompt source for the multi-step remote-attach flow.
///
/// Each method returns `None` when the user cancels, which aborts the whole
/// flow without side effects.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Ask for a free-form value.
    async fn prompt(&self, message: &str, default: &str) -> Option<String>;

    /// Ask for a value that must not be echoed (keys, tokens).
    async fn prompt_secret(&self, message: &str) -> Option<String>;
}

/// Facade owning the session registry and the kernel launcher.
pub struct KernelClient {
    registry: Arc<SessionRegistry>,
    launcher: Arc<dyn KernelLauncher>,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
}

impl KernelClient {
    pub fn new(
        launcher: Arc<dyn KernelLauncher>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            launcher,
            sink,
            config,
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Launch a new kernel process and register a session connected to it.
    pub async fn start_session(
        &self,
        spec: &KernelSpec,
        cwd: Option<&Path>,
    ) -> Result<Arc<KernelSession>, SessionError> {
        let handle = self.launcher.spawn(spec, cwd).await?;
        let session =
            KernelSession::connect(handle, self.sink.clone(), self.config.clone()).await?;
        self.adopt(session).await
    }

    /// Attach to an already-running kernel described by `info` and register
    /// a session for it. The kernel outlives the session.
    pub async fn attach_session(
        &self,
        info: ConnectionInfo,
    ) -> Result<Arc<KernelSession>, SessionError> {
        let handle = self.launcher.attach(info).await?;
        let session =
            KernelSession::connect(handle, self.sink.clone(), self.config.clone()).await?;
        self.adopt(session).await
    }

    /// Register a freshly connected session. A session that cannot be
    /// registered has no owner, so it is shut down before the error
    /// propagates.
    async fn adopt(
        &self,
        session: Arc<KernelSession>,
    ) -> Result<Arc<KernelSession>, SessionError> {
        if let Err(e) = self.registry.register(session.clone()) {
            let _ = session.shutdown().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Attach to a remote kernel interactively: connection info, then the
    /// signing key if the info omits one, then an optional display name.
    /// Returns `Ok(None)` when the user cancels at any step.
    pub async fn attach_remote(
        &self,
        prompter: &dyn Prompter,
    ) -> Result<Option<Arc<KernelSession>>, SessionError> {
        let Some(raw) = prompter
            .prompt("Connection file path or JSON", "")
            .await
        else {
            return Ok(None);
        };
        let mut info = parse_connection_info(&raw).await?;

        if info.key.is_empty() {
            let Some(key) = prompter.prompt_secret("Kernel signing key").await else {
                return Ok(None);
            };
            info.key = key;
        }

        let Some(name) = prompter.prompt("Session name (optional)", "").await else {
            return Ok(None);
        };

        let session = self.attach_session(info).await?;
        if !name.trim().is_empty() {
            session.set_display_name(Some(name.trim().to_string()));
        }
        info!("[client] attached remote session {}", session.repr());
        Ok(Some(session))
    }

    /// Snapshot every registered session.
    pub fn list_sessions(&self) -> Vec<SessionDescriptor> {
        self.registry
            .sessions()
            .into_iter()
            .map(|session| SessionDescriptor {
                session_id: session.session_id().to_string(),
                kernel_name: session.kernel_name().to_string(),
                display_name: session.display_name(),
                alive: session.is_alive(),
            })
            .collect()
    }

    pub fn bind(&self, handle: BindingHandle, session_id: &str) -> Result<(), SessionError> {
        self.registry.bind(handle, session_id)
    }

    pub fn unbind(&self, handle: &BindingHandle) -> bool {
        self.registry.unbind(handle)
    }

    pub fn session_for(&self, handle: &BindingHandle) -> Result<Arc<KernelSession>, SessionError> {
        self.registry.session_for(handle)
    }

    /// Execute code on the session bound to `handle`. Returns the
    /// correlation id of the request.
    pub async fn execute(
        &self,
        handle: &BindingHandle,
        code: &str,
    ) -> Result<String, SessionError> {
        self.registry.session_for(handle)?.execute(code).await
    }

    pub async fn complete(
        &self,
        handle: &BindingHandle,
        code: &str,
        cursor_pos: usize,
        timeout: std::time::Duration,
    ) -> Result<Vec<CompletionCandidate>, SessionError> {
        self.registry
            .session_for(handle)?
            .complete(code, cursor_pos, timeout)
            .await
    }

    pub async fn inspect(
        &self,
        handle: &BindingHandle,
        code: &str,
        cursor_pos: usize,
        detail_level: u8,
        timeout: std::time::Duration,
    ) -> Result<bool, SessionError> {
        self.registry
            .session_for(handle)?
            .inspect(code, cursor_pos, detail_level, timeout)
            .await
    }

    pub async fn interrupt(&self, handle: &BindingHandle) -> Result<(), SessionError> {
        self.registry.session_for(handle)?.interrupt().await
    }

    pub async fn restart(&self, handle: &BindingHandle) -> Result<(), SessionError> {
        self.registry.session_for(handle)?.restart().await
    }

    /// Shut down the session bound to `handle` and unregister it, dropping
    /// every binding that pointed at it.
    pub async fn shutdown(&self, handle: &BindingHandle) -> Result<(), SessionError> {
        let session = self.registry.session_for(handle)?;
        let session_id = session.session_id().to_string();
        self.shutdown_session(&session_id).await
    }

    /// Shut down a session by id and unregister it.
    pub async fn shutdown_session(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.registry.get(session_id)?;
        session.shutdown().await?;
        self.registry.unregister(session_id);
        info!("[client] shut down session {session_id}");
        Ok(())
    }

    /// Shut down everything, e.g. on application exit. Errors from
    /// individual sessions are not fatal to the sweep.
    pub async fn shutdown_all(&self) {
        for session in self.registry.sessions() {
            let session_id = session.session_id().to_string();
            let _ = session.shutdown().await;
            self.registry.unregister(&session_id);
        }
    }
}

/// Accept either inline JSON or a path to a connection file.
async fn parse_connection_info(raw: &str) -> Result<ConnectionInfo, SessionError> {
    let trimmed = raw.trim();
    let json = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        tokio::fs::read_to_string(trimmed)
            .await
            .map_err(|e| SessionError::KernelStart(format!("cannot read {trimmed}: {e}")))?
    };
    serde_json::from_str(&json)
        .map_err(|e| SessionError::KernelStart(format!("invalid connection info: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parse_connection_info_inline_json() {
        let info = parse_connection_info(
            r#"{
                "transport": "tcp", "ip": "127.0.0.1",
                "shell_port": 5001, "iopub_port": 5002, "stdin_port": 5003,
                "control_port": 5004, "hb_port": 5005,
                "key": "abc", "signature_scheme": "hmac-sha256"
            }"#,
        )
        .await
        .unwrap();
        assert_eq!(info.shell_port, 5001);
        assert_eq!(info.key, "abc");
    }

    #[tokio::test]
    async fn test_parse_connection_info_from_file() {
        let dir = std::env::temp_dir().join(format!("mercury-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("kernel.json");
        tokio::fs::write(
            &path,
            r#"{
                "transport": "tcp", "ip": "127.0.0.1",
                "shell_port": 1, "iopub_port": 2, "stdin_port": 3,
                "control_port": 4, "hb_port": 5,
                "key": "", "signature_scheme": "hmac-sha256"
            }"#,
        )
        .await
        .unwrap();

        let info = parse_connection_info(path.to_str().unwrap()).await.unwrap();
        assert_eq!(info.hb_port, 5);
        assert!(info.key.is_empty());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_parse_connection_info_missing_file() {
        let result = parse_connection_info("/no/such/file.json").await;
        assert!(matches!(result, Err(SessionError::KernelStart(_))));
    }
}
