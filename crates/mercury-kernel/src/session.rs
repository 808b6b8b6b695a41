//! Kernel sessions: correlated requests, lifecycle, and derived state.
//!
//! A session owns three listener tasks (shell, iopub, stdin) plus a stdin
//! writer task. `execute` is fire-and-observe; `complete` and `inspect`
//! suspend the calling task on a single-assignment slot with a caller
//! timeout. `execution_state` is driven exclusively by iopub status
//! broadcasts; request-issuing code never writes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mercury_wire::{
    Channel, CompleteRequest, Content, ExecuteRequest, ExecutionState, InputReply,
    InspectRequest, Message,
};

use crate::config::{CompleteWhileBusy, SessionConfig};
use crate::demux::PendingReplies;
use crate::error::SessionError;
use crate::events::{EventSink, InputResponder, StdinCommand};
use crate::launcher::KernelHandle;
use crate::transport::KernelTransport;

/// Immutable identity of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelIdentity {
    /// Process-unique opaque token, generated once per connection.
    pub session_id: String,
    /// Kernel type name, e.g. `python3`.
    pub kernel_name: String,
}

/// One completion candidate, optionally annotated with the kernel's
/// experimental type information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCandidate {
    pub text: String,
    pub kind: Option<String>,
}

/// State shared between the session object and its listener tasks.
struct Shared {
    identity: KernelIdentity,
    config: SessionConfig,
    transport: Arc<dyn KernelTransport>,
    pending: PendingReplies,
    sink: Arc<dyn EventSink>,
    execution_state: Mutex<ExecutionState>,
    display_name: Mutex<Option<String>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Shared {
    /// Build an outbound request with a fresh correlation id.
    fn request(&self, content: Content) -> Message {
        let mut message = Message::new(content, &self.identity.session_id);
        message.header.username = self.config.username.clone();
        message
    }

    fn set_execution_state(&self, state: ExecutionState) {
        {
            let mut guard = self
                .execution_state
                .lock()
                .expect("execution state lock poisoned");
            if *guard == state {
                return;
            }
            *guard = state;
        }
        self.sink.status_changed(state);
    }

    /// Transport loss: mark dead, unblock waiters. Not retried.
    fn mark_dead(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        warn!(
            "[session] {} lost its kernel connection",
            self.identity.session_id
        );
        self.set_execution_state(ExecutionState::Dead);
        self.pending.clear();
    }
}

/// A live connection to one kernel.
pub struct KernelSession {
    shared: Arc<Shared>,
    handle: Arc<dyn KernelHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl KernelSession {
    /// Open channels to the kernel behind `handle`, start the listener
    /// tasks, and verify the kernel answers a kernel_info probe within the
    /// configured startup timeout.
    pub async fn connect(
        handle: Arc<dyn KernelHandle>,
        sink: Arc<dyn EventSink>,
        config: SessionConfig,
    ) -> Result<Arc<Self>, SessionError> {
        let transport = handle.open_channels().await?;
        let identity = KernelIdentity {
            session_id: Uuid::new_v4().to_string(),
            kernel_name: handle.kernel_name().to_string(),
        };
        info!(
            "[session] connecting {} session {}",
            identity.kernel_name, identity.session_id
        );

        let shared = Arc::new(Shared {
            identity,
            config,
            transport,
            pending: PendingReplies::new(),
            sink,
            execution_state: Mutex::new(ExecutionState::Unknown),
            display_name: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            shared: shared.clone(),
            handle: handle.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        {
            let mut tasks = session.tasks.lock().expect("task list lock poisoned");
            tasks.push(tokio::spawn(shell_listener(shared.clone())));
            tasks.push(tokio::spawn(iopub_listener(shared.clone())));
            tasks.push(tokio::spawn(stdin_listener(shared.clone(), stdin_tx)));
            tasks.push(tokio::spawn(stdin_writer(
                shared.clone(),
                handle,
                stdin_rx,
            )));
        }

        session.probe_kernel_info().await?;
        Ok(session)
    }

    /// Verify the kernel is answering before handing the session out.
    async fn probe_kernel_info(&self) -> Result<(), SessionError> {
        let message = self.shared.request(Content::KernelInfoRequest);
        let msg_id = message.header.msg_id.clone();
        let rx = self.shared.pending.register(&msg_id);
        if let Err(e) = self.shared.transport.send(Channel::Shell, message).await {
            self.shared.pending.cancel(&msg_id);
            self.teardown().await;
            return Err(e);
        }

        match tokio::time::timeout(self.shared.config.startup_timeout(), rx).await {
            Ok(Ok(reply)) => {
                debug!(
                    "[session] kernel answered probe with {}",
                    reply.header.msg_type
                );
                Ok(())
            }
            Ok(Err(_)) | Err(_) => {
                self.shared.pending.cancel(&msg_id);
                self.teardown().await;
                Err(SessionError::KernelStart(format!(
                    "kernel did not answer within {:?}",
                    self.shared.config.startup_timeout()
                )))
            }
        }
    }

    pub fn identity(&self) -> &KernelIdentity {
        &self.shared.identity
    }

    pub fn session_id(&self) -> &str {
        &self.shared.identity.session_id
    }

    pub fn kernel_name(&self) -> &str {
        &self.shared.identity.kernel_name
    }

    /// Current kernel execution state as reported by status broadcasts.
    pub fn execution_state(&self) -> ExecutionState {
        *self
            .shared
            .execution_state
            .lock()
            .expect("execution state lock poisoned")
    }

    /// User-assigned display name, if any.
    pub fn display_name(&self) -> Option<String> {
        self.shared
            .display_name
            .lock()
            .expect("display name lock poisoned")
            .clone()
    }

    pub fn set_display_name(&self, name: Option<String>) {
        *self
            .shared
            .display_name
            .lock()
            .expect("display name lock poisoned") = name;
    }

    /// Human-readable representation: `name ([kernel] id)` or `[kernel] id`.
    pub fn repr(&self) -> String {
        let identity = &self.shared.identity;
        match self.display_name() {
            Some(name) => format!(
                "{} ([{}] {})",
                name, identity.kernel_name, identity.session_id
            ),
            None => format!("[{}] {}", identity.kernel_name, identity.session_id),
        }
    }

    /// True while the kernel heartbeats and the session is neither shut
    /// down nor disconnected.
    pub fn is_alive(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
            && self.execution_state() != ExecutionState::Dead
            && self.handle.is_alive()
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    /// Send code for execution. Does not wait for output: results, streams
    /// and errors surface through the event sink, correlated to the
    /// returned message id.
    pub async fn execute(&self, code: &str) -> Result<String, SessionError> {
        self.ensure_open()?;
        let message = self
            .shared
            .request(Content::ExecuteRequest(ExecuteRequest::new(code)));
        let msg_id = message.header.msg_id.clone();
        self.shared.transport.send(Channel::Shell, message).await?;
        info!("[session] sent execute_request {msg_id}");
        Ok(msg_id)
    }

    /// Ask the kernel for completion candidates at `cursor_pos`.
    ///
    /// Suspends until the kernel answers or `timeout` elapses; a timeout is
    /// not an error and yields no candidates. Depending on
    /// [`CompleteWhileBusy`], requests against a non-idle kernel may be
    /// skipped entirely.
    pub async fn complete(
        &self,
        code: &str,
        cursor_pos: usize,
        timeout: Duration,
    ) -> Result<Vec<CompletionCandidate>, SessionError> {
        self.ensure_open()?;
        if self.shared.config.complete_while_busy == CompleteWhileBusy::Skip
            && self.execution_state() != ExecutionState::Idle
        {
            debug!(
                "[session] skipping completion, kernel is {}",
                self.execution_state()
            );
            return Ok(Vec::new());
        }

        let message = self.shared.request(Content::CompleteRequest(CompleteRequest {
            code: code.to_string(),
            cursor_pos,
        }));
        let Some(reply) = self.correlated_request(message, timeout).await? else {
            info!("[session] completion timed out");
            return Ok(Vec::new());
        };

        match reply.content {
            Content::CompleteReply(reply) => Ok(completion_candidates(
                reply.matches,
                &reply.metadata,
            )),
            other => {
                warn!(
                    "[session] unexpected completion reply type {}",
                    other.msg_type()
                );
                Ok(Vec::new())
            }
        }
    }

    /// Ask the kernel to inspect the object at `cursor_pos`. The inspection
    /// text is routed to the event sink's `inspection` callback; the return
    /// value only says whether anything was found before the timeout.
    pub async fn inspect(
        &self,
        code: &str,
        cursor_pos: usize,
        detail_level: u8,
        timeout: Duration,
    ) -> Result<bool, SessionError> {
        self.ensure_open()?;
        let message = self.shared.request(Content::InspectRequest(InspectRequest {
            code: code.to_string(),
            cursor_pos,
            detail_level,
        }));
        let Some(reply) = self.correlated_request(message, timeout).await? else {
            info!("[session] object inspection timed out");
            return Ok(false);
        };

        match reply.content {
            Content::InspectReply(reply) if reply.found => {
                match reply.data.get("text/plain").and_then(|v| v.as_str()) {
                    Some(text) => {
                        self.shared.sink.inspection(&strip_ansi(text));
                        Ok(true)
                    }
                    None => {
                        debug!("[session] inspect reply carried no text/plain");
                        Ok(false)
                    }
                }
            }
            Content::InspectReply(_) => Ok(false),
            other => {
                warn!(
                    "[session] unexpected inspection reply type {}",
                    other.msg_type()
                );
                Ok(false)
            }
        }
    }

    /// Register a waiter, send the request, and await the correlated reply.
    /// `Ok(None)` means the timeout elapsed; the waiting-table entry is
    /// removed on every exit path.
    async fn correlated_request(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Option<Message>, SessionError> {
        let msg_id = message.header.msg_id.clone();
        // Register before transmitting so a fast reply cannot slip past.
        let rx = self.shared.pending.register(&msg_id);
        if let Err(e) = self.shared.transport.send(Channel::Shell, message).await {
            self.shared.pending.cancel(&msg_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            // Sender dropped: the session shut down or died while waiting.
            Ok(Err(_)) => {
                self.shared.pending.cancel(&msg_id);
                Ok(None)
            }
            Err(_elapsed) => {
                self.shared.pending.cancel(&msg_id);
                Ok(None)
            }
        }
    }

    pub async fn interrupt(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.handle.interrupt().await
    }

    pub async fn restart(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.handle.restart().await
    }

    /// Shut the session down: stop listener tasks, close channels, and tear
    /// down the kernel handle. Every subsequent operation fails with
    /// [`SessionError::Closed`].
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        info!(
            "[session] shutting down {}",
            self.shared.identity.session_id
        );
        self.teardown().await;
        let _ = self.handle.shutdown().await;
        Ok(())
    }

    async fn teardown(&self) {
        self.shared.shutdown.cancel();
        self.shared.pending.clear();
        self.shared.transport.close().await;
        let tasks = {
            let mut guard = self.tasks.lock().expect("task list lock poisoned");
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for KernelSession {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Shell listener: replies are correlated to waiting requests; anything
/// unmatched is unsolicited and only logged (the sink has no callback for
/// solicited-reply kinds).
async fn shell_listener(shared: Arc<Shared>) {
    let poll = shared.config.recv_poll();
    while !shared.shutdown.is_cancelled() {
        match shared.transport.recv(Channel::Shell, poll).await {
            Ok(Some(message)) => {
                if let Err(unmatched) = shared.pending.fulfill(message) {
                    debug!(
                        "[demux] unsolicited shell {} (parent {:?})",
                        unmatched.header.msg_type,
                        unmatched.parent_id()
                    );
                }
            }
            Ok(None) => {}
            Err(_) => {
                shared.mark_dead();
                return;
            }
        }
    }
}

/// IoPub listener: translates broadcast events into sink callbacks and
/// drives the execution-state machine.
async fn iopub_listener(shared: Arc<Shared>) {
    let poll = shared.config.recv_poll();
    while !shared.shutdown.is_cancelled() {
        let message = match shared.transport.recv(Channel::IoPub, poll).await {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(_) => {
                shared.mark_dead();
                return;
            }
        };

        let parent_id = message.parent_id().map(str::to_string);
        let parent_id = parent_id.as_deref();
        match message.content {
            Content::Status(status) => {
                shared.set_execution_state(status.execution_state);
            }
            Content::ExecuteInput(input) => {
                shared
                    .sink
                    .execute_input(&input.code, input.execution_count, parent_id);
            }
            Content::Stream(stream) => {
                shared.sink.stream(stream.name, &stream.text, parent_id);
            }
            Content::DisplayData(display) => {
                shared.sink.display_data(&display.data, parent_id);
            }
            Content::ExecuteResult(result) => {
                shared
                    .sink
                    .execute_result(&result.data, result.execution_count, parent_id);
            }
            Content::Error(error) => {
                let traceback: Vec<String> =
                    error.traceback.iter().map(|line| strip_ansi(line)).collect();
                shared.sink.error(
                    error.execution_count,
                    &error.ename,
                    &strip_ansi(&error.evalue),
                    &traceback,
                    parent_id,
                );
            }
            other => {
                debug!("[demux] unhandled iopub message {}", other.msg_type());
            }
        }
    }
}

/// Stdin listener: forwards interactive input prompts to the sink with a
/// responder that relays the typed value back.
async fn stdin_listener(shared: Arc<Shared>, stdin_tx: mpsc::UnboundedSender<StdinCommand>) {
    let poll = shared.config.recv_poll();
    while !shared.shutdown.is_cancelled() {
        let message = match shared.transport.recv(Channel::Stdin, poll).await {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(_) => {
                shared.mark_dead();
                return;
            }
        };

        // A reply some caller is explicitly waiting for takes precedence.
        let message = match shared.pending.fulfill(message) {
            Ok(()) => continue,
            Err(message) => message,
        };

        match message.content {
            Content::InputRequest(ref request) => {
                let responder = InputResponder::new(message.header.clone(), stdin_tx.clone());
                shared
                    .sink
                    .input_requested(&request.prompt, request.password, responder);
            }
            ref other => {
                debug!("[demux] unhandled stdin message {}", other.msg_type());
            }
        }
    }
}

/// Stdin writer: serializes outgoing input replies (and prompt-interrupts)
/// from whatever thread the presentation layer answers on.
async fn stdin_writer(
    shared: Arc<Shared>,
    handle: Arc<dyn KernelHandle>,
    mut rx: mpsc::UnboundedReceiver<StdinCommand>,
) {
    loop {
        let command = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            command = rx.recv() => match command {
                Some(command) => command,
                None => return,
            },
        };

        match command {
            StdinCommand::Reply { parent, value } => {
                let message = Message::reply_to(
                    Content::InputReply(InputReply { value }),
                    &shared.identity.session_id,
                    parent,
                );
                if let Err(e) = shared.transport.send(Channel::Stdin, message).await {
                    warn!("[session] failed to send input reply: {e}");
                }
            }
            StdinCommand::Interrupt => {
                if let Err(e) = handle.interrupt().await {
                    warn!("[session] interrupt from input prompt failed: {e}");
                }
            }
        }
    }
}

/// Build candidates from a complete_reply, preferring the experimental
/// typed matches when the kernel provides them.
fn completion_candidates(
    matches: Vec<String>,
    metadata: &serde_json::Value,
) -> Vec<CompletionCandidate> {
    if let Some(typed) = metadata
        .get("_jupyter_types_experimental")
        .and_then(|v| v.as_array())
    {
        let candidates: Vec<CompletionCandidate> = typed
            .iter()
            .filter_map(|entry| {
                let text = entry.get("text").and_then(|v| v.as_str())?;
                let kind = entry
                    .get("type")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                Some(CompletionCandidate {
                    text: text.to_string(),
                    kind,
                })
            })
            .collect();
        if !candidates.is_empty() {
            return candidates;
        }
    }

    matches
        .into_iter()
        .map(|text| CompletionCandidate { text, kind: None })
        .collect()
}

/// Remove ANSI escape sequences from kernel-formatted text.
fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let pattern = ANSI.get_or_init(|| Regex::new(r"\x1b[^m]*m").expect("valid ANSI pattern"));
    pattern.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_ansi() {
        let colored = "\x1b[0;31mZeroDivisionError\x1b[0m: division by zero";
        assert_eq!(strip_ansi(colored), "ZeroDivisionError: division by zero");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_completion_candidates_plain_matches() {
        let candidates =
            completion_candidates(vec!["foo.bar".into(), "foo.baz".into()], &json!({}));
        assert_eq!(
            candidates.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
            vec!["foo.bar", "foo.baz"]
        );
        assert!(candidates.iter().all(|c| c.kind.is_none()));
    }

    #[test]
    fn test_completion_candidates_typed_metadata() {
        let metadata = json!({
            "_jupyter_types_experimental": [
                {"text": "foo.bar", "type": "function"},
                {"text": "foo.baz", "type": null},
            ]
        });
        let candidates = completion_candidates(vec!["ignored".into()], &metadata);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].kind.as_deref(), Some("function"));
        assert_eq!(candidates[1].kind, None);
    }

    #[test]
    fn test_completion_candidates_empty_typed_falls_back() {
        let metadata = json!({ "_jupyter_types_experimental": [] });
        let candidates = completion_candidates(vec!["foo".into()], &metadata);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text, "foo");
    }
}
