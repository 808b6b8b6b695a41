//! Event sink: the narrow callback surface toward the presentation layer.
//!
//! The session core calls these methods synchronously from the iopub or
//! stdin listener task. Implementations hand off to their own rendering
//! context; they must return promptly and never block indefinitely, since
//! they run on the shared listener task.

use log::debug;
use tokio::sync::mpsc;

use mercury_wire::{ExecutionState, Header, MimeBundle, StreamName};

/// Consumer of unsolicited kernel events.
///
/// `parent_id` is the correlation id of the request that caused the event
/// (the id returned by `execute`), letting the presentation layer associate
/// output with the originating call site. Status broadcasts have no parent.
pub trait EventSink: Send + Sync {
    /// Kernel execution state changed (driven by `status` broadcasts).
    fn status_changed(&self, state: ExecutionState);

    /// Input echo: the kernel started running this code.
    fn execute_input(&self, code: &str, execution_count: i64, parent_id: Option<&str>);

    /// Text written to stdout/stderr.
    fn stream(&self, name: StreamName, text: &str, parent_id: Option<&str>);

    /// Rich display output.
    fn display_data(&self, data: &MimeBundle, parent_id: Option<&str>);

    /// The value produced by an execution.
    fn execute_result(&self, data: &MimeBundle, execution_count: i64, parent_id: Option<&str>);

    /// An exception was raised. The traceback arrives with ANSI escapes
    /// already stripped.
    fn error(
        &self,
        execution_count: Option<i64>,
        ename: &str,
        evalue: &str,
        traceback: &[String],
        parent_id: Option<&str>,
    );

    /// Result of an `inspect` call that found something.
    fn inspection(&self, text: &str);

    /// The kernel asked for interactive input. Prompt display and password
    /// masking are the implementation's responsibility; the typed value goes
    /// back through the responder.
    fn input_requested(&self, prompt: &str, password: bool, responder: InputResponder);
}

/// Commands relayed from the presentation layer back into the session's
/// stdin writer task.
#[derive(Debug)]
pub(crate) enum StdinCommand {
    Reply { parent: Header, value: String },
    Interrupt,
}

/// Hands a typed input value (or an interrupt) back to the kernel that
/// requested it. Cloneable and callable from any thread; the actual send
/// happens on the session's writer task.
#[derive(Clone)]
pub struct InputResponder {
    parent: Header,
    tx: mpsc::UnboundedSender<StdinCommand>,
}

impl InputResponder {
    pub(crate) fn new(parent: Header, tx: mpsc::UnboundedSender<StdinCommand>) -> Self {
        Self { parent, tx }
    }

    /// Send the typed value as an `input_reply` correlated to the prompt.
    pub fn respond(&self, value: impl Into<String>) {
        let command = StdinCommand::Reply {
            parent: self.parent.clone(),
            value: value.into(),
        };
        if self.tx.send(command).is_err() {
            debug!("[events] input reply dropped: session already shut down");
        }
    }

    /// Interrupt the kernel instead of answering the prompt.
    pub fn interrupt(&self) {
        if self.tx.send(StdinCommand::Interrupt).is_err() {
            debug!("[events] interrupt dropped: session already shut down");
        }
    }
}
