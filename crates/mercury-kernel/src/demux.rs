//! Reply demultiplexing: the waiting table keyed by correlation id.
//!
//! Request issuers register a single-assignment slot under their message id
//! *before* the request is transmitted, so a fast reply can never race past
//! an unregistered waiter. The listener side removes-and-fulfills in one
//! operation under the table lock; the timeout side removes in one operation
//! too, so an entry is taken out exactly once no matter which side wins.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use mercury_wire::Message;

/// Waiting table shared between request issuers and channel listeners.
#[derive(Default)]
pub struct PendingReplies {
    waiters: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the reply correlated to `msg_id`. Must be
    /// called before the request is sent.
    pub fn register(&self, msg_id: &str) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .expect("pending table lock poisoned")
            .insert(msg_id.to_string(), tx);
        rx
    }

    /// Deliver `message` to the waiter registered for its parent id.
    /// Returns the message back when no waiter is registered, so the caller
    /// can treat it as unsolicited.
    pub fn fulfill(&self, message: Message) -> Result<(), Message> {
        let parent_id = match message.parent_id() {
            Some(id) => id.to_string(),
            None => return Err(message),
        };
        let sender = self
            .waiters
            .lock()
            .expect("pending table lock poisoned")
            .remove(&parent_id);
        match sender {
            // A send error means the waiter already timed out and dropped
            // its receiver; the late reply is simply discarded.
            Some(tx) => {
                let _ = tx.send(message);
                Ok(())
            }
            None => Err(message),
        }
    }

    /// Remove a waiter that gave up (timeout or cancellation). Returns true
    /// if the entry was still present.
    pub fn cancel(&self, msg_id: &str) -> bool {
        self.waiters
            .lock()
            .expect("pending table lock poisoned")
            .remove(msg_id)
            .is_some()
    }

    /// Number of outstanding requests.
    pub fn outstanding(&self) -> usize {
        self.waiters
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }

    /// Drop every waiter; their receivers resolve with an error. Used on
    /// session shutdown so blocked callers unblock promptly.
    pub fn clear(&self) {
        self.waiters
            .lock()
            .expect("pending table lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercury_wire::{Content, ExecuteReply, Header, ReplyStatus};

    fn reply_to(parent_id: &str) -> Message {
        let mut message = Message::new(
            Content::ExecuteReply(ExecuteReply {
                status: ReplyStatus::Ok,
                execution_count: Some(1),
            }),
            "kernel",
        );
        let mut parent = Header::new("execute_request", "client");
        parent.msg_id = parent_id.to_string();
        message.parent_header = Some(parent);
        message
    }

    #[tokio::test]
    async fn test_reply_reaches_registered_waiter() {
        let pending = PendingReplies::new();
        let rx = pending.register("req-1");

        assert!(pending.fulfill(reply_to("req-1")).is_ok());
        let delivered = rx.await.unwrap();
        assert_eq!(delivered.parent_id(), Some("req-1"));
        assert_eq!(pending.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_reply_is_returned() {
        let pending = PendingReplies::new();
        let _rx = pending.register("req-1");

        let message = reply_to("other-request");
        let unmatched = pending.fulfill(message).unwrap_err();
        assert_eq!(unmatched.parent_id(), Some("other-request"));
        assert_eq!(pending.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_message_without_parent_is_unsolicited() {
        let pending = PendingReplies::new();
        let mut message = reply_to("x");
        message.parent_header = None;
        assert!(pending.fulfill(message).is_err());
    }

    #[tokio::test]
    async fn test_cancel_removes_entry_and_late_reply_is_dropped() {
        let pending = PendingReplies::new();
        let rx = pending.register("req-1");
        drop(rx); // caller timed out

        assert!(pending.cancel("req-1"));
        assert!(!pending.cancel("req-1"));
        // The late reply is unmatched now.
        assert!(pending.fulfill(reply_to("req-1")).is_err());
    }

    #[tokio::test]
    async fn test_fulfill_after_receiver_dropped_still_consumes_entry() {
        let pending = PendingReplies::new();
        let rx = pending.register("req-1");
        drop(rx);

        // Entry is consumed exactly once even though delivery goes nowhere.
        assert!(pending.fulfill(reply_to("req-1")).is_ok());
        assert_eq!(pending.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_each_get_their_reply() {
        use std::sync::Arc;

        let pending = Arc::new(PendingReplies::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let pending = pending.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("req-{i}");
                let rx = pending.register(&id);
                rx.await.unwrap().parent_id().unwrap().to_string()
            }));
        }

        // Let every task register before fulfilling.
        tokio::task::yield_now().await;
        for i in 0..32 {
            while pending.fulfill(reply_to(&format!("req-{i}"))).is_err() {
                tokio::task::yield_now().await;
            }
        }

        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), format!("req-{i}"));
        }
        assert_eq!(pending.outstanding(), 0);
    }
}
