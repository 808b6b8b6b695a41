//! Session registry: explicit ownership of live sessions and the bindings
//! that route caller handles to them.
//!
//! One lock covers both maps so a binding can never point at a session that
//! was unregistered halfway through a lookup. Listing never mutates: a dead
//! session stays listed until someone shuts it down or unregisters it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::error::SessionError;
use crate::session::{KernelIdentity, KernelSession};

/// Opaque caller-side key bound to a session, e.g. a view or buffer id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingHandle(String);

impl BindingHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BindingHandle {
    fn from(handle: &str) -> Self {
        Self(handle.to_string())
    }
}

impl std::fmt::Display for BindingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<KernelSession>>,
    bindings: HashMap<BindingHandle, String>,
}

/// Registry of live sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session under its id. Ids are generated per connection, so a
    /// collision means the same session was registered twice.
    pub fn register(&self, session: Arc<KernelSession>) -> Result<(), SessionError> {
        let mut inner = self.lock();
        let session_id = session.session_id().to_string();
        if inner.sessions.contains_key(&session_id) {
            return Err(SessionError::AlreadyRegistered(session_id));
        }
        info!("[registry] registered session {}", session.repr());
        inner.sessions.insert(session_id, session);
        Ok(())
    }

    /// Remove a session and every binding that pointed at it. Returns the
    /// session so the caller can still shut it down.
    pub fn unregister(&self, session_id: &str) -> Option<Arc<KernelSession>> {
        let mut inner = self.lock();
        let session = inner.sessions.remove(session_id)?;
        inner.bindings.retain(|handle, bound| {
            let keep = bound != session_id;
            if !keep {
                debug!("[registry] dropping binding {handle} with session {session_id}");
            }
            keep
        });
        Some(session)
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<KernelSession>, SessionError> {
        self.lock()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Every registered session, dead ones included.
    pub fn sessions(&self) -> Vec<Arc<KernelSession>> {
        self.lock().sessions.values().cloned().collect()
    }

    /// Identities of the sessions currently answering heartbeats.
    pub fn list_alive(&self) -> Vec<KernelIdentity> {
        self.lock()
            .sessions
            .values()
            .filter(|session| session.is_alive())
            .map(|session| session.identity().clone())
            .collect()
    }

    /// Point `handle` at a registered session. Rebinding an existing handle
    /// replaces its target.
    pub fn bind(&self, handle: BindingHandle, session_id: &str) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if !inner.sessions.contains_key(session_id) {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        debug!("[registry] bound {handle} to session {session_id}");
        inner.bindings.insert(handle, session_id.to_string());
        Ok(())
    }

    /// Remove a binding, leaving its session registered. Returns true if the
    /// handle was bound.
    pub fn unbind(&self, handle: &BindingHandle) -> bool {
        self.lock().bindings.remove(handle).is_some()
    }

    /// Resolve a handle to its bound session.
    pub fn session_for(&self, handle: &BindingHandle) -> Result<Arc<KernelSession>, SessionError> {
        let inner = self.lock();
        let session_id = inner
            .bindings
            .get(handle)
            .ok_or_else(|| SessionError::NotFound(handle.to_string()))?;
        inner
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("registry lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_handle_display_and_eq() {
        let a = BindingHandle::new("view-42");
        let b = BindingHandle::from("view-42");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "view-42");
        assert_eq!(a.as_str(), "view-42");
    }

    #[test]
    fn test_lookup_on_empty_registry_is_not_found() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            registry.session_for(&BindingHandle::new("view-1")),
            Err(SessionError::NotFound(_))
        ));
        assert!(!registry.unbind(&BindingHandle::new("view-1")));
        assert!(registry.sessions().is_empty());
        assert!(registry.list_alive().is_empty());
    }
}
