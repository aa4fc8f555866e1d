//! Server Application State
//!
//! Shared state accessible by all HTTP and WebSocket handlers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::host::HostHandle;

/// What a WebSocket session is connected for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    /// Settings UI listening for change signals
    Events,
    /// The hosted page
    Page,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    host: Arc<HostHandle>,
    sessions: Mutex<HashMap<Uuid, SessionKind>>,
}

impl AppState {
    pub fn new(host: Arc<HostHandle>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                host,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn host(&self) -> &HostHandle {
        &self.inner.host
    }

    /// Register a WebSocket session and return its id
    pub fn register_session(&self, kind: SessionKind) -> Uuid {
        let session_id = Uuid::new_v4();
        self.inner.sessions.lock().insert(session_id, kind);
        tracing::info!("{:?} session connected: {}", kind, session_id);
        session_id
    }

    pub fn remove_session(&self, session_id: Uuid) {
        if let Some(kind) = self.inner.sessions.lock().remove(&session_id) {
            tracing::info!("{:?} session disconnected: {}", kind, session_id);
        }
    }

    /// Number of connected sessions of `kind`
    pub fn session_count(&self, kind: SessionKind) -> usize {
        self.inner
            .sessions
            .lock()
            .values()
            .filter(|k| **k == kind)
            .count()
    }
}
