//! Session registry
//!
//! Process-wide keyed store of active call sessions. Closing is
//! idempotent across the competing close paths (carrier `stop`, socket
//! close, upstream failure): a closing set guards re-entry and the
//! session queue makes the terminal event safe to repeat.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use voxbridge_llm::ChatMessage;

use crate::runtime::SharedRuntime;
use crate::session::turn::TurnStats;
use crate::session::{Session, SessionConfig, SessionEvent};

/// End-of-call summary handed to registered hooks (persistence, webhook
/// dispatch — external concerns).
#[derive(Debug, Clone)]
pub struct CallSummary {
    pub call_id: String,
    pub history: Vec<ChatMessage>,
    pub recording_ulaw: Vec<u8>,
    pub stats: TurnStats,
}

pub type CloseHook = Arc<dyn Fn(&CallSummary) + Send + Sync>;

struct SessionEntry {
    events: mpsc::UnboundedSender<SessionEvent>,
    task: JoinHandle<()>,
}

/// Handle for posting events into one session's queue.
pub struct SessionHandle {
    call_id: String,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Post an event; false when the session actor is gone.
    pub fn post(&self, event: SessionEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

pub struct SessionRegistry {
    runtime: SharedRuntime,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    closing: Arc<Mutex<HashSet<String>>>,
    hooks: Arc<Mutex<Vec<CloseHook>>>,
}

impl SessionRegistry {
    pub fn new(runtime: SharedRuntime) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            sessions: Mutex::new(HashMap::new()),
            closing: Arc::new(Mutex::new(HashSet::new())),
            hooks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Register an end-of-call hook; applies to sessions closed after
    /// registration.
    pub fn on_close(&self, hook: CloseHook) {
        self.hooks.lock().push(hook);
    }

    /// Create a session for a call. The media stream binds to it later
    /// via `get`. Creating an already-known call id is a no-op.
    pub fn create(&self, cfg: SessionConfig) {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&cfg.call_id) {
            warn!(call_id = %cfg.call_id, "session already exists");
            return;
        }
        let call_id = cfg.call_id.clone();
        let (events, task) = Session::spawn(self.runtime.clone(), cfg, self.hooks.clone());
        sessions.insert(call_id.clone(), SessionEntry { events, task });
        info!(call_id = %call_id, "session created");
    }

    pub fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().get(call_id).map(|entry| SessionHandle {
            call_id: call_id.to_string(),
            events: entry.events.clone(),
        })
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Close every connection a call owns. Idempotent: concurrent and
    /// repeated calls observe the same effect as one.
    pub fn close_all(&self, call_id: &str) {
        if !self.closing.lock().insert(call_id.to_string()) {
            return;
        }

        let entry = self.sessions.lock().remove(call_id);
        match entry {
            Some(entry) => {
                info!(call_id = %call_id, "closing session");
                let _ = entry.events.send(SessionEvent::Close);
                let closing = self.closing.clone();
                let id = call_id.to_string();
                tokio::spawn(async move {
                    let _ = entry.task.await;
                    closing.lock().remove(&id);
                });
            }
            None => {
                self.closing.lock().remove(call_id);
            }
        }
    }

    /// Close all active sessions and wait (bounded) for their actors to
    /// drain. Used at process shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        for id in &ids {
            self.close_all(id);
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !self.closing.lock().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown wait elapsed with sessions still draining");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
