//! Process-wide session registry: create, lookup, remove, and the
//! reconnection "ghosting" rule that lets a client shed its previous
//! session when it supplies one on reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use bc_clock::Clock;
use tokio::sync::{mpsc, RwLock};

use crate::id;
use crate::session::{RegistryMap, Session, SessionEvent, TimerConfig};

/// Invoked once per created session, synchronously, after the session is
/// registered but before the creating request returns. The receiver is the
/// session's event mailbox (`map`/`message`/`state changed`/`close`); the
/// callback is expected to spawn whatever consumes it.
pub type ConnectCallback =
    Arc<dyn Fn(Arc<Session>, mpsc::UnboundedReceiver<SessionEvent>) + Send + Sync>;

pub struct SessionRegistry {
    sessions: Arc<RegistryMap>,
    clock: Arc<dyn Clock>,
    timers: TimerConfig,
    on_connect: ConnectCallback,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>, timers: TimerConfig, on_connect: ConnectCallback) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            clock,
            timers,
            on_connect,
        }
    }

    /// Creates and registers a new session. If `old_id` names a still-live
    /// session, it is first told to acknowledge up to `old_aid` and then
    /// closed with reason "Reconnected" -- the new session is otherwise
    /// independent and gets a fresh id.
    pub async fn create(
        &self,
        address: String,
        app_version: Option<String>,
        old_id: Option<&str>,
        old_aid: Option<i64>,
    ) -> Arc<Session> {
        if let Some(old_id) = old_id {
            if let Some(old_session) = self.lookup(old_id).await {
                if let Some(aid) = old_aid {
                    old_session.acknowledged_arrays(aid).await;
                }
                old_session.close(Some("Reconnected".to_owned())).await;
            }
        }

        let id = self.fresh_id().await;
        let timers = TimerConfig {
            keep_alive_interval: self.timers.keep_alive_interval,
            session_timeout_interval: self.timers.session_timeout_interval,
        };
        let (session, events) = Session::new(
            id.clone(),
            address,
            app_version,
            Arc::clone(&self.clock),
            timers,
            Arc::downgrade(&self.sessions),
        );

        self.sessions.write().await.insert(id, Arc::clone(&session));
        (self.on_connect)(Arc::clone(&session), events);
        session
    }

    pub async fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    async fn fresh_id(&self) -> String {
        loop {
            let candidate = id::generate();
            if !self.sessions.read().await.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
