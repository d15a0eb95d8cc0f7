//! Process-wide state shared across requests: the channel configuration and
//! the session registry built from it, plus the clock handlers reach for
//! when they need a delay outside of any one session (the `/test` probe).

use std::sync::Arc;

use bc_clock::Clock;
use tracing::{debug, info};

use crate::config::ChannelConfig;
use crate::registry::{ConnectCallback, SessionRegistry};
use crate::session::{Session, SessionEvent};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<ChannelConfig>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_connect(config, Arc::new(log_session_events))
    }

    /// Like [`Self::new`], but with the connect callback the embedding
    /// application actually wants instead of the default logger -- this is
    /// what lets tests observe session events without reaching into the
    /// registry's internals.
    pub fn with_connect(config: ChannelConfig, on_connect: ConnectCallback) -> Self {
        let clock = bc_clock::tokio_clock();
        let timers = config.timers();
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&clock), timers, on_connect));
        Self {
            registry,
            config: Arc::new(config),
            clock,
        }
    }
}

/// Default connect callback: logs every session event as it arrives. An
/// embedding application with real message semantics installs its own
/// callback in place of this one.
fn log_session_events(
    session: Arc<Session>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
) {
    tokio::spawn(async move {
        info!(id = session.id(), address = session.address(), "session connected");
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Map(map) => debug!(?map, "forward map received"),
                SessionEvent::Message(value) => debug!(%value, "forward message received"),
                SessionEvent::StateChanged { old, new } => {
                    info!(?old, ?new, "session state changed");
                }
                SessionEvent::Close(reason) => {
                    info!(%reason, "session closed");
                    break;
                }
            }
        }
    });
}
