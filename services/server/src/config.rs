//! Runtime configuration, loaded from the environment the way `main`
//! assembles every other service's settings in this workspace.

use std::time::Duration;

use bc_protocol::{DEFAULT_BASE, DEFAULT_KEEP_ALIVE_INTERVAL_MS, DEFAULT_SESSION_TIMEOUT_INTERVAL_MS};

use crate::session::TimerConfig;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// URL prefix the service listens under, e.g. `/channel`. Always has a
    /// leading slash and never a trailing one.
    pub base: String,
    /// Candidate host prefixes handed out at random to `/test?MODE=init`.
    pub host_prefixes: Vec<String>,
    pub keep_alive_interval: Duration,
    pub session_timeout_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE.to_owned(),
            host_prefixes: Vec::new(),
            keep_alive_interval: Duration::from_millis(DEFAULT_KEEP_ALIVE_INTERVAL_MS),
            session_timeout_interval: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_INTERVAL_MS),
        }
    }
}

impl ChannelConfig {
    /// Reads `CHANNEL_BASE`, `CHANNEL_HOST_PREFIXES` (comma separated),
    /// `CHANNEL_KEEP_ALIVE_MS`, and `CHANNEL_SESSION_TIMEOUT_MS`, falling
    /// back to the protocol defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(base) = std::env::var("CHANNEL_BASE") {
            config.base = normalize_base(&base);
        }

        if let Ok(prefixes) = std::env::var("CHANNEL_HOST_PREFIXES") {
            config.host_prefixes = prefixes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }

        if let Ok(ms) = std::env::var("CHANNEL_KEEP_ALIVE_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                config.keep_alive_interval = Duration::from_millis(ms);
            }
        }

        if let Ok(ms) = std::env::var("CHANNEL_SESSION_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                config.session_timeout_interval = Duration::from_millis(ms);
            }
        }

        config
    }

    pub fn timers(&self) -> TimerConfig {
        TimerConfig {
            keep_alive_interval: self.keep_alive_interval,
            session_timeout_interval: self.session_timeout_interval,
        }
    }
}

/// Ensures a leading slash and strips any trailing one, per the base-path
/// normalization the dispatcher relies on.
fn normalize_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}
