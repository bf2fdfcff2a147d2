use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5800;

const DEFAULT_KEEPALIVE_MS: u64 = 5_000;
const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 1_000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;

/// Timing shared by both ends of a process session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a session survives without traffic from the peer.
    pub keepalive_duration: Duration,
    /// How often heartbeats are sent and the deadline is checked.
    pub keepalive_interval: Duration,
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_duration: Duration::from_millis(DEFAULT_KEEPALIVE_MS),
            keepalive_interval: Duration::from_millis(DEFAULT_KEEPALIVE_INTERVAL_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self {
            keepalive_duration: env_millis("RCONSOLE_KEEPALIVE_MS", DEFAULT_KEEPALIVE_MS),
            keepalive_interval: env_millis(
                "RCONSOLE_KEEPALIVE_INTERVAL_MS",
                DEFAULT_KEEPALIVE_INTERVAL_MS,
            ),
            write_timeout: env_millis("RCONSOLE_WRITE_TIMEOUT_MS", DEFAULT_WRITE_TIMEOUT_MS),
        }
    }

    pub fn with_keepalive(mut self, duration: Duration, interval: Duration) -> Self {
        self.keepalive_duration = duration;
        self.keepalive_interval = interval;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Reads a millisecond duration from the environment, falling back to
/// `default_ms` when unset or unparsable.
pub fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_ms),
    )
}
