use std::env;
use std::time::Duration;

use rconsole_protocol::config::env_millis;
use rconsole_protocol::SessionConfig;
use rconsole_protocol::DEFAULT_PORT;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
const DEFAULT_LOG_CAPACITY: usize = 250;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Entries each delivery buffer holds before evicting the oldest.
    pub log_capacity: usize,
    pub flush_interval: Duration,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            log_capacity: DEFAULT_LOG_CAPACITY,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_address: env::var("RCONSOLE_BIND")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            port: env::var("RCONSOLE_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            log_capacity: env::var("RCONSOLE_LOG_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(DEFAULT_LOG_CAPACITY),
            flush_interval: env_millis("RCONSOLE_FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS),
            session: SessionConfig::from_env(),
        }
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}
