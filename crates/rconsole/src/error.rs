use rconsole_protocol::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("Not connected to the remote console")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to spawn {what}: {reason}")]
    Spawn { what: String, reason: String },

    #[error("Terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

impl ClientError {
    pub(crate) fn spawn(what: &str, err: impl std::fmt::Display) -> Self {
        ClientError::Spawn {
            what: what.to_string(),
            reason: err.to_string(),
        }
    }

    /// Returns a helpful suggestion for resolving the error.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            ClientError::ConnectFailed { .. } | ClientError::NotConnected => Some(
                "Check that the remote is running 'rconsole serve' and the host/port are correct."
                    .to_string(),
            ),
            ClientError::Transport(e) if e.is_disconnect() => {
                Some("The connection dropped; it will be retried automatically.".to_string())
            }
            ClientError::Transport(_) => None,
            ClientError::Spawn { .. } => {
                Some("Thread creation failed. Check system thread limits (ulimit -u).".to_string())
            }
            ClientError::Terminal(_) => Some("Check that stdin and stdout are usable.".to_string()),
        }
    }

    /// Returns whether this error is potentially transient and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::ConnectFailed { .. } | ClientError::NotConnected => true,
            ClientError::Transport(e) => e.is_disconnect() || matches!(e, TransportError::Timeout),
            ClientError::Spawn { .. } | ClientError::Terminal(_) => false,
        }
    }

    /// Process exit code in the sysexits range.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::ConnectFailed { .. } | ClientError::NotConnected => 69, // EX_UNAVAILABLE
            ClientError::Transport(TransportError::Timeout) => 75,               // EX_TEMPFAIL
            ClientError::Transport(_) | ClientError::Terminal(_) => 74,          // EX_IOERR
            ClientError::Spawn { .. } => 71,                                     // EX_OSERR
        }
    }
}
