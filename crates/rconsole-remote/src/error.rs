use rconsole_protocol::Terminated;
use thiserror::Error;

/// Failures a command reports to the operator. None of them end the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Bad arguments: {0}")]
    BadArguments(String),

    #[error("Command not recognized: {0}")]
    NotRecognized(String),

    #[error(transparent)]
    Terminated(#[from] Terminated),
}

impl CommandError {
    pub fn bad_arguments(message: impl Into<String>) -> Self {
        CommandError::BadArguments(message.into())
    }
}

/// Remote endpoint startup and lifecycle errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("Failed to setup signal handler: {0}")]
    SignalSetup(String),

    #[error("Failed to spawn {what}: {reason}")]
    Spawn { what: String, reason: String },
}

impl ServerError {
    pub(crate) fn spawn(what: &str, err: impl std::fmt::Display) -> Self {
        ServerError::Spawn {
            what: what.to_string(),
            reason: err.to_string(),
        }
    }

    /// Returns a helpful suggestion for resolving the error.
    pub fn suggestion(&self) -> String {
        match self {
            ServerError::Bind { .. } => {
                "Another process may own the port. Pick another with --port or RCONSOLE_PORT."
                    .to_string()
            }
            ServerError::SignalSetup(_) => {
                "Signal handler setup failed. Check system signal configuration.".to_string()
            }
            ServerError::Spawn { .. } => {
                "Thread creation failed. Check system thread limits (ulimit -u).".to_string()
            }
        }
    }

    /// Returns whether this error is potentially transient and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::Bind { .. } | ServerError::Spawn { .. })
    }
}
