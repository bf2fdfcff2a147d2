use thiserror::Error;

use crate::message::Family;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("Malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Unexpected {actual} message on {expected} stream")]
    UnexpectedFamily { expected: Family, actual: Family },

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

impl TransportError {
    /// True when the peer is gone and the connection must be replaced.
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, TransportError::Timeout)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout,
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let io_err = TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "test error",
        ));
        assert!(io_err.to_string().contains("I/O error"));

        let size_err = TransportError::FrameTooLarge { size: 2048, max: 1024 };
        assert!(size_err.to_string().contains("1024"));

        let family_err = TransportError::UnexpectedFamily {
            expected: Family::Response,
            actual: Family::Instruction,
        };
        assert_eq!(
            family_err.to_string(),
            "Unexpected instruction message on response stream"
        );

        assert_eq!(TransportError::Timeout.to_string(), "Connection timeout");
        assert_eq!(
            TransportError::ConnectionClosed.to_string(),
            "Connection closed"
        );
    }

    #[test]
    fn test_transport_error_from_io() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert!(matches!(
            TransportError::from(timeout),
            TransportError::Timeout
        ));

        let would_block = std::io::Error::new(std::io::ErrorKind::WouldBlock, "would block");
        assert!(matches!(
            TransportError::from(would_block),
            TransportError::Timeout
        ));

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            TransportError::from(eof),
            TransportError::ConnectionClosed
        ));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            TransportError::from(reset),
            TransportError::ConnectionClosed
        ));

        let other = std::io::Error::other("other");
        assert!(matches!(TransportError::from(other), TransportError::Io(_)));
    }

    #[test]
    fn test_is_disconnect() {
        assert!(TransportError::ConnectionClosed.is_disconnect());
        assert!(!TransportError::Timeout.is_disconnect());
    }
}
