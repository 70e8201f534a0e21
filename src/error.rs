//! Error types for the memcached client.

use std::io;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the memcached client.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failures (connect, send, receive, framing).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No node could be located for the key (ring empty or all nodes dead).
    #[error("no node available for key")]
    NoNode,

    /// The per-node socket pool could not hand out a socket in time.
    #[error("socket pool exhausted for {endpoint}")]
    PoolExhausted { endpoint: String },

    /// The SASL exchange ended with an error status.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transcoder failed to serialize or deserialize a value.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Caller-supplied arguments were invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The client has been shut down.
    #[error("client is shut down")]
    Shutdown,
}

/// Transport-level errors. Any of these marks the socket broken.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// The peer closed the connection mid-operation.
    #[error("connection closed")]
    ConnectionClosed,

    /// A read did not complete within the receive timeout.
    #[error("receive timed out")]
    ReceiveTimeout,

    /// The response violated the wire framing (bad magic, short frame).
    #[error("protocol framing violation: {0}")]
    Framing(String),

    /// Address could not be resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the error indicates the socket it occurred on is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Auth(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_mark_socket_unusable() {
        let err = Error::Transport(TransportError::ConnectionClosed);
        assert!(err.is_transport());

        let err = Error::Auth("mechanism rejected".into());
        assert!(err.is_transport());

        let err = Error::NoNode;
        assert!(!err.is_transport());
    }

    #[test]
    fn io_error_converts_through_transport() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = TransportError::from(io_err).into();
        assert!(matches!(err, Error::Transport(TransportError::Io(_))));
    }
}
