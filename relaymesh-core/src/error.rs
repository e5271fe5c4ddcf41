//! Error types shared across the replication stack.

use crate::codec::CodecError;
use crate::queue::QueueError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for replication sessions.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// IO error on the internal channel (dial, read, write).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Malformed frame or field on the wire.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Peer-queue operation failure.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The peer did not answer the handshake in time.
    #[error("handshake timeout after {0:?}")]
    HandshakeTimeout(Duration),

    /// The peer sent an event that is not valid in the current state.
    #[error("unexpected event: {0}")]
    UnexpectedEvent(String),

    /// The session was told to exit by its owner.
    #[error("session cancelled")]
    Cancelled,

    /// A broker collaborator rejected a replicated operation.
    #[error("state apply failed: {0}")]
    Apply(String),
}

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

impl ReplicationError {
    /// Create an unexpected-event error with a message.
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedEvent(msg.into())
    }

    /// Create a collaborator-failure error with a message.
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Transient failures are retried by the producer's reconnect loop.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::HandshakeTimeout(_))
    }

    /// Protocol violations: the stream is unusable, a fresh handshake is
    /// required.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Codec(_) | Self::UnexpectedEvent(_) | Self::Queue(QueueError::IdNotFound(_))
        )
    }

    /// Terminal failures: the owning coordinator has shut the session down.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Queue(QueueError::Closed))
    }

    /// The peer went away mid-stream (orderly or not).
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
