//! Error types for crosswire channels.

use thiserror::Error;

use crate::protocol::Identity;

/// Main error type for all channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport-level connect/resolve failure. Fatal to client construction.
    #[error("connect failed: {0}")]
    Connect(std::io::Error),

    /// The peer rejected or mismatched the attach handshake.
    #[error("session attach refused")]
    AttachRefused,

    /// Payload serialization error.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Payload deserialization error.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Malformed frame or header (bad kind byte, oversize declaration, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A response was delivered for a different request than the one awaited.
    #[error("response correlation mismatch: expected {expected}, received {received}")]
    CorrelationMismatch { expected: u64, received: u64 },

    /// No matching response arrived within the configured window.
    ///
    /// The connection stays open; an eventual late response is discarded.
    #[error("timed out waiting for response to request {correlation_id}")]
    Timeout { correlation_id: u64 },

    /// I/O error on the underlying transport. Fatal to the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed while the operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// Provider-side send to an identity with no registered session.
    #[error("no attached session for client {0}")]
    UnknownClient(Identity),

    /// An encoded payload exceeded the configured frame size ceiling.
    ///
    /// The ceiling is fixed at construction; hitting it is a configuration
    /// error, not a recoverable runtime condition.
    #[error("frame payload of {size} bytes exceeds configured maximum {max}")]
    FrameTooLarge { size: usize, max: u32 },

    /// Push onto a worker queue that has been shut down.
    #[error("worker queue is shut down")]
    WorkerShutdown,
}

/// Result type alias using ChannelError.
pub type Result<T> = std::result::Result<T, ChannelError>;
