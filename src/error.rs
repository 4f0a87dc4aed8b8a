//! Transport error taxonomy.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by [`DuplexTransportWorker`](crate::DuplexTransportWorker)
/// operations.
///
/// Read failures never appear here: they stay on the read thread and surface
/// only as `ConnectionLost` sink events.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Writing a payload to the endpoint failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    /// Closing the endpoint during stop failed.
    #[error("close failed: {0}")]
    Close(#[source] io::Error),
    /// The read thread could not be spawned.
    #[error("failed to spawn read thread: {0}")]
    Spawn(#[source] io::Error),
    /// `start` was called on a worker that is already running.
    #[error("worker already started")]
    AlreadyStarted,
    /// The worker has been stopped and cannot be restarted.
    #[error("worker stopped")]
    Stopped,
    /// `write` was called with zero bytes.
    #[error("refusing to write an empty payload")]
    EmptyPayload,
    /// The read loop did not exit within the stop timeout.
    #[error("read loop did not exit within {0:?}")]
    StopTimeout(Duration),
    /// A configuration value was out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Convenience alias for transport results.
pub type Result<T> = std::result::Result<T, TransportError>;
