//! duplex-link - point-to-point duplex transport worker.
//!
//! Moves opaque byte payloads between an already-connected peer socket and an
//! application-supplied event sink.
//!
//! # Architecture
//!
//! ```text
//! connected endpoint ──► DuplexTransportWorker ──► TransportEventSink
//!   (UnixStream,            │ read thread: Inbound / ConnectionLost
//!    TcpStream, ...)        │ write():     Outbound / ConnectionLost(payload)
//!                           └ stop():      close + wait for read thread
//! ```
//!
//! Connection setup, framing above raw bytes, and reconnection policy belong
//! to the owner of the worker.
//!
//! # Modules
//!
//! - [`worker`] - the worker and its lifecycle
//! - [`endpoint`] - the endpoint trait and socket implementations
//! - [`sink`] - event types and sink implementations
//! - [`config`] - configuration loading/saving
//! - [`error`] - error type

pub mod config;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod sink;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use endpoint::TransportEndpoint;
pub use error::TransportError;
pub use sink::{OwnedTransportEvent, TransportEvent, TransportEventSink};
pub use worker::{DuplexTransportWorker, WorkerState};
