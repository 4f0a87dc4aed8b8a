//! Transport-wide constants.
//!
//! Defaults and hard limits for the duplex transport worker, grouped here so
//! the config layer and the worker agree on them.

// ============================================================================
// Buffers
// ============================================================================

/// Default receive buffer capacity in bytes.
///
/// Bounds the bytes delivered by a single `Inbound` event. Peers exchanging
/// small control messages rarely exceed this.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Upper bound accepted for `max_message_size` (16 MB).
pub const MAX_MESSAGE_SIZE_LIMIT: usize = 16 * 1024 * 1024;

// ============================================================================
// Threads
// ============================================================================

/// Name given to the background read thread.
pub const READER_THREAD_NAME: &str = "duplex-reader";

// ============================================================================
// Environment
// ============================================================================

/// Env var overriding `max_message_size`.
pub const ENV_MAX_MESSAGE_SIZE: &str = "DUPLEX_LINK_MAX_MESSAGE_SIZE";

/// Env var overriding `stop_timeout_secs`.
pub const ENV_STOP_TIMEOUT_SECS: &str = "DUPLEX_LINK_STOP_TIMEOUT_SECS";

/// Env var naming a log file for the binary (stderr otherwise).
pub const ENV_LOG_FILE: &str = "DUPLEX_LINK_LOG_FILE";
