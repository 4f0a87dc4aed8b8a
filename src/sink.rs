//! Transport event reporting.
//!
//! The worker never returns data to its owner directly. Every inbound read,
//! every successful write and every detected connection loss is pushed into a
//! [`TransportEventSink`] supplied by the owner.
//!
//! # Sinks
//!
//! ```text
//! read thread ──Inbound──────────┐
//! write caller ─Outbound─────────┼──► TransportEventSink::deliver
//! either ───────ConnectionLost───┘        │
//!                                          ├── closure (Fn(TransportEvent))
//!                                          ├── std::sync::mpsc::Sender
//!                                          └── tokio::sync::mpsc::UnboundedSender
//! ```
//!
//! `Inbound` borrows the worker's receive buffer, which is reused on the next
//! read. Channel sinks copy it via [`TransportEvent::into_owned`]; closure sinks
//! must copy whatever they keep.

/// A single event reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent<'a> {
    /// One successful read. `buffer` holds exactly `byte_count` valid bytes.
    Inbound {
        /// Number of bytes read.
        byte_count: usize,
        /// The valid portion of the receive buffer.
        buffer: &'a [u8],
    },
    /// One successful write, echoed back so the owner can log what went out.
    Outbound {
        /// The bytes written.
        payload: &'a [u8],
    },
    /// The channel is considered dead.
    ///
    /// `payload` is the write that failed when loss was detected on the write
    /// side, `None` when it was detected by the read loop.
    ConnectionLost {
        /// The undelivered write, if any.
        payload: Option<&'a [u8]>,
    },
}

impl TransportEvent<'_> {
    /// Copy the event out of the worker's buffers.
    pub fn into_owned(self) -> OwnedTransportEvent {
        match self {
            Self::Inbound { buffer, .. } => OwnedTransportEvent::Inbound(buffer.to_vec()),
            Self::Outbound { payload } => OwnedTransportEvent::Outbound(payload.to_vec()),
            Self::ConnectionLost { payload } => {
                OwnedTransportEvent::ConnectionLost(payload.map(<[u8]>::to_vec))
            }
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inbound { .. } => "inbound",
            Self::Outbound { .. } => "outbound",
            Self::ConnectionLost { .. } => "connection_lost",
        }
    }
}

/// An owned copy of a [`TransportEvent`], safe to queue across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnedTransportEvent {
    /// Bytes read from the peer. The length is the inbound byte count.
    Inbound(Vec<u8>),
    /// Bytes written to the peer.
    Outbound(Vec<u8>),
    /// Connection loss, with the failed write when detected on the write side.
    ConnectionLost(Option<Vec<u8>>),
}

/// Receiver of worker events.
///
/// Called from the read thread (`Inbound`, read-side `ConnectionLost`) and
/// from whichever thread calls `write` (`Outbound`, write-side
/// `ConnectionLost`). Implementations must be thread-safe and must not block
/// for long: the read loop does not read again until `deliver` returns.
pub trait TransportEventSink: Send + Sync {
    /// Report one event.
    fn deliver(&self, event: TransportEvent<'_>);
}

impl<F> TransportEventSink for F
where
    F: Fn(TransportEvent<'_>) + Send + Sync,
{
    fn deliver(&self, event: TransportEvent<'_>) {
        self(event);
    }
}

impl TransportEventSink for std::sync::mpsc::Sender<OwnedTransportEvent> {
    fn deliver(&self, event: TransportEvent<'_>) {
        if self.send(event.into_owned()).is_err() {
            log::debug!("[Sink] receiver dropped, discarding {} event", event.kind());
        }
    }
}

impl TransportEventSink for tokio::sync::mpsc::UnboundedSender<OwnedTransportEvent> {
    fn deliver(&self, event: TransportEvent<'_>) {
        if self.send(event.into_owned()).is_err() {
            log::debug!("[Sink] receiver dropped, discarding {} event", event.kind());
        }
    }
}
