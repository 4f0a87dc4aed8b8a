//! Duplex transport worker: one blocking read thread, synchronous writes,
//! cooperative stop.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──start()──► Running ──stop()──► StopRequested ──loop exits──► Stopped
//!                       │                                                ▲
//!                       └──────── read failure / peer EOF ───────────────┘
//! ```
//!
//! `stop()` flips the state *before* closing the endpoint, so the read that
//! the close unblocks is recognised as expected and produces no
//! `ConnectionLost`. It then waits on a condition variable until the loop has
//! published `Stopped`, and joins the thread.
//!
//! # Threads
//!
//! - **Read thread** (`duplex-reader`): owns the receive buffer, delivers
//!   `Inbound` and read-side `ConnectionLost`.
//! - **Callers**: `write` delivers `Outbound` / write-side `ConnectionLost` on
//!   the calling thread; `stop` blocks the calling thread.
//!
//! Writes are not serialized against each other. Callers that write from
//! several threads must order them externally.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::config::Config;
use crate::constants::READER_THREAD_NAME;
use crate::endpoint::TransportEndpoint;
use crate::error::{Result, TransportError};
use crate::sink::{TransportEvent, TransportEventSink};

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Reading (or ready to read once started). Failures are reported.
    Running,
    /// `stop` has been requested; the read loop has not exited yet.
    StopRequested,
    /// The read loop has exited. Terminal.
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::StopRequested => write!(f, "stop-requested"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ── Lifecycle ──────────────────────────────────────────────────────────────

/// State shared between the worker handle and its read thread.
#[derive(Debug)]
struct Lifecycle {
    inner: Mutex<LifecycleInner>,
    /// Signalled when `state` becomes `Stopped`.
    exited: Condvar,
}

#[derive(Debug)]
struct LifecycleInner {
    state: WorkerState,
    started: bool,
    /// Set by the first `stop`; later calls only wait.
    stop_called: bool,
    reader: Option<JoinHandle<()>>,
    reader_id: Option<ThreadId>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                state: WorkerState::Running,
                started: false,
                stop_called: false,
                reader: None,
                reader_id: None,
            }),
            exited: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> WorkerState {
        self.lock().state
    }

    fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    fn stop_called(&self) -> bool {
        self.lock().stop_called
    }

    fn mark_stopped(&self) {
        self.lock().state = WorkerState::Stopped;
        self.exited.notify_all();
    }

    /// Block until `Stopped`. Returns `false` if `timeout` elapsed first.
    fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        let guard = self.lock();
        match timeout {
            None => {
                let _guard = self
                    .exited
                    .wait_while(guard, |inner| inner.state != WorkerState::Stopped)
                    .unwrap_or_else(PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (_guard, result) = self
                    .exited
                    .wait_timeout_while(guard, timeout, |inner| {
                        inner.state != WorkerState::Stopped
                    })
                    .unwrap_or_else(PoisonError::into_inner);
                !result.timed_out()
            }
        }
    }
}

// ── Worker ─────────────────────────────────────────────────────────────────

/// Moves byte payloads between a connected endpoint and an event sink.
///
/// The worker exclusively owns the endpoint: nothing else may close it. The
/// sink is shared with the owner, which keeps its own `Arc` to it.
///
/// All operations take `&self`, so the worker can be shared in an `Arc`
/// between a writer thread and whoever decides to stop it.
pub struct DuplexTransportWorker<E, S>
where
    E: TransportEndpoint + 'static,
    S: TransportEventSink + ?Sized + 'static,
{
    endpoint: Arc<E>,
    sink: Arc<S>,
    lifecycle: Arc<Lifecycle>,
    max_message_size: usize,
    peer: String,
}

impl<E, S> std::fmt::Debug for DuplexTransportWorker<E, S>
where
    E: TransportEndpoint + 'static,
    S: TransportEventSink + ?Sized + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexTransportWorker")
            .field("peer", &self.peer)
            .field("state", &self.lifecycle.state())
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

impl<E, S> DuplexTransportWorker<E, S>
where
    E: TransportEndpoint + 'static,
    S: TransportEventSink + ?Sized + 'static,
{
    /// Wrap a connected endpoint. Nothing is read until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] if `config` fails validation.
    pub fn new(endpoint: E, sink: Arc<S>, config: &Config) -> Result<Self> {
        config.validate()?;
        let peer = endpoint.peer_label();
        log::debug!(
            "[Transport] Created worker for {} (max_message_size={})",
            peer,
            config.max_message_size
        );
        Ok(Self {
            endpoint: Arc::new(endpoint),
            sink,
            lifecycle: Arc::new(Lifecycle::new()),
            max_message_size: config.max_message_size,
            peer,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Receive buffer capacity.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Peer description used in log lines.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Spawn the background read loop.
    ///
    /// # Errors
    ///
    /// - [`TransportError::AlreadyStarted`] on a second call.
    /// - [`TransportError::Stopped`] after `stop` (workers do not restart).
    /// - [`TransportError::Spawn`] if the OS refuses the thread.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lifecycle.lock();
        if inner.stop_called || inner.state != WorkerState::Running {
            return Err(TransportError::Stopped);
        }
        if inner.started {
            return Err(TransportError::AlreadyStarted);
        }

        let endpoint = Arc::clone(&self.endpoint);
        let sink = Arc::clone(&self.sink);
        let lifecycle = Arc::clone(&self.lifecycle);
        let capacity = self.max_message_size;
        let peer = self.peer.clone();

        let handle = thread::Builder::new()
            .name(READER_THREAD_NAME.to_owned())
            .spawn(move || read_loop(&*endpoint, &*sink, &lifecycle, capacity, &peer))
            .map_err(TransportError::Spawn)?;

        inner.started = true;
        inner.reader_id = Some(handle.thread().id());
        inner.reader = Some(handle);
        Ok(())
    }

    /// Write `payload` to the peer, blocking until it is fully written.
    ///
    /// On success an `Outbound` event echoes the payload to the sink. On
    /// failure a `ConnectionLost` event carries the payload so the owner can
    /// decide whether to resend it. Neither event is delivered once `stop` has
    /// been called; a read-side loss does not suppress them. A failed write
    /// does not stop the read loop.
    ///
    /// # Errors
    ///
    /// - [`TransportError::EmptyPayload`] for a zero-length payload (nothing is
    ///   written or reported).
    /// - [`TransportError::Write`] when the endpoint write fails.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }

        match self.endpoint.write_all(payload) {
            Ok(()) => {
                if !self.lifecycle.stop_called() {
                    self.sink.deliver(TransportEvent::Outbound { payload });
                }
                Ok(())
            }
            Err(e) => {
                if !self.lifecycle.stop_called() {
                    log::error!("[Transport] Write to {} failed: {e}", self.peer);
                    self.sink.deliver(TransportEvent::ConnectionLost {
                        payload: Some(payload),
                    });
                } else {
                    log::debug!("[Transport] Write to {} after stop failed: {e}", self.peer);
                }
                Err(TransportError::Write(e))
            }
        }
    }

    /// Stop the worker and wait for the read loop to exit.
    ///
    /// Requests the stop, closes the endpoint to unblock the in-flight read,
    /// then blocks until the loop has exited. Only the first call closes the
    /// endpoint; later calls just wait for the same exit.
    ///
    /// Called from the read thread itself (from inside a sink callback), it
    /// requests the stop and closes the endpoint but does not wait.
    ///
    /// # Errors
    ///
    /// [`TransportError::Close`] if closing the endpoint failed. The wait for
    /// loop exit still happens first. If the close leaves the read blocked,
    /// this call never returns; use [`stop_timeout`](Self::stop_timeout) when
    /// the endpoint cannot guarantee that a failed close still releases it.
    pub fn stop(&self) -> Result<()> {
        self.shutdown(None)
    }

    /// Like [`stop`](Self::stop), but wait at most `timeout` for loop exit.
    ///
    /// On timeout the read thread is detached and left to exit on its own.
    ///
    /// # Errors
    ///
    /// [`TransportError::StopTimeout`] if the loop was still running when the
    /// timeout elapsed, otherwise as for `stop`.
    pub fn stop_timeout(&self, timeout: Duration) -> Result<()> {
        self.shutdown(Some(timeout))
    }

    /// Block until the read loop has exited, for at most `timeout`.
    ///
    /// Returns `true` once the worker is `Stopped`. Useful after a read-side
    /// `ConnectionLost` or a stop requested from inside the sink.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        self.lifecycle.wait_stopped(Some(timeout))
    }

    fn shutdown(&self, timeout: Option<Duration>) -> Result<()> {
        let reader = {
            let mut inner = self.lifecycle.lock();
            if inner.stop_called {
                let on_reader = inner.reader_id == Some(thread::current().id());
                drop(inner);
                return if on_reader { Ok(()) } else { self.await_exit(timeout) };
            }
            inner.stop_called = true;
            if !inner.started {
                // No loop to wait for.
                inner.state = WorkerState::Stopped;
            } else if inner.state == WorkerState::Running {
                inner.state = WorkerState::StopRequested;
            }
            inner.reader.take()
        };
        log::debug!("[Transport] Stop requested for {}", self.peer);

        let closed = self.endpoint.close();
        if let Err(e) = &closed {
            log::error!("[Transport] Close of {} failed: {e}", self.peer);
        }

        if let Some(handle) = reader {
            if handle.thread().id() == thread::current().id() {
                log::debug!("[Transport] Stop called from read thread, not waiting");
            } else {
                self.await_exit(timeout)?;
                if handle.join().is_err() {
                    log::error!("[Transport] Read thread for {} panicked", self.peer);
                }
            }
        }

        closed.map_err(TransportError::Close)
    }

    fn await_exit(&self, timeout: Option<Duration>) -> Result<()> {
        if self.lifecycle.wait_stopped(timeout) {
            return Ok(());
        }
        let waited = timeout.unwrap_or_default();
        log::warn!(
            "[Transport] Read loop for {} still running after {:?}, detaching",
            self.peer,
            waited
        );
        Err(TransportError::StopTimeout(waited))
    }
}

impl<E, S> Drop for DuplexTransportWorker<E, S>
where
    E: TransportEndpoint + 'static,
    S: TransportEventSink + ?Sized + 'static,
{
    fn drop(&mut self) {
        let needs_stop = {
            let inner = self.lifecycle.lock();
            inner.started && !inner.stop_called
        };
        if needs_stop {
            if let Err(e) = self.stop() {
                log::warn!("[Transport] Stop on drop for {} failed: {e}", self.peer);
            }
        }
    }
}

// ── Read loop ──────────────────────────────────────────────────────────────

/// Background read loop — runs on the dedicated read thread.
///
/// Exits on the first read failure. Whether that failure is reported depends
/// on the state observed when the read returns: `Running` means the peer or
/// the link failed, anything else means `stop` closed the endpoint.
fn read_loop<E, S>(endpoint: &E, sink: &S, lifecycle: &Lifecycle, capacity: usize, peer: &str)
where
    E: TransportEndpoint + ?Sized,
    S: TransportEventSink + ?Sized,
{
    // Publish `Stopped` even if the sink panics, or `stop` would wait forever.
    scopeguard::defer! {
        lifecycle.mark_stopped();
    }

    log::info!("[Transport] Read loop started for {peer}");
    let mut buffer = vec![0u8; capacity];

    loop {
        let result = match endpoint.read(&mut buffer) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => other,
        };

        match result {
            Ok(n) => {
                if !lifecycle.is_running() {
                    log::debug!("[Transport] Discarding {n} bytes from {peer} read during stop");
                    break;
                }
                sink.deliver(TransportEvent::Inbound {
                    byte_count: n,
                    buffer: &buffer[..n],
                });
            }
            Err(e) => {
                if lifecycle.is_running() {
                    log::error!("[Transport] Disconnected from {peer}, read failed: {e}");
                    sink.deliver(TransportEvent::ConnectionLost { payload: None });
                } else {
                    log::debug!("[Transport] Read from {peer} ended by stop: {e}");
                }
                break;
            }
        }
    }

    log::info!("[Transport] Read loop for {peer} exiting");
}

// ─── Tests ─────────────────────────────────────────────────────────────────
