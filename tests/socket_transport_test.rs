// Integration tests for the duplex transport worker over real sockets
//
// These tests verify that:
// 1. Bytes written by the peer arrive as Inbound events, bounded by max_message_size
// 2. Worker writes reach the peer and are echoed as Outbound events
// 3. Peer hang-up is reported as exactly one ConnectionLost(None)
// 4. stop() unblocks a blocked socket read without reporting a loss
// 5. Two workers can talk to each other over TCP loopback

#[cfg(unix)]
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use duplex_link::{
    Config, DuplexTransportWorker, OwnedTransportEvent, TransportError, TransportEventSink,
    WorkerState,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

type ChannelWorker<E> = DuplexTransportWorker<E, Sender<OwnedTransportEvent>>;

/// Start a worker on `endpoint` that reports into a fresh channel.
fn start_worker<E: duplex_link::TransportEndpoint + 'static>(
    endpoint: E,
    config: &Config,
) -> (ChannelWorker<E>, Receiver<OwnedTransportEvent>) {
    let (tx, rx) = mpsc::channel();
    let worker = DuplexTransportWorker::new(endpoint, Arc::new(tx), config).expect("valid config");
    worker.start().expect("start worker");
    (worker, rx)
}

/// Collect inbound bytes until `expected` bytes have arrived.
fn collect_inbound(rx: &Receiver<OwnedTransportEvent>, expected: usize, max_chunk: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < expected {
        match rx.recv_timeout(EVENT_TIMEOUT).expect("inbound event") {
            OwnedTransportEvent::Inbound(chunk) => {
                assert!(!chunk.is_empty(), "inbound chunks are never empty");
                assert!(chunk.len() <= max_chunk, "chunk of {} exceeds {max_chunk}", chunk.len());
                received.extend_from_slice(&chunk);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    received
}

#[cfg(unix)]
#[test]
fn test_peer_bytes_arrive_as_inbound() {
    let (local, mut peer) = UnixStream::pair().expect("socketpair");
    let (worker, rx) = start_worker(local, &Config::default());

    peer.write_all(b"hello worker").expect("peer write");

    let received = collect_inbound(&rx, 12, worker.max_message_size());
    assert_eq!(received, b"hello worker");
    worker.stop().expect("stop");
}

#[cfg(unix)]
#[test]
fn test_inbound_chunks_bounded_by_max_message_size() {
    let config = Config { max_message_size: 64, ..Config::default() };
    let (local, mut peer) = UnixStream::pair().expect("socketpair");
    let (worker, rx) = start_worker(local, &config);

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    peer.write_all(&payload).expect("peer write");

    let received = collect_inbound(&rx, payload.len(), 64);
    assert_eq!(received, payload);
    worker.stop().expect("stop");
}

#[cfg(unix)]
#[test]
fn test_write_reaches_peer_and_echoes_outbound() {
    let (local, mut peer) = UnixStream::pair().expect("socketpair");
    let (worker, rx) = start_worker(local, &Config::default());

    worker.write(&[0x01, 0x02]).expect("write");

    assert_eq!(
        rx.recv_timeout(EVENT_TIMEOUT).expect("event"),
        OwnedTransportEvent::Outbound(vec![0x01, 0x02])
    );
    let mut buf = [0u8; 2];
    peer.read_exact(&mut buf).expect("peer read");
    assert_eq!(buf, [0x01, 0x02]);
    worker.stop().expect("stop");
}

#[cfg(unix)]
#[test]
fn test_peer_hangup_reports_connection_lost_once() {
    let (local, peer) = UnixStream::pair().expect("socketpair");
    let (worker, rx) = start_worker(local, &Config::default());

    drop(peer);

    assert_eq!(
        rx.recv_timeout(EVENT_TIMEOUT).expect("event"),
        OwnedTransportEvent::ConnectionLost(None)
    );
    assert!(worker.wait_until_stopped(EVENT_TIMEOUT));
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err(), "no events after loss");
    worker.stop().expect("stop after loss");
}

#[cfg(unix)]
#[test]
fn test_stop_unblocks_socket_read_silently() {
    let (local, mut peer) = UnixStream::pair().expect("socketpair");
    let (worker, rx) = start_worker(local, &Config::default());

    worker.stop().expect("stop");
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(rx.try_recv().is_err(), "stop must not report a connection loss");

    // The peer sees the shutdown as end-of-stream.
    let mut buf = [0u8; 8];
    assert_eq!(peer.read(&mut buf).expect("peer read"), 0);
}

#[cfg(unix)]
#[test]
fn test_write_after_stop_fails_without_event() {
    let (local, _peer) = UnixStream::pair().expect("socketpair");
    let (worker, rx) = start_worker(local, &Config::default());
    worker.stop().expect("stop");

    let result = worker.write(b"too late");
    assert!(matches!(result, Err(TransportError::Write(_))), "got {result:?}");
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_two_workers_over_tcp_loopback() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let client = TcpStream::connect(addr).expect("connect");
    let (server, _) = listener.accept().expect("accept");

    let (client_worker, client_rx) = start_worker(client, &Config::default());
    let (server_worker, server_rx) = start_worker(server, &Config::default());
    assert!(client_worker.peer().starts_with("tcp:"));

    client_worker.write(b"ping").expect("client write");
    assert_eq!(
        client_rx.recv_timeout(EVENT_TIMEOUT).expect("echo"),
        OwnedTransportEvent::Outbound(b"ping".to_vec())
    );
    assert_eq!(collect_inbound(&server_rx, 4, 1024), b"ping");

    server_worker.write(b"pong").expect("server write");
    assert_eq!(
        server_rx.recv_timeout(EVENT_TIMEOUT).expect("echo"),
        OwnedTransportEvent::Outbound(b"pong".to_vec())
    );
    assert_eq!(collect_inbound(&client_rx, 4, 1024), b"pong");

    // Stopping one side shows up as a loss on the other.
    client_worker.stop().expect("client stop");
    assert_eq!(
        server_rx.recv_timeout(EVENT_TIMEOUT).expect("loss"),
        OwnedTransportEvent::ConnectionLost(None)
    );
    server_worker.stop().expect("server stop");
}

#[cfg(unix)]
#[test]
fn test_dyn_sink_shared_with_owner() {
    let (tx, rx) = mpsc::channel::<OwnedTransportEvent>();
    let sink: Arc<dyn TransportEventSink> = Arc::new(tx);
    let (local, mut peer) = UnixStream::pair().expect("socketpair");

    let worker = DuplexTransportWorker::new(local, Arc::clone(&sink), &Config::default())
        .expect("valid config");
    worker.start().expect("start");

    peer.write_all(b"via dyn").expect("peer write");
    assert_eq!(collect_inbound(&rx, 7, 1024), b"via dyn");

    worker.stop().expect("stop");
    // The owner's handle outlives the worker.
    drop(worker);
    assert_eq!(Arc::strong_count(&sink), 1);
}
