//! Connected byte-stream endpoints the worker can drive.
//!
//! An endpoint is already connected when it reaches the worker; accepting,
//! dialing and pairing belong to whoever owns the worker. The worker needs
//! three things from it: a blocking read, a full write that can run while a
//! read is blocked, and a close that unblocks that read.
//!
//! Sockets satisfy this through `&Stream: Read + Write`: the kernel keeps the
//! two directions independent, so a shared reference is enough for both halves
//! and no mutex sits between a blocked reader and a writer.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// A connected, bidirectional byte stream.
///
/// Implementations must allow `read` on one thread concurrently with
/// `write_all` on another, and `close` must make a blocked `read` return
/// (with an error or end-of-stream).
pub trait TransportEndpoint: Send + Sync {
    /// Block until at least one byte is available and copy it into `buf`.
    ///
    /// Returns the number of bytes read. `Ok(0)` means the peer closed its side.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole payload to the write side.
    fn write_all(&self, payload: &[u8]) -> io::Result<()>;

    /// Close both directions, unblocking any in-flight `read`.
    fn close(&self) -> io::Result<()>;

    /// Human-readable peer description for logs.
    fn peer_label(&self) -> String {
        "peer".to_owned()
    }
}

#[cfg(unix)]
impl TransportEndpoint for UnixStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut &*self, buf)
    }

    fn write_all(&self, payload: &[u8]) -> io::Result<()> {
        let mut stream = self;
        Write::write_all(&mut stream, payload)?;
        Write::flush(&mut stream)
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn peer_label(&self) -> String {
        match self.peer_addr() {
            Ok(addr) => match addr.as_pathname() {
                Some(path) => format!("unix:{}", path.display()),
                None => "unix:(unnamed)".to_owned(),
            },
            Err(_) => "unix:(unknown)".to_owned(),
        }
    }
}

impl TransportEndpoint for TcpStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut &*self, buf)
    }

    fn write_all(&self, payload: &[u8]) -> io::Result<()> {
        let mut stream = self;
        Write::write_all(&mut stream, payload)?;
        Write::flush(&mut stream)
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }

    fn peer_label(&self) -> String {
        self.peer_addr()
            .map_or_else(|_| "tcp:(unknown)".to_owned(), |addr| format!("tcp:{addr}"))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_unix_stream_read_write() {
        let (a, b) = UnixStream::pair().expect("socketpair");
        TransportEndpoint::write_all(&a, b"ping").expect("write");

        let mut buf = [0u8; 16];
        let n = TransportEndpoint::read(&b, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"ping");
    }

    /// `close` from another thread must release a reader blocked in `read`.
    #[test]
    fn test_close_unblocks_blocked_read() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        let a = std::sync::Arc::new(a);
        let reader = std::sync::Arc::clone(&a);

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 16];
            TransportEndpoint::read(&*reader, &mut buf)
        });

        thread::sleep(Duration::from_millis(50));
        a.close().expect("shutdown");

        // Either EOF or an error is acceptable; what matters is that it returns.
        if let Ok(n) = handle.join().expect("reader thread panicked") {
            assert_eq!(n, 0);
        }
    }

    #[test]
    fn test_unnamed_pair_peer_label() {
        let (a, _b) = UnixStream::pair().expect("socketpair");
        assert_eq!(a.peer_label(), "unix:(unnamed)");
    }

    #[test]
    fn test_tcp_peer_label_includes_address() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).expect("connect");
        let _server = listener.accept().expect("accept");
        assert_eq!(client.peer_label(), format!("tcp:{addr}"));
    }
}
