use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::Channel;

/// [`Channel`] implementation over a connected TCP socket.
///
/// Both reverse-shell directions are supported: [`TcpChannel::connect`] dials
/// a listening remote, while [`TcpChannel::listen`] accepts a single inbound
/// connection. The write half stays blocking; only the read half honours the
/// configured timeout, so [`Channel::send`] reports `Ok(0)` solely when the
/// kernel buffer refuses the write without blocking.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    timeout: Option<Duration>,
    peer: SocketAddr,
}

impl TcpChannel {
    /// Connects to a remote listener.
    ///
    /// # Errors
    ///
    /// Propagates resolution and connection failures from the OS.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    /// Binds `addr` and blocks until one inbound connection arrives.
    ///
    /// # Errors
    ///
    /// Propagates bind and accept failures from the OS.
    pub fn listen<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let (stream, _) = listener.accept()?;
        Self::from_stream(stream)
    }

    /// Wraps an already-connected stream.
    ///
    /// # Errors
    ///
    /// Fails when the peer address cannot be queried, which indicates the
    /// stream is not actually connected.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            timeout: None,
            peer,
        })
    }

    /// Returns the remote peer address.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Channel for TcpChannel {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.stream.write(data) {
            Ok(n) => Ok(n),
            Err(err) if crate::is_timeout(&err) => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(feature = "tracing")]
        tracing::trace!(peer = %self.peer, capacity = buf.len(), "recv");
        self.stream.read(buf)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.peek(buf)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        if timeout == Some(Duration::ZERO) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero receive timeout; use a small positive duration to poll",
            ));
        }
        self.stream.set_read_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (TcpChannel, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let remote = thread::spawn(move || listener.accept().expect("accept").0);
        let local = TcpChannel::connect(addr).expect("connect");
        (local, remote.join().expect("accept thread"))
    }

    #[test]
    fn recv_observes_peeked_bytes() {
        let (mut channel, mut remote) = pair();
        remote.write_all(b"payload").expect("remote write");

        let mut peeked = [0u8; 7];
        let n = channel.peek(&mut peeked).expect("peek");
        assert_eq!(&peeked[..n], &b"payload"[..n]);

        let mut buf = [0u8; 16];
        let n = channel.recv(&mut buf).expect("recv");
        assert_eq!(&buf[..n], b"payload");
    }

    #[test]
    fn recv_times_out_when_no_data_pending() {
        let (mut channel, _remote) = pair();
        channel
            .set_timeout(Some(Duration::from_millis(20)))
            .expect("set timeout");

        let mut buf = [0u8; 4];
        let err = channel.recv(&mut buf).expect_err("must time out");
        assert!(crate::is_timeout(&err), "unexpected kind: {:?}", err.kind());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let (mut channel, _remote) = pair();
        let err = channel
            .set_timeout(Some(Duration::ZERO))
            .expect_err("zero timeout must be rejected");
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn recv_reports_disconnect_as_zero() {
        let (mut channel, remote) = pair();
        drop(remote);

        let mut buf = [0u8; 4];
        assert_eq!(channel.recv(&mut buf).expect("recv"), 0);
    }
}
