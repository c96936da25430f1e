#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `redcat-channel` defines the [`Channel`] trait: a raw, bidirectional byte
//! transport to a remote host. The channel has no framing knowledge; the
//! delimiter protocol in `redcat-protocol` layers sentinel-based framing on
//! top of whatever transport implements this trait.
//!
//! # Design
//!
//! The trait mirrors the small slice of the BSD socket API the protocol layer
//! actually needs: a blocking receive with a settable timeout, a
//! non-destructive peek (used to confirm delimiters split across receive
//! boundaries), and best-effort plus all-or-nothing sends. [`TcpChannel`]
//! implements the trait over [`std::net::TcpStream`]; the `test-support`
//! feature adds `ScriptedChannel`, an in-memory double driven from queued
//! receive chunks.
//!
//! # Invariants
//!
//! - `recv` returning `Ok(0)` means the remote side disconnected, never "no
//!   data right now"; timeouts surface as [`io::ErrorKind::TimedOut`] or
//!   [`io::ErrorKind::WouldBlock`] errors instead.
//! - `peek` never consumes bytes; a subsequent `recv` observes the same data.
//! - Delivery is strict FIFO. The protocol layer's correctness depends on the
//!   absence of reordering.

use std::io;
use std::sync::MutexGuard;
use std::time::Duration;

mod tcp;

#[cfg(feature = "test-support")]
mod scripted;

#[cfg(feature = "test-support")]
pub use crate::scripted::ScriptedChannel;
pub use crate::tcp::TcpChannel;

/// A raw, bidirectional byte transport to a remote host.
///
/// Implementations carry no framing knowledge. All methods operate on the
/// transport's single serial byte stream; callers are responsible for
/// serializing access (see the session layer's channel mutex).
pub trait Channel {
    /// Sends as much of `data` as the transport will accept right now.
    ///
    /// A transport that would block accepts nothing and reports `Ok(0)`;
    /// callers retry. All other errors are fatal to the current operation.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Sends the entire buffer, blocking until it is written.
    fn send_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Receives available bytes into `buf`, blocking up to the configured
    /// timeout.
    ///
    /// Returns `Ok(0)` only on disconnect. An expired timeout surfaces as an
    /// [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::WouldBlock`] error.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Copies pending bytes into `buf` without consuming them.
    ///
    /// Blocks up to the configured timeout for at least one byte. A
    /// subsequent [`recv`](Self::recv) returns the same data.
    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Sets the receive timeout. `None` blocks indefinitely.
    ///
    /// # Errors
    ///
    /// Implementations reject a zero duration with
    /// [`io::ErrorKind::InvalidInput`]; use a small positive timeout to poll.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Returns the currently configured receive timeout.
    fn timeout(&self) -> Option<Duration>;
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).send(data)
    }

    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).send_all(data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).peek(buf)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Option<Duration> {
        (**self).timeout()
    }
}

/// A held lock over a channel is itself a channel.
///
/// The session layer hands out its channel exclusively by locking a mutex;
/// streams keep the guard alive for their whole lifetime, which makes the
/// "one in-flight operation per session" rule structural rather than advisory.
impl<C: Channel> Channel for MutexGuard<'_, C> {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).send(data)
    }

    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).send_all(data)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).recv(buf)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).peek(buf)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Option<Duration> {
        (**self).timeout()
    }
}

/// Reports whether an I/O error represents an expired receive timeout.
///
/// Platforms disagree on whether a timed-out socket read reports
/// [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::WouldBlock`]; the protocol
/// layer treats both as "no more data right now".
#[must_use]
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
