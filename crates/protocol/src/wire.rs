//! Reader-synchronization helpers over a raw [`Channel`].
//!
//! Everything here operates byte-exactly on the shared serial stream: these
//! helpers are how the delimiter protocol skips stale buffered output, drains
//! shell artifacts, and confirms delimiters split across receive boundaries.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use redcat_channel::{Channel, is_timeout};

use crate::error::FramingError;

/// Timeout slice used while draining pending output.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Timeout slice for each individual peek while confirming a split delimiter.
const PEEK_SLICE: Duration = Duration::from_millis(50);

/// Receives byte-by-byte until the accumulated data ends with `needle`.
///
/// This is the synchronization path (scanning for sentinel lines), not the
/// bulk path; [`RemoteStream`](crate::RemoteStream) moves payload in full
/// receive-sized chunks. With `timeout == None` the call waits indefinitely,
/// riding out per-receive timeouts configured on the channel.
///
/// # Errors
///
/// [`io::ErrorKind::TimedOut`] when the deadline expires first and
/// [`io::ErrorKind::UnexpectedEof`] on disconnect, both carrying a
/// [`FramingError`] payload with the partial read length.
pub fn recv_until<C: Channel>(
    channel: &mut C,
    needle: &[u8],
    timeout: Option<Duration>,
) -> io::Result<Vec<u8>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let saved = channel.timeout();
    let mut result = Vec::new();

    let outcome = loop {
        if result.ends_with(needle) {
            break Ok(());
        }

        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(FramingError::SyncTimeout {
                    needle: needle.to_vec(),
                    received: result.len(),
                });
            }
            if channel.set_timeout(Some(remaining.max(Duration::from_millis(1)))).is_err() {
                // Fall back to whatever timeout is already configured.
            }
        }

        let mut byte = [0u8; 1];
        match channel.recv(&mut byte) {
            Ok(0) => {
                break Err(FramingError::Disconnected {
                    received: result.len(),
                });
            }
            Ok(_) => result.push(byte[0]),
            Err(err) if is_timeout(&err) => {}
            Err(err) => {
                let _ = channel.set_timeout(saved);
                return Err(err);
            }
        }
    };

    let _ = channel.set_timeout(saved);
    outcome.map_err(io::Error::from)?;
    Ok(result)
}

/// Drains whatever is pending on the channel, returning the byte count.
///
/// Used after a command's output has been captured so that trailing shell
/// artifacts do not leak into the next command's framing. Timeouts terminate
/// the drain; they are not errors here.
pub fn flush_output<C: Channel>(channel: &mut C) -> io::Result<usize> {
    let saved = channel.timeout();
    channel.set_timeout(Some(DRAIN_TIMEOUT))?;

    let mut drained = 0;
    let mut buf = [0u8; 4096];
    let outcome = loop {
        match channel.recv(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => drained += n,
            Err(err) if is_timeout(&err) => break Ok(()),
            Err(err) => break Err(err),
        }
    };

    let _ = channel.set_timeout(saved);
    outcome?;
    #[cfg(feature = "tracing")]
    tracing::trace!(drained, "flushed pending channel output");
    Ok(drained)
}

/// Peeks until at least `needed` bytes are pending or `wait` elapses.
///
/// Non-destructive: the returned bytes stay queued on the channel. The result
/// may be shorter than `needed` when the deadline expires first; callers
/// treat that as "the data is not a delimiter continuation right now".
pub fn peek_at_least<C: Channel>(
    channel: &mut C,
    needed: usize,
    wait: Duration,
) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + wait;
    let saved = channel.timeout();
    channel.set_timeout(Some(PEEK_SLICE))?;

    let mut buf = vec![0u8; needed];
    let mut have = 0;
    let outcome = loop {
        match channel.peek(&mut buf) {
            Ok(n) => {
                have = have.max(n);
                if have >= needed {
                    break Ok(());
                }
            }
            Err(err) if is_timeout(&err) => {}
            Err(err) => break Err(err),
        }
        if Instant::now() >= deadline {
            break Ok(());
        }
        // In-memory channels report instantly; avoid spinning hot on them.
        thread::sleep(Duration::from_millis(1));
    };

    let _ = channel.set_timeout(saved);
    outcome?;
    buf.truncate(have);
    Ok(buf)
}

/// Peeks whatever is currently queued, polling until growth stops.
///
/// With `wait_for_data` set, blocks up to `wait` for at least one byte
/// before giving up; otherwise an empty queue returns immediately. The
/// bytes stay queued on the channel either way. Unlike [`peek_at_least`],
/// this returns as soon as one poll shows no growth, which makes it the
/// right shape for prompt sniffing rather than delimiter confirmation.
pub fn peek_pending<C: Channel>(
    channel: &mut C,
    wait_for_data: bool,
    wait: Duration,
) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + wait;
    let saved = channel.timeout();
    channel.set_timeout(Some(PEEK_SLICE))?;

    let mut data = Vec::new();
    let outcome = loop {
        let mut buf = vec![0u8; data.len() + 256];
        match channel.peek(&mut buf) {
            Ok(n) => {
                if n > data.len() {
                    buf.truncate(n);
                    data = buf;
                    continue;
                }
                if !data.is_empty() || !wait_for_data {
                    break Ok(());
                }
            }
            Err(err) if is_timeout(&err) => {
                if !data.is_empty() || !wait_for_data {
                    break Ok(());
                }
            }
            Err(err) => break Err(err),
        }
        if Instant::now() >= deadline {
            break Ok(());
        }
        thread::sleep(Duration::from_millis(1));
    };

    let _ = channel.set_timeout(saved);
    outcome?;
    Ok(data)
}

/// Receives exactly `count` bytes, riding out per-receive timeouts.
///
/// # Errors
///
/// [`io::ErrorKind::UnexpectedEof`] if the channel disconnects first.
pub fn recv_exact<C: Channel>(channel: &mut C, count: usize) -> io::Result<Vec<u8>> {
    let mut out = vec![0u8; count];
    let mut have = 0;
    while have < count {
        match channel.recv(&mut out[have..]) {
            Ok(0) => {
                return Err(FramingError::Disconnected { received: have }.into());
            }
            Ok(n) => have += n,
            Err(err) if is_timeout(&err) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}
