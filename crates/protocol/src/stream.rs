//! File-like byte stream over a still-running remote process.

use std::io::{self, Read, Write};
use std::time::Duration;

use memchr::memmem;
use redcat_channel::{Channel, is_timeout};

use crate::error::FramingError;
use crate::wire;

/// Best-effort termination of an abandoned background reader job.
const KILL_LAST_JOB: &[u8] = b" kill -9 %%\n";

/// How long a read waits for peeked bytes to confirm a delimiter split
/// across receive boundaries before treating the tail as ordinary payload.
const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_millis(500);

/// Access mode of a [`RemoteStream`].
///
/// `binary` records that the remote terminal was placed in raw no-echo mode
/// for this stream, so control bytes travel unmangled; the facade registers
/// the matching restore sequence on the stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamMode {
    read: bool,
    write: bool,
    binary: bool,
}

impl StreamMode {
    /// Read-only stream.
    #[must_use]
    pub const fn read() -> Self {
        Self {
            read: true,
            write: false,
            binary: false,
        }
    }

    /// Write-only stream.
    #[must_use]
    pub const fn write() -> Self {
        Self {
            read: false,
            write: true,
            binary: false,
        }
    }

    /// Marks the stream as binary (raw terminal discipline).
    #[must_use]
    pub const fn binary(mut self) -> Self {
        self.binary = true;
        self
    }

    /// Whether reads are permitted.
    #[must_use]
    pub const fn is_read(&self) -> bool {
        self.read
    }

    /// Whether writes are permitted.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        self.write
    }

    /// Whether the stream carries raw binary data.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.binary
    }
}

impl Default for StreamMode {
    fn default() -> Self {
        Self::read()
    }
}

/// A readable/writable byte stream bound to a remote process still running
/// inside the interactive shell session.
///
/// Reading scans every received chunk for the end delimiter, including
/// delimiters split across receive boundaries, and never returns delimiter
/// bytes as payload. Writing enforces an optional declared length, padding
/// any shortfall with null bytes on close: several write payloads block
/// reading exactly N bytes, and the remote shell does not return control
/// until the count is satisfied.
///
/// The EOF transition is one-way and idempotent. The first transition sends
/// the registered exit command, drains trailing channel output so it cannot
/// leak into the next command's framing, and replays the terminal restore
/// line when the facade placed the terminal in raw mode for this stream.
///
/// The stream owns its channel (typically the session's mutex guard) for its
/// whole lifetime; no other remote interaction may occur while it is open.
#[derive(Debug)]
pub struct RemoteStream<C: Channel> {
    channel: C,
    end_delimiter: Vec<u8>,
    mode: StreamMode,
    eof: bool,
    exit_command: Option<Vec<u8>>,
    restore_command: Option<Vec<u8>>,
    max_length: Option<u64>,
    bytes_transferred: u64,
    confirm_timeout: Duration,
}

impl<C: Channel> RemoteStream<C> {
    /// Creates a stream armed on `end_delimiter`.
    #[must_use]
    pub fn new(channel: C, end_delimiter: Vec<u8>, mode: StreamMode) -> Self {
        debug_assert!(!end_delimiter.is_empty());
        Self {
            channel,
            end_delimiter,
            mode,
            eof: false,
            exit_command: None,
            restore_command: None,
            max_length: None,
            bytes_transferred: 0,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }

    /// Registers bytes sent on the first EOF transition to terminate the
    /// remote process early.
    #[must_use]
    pub fn with_exit_command<B: Into<Vec<u8>>>(mut self, command: B) -> Self {
        let command = command.into();
        self.exit_command = (!command.is_empty()).then_some(command);
        self
    }

    /// Declares the total byte count the write side must deliver.
    #[must_use]
    pub fn with_declared_length(mut self, length: u64) -> Self {
        self.max_length = Some(length);
        self
    }

    /// Registers the raw line replayed at EOF to restore terminal state.
    #[must_use]
    pub fn with_restore_command<B: Into<Vec<u8>>>(mut self, command: B) -> Self {
        self.restore_command = Some(command.into());
        self
    }

    /// Overrides the confirmation window for split-delimiter detection.
    #[must_use]
    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    /// Whether the stream has reached its end delimiter (or was closed).
    #[must_use]
    pub const fn eof(&self) -> bool {
        self.eof
    }

    /// Bytes written to the remote process so far (payload plus padding).
    #[must_use]
    pub const fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// The end delimiter this stream is armed on.
    #[must_use]
    pub fn end_delimiter(&self) -> &[u8] {
        &self.end_delimiter
    }

    /// The stream's access mode.
    #[must_use]
    pub const fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Closes the stream, unwinding remote state. Idempotent.
    ///
    /// Write streams with an unmet declared length pad the remainder with
    /// null bytes first. Read streams abandoned before their delimiter
    /// arrived kill the now-orphaned background job best-effort.
    pub fn close(&mut self) -> io::Result<()> {
        if self.eof {
            return Ok(());
        }

        if self.mode.is_write() {
            if let Some(max) = self.max_length {
                self.pad_to(max)?;
            }
        } else {
            // The background reader is still nominally running; without this
            // it would keep the channel polluted long after we stop caring.
            let _ = self.channel.send_all(KILL_LAST_JOB);
        }

        self.transition_eof()
    }

    /// Reads until the end delimiter, discarding all payload.
    pub fn discard_to_eof(&mut self) -> io::Result<()> {
        let mut sink = [0u8; 4096];
        while !self.eof {
            match self.read(&mut sink) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if is_timeout(&err) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn pad_to(&mut self, max: u64) -> io::Result<()> {
        const ZEROS: [u8; 4096] = [0u8; 4096];
        let mut remaining = max.saturating_sub(self.bytes_transferred);
        while remaining > 0 {
            let n = remaining.min(ZEROS.len() as u64) as usize;
            self.channel.send_all(&ZEROS[..n])?;
            self.bytes_transferred += n as u64;
            remaining -= n as u64;
        }
        Ok(())
    }

    /// One-way EOF transition. Repeated calls after the first are no-ops.
    fn transition_eof(&mut self) -> io::Result<()> {
        if self.eof {
            return Ok(());
        }
        self.eof = true;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            bytes_transferred = self.bytes_transferred,
            "remote stream reached EOF"
        );

        if let Some(exit) = self.exit_command.take() {
            self.channel.send_all(&exit)?;
        }

        wire::flush_output(&mut self.channel)?;

        if let Some(restore) = self.restore_command.take() {
            self.channel.send_all(&restore)?;
            wire::flush_output(&mut self.channel)?;
        }

        Ok(())
    }

    /// Confirms or refutes a delimiter whose prefix ends the received chunk.
    ///
    /// Returns the matched suffix length when the full delimiter is present
    /// (the continuation bytes are consumed from the channel), or `None` when
    /// every candidate suffix is refuted and the tail is ordinary payload.
    fn confirm_split_delimiter(&mut self, chunk: &[u8]) -> io::Result<Option<usize>> {
        let longest = chunk.len().min(self.end_delimiter.len() - 1);
        for i in (1..=longest).rev() {
            if chunk[chunk.len() - i..] != self.end_delimiter[..i] {
                continue;
            }
            let needed = self.end_delimiter.len() - i;
            let pending = wire::peek_at_least(&mut self.channel, needed, self.confirm_timeout)?;
            if pending.len() >= needed && pending[..needed] == self.end_delimiter[i..] {
                wire::recv_exact(&mut self.channel, needed)?;
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

impl<C: Channel> Read for RemoteStream<C> {
    /// Receives available bytes, trimming the end delimiter and everything
    /// after it out of the returned payload.
    ///
    /// Returns `Ok(0)` only at EOF. A disconnect before the delimiter is a
    /// transport error ([`io::ErrorKind::UnexpectedEof`]).
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }

        let received = loop {
            match self.channel.recv(buf) {
                Ok(0) => {
                    return Err(FramingError::Disconnected { received: 0 }.into());
                }
                Ok(n) => break n,
                Err(err) if is_timeout(&err) => {}
                Err(err) => return Err(err),
            }
        };

        if let Some(at) = memmem::find(&buf[..received], &self.end_delimiter) {
            self.transition_eof()?;
            return Ok(at);
        }

        if let Some(matched) = self.confirm_split_delimiter(&buf[..received])? {
            self.transition_eof()?;
            return Ok(received - matched);
        }

        Ok(received)
    }
}

impl<C: Channel> Write for RemoteStream<C> {
    /// Sends payload to the remote process's stdin.
    ///
    /// Writes after EOF are a tolerated no-op (`Ok(0)`), not an error. With a
    /// declared length, payload beyond the remaining budget is truncated and
    /// exhausting the budget triggers the EOF transition. A transport that
    /// would block accepts zero bytes for this call; the caller retries.
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.eof || data.is_empty() {
            return Ok(0);
        }

        let budget = self
            .max_length
            .map(|max| usize::try_from(max.saturating_sub(self.bytes_transferred)).unwrap_or(usize::MAX));
        let capped = budget.map_or(data.len(), |b| b.min(data.len()));
        if capped == 0 {
            self.transition_eof()?;
            return Ok(0);
        }

        let sent = self.channel.send(&data[..capped])?;
        self.bytes_transferred += sent as u64;

        if self.max_length == Some(self.bytes_transferred) {
            self.transition_eof()?;
        }

        Ok(sent)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: Channel> Drop for RemoteStream<C> {
    /// Exception-safe cleanup: closing twice (or unwinding after an explicit
    /// close) must not resend the exit command, raise, or hang.
    fn drop(&mut self) {
        let _ = self.close();
    }
}
