use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::Channel;

/// Callback invoked for every complete line sent through the channel.
///
/// The returned chunks are queued for subsequent receives, preserving their
/// boundaries, so a responder can emulate a remote shell answering commands.
pub type LineResponder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// In-memory [`Channel`] double driven from queued receive chunks.
///
/// Each queued chunk is delivered by at most one `recv` call, which lets
/// tests place delimiter bytes at exact receive boundaries. `peek` sees
/// across chunk boundaries without consuming, matching `MSG_PEEK` semantics
/// over a socket with buffered data.
///
/// An empty queue behaves like an expired receive timeout unless
/// [`disconnect_when_drained`](Self::disconnect_when_drained) was called, in
/// which case it reports an orderly disconnect (`Ok(0)`).
#[derive(Default)]
pub struct ScriptedChannel {
    incoming: VecDeque<Vec<u8>>,
    sent: Vec<u8>,
    pending_line: Vec<u8>,
    responder: Option<LineResponder>,
    disconnect_when_drained: bool,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ScriptedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedChannel")
            .field("queued_chunks", &self.incoming.len())
            .field("sent_bytes", &self.sent.len())
            .field("disconnect_when_drained", &self.disconnect_when_drained)
            .finish_non_exhaustive()
    }
}

impl ScriptedChannel {
    /// Creates an empty scripted channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel pre-loaded with receive chunks.
    #[must_use]
    pub fn with_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        let mut channel = Self::new();
        for chunk in chunks {
            channel.push_chunk(chunk);
        }
        channel
    }

    /// Queues one receive chunk. Its boundary is preserved: a single `recv`
    /// never crosses into the next chunk.
    pub fn push_chunk<B: Into<Vec<u8>>>(&mut self, chunk: B) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.incoming.push_back(chunk);
        }
    }

    /// Installs a responder invoked with every complete sent line (without
    /// its trailing newline). Returned chunks are queued for receiving.
    pub fn respond_with<F>(&mut self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.responder = Some(Box::new(responder));
    }

    /// After the queue drains, report an orderly disconnect instead of a
    /// timeout.
    pub fn disconnect_when_drained(&mut self) {
        self.disconnect_when_drained = true;
    }

    /// All bytes sent through the channel, in order.
    #[must_use]
    pub fn sent(&self) -> &[u8] {
        &self.sent
    }

    /// Number of complete lines sent so far.
    #[must_use]
    pub fn sent_line_count(&self) -> usize {
        self.sent.iter().filter(|&&b| b == b'\n').count()
    }

    fn feed_responder(&mut self, data: &[u8]) {
        let Some(mut responder) = self.responder.take() else {
            return;
        };
        for &byte in data {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.pending_line);
                for chunk in responder(&line) {
                    self.push_chunk(chunk);
                }
            } else {
                self.pending_line.push(byte);
            }
        }
        self.responder = Some(responder);
    }
}

impl Channel for ScriptedChannel {
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.sent.extend_from_slice(data);
        self.feed_responder(data);
        Ok(data.len())
    }

    fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.send(data).map(|_| ())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(front) = self.incoming.front_mut() else {
            if self.disconnect_when_drained {
                return Ok(0);
            }
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "scripted channel drained",
            ));
        };

        let n = front.len().min(buf.len());
        buf[..n].copy_from_slice(&front[..n]);
        if n == front.len() {
            self.incoming.pop_front();
        } else {
            front.drain(..n);
        }
        Ok(n)
    }

    fn peek(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;
        for chunk in &self.incoming {
            if copied == buf.len() {
                break;
            }
            let n = chunk.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&chunk[..n]);
            copied += n;
        }
        Ok(copied)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
