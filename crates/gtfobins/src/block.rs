//! Block-read download loop as an explicit state machine.
//!
//! Some hosts offer no streaming-friendly reader at all, only the ability to
//! run one short command at a time. The block loop reads a file as a series
//! of `dd skip=N count=1 | base64 -w0` invocations, one block per framed
//! command, terminating on the first empty response. The machine itself
//! performs no I/O: a driver (the session layer) feeds command responses in
//! and writes the decoded blocks out, so the request/suspend/resume shape of
//! the protocol lives in plain synchronous control flow.

use std::io;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use redcat_protocol::shell_quote;

/// Default block size, matching the `bs=` argument of the generated command.
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Progress of a [`BlockDownload`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockState {
    /// Waiting for the response to the block at this index.
    AwaitingBlock(u64),
    /// An empty response marked the end of the file.
    Done,
}

/// State machine driving the per-block read loop.
#[derive(Debug)]
pub struct BlockDownload {
    dd_path: String,
    base64_path: String,
    remote_path: String,
    block_size: usize,
    state: BlockState,
    bytes_transferred: u64,
}

impl BlockDownload {
    /// Creates a download of `remote_path` using the resolved `dd` and
    /// `base64` binaries.
    #[must_use]
    pub fn new<D, B, P>(dd_path: D, base64_path: B, remote_path: P) -> Self
    where
        D: Into<String>,
        B: Into<String>,
        P: AsRef<str>,
    {
        Self {
            dd_path: dd_path.into(),
            base64_path: base64_path.into(),
            remote_path: shell_quote(remote_path.as_ref()),
            block_size: DEFAULT_BLOCK_SIZE,
            state: BlockState::AwaitingBlock(0),
            bytes_transferred: 0,
        }
    }

    /// Overrides the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        debug_assert!(block_size > 0);
        self.block_size = block_size;
        self
    }

    /// The command fetching the next block, or `None` once done.
    #[must_use]
    pub fn next_command(&self) -> Option<String> {
        match self.state {
            BlockState::AwaitingBlock(index) => Some(format!(
                "{dd} if={path} bs={bs} skip={index} count=1 2>/dev/null | {b64} -w0",
                dd = self.dd_path,
                path = self.remote_path,
                bs = self.block_size,
                b64 = self.base64_path,
            )),
            BlockState::Done => None,
        }
    }

    /// Feeds the response to the outstanding block command.
    ///
    /// Returns the decoded block, or `None` when an empty (or CR/LF-only)
    /// response marks end of file and the machine transitions to
    /// [`BlockState::Done`].
    ///
    /// # Errors
    ///
    /// [`io::ErrorKind::InvalidData`] when the response is not valid base64.
    pub fn feed_response(&mut self, response: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let BlockState::AwaitingBlock(index) = self.state else {
            return Ok(None);
        };

        let trimmed: Vec<u8> = response
            .iter()
            .copied()
            .filter(|byte| !byte.is_ascii_whitespace())
            .collect();
        if trimmed.is_empty() {
            self.state = BlockState::Done;
            return Ok(None);
        }

        let block = STANDARD
            .decode(&trimmed)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        self.bytes_transferred += block.len() as u64;
        self.state = BlockState::AwaitingBlock(index + 1);
        Ok(Some(block))
    }

    /// Current machine state.
    #[must_use]
    pub const fn state(&self) -> BlockState {
        self.state
    }

    /// Whether the end-of-file response has been observed.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.state, BlockState::Done)
    }

    /// Total decoded bytes produced so far.
    #[must_use]
    pub const fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_loop_decodes_then_terminates_on_empty_response() {
        let mut download = BlockDownload::new("/bin/dd", "/usr/bin/base64", "/tmp/f");
        let mut issued = 0;
        let mut collected = Vec::new();

        while let Some(command) = download.next_command() {
            issued += 1;
            assert!(command.contains("bs=8192"));
            assert!(command.contains(&format!("skip={}", issued - 1)));
            // Scripted responder: one block of data, then end of file.
            let response: &[u8] = if issued == 1 { b"aGVsbG8=" } else { b"" };
            if let Some(block) = download.feed_response(response).expect("decode") {
                collected.extend_from_slice(&block);
            }
        }

        assert_eq!(issued, 2, "exactly two block requests");
        assert_eq!(collected, b"hello");
        assert!(download.is_done());
        assert_eq!(download.bytes_transferred(), 5);
    }

    #[test]
    fn crlf_only_response_terminates() {
        let mut download = BlockDownload::new("dd", "base64", "/tmp/f");
        assert_eq!(download.feed_response(b"\r\n").expect("eof"), None);
        assert!(download.is_done());
        assert_eq!(download.next_command(), None);
    }

    #[test]
    fn block_index_advances_per_response() {
        let mut download =
            BlockDownload::new("dd", "base64", "/tmp/some file").with_block_size(512);

        let first = download.next_command().expect("first command");
        assert!(first.contains("if='/tmp/some file'"));
        assert!(first.contains("bs=512"));
        assert!(first.contains("skip=0"));

        download.feed_response(b"QUJD").expect("block ABC");
        let second = download.next_command().expect("second command");
        assert!(second.contains("skip=1"));
        assert_eq!(download.state(), BlockState::AwaitingBlock(1));
    }

    #[test]
    fn malformed_base64_is_invalid_data() {
        let mut download = BlockDownload::new("dd", "base64", "/tmp/f");
        let err = download
            .feed_response(b"!!!not-base64!!!")
            .expect_err("invalid");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
