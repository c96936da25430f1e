//! Incremental codec adapters around a raw remote stream.
//!
//! Encoded stream modes move binary data through the text-oriented shell as
//! base64 or hex. The adapters here decode on read and encode on write,
//! buffering until full encoded units are available, tolerating the CR/LF
//! the remote terminal injects, and reporting source-byte counts on the
//! write path so standard `io::Write` composition works.

use std::io::{self, Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::capability::Stream;

/// Column width for base64 text written to the remote process.
const BASE64_LINE_WIDTH: usize = 76;

/// Column width for hex text written to the remote process.
const HEX_LINE_WIDTH: usize = 60;

/// A payload byte that cannot survive line printing.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("non-printable byte 0x{byte:02x} at offset {offset} cannot traverse a print-mode payload")]
pub struct PrintabilityError {
    /// The offending byte.
    pub byte: u8,
    /// Its offset within the rejected buffer.
    pub offset: usize,
}

/// Verifies that `data` round-trips through terminal line printing.
///
/// Print-mode write methods carry literal text; anything outside tab,
/// newline, carriage return, and the printable ASCII range would corrupt the
/// remote shell state, so it is rejected before a single byte is sent.
pub fn ensure_printable(data: &[u8]) -> Result<(), PrintabilityError> {
    for (offset, &byte) in data.iter().enumerate() {
        if !matches!(byte, b'\t' | b'\n' | b'\r' | 0x20..=0x7e) {
            return Err(PrintabilityError { byte, offset });
        }
    }
    Ok(())
}

fn invalid_data<E: Into<Box<dyn std::error::Error + Send + Sync>>>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Streaming base64 decoder over a reader.
///
/// Buffers incoming text until whole 4-character units are available and
/// decodes them incrementally; whitespace the terminal adds is skipped. A
/// truncated trailing unit at end of stream is malformed input.
#[derive(Debug)]
pub struct Base64Decoder<R> {
    inner: R,
    encoded: Vec<u8>,
    decoded: Vec<u8>,
    cursor: usize,
    exhausted: bool,
}

impl<R: Read> Base64Decoder<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            encoded: Vec::new(),
            decoded: Vec::new(),
            cursor: 0,
            exhausted: false,
        }
    }

    /// The wrapped reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 4096];
        let n = self.inner.read(&mut chunk)?;
        if n == 0 {
            self.exhausted = true;
            if !self.encoded.is_empty() {
                if self.encoded.len() % 4 != 0 {
                    return Err(invalid_data("truncated base64 stream"));
                }
                let tail = STANDARD.decode(&self.encoded).map_err(invalid_data)?;
                self.decoded.extend_from_slice(&tail);
                self.encoded.clear();
            }
            return Ok(());
        }

        self.encoded.extend(
            chunk[..n]
                .iter()
                .filter(|byte| !byte.is_ascii_whitespace()),
        );
        let complete = self.encoded.len() / 4 * 4;
        if complete > 0 {
            let data = STANDARD
                .decode(&self.encoded[..complete])
                .map_err(invalid_data)?;
            self.decoded.extend_from_slice(&data);
            self.encoded.drain(..complete);
        }
        Ok(())
    }
}

impl<R: Read> Read for Base64Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.cursor < self.decoded.len() {
                let n = (self.decoded.len() - self.cursor).min(buf.len());
                buf[..n].copy_from_slice(&self.decoded[self.cursor..self.cursor + n]);
                self.cursor += n;
                if self.cursor == self.decoded.len() {
                    self.decoded.clear();
                    self.cursor = 0;
                }
                return Ok(n);
            }
            if self.exhausted {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

/// Streaming base64 encoder over a writer.
///
/// Encodes whole 3-byte groups as they arrive, wrapping output at 76 columns,
/// and reports source-byte counts so callers account payload bytes rather
/// than encoded bytes. [`finish`](Self::finish) emits the padded final group.
#[derive(Debug)]
pub struct Base64Encoder<W: Write> {
    inner: W,
    carry: Vec<u8>,
    column: usize,
    finished: bool,
}

impl<W: Write> Base64Encoder<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            carry: Vec::new(),
            column: 0,
            finished: false,
        }
    }

    /// The wrapped writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    fn write_wrapped(&mut self, text: &str) -> io::Result<()> {
        let mut rest = text.as_bytes();
        while !rest.is_empty() {
            let room = BASE64_LINE_WIDTH - self.column;
            let take = room.min(rest.len());
            self.inner.write_all(&rest[..take])?;
            self.column += take;
            rest = &rest[take..];
            if self.column == BASE64_LINE_WIDTH {
                self.inner.write_all(b"\n")?;
                self.column = 0;
            }
        }
        Ok(())
    }

    /// Encodes and writes the buffered final group, terminating the output
    /// line. Idempotent.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        if !self.carry.is_empty() {
            let tail = STANDARD.encode(std::mem::take(&mut self.carry));
            self.write_wrapped(&tail)?;
        }
        if self.column > 0 {
            self.inner.write_all(b"\n")?;
            self.column = 0;
        }
        self.inner.flush()?;
        self.finished = true;
        Ok(())
    }
}

impl<W: Write> Write for Base64Encoder<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.finished || data.is_empty() {
            return Ok(0);
        }
        let mut pending = std::mem::take(&mut self.carry);
        pending.extend_from_slice(data);
        let complete = pending.len() / 3 * 3;
        self.carry = pending.split_off(complete);
        if complete > 0 {
            let text = STANDARD.encode(&pending);
            self.write_wrapped(&text)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Drop for Base64Encoder<W> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Streaming hex decoder over a reader; the 2-character analogue of
/// [`Base64Decoder`].
#[derive(Debug)]
pub struct HexDecoder<R> {
    inner: R,
    encoded: Vec<u8>,
    decoded: Vec<u8>,
    cursor: usize,
    exhausted: bool,
}

impl<R: Read> HexDecoder<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            encoded: Vec::new(),
            decoded: Vec::new(),
            cursor: 0,
            exhausted: false,
        }
    }

    /// The wrapped reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    fn decode_pairs(&mut self, upto: usize) -> io::Result<()> {
        for pair in self.encoded[..upto].chunks_exact(2) {
            let high = hex_value(pair[0]).ok_or_else(|| invalid_data("invalid hex digit"))?;
            let low = hex_value(pair[1]).ok_or_else(|| invalid_data("invalid hex digit"))?;
            self.decoded.push((high << 4) | low);
        }
        self.encoded.drain(..upto);
        Ok(())
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 4096];
        let n = self.inner.read(&mut chunk)?;
        if n == 0 {
            self.exhausted = true;
            if !self.encoded.is_empty() {
                return Err(invalid_data("truncated hex stream"));
            }
            return Ok(());
        }
        self.encoded.extend(
            chunk[..n]
                .iter()
                .filter(|byte| !byte.is_ascii_whitespace()),
        );
        let complete = self.encoded.len() / 2 * 2;
        if complete > 0 {
            self.decode_pairs(complete)?;
        }
        Ok(())
    }
}

impl<R: Read> Read for HexDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.cursor < self.decoded.len() {
                let n = (self.decoded.len() - self.cursor).min(buf.len());
                buf[..n].copy_from_slice(&self.decoded[self.cursor..self.cursor + n]);
                self.cursor += n;
                if self.cursor == self.decoded.len() {
                    self.decoded.clear();
                    self.cursor = 0;
                }
                return Ok(n);
            }
            if self.exhausted {
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

/// Streaming hex encoder over a writer; the 2-character analogue of
/// [`Base64Encoder`]. Every source byte encodes immediately, so there is no
/// carry, only line bookkeeping.
#[derive(Debug)]
pub struct HexEncoder<W: Write> {
    inner: W,
    column: usize,
    finished: bool,
}

impl<W: Write> HexEncoder<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            column: 0,
            finished: false,
        }
    }

    /// The wrapped writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Terminates the output line. Idempotent.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.column > 0 {
            self.inner.write_all(b"\n")?;
            self.column = 0;
        }
        self.inner.flush()?;
        self.finished = true;
        Ok(())
    }
}

impl<W: Write> Write for HexEncoder<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.finished || data.is_empty() {
            return Ok(0);
        }
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        for &byte in data {
            let pair = [
                DIGITS[usize::from(byte >> 4)],
                DIGITS[usize::from(byte & 0x0f)],
            ];
            self.inner.write_all(&pair)?;
            self.column += 2;
            if self.column >= HEX_LINE_WIDTH {
                self.inner.write_all(b"\n")?;
                self.column = 0;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Drop for HexEncoder<W> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Read-side adapter selected by a method's [`Stream`] mode.
#[derive(Debug)]
pub enum ReadAdapter<R: Read> {
    /// `Print` and `Raw`: bytes pass through untouched.
    Passthrough(R),
    /// `Base64`: decoded incrementally.
    Base64(Base64Decoder<R>),
    /// `Hex`: decoded incrementally.
    Hex(HexDecoder<R>),
}

impl<R: Read> ReadAdapter<R> {
    /// Wraps `inner` according to `mode`.
    pub fn for_stream(mode: Stream, inner: R) -> Self {
        match mode {
            Stream::Print | Stream::Raw => Self::Passthrough(inner),
            Stream::Base64 => Self::Base64(Base64Decoder::new(inner)),
            Stream::Hex => Self::Hex(HexDecoder::new(inner)),
        }
    }

    /// The wrapped reader.
    pub fn get_mut(&mut self) -> &mut R {
        match self {
            Self::Passthrough(inner) => inner,
            Self::Base64(decoder) => decoder.get_mut(),
            Self::Hex(decoder) => decoder.get_mut(),
        }
    }
}

impl<R: Read> Read for ReadAdapter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Passthrough(inner) => inner.read(buf),
            Self::Base64(decoder) => decoder.read(buf),
            Self::Hex(decoder) => decoder.read(buf),
        }
    }
}

/// Write-side adapter selected by a method's [`Stream`] mode.
#[derive(Debug)]
pub enum WriteAdapter<W: Write> {
    /// `Raw`: bytes pass through untouched.
    Raw(W),
    /// `Print`: passthrough guarded by [`ensure_printable`].
    Print(W),
    /// `Base64`: encoded incrementally.
    Base64(Base64Encoder<W>),
    /// `Hex`: encoded incrementally.
    Hex(HexEncoder<W>),
}

impl<W: Write> WriteAdapter<W> {
    /// Wraps `inner` according to `mode`.
    pub fn for_stream(mode: Stream, inner: W) -> Self {
        match mode {
            Stream::Raw => Self::Raw(inner),
            Stream::Print => Self::Print(inner),
            Stream::Base64 => Self::Base64(Base64Encoder::new(inner)),
            Stream::Hex => Self::Hex(HexEncoder::new(inner)),
        }
    }

    /// The wrapped writer.
    pub fn get_mut(&mut self) -> &mut W {
        match self {
            Self::Raw(inner) | Self::Print(inner) => inner,
            Self::Base64(encoder) => encoder.get_mut(),
            Self::Hex(encoder) => encoder.get_mut(),
        }
    }

    /// Flushes any buffered final unit. Idempotent.
    pub fn finish(&mut self) -> io::Result<()> {
        match self {
            Self::Raw(_) | Self::Print(_) => Ok(()),
            Self::Base64(encoder) => encoder.finish(),
            Self::Hex(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for WriteAdapter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Self::Raw(inner) => inner.write(data),
            Self::Print(inner) => {
                ensure_printable(data).map_err(invalid_data)?;
                inner.write(data)
            }
            Self::Base64(encoder) => encoder.write(data),
            Self::Hex(encoder) => encoder.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Raw(inner) | Self::Print(inner) => inner.flush(),
            Self::Base64(encoder) => encoder.flush(),
            Self::Hex(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader delivering its data in fixed-size fragments, mimicking a
    /// socket that never lines up with encoded-unit boundaries.
    struct Fragmented {
        data: Vec<u8>,
        at: usize,
        step: usize,
    }

    impl Fragmented {
        fn new<B: Into<Vec<u8>>>(data: B, step: usize) -> Self {
            Self {
                data: data.into(),
                at: 0,
                step,
            }
        }
    }

    impl Read for Fragmented {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.at >= self.data.len() {
                return Ok(0);
            }
            let n = self.step.min(self.data.len() - self.at).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.at..self.at + n]);
            self.at += n;
            Ok(n)
        }
    }

    fn read_all<R: Read>(mut reader: R) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read_to_end");
        out
    }

    #[test]
    fn base64_decoder_handles_arbitrary_fragmentation() {
        let encoded = STANDARD.encode(b"hello binary \x00\xff world");
        for step in 1..=7 {
            let decoder = Base64Decoder::new(Fragmented::new(encoded.clone(), step));
            assert_eq!(
                read_all(decoder),
                b"hello binary \x00\xff world",
                "fragment size {step}"
            );
        }
    }

    #[test]
    fn base64_decoder_skips_terminal_line_noise() {
        let decoder = Base64Decoder::new(Fragmented::new(b"aGVs\r\nbG8=\r\n".to_vec(), 3));
        assert_eq!(read_all(decoder), b"hello");
    }

    #[test]
    fn base64_decoder_rejects_truncated_tail() {
        let mut decoder = Base64Decoder::new(Fragmented::new(b"aGVsbG".to_vec(), 6));
        let mut out = Vec::new();
        let err = decoder.read_to_end(&mut out).expect_err("truncated unit");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn base64_encoder_wraps_and_pads() {
        let mut sink = Vec::new();
        {
            let mut encoder = Base64Encoder::new(&mut sink);
            encoder.write_all(&[0xaa; 100]).expect("write");
            encoder.finish().expect("finish");
            encoder.finish().expect("finish is idempotent");
        }
        let text = String::from_utf8(sink).expect("ascii output");
        let mut lines: Vec<&str> = text.lines().collect();
        let last = lines.pop().expect("at least one line");
        assert!(lines.iter().all(|line| line.len() == 76));
        assert!(last.len() <= 76);
        assert!(text.ends_with('\n'));

        let decoded = STANDARD
            .decode(text.replace('\n', ""))
            .expect("valid base64");
        assert_eq!(decoded, vec![0xaa; 100]);
    }

    #[test]
    fn base64_round_trip_across_chunked_writes() {
        let payload: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let mut sink = Vec::new();
        {
            let mut encoder = Base64Encoder::new(&mut sink);
            for chunk in payload.chunks(7) {
                encoder.write_all(chunk).expect("write");
            }
            encoder.finish().expect("finish");
        }
        let decoder = Base64Decoder::new(Fragmented::new(sink, 5));
        assert_eq!(read_all(decoder), payload);
    }

    #[test]
    fn hex_round_trip_with_interleaved_newlines() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let mut sink = Vec::new();
        {
            let mut encoder = HexEncoder::new(&mut sink);
            encoder.write_all(&payload).expect("write");
            encoder.finish().expect("finish");
        }
        assert!(sink.contains(&b'\n'), "wrapped output has line breaks");
        let decoder = HexDecoder::new(Fragmented::new(sink, 3));
        assert_eq!(read_all(decoder), payload);
    }

    #[test]
    fn hex_decoder_rejects_bad_digits() {
        let mut decoder = HexDecoder::new(Fragmented::new(b"41zz".to_vec(), 4));
        let mut out = Vec::new();
        let err = decoder.read_to_end(&mut out).expect_err("bad digit");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn print_guard_rejects_nul_before_any_byte_reaches_the_sink() {
        let mut sink = Vec::new();
        let mut adapter = WriteAdapter::for_stream(Stream::Print, &mut sink);
        let err = adapter
            .write(b"clean text\x00tail")
            .expect_err("NUL must be rejected");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        drop(adapter);
        assert!(sink.is_empty(), "nothing may be sent before the guard");
    }

    #[test]
    fn print_guard_accepts_plain_text() {
        let mut sink = Vec::new();
        let mut adapter = WriteAdapter::for_stream(Stream::Print, &mut sink);
        adapter.write_all(b"plain text\r\n\tok").expect("write");
        drop(adapter);
        assert_eq!(sink, b"plain text\r\n\tok");
    }

    #[test]
    fn printability_error_pinpoints_the_byte() {
        let err = ensure_printable(b"ok\x07").expect_err("bell byte");
        assert_eq!(err, PrintabilityError { byte: 0x07, offset: 2 });
    }
}
