//! Non-destructive magic-byte sniffing.
//!
//! Auto-detection must inspect a stream's leading bytes without consuming
//! them for the eventual reader, including over non-seekable sources (pipes,
//! network responses, process stdout). [`PeekReader`] buffers the peeked
//! prefix and replays it on the first reads, so the codec downstream sees
//! the stream from byte zero.

use std::io::{self, Read};
use std::sync::Arc;

use crate::formats::{FormatRegistry, FormatSpec};

/// A reader with a pushback buffer for peeked leading bytes.
pub struct PeekReader {
    inner: Box<dyn Read + Send>,
    /// Peeked bytes not yet consumed by `read`.
    buf: Vec<u8>,
    /// Read offset into `buf`.
    pos: usize,
}

impl PeekReader {
    /// Wraps `inner`; no bytes are read until the first peek or read.
    pub fn new(inner: Box<dyn Read + Send>) -> Self {
        PeekReader {
            inner,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Returns up to `n` leading bytes without consuming them.
    ///
    /// Shorter slices mean the stream ended early; the bytes remain
    /// available to subsequent `read` calls either way.
    pub fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        debug_assert_eq!(self.pos, 0, "peek after reads have begun");
        while self.buf.len() < n {
            let mut chunk = [0u8; 512];
            let want = (n - self.buf.len()).min(chunk.len());
            let got = self.inner.read(&mut chunk[..want])?;
            if got == 0 {
                break;
            }
            self.buf.extend_from_slice(&chunk[..got]);
        }
        Ok(&self.buf[..self.buf.len().min(n)])
    }
}

impl Read for PeekReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = (self.buf.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.buf.len() {
                // Replay complete; release the buffer.
                self.buf = Vec::new();
                self.pos = 0;
            }
            return Ok(n);
        }
        self.inner.read(out)
    }
}

/// Peeks enough leading bytes to check every registered signature and
/// returns the most specific matching format, or `None` for an
/// unrecognised (treated as uncompressed) stream.
pub fn detect_format(
    reader: &mut PeekReader,
    registry: &FormatRegistry,
) -> io::Result<Option<Arc<dyn FormatSpec>>> {
    let header = reader.peek(registry.max_peek_len())?;
    Ok(registry.by_magic(header).cloned())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn peek_does_not_consume() {
        let mut reader = PeekReader::new(Box::new(Cursor::new(b"abcdef".to_vec())));
        assert_eq!(reader.peek(4).unwrap(), b"abcd");
        // Peeking again with a larger window extends the buffer.
        assert_eq!(reader.peek(6).unwrap(), b"abcdef");

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn peek_short_stream() {
        let mut reader = PeekReader::new(Box::new(Cursor::new(b"ab".to_vec())));
        assert_eq!(reader.peek(18).unwrap(), b"ab");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"ab");
    }

    #[test]
    fn peek_empty_stream() {
        let mut reader = PeekReader::new(Box::new(Cursor::new(Vec::new())));
        assert_eq!(reader.peek(8).unwrap(), b"");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn small_reads_drain_replay_buffer_first() {
        let mut reader = PeekReader::new(Box::new(Cursor::new(b"0123456789".to_vec())));
        reader.peek(4).unwrap();

        let mut chunk = [0u8; 3];
        assert_eq!(reader.read(&mut chunk).unwrap(), 3);
        assert_eq!(&chunk, b"012");
        assert_eq!(reader.read(&mut chunk).unwrap(), 1);
        assert_eq!(chunk[0], b'3');
        // Buffer exhausted; further reads hit the inner stream.
        assert_eq!(reader.read(&mut chunk).unwrap(), 3);
        assert_eq!(&chunk, b"456");
    }

    #[test]
    fn detect_gzip_signature() {
        let data = [0x1f, 0x8b, 0x08, 0x00, 1, 2, 3];
        let mut reader = PeekReader::new(Box::new(Cursor::new(data.to_vec())));
        let fmt = detect_format(&mut reader, FormatRegistry::global())
            .unwrap()
            .expect("gzip should be detected");
        assert_eq!(fmt.name(), "gzip");

        // The sniffed bytes are still delivered to the reader.
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn detect_nothing_for_plain_text() {
        let mut reader = PeekReader::new(Box::new(Cursor::new(b"plain text".to_vec())));
        assert!(detect_format(&mut reader, FormatRegistry::global())
            .unwrap()
            .is_none());
    }
}
