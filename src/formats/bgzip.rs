//! Block-gzip (BGZF) format descriptor.
//!
//! BGZF is a gzip variant built from independent members of at most 64 KiB:
//! each block is a complete gzip member whose header carries an FEXTRA `BC`
//! subfield holding the total block size, and the file ends with a fixed
//! 28-byte empty block. Because every block is valid gzip, reading uses the
//! same `MultiGzDecoder` as plain gzip; writing emits the block structure
//! explicitly (fixed 18-byte header, raw-deflate payload, CRC32 + ISIZE
//! trailer).
//!
//! BGZF shares gzip's two magic bytes. Identification therefore inspects
//! beyond them: the `FLG.FEXTRA` bit must be set and the extra field must
//! contain a `BC` subfield — a plain gzip header never matches.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};

use crate::error::Result;
use crate::formats::gzip::GZIP_MAGIC;
use crate::formats::{CodecOp, ExternalOpts, FormatSpec, WriteFinish};

/// The block-gzip (BGZF) format.
pub struct Bgzip;

// ---------------------------------------------------------------------------
// BGZF wire constants
// ---------------------------------------------------------------------------

/// Fixed header length: 10 gzip bytes + XLEN + the 6-byte BC subfield.
const BLOCK_HEADER_LEN: usize = 18;

/// Gzip trailer length (CRC32 + ISIZE).
const BLOCK_TRAILER_LEN: usize = 8;

/// Maximum uncompressed payload per block. Leaves headroom below the 64 KiB
/// BSIZE ceiling for incompressible data.
const MAX_BLOCK_PAYLOAD: usize = 0xff00;

/// The fixed empty block terminating every BGZF file.
const EOF_BLOCK: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// `FLG` bit signalling the presence of an extra field.
const FLG_FEXTRA: u8 = 0x04;

impl FormatSpec for Bgzip {
    fn name(&self) -> &'static str {
        "bgzip"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["bgz"]
    }

    fn signatures(&self) -> &'static [&'static [u8]] {
        // gzip magic + deflate method + FEXTRA flag; ranked longer than
        // gzip's two bytes so a BGZF header wins the magic scan.
        &[&[0x1f, 0x8b, 0x08, 0x04]]
    }

    /// Strict identification: gzip magic, deflate method, FEXTRA set, and a
    /// `BC` subfield inside the extra field.
    fn matches_magic(&self, header: &[u8]) -> bool {
        if header.len() < 12
            || header[..2] != *GZIP_MAGIC
            || header[2] != 0x08
            || header[3] & FLG_FEXTRA == 0
        {
            return false;
        }
        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        let extra = &header[12..header.len().min(12 + xlen)];
        // Walk the subfields: SI1 SI2 SLEN(le16) DATA.
        let mut pos = 0;
        while pos + 4 <= extra.len() {
            let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
            if extra[pos] == b'B' && extra[pos + 1] == b'C' && slen == 2 {
                return true;
            }
            pos += 4 + slen;
        }
        false
    }

    fn peek_len(&self) -> usize {
        BLOCK_HEADER_LEN
    }

    fn level_range(&self) -> RangeInclusive<u32> {
        1..=9
    }

    fn default_level(&self) -> u32 {
        6
    }

    fn external_programs(&self) -> &'static [&'static str] {
        &["bgzip"]
    }

    fn external_command(&self, op: CodecOp, exe: &Path, opts: &ExternalOpts) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![exe.into()];
        argv.push("-c".into());
        match op {
            CodecOp::Compress => {
                argv.push("-l".into());
                argv.push(self.clamp_level(opts.level).to_string().into());
                if opts.threads > 1 {
                    argv.push("-@".into());
                    argv.push(opts.threads.to_string().into());
                }
            }
            CodecOp::Decompress => {
                argv.push("-d".into());
            }
        }
        if let Some(src) = &opts.source {
            argv.push(src.into());
        }
        argv
    }

    fn native_reader(&self, inner: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        // Every BGZF block is a gzip member; the multi-member decoder walks
        // them all, and the empty EOF block decodes to nothing.
        Ok(Box::new(MultiGzDecoder::new(inner)))
    }

    fn native_writer(
        &self,
        inner: Box<dyn Write + Send>,
        level: u32,
    ) -> Result<Box<dyn WriteFinish>> {
        Ok(Box::new(BgzfWriter {
            inner,
            level: Compression::new(level),
            buf: Vec::with_capacity(MAX_BLOCK_PAYLOAD),
            finished: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// BgzfWriter
// ---------------------------------------------------------------------------

/// Streaming BGZF encoder: buffers up to one block of payload, emitting a
/// complete gzip member per block and the EOF marker on finish.
struct BgzfWriter {
    inner: Box<dyn Write + Send>,
    level: Compression,
    buf: Vec<u8>,
    finished: bool,
}

impl BgzfWriter {
    /// Compresses the buffered payload into one BGZF block and writes it.
    fn emit_block(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        let mut deflater = DeflateEncoder::new(Vec::new(), self.level);
        deflater.write_all(&self.buf)?;
        let cdata = deflater.finish()?;

        let bsize = BLOCK_HEADER_LEN + cdata.len() + BLOCK_TRAILER_LEN;
        debug_assert!(bsize <= u16::MAX as usize + 1, "BGZF block overflow");

        let mut header = [0u8; BLOCK_HEADER_LEN];
        header[0] = 0x1f;
        header[1] = 0x8b;
        header[2] = 0x08; // CM = deflate
        header[3] = FLG_FEXTRA;
        // MTIME = 0, XFL = 0.
        header[9] = 0xff; // OS = unknown
        header[10..12].copy_from_slice(&6u16.to_le_bytes()); // XLEN
        header[12] = b'B';
        header[13] = b'C';
        header[14..16].copy_from_slice(&2u16.to_le_bytes()); // SLEN
        header[16..18].copy_from_slice(&((bsize - 1) as u16).to_le_bytes());

        let mut crc = Crc::new();
        crc.update(&self.buf);

        self.inner.write_all(&header)?;
        self.inner.write_all(&cdata)?;
        self.inner.write_all(&crc.sum().to_le_bytes())?;
        self.inner
            .write_all(&(self.buf.len() as u32).to_le_bytes())?;

        self.buf.clear();
        Ok(())
    }
}

impl Write for BgzfWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after BGZF stream was finished",
            ));
        }
        let mut remaining = data;
        while !remaining.is_empty() {
            let room = MAX_BLOCK_PAYLOAD - self.buf.len();
            let take = room.min(remaining.len());
            self.buf.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if self.buf.len() == MAX_BLOCK_PAYLOAD {
                self.emit_block()?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Flushing mid-stream closes the current block early; block
        // boundaries are otherwise invisible to readers.
        self.emit_block()?;
        self.inner.flush()
    }
}

impl WriteFinish for BgzfWriter {
    fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.emit_block()?;
        self.inner.write_all(&EOF_BLOCK)?;
        self.inner.flush()?;
        self.finished = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open::source::SharedBuffer;

    fn bgzf_compress(data: &[u8]) -> Vec<u8> {
        let sink = SharedBuffer::new();
        let mut writer = Bgzip.native_writer(Box::new(sink.clone()), 6).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
        sink.contents()
    }

    #[test]
    fn roundtrip_small_payload() {
        let compressed = bgzf_compress(b"hello\n");
        let mut reader = Bgzip
            .native_reader(Box::new(std::io::Cursor::new(compressed)))
            .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello\n");
    }

    #[test]
    fn roundtrip_multi_block_payload() {
        // Forces several blocks plus a partial tail.
        let data: Vec<u8> = (0u8..=255).cycle().take(MAX_BLOCK_PAYLOAD * 2 + 977).collect();
        let compressed = bgzf_compress(&data);
        let mut reader = Bgzip
            .native_reader(Box::new(std::io::Cursor::new(compressed)))
            .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn output_ends_with_eof_block() {
        let compressed = bgzf_compress(b"data");
        assert!(compressed.len() >= EOF_BLOCK.len());
        assert_eq!(&compressed[compressed.len() - EOF_BLOCK.len()..], &EOF_BLOCK);
    }

    #[test]
    fn output_matches_own_magic_not_plain_gzip_header() {
        let compressed = bgzf_compress(b"data");
        assert!(Bgzip.matches_magic(&compressed));
        // And the header is still valid gzip magic.
        assert_eq!(&compressed[..2], GZIP_MAGIC);
    }

    #[test]
    fn plain_gzip_header_does_not_match() {
        // gzip header without FEXTRA.
        let header = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0, 0xff, 0, 0];
        assert!(!Bgzip.matches_magic(&header));
    }

    #[test]
    fn fextra_without_bc_subfield_does_not_match() {
        // FEXTRA set but the subfield id is "XX".
        let header = [
            0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff, 0x06, 0x00, b'X', b'X', 0x02, 0x00,
            0x00, 0x00,
        ];
        assert!(!Bgzip.matches_magic(&header));
    }

    #[test]
    fn plain_gzip_decoder_reads_bgzf_output() {
        // Interop: BGZF output is valid multi-member gzip.
        let compressed = bgzf_compress(b"interop check\n");
        let mut reader = crate::formats::Gzip
            .native_reader(Box::new(std::io::Cursor::new(compressed)))
            .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"interop check\n");
    }

    #[test]
    fn finish_is_idempotent() {
        let sink = SharedBuffer::new();
        let mut writer = Bgzip.native_writer(Box::new(sink.clone()), 6).unwrap();
        writer.write_all(b"x").unwrap();
        writer.finish().unwrap();
        let len = sink.contents().len();
        writer.finish().unwrap();
        assert_eq!(sink.contents().len(), len);
    }
}
