//! bzip2 format descriptor.
//!
//! Native codec via the `bzip2` crate; external programs `pbzip2` (parallel)
//! then `bzip2`.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;

use crate::error::Result;
use crate::formats::{CodecOp, ExternalOpts, FormatSpec, WriteFinish};

/// The bzip2 format.
pub struct Bzip2;

/// bzip2 magic bytes: `BZh`.
pub const BZIP2_MAGIC: &[u8] = &[0x42, 0x5a, 0x68];

impl FormatSpec for Bzip2 {
    fn name(&self) -> &'static str {
        "bzip2"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["bz2", "bzip2"]
    }

    fn signatures(&self) -> &'static [&'static [u8]] {
        &[BZIP2_MAGIC]
    }

    fn level_range(&self) -> RangeInclusive<u32> {
        1..=9
    }

    fn default_level(&self) -> u32 {
        9
    }

    fn external_programs(&self) -> &'static [&'static str] {
        &["pbzip2", "bzip2"]
    }

    fn external_command(&self, op: CodecOp, exe: &Path, opts: &ExternalOpts) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![exe.into()];
        argv.push("-c".into());
        match op {
            CodecOp::Compress => {
                argv.push("-z".into());
                argv.push(format!("-{}", self.clamp_level(opts.level)).into());
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
        // Multi-stream decoder: appended output concatenates bzip2 streams.
        Ok(Box::new(MultiBzDecoder::new(inner)))
    }

    fn native_writer(
        &self,
        inner: Box<dyn Write + Send>,
        level: u32,
    ) -> Result<Box<dyn WriteFinish>> {
        Ok(Box::new(BzSink(BzEncoder::new(
            inner,
            Compression::new(level),
        ))))
    }
}

/// `bzip2` encoder adapted to the explicit-finish sink contract.
struct BzSink(BzEncoder<Box<dyn Write + Send>>);

impl Write for BzSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl WriteFinish for BzSink {
    fn finish(&mut self) -> io::Result<()> {
        self.0.try_finish()?;
        self.0.get_mut().flush()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
