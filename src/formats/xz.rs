//! xz format descriptor.
//!
//! Native codec via `xz2` (liblzma); external program `xz`. The `.lzma`
//! extension maps here as well — the legacy container is decoded by the same
//! library and program.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::error::Result;
use crate::formats::{CodecOp, ExternalOpts, FormatSpec, WriteFinish};

/// The xz format.
pub struct Xz;

/// xz magic bytes.
pub const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];

impl FormatSpec for Xz {
    fn name(&self) -> &'static str {
        "xz"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xz", "lzma"]
    }

    fn signatures(&self) -> &'static [&'static [u8]] {
        &[XZ_MAGIC]
    }

    fn level_range(&self) -> RangeInclusive<u32> {
        0..=9
    }

    fn default_level(&self) -> u32 {
        6
    }

    fn external_programs(&self) -> &'static [&'static str] {
        &["xz"]
    }

    fn external_command(&self, op: CodecOp, exe: &Path, opts: &ExternalOpts) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![exe.into()];
        argv.push("-c".into());
        match op {
            CodecOp::Compress => {
                argv.push("-z".into());
                argv.push(format!("-{}", self.clamp_level(opts.level)).into());
                if opts.threads > 1 {
                    argv.push("-T".into());
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
        Ok(Box::new(XzDecoder::new_multi_decoder(inner)))
    }

    fn native_writer(
        &self,
        inner: Box<dyn Write + Send>,
        level: u32,
    ) -> Result<Box<dyn WriteFinish>> {
        Ok(Box::new(XzSink(XzEncoder::new(inner, level))))
    }
}

/// `xz2` encoder adapted to the explicit-finish sink contract.
struct XzSink(XzEncoder<Box<dyn Write + Send>>);

impl Write for XzSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl WriteFinish for XzSink {
    fn finish(&mut self) -> io::Result<()> {
        self.0.try_finish()?;
        self.0.get_mut().flush()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open::source::SharedBuffer;

    #[test]
    fn native_roundtrip() {
        let fmt = Xz;
        let sink = SharedBuffer::new();
        let mut writer = fmt.native_writer(Box::new(sink.clone()), 6).unwrap();
        writer.write_all(b"hello xz\n").unwrap();
        writer.finish().unwrap();
        drop(writer);

        let buf = sink.contents();
        assert_eq!(&buf[..6], XZ_MAGIC);

        let mut reader = fmt
            .native_reader(Box::new(std::io::Cursor::new(buf)))
            .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello xz\n");
    }

    #[test]
    fn level_zero_is_in_range() {
        assert_eq!(Xz.clamp_level(Some(0)), 0);
        assert_eq!(Xz.clamp_level(Some(10)), 9);
    }

    #[test]
    fn compress_command_carries_thread_flag() {
        let argv = Xz.external_command(
            CodecOp::Compress,
            Path::new("xz"),
            &ExternalOpts {
                threads: 4,
                ..Default::default()
            },
        );
        assert!(argv.iter().any(|a| a == "-T"));
        assert!(argv.iter().any(|a| a == "4"));
    }
}
