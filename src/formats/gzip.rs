//! gzip format descriptor.
//!
//! Native codec via `flate2`: reads use [`MultiGzDecoder`] so concatenated
//! members (appended output, BGZF files read as plain gzip) decode fully;
//! writes use [`GzEncoder`]. External programs: `pigz` preferred (threaded,
//! `-p <n>`), plain `gzip` otherwise.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Result;
use crate::formats::{CodecOp, ExternalOpts, FormatSpec, WriteFinish};

/// The gzip format (RFC 1952).
pub struct Gzip;

/// gzip magic bytes.
pub const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

impl FormatSpec for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["gz"]
    }

    fn signatures(&self) -> &'static [&'static [u8]] {
        &[GZIP_MAGIC]
    }

    fn level_range(&self) -> RangeInclusive<u32> {
        1..=9
    }

    fn default_level(&self) -> u32 {
        6
    }

    fn external_programs(&self) -> &'static [&'static str] {
        &["pigz", "gzip"]
    }

    fn external_command(&self, op: CodecOp, exe: &Path, opts: &ExternalOpts) -> Vec<OsString> {
        let mut argv: Vec<OsString> = vec![exe.into()];
        let is_pigz = exe
            .file_stem()
            .map(|s| s.eq_ignore_ascii_case("pigz"))
            .unwrap_or(false);
        match op {
            CodecOp::Compress => {
                argv.push("-c".into());
                argv.push(format!("-{}", self.clamp_level(opts.level)).into());
                if is_pigz && opts.threads > 1 {
                    argv.push("-p".into());
                    argv.push(opts.threads.to_string().into());
                }
            }
            CodecOp::Decompress => {
                argv.push("-c".into());
                argv.push("-d".into());
            }
        }
        if let Some(src) = &opts.source {
            argv.push(src.into());
        }
        argv
    }

    fn native_reader(&self, inner: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(MultiGzDecoder::new(inner)))
    }

    fn native_writer(
        &self,
        inner: Box<dyn Write + Send>,
        level: u32,
    ) -> Result<Box<dyn WriteFinish>> {
        Ok(Box::new(GzSink(GzEncoder::new(
            inner,
            Compression::new(level),
        ))))
    }
}

/// `flate2` encoder adapted to the explicit-finish sink contract.
struct GzSink(GzEncoder<Box<dyn Write + Send>>);

impl Write for GzSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl WriteFinish for GzSink {
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
        let fmt = Gzip;
        let sink = SharedBuffer::new();
        let mut writer = fmt.native_writer(Box::new(sink.clone()), 6).unwrap();
        writer.write_all(b"hello gzip\n").unwrap();
        writer.finish().unwrap();
        drop(writer);

        let buf = sink.contents();
        assert_eq!(&buf[..2], GZIP_MAGIC);

        let mut reader = fmt
            .native_reader(Box::new(std::io::Cursor::new(buf)))
            .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello gzip\n");
    }

    #[test]
    fn multi_member_streams_decode_fully() {
        let fmt = Gzip;
        let sink = SharedBuffer::new();
        for chunk in [&b"first "[..], &b"second"[..]] {
            // A fresh encoder per member; the shared cursor appends.
            let mut writer = fmt.native_writer(Box::new(sink.clone()), 6).unwrap();
            writer.write_all(chunk).unwrap();
            writer.finish().unwrap();
        }

        let mut reader = fmt
            .native_reader(Box::new(std::io::Cursor::new(sink.contents())))
            .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"first second");
    }

    #[test]
    fn pigz_command_carries_thread_flag() {
        let fmt = Gzip;
        let opts = ExternalOpts {
            level: Some(4),
            threads: 8,
            source: None,
        };
        let argv = fmt.external_command(CodecOp::Compress, Path::new("/usr/bin/pigz"), &opts);
        let argv: Vec<String> = argv.iter().map(|a| a.to_string_lossy().into()).collect();
        assert!(argv.contains(&"-4".to_string()));
        assert!(argv.contains(&"-p".to_string()));
        assert!(argv.contains(&"8".to_string()));
    }

    #[test]
    fn plain_gzip_command_has_no_thread_flag() {
        let fmt = Gzip;
        let opts = ExternalOpts {
            level: None,
            threads: 8,
            source: None,
        };
        let argv = fmt.external_command(CodecOp::Compress, Path::new("/bin/gzip"), &opts);
        assert!(!argv.iter().any(|a| a == "-p"));
        // Default level applied.
        assert!(argv.iter().any(|a| a == "-6"));
    }

    #[test]
    fn decompress_command_reads_named_source() {
        let fmt = Gzip;
        let opts = ExternalOpts {
            source: Some("in.gz".into()),
            ..Default::default()
        };
        let argv = fmt.external_command(CodecOp::Decompress, Path::new("gzip"), &opts);
        assert_eq!(argv.last().unwrap(), "in.gz");
        assert!(argv.iter().any(|a| a == "-d"));
    }
}
