//! The unified open operation.
//!
//! [`Opener::open`] takes an [`OpenSpec`] through a fixed pipeline:
//!
//! 1. source resolution — path, URL, standard stream, buffer, caller
//!    handle, or shell command
//! 2. format resolution — explicit name, magic-byte sniff, or extension
//!    inference, depending on access and the compression directive
//! 3. backend resolution — external filter program or in-process codec
//! 4. raw open of the underlying byte stream
//! 5. codec wrap
//! 6. lifecycle wrap into a [`Stream`]
//!
//! Reads never trust the file name when bytes are available: auto-detection
//! sniffs leading magic bytes through a pushback reader, so the codec still
//! sees the stream from byte zero. Writes never sniff; only the explicit
//! directive or the destination extension selects a format.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::formats::{
    CodecOp, ExternalOpts, FormatRegistry, FormatSpec, PlainWriter, WriteFinish,
};
use crate::stream::{ListenerWhen, Stream};

pub mod backend;
pub mod sniff;
pub mod source;

pub use backend::{resolve_backend, Backend};
pub use sniff::{detect_format, PeekReader};
pub use source::{SharedBuffer, Source, StdStream};

use backend::{ExternalReader, ExternalWriter};

// ---------------------------------------------------------------------------
// Access and compression directives
// ---------------------------------------------------------------------------

/// How the stream will be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Read existing data.
    Read,
    /// Write, truncating any existing destination.
    Write,
    /// Write, appending. For compressed destinations this starts a fresh
    /// member after the existing data; multi-member decoders read the
    /// result as one concatenated stream.
    Append,
}

impl Access {
    /// `true` for the two write-side accesses.
    pub fn is_write(self) -> bool {
        !matches!(self, Access::Read)
    }
}

/// What compression, if any, to apply or expect.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Compression {
    /// Raw bytes, no codec.
    None,
    /// Infer: magic bytes on read, destination extension on write.
    #[default]
    Auto,
    /// A named registered format.
    Format(String),
}

// ---------------------------------------------------------------------------
// OpenSpec
// ---------------------------------------------------------------------------

/// Everything one open call needs, assembled builder-style.
#[derive(Debug)]
pub struct OpenSpec {
    /// What to open.
    pub source: Source,
    /// Read, write, or append.
    pub access: Access,
    /// Text mode enables line iteration helpers; bytes are unchanged.
    pub text: bool,
    /// Compression directive.
    pub compression: Compression,
    /// Compression level; clamped into the format's supported range.
    pub level: Option<u32>,
    /// Per-call backend preference, overriding the config default.
    pub use_external: Option<bool>,
    /// On read with an explicit format: check the stream's magic bytes
    /// against the requested format before decoding.
    pub validate: bool,
    /// Per-call ownership override. Defaults to the config setting, except
    /// caller-supplied reader/writer handles which default to not-owned.
    pub close_on_drop: Option<bool>,
}

impl OpenSpec {
    fn new(source: Source, access: Access) -> Self {
        OpenSpec {
            source,
            access,
            text: false,
            compression: Compression::Auto,
            level: None,
            use_external: None,
            validate: false,
            close_on_drop: None,
        }
    }

    /// Spec for reading `source`.
    pub fn read(source: impl Into<Source>) -> Self {
        Self::new(source.into(), Access::Read)
    }

    /// Spec for writing `source`, truncating existing data.
    pub fn write(source: impl Into<Source>) -> Self {
        Self::new(source.into(), Access::Write)
    }

    /// Spec for appending to `source`.
    pub fn append(source: impl Into<Source>) -> Self {
        Self::new(source.into(), Access::Append)
    }

    /// Spec from a string, classified via [`Source::parse`].
    pub fn parse(spec: &str, access: Access) -> Self {
        Self::new(Source::parse(spec, access), access)
    }

    /// Enables text mode.
    pub fn text(mut self) -> Self {
        self.text = true;
        self
    }

    /// Sets the compression directive.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Shorthand for an explicit named format.
    pub fn format(self, name: impl Into<String>) -> Self {
        self.compression(Compression::Format(name.into()))
    }

    /// Sets the compression level.
    pub fn level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    /// Overrides the backend preference for this call.
    pub fn use_external(mut self, yes: bool) -> Self {
        self.use_external = Some(yes);
        self
    }

    /// Requests magic-byte validation of an explicit read format.
    pub fn validate(mut self) -> Self {
        self.validate = true;
        self
    }

    /// Overrides stream ownership for this call.
    pub fn close_on_drop(mut self, yes: bool) -> Self {
        self.close_on_drop = Some(yes);
        self
    }
}

// ---------------------------------------------------------------------------
// Opener
// ---------------------------------------------------------------------------

enum Registry {
    Global,
    Custom(Arc<FormatRegistry>),
}

/// The open pipeline: a validated [`Config`] plus a format registry.
pub struct Opener {
    config: Config,
    registry: Registry,
}

impl Default for Opener {
    fn default() -> Self {
        Opener {
            config: Config::default(),
            registry: Registry::Global,
        }
    }
}

impl Opener {
    /// Creates an opener over the process-wide format registry. Fails if
    /// `config` does not validate.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Opener {
            config,
            registry: Registry::Global,
        })
    }

    /// Replaces the registry with a caller-built one.
    pub fn with_registry(mut self, registry: Arc<FormatRegistry>) -> Self {
        self.registry = Registry::Custom(registry);
        self
    }

    /// The config this opener was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn registry(&self) -> &FormatRegistry {
        match &self.registry {
            Registry::Global => FormatRegistry::global(),
            Registry::Custom(reg) => reg,
        }
    }

    /// Opens `spec` and returns the lifecycle-wrapped stream.
    pub fn open(&self, spec: OpenSpec) -> Result<Stream> {
        log::debug!("open: {spec:?}");
        if spec.access.is_write() {
            self.open_write(spec)
        } else {
            self.open_read(spec)
        }
    }

    // -- read side ----------------------------------------------------------

    fn open_read(&self, spec: OpenSpec) -> Result<Stream> {
        let name = spec.source.file_name();
        let use_external = spec.use_external.unwrap_or(self.config.use_external);
        let close_on_drop = spec
            .close_on_drop
            .unwrap_or(match spec.source {
                Source::Reader(_) => false,
                _ => self.config.close_on_drop,
            });

        // An explicit format must be registered before any handle exists.
        let explicit = match &spec.compression {
            Compression::Format(requested) => Some(
                self.registry()
                    .by_name(requested)
                    .cloned()
                    .ok_or_else(|| Error::UnsupportedFormat(requested.clone()))?,
            ),
            _ => None,
        };

        let (raw, source_path) = self.raw_reader(spec.source)?;

        let (codec, format_name) = match explicit {
            Some(fmt) if spec.validate => {
                let mut peek = PeekReader::new(raw);
                let want = self.registry().max_peek_len().max(fmt.peek_len());
                let header = peek.peek(want)?.to_vec();
                if !fmt.matches_magic(&header) {
                    let detected = self
                        .registry()
                        .by_magic(&header)
                        .map(|f| f.name().to_string());
                    return Err(Error::FormatMismatch {
                        requested: fmt.name().to_string(),
                        detected,
                    });
                }
                let reader = self.wrap_reader(&fmt, Box::new(peek), use_external, None)?;
                (reader, Some(fmt.name().to_string()))
            }
            Some(fmt) => {
                // No bytes consumed yet; a path source can be handed to the
                // external program by name.
                let reader = self.wrap_reader(&fmt, raw, use_external, source_path)?;
                (reader, Some(fmt.name().to_string()))
            }
            None => match spec.compression {
                Compression::None => (raw, None),
                _ => {
                    let mut peek = PeekReader::new(raw);
                    match detect_format(&mut peek, self.registry())? {
                        Some(fmt) => {
                            let reader =
                                self.wrap_reader(&fmt, Box::new(peek), use_external, None)?;
                            (reader, Some(fmt.name().to_string()))
                        }
                        None => (Box::new(peek) as Box<dyn Read + Send>, None),
                    }
                }
            },
        };

        Ok(Stream::reader(
            codec,
            format_name,
            name,
            spec.text,
            close_on_drop,
            self.config.progress.clone(),
        ))
    }

    /// Opens the raw byte source for reading. The second element is the
    /// filesystem path when the source has one, for named-source external
    /// decompression.
    fn raw_reader(&self, source: Source) -> Result<(Box<dyn Read + Send>, Option<PathBuf>)> {
        match source {
            Source::Path(path) => {
                let file = std::fs::File::open(&path)
                    .map_err(|e| Error::from_open(&path, e))?;
                Ok((Box::new(file), Some(path)))
            }
            Source::Url(url) => Ok((crate::remote::open_url(&url)?, None)),
            Source::Std(StdStream::In) => Ok((Box::new(std::io::stdin()), None)),
            Source::Std(s) => Err(Error::ConfigurationError(format!(
                "{s:?} is not readable"
            ))),
            Source::Buffer(buf) => Ok((Box::new(buf), None)),
            Source::Reader(r) => Ok((r, None)),
            Source::Writer(_) => Err(Error::ConfigurationError(
                "cannot read from a writer handle".into(),
            )),
            Source::Command(cmd) => Ok((crate::process::shell_reader(&cmd)?, None)),
        }
    }

    /// Wraps `raw` in a decoder for `fmt`, external or native per the
    /// resolved backend. `source_path` enables the named-source external
    /// form (the program opens the file itself).
    fn wrap_reader(
        &self,
        fmt: &Arc<dyn FormatSpec>,
        raw: Box<dyn Read + Send>,
        use_external: bool,
        source_path: Option<PathBuf>,
    ) -> Result<Box<dyn Read + Send>> {
        match resolve_backend(fmt, use_external, &self.config)? {
            Backend::External(exe) => {
                let opts = ExternalOpts {
                    level: None,
                    threads: self.config.threads,
                    source: source_path,
                };
                let reader = if opts.source.is_some() {
                    ExternalReader::from_named_source(fmt, &exe, CodecOp::Decompress, &opts)?
                } else {
                    ExternalReader::filter(fmt, &exe, CodecOp::Decompress, &opts, raw)?
                };
                Ok(Box::new(reader))
            }
            Backend::Native => fmt.native_reader(raw),
        }
    }

    // -- write side ---------------------------------------------------------

    fn open_write(&self, spec: OpenSpec) -> Result<Stream> {
        let name = spec.source.file_name();
        let use_external = spec.use_external.unwrap_or(self.config.use_external);
        let close_on_drop = spec
            .close_on_drop
            .unwrap_or(match spec.source {
                Source::Writer(_) => false,
                _ => self.config.close_on_drop,
            });

        // Writes never sniff: explicit directive or destination extension.
        let fmt = match &spec.compression {
            Compression::None => None,
            Compression::Auto => name
                .as_deref()
                .and_then(|n| self.registry().by_extension(n))
                .cloned(),
            Compression::Format(requested) => Some(
                self.registry()
                    .by_name(requested)
                    .cloned()
                    .ok_or_else(|| Error::UnsupportedFormat(requested.clone()))?,
            ),
        };

        let (raw, shell_exit) = self.raw_writer(spec.source, spec.access)?;

        let sink: Box<dyn WriteFinish> = match fmt {
            Some(ref fmt) => match resolve_backend(fmt, use_external, &self.config)? {
                Backend::External(exe) => {
                    let opts = ExternalOpts {
                        level: spec.level,
                        threads: self.config.threads,
                        source: None,
                    };
                    let writer = match raw {
                        RawWriter::File(file) => {
                            ExternalWriter::to_file(fmt, &exe, CodecOp::Compress, &opts, file)?
                        }
                        RawWriter::Sink(dest) => {
                            ExternalWriter::to_sink(fmt, &exe, CodecOp::Compress, &opts, dest)?
                        }
                    };
                    Box::new(writer)
                }
                Backend::Native => {
                    fmt.native_writer(raw.into_sink(), fmt.clamp_level(spec.level))?
                }
            },
            None => Box::new(PlainWriter(raw.into_sink())),
        };

        let mut stream = Stream::writer(
            sink,
            fmt.map(|f| f.name().to_string()),
            name,
            spec.text,
            close_on_drop,
        );
        // A command sink's exit is checked once the writer chain has been
        // released, so a failed command surfaces from `close`.
        if let Some(exit) = shell_exit {
            stream.on_close(ListenerWhen::AfterClose, move || exit.wait());
        }
        Ok(stream)
    }

    fn raw_writer(
        &self,
        source: Source,
        access: Access,
    ) -> Result<(RawWriter, Option<crate::process::ShellExit>)> {
        match source {
            Source::Path(path) => {
                let mut opts = OpenOptions::new();
                opts.write(true).create(true);
                match access {
                    Access::Append => opts.append(true),
                    _ => opts.truncate(true),
                };
                let file = opts.open(&path).map_err(|e| Error::from_open(&path, e))?;
                Ok((RawWriter::File(file), None))
            }
            Source::Url(url) => Err(Error::PermissionDenied(format!(
                "URLs are read-only: {url}"
            ))),
            Source::Std(StdStream::Out) => {
                Ok((RawWriter::Sink(Box::new(std::io::stdout())), None))
            }
            Source::Std(StdStream::Err) => {
                Ok((RawWriter::Sink(Box::new(std::io::stderr())), None))
            }
            Source::Std(StdStream::In) => Err(Error::ConfigurationError(
                "standard input is not writable".into(),
            )),
            Source::Buffer(buf) => Ok((RawWriter::Sink(Box::new(buf)), None)),
            Source::Writer(w) => Ok((RawWriter::Sink(w), None)),
            Source::Reader(_) => Err(Error::ConfigurationError(
                "cannot write to a reader handle".into(),
            )),
            Source::Command(cmd) => {
                let (sink, exit) = crate::process::shell_writer(&cmd)?;
                Ok((RawWriter::Sink(sink), Some(exit)))
            }
        }
    }
}

/// A raw write destination; the file form lets an external compressor write
/// to the destination handle directly instead of through a pump.
enum RawWriter {
    File(std::fs::File),
    Sink(Box<dyn Write + Send>),
}

impl RawWriter {
    fn into_sink(self) -> Box<dyn Write + Send> {
        match self {
            RawWriter::File(f) => Box::new(f),
            RawWriter::Sink(s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn native_opener() -> Opener {
        Opener::new(Config::new().use_external(false)).unwrap()
    }

    #[test]
    fn missing_path_is_source_not_found() {
        let err = native_opener()
            .open(OpenSpec::parse("/no/such/file.gz", Access::Read))
            .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
    }

    #[test]
    fn unknown_format_name_rejected() {
        let err = native_opener()
            .open(OpenSpec::read(SharedBuffer::new()).format("snappy"))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn unknown_format_rejected_before_the_source_is_opened() {
        // Format resolution precedes the raw open: with both an unknown
        // format and a missing file, the format error wins.
        let err = native_opener()
            .open(OpenSpec::parse("/no/such/file.gz", Access::Read).format("snappy"))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn buffer_roundtrip_with_explicit_format() {
        let opener = native_opener();
        let buf = SharedBuffer::new();

        let mut out = opener
            .open(OpenSpec::write(buf.clone()).format("gzip"))
            .unwrap();
        out.write_all(b"through the pipeline\n").unwrap();
        out.close().unwrap();
        assert_eq!(out.format(), Some("gzip"));

        buf.rewind();
        let mut back = opener.open(OpenSpec::read(buf)).unwrap();
        assert_eq!(back.format(), Some("gzip"));
        let mut text = String::new();
        back.read_to_string(&mut text).unwrap();
        assert_eq!(text, "through the pipeline\n");
    }

    #[test]
    fn auto_read_of_plain_bytes_stays_plain() {
        let opener = native_opener();
        let mut s = opener
            .open(OpenSpec::read(SharedBuffer::text("not compressed")))
            .unwrap();
        assert_eq!(s.format(), None);
        let mut text = String::new();
        s.read_to_string(&mut text).unwrap();
        assert_eq!(text, "not compressed");
    }

    #[test]
    fn validate_catches_mismatched_magic() {
        let opener = native_opener();
        // bzip2-compressed bytes, opened as gzip with validation.
        let buf = SharedBuffer::new();
        let mut out = opener
            .open(OpenSpec::write(buf.clone()).format("bzip2"))
            .unwrap();
        out.write_all(b"data").unwrap();
        out.close().unwrap();
        buf.rewind();

        let err = opener
            .open(OpenSpec::read(buf).format("gzip").validate())
            .unwrap_err();
        match err {
            Error::FormatMismatch { requested, detected } => {
                assert_eq!(requested, "gzip");
                assert_eq!(detected.as_deref(), Some("bzip2"));
            }
            other => panic!("expected mismatch, got {other}"),
        }
    }

    #[test]
    fn validate_passes_matching_magic() {
        let opener = native_opener();
        let buf = SharedBuffer::new();
        let mut out = opener
            .open(OpenSpec::write(buf.clone()).format("gzip"))
            .unwrap();
        out.write_all(b"payload").unwrap();
        out.close().unwrap();
        buf.rewind();

        let mut s = opener
            .open(OpenSpec::read(buf).format("gzip").validate())
            .unwrap();
        let mut data = Vec::new();
        s.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"payload");
    }

    #[test]
    fn write_auto_infers_from_extension_only() {
        let opener = native_opener();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gz");

        let mut s = opener.open(OpenSpec::write(path.as_path())).unwrap();
        assert_eq!(s.format(), Some("gzip"));
        s.write_all(b"named by extension").unwrap();
        s.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], crate::formats::gzip::GZIP_MAGIC);
    }

    #[test]
    fn write_without_extension_stays_plain() {
        let opener = native_opener();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let mut s = opener.open(OpenSpec::write(path.as_path())).unwrap();
        assert_eq!(s.format(), None);
        s.write_all(b"raw").unwrap();
        s.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"raw");
    }

    #[test]
    fn url_write_is_permission_denied() {
        let err = native_opener()
            .open(OpenSpec::parse("https://example.com/f.gz", Access::Write))
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn append_adds_a_fresh_member() {
        let opener = native_opener();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.gz");

        let mut first = opener.open(OpenSpec::write(path.as_path())).unwrap();
        first.write_all(b"one\n").unwrap();
        first.close().unwrap();

        let mut second = opener.open(OpenSpec::append(path.as_path())).unwrap();
        second.write_all(b"two\n").unwrap();
        second.close().unwrap();

        // Multi-member decode sees the concatenation.
        let mut back = opener.open(OpenSpec::read(path.as_path())).unwrap();
        let mut text = String::new();
        back.read_to_string(&mut text).unwrap();
        assert_eq!(text, "one\ntwo\n");
    }

    #[test]
    fn empty_read_source_is_empty_plain_stream() {
        let mut s = native_opener()
            .open(OpenSpec::read(SharedBuffer::new()))
            .unwrap();
        assert_eq!(s.format(), None);
        let mut data = Vec::new();
        s.read_to_end(&mut data).unwrap();
        assert!(data.is_empty());
    }
}
