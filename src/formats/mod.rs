//! Compression format descriptors and the format registry.
//!
//! Each supported format is a [`FormatSpec`] implementation: a fixed
//! capability surface (name, extensions, magic signatures, level range,
//! external-program invocations, native codec open) validated at
//! registration time. The [`FormatRegistry`] indexes registered formats by
//! name, by extension (longest suffix wins), and by magic bytes
//! (most-specific signature wins, ties broken by registration order).
//!
//! The registry is write-once: the process-wide default is seeded with the
//! four built-in formats behind a `OnceLock` and never mutated afterwards.
//! Custom registries are built explicitly and handed to
//! [`Opener::with_registry`](crate::open::Opener::with_registry).

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};

pub mod bgzip;
pub mod bzip2;
pub mod gzip;
pub mod xz;

pub use bgzip::Bgzip;
pub use bzip2::Bzip2;
pub use gzip::Gzip;
pub use xz::Xz;

// ---------------------------------------------------------------------------
// Codec operation and external invocation options
// ---------------------------------------------------------------------------

/// Direction of an external-program invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecOp {
    /// Compress bytes.
    Compress,
    /// Decompress bytes.
    Decompress,
}

/// Options threaded into [`FormatSpec::external_command`].
#[derive(Clone, Debug, Default)]
pub struct ExternalOpts {
    /// Requested compression level; clamped into the format's range.
    pub level: Option<u32>,
    /// Worker threads, honoured only by programs with a threading flag
    /// (`pigz -p`, `bgzip -@`, `xz -T`).
    pub threads: usize,
    /// When set, the program reads this file instead of stdin.
    pub source: Option<std::path::PathBuf>,
}

/// A writer that must be explicitly finalised before the underlying sink is
/// released. Compression encoders flush their trailer in `finish`; the
/// uncompressed passthrough just flushes.
pub trait WriteFinish: Write + Send {
    /// Write any pending trailer and flush. Must be idempotent.
    fn finish(&mut self) -> io::Result<()>;
}

/// Uncompressed passthrough sink.
pub struct PlainWriter(pub Box<dyn Write + Send>);

impl Write for PlainWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl WriteFinish for PlainWriter {
    fn finish(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

// ---------------------------------------------------------------------------
// FormatSpec — fixed per-format capability interface
// ---------------------------------------------------------------------------

/// Capability interface implemented once per compression format.
///
/// Implementations are immutable after registration and shared behind an
/// `Arc` between the registry, the opener, and any spawned filter plumbing.
pub trait FormatSpec: Send + Sync {
    /// Unique format name, the registry key.
    fn name(&self) -> &'static str;

    /// File extensions (without the leading dot), primary first.
    fn extensions(&self) -> &'static [&'static str];

    /// Magic-byte prefixes identifying this format.
    fn signatures(&self) -> &'static [&'static [u8]];

    /// Returns `true` if `header` begins with one of this format's
    /// signatures. Formats whose identification needs more than a prefix
    /// comparison (bgzip) override this.
    fn matches_magic(&self, header: &[u8]) -> bool {
        self.signatures()
            .iter()
            .any(|sig| header.len() >= sig.len() && &header[..sig.len()] == *sig)
    }

    /// Length of the longest signature; used to rank specificity when
    /// several formats match the same header.
    fn magic_len(&self) -> usize {
        self.signatures().iter().map(|s| s.len()).max().unwrap_or(0)
    }

    /// Number of leading bytes [`matches_magic`](Self::matches_magic) may
    /// need to inspect. Defaults to [`magic_len`](Self::magic_len); bgzip
    /// needs the full fixed header.
    fn peek_len(&self) -> usize {
        self.magic_len()
    }

    /// Supported compression levels.
    fn level_range(&self) -> RangeInclusive<u32>;

    /// Level used when the caller does not specify one.
    fn default_level(&self) -> u32;

    /// Clamps `level` into [`level_range`](Self::level_range), defaulting
    /// when absent.
    fn clamp_level(&self, level: Option<u32>) -> u32 {
        let range = self.level_range();
        level
            .unwrap_or_else(|| self.default_level())
            .clamp(*range.start(), *range.end())
    }

    /// Whether an in-process codec is available for this format.
    fn has_native(&self) -> bool {
        true
    }

    /// External program names in preference order; empty if the format has
    /// no external backend.
    fn external_programs(&self) -> &'static [&'static str];

    /// Builds the full argument vector (program path first) for an external
    /// invocation of `op` through `exe`.
    fn external_command(&self, op: CodecOp, exe: &Path, opts: &ExternalOpts) -> Vec<OsString>;

    /// Wraps `inner` in this format's in-process decoder.
    fn native_reader(&self, inner: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>>;

    /// Wraps `inner` in this format's in-process encoder at `level`
    /// (already clamped).
    fn native_writer(
        &self,
        inner: Box<dyn Write + Send>,
        level: u32,
    ) -> Result<Box<dyn WriteFinish>>;
}

// ---------------------------------------------------------------------------
// FormatRegistry
// ---------------------------------------------------------------------------

/// Immutable-after-setup lookup table of compression formats.
pub struct FormatRegistry {
    /// Registration order; also the magic-scan tie-breaker.
    order: Vec<Arc<dyn FormatSpec>>,
    /// name → index into `order`.
    by_name: HashMap<&'static str, usize>,
    /// lowercase extension (no dot) → index into `order`.
    by_ext: HashMap<String, usize>,
}

/// Process-wide default registry, seeded once with the built-in formats.
static GLOBAL: OnceLock<FormatRegistry> = OnceLock::new();

impl FormatRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        FormatRegistry {
            order: Vec::new(),
            by_name: HashMap::new(),
            by_ext: HashMap::new(),
        }
    }

    /// Creates a registry holding the four built-in formats:
    /// gzip, bgzip, bzip2, xz.
    pub fn with_defaults() -> Self {
        let mut reg = FormatRegistry::empty();
        // Registration order is the magic-scan tie-breaker; gzip before
        // bgzip means a plain gzip header resolves to gzip, while a BGZF
        // header still resolves to bgzip via its longer signature.
        for fmt in [
            Arc::new(Gzip) as Arc<dyn FormatSpec>,
            Arc::new(Bgzip),
            Arc::new(Bzip2),
            Arc::new(Xz),
        ] {
            // Built-in descriptors cannot collide.
            reg.register(fmt)
                .unwrap_or_else(|e| unreachable!("builtin format registration: {e}"));
        }
        reg
    }

    /// Returns the process-wide default registry.
    pub fn global() -> &'static FormatRegistry {
        GLOBAL.get_or_init(FormatRegistry::with_defaults)
    }

    /// Adds `fmt`, failing with [`Error::ConfigurationError`] if its name or
    /// any of its extensions is already registered.
    pub fn register(&mut self, fmt: Arc<dyn FormatSpec>) -> Result<()> {
        if self.by_name.contains_key(fmt.name()) {
            return Err(Error::ConfigurationError(format!(
                "format '{}' is already registered",
                fmt.name()
            )));
        }
        for ext in fmt.extensions() {
            if self.by_ext.contains_key(&ext.to_ascii_lowercase()) {
                return Err(Error::ConfigurationError(format!(
                    "extension '.{}' is already registered",
                    ext
                )));
            }
        }
        self.insert(fmt);
        Ok(())
    }

    /// Adds `fmt`, displacing any format previously registered under the
    /// same name or extensions.
    pub fn register_override(&mut self, fmt: Arc<dyn FormatSpec>) {
        self.insert(fmt);
    }

    fn insert(&mut self, fmt: Arc<dyn FormatSpec>) {
        let idx = self.order.len();
        self.by_name.insert(fmt.name(), idx);
        for ext in fmt.extensions() {
            self.by_ext.insert(ext.to_ascii_lowercase(), idx);
        }
        self.order.push(fmt);
    }

    /// Looks a format up by its unique name.
    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn FormatSpec>> {
        self.by_name.get(name).map(|&i| &self.order[i])
    }

    /// Infers a format from the extension of `path`, case-insensitively.
    /// When several registered extensions are suffixes of the name, the
    /// longest wins.
    pub fn by_extension(&self, path: &str) -> Option<&Arc<dyn FormatSpec>> {
        let lower = path.to_ascii_lowercase();
        let mut best: Option<(usize, usize)> = None; // (ext_len, index)
        for (ext, &idx) in &self.by_ext {
            if lower.ends_with(&format!(".{ext}"))
                && best.map(|(len, _)| ext.len() > len).unwrap_or(true)
            {
                best = Some((ext.len(), idx));
            }
        }
        best.map(|(_, idx)| &self.order[idx])
    }

    /// Scans registered signatures against `header` and returns the most
    /// specific match: the matching format with the longest signature, ties
    /// broken by registration order.
    pub fn by_magic(&self, header: &[u8]) -> Option<&Arc<dyn FormatSpec>> {
        let mut best: Option<(usize, usize)> = None; // (magic_len, index)
        for (idx, fmt) in self.order.iter().enumerate() {
            if fmt.matches_magic(header)
                && best.map(|(len, _)| fmt.magic_len() > len).unwrap_or(true)
            {
                best = Some((fmt.magic_len(), idx));
            }
        }
        best.map(|(_, idx)| &self.order[idx])
    }

    /// Number of leading bytes a sniff must peek to check every registered
    /// signature.
    pub fn max_peek_len(&self) -> usize {
        self.order.iter().map(|f| f.peek_len()).max().unwrap_or(0)
    }

    /// Registered formats in registration order.
    pub fn formats(&self) -> impl Iterator<Item = &Arc<dyn FormatSpec>> {
        self.order.iter()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        FormatRegistry::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
