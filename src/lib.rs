//! Compression-transparent stream opening.
//!
//! `zopen` opens anything byte-shaped — files, URLs, standard streams,
//! in-memory buffers, caller-supplied handles, shell-command pipes — and
//! makes compression invisible to the code doing the reading or writing.
//! Formats are detected from magic bytes on read and inferred from the
//! destination extension on write; decoding and encoding run through
//! external programs (`pigz`, `bgzip`, `pbzip2`, `xz`, ...) when available
//! and through in-process codecs otherwise.
//!
//! ```no_run
//! use std::io::Read;
//! use zopen::{open_read, open_write};
//!
//! # fn main() -> zopen::Result<()> {
//! // Reads gzip, bgzip, bzip2, xz, or plain bytes, decided by the content.
//! let mut input = open_read("data/sample.gz")?;
//! let mut text = String::new();
//! input.read_to_string(&mut text)?;
//!
//! // Compresses because the destination ends in .xz.
//! use std::io::Write;
//! let mut output = open_write("results/out.xz")?;
//! output.write_all(text.as_bytes())?;
//! output.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! The string forms accept the sentinels `-` (stdin/stdout by access), `_`
//! (stderr), and a leading `|` for a shell command whose pipe end becomes
//! the stream. Non-string sources and per-call knobs go through
//! [`OpenSpec`] and [`Opener`].

pub mod config;
pub mod error;
pub mod formats;
pub mod open;
pub mod paths;
pub mod process;
pub mod remote;
pub mod stream;

pub use config::Config;
pub use error::{Error, Result};
pub use formats::{FormatRegistry, FormatSpec, WriteFinish};
pub use open::{Access, Compression, OpenSpec, Opener, SharedBuffer, Source};
pub use process::{Endpoint, ProcessBuilder, ProcessHandle};
pub use stream::{ListenerWhen, ProgressWrap, Stream};

/// Opens `spec` through a default-configured [`Opener`] over the global
/// format registry.
pub fn open(spec: OpenSpec) -> Result<Stream> {
    Opener::default().open(spec)
}

/// Opens `spec` for reading with default configuration and auto-detected
/// compression. `spec` may be a path, URL, `-`, `_`, or `|command`.
pub fn open_read(spec: &str) -> Result<Stream> {
    Opener::default().open(OpenSpec::parse(spec, Access::Read))
}

/// Opens `spec` for writing with default configuration; compression is
/// inferred from the destination extension.
pub fn open_write(spec: &str) -> Result<Stream> {
    Opener::default().open(OpenSpec::parse(spec, Access::Write))
}

/// Opens `spec` for appending with default configuration. Appending to a
/// compressed destination starts a fresh member after the existing data.
pub fn open_append(spec: &str) -> Result<Stream> {
    Opener::default().open(OpenSpec::parse(spec, Access::Append))
}
