//! Source classification: every open call starts from a [`Source`] value.
//!
//! Strings are classified with [`Source::parse`] using the reserved
//! sentinels:
//!
//! - [`STDIN_OR_STDOUT_MARK`] (`-`) — standard input or output, by access
//! - [`STDERR_MARK`] (`_`) — standard error
//! - a leading [`PIPE_MARKER`] (`|`) — a shell command whose pipe end
//!   becomes the stream
//! - a recognised URL scheme — a remote resource
//! - anything else — a filesystem path

use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::open::Access;

// ---------------------------------------------------------------------------
// Sentinel strings
// ---------------------------------------------------------------------------

/// Sentinel: standard input (read modes) or standard output (write modes).
pub const STDIN_OR_STDOUT_MARK: &str = "-";

/// Sentinel: standard error.
pub const STDERR_MARK: &str = "_";

/// Reserved leading character marking a shell-command source.
pub const PIPE_MARKER: char = '|';

/// URL schemes delegated to the standard resolver.
const URL_SCHEMES: &[&str] = &["http", "https", "ftp", "file"];

// ---------------------------------------------------------------------------
// Standard streams
// ---------------------------------------------------------------------------

/// The three process-level standard streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StdStream {
    /// Standard input.
    In,
    /// Standard output.
    Out,
    /// Standard error.
    Err,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Tagged union of everything the opener can open.
pub enum Source {
    /// A filesystem path.
    Path(PathBuf),
    /// A remote resource, fetched over HTTP(S)/FTP.
    Url(String),
    /// One of the process standard streams.
    Std(StdStream),
    /// A clonable in-memory buffer.
    Buffer(SharedBuffer),
    /// An already-open reader the caller continues to own.
    Reader(Box<dyn Read + Send>),
    /// An already-open writer the caller continues to own.
    Writer(Box<dyn Write + Send>),
    /// A shell command (without the leading pipe marker) whose stdout/stdin
    /// becomes the stream.
    Command(String),
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Path(p) => write!(f, "Path({})", p.display()),
            Source::Url(u) => write!(f, "Url({u})"),
            Source::Std(s) => write!(f, "Std({s:?})"),
            Source::Buffer(_) => write!(f, "Buffer(..)"),
            Source::Reader(_) => write!(f, "Reader(..)"),
            Source::Writer(_) => write!(f, "Writer(..)"),
            Source::Command(c) => write!(f, "Command({c})"),
        }
    }
}

impl Source {
    /// Classifies a string into a source, using `access` to disambiguate the
    /// `-` sentinel.
    pub fn parse(spec: &str, access: Access) -> Source {
        if spec == STDIN_OR_STDOUT_MARK {
            return match access {
                Access::Read => Source::Std(StdStream::In),
                Access::Write | Access::Append => Source::Std(StdStream::Out),
            };
        }
        if spec == STDERR_MARK {
            return Source::Std(StdStream::Err);
        }
        if let Some(cmd) = spec.strip_prefix(PIPE_MARKER) {
            return Source::Command(cmd.trim_start().to_string());
        }
        if is_url(spec) {
            return Source::Url(spec.to_string());
        }
        Source::Path(PathBuf::from(spec))
    }

    /// The name used for extension-based format inference, if the source
    /// has one.
    pub fn file_name(&self) -> Option<String> {
        match self {
            Source::Path(p) => Some(p.to_string_lossy().into_owned()),
            Source::Url(u) => url::Url::parse(u).ok().map(|u| u.path().to_string()),
            _ => None,
        }
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&std::path::Path> for Source {
    fn from(path: &std::path::Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

impl From<SharedBuffer> for Source {
    fn from(buffer: SharedBuffer) -> Self {
        Source::Buffer(buffer)
    }
}

/// Returns `true` if `spec` parses as a URL with a recognised scheme.
fn is_url(spec: &str) -> bool {
    match url::Url::parse(spec) {
        Ok(u) => URL_SCHEMES.contains(&u.scheme()),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// SharedBuffer
// ---------------------------------------------------------------------------

/// Clonable in-memory buffer usable as a read source or a write sink.
///
/// All clones share one cursor, so bytes written through the opener are
/// visible to the caller's clone after the stream is closed:
///
/// ```ignore
/// let buf = SharedBuffer::new();
/// let mut stream = opener.open(OpenSpec::write(buf.clone().into()))?;
/// stream.write_all(b"data")?;
/// stream.close()?;
/// assert!(!buf.contents().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Cursor<Vec<u8>>>>);

impl SharedBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer holding binary contents, positioned at the start.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        SharedBuffer(Arc::new(Mutex::new(Cursor::new(bytes.into()))))
    }

    /// Creates a buffer holding text contents, positioned at the start.
    pub fn text(text: &str) -> Self {
        Self::binary(text.as_bytes().to_vec())
    }

    /// Returns a copy of the full buffer contents, regardless of the
    /// current cursor position.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().get_ref().clone()
    }

    /// Moves the shared cursor back to the start.
    pub fn rewind(&self) {
        self.lock().set_position(0);
    }

    /// Total buffer length in bytes.
    pub fn len(&self) -> usize {
        self.lock().get_ref().len()
    }

    /// Returns `true` if no bytes have been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cursor<Vec<u8>>> {
        // A poisoned lock still holds valid bytes; recover rather than wedge
        // every clone.
        self.0.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Read for SharedBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock().read(buf)
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
