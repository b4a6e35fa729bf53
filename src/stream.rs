//! The lifecycle wrapper handed back by every open call.
//!
//! A [`Stream`] pairs the resolved reader or writer with the metadata of the
//! open that produced it (resolved format, source name, text/binary mode)
//! and owns the close protocol: explicit, idempotent [`Stream::close`],
//! optional close-on-drop, and caller-registered close listeners that run
//! before or after the underlying release.
//!
//! Writers opened through a compression codec carry trailer state that only
//! hits the sink on finalisation, so `close` is where write-side errors
//! surface; relying on drop alone can only log them.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::formats::WriteFinish;

// ---------------------------------------------------------------------------
// Progress seam
// ---------------------------------------------------------------------------

/// External collaborator hook for wrapping line iteration in a progress
/// display. The crate never renders progress itself; a configured wrapper
/// receives the line iterator and returns a decorated one.
pub trait ProgressWrap: Send + Sync {
    /// Wraps `lines`, optionally labelled with the source `name`.
    fn wrap<'a>(
        &self,
        lines: Box<dyn Iterator<Item = io::Result<String>> + Send + 'a>,
        name: Option<&str>,
    ) -> Box<dyn Iterator<Item = io::Result<String>> + Send + 'a>;
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// Which side of the stream is open.
enum Inner {
    Reader(BufReader<Box<dyn Read + Send>>),
    Writer(Box<dyn WriteFinish>),
    /// Terminal state after `close`.
    Closed,
}

/// When a close listener fires relative to the resource release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerWhen {
    /// Before the underlying reader/writer is released.
    BeforeClose,
    /// After the underlying reader/writer is released.
    AfterClose,
}

type CloseListener = Box<dyn FnOnce() -> Result<()> + Send>;

/// An open stream plus its resolution metadata and close protocol.
pub struct Stream {
    inner: Inner,
    /// Resolved compression format name, `None` for uncompressed.
    format: Option<String>,
    /// Display name of the source (path, URL, sentinel, command).
    name: Option<String>,
    text: bool,
    close_on_drop: bool,
    before_close: Vec<CloseListener>,
    after_close: Vec<CloseListener>,
    progress: Option<Arc<dyn ProgressWrap>>,
}

impl Stream {
    /// Wraps a resolved reader.
    pub(crate) fn reader(
        inner: Box<dyn Read + Send>,
        format: Option<String>,
        name: Option<String>,
        text: bool,
        close_on_drop: bool,
        progress: Option<Arc<dyn ProgressWrap>>,
    ) -> Self {
        Stream {
            inner: Inner::Reader(BufReader::new(inner)),
            format,
            name,
            text,
            close_on_drop,
            before_close: Vec::new(),
            after_close: Vec::new(),
            progress,
        }
    }

    /// Wraps a resolved writer.
    pub(crate) fn writer(
        inner: Box<dyn WriteFinish>,
        format: Option<String>,
        name: Option<String>,
        text: bool,
        close_on_drop: bool,
    ) -> Self {
        Stream {
            inner: Inner::Writer(inner),
            format,
            name,
            text,
            close_on_drop,
            before_close: Vec::new(),
            after_close: Vec::new(),
            progress: None,
        }
    }

    /// The resolved compression format name, or `None` when the stream is
    /// uncompressed.
    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    /// The display name of the opened source, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// `true` for text-mode streams.
    pub fn is_text(&self) -> bool {
        self.text
    }

    /// `true` while the stream can still serve reads.
    pub fn readable(&self) -> bool {
        matches!(self.inner, Inner::Reader(_))
    }

    /// `true` while the stream can still serve writes.
    pub fn writable(&self) -> bool {
        matches!(self.inner, Inner::Writer(_))
    }

    /// `true` once `close` has run.
    pub fn is_closed(&self) -> bool {
        matches!(self.inner, Inner::Closed)
    }

    /// Changes whether drop releases the underlying resource.
    pub fn set_close_on_drop(&mut self, yes: bool) {
        self.close_on_drop = yes;
    }

    /// Registers `listener` to run at close time, on the `when` side of the
    /// resource release. Listeners run in registration order; a failing
    /// listener does not stop the others.
    pub fn on_close(&mut self, when: ListenerWhen, listener: impl FnOnce() -> Result<()> + Send + 'static) {
        match when {
            ListenerWhen::BeforeClose => self.before_close.push(Box::new(listener)),
            ListenerWhen::AfterClose => self.after_close.push(Box::new(listener)),
        }
    }

    /// Closes the stream: runs before-listeners, finalises and releases the
    /// reader/writer, runs after-listeners. Every stage runs even when an
    /// earlier one fails; failures are aggregated. Idempotent — a second
    /// call is a no-op returning `Ok`.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut failures: Vec<Error> = Vec::new();

        for listener in self.before_close.drain(..) {
            if let Err(e) = listener() {
                failures.push(e);
            }
        }

        match std::mem::replace(&mut self.inner, Inner::Closed) {
            Inner::Reader(reader) => drop(reader),
            Inner::Writer(mut writer) => {
                if let Err(e) = writer.finish() {
                    failures.push(Error::Io(e));
                }
                drop(writer);
            }
            Inner::Closed => {}
        }

        for listener in self.after_close.drain(..) {
            if let Err(e) = listener() {
                failures.push(e);
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.pop().unwrap_or(Error::CloseErrors(Vec::new()))),
            _ => Err(Error::CloseErrors(failures)),
        }
    }

    /// Iterates the stream's lines, routed through the configured progress
    /// wrapper when one is present. Fails on write-side or closed streams.
    pub fn lines(&mut self) -> Result<Box<dyn Iterator<Item = io::Result<String>> + Send + '_>> {
        let name = self.name.clone();
        let progress = self.progress.clone();
        match &mut self.inner {
            Inner::Reader(reader) => {
                let lines: Box<dyn Iterator<Item = io::Result<String>> + Send + '_> =
                    Box::new(reader.lines());
                Ok(match progress {
                    Some(p) => p.wrap(lines, name.as_deref()),
                    None => lines,
                })
            }
            _ => Err(Error::Io(not_readable())),
        }
    }
}

fn not_readable() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "stream is not open for reading")
}

fn not_writable() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "stream is not open for writing")
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Reader(reader) => reader.read(buf),
            _ => Err(not_readable()),
        }
    }
}

impl BufRead for Stream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match &mut self.inner {
            Inner::Reader(reader) => reader.fill_buf(),
            _ => Err(not_readable()),
        }
    }

    fn consume(&mut self, amt: usize) {
        if let Inner::Reader(reader) = &mut self.inner {
            reader.consume(amt);
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Writer(writer) => writer.write(buf),
            _ => Err(not_writable()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            Inner::Writer(writer) => writer.flush(),
            _ => Err(not_writable()),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.inner {
            Inner::Reader(_) => "reader",
            Inner::Writer(_) => "writer",
            Inner::Closed => "closed",
        };
        f.debug_struct("Stream")
            .field("side", &side)
            .field("format", &self.format)
            .field("name", &self.name)
            .field("text", &self.text)
            .field("close_on_drop", &self.close_on_drop)
            .finish()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.close_on_drop && !self.is_closed() {
            if let Err(e) = self.close() {
                log::error!(
                    "error closing stream {}: {e}",
                    self.name.as_deref().unwrap_or("<unnamed>")
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
