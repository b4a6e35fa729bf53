//! Subprocess endpoints: launch a command with its standard streams routed
//! through the open pipeline.
//!
//! [`ProcessBuilder`] describes where each of the child's three standard
//! streams goes: inherited, discarded, a pipe held by the caller (optionally
//! codec-wrapped), or a file opened through the [`Opener`] — so a `.gz`
//! stdout path compresses transparently and a compressed stdin path is
//! decompressed before the child sees it.
//!
//! File endpoints are serviced by pump threads, and when both stdin and
//! stdout are caller-held pipes the child's stdout is drained into a
//! channel-backed reader concurrently, so the caller can finish writing
//! without the child wedging on a full pipe buffer.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};

use crate::error::{Error, Result};
use crate::open::{Compression, OpenSpec, Opener, Source};
use crate::stream::Stream;

/// Chunk size for pump threads and the stdout drain channel.
const PUMP_CHUNK: usize = 8192;

/// Drain-channel depth before the pump thread blocks.
const PUMP_CHANNEL_DEPTH: usize = 16;

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Where one of the child's standard streams is routed.
#[derive(Debug, Default)]
pub enum Endpoint {
    /// Share the parent's stream.
    #[default]
    Inherit,
    /// Discard (read endless EOF / write to the void).
    Null,
    /// A pipe held by the caller as a [`Stream`], wrapped per the
    /// compression directive. `Auto` on a pipe means raw: there is no name
    /// to infer from, and process output is never sniffed.
    Pipe(Compression),
    /// A file opened through the [`Opener`] with `Auto` compression, pumped
    /// to or from the child by a background thread.
    Path(PathBuf),
    /// A pre-opened stream: readable for stdin, writable for stdout and
    /// stderr. Ownership transfers to the handle; the stream is closed when
    /// the pump finishes.
    Stream(Stream),
}

impl Endpoint {
    /// A raw caller-held pipe.
    pub fn pipe() -> Self {
        Endpoint::Pipe(Compression::None)
    }

    fn stdio(&self) -> Stdio {
        match self {
            Endpoint::Inherit => Stdio::inherit(),
            Endpoint::Null => Stdio::null(),
            Endpoint::Pipe(_) | Endpoint::Path(_) | Endpoint::Stream(_) => Stdio::piped(),
        }
    }

    fn is_pipe(&self) -> bool {
        matches!(self, Endpoint::Pipe(_))
    }
}

// ---------------------------------------------------------------------------
// ProcessBuilder
// ---------------------------------------------------------------------------

/// Builder for a child process with opener-routed standard streams.
#[derive(Debug)]
pub struct ProcessBuilder {
    program: OsString,
    args: Vec<OsString>,
    stdin: Endpoint,
    stdout: Endpoint,
    stderr: Endpoint,
}

impl ProcessBuilder {
    /// Starts a builder for `program`; all endpoints default to inherit.
    pub fn new(program: impl Into<OsString>) -> Self {
        ProcessBuilder {
            program: program.into(),
            args: Vec::new(),
            stdin: Endpoint::Inherit,
            stdout: Endpoint::Inherit,
            stderr: Endpoint::Inherit,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Routes the child's stdin.
    pub fn stdin(mut self, endpoint: Endpoint) -> Self {
        self.stdin = endpoint;
        self
    }

    /// Routes the child's stdout.
    pub fn stdout(mut self, endpoint: Endpoint) -> Self {
        self.stdout = endpoint;
        self
    }

    /// Routes the child's stderr.
    pub fn stderr(mut self, endpoint: Endpoint) -> Self {
        self.stderr = endpoint;
        self
    }

    /// Spawns the child and wires up the endpoints.
    pub fn spawn(self, opener: &Opener) -> Result<ProcessHandle> {
        let program = self.program.to_string_lossy().into_owned();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(self.stdin.stdio())
            .stdout(self.stdout.stdio())
            .stderr(self.stderr.stdio())
            .spawn()
            .map_err(|e| Error::process_spawn(&program, e))?;
        log::debug!("spawned {program} (pid {})", child.id());

        let mut pumps: Vec<JoinHandle<io::Result<()>>> = Vec::new();
        let both_pipes = self.stdin.is_pipe() && self.stdout.is_pipe();

        let stdin = match self.stdin {
            Endpoint::Pipe(compression) => {
                let pipe = child.stdin.take().ok_or_else(|| pipe_missing(&program))?;
                Some(
                    opener.open(
                        OpenSpec::write(Source::Writer(Box::new(pipe)))
                            .compression(compression)
                            .close_on_drop(true),
                    )?,
                )
            }
            Endpoint::Path(path) => {
                let pipe = child.stdin.take().ok_or_else(|| pipe_missing(&program))?;
                let stream = opener.open(OpenSpec::read(path.as_path()))?;
                pumps.push(pump_into_child(stream, pipe));
                None
            }
            Endpoint::Stream(stream) => {
                let pipe = child.stdin.take().ok_or_else(|| pipe_missing(&program))?;
                pumps.push(pump_into_child(stream, pipe));
                None
            }
            _ => None,
        };

        let stdout = match self.stdout {
            Endpoint::Pipe(compression) => {
                let pipe = child.stdout.take().ok_or_else(|| pipe_missing(&program))?;
                // Auto would sniff the child's output at open time and
                // block before the caller has written anything.
                let compression = match compression {
                    Compression::Auto => Compression::None,
                    other => other,
                };
                let reader: Box<dyn Read + Send> = if both_pipes {
                    let (drained, pump) = drain_to_channel(pipe);
                    pumps.push(pump);
                    Box::new(drained)
                } else {
                    Box::new(pipe)
                };
                Some(
                    opener.open(
                        OpenSpec::read(Source::Reader(reader))
                            .compression(compression)
                            .close_on_drop(true),
                    )?,
                )
            }
            Endpoint::Path(path) => {
                let pipe = child.stdout.take().ok_or_else(|| pipe_missing(&program))?;
                let stream = opener.open(OpenSpec::write(path.as_path()))?;
                pumps.push(pump_from_child(Box::new(pipe), stream));
                None
            }
            Endpoint::Stream(stream) => {
                let pipe = child.stdout.take().ok_or_else(|| pipe_missing(&program))?;
                pumps.push(pump_from_child(Box::new(pipe), stream));
                None
            }
            _ => None,
        };

        let stderr = match self.stderr {
            Endpoint::Pipe(_) => {
                let pipe = child.stderr.take().ok_or_else(|| pipe_missing(&program))?;
                Some(
                    opener.open(
                        OpenSpec::read(Source::Reader(Box::new(pipe)))
                            .compression(Compression::None)
                            .close_on_drop(true),
                    )?,
                )
            }
            Endpoint::Path(path) => {
                let pipe = child.stderr.take().ok_or_else(|| pipe_missing(&program))?;
                let stream = opener.open(OpenSpec::write(path.as_path()))?;
                pumps.push(pump_from_child(Box::new(pipe), stream));
                None
            }
            Endpoint::Stream(stream) => {
                let pipe = child.stderr.take().ok_or_else(|| pipe_missing(&program))?;
                pumps.push(pump_from_child(Box::new(pipe), stream));
                None
            }
            _ => None,
        };

        Ok(ProcessHandle {
            child,
            program,
            stdin,
            stdout,
            stderr,
            pumps,
            status: None,
        })
    }
}

fn pipe_missing(program: &str) -> Error {
    Error::process_spawn(
        program,
        io::Error::new(io::ErrorKind::BrokenPipe, "child pipe not captured"),
    )
}

/// Pump: opened read stream into the child's stdin, then close both ends.
fn pump_into_child(
    mut stream: Stream,
    mut pipe: std::process::ChildStdin,
) -> JoinHandle<io::Result<()>> {
    std::thread::spawn(move || {
        let copied = io::copy(&mut stream, &mut pipe);
        drop(pipe);
        let closed = stream.close();
        copied?;
        closed.map_err(io::Error::other)
    })
}

/// Pump: a child output pipe into an opened write stream, then close it.
fn pump_from_child(
    mut pipe: Box<dyn Read + Send>,
    mut stream: Stream,
) -> JoinHandle<io::Result<()>> {
    std::thread::spawn(move || {
        let copied = io::copy(&mut pipe, &mut stream);
        let closed = stream.close();
        copied?;
        closed.map_err(io::Error::other)
    })
}

// ---------------------------------------------------------------------------
// Concurrent stdout drain
// ---------------------------------------------------------------------------

/// Reader over chunks pumped off the child's stdout by a background thread.
struct ChannelReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    buf: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.buf.len() {
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Ok(Err(e)) => return Err(e),
                // Pump finished and hung up: end of stream.
                Err(_) => return Ok(0),
            }
        }
        let n = (self.buf.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn drain_to_channel(
    mut pipe: std::process::ChildStdout,
) -> (ChannelReader, JoinHandle<io::Result<()>>) {
    let (tx, rx) = bounded(PUMP_CHANNEL_DEPTH);
    let pump = std::thread::spawn(move || loop {
        let mut chunk = vec![0u8; PUMP_CHUNK];
        match pipe.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                chunk.truncate(n);
                if tx.send(Ok(chunk)).is_err() {
                    // Reader dropped; stop draining.
                    return Ok(());
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return Ok(());
            }
        }
    });
    (
        ChannelReader {
            rx,
            buf: Vec::new(),
            pos: 0,
        },
        pump,
    )
}

// ---------------------------------------------------------------------------
// ProcessHandle
// ---------------------------------------------------------------------------

/// A running child process plus its opener-routed streams.
///
/// `Write` feeds the stdin pipe; `Read` drains the stdout pipe. [`close`]
/// finishes the streams, joins the pumps, and records the exit status
/// exactly once; dropping an unclosed handle closes it and logs failures.
///
/// [`close`]: ProcessHandle::close
pub struct ProcessHandle {
    child: Child,
    program: String,
    stdin: Option<Stream>,
    stdout: Option<Stream>,
    stderr: Option<Stream>,
    pumps: Vec<JoinHandle<io::Result<()>>>,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    /// The child's process id.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// The stdin stream, when stdin was routed as a pipe and not yet closed.
    pub fn stdin(&mut self) -> Option<&mut Stream> {
        self.stdin.as_mut()
    }

    /// The stdout stream, when stdout was routed as a pipe.
    pub fn stdout(&mut self) -> Option<&mut Stream> {
        self.stdout.as_mut()
    }

    /// The stderr stream, when stderr was routed as a pipe.
    pub fn stderr(&mut self) -> Option<&mut Stream> {
        self.stderr.as_mut()
    }

    /// The recorded exit status, once [`close`](Self::close) has run.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Closes just the stdin stream, signalling end-of-input to the child
    /// while its output side stays open for reading.
    pub fn close_stdin(&mut self) -> Result<()> {
        match self.stdin.take() {
            Some(mut stream) => stream.close(),
            None => Ok(()),
        }
    }

    /// Closes all endpoints, waits for the child, and records its exit
    /// status. Stdin goes first so the child sees end-of-input, then the
    /// output streams are released so their pumps can finish even when the
    /// caller never read them. Idempotent: later calls return the recorded
    /// status.
    pub fn close(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let mut failures: Vec<Error> = Vec::new();

        if let Err(e) = self.close_stdin() {
            failures.push(e);
        }
        // Output streams go before the pump join: a drain blocked on a full
        // channel can only exit once its receiver is gone.
        for stream in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            let mut stream = stream;
            if let Err(e) = stream.close() {
                failures.push(e);
            }
        }
        for pump in self.pumps.drain(..) {
            match pump.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(Error::Io(e)),
                Err(_) => failures.push(Error::ProcessFailure {
                    program: self.program.clone(),
                    message: "endpoint pump panicked".into(),
                }),
            }
        }

        let status = self.child.wait().map_err(Error::Io)?;
        self.status = Some(status);

        match failures.len() {
            0 => Ok(status),
            1 => Err(failures.pop().unwrap_or(Error::CloseErrors(Vec::new()))),
            _ => Err(Error::CloseErrors(failures)),
        }
    }

    /// Closes the handle and fails if the child exited non-zero.
    pub fn expect_success(&mut self) -> Result<()> {
        let status = self.close()?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::process_exit(&self.program, status))
        }
    }
}

impl Write for ProcessHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stdin {
            Some(stream) => stream.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdin is not a pipe or was already closed",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stdin {
            Some(stream) => stream.flush(),
            None => Ok(()),
        }
    }
}

impl Read for ProcessHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stdout {
            Some(stream) => stream.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stdout is not a pipe",
            )),
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .field("status", &self.status)
            .finish()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.status.is_none() {
            if let Err(e) = self.close() {
                log::error!("error closing process {}: {e}", self.program);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shell-command sources (the `|cmd` sentinel)
// ---------------------------------------------------------------------------

fn shell_command(cmd: &str) -> Command {
    #[cfg(unix)]
    {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    }
    #[cfg(not(unix))]
    {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    }
}

/// Reader over a shell command's stdout. EOF waits for the command and
/// surfaces a non-zero exit as an error.
struct ShellReader {
    cmd: String,
    child: Child,
    stdout: std::process::ChildStdout,
    done: bool,
}

impl Read for ShellReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        let n = self.stdout.read(buf)?;
        if n == 0 {
            self.done = true;
            let status = self.child.wait()?;
            if !status.success() {
                return Err(io::Error::other(Error::process_exit(&self.cmd, status)));
            }
        }
        Ok(n)
    }
}

impl Drop for ShellReader {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Writer into a shell command's stdin; dropping closes the pipe and reaps
/// the command. The paired [`ShellExit`] reports the recorded status.
struct ShellWriter {
    child: Arc<Mutex<Child>>,
    stdin: Option<std::process::ChildStdin>,
}

impl Write for ShellWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stdin {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stdin {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ShellWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = lock_child(&self.child).wait();
    }
}

/// Deferred exit check for a shell-command sink, run once the stream has
/// released the writer. A non-zero exit surfaces as a close failure instead
/// of vanishing into a drop.
pub(crate) struct ShellExit {
    cmd: String,
    child: Arc<Mutex<Child>>,
}

impl ShellExit {
    /// Waits for the command and fails on a non-zero exit. `Child::wait`
    /// returns the recorded status when the writer's drop already reaped it.
    pub(crate) fn wait(self) -> Result<()> {
        let status = lock_child(&self.child).wait().map_err(Error::Io)?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::process_exit(&self.cmd, status))
        }
    }
}

fn lock_child(child: &Arc<Mutex<Child>>) -> std::sync::MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Opens a shell command's stdout as a raw read source.
pub(crate) fn shell_reader(cmd: &str) -> Result<Box<dyn Read + Send>> {
    let mut child = shell_command(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| Error::process_spawn(cmd, e))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| pipe_missing(cmd))?;
    Ok(Box::new(ShellReader {
        cmd: cmd.to_string(),
        child,
        stdout,
        done: false,
    }))
}

/// Opens a shell command's stdin as a raw write sink, paired with the exit
/// check the opener wires into the stream's close path.
pub(crate) fn shell_writer(cmd: &str) -> Result<(Box<dyn Write + Send>, ShellExit)> {
    let mut child = shell_command(cmd)
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .spawn()
        .map_err(|e| Error::process_spawn(cmd, e))?;
    let stdin = child.stdin.take().ok_or_else(|| pipe_missing(cmd))?;
    let child = Arc::new(Mutex::new(child));
    Ok((
        Box::new(ShellWriter {
            child: child.clone(),
            stdin: Some(stdin),
        }),
        ShellExit {
            cmd: cmd.to_string(),
            child,
        },
    ))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
