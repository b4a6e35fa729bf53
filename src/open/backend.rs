//! Backend selection and external filter subprocess plumbing.
//!
//! A resolved format runs through one of two backends: a filter subprocess
//! (`gzip`, `pigz`, `bgzip`, `bzip2`, `xz`) or the in-process codec. The
//! selector prefers the external program when the caller allows it and one
//! of the format's programs is found on the search path (probe results are
//! cached per process); otherwise it falls back to the native codec, and
//! fails with `UnsupportedFormat` only when neither exists.
//!
//! Filter subprocesses never share a blocking thread with the caller: when
//! raw bytes must be fed to the filter's stdin, or its stdout drained into
//! an arbitrary sink, a dedicated pump thread services that pipe end.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::formats::{CodecOp, ExternalOpts, FormatSpec, WriteFinish};
use crate::paths::find_executable;

// ---------------------------------------------------------------------------
// Backend resolution
// ---------------------------------------------------------------------------

/// The concrete mechanism that will perform compression or decompression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Run the program at this path as a filter subprocess.
    External(PathBuf),
    /// Use the format's in-process codec.
    Native,
}

/// Chooses the backend for `fmt`.
///
/// `use_external` disables the external path entirely when `false`. The
/// format's programs are probed in preference order against the config's
/// extra directories and `PATH`.
pub fn resolve_backend(
    fmt: &Arc<dyn FormatSpec>,
    use_external: bool,
    config: &Config,
) -> Result<Backend> {
    if use_external {
        for program in fmt.external_programs() {
            if let Some(exe) = find_executable(program, &config.exec_paths) {
                log::debug!("format {}: external backend {}", fmt.name(), exe.display());
                return Ok(Backend::External(exe));
            }
        }
    }
    if fmt.has_native() {
        log::debug!("format {}: native backend", fmt.name());
        return Ok(Backend::Native);
    }
    Err(Error::UnsupportedFormat(fmt.name().to_string()))
}

// ---------------------------------------------------------------------------
// Spawning helpers
// ---------------------------------------------------------------------------

fn spawn_filter(
    argv: &[std::ffi::OsString],
    stdin: Stdio,
    stdout: Stdio,
) -> Result<(Child, String)> {
    let program = argv[0].to_string_lossy().into_owned();
    let child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::process_spawn(&program, e))?;
    log::trace!("spawned filter: {program} (pid {})", child.id());
    Ok((child, program))
}

fn status_error(program: &str, status: std::process::ExitStatus) -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        Error::process_exit(program, status),
    )
}

// ---------------------------------------------------------------------------
// ExternalReader
// ---------------------------------------------------------------------------

/// Decompressed (or compressed) bytes read from a filter subprocess.
///
/// Two shapes:
/// - named-source: the program opens the file itself; no pump is needed.
/// - filter: raw bytes are fed to the program's stdin by a pump thread
///   while the caller reads its stdout, keeping both pipe ends serviced
///   concurrently.
///
/// Reaching EOF waits for the process and surfaces a non-zero exit status
/// as an error — a truncated stream never looks like a clean end of data.
pub struct ExternalReader {
    program: String,
    child: Child,
    stdout: ChildStdout,
    pump: Option<JoinHandle<io::Result<u64>>>,
    done: bool,
}

impl ExternalReader {
    /// Runs `op` over the named source file (`opts.source` must be set);
    /// the program reads the file directly.
    pub fn from_named_source(
        fmt: &Arc<dyn FormatSpec>,
        exe: &PathBuf,
        op: CodecOp,
        opts: &ExternalOpts,
    ) -> Result<Self> {
        debug_assert!(opts.source.is_some());
        let argv = fmt.external_command(op, exe, opts);
        let (mut child, program) = spawn_filter(&argv, Stdio::null(), Stdio::piped())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process_spawn(&program, missing_pipe("stdout")))?;
        Ok(ExternalReader {
            program,
            child,
            stdout,
            pump: None,
            done: false,
        })
    }

    /// Runs `op` as a stdin→stdout filter over `raw`, pumping `raw` into
    /// the child from a dedicated thread.
    pub fn filter(
        fmt: &Arc<dyn FormatSpec>,
        exe: &PathBuf,
        op: CodecOp,
        opts: &ExternalOpts,
        mut raw: Box<dyn Read + Send>,
    ) -> Result<Self> {
        let argv = fmt.external_command(op, exe, opts);
        let (mut child, program) = spawn_filter(&argv, Stdio::piped(), Stdio::piped())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process_spawn(&program, missing_pipe("stdout")))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::process_spawn(&program, missing_pipe("stdin")))?;

        let pump = std::thread::spawn(move || {
            let copied = io::copy(&mut raw, &mut stdin);
            // Dropping stdin closes the pipe so the filter sees EOF.
            drop(stdin);
            copied
        });

        Ok(ExternalReader {
            program,
            child,
            stdout,
            pump: Some(pump),
            done: false,
        })
    }

    /// Joins the pump, waits for the child, and checks its exit status.
    fn finish(&mut self) -> io::Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        if let Some(pump) = self.pump.take() {
            match pump.join() {
                Ok(result) => {
                    // A BrokenPipe from the pump is expected when the filter
                    // stopped reading early (e.g. trailing garbage policy).
                    if let Err(e) = result {
                        if e.kind() != io::ErrorKind::BrokenPipe {
                            let _ = self.child.wait();
                            return Err(e);
                        }
                    }
                }
                Err(_) => {
                    let _ = self.child.wait();
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "filter input pump panicked",
                    ));
                }
            }
        }
        let status = self.child.wait()?;
        if !status.success() {
            return Err(status_error(&self.program, status));
        }
        Ok(())
    }
}

impl Read for ExternalReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        let n = self.stdout.read(buf)?;
        if n == 0 {
            self.finish()?;
        }
        Ok(n)
    }
}

impl Drop for ExternalReader {
    fn drop(&mut self) {
        if !self.done {
            // Abandoned mid-stream: terminate the filter rather than block.
            let _ = self.child.kill();
            let _ = self.child.wait();
            if let Some(pump) = self.pump.take() {
                let _ = pump.join();
            }
            self.done = true;
        }
    }
}

// ---------------------------------------------------------------------------
// ExternalWriter
// ---------------------------------------------------------------------------

/// Bytes written into a filter subprocess's stdin.
///
/// The filter's stdout goes either directly to a destination file handle, or
/// through a pump thread draining into an arbitrary sink. `finish` closes
/// stdin, joins the pump, waits for the process, and surfaces a non-zero
/// exit.
pub struct ExternalWriter {
    program: String,
    child: Child,
    stdin: Option<std::process::ChildStdin>,
    pump: Option<JoinHandle<io::Result<()>>>,
    finished: bool,
}

impl ExternalWriter {
    /// Compresses into `dest_file` directly: the file handle becomes the
    /// child's stdout, no pump required.
    pub fn to_file(
        fmt: &Arc<dyn FormatSpec>,
        exe: &PathBuf,
        op: CodecOp,
        opts: &ExternalOpts,
        dest_file: std::fs::File,
    ) -> Result<Self> {
        let argv = fmt.external_command(op, exe, opts);
        let (mut child, program) =
            spawn_filter(&argv, Stdio::piped(), Stdio::from(dest_file))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::process_spawn(&program, missing_pipe("stdin")))?;
        Ok(ExternalWriter {
            program,
            child,
            stdin: Some(stdin),
            pump: None,
            finished: false,
        })
    }

    /// Compresses into an arbitrary sink: a pump thread drains the child's
    /// stdout into `dest` concurrently with the caller's writes.
    pub fn to_sink(
        fmt: &Arc<dyn FormatSpec>,
        exe: &PathBuf,
        op: CodecOp,
        opts: &ExternalOpts,
        mut dest: Box<dyn Write + Send>,
    ) -> Result<Self> {
        let argv = fmt.external_command(op, exe, opts);
        let (mut child, program) = spawn_filter(&argv, Stdio::piped(), Stdio::piped())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::process_spawn(&program, missing_pipe("stdin")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process_spawn(&program, missing_pipe("stdout")))?;

        let pump = std::thread::spawn(move || {
            io::copy(&mut stdout, &mut dest)?;
            dest.flush()
        });

        Ok(ExternalWriter {
            program,
            child,
            stdin: Some(stdin),
            pump: Some(pump),
            finished: false,
        })
    }

    fn finish_inner(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        // Closing stdin signals EOF; the filter flushes and exits.
        drop(self.stdin.take());
        if let Some(pump) = self.pump.take() {
            match pump.join() {
                Ok(result) => {
                    if let Err(e) = result {
                        let _ = self.child.wait();
                        return Err(e);
                    }
                }
                Err(_) => {
                    let _ = self.child.wait();
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        "filter output pump panicked",
                    ));
                }
            }
        }
        let status = self.child.wait()?;
        if !status.success() {
            return Err(status_error(&self.program, status));
        }
        Ok(())
    }
}

impl Write for ExternalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stdin {
            Some(stdin) => stdin.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after filter stream was finished",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stdin {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl WriteFinish for ExternalWriter {
    fn finish(&mut self) -> io::Result<()> {
        self.finish_inner()
    }
}

impl Drop for ExternalWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish_inner();
        }
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("child {name} not captured"))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::Gzip;

    /// Format whose declared programs never exist but which has a native
    /// codec; resolution must fall through to native.
    struct NativeOnlyFormat;

    impl FormatSpec for NativeOnlyFormat {
        fn name(&self) -> &'static str {
            "native-only"
        }
        fn extensions(&self) -> &'static [&'static str] {
            &["no"]
        }
        fn signatures(&self) -> &'static [&'static [u8]] {
            &[]
        }
        fn level_range(&self) -> std::ops::RangeInclusive<u32> {
            1..=1
        }
        fn default_level(&self) -> u32 {
            1
        }
        fn external_programs(&self) -> &'static [&'static str] {
            &["zopen-missing-filter-one", "zopen-missing-filter-two"]
        }
        fn external_command(
            &self,
            _op: CodecOp,
            exe: &std::path::Path,
            _opts: &ExternalOpts,
        ) -> Vec<std::ffi::OsString> {
            vec![exe.into()]
        }
        fn native_reader(
            &self,
            inner: Box<dyn Read + Send>,
        ) -> Result<Box<dyn Read + Send>> {
            Ok(inner)
        }
        fn native_writer(
            &self,
            inner: Box<dyn Write + Send>,
            _level: u32,
        ) -> Result<Box<dyn WriteFinish>> {
            Ok(Box::new(crate::formats::PlainWriter(inner)))
        }
    }

    #[test]
    fn native_fallback_when_programs_missing() {
        let config = Config::new();
        let fmt: Arc<dyn FormatSpec> = Arc::new(NativeOnlyFormat);
        let backend = resolve_backend(&fmt, true, &config).unwrap();
        assert_eq!(backend, Backend::Native);
    }

    #[test]
    fn external_disabled_by_preference() {
        let config = Config::new();
        let fmt: Arc<dyn FormatSpec> = Arc::new(Gzip);
        let backend = resolve_backend(&fmt, false, &config).unwrap();
        assert_eq!(backend, Backend::Native);
    }

    struct NoBackendFormat;

    impl FormatSpec for NoBackendFormat {
        fn name(&self) -> &'static str {
            "none"
        }
        fn extensions(&self) -> &'static [&'static str] {
            &["none"]
        }
        fn signatures(&self) -> &'static [&'static [u8]] {
            &[]
        }
        fn level_range(&self) -> std::ops::RangeInclusive<u32> {
            1..=1
        }
        fn default_level(&self) -> u32 {
            1
        }
        fn has_native(&self) -> bool {
            false
        }
        fn external_programs(&self) -> &'static [&'static str] {
            &["zopen-no-such-filter-program"]
        }
        fn external_command(
            &self,
            _op: CodecOp,
            exe: &std::path::Path,
            _opts: &ExternalOpts,
        ) -> Vec<std::ffi::OsString> {
            vec![exe.into()]
        }
        fn native_reader(
            &self,
            _inner: Box<dyn Read + Send>,
        ) -> Result<Box<dyn Read + Send>> {
            Err(Error::UnsupportedFormat("none".into()))
        }
        fn native_writer(
            &self,
            _inner: Box<dyn Write + Send>,
            _level: u32,
        ) -> Result<Box<dyn WriteFinish>> {
            Err(Error::UnsupportedFormat("none".into()))
        }
    }

    #[test]
    fn no_backend_at_all_is_unsupported() {
        let config = Config::new();
        let fmt: Arc<dyn FormatSpec> = Arc::new(NoBackendFormat);
        let err = resolve_backend(&fmt, true, &config).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }
}
