//! Opener configuration.
//!
//! All tunables live in a single explicit [`Config`] value owned by the
//! [`Opener`](crate::open::Opener). There is no hidden process-global
//! "configure" call: callers that want non-default behaviour construct a
//! `Config`, validate it, and hand it to `Opener::new`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::stream::ProgressWrap;

/// Tunable parameters read by the stream opener and process launcher.
#[derive(Clone)]
pub struct Config {
    /// Worker threads for multi-threaded external gzip compression. Passed
    /// as `-p <n>` when the resolved gzip executable is `pigz`; ignored for
    /// programs without a threading flag. Default: the physical core count.
    pub threads: usize,
    /// Extra directories searched for external compression programs, probed
    /// in order *before* the `PATH` environment variable.
    pub exec_paths: Vec<PathBuf>,
    /// Default backend preference: when `true`, formats that declare an
    /// external program use it if one is found on the search path. Can be
    /// overridden per call via the open spec.
    pub use_external: bool,
    /// Default ownership flag for opened streams: when `true`, dropping a
    /// stream releases the underlying resource. Caller-supplied handles
    /// default to `false` regardless of this setting.
    pub close_on_drop: bool,
    /// Optional progress-wrapping capability applied to line iteration.
    /// This is an external collaborator seam; the crate never renders
    /// progress itself.
    pub progress: Option<Arc<dyn ProgressWrap>>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("threads", &self.threads)
            .field("exec_paths", &self.exec_paths)
            .field("use_external", &self.use_external)
            .field("close_on_drop", &self.close_on_drop)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressWrap>"))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            threads: default_threads(),
            exec_paths: Vec::new(),
            use_external: true,
            close_on_drop: true,
            progress: None,
        }
    }
}

/// Default worker count for multi-threaded external compression: the
/// physical core count, never less than one.
pub fn default_threads() -> usize {
    num_cpus::get_physical().max(1)
}

impl Config {
    /// Creates a config with all defaults applied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the external-compression thread count.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Appends a directory to the executable search list.
    pub fn exec_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exec_paths.push(dir.into());
        self
    }

    /// Sets the default backend preference.
    pub fn use_external(mut self, yes: bool) -> Self {
        self.use_external = yes;
        self
    }

    /// Sets the default ownership flag for opened streams.
    pub fn close_on_drop(mut self, yes: bool) -> Self {
        self.close_on_drop = yes;
        self
    }

    /// Sets the progress-wrapping capability.
    pub fn progress(mut self, progress: Arc<dyn ProgressWrap>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Checks the configuration for values the opener cannot act on.
    ///
    /// Rejects a zero thread count and any `exec_paths` entry that exists
    /// but is not a directory. A listed directory that simply does not exist
    /// is accepted — probe time treats it as empty.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::ConfigurationError(
                "threads must be at least 1".into(),
            ));
        }
        for dir in &self.exec_paths {
            if dir.exists() && !dir.is_dir() {
                return Err(Error::ConfigurationError(format!(
                    "exec path is not a directory: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
