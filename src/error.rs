//! Crate-wide error taxonomy.
//!
//! Every fallible operation returns [`Result`]. Open-time failures carry
//! enough context to name the source, the format, or the program involved;
//! close-time failures from listeners and finalisers are aggregated into
//! [`Error::CloseErrors`] so one bad stage never hides another.

use std::io;
use std::path::Path;
use std::process::ExitStatus;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All failures the open pipeline, streams, and process handles report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source does not exist or could not be reached.
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// A format name or file signature no registered format handles, or a
    /// format with no usable backend.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// An explicitly requested read format does not match the stream's
    /// magic bytes.
    #[error("format mismatch: requested {requested}, detected {}", .detected.as_deref().unwrap_or("none"))]
    FormatMismatch {
        /// The format the caller asked for.
        requested: String,
        /// What the magic bytes actually identify, if anything.
        detected: Option<String>,
    },

    /// The source exists but cannot be opened for the requested access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An external program failed to start or exited abnormally.
    #[error("process failure in '{program}': {message}")]
    ProcessFailure {
        /// The program or command line involved.
        program: String,
        /// What went wrong.
        message: String,
    },

    /// A configuration or open-spec value the pipeline cannot act on.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// An underlying I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Several independent failures during close.
    #[error("multiple close errors: {}", format_causes(.0))]
    CloseErrors(Vec<Error>),
}

impl Error {
    /// A [`ProcessFailure`](Error::ProcessFailure) for a non-zero exit.
    pub fn process_exit(program: &str, status: ExitStatus) -> Error {
        Error::ProcessFailure {
            program: program.to_string(),
            message: format!("exited with {status}"),
        }
    }

    /// A [`ProcessFailure`](Error::ProcessFailure) for a spawn error.
    pub fn process_spawn(program: &str, err: io::Error) -> Error {
        Error::ProcessFailure {
            program: program.to_string(),
            message: format!("failed to start: {err}"),
        }
    }

    /// Maps a file-open error to the taxonomy, keeping the path in the
    /// message.
    pub fn from_open(path: &Path, err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::NotFound => Error::SourceNotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(path.display().to_string())
            }
            _ => Error::Io(err),
        }
    }
}

fn format_causes(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
