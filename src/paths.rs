//! Path and executable utilities consumed by the backend selector.
//!
//! Two concerns live here:
//!
//! - [`find_executable`] — resolves a program name to an absolute path by
//!   scanning the caller's extra directories and then `PATH`, with a
//!   process-wide cache so each program is probed against the filesystem at
//!   most once per process (first-population races redundantly probe but
//!   converge to the same result).
//! - The `safe_*` checks — explicit, separately-named variants of
//!   existence/permission checks that convert failure into `false` instead
//!   of propagating. They are never the default behaviour of any open path.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::formats::{FormatRegistry, FormatSpec};

// ---------------------------------------------------------------------------
// Executable probing
// ---------------------------------------------------------------------------

/// Process-wide executable probe cache, keyed by program name.
static EXEC_CACHE: OnceLock<Mutex<HashMap<String, Option<PathBuf>>>> = OnceLock::new();

fn exec_cache() -> &'static Mutex<HashMap<String, Option<PathBuf>>> {
    EXEC_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the absolute path of `name` if it resolves to an executable file,
/// searching `extra_dirs` first and then every entry of `PATH`.
///
/// Results (including negative ones) are cached per program name for the
/// lifetime of the process. Safe for concurrent callers; a race on first
/// population probes twice and stores the same answer.
pub fn find_executable(name: &str, extra_dirs: &[PathBuf]) -> Option<PathBuf> {
    if let Some(cached) = exec_cache()
        .lock()
        .ok()
        .and_then(|cache| cache.get(name).cloned())
    {
        return cached;
    }

    let found = probe_executable(name, extra_dirs);
    log::debug!(
        "executable probe: {} -> {}",
        name,
        found
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found".into())
    );
    if let Ok(mut cache) = exec_cache().lock() {
        cache.insert(name.to_string(), found.clone());
    }
    found
}

/// Drops every cached probe result. Intended for tests that manipulate the
/// search path between assertions.
pub fn clear_executable_cache() {
    if let Ok(mut cache) = exec_cache().lock() {
        cache.clear();
    }
}

fn probe_executable(name: &str, extra_dirs: &[PathBuf]) -> Option<PathBuf> {
    // An explicit path bypasses the search entirely.
    if name.contains(std::path::MAIN_SEPARATOR) {
        let candidate = PathBuf::from(name);
        return is_executable(&candidate).then_some(candidate);
    }

    let path_var = env::var_os("PATH").unwrap_or_default();
    let search = extra_dirs
        .iter()
        .cloned()
        .chain(env::split_paths(&path_var));
    for dir in search {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let candidate = dir.join(format!("{name}.exe"));
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Returns `true` if `path` is a regular file the current user may execute.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use nix::unistd::{access, AccessFlags};
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

/// Returns `true` if `path` is a regular file (Windows has no executable bit).
#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ---------------------------------------------------------------------------
// Compression extensions
// ---------------------------------------------------------------------------

/// Splits a registered compression extension off `path`.
///
/// Returns the path without the extension and the format it names, or the
/// path unchanged with `None` when no registered extension matches. Only
/// the compression extension is stripped: `reads.fastq.gz` becomes
/// `reads.fastq`.
pub fn split_compression_ext<'a>(
    path: &Path,
    registry: &'a FormatRegistry,
) -> (PathBuf, Option<&'a Arc<dyn FormatSpec>>) {
    let name = path.to_string_lossy();
    if let Some(fmt) = registry.by_extension(name.as_ref()) {
        let lower = name.to_ascii_lowercase();
        let matched = fmt
            .extensions()
            .iter()
            .filter(|ext| lower.ends_with(&format!(".{ext}")))
            .max_by_key(|ext| ext.len());
        if let Some(ext) = matched {
            let trimmed = &name[..name.len() - ext.len() - 1];
            return (PathBuf::from(trimmed), Some(fmt));
        }
    }
    (path.to_path_buf(), None)
}

// ---------------------------------------------------------------------------
// Safe path checks
// ---------------------------------------------------------------------------

/// Returns `true` if `path` exists, is a regular file, and is readable.
///
/// This is the explicit "safe" variant: every failure mode collapses to
/// `false`. The opener itself never uses this — open failures there surface
/// as typed errors.
pub fn safe_is_readable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use nix::unistd::{access, AccessFlags};
        path.is_file() && access(path, AccessFlags::R_OK).is_ok()
    }
    #[cfg(not(unix))]
    {
        path.is_file() && std::fs::File::open(path).is_ok()
    }
}

/// Returns `true` if `path` can be written: either it exists and is
/// writable, or it does not exist and its parent directory is writable.
pub fn safe_is_writable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use nix::unistd::{access, AccessFlags};
        if path.exists() {
            return access(path, AccessFlags::W_OK).is_ok();
        }
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        access(&parent, AccessFlags::W_OK).is_ok()
    }
    #[cfg(not(unix))]
    {
        if path.exists() {
            return !std::fs::metadata(path)
                .map(|m| m.permissions().readonly())
                .unwrap_or(true);
        }
        path.parent().map(Path::exists).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
