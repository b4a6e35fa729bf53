//! Remote sources: URL fetch as a byte stream.
//!
//! URLs are read-only. A successful GET yields a streaming reader over the
//! response body — the body is never buffered whole, so compressed remote
//! files decode incrementally like local ones. Transport failures and
//! non-success statuses both report as a missing source, matching the
//! filesystem behaviour for a path that is not there.

use std::io::Read;
use std::time::Duration;

use crate::error::{Error, Result};

/// Connect timeout for remote fetches. Reads have no overall deadline;
/// streams may legitimately be large and slow.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens `url` for reading, returning a streaming body reader.
pub fn open_url(url: &str) -> Result<Box<dyn Read + Send>> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::SourceNotFound(format!("{url}: {e}")))?;
    let response = client
        .get(url)
        .send()
        .map_err(|e| Error::SourceNotFound(format!("{url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        log::debug!("GET {url} -> {status}");
        return Err(Error::SourceNotFound(format!("{url}: HTTP {status}")));
    }
    Ok(Box::new(response))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
