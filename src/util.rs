//! Shared utility functions for the changeflow crate.

use crate::errors::ResourceError;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The document is written to a temporary file in the same directory, synced,
/// then renamed over the target. Readers observe either the previous file or
/// the new one, never a partial write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ResourceError> {
    let persist_err = |source: std::io::Error| ResourceError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(persist_err)?;

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| persist_err(std::io::Error::other(e)))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(persist_err)?;
    tmp.write_all(&json).map_err(persist_err)?;
    tmp.as_file().sync_all().map_err(persist_err)?;
    tmp.persist(path).map_err(|e| persist_err(e.error))?;
    Ok(())
}

/// Format a duration as `1h 02m 03s`, `2m 05s` or `7s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
