//! Bounded reads of small kernel interface files.

use crate::config::types::ValidationError;
use crate::safety::path_legality::check_existing_path_legality;
use std::fs::File;
use std::io::Read;
use std::path::Path;

fn unreadable(path: &Path, reason: impl Into<String>) -> ValidationError {
    ValidationError::PidMaxUnreadable {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Read at most `limit` bytes from `path`. Content filling the whole bound
/// is treated as oversized rather than truncated.
pub fn read_bounded(path: &Path, limit: u64) -> Result<String, ValidationError> {
    let file = File::open(path).map_err(|e| unreadable(path, e.to_string()))?;

    let mut buf = String::new();
    file.take(limit)
        .read_to_string(&mut buf)
        .map_err(|e| unreadable(path, e.to_string()))?;

    if buf.len() as u64 >= limit {
        return Err(unreadable(path, format!("content exceeds {} bytes", limit)));
    }

    Ok(buf)
}

/// Read the live system pid_max value.
///
/// The path must pass legality checks and the content (minus one trailing
/// newline) must be all decimal digits.
pub fn read_pid_max(path: &Path, limit: u64, path_max: usize) -> Result<u64, ValidationError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| unreadable(path, "path is not valid UTF-8"))?;
    check_existing_path_legality(path_str, path_max)?;

    let content = read_bounded(path, limit)?;
    let value = content.strip_suffix('\n').unwrap_or(&content);

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(unreadable(path, format!("unexpected content {:?}", value)));
    }

    value
        .parse::<u64>()
        .map_err(|e| unreadable(path, e.to_string()))
}
