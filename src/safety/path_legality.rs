//! Path legality checks applied to every externally supplied path.
//!
//! A path is legal when its length is within bounds, every character is in
//! the safe charset, and its canonical form equals the supplied form. A path
//! that does not exist yet is tolerated; it can still be redirected through
//! a symlink created after this check runs.

use crate::config::types::ValidationError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Safe charset: ASCII alphanumerics plus `.`, `_`, `-`, `/`, `~`.
pub fn is_valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | '~')
}

fn check_length_and_charset(path: &str, path_max: usize) -> Result<(), ValidationError> {
    if path.is_empty() || path.len() > path_max {
        return Err(ValidationError::PathLength {
            len: path.len(),
            max: path_max,
        });
    }

    if let Some(ch) = path.chars().find(|c| !is_valid_char(*c)) {
        return Err(ValidationError::IllegalCharacter {
            path: path.to_string(),
            ch,
        });
    }

    Ok(())
}

fn compare_canonical(path: &str, canonical: &Path) -> Result<(), ValidationError> {
    if canonical.as_os_str() != path {
        return Err(ValidationError::SymlinkDetected(path.to_string()));
    }
    Ok(())
}

/// Validate an argument path. Non-existent paths pass the symlink check.
pub fn check_path_legality(path: &str, path_max: usize) -> Result<PathBuf, ValidationError> {
    check_length_and_charset(path, path_max)?;

    match Path::new(path).canonicalize() {
        Ok(canonical) => compare_canonical(path, &canonical)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::warn!(
                "{} does not exist yet, accepted without symlink resolution",
                path
            );
        }
        Err(e) => {
            return Err(ValidationError::CanonicalizeFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })
        }
    }

    Ok(PathBuf::from(path))
}

/// Validate a path that must already exist, such as a kernel interface file.
pub fn check_existing_path_legality(
    path: &str,
    path_max: usize,
) -> Result<PathBuf, ValidationError> {
    check_length_and_charset(path, path_max)?;

    let canonical =
        Path::new(path)
            .canonicalize()
            .map_err(|e| ValidationError::CanonicalizeFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
    compare_canonical(path, &canonical)?;

    Ok(canonical)
}
