//! `/proc/<pid>/mountinfo` parsing.
//!
//! Format: `mount_id parent_id major:minor root mount_point options
//! [optional fields...] - fs_type source super_options`

use crate::config::types::{HookError, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_id: u32,
    pub parent_id: u32,
    /// Root of the mount within its filesystem.
    pub root: PathBuf,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub source: String,
    pub super_options: Vec<String>,
}

impl MountEntry {
    pub fn has_super_option(&self, option: &str) -> bool {
        self.super_options.iter().any(|o| o == option)
    }
}

/// Decode the kernel's octal escapes (`\040` for space, `\011` tab,
/// `\012` newline, `\134` backslash). Malformed escapes are kept literally.
pub fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Parse one mountinfo line. Returns `None` for lines that do not follow
/// the format.
pub fn parse_line(line: &str) -> Option<MountEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 10 {
        return None;
    }

    let mount_id = parts[0].parse::<u32>().ok()?;
    let parent_id = parts[1].parse::<u32>().ok()?;

    // Optional fields end at the "-" separator.
    let sep = parts.iter().skip(6).position(|&p| p == "-")? + 6;
    if sep + 3 >= parts.len() {
        return None;
    }

    Some(MountEntry {
        mount_id,
        parent_id,
        root: PathBuf::from(unescape(parts[3])),
        mount_point: PathBuf::from(unescape(parts[4])),
        fs_type: parts[sep + 1].to_string(),
        source: unescape(parts[sep + 2]),
        super_options: parts[sep + 3].split(',').map(str::to_string).collect(),
    })
}

pub fn parse(content: &str) -> Vec<MountEntry> {
    content.lines().filter_map(parse_line).collect()
}

/// Read and parse a mountinfo file.
pub fn read_mountinfo(path: &Path) -> Result<Vec<MountEntry>> {
    let content = fs::read_to_string(path).map_err(|e| {
        HookError::Resolution(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Ok(parse(&content))
}
