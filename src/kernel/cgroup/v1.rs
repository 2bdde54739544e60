//! Cgroup v1 device whitelist.

use crate::config::types::{HookError, Result};
use crate::kernel::cgroup::backend::{DeviceCgroup, DeviceRule, RuleOutcome};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const ALLOW_FILE: &str = "devices.allow";

/// Appends rules to `devices.allow` of one cgroup directory.
#[derive(Debug, Clone)]
pub struct DevicesV1 {
    cgroup_path: PathBuf,
    allow_path: PathBuf,
}

impl DevicesV1 {
    pub fn open(cgroup_path: &Path) -> Result<Self> {
        let allow_path = cgroup_path.join(ALLOW_FILE);
        if !allow_path.is_file() {
            return Err(HookError::Cgroup(format!(
                "Device whitelist {} not found",
                allow_path.display()
            )));
        }
        Ok(Self {
            cgroup_path: cgroup_path.to_path_buf(),
            allow_path,
        })
    }
}

impl DeviceCgroup for DevicesV1 {
    fn backend_name(&self) -> &str {
        "cgroup_v1"
    }

    fn path(&self) -> &Path {
        &self.cgroup_path
    }

    /// One rule per write; the kernel parses each write as a single entry.
    fn allow(&self, rule: &DeviceRule) -> Result<RuleOutcome> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.allow_path)
            .map_err(|e| {
                HookError::Cgroup(format!(
                    "Failed to open {}: {}",
                    self.allow_path.display(),
                    e
                ))
            })?;

        file.write_all(rule.to_string().as_bytes()).map_err(|e| {
            HookError::Cgroup(format!(
                "Failed to write rule '{}' to {}: {}",
                rule,
                self.allow_path.display(),
                e
            ))
        })?;

        Ok(RuleOutcome::Written)
    }
}
