//! Cgroup v2 device access.
//!
//! The unified hierarchy has no whitelist file: device access is decided by
//! an eBPF program the runtime attaches to the container's cgroup. Rules are
//! still computed and recorded so the grant is auditable, but nothing is
//! written here.

use crate::config::types::{HookError, Result};
use crate::kernel::cgroup::backend::{DeviceCgroup, DeviceRule, RuleOutcome};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DevicesV2 {
    cgroup_path: PathBuf,
}

impl DevicesV2 {
    /// The directory must be a live cgroup, i.e. hold `cgroup.procs`.
    pub fn open(cgroup_path: &Path) -> Result<Self> {
        let procs = cgroup_path.join("cgroup.procs");
        if !procs.is_file() {
            return Err(HookError::Cgroup(format!(
                "{} is not a cgroup v2 directory",
                cgroup_path.display()
            )));
        }
        Ok(Self {
            cgroup_path: cgroup_path.to_path_buf(),
        })
    }
}

impl DeviceCgroup for DevicesV2 {
    fn backend_name(&self) -> &str {
        "cgroup_v2"
    }

    fn path(&self) -> &Path {
        &self.cgroup_path
    }

    fn allow(&self, rule: &DeviceRule) -> Result<RuleOutcome> {
        log::warn!(
            "Device rule '{}' for {} not written: cgroup v2 access is granted by the runtime device program",
            rule,
            self.cgroup_path.display()
        );
        Ok(RuleOutcome::Delegated)
    }
}
