//! Device cgroup backend abstraction for v1/v2 dual support.

use crate::config::types::{HookError, Result};
use crate::kernel::mount::mountinfo::{read_mountinfo, MountEntry};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CgroupLayout {
    V1,
    V2,
}

impl CgroupLayout {
    pub fn name(self) -> &'static str {
        match self {
            CgroupLayout::V1 => "cgroup_v1",
            CgroupLayout::V2 => "cgroup_v2",
        }
    }
}

/// The container's device-controlling cgroup directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupTarget {
    pub layout: CgroupLayout,
    pub path: PathBuf,
}

/// One allow rule, `c <major>:<minor> rwm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRule {
    pub major: u64,
    pub minor: u64,
}

impl fmt::Display for DeviceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c {}:{} rwm", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    /// Appended to the whitelist file.
    Written,
    /// Left to the runtime's device program; nothing written.
    Delegated,
}

/// Additive device access for one container cgroup.
pub trait DeviceCgroup {
    fn backend_name(&self) -> &str;
    fn path(&self) -> &Path;
    fn allow(&self, rule: &DeviceRule) -> Result<RuleOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ControllerLine {
    hierarchy: String,
    controllers: Vec<String>,
    path: String,
}

/// Parse `/proc/<pid>/cgroup` (`hierarchy-ID:controller-list:cgroup-path`).
fn parse_proc_cgroup(content: &str) -> Vec<ControllerLine> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, ':');
            let hierarchy = fields.next()?.to_string();
            let controllers = fields.next()?;
            let path = fields.next()?.to_string();
            Some(ControllerLine {
                hierarchy,
                controllers: controllers
                    .split(',')
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect(),
                path,
            })
        })
        .collect()
}

/// Join a mount point with a cgroup path, stripping the mount's root first
/// when the cgroup lives beneath it.
fn join_cgroup_path(mount: &MountEntry, cgroup_path: &str) -> PathBuf {
    let cgroup_path = Path::new(cgroup_path);
    let relative = cgroup_path
        .strip_prefix(&mount.root)
        .unwrap_or(cgroup_path);
    let relative = relative.strip_prefix("/").unwrap_or(relative);
    if relative.as_os_str().is_empty() {
        return mount.mount_point.clone();
    }
    mount.mount_point.join(relative)
}

/// Pick the device cgroup from parsed mountinfo and `/proc/<pid>/cgroup`
/// content. v1 `devices` is preferred because only it carries a whitelist.
pub fn select_device_cgroup(mounts: &[MountEntry], proc_cgroup: &str) -> Result<CgroupTarget> {
    let lines = parse_proc_cgroup(proc_cgroup);

    let v1_mount = mounts
        .iter()
        .find(|m| m.fs_type == "cgroup" && m.has_super_option("devices"));
    if let Some(mount) = v1_mount {
        let line = lines
            .iter()
            .find(|l| l.controllers.iter().any(|c| c == "devices"))
            .ok_or_else(|| {
                HookError::Resolution("no devices controller entry in process cgroup".to_string())
            })?;
        return Ok(CgroupTarget {
            layout: CgroupLayout::V1,
            path: join_cgroup_path(mount, &line.path),
        });
    }

    if let Some(mount) = mounts.iter().find(|m| m.fs_type == "cgroup2") {
        let line = lines
            .iter()
            .find(|l| l.hierarchy == "0" && l.controllers.is_empty())
            .ok_or_else(|| {
                HookError::Resolution("no unified hierarchy entry in process cgroup".to_string())
            })?;
        return Ok(CgroupTarget {
            layout: CgroupLayout::V2,
            path: join_cgroup_path(mount, &line.path),
        });
    }

    Err(HookError::Resolution(
        "unsupported cgroup layout: neither a v1 devices hierarchy nor cgroup2 is mounted"
            .to_string(),
    ))
}

/// Resolve the device cgroup of a live process from the process table.
pub fn resolve_device_cgroup(proc_root: &Path, pid: u32) -> Result<CgroupTarget> {
    let proc_dir = proc_root.join(pid.to_string());
    let mounts = read_mountinfo(&proc_dir.join("mountinfo"))?;

    let cgroup_file = proc_dir.join("cgroup");
    let proc_cgroup = fs::read_to_string(&cgroup_file).map_err(|e| {
        HookError::Resolution(format!("Failed to read {}: {}", cgroup_file.display(), e))
    })?;

    let target = select_device_cgroup(&mounts, &proc_cgroup)?;
    log::debug!(
        "Device cgroup of pid {}: {} at {}",
        pid,
        target.layout.name(),
        target.path.display()
    );
    Ok(target)
}

/// Open the backend matching the resolved layout.
pub fn open_backend(target: &CgroupTarget) -> Result<Box<dyn DeviceCgroup>> {
    match target.layout {
        CgroupLayout::V1 => Ok(Box::new(crate::kernel::cgroup::v1::DevicesV1::open(
            &target.path,
        )?)),
        CgroupLayout::V2 => Ok(Box::new(crate::kernel::cgroup::v2::DevicesV2::open(
            &target.path,
        )?)),
    }
}
