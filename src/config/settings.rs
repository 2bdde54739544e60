//! Hook settings passed explicitly through the pipeline.

use crate::config::types::{MAX_DEVICE_NR, MAX_MOUNT_NR, PATH_MAX, PID_MAX_READ_LIMIT};
use std::path::{Path, PathBuf};

/// Host paths that may be bind-mounted into a container. Nothing else is
/// ever accepted for `--mount-file` or `--mount-dir`.
pub const DEFAULT_MOUNT_WHITELIST: [&str; 4] = [
    "/usr/local/Ascend/driver/lib64",
    "/usr/local/Ascend/driver/include",
    "/usr/local/dcmi",
    "/usr/local/bin/npu-smi",
];

/// Device node naming on the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceNaming {
    /// Prefix of physical accelerator nodes, e.g. `davinci0`.
    pub physical_prefix: String,
    /// Prefix of virtual accelerator nodes, e.g. `vdavinci0`.
    pub virtual_prefix: String,
    /// Management nodes shared by every accelerator.
    pub control_devices: Vec<String>,
}

impl Default for DeviceNaming {
    fn default() -> Self {
        Self {
            physical_prefix: "davinci".to_string(),
            virtual_prefix: "vdavinci".to_string(),
            control_devices: vec![
                "davinci_manager".to_string(),
                "devmm_svm".to_string(),
                "hisi_hdc".to_string(),
            ],
        }
    }
}

/// Bounds enforced as explicit validation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_mount_nr: usize,
    pub max_device_nr: usize,
    pub path_max: usize,
    pub pid_max_read_limit: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_mount_nr: MAX_MOUNT_NR,
            max_device_nr: MAX_DEVICE_NR,
            path_max: PATH_MAX,
            pid_max_read_limit: PID_MAX_READ_LIMIT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HookSettings {
    pub mount_whitelist: Vec<PathBuf>,
    /// Root of the process table, `/proc` in production.
    pub proc_root: PathBuf,
    /// Host device directory, `/dev` in production.
    pub dev_root: PathBuf,
    pub devices: DeviceNaming,
    pub limits: Limits,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            mount_whitelist: DEFAULT_MOUNT_WHITELIST.iter().map(PathBuf::from).collect(),
            proc_root: PathBuf::from("/proc"),
            dev_root: PathBuf::from("/dev"),
            devices: DeviceNaming::default(),
            limits: Limits::default(),
        }
    }
}

impl HookSettings {
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    pub fn with_dev_root(mut self, dev_root: impl Into<PathBuf>) -> Self {
        self.dev_root = dev_root.into();
        self
    }

    pub fn pid_max_path(&self) -> PathBuf {
        self.proc_root.join("sys/kernel/pid_max")
    }

    /// Exact spelling match. `Path` equality would also accept trailing
    /// slashes, doubled separators and `.` components.
    pub fn is_whitelisted(&self, path: &Path) -> bool {
        self.mount_whitelist
            .iter()
            .any(|allowed| allowed.as_os_str() == path.as_os_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_whitelist_has_four_driver_paths() {
        let settings = HookSettings::default();
        assert_eq!(settings.mount_whitelist.len(), 4);
        assert!(settings.is_whitelisted(Path::new("/usr/local/dcmi")));
        assert!(settings.is_whitelisted(Path::new("/usr/local/bin/npu-smi")));
        assert!(!settings.is_whitelisted(Path::new("/usr/local/dcmi/")));
        assert!(!settings.is_whitelisted(Path::new("/usr//local/dcmi")));
        assert!(!settings.is_whitelisted(Path::new("/usr/local/./dcmi")));
        assert!(!settings.is_whitelisted(Path::new("/tmp/evil")));
    }

    #[test]
    fn pid_max_path_follows_proc_root() {
        let settings = HookSettings::default().with_proc_root("/tmp/fakeproc");
        assert_eq!(
            settings.pid_max_path(),
            PathBuf::from("/tmp/fakeproc/sys/kernel/pid_max")
        );
        assert_eq!(
            HookSettings::default().pid_max_path(),
            PathBuf::from("/proc/sys/kernel/pid_max")
        );
    }
}
