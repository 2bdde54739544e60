//! Shared fixtures: a fake host tree plus recording kernel seams.

#![allow(dead_code)]

use npu_prestart::config::settings::HookSettings;
use npu_prestart::config::validator::ArgIndicator;
use npu_prestart::kernel::mount::Mounter;
use npu_prestart::kernel::namespace::{NamespaceKind, NamespaceSwitcher};
use npu_prestart::observability::audit::AuditLog;
use npu_prestart::{HookError, Result};
use std::cell::{Cell, RefCell};
use std::fs;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

pub const HOST_NS: &str = "host";
pub const CONTAINER_PID: u32 = 4242;

/// Temporary tree standing in for `/proc`, `/dev`, the container cgroup
/// and the container rootfs.
pub struct FakeHost {
    _root: tempfile::TempDir,
    pub base: PathBuf,
    pub settings: HookSettings,
    pub rootfs: PathBuf,
    pub cgroup_dir: PathBuf,
    pub audit_path: PathBuf,
}

impl FakeHost {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().canonicalize().unwrap();

        let proc = base.join("proc");
        fs::create_dir_all(proc.join("sys/kernel")).unwrap();
        fs::write(proc.join("sys/kernel/pid_max"), "4194304\n").unwrap();

        let cgroup_mount = base.join("cgroup/devices");
        let cgroup_dir = cgroup_mount.join("ctr");
        fs::create_dir_all(&cgroup_dir).unwrap();
        fs::write(cgroup_dir.join("devices.allow"), "").unwrap();

        let pid_dir = proc.join(CONTAINER_PID.to_string());
        fs::create_dir_all(pid_dir.join("ns")).unwrap();
        fs::write(pid_dir.join("ns/mnt"), "").unwrap();
        fs::write(
            pid_dir.join("mountinfo"),
            format!(
                "35 30 0:31 / {} rw,nosuid shared:15 - cgroup cgroup rw,devices\n",
                cgroup_mount.display()
            ),
        )
        .unwrap();
        fs::write(pid_dir.join("cgroup"), "11:memory:/ctr\n4:devices:/ctr\n").unwrap();

        fs::create_dir_all(proc.join("self/ns")).unwrap();
        fs::write(proc.join("self/ns/mnt"), "").unwrap();

        // Character devices every Linux host has stand in for accelerators.
        let dev = base.join("dev");
        fs::create_dir_all(&dev).unwrap();
        symlink("/dev/null", dev.join("davinci0")).unwrap();
        symlink("/dev/zero", dev.join("davinci1")).unwrap();
        for name in ["davinci_manager", "devmm_svm", "hisi_hdc"] {
            symlink("/dev/full", dev.join(name)).unwrap();
        }

        let rootfs = base.join("rootfs");
        fs::create_dir_all(&rootfs).unwrap();

        Self {
            settings: HookSettings::default()
                .with_proc_root(&proc)
                .with_dev_root(&dev),
            rootfs,
            cgroup_dir,
            audit_path: base.join("log/operate.log"),
            base,
            _root: root,
        }
    }

    pub fn container_ns(&self) -> PathBuf {
        self.settings
            .proc_root
            .join(CONTAINER_PID.to_string())
            .join("ns/mnt")
    }

    /// Minimal valid argument vector plus `extra`.
    pub fn args(&self, extra: &[(ArgIndicator, &str)]) -> Vec<(ArgIndicator, String)> {
        let mut args = vec![
            (ArgIndicator::Devices, "0,1".to_string()),
            (ArgIndicator::Pid, CONTAINER_PID.to_string()),
            (ArgIndicator::Rootfs, self.rootfs.display().to_string()),
        ];
        args.extend(extra.iter().map(|(i, v)| (*i, v.to_string())));
        args
    }

    pub fn allow_content(&self) -> String {
        fs::read_to_string(self.cgroup_dir.join("devices.allow")).unwrap_or_default()
    }

    pub fn audit(&self) -> AuditLog {
        AuditLog::open(&self.audit_path).unwrap()
    }

    pub fn audit_events(&self) -> Vec<serde_json::Value> {
        fs::read_to_string(&self.audit_path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    pub fn audit_event_types(&self) -> Vec<String> {
        self.audit_events()
            .iter()
            .map(|e| e["event_type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

/// Tracks which namespace the "thread" is in.
pub struct FakeSwitcher {
    pub current: RefCell<String>,
    pub enters: Cell<usize>,
    pub restores: Cell<usize>,
    pub fail_enter: bool,
    pub fail_restore: bool,
}

impl FakeSwitcher {
    pub fn new() -> Self {
        Self {
            current: RefCell::new(HOST_NS.to_string()),
            enters: Cell::new(0),
            restores: Cell::new(0),
            fail_enter: false,
            fail_restore: false,
        }
    }

    pub fn current(&self) -> String {
        self.current.borrow().clone()
    }
}

impl NamespaceSwitcher for FakeSwitcher {
    fn enter_by_path(&self, path: &Path, _kind: NamespaceKind) -> Result<()> {
        self.enters.set(self.enters.get() + 1);
        if self.fail_enter {
            return Err(HookError::Namespace(format!("setns {} refused", path.display())));
        }
        *self.current.borrow_mut() = path.display().to_string();
        Ok(())
    }

    fn enter_by_fd(&self, _fd: BorrowedFd<'_>, _kind: NamespaceKind) -> Result<()> {
        self.restores.set(self.restores.get() + 1);
        if self.fail_restore {
            return Err(HookError::Namespace("setns by descriptor refused".to_string()));
        }
        *self.current.borrow_mut() = HOST_NS.to_string();
        Ok(())
    }
}

/// Records bind mounts along with the namespace they happened in.
pub struct FakeMounter<'s> {
    pub switcher: &'s FakeSwitcher,
    pub calls: RefCell<Vec<(PathBuf, PathBuf, String)>>,
    pub fail_at: Option<usize>,
}

impl<'s> FakeMounter<'s> {
    pub fn new(switcher: &'s FakeSwitcher) -> Self {
        Self {
            switcher,
            calls: RefCell::new(Vec::new()),
            fail_at: None,
        }
    }
}

impl Mounter for FakeMounter<'_> {
    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        let mut calls = self.calls.borrow_mut();
        if self.fail_at == Some(calls.len()) {
            return Err(HookError::Mount(format!("{}: device or resource busy", target.display())));
        }
        calls.push((
            source.to_path_buf(),
            target.to_path_buf(),
            self.switcher.current(),
        ));
        Ok(())
    }
}
