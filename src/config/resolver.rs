//! Turns a validated request into the concrete plan for one container.

use crate::config::settings::HookSettings;
use crate::config::types::{HookError, MountList, Result, RuntimeOptions, ValidatedRequest};
use crate::kernel::cgroup::{resolve_device_cgroup, CgroupTarget};
use crate::kernel::namespace::{process_ns_path, self_ns_path, NamespaceKind, OriginNamespace};
use std::path::PathBuf;

/// Everything the privileged steps need, minus the origin descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPlan<'a> {
    pub pid: u32,
    pub rootfs: PathBuf,
    /// Device ids in request order; duplicates are kept.
    pub devices: Vec<u32>,
    pub container_ns: PathBuf,
    pub cgroup: CgroupTarget,
    pub options: RuntimeOptions,
    pub files: &'a MountList,
    pub dirs: &'a MountList,
}

/// Resolved plan plus the descriptor of the caller's own mount namespace.
#[derive(Debug)]
pub struct ParsedConfig<'a> {
    plan: ContainerPlan<'a>,
    origin: OriginNamespace,
}

impl<'a> ParsedConfig<'a> {
    pub fn plan(&self) -> &ContainerPlan<'a> {
        &self.plan
    }

    pub fn origin(&self) -> &OriginNamespace {
        &self.origin
    }

    pub fn into_parts(self) -> (ContainerPlan<'a>, OriginNamespace) {
        (self.plan, self.origin)
    }
}

/// Split a comma-separated id list. Empty segments, values beyond `u32`
/// and lists longer than `max` fail the whole list.
pub fn parse_device_ids(devices: &str, max: usize) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for segment in devices.split(',') {
        if ids.len() >= max {
            return Err(HookError::Resolution(format!(
                "too many devices, max number is {}",
                max
            )));
        }
        let id = segment.parse::<u32>().map_err(|e| {
            HookError::Resolution(format!("invalid device id {:?}: {}", segment, e))
        })?;
        ids.push(id);
    }
    Ok(ids)
}

pub struct ConfigResolver<'s> {
    settings: &'s HookSettings,
}

impl<'s> ConfigResolver<'s> {
    pub fn new(settings: &'s HookSettings) -> Self {
        Self { settings }
    }

    /// Build the plan without opening anything.
    pub fn plan<'a>(&self, request: &'a ValidatedRequest) -> Result<ContainerPlan<'a>> {
        let devices = parse_device_ids(&request.devices, self.settings.limits.max_device_nr)?;
        let container_ns =
            process_ns_path(&self.settings.proc_root, request.pid, NamespaceKind::Mount)?;
        let cgroup = resolve_device_cgroup(&self.settings.proc_root, request.pid)?;

        Ok(ContainerPlan {
            pid: request.pid,
            rootfs: request.rootfs.clone(),
            devices,
            container_ns,
            cgroup,
            options: request.options,
            files: &request.files,
            dirs: &request.dirs,
        })
    }

    /// Build the plan and open the caller's mount namespace. The descriptor
    /// is opened last so an earlier failure leaves nothing to release.
    pub fn resolve<'a>(&self, request: &'a ValidatedRequest) -> Result<ParsedConfig<'a>> {
        let plan = self.plan(request)?;
        let origin_path = self_ns_path(&self.settings.proc_root, NamespaceKind::Mount)?;
        let origin = OriginNamespace::open(&origin_path, NamespaceKind::Mount)?;

        log::debug!(
            "Resolved pid {}: {} devices, ns {}, {} cgroup {}",
            plan.pid,
            plan.devices.len(),
            plan.container_ns.display(),
            plan.cgroup.layout.name(),
            plan.cgroup.path.display()
        );
        Ok(ParsedConfig { plan, origin })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::MAX_MOUNT_NR;
    use crate::kernel::cgroup::CgroupLayout;
    use std::fs;
    use std::path::Path;

    fn fake_proc(pid: u32) -> tempfile::TempDir {
        let proc = tempfile::tempdir().unwrap();
        let pid_dir = proc.path().join(pid.to_string());
        fs::create_dir_all(pid_dir.join("ns")).unwrap();
        fs::write(pid_dir.join("ns/mnt"), "").unwrap();
        fs::write(
            pid_dir.join("mountinfo"),
            "35 30 0:31 / /sys/fs/cgroup/devices rw - cgroup cgroup rw,devices\n",
        )
        .unwrap();
        fs::write(pid_dir.join("cgroup"), "4:devices:/docker/ctr\n").unwrap();
        fs::create_dir_all(proc.path().join("self/ns")).unwrap();
        fs::write(proc.path().join("self/ns/mnt"), "").unwrap();
        proc
    }

    fn request(devices: &str, pid: u32) -> ValidatedRequest {
        ValidatedRequest {
            devices: devices.to_string(),
            rootfs: PathBuf::from("/var/lib/ctr/rootfs"),
            pid,
            options: RuntimeOptions::default(),
            files: MountList::new("mount-file", MAX_MOUNT_NR),
            dirs: MountList::new("mount-dir", MAX_MOUNT_NR),
        }
    }

    #[test]
    fn device_ids_keep_order_and_duplicates() {
        assert_eq!(parse_device_ids("3,1,3", 8).unwrap(), vec![3, 1, 3]);
        assert_eq!(parse_device_ids("0", 8).unwrap(), vec![0]);
    }

    #[test]
    fn device_ids_fail_closed() {
        for bad in ["", "0,,1", "1,", ",1", "4294967296"] {
            assert!(
                matches!(parse_device_ids(bad, 8), Err(HookError::Resolution(_))),
                "{:?} should fail",
                bad
            );
        }
        assert!(parse_device_ids("0,1,2", 2).is_err());
        assert!(parse_device_ids("0,1", 2).is_ok());
    }

    #[test]
    fn resolves_paths_from_process_table() {
        let proc = fake_proc(4242);
        let settings = HookSettings::default().with_proc_root(proc.path());
        let req = request("0,1", 4242);

        let parsed = ConfigResolver::new(&settings).resolve(&req).unwrap();
        let plan = parsed.plan();
        assert_eq!(plan.devices, vec![0, 1]);
        assert_eq!(plan.rootfs, Path::new("/var/lib/ctr/rootfs"));
        assert_eq!(plan.container_ns, proc.path().join("4242/ns/mnt"));
        assert_eq!(plan.cgroup.layout, CgroupLayout::V1);
        assert_eq!(plan.cgroup.path, Path::new("/sys/fs/cgroup/devices/docker/ctr"));
        assert_eq!(parsed.origin().path(), proc.path().join("self/ns/mnt"));

        let (_plan, origin) = parsed.into_parts();
        origin.release().unwrap();
    }

    #[test]
    fn missing_process_fails_resolution() {
        let proc = fake_proc(4242);
        let settings = HookSettings::default().with_proc_root(proc.path());

        assert!(matches!(
            ConfigResolver::new(&settings).resolve(&request("0", 4243)),
            Err(HookError::Resolution(_))
        ));
    }

    #[test]
    fn missing_cgroup_entry_fails_resolution() {
        let proc = fake_proc(4242);
        fs::write(proc.path().join("4242/cgroup"), "11:memory:/docker/ctr\n").unwrap();
        let settings = HookSettings::default().with_proc_root(proc.path());

        assert!(matches!(
            ConfigResolver::new(&settings).resolve(&request("0", 4242)),
            Err(HookError::Resolution(_))
        ));
    }

    #[test]
    fn plans_are_reproducible() {
        let proc = fake_proc(4242);
        let settings = HookSettings::default().with_proc_root(proc.path());
        let req = request("2,0", 4242);
        let resolver = ConfigResolver::new(&settings);

        assert_eq!(resolver.plan(&req).unwrap(), resolver.plan(&req).unwrap());
    }
}
