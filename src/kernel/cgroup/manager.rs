//! Grants a container access to its accelerator device nodes.

use crate::config::resolver::ContainerPlan;
use crate::config::settings::HookSettings;
use crate::config::types::Result;
use crate::kernel::cgroup::backend::{DeviceCgroup, DeviceRule, RuleOutcome};
use crate::kernel::device::{device_number, required_nodes, DeviceNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRule {
    pub node: DeviceNode,
    pub rule: DeviceRule,
    pub outcome: RuleOutcome,
}

pub struct CgroupDeviceManager<'s> {
    settings: &'s HookSettings,
}

impl<'s> CgroupDeviceManager<'s> {
    pub fn new(settings: &'s HookSettings) -> Self {
        Self { settings }
    }

    /// Rules for every resolved device plus the control devices, in that
    /// order. Every node is looked up before anything is written.
    pub fn rules_for(&self, plan: &ContainerPlan<'_>) -> Result<Vec<(DeviceNode, DeviceRule)>> {
        required_nodes(self.settings, &plan.devices, plan.options)
            .into_iter()
            .map(|node| {
                let (major, minor) = device_number(&node.host_path)?;
                Ok((node, DeviceRule { major, minor }))
            })
            .collect()
    }

    /// Append one allow rule per device. The first failed write aborts;
    /// rules already applied stay in place.
    pub fn configure(
        &self,
        plan: &ContainerPlan<'_>,
        backend: &dyn DeviceCgroup,
    ) -> Result<Vec<AppliedRule>> {
        let rules = self.rules_for(plan)?;
        log::info!(
            "Applying {} device rules to {} cgroup {}",
            rules.len(),
            backend.backend_name(),
            backend.path().display()
        );

        let mut applied = Vec::with_capacity(rules.len());
        for (node, rule) in rules {
            let outcome = backend.allow(&rule)?;
            log::debug!("{} -> '{}' ({:?})", node.name, rule, outcome);
            applied.push(AppliedRule {
                node,
                rule,
                outcome,
            });
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{HookError, MountList, RuntimeOptions, MAX_MOUNT_NR};
    use crate::kernel::cgroup::v1::{DevicesV1, ALLOW_FILE};
    use crate::kernel::cgroup::{CgroupLayout, CgroupTarget};
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::PathBuf;

    /// Fake dev root whose nodes point at character devices every Linux
    /// host has.
    fn fake_dev() -> tempfile::TempDir {
        let dev = tempfile::tempdir().unwrap();
        symlink("/dev/null", dev.path().join("davinci0")).unwrap();
        symlink("/dev/zero", dev.path().join("davinci1")).unwrap();
        for name in ["davinci_manager", "devmm_svm", "hisi_hdc"] {
            symlink("/dev/full", dev.path().join(name)).unwrap();
        }
        fs::write(dev.path().join("davinci2"), "").unwrap();
        dev
    }

    fn plan<'a>(devices: Vec<u32>, options: RuntimeOptions, list: &'a MountList) -> ContainerPlan<'a> {
        ContainerPlan {
            pid: 1,
            rootfs: PathBuf::from("/rootfs"),
            devices,
            container_ns: PathBuf::from("/proc/1/ns/mnt"),
            cgroup: CgroupTarget {
                layout: CgroupLayout::V1,
                path: PathBuf::from("/unused"),
            },
            options,
            files: list,
            dirs: list,
        }
    }

    #[test]
    fn rules_cover_devices_then_control_devices() {
        let dev = fake_dev();
        let settings = HookSettings::default().with_dev_root(dev.path());
        let list = MountList::new("mount-file", MAX_MOUNT_NR);
        let manager = CgroupDeviceManager::new(&settings);

        let rules: Vec<String> = manager
            .rules_for(&plan(vec![1, 0], RuntimeOptions::default(), &list))
            .unwrap()
            .into_iter()
            .map(|(_, rule)| rule.to_string())
            .collect();
        assert_eq!(
            rules,
            vec!["c 1:5 rwm", "c 1:3 rwm", "c 1:7 rwm", "c 1:7 rwm", "c 1:7 rwm"]
        );

        let nodrv = RuntimeOptions::parse("NODRV").unwrap();
        assert_eq!(manager.rules_for(&plan(vec![0], nodrv, &list)).unwrap().len(), 1);
    }

    #[test]
    fn configure_appends_every_rule() {
        let dev = fake_dev();
        let settings = HookSettings::default().with_dev_root(dev.path());
        let cgroup = tempfile::tempdir().unwrap();
        fs::write(cgroup.path().join(ALLOW_FILE), "").unwrap();
        let backend = DevicesV1::open(cgroup.path()).unwrap();
        let list = MountList::new("mount-file", MAX_MOUNT_NR);
        let nodrv = RuntimeOptions::parse("NODRV").unwrap();

        let applied = CgroupDeviceManager::new(&settings)
            .configure(&plan(vec![0, 1], nodrv, &list), &backend)
            .unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].node.name, "davinci0");
        assert!(applied.iter().all(|a| a.outcome == RuleOutcome::Written));
        assert_eq!(
            fs::read_to_string(cgroup.path().join(ALLOW_FILE)).unwrap(),
            "c 1:3 rwmc 1:5 rwm"
        );
    }

    #[test]
    fn non_character_node_writes_nothing() {
        let dev = fake_dev();
        let settings = HookSettings::default().with_dev_root(dev.path());
        let cgroup = tempfile::tempdir().unwrap();
        fs::write(cgroup.path().join(ALLOW_FILE), "").unwrap();
        let backend = DevicesV1::open(cgroup.path()).unwrap();
        let list = MountList::new("mount-file", MAX_MOUNT_NR);

        let result = CgroupDeviceManager::new(&settings)
            .configure(&plan(vec![0, 2], RuntimeOptions::default(), &list), &backend);
        assert!(matches!(result, Err(HookError::Cgroup(_))));
        assert_eq!(fs::read_to_string(cgroup.path().join(ALLOW_FILE)).unwrap(), "");
    }
}
