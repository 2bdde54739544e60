//! Accelerator device nodes on the host.

use crate::config::settings::HookSettings;
use crate::config::types::{HookError, Result, RuntimeOptions};
use nix::sys::stat::{major, minor, stat, SFlag};
use std::path::{Path, PathBuf};

/// Role of a device node inside the container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Accelerator,
    Control,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceNode {
    pub role: DeviceRole,
    /// Node file name, identical on the host and in the container.
    pub name: String,
    pub host_path: PathBuf,
}

impl DeviceNode {
    /// Location of the node under the container rootfs.
    pub fn container_path(&self, rootfs: &Path) -> PathBuf {
        rootfs.join("dev").join(&self.name)
    }
}

pub fn accelerator_node(settings: &HookSettings, options: RuntimeOptions, id: u32) -> DeviceNode {
    let prefix = if options.is_virtual() {
        &settings.devices.virtual_prefix
    } else {
        &settings.devices.physical_prefix
    };
    let name = format!("{}{}", prefix, id);
    DeviceNode {
        role: DeviceRole::Accelerator,
        host_path: settings.dev_root.join(&name),
        name,
    }
}

/// Shared management nodes. Empty when `NODRV` is set.
pub fn control_nodes(settings: &HookSettings, options: RuntimeOptions) -> Vec<DeviceNode> {
    if options.no_driver() {
        return Vec::new();
    }
    settings
        .devices
        .control_devices
        .iter()
        .map(|name| DeviceNode {
            role: DeviceRole::Control,
            name: name.clone(),
            host_path: settings.dev_root.join(name),
        })
        .collect()
}

/// Every node a container needs: accelerators in request order, then the
/// control devices.
pub fn required_nodes(
    settings: &HookSettings,
    ids: &[u32],
    options: RuntimeOptions,
) -> Vec<DeviceNode> {
    let mut nodes: Vec<DeviceNode> = ids
        .iter()
        .map(|&id| accelerator_node(settings, options, id))
        .collect();
    nodes.extend(control_nodes(settings, options));
    nodes
}

/// Major and minor number of a character device node.
pub fn device_number(path: &Path) -> Result<(u64, u64)> {
    let st = stat(path)
        .map_err(|e| HookError::Cgroup(format!("Failed to stat {}: {}", path.display(), e)))?;

    let kind = SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT;
    if kind != SFlag::S_IFCHR {
        return Err(HookError::Cgroup(format!(
            "{} is not a character device",
            path.display()
        )));
    }

    Ok((major(st.st_rdev), minor(st.st_rdev)))
}
