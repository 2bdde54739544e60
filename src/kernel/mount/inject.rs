//! Bind mounts into the container rootfs.
//!
//! Runs while the thread is associated with the container's mount
//! namespace, so every path below resolves in the container's view.

use crate::config::resolver::ContainerPlan;
use crate::config::settings::HookSettings;
use crate::config::types::{HookError, Result};
use crate::kernel::device::{required_nodes, DeviceRole};
use nix::mount::{mount, MsFlags};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Performs a single read-only bind mount.
pub trait Mounter {
    fn bind(&self, source: &Path, target: &Path) -> Result<()>;
}

/// `mount(2)` backed mounter: `MS_BIND`, then a read-only, nosuid remount.
#[derive(Debug, Default, Clone, Copy)]
pub struct BindMounter;

impl Mounter for BindMounter {
    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| {
            HookError::Mount(format!(
                "Failed to bind mount {} to {}: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;

        mount(
            None::<&str>,
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_NOSUID,
            None::<&str>,
        )
        .map_err(|e| {
            HookError::Mount(format!(
                "Failed to remount {} read-only: {}",
                target.display(),
                e
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    Device,
    ControlDevice,
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedMount {
    pub kind: MountKind,
    pub source: PathBuf,
    pub target: PathBuf,
}

pub struct MountInjector<'a> {
    settings: &'a HookSettings,
    mounter: &'a dyn Mounter,
}

impl<'a> MountInjector<'a> {
    pub fn new(settings: &'a HookSettings, mounter: &'a dyn Mounter) -> Self {
        Self { settings, mounter }
    }

    /// Mount device nodes, then the file list, then the directory list.
    /// The first failure aborts; mounts already made are not undone.
    pub fn inject(&self, plan: &ContainerPlan<'_>) -> Result<Vec<InjectedMount>> {
        let rootfs = plan.rootfs.canonicalize().map_err(|e| {
            HookError::Mount(format!(
                "Failed to resolve rootfs {}: {}",
                plan.rootfs.display(),
                e
            ))
        })?;

        let mut injected = Vec::new();

        for node in required_nodes(self.settings, &plan.devices, plan.options) {
            if !node.host_path.exists() {
                return Err(HookError::Mount(format!(
                    "Device node {} not found",
                    node.host_path.display()
                )));
            }
            let kind = match node.role {
                DeviceRole::Accelerator => MountKind::Device,
                DeviceRole::Control => MountKind::ControlDevice,
            };
            let target = node.container_path(&rootfs);
            injected.push(self.mount_one(kind, &node.host_path, &target, &rootfs)?);
        }

        let lists = [(MountKind::File, plan.files), (MountKind::Dir, plan.dirs)];
        for (kind, list) in lists {
            for source in list.iter() {
                if !source.exists() {
                    log::warn!("{} does not exist, skipping mount", source.display());
                    continue;
                }
                let relative = source.strip_prefix("/").unwrap_or(source);
                let target = rootfs.join(relative);
                injected.push(self.mount_one(kind, source, &target, &rootfs)?);
            }
        }

        Ok(injected)
    }

    fn mount_one(
        &self,
        kind: MountKind,
        source: &Path,
        target: &Path,
        rootfs: &Path,
    ) -> Result<InjectedMount> {
        prepare_target(source, target, rootfs)?;
        self.mounter.bind(source, target)?;
        log::info!("Mounted {} to {}", source.display(), target.display());

        Ok(InjectedMount {
            kind,
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        })
    }
}

fn ensure_within(path: &Path, rootfs: &Path) -> Result<()> {
    let canonical = path.canonicalize().map_err(|e| {
        HookError::Mount(format!("Failed to resolve {}: {}", path.display(), e))
    })?;
    if !canonical.starts_with(rootfs) {
        return Err(HookError::Mount(format!(
            "{} resolves to {} outside rootfs {}",
            path.display(),
            canonical.display(),
            rootfs.display()
        )));
    }
    Ok(())
}

/// Create `dir` one component at a time below the canonical `rootfs`.
/// Every existing prefix is resolved before anything is created under it,
/// so a symlink in the image cannot redirect creation onto the host.
fn create_parents_within(dir: &Path, rootfs: &Path) -> Result<()> {
    let relative = dir.strip_prefix(rootfs).map_err(|_| {
        HookError::Mount(format!(
            "{} is not below rootfs {}",
            dir.display(),
            rootfs.display()
        ))
    })?;

    let mut current = rootfs.to_path_buf();
    for component in relative.components() {
        let Component::Normal(name) = component else {
            return Err(HookError::Mount(format!(
                "{} has a non-normal component {:?}",
                dir.display(),
                component
            )));
        };
        let next = current.join(name);

        match fs::symlink_metadata(&next) {
            Ok(meta) => {
                let resolved = if meta.file_type().is_symlink() {
                    let canonical = next.canonicalize().map_err(|e| {
                        HookError::Mount(format!("Failed to resolve {}: {}", next.display(), e))
                    })?;
                    if !canonical.starts_with(rootfs) {
                        return Err(HookError::Mount(format!(
                            "{} resolves to {} outside rootfs {}",
                            next.display(),
                            canonical.display(),
                            rootfs.display()
                        )));
                    }
                    canonical
                } else {
                    next
                };
                if !resolved.is_dir() {
                    return Err(HookError::Mount(format!(
                        "{} is not a directory",
                        resolved.display()
                    )));
                }
                current = resolved;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir(&next).map_err(|e| {
                    HookError::Mount(format!("Failed to create {}: {}", next.display(), e))
                })?;
                current = next;
            }
            Err(e) => {
                return Err(HookError::Mount(format!(
                    "Failed to inspect {}: {}",
                    next.display(),
                    e
                )))
            }
        }
    }
    Ok(())
}

/// Create the mount point with the same type as its source. Symlinks in
/// the image may not redirect it outside `rootfs`.
fn prepare_target(source: &Path, target: &Path, rootfs: &Path) -> Result<()> {
    let parent = target.parent().ok_or_else(|| {
        HookError::Mount(format!("{} has no parent directory", target.display()))
    })?;
    create_parents_within(parent, rootfs)?;
    ensure_within(parent, rootfs)?;

    if let Ok(meta) = fs::symlink_metadata(target) {
        if meta.file_type().is_symlink() {
            return Err(HookError::Mount(format!(
                "Mount target {} is a symbolic link",
                target.display()
            )));
        }
    } else if source.is_dir() {
        fs::create_dir(target).map_err(|e| {
            HookError::Mount(format!("Failed to create {}: {}", target.display(), e))
        })?;
    } else {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)
            .map_err(|e| {
                HookError::Mount(format!("Failed to create {}: {}", target.display(), e))
            })?;
    }

    ensure_within(target, rootfs)
}
