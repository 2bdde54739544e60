//! Joining and leaving existing kernel namespaces.
//!
//! `setns(2)` moves the calling thread. Between entering the container's
//! mount namespace and restoring the original one, every path lookup on this
//! thread resolves in the container's view, so nothing else may run
//! filesystem-relative work on it. Joining a mount namespace also fails with
//! `EINVAL` when the caller shares its filesystem attributes with other
//! threads, which keeps the hook single-threaded.

use crate::config::types::{HookError, Result};
use nix::sched::{setns, CloneFlags};
use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, IntoRawFd, OwnedFd};
use std::path::{Path, PathBuf};

/// Namespaces addressable under `/proc/<pid>/ns/`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceKind {
    Mount,
}

impl NamespaceKind {
    /// Entry name under `/proc/<pid>/ns/`.
    pub fn proc_name(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
        }
    }

    pub fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Mount => CloneFlags::CLONE_NEWNS,
        }
    }
}

/// Namespace file of a live process. Fails if the process is gone.
pub fn process_ns_path(proc_root: &Path, pid: u32, kind: NamespaceKind) -> Result<PathBuf> {
    let path = proc_root
        .join(pid.to_string())
        .join("ns")
        .join(kind.proc_name());
    if !path.exists() {
        return Err(HookError::Resolution(format!(
            "{} namespace of pid {} not found at {}",
            kind.proc_name(),
            pid,
            path.display()
        )));
    }
    Ok(path)
}

/// Namespace file of the calling process.
pub fn self_ns_path(proc_root: &Path, kind: NamespaceKind) -> Result<PathBuf> {
    let path = proc_root.join("self").join("ns").join(kind.proc_name());
    if !path.exists() {
        return Err(HookError::Resolution(format!(
            "own {} namespace not found at {}",
            kind.proc_name(),
            path.display()
        )));
    }
    Ok(path)
}

/// Associates the calling thread with a namespace.
pub trait NamespaceSwitcher {
    /// Open `path` and join the namespace it refers to.
    fn enter_by_path(&self, path: &Path, kind: NamespaceKind) -> Result<()>;

    /// Join the namespace referenced by an already-open descriptor.
    fn enter_by_fd(&self, fd: BorrowedFd<'_>, kind: NamespaceKind) -> Result<()>;
}

/// `setns(2)` backed switcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetnsSwitcher;

impl NamespaceSwitcher for SetnsSwitcher {
    fn enter_by_path(&self, path: &Path, kind: NamespaceKind) -> Result<()> {
        let file = File::open(path).map_err(|e| {
            HookError::Namespace(format!(
                "failed to open namespace file {}: {}",
                path.display(),
                e
            ))
        })?;
        setns(file.as_fd(), kind.clone_flag()).map_err(|e| {
            HookError::Namespace(format!(
                "setns into {} namespace {} failed: {}",
                kind.proc_name(),
                path.display(),
                e
            ))
        })
        // `file` is closed here; the association outlives the descriptor.
    }

    fn enter_by_fd(&self, fd: BorrowedFd<'_>, kind: NamespaceKind) -> Result<()> {
        setns(fd, kind.clone_flag()).map_err(|e| {
            HookError::Namespace(format!(
                "setns into {} namespace by descriptor failed: {}",
                kind.proc_name(),
                e
            ))
        })
    }
}

/// Owned descriptor of the caller's own namespace, opened before switching.
///
/// It is the only way back once the thread has moved, because the original
/// `/proc/self/ns/*` path resolves differently afterwards.
#[derive(Debug)]
pub struct OriginNamespace {
    fd: OwnedFd,
    kind: NamespaceKind,
    path: PathBuf,
}

impl OriginNamespace {
    pub fn open(path: &Path, kind: NamespaceKind) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            HookError::Resource(format!(
                "failed to open own namespace {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self {
            fd: OwnedFd::from(file),
            kind,
            path: path.to_path_buf(),
        })
    }

    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the descriptor, reporting a failed close.
    pub fn release(self) -> Result<()> {
        let raw = self.fd.into_raw_fd();
        nix::unistd::close(raw).map_err(|e| {
            HookError::Resource(format!(
                "failed to release namespace descriptor for {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Scoped residence in a foreign namespace.
///
/// Created only by a successful switch. `restore` moves the thread back and
/// hands the origin descriptor on for release; if the guard is dropped first
/// the switch back is still attempted and the descriptor is closed.
pub struct NamespaceGuard<'k> {
    switcher: &'k dyn NamespaceSwitcher,
    origin: Option<OriginNamespace>,
    target: PathBuf,
}

impl<'k> NamespaceGuard<'k> {
    /// Enter the namespace at `target`. On failure `origin` is released and
    /// the thread never left its namespace.
    pub fn enter(
        switcher: &'k dyn NamespaceSwitcher,
        origin: OriginNamespace,
        target: &Path,
    ) -> Result<Self> {
        let kind = origin.kind();
        if let Err(e) = switcher.enter_by_path(target, kind) {
            if let Err(release_err) = origin.release() {
                log::error!("{}", release_err);
            }
            return Err(e);
        }

        log::debug!(
            "entered {} namespace {}",
            kind.proc_name(),
            target.display()
        );
        Ok(Self {
            switcher,
            origin: Some(origin),
            target: target.to_path_buf(),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Return to the origin namespace. The descriptor is handed back on
    /// success and released here on failure.
    pub fn restore(mut self) -> Result<OriginNamespace> {
        let origin = self.origin.take().ok_or_else(|| {
            HookError::Namespace("namespace guard already restored".to_string())
        })?;

        match self.switcher.enter_by_fd(origin.as_fd(), origin.kind()) {
            Ok(()) => {
                log::debug!("restored original namespace {}", origin.path().display());
                Ok(origin)
            }
            Err(e) => {
                if let Err(release_err) = origin.release() {
                    log::error!("{}", release_err);
                }
                Err(e)
            }
        }
    }
}

impl Drop for NamespaceGuard<'_> {
    fn drop(&mut self) {
        if let Some(origin) = self.origin.take() {
            log::warn!(
                "namespace guard for {} dropped without explicit restore",
                self.target.display()
            );
            if let Err(e) = self.switcher.enter_by_fd(origin.as_fd(), origin.kind()) {
                log::error!("best-effort namespace restore failed: {}", e);
            }
            // OwnedFd closes on drop.
        }
    }
}
