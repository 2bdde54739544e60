/// Core types and error taxonomy for the prestart hook
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum number of entries in each of the mount-file and mount-dir lists.
pub const MAX_MOUNT_NR: usize = 512;

/// Maximum number of device ids a single invocation may carry.
pub const MAX_DEVICE_NR: usize = 1024;

/// Path-length ceiling applied to every externally supplied path.
pub const PATH_MAX: usize = 4096;

/// Upper bound on bytes read from the kernel pid_max file.
pub const PID_MAX_READ_LIMIT: u64 = 32;

/// Reasons an externally supplied argument is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("device list may only contain digits and commas: {0:?}")]
    IllegalDeviceList(String),

    #[error("invalid pid value: {0:?}")]
    InvalidPid(String),

    #[error("pid {pid} out of bounds (must satisfy 0 < pid < {max})")]
    PidOutOfBounds { pid: i64, max: u64 },

    #[error("failed to read pid_max from {path}: {reason}")]
    PidMaxUnreadable { path: String, reason: String },

    #[error("path length {len} out of bounds (1..={max})")]
    PathLength { len: usize, max: usize },

    #[error("path {path:?} contains illegal character {ch:?}")]
    IllegalCharacter { path: String, ch: char },

    #[error("path {0:?} resolves through a symbolic link or is not canonical")]
    SymlinkDetected(String),

    #[error("failed to canonicalize {path:?}: {reason}")]
    CanonicalizeFailed { path: String, reason: String },

    #[error("path {0:?} is not in the mount whitelist")]
    NotWhitelisted(String),

    #[error("runtime options {0:?} not accepted (expected NODRV, VIRTUAL or NODRV,VIRTUAL)")]
    InvalidOptions(String),

    #[error("unrecognized argument indicator {0:?}")]
    UnrecognizedArgument(String),

    #[error("argument --{0} given more than once")]
    DuplicateArgument(&'static str),

    #[error("required argument --{0} missing")]
    MissingArgument(&'static str),

    #[error("too many {list} entries, max number is {max}")]
    CapacityExceeded { list: &'static str, max: usize },

    #[error("command line error: {0}")]
    CommandLine(String),
}

/// Hook error taxonomy. Every fallible operation maps into exactly one class.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Namespace error: {0}")]
    Namespace(String),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Cgroup error: {0}")]
    Cgroup(String),

    #[error("Resource error: {0}")]
    Resource(String),
}

impl HookError {
    /// Stable category name recorded in audit events.
    pub fn category(&self) -> &'static str {
        match self {
            HookError::Validation(_) => "validation",
            HookError::Resolution(_) => "resolution",
            HookError::Namespace(_) => "namespace",
            HookError::Mount(_) => "mount",
            HookError::Cgroup(_) => "cgroup",
            HookError::Resource(_) => "resource",
        }
    }
}

pub type Result<T> = std::result::Result<T, HookError>;

/// Runtime options drawn from the closed vocabulary `{NODRV, VIRTUAL}`.
///
/// Acceptance is a whole-string match against [`RuntimeOptions::ACCEPTED`];
/// the flags are derived only after the string is accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeOptions {
    no_driver: bool,
    virtual_devices: bool,
}

impl RuntimeOptions {
    pub const ACCEPTED: [&'static str; 3] = ["NODRV", "VIRTUAL", "NODRV,VIRTUAL"];

    pub fn parse(value: &str) -> std::result::Result<Self, ValidationError> {
        match value {
            "NODRV" => Ok(Self {
                no_driver: true,
                virtual_devices: false,
            }),
            "VIRTUAL" => Ok(Self {
                no_driver: false,
                virtual_devices: true,
            }),
            "NODRV,VIRTUAL" => Ok(Self {
                no_driver: true,
                virtual_devices: true,
            }),
            other => Err(ValidationError::InvalidOptions(other.to_string())),
        }
    }

    /// Skip control devices when mounting and writing cgroup rules.
    pub fn no_driver(&self) -> bool {
        self.no_driver
    }

    /// Use virtual device node names.
    pub fn is_virtual(&self) -> bool {
        self.virtual_devices
    }
}

/// Append-only, fixed-capacity ordered list of validated mount paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MountList {
    #[serde(skip)]
    label: &'static str,
    #[serde(skip)]
    capacity: usize,
    entries: Vec<PathBuf>,
}

impl MountList {
    pub fn new(label: &'static str, capacity: usize) -> Self {
        Self {
            label,
            capacity,
            entries: Vec::new(),
        }
    }

    /// Reject before any other check once the list is full.
    pub fn ensure_capacity(&self) -> std::result::Result<(), ValidationError> {
        if self.entries.len() >= self.capacity {
            return Err(ValidationError::CapacityExceeded {
                list: self.label,
                max: self.capacity,
            });
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, path: PathBuf) -> std::result::Result<(), ValidationError> {
        self.ensure_capacity()?;
        self.entries.push(path);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(PathBuf::as_path)
    }
}

/// Fully validated invocation request.
///
/// Every path in here already passed the charset, symlink, and (for mount
/// lists) whitelist checks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidatedRequest {
    pub devices: String,
    pub rootfs: PathBuf,
    pub pid: u32,
    pub options: RuntimeOptions,
    pub files: MountList,
    pub dirs: MountList,
}
