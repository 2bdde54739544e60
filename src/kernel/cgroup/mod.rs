//! Device cgroup configuration
//!
//! Resolves a container's device cgroup and grants accelerator access on
//! both the v1 whitelist and the v2 unified hierarchy.

pub mod backend;
pub mod manager;
pub mod v1;
pub mod v2;

// Re-export commonly used items
pub use backend::{
    open_backend, resolve_device_cgroup, CgroupLayout, CgroupTarget, DeviceCgroup, DeviceRule,
    RuleOutcome,
};
pub use manager::{AppliedRule, CgroupDeviceManager};
