//! Thin wrappers around Linux kernel primitives.
//!
//! Dependency direction: namespace -> device -> mount -> cgroup

pub mod cgroup;
pub mod device;
pub mod mount;
pub mod namespace;
