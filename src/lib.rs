//! npu-prestart: OCI prestart hook for accelerator device injection
//! Enters a created container's mount namespace, bind-mounts device nodes and
//! driver files into its rootfs, grants the devices in its cgroup, and returns
//! to the original namespace before exit.
//!
//! # Architecture
//!
//! This crate is organized by Linux kernel primitive families:
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::namespace`]: Entering and restoring existing mount namespaces
//! - [`kernel::device`]: Accelerator and control device nodes
//! - [`kernel::mount`]: Mount table parsing and bind-mount injection
//! - [`kernel::cgroup`]: Device cgroup resolution and rules (v1/v2 backends)
//!
//! ## Execution Control ([`exec`])
//! - [`exec::pipeline`]: Type-state enforced hook sequence
//!
//! ## Input Safety ([`safety`])
//! - [`safety::path_legality`]: Charset, length and symlink checks
//! - [`safety::bounded_read`]: Bounded reads of kernel interface files
//!
//! ## Observability ([`observability`])
//! - [`observability::logging`]: Run log setup
//! - [`observability::audit`]: Structured operation audit log
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Error taxonomy and validated request types
//! - [`config::settings`]: Mount whitelist, paths and limits
//! - [`config::validator`]: Argument validation
//! - [`config::resolver`]: Request to container plan resolution
//!
//! # Design Principles
//!
//! 1. **Fail closed** - Reject anything unexpected, never sanitize
//! 2. **Kernel as truth** - Namespace and cgroup paths come from `/proc`
//! 3. **Always return** - Leaving the container namespace is not optional
//! 4. **Types prevent errors** - Stages cannot be reordered or skipped
//! 5. **No retries** - Each privileged step runs exactly once

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Input Safety
pub mod safety;

// Observability
pub mod observability;

// Configuration
pub mod config;

// CLI entrypoint wiring for the npu-prestart binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
