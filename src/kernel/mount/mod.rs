//! Mount table parsing and bind-mount injection

pub mod inject;
pub mod mountinfo;

// Re-export commonly used items
pub use inject::{BindMounter, InjectedMount, MountInjector, MountKind, Mounter};
