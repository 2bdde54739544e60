//! Execution control
//!
//! Sequences the privileged steps with type-state enforced ordering.

pub mod pipeline;
