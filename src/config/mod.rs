//! Configuration and request validation
//!
//! Hook settings, argument validation, and resolution into a container plan.

pub mod resolver;
pub mod settings;
pub mod types;
pub mod validator;
