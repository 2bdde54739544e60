//! Observability
//!
//! Run logging and the structured operation audit log.

pub mod audit;
pub mod logging;
