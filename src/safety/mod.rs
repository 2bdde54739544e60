//! Input safety
//!
//! Path legality and bounded reads applied to every externally supplied value.

pub mod bounded_read;
pub mod path_legality;
