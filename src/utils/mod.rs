//! Utilities
//!
//! Identifier normalization and bounded polling shared by the workflows.

pub mod naming;
pub mod wait;

pub use naming::*;
pub use wait::wait_until;
