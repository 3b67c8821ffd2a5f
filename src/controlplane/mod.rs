//! Control Plane Module
//!
//! Coordinates volume provisioning across the registered storage arrays.

pub mod orchestrator;
pub mod api;
pub mod backends;
pub mod workflows;

pub use orchestrator::*;
pub use api::*;
pub use backends::*;
