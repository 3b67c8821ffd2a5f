//! Flow Module
//!
//! Saga-style step orchestration used by the volume workflows.

pub mod step_flow;

pub use step_flow::*;
