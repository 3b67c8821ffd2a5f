//! API Module
//!
//! REST API for volume provisioning, backend inspection and
//! capability refresh.

pub mod server;
pub mod rest;

pub use server::*;
pub use rest::*;
