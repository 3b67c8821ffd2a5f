//! Domain layer - Core types and port definitions
//!
//! This module defines the array objects and the [`ArrayClient`] port that
//! backend adapters implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
