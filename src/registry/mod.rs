//! Backend Registry Module
//!
//! Process-wide view of every configured storage array: pools, feature flags
//! and product version, refreshed at startup and on a timer.

pub mod backend_registry;
pub mod events;

pub use backend_registry::*;
pub use events::*;
