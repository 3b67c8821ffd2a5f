//! Volume Provisioning Workflows
//!
//! Request typing, precondition resolution and the create/clone/delete flows
//! run against a single backend.

pub mod precondition;
pub mod qos;
pub mod request;
pub mod volume;

pub use precondition::{resolve, CloneSource, ResolvedVolume, DEFAULT_CLONE_SPEED};
pub use qos::parse_qos;
pub use request::{VolumeParameter, VolumeParameters, VolumeRequest};
pub use volume::{CreatedVolume, VolumeWorkflows, CREATE_VOLUME_STEP};
