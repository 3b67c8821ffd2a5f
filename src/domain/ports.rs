//! Domain Ports - Core trait definitions for the provisioner
//!
//! These traits define the boundary between the provisioning logic and the
//! storage arrays. Each backend family supplies an [`ArrayClient`].

use crate::error::{Error, Result};
use crate::utils::naming::{
    normalize_filesystem_name, normalize_identifier, normalize_share_path,
    FUSIONSTORAGE_NAME_MAX_LEN, OCEANSTOR_LUN_NAME_MAX_LEN,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Backend Families
// =============================================================================

/// Array product family a backend belongs to.
///
/// The family fixes identifier limits, the QoS dialect and the allocation
/// unit; everything else goes through the [`ArrayClient`] port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendFamily {
    OceanstorSan,
    OceanstorNas,
    FusionstorageSan,
}

impl BackendFamily {
    /// Normalize a user-supplied volume name to what the array accepts
    pub fn normalize_volume_name(&self, name: &str) -> String {
        match self {
            BackendFamily::OceanstorSan => {
                normalize_identifier(name, OCEANSTOR_LUN_NAME_MAX_LEN).to_string()
            }
            BackendFamily::OceanstorNas => normalize_filesystem_name(name),
            BackendFamily::FusionstorageSan => {
                normalize_identifier(name, FUSIONSTORAGE_NAME_MAX_LEN).to_string()
            }
        }
    }

    /// Share path for file families
    pub fn share_path(&self, volume_name: &str) -> Option<String> {
        match self {
            BackendFamily::OceanstorNas => Some(normalize_share_path(volume_name)),
            _ => None,
        }
    }

    /// Capacity granularity in bytes
    pub fn allocation_unit_bytes(&self) -> u64 {
        match self {
            BackendFamily::OceanstorSan | BackendFamily::OceanstorNas => 512,
            BackendFamily::FusionstorageSan => 1024 * 1024,
        }
    }
}

impl std::fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendFamily::OceanstorSan => write!(f, "oceanstor-san"),
            BackendFamily::OceanstorNas => write!(f, "oceanstor-nas"),
            BackendFamily::FusionstorageSan => write!(f, "fusionstorage-san"),
        }
    }
}

impl std::str::FromStr for BackendFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "oceanstor-san" => Ok(BackendFamily::OceanstorSan),
            "oceanstor-nas" => Ok(BackendFamily::OceanstorNas),
            "fusionstorage-san" => Ok(BackendFamily::FusionstorageSan),
            other => Err(Error::Configuration(format!(
                "Unsupported storage family: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Array Objects
// =============================================================================

/// An allocation domain within a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub capacity_bytes: u64,
}

/// Volume state as reported by the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    /// Still being populated (clone copy in progress)
    Copying,
    Ready,
    Faulty,
}

/// A volume as reported by the array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    pub capacity_bytes: u64,
    pub pool_id: String,
    pub status: VolumeStatus,
}

impl Volume {
    pub fn is_ready(&self) -> bool {
        self.status == VolumeStatus::Ready
    }
}

/// Support level of an array feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SupportLevel {
    Unsupported = 0,
    Supported = 1,
    SupportedWithRestriction = 2,
}

impl SupportLevel {
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            SupportLevel::Supported | SupportLevel::SupportedWithRestriction
        )
    }
}

impl From<SupportLevel> for u8 {
    fn from(level: SupportLevel) -> u8 {
        level as u8
    }
}

impl TryFrom<u8> for SupportLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(SupportLevel::Unsupported),
            1 => Ok(SupportLevel::Supported),
            2 => Ok(SupportLevel::SupportedWithRestriction),
            other => Err(format!("invalid feature support level {}", other)),
        }
    }
}

/// Everything a capability refresh learns about a backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayCapabilities {
    pub pools: Vec<Pool>,
    pub features: BTreeMap<String, SupportLevel>,
    pub product_version: String,
}

// =============================================================================
// Create Parameters
// =============================================================================

/// Allocation type codes understood by the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocType {
    Thick = 0,
    Thin = 1,
}

impl AllocType {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Structured QoS policy, already validated for the target family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QosPolicy {
    /// Limits keyed by the array's own attribute names
    pub limits: BTreeMap<String, u64>,
}

/// Parameters for a direct volume create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVolumeParams {
    pub name: String,
    pub capacity_bytes: u64,
    pub pool_id: String,
    pub alloc_type: AllocType,
    pub qos: Option<QosPolicy>,
}

// =============================================================================
// Array Client Port
// =============================================================================

/// Port for the operations the workflows need from a storage array.
///
/// Lookups return `Ok(None)` when the object does not exist; `Err` is
/// reserved for the array failing or being unreachable.
#[async_trait]
pub trait ArrayClient: Send + Sync {
    /// Look up a pool by name
    async fn get_pool_by_name(&self, name: &str) -> Result<Option<Pool>>;

    /// Look up a volume by name
    async fn get_volume_by_name(&self, name: &str) -> Result<Option<Volume>>;

    /// Create a volume directly
    async fn create_volume(&self, params: &CreateVolumeParams) -> Result<()>;

    /// Materialize a volume from a snapshot.
    ///
    /// `clone_speed` is the array copy priority, 1 (low) to 4 (highest).
    async fn create_volume_from_snapshot(
        &self,
        name: &str,
        capacity_bytes: u64,
        snapshot_name: &str,
        clone_speed: u8,
    ) -> Result<()>;

    /// Snapshot a volume
    async fn create_snapshot(&self, name: &str, source_volume_name: &str) -> Result<()>;

    /// Delete a snapshot
    async fn delete_snapshot(&self, name: &str) -> Result<()>;

    /// Delete a volume
    async fn delete_volume(&self, name: &str) -> Result<()>;

    /// Fetch pools, feature flags and product version
    async fn get_capabilities(&self) -> Result<ArrayCapabilities>;
}

pub type ArrayClientRef = Arc<dyn ArrayClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_display_round_trip() {
        for family in [
            BackendFamily::OceanstorSan,
            BackendFamily::OceanstorNas,
            BackendFamily::FusionstorageSan,
        ] {
            let parsed: BackendFamily = family.to_string().parse().unwrap();
            assert_eq!(parsed, family);
        }
        assert!("ceph-rbd".parse::<BackendFamily>().is_err());
    }

    #[test]
    fn test_family_name_limits() {
        let long = "pvc-0123456789abcdef0123456789abcdef";
        assert_eq!(BackendFamily::OceanstorSan.normalize_volume_name(long).len(), 22);
        assert_eq!(BackendFamily::FusionstorageSan.normalize_volume_name(long), long);
        assert_eq!(
            BackendFamily::OceanstorNas.normalize_volume_name("pvc-1"),
            "pvc_1"
        );
        assert_eq!(
            BackendFamily::OceanstorNas.share_path("pvc_1").as_deref(),
            Some("/pvc_1/")
        );
        assert!(BackendFamily::OceanstorSan.share_path("pvc").is_none());
    }

    #[test]
    fn test_support_level() {
        assert!(!SupportLevel::Unsupported.is_supported());
        assert!(SupportLevel::Supported.is_supported());
        assert!(SupportLevel::SupportedWithRestriction.is_supported());

        let features: BTreeMap<String, SupportLevel> =
            serde_json::from_str(r#"{"SmartThin": 1, "HyperCopy": 2, "SmartQoS": 0}"#).unwrap();
        assert_eq!(features["HyperCopy"], SupportLevel::SupportedWithRestriction);
        assert!(serde_json::from_str::<SupportLevel>("7").is_err());
    }

    #[test]
    fn test_alloc_type_codes() {
        assert_eq!(AllocType::Thick.code(), 0);
        assert_eq!(AllocType::Thin.code(), 1);
    }
}
