//! Precondition Resolution
//!
//! Turns a [`VolumeRequest`] into a [`ResolvedVolume`] for one backend: pool
//! name to pool id, caller name to array name, QoS document to policy. Every
//! check here runs before any array call.

use super::qos::parse_qos;
use super::request::VolumeRequest;
use crate::domain::ports::{AllocType, CreateVolumeParams, QosPolicy};
use crate::error::{Error, Result};
use crate::registry::Backend;
use crate::utils::naming::round_up_size;
use serde::Serialize;

/// Clone copy priority used when none is given
pub const DEFAULT_CLONE_SPEED: u8 = 3;

const MIN_CLONE_SPEED: u8 = 1;
const MAX_CLONE_SPEED: u8 = 4;

/// Source of a clone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneSource {
    /// Normalized source volume name
    pub name: String,
    pub speed: u8,
}

/// A request with every parameter resolved against its backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVolume {
    /// Name as the array will store it
    pub name: String,
    /// Name as the caller supplied it
    pub requested_name: String,
    /// Requested capacity rounded up to the family's allocation unit
    pub capacity_bytes: u64,
    pub pool_id: String,
    pub pool_name: String,
    pub alloc_type: AllocType,
    pub clone_from: Option<CloneSource>,
    pub qos: Option<QosPolicy>,
}

impl ResolvedVolume {
    /// Parameters for a direct create
    pub fn create_params(&self) -> CreateVolumeParams {
        CreateVolumeParams {
            name: self.name.clone(),
            capacity_bytes: self.capacity_bytes,
            pool_id: self.pool_id.clone(),
            alloc_type: self.alloc_type,
            qos: self.qos.clone(),
        }
    }
}

/// Resolve `request` against the last known state of `backend`
pub fn resolve(backend: &Backend, request: &VolumeRequest) -> Result<ResolvedVolume> {
    let params = &request.parameters;

    if request.name.is_empty() {
        return Err(Error::ApiValidation("Volume name must not be empty".into()));
    }
    if request.capacity_bytes == 0 {
        return Err(Error::ApiValidation("Volume capacity must be greater than 0".into()));
    }

    let pool_name = params.storage_pool.as_deref().ok_or(Error::MissingPool)?;
    let pool = backend
        .pool_by_name(pool_name)
        .ok_or_else(|| Error::PoolNotFound {
            backend: backend.name.clone(),
            pool: pool_name.to_string(),
        })?;

    let alloc_type = match params.alloc_type.as_deref() {
        Some("thick") => AllocType::Thick,
        _ => AllocType::Thin,
    };

    let clone_from = match params.clone_from.as_deref() {
        Some(source) => Some(CloneSource {
            name: backend.family.normalize_volume_name(source),
            speed: parse_clone_speed(params.clone_speed.as_deref())?,
        }),
        None => None,
    };

    let qos = params
        .qos
        .as_deref()
        .map(|qos| parse_qos(backend.family, qos))
        .transpose()?;

    let unit = backend.family.allocation_unit_bytes();
    let capacity_bytes = round_up_size(request.capacity_bytes, unit)
        .checked_mul(unit)
        .ok_or_else(|| {
            Error::ApiValidation(format!(
                "Volume capacity {} exceeds the largest size {} can allocate",
                request.capacity_bytes, backend.family
            ))
        })?;

    Ok(ResolvedVolume {
        name: backend.family.normalize_volume_name(&request.name),
        requested_name: request.name.clone(),
        capacity_bytes,
        pool_id: pool.id.clone(),
        pool_name: pool.name.clone(),
        alloc_type,
        clone_from,
        qos,
    })
}

fn parse_clone_speed(value: Option<&str>) -> Result<u8> {
    let Some(value) = value else {
        return Ok(DEFAULT_CLONE_SPEED);
    };

    match value.trim().parse::<u8>() {
        Ok(speed) if (MIN_CLONE_SPEED..=MAX_CLONE_SPEED).contains(&speed) => Ok(speed),
        _ => Err(Error::InvalidCloneSpeed {
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::SimulatedArray;
    use crate::controlplane::workflows::request::VolumeParameter;
    use crate::domain::ports::{ArrayCapabilities, BackendFamily, Pool};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn backend(family: BackendFamily) -> Backend {
        let client = Arc::new(SimulatedArray::new(
            "array1",
            family,
            ArrayCapabilities::default(),
        ));
        let mut backend = Backend::new("array1", family, client);
        backend.pools = vec![Pool {
            id: "7".into(),
            name: "pool1".into(),
            capacity_bytes: 1 << 40,
        }];
        backend
    }

    fn request() -> VolumeRequest {
        VolumeRequest::new("pvc-0123456789abcdef0123456789abcdef", 1000)
            .with(VolumeParameter::StoragePool, "pool1")
    }

    #[test]
    fn test_resolve_plain_create() {
        let resolved = resolve(&backend(BackendFamily::OceanstorSan), &request()).unwrap();

        assert_eq!(resolved.name, "pvc-0123456789abcdef01");
        assert_eq!(resolved.requested_name, "pvc-0123456789abcdef0123456789abcdef");
        assert_eq!(resolved.pool_id, "7");
        assert_eq!(resolved.alloc_type, AllocType::Thin);
        assert_eq!(resolved.capacity_bytes, 1024);
        assert!(resolved.clone_from.is_none());
        assert!(resolved.qos.is_none());

        let params = resolved.create_params();
        assert_eq!(params.pool_id, "7");
        assert_eq!(params.alloc_type.code(), 1);
    }

    #[test]
    fn test_pool_resolution() {
        let backend = backend(BackendFamily::OceanstorSan);

        let missing = VolumeRequest::new("pvc-1", 1024);
        assert_matches!(resolve(&backend, &missing), Err(Error::MissingPool));

        let unknown = VolumeRequest::new("pvc-1", 1024)
            .with(VolumeParameter::StoragePool, "pool9");
        assert_matches!(
            resolve(&backend, &unknown),
            Err(Error::PoolNotFound { pool, .. }) if pool == "pool9"
        );
    }

    #[test]
    fn test_alloc_type() {
        let backend = backend(BackendFamily::OceanstorSan);
        let thick = request().with(VolumeParameter::AllocType, "thick");
        assert_eq!(resolve(&backend, &thick).unwrap().alloc_type, AllocType::Thick);

        let other = request().with(VolumeParameter::AllocType, "THICK");
        assert_eq!(resolve(&backend, &other).unwrap().alloc_type, AllocType::Thin);
    }

    #[test]
    fn test_clone_speed_bounds() {
        let backend = backend(BackendFamily::OceanstorSan);
        let clone = request().with(VolumeParameter::CloneFrom, "pvc-src");

        let resolved = resolve(&backend, &clone).unwrap();
        assert_eq!(resolved.clone_from.unwrap().speed, DEFAULT_CLONE_SPEED);

        for speed in ["1", "2", "3", "4"] {
            let req = clone.clone().with(VolumeParameter::CloneSpeed, speed);
            let source = resolve(&backend, &req).unwrap().clone_from.unwrap();
            assert_eq!(source.speed.to_string(), speed);
        }

        for speed in ["0", "5", "abc", "-1", "300"] {
            let req = clone.clone().with(VolumeParameter::CloneSpeed, speed);
            assert_matches!(
                resolve(&backend, &req),
                Err(Error::InvalidCloneSpeed { value }) if value == speed
            );
        }

        // Ignored without a clone source
        let plain = request().with(VolumeParameter::CloneSpeed, "abc");
        assert!(resolve(&backend, &plain).is_ok());
    }

    #[test]
    fn test_family_normalization() {
        let fusion = backend(BackendFamily::FusionstorageSan);
        let req = request().with(VolumeParameter::CloneFrom, "src-volume");
        let resolved = resolve(&fusion, &req).unwrap();
        assert_eq!(resolved.name, "pvc-0123456789abcdef0123456789abcdef");
        assert_eq!(resolved.capacity_bytes, 1024 * 1024);
        assert_eq!(resolved.clone_from.unwrap().name, "src-volume");

        let nas = backend(BackendFamily::OceanstorNas);
        let req = VolumeRequest::new("pvc-a-b", 512).with(VolumeParameter::StoragePool, "pool1");
        let resolved = resolve(&nas, &req).unwrap();
        assert_eq!(resolved.name, "pvc_a_b");
        assert_eq!(resolved.capacity_bytes, 512);
    }

    #[test]
    fn test_qos_and_capacity_validation() {
        let backend = backend(BackendFamily::OceanstorSan);

        let req = request().with(VolumeParameter::Qos, r#"{"MAXIOPS": 500}"#);
        let qos = resolve(&backend, &req).unwrap().qos.unwrap();
        assert_eq!(qos.limits["MAXIOPS"], 500);

        let req = request().with(VolumeParameter::Qos, r#"{"MAXIOPS": 0}"#);
        assert_matches!(resolve(&backend, &req), Err(Error::InvalidQos { .. }));

        let empty = VolumeRequest::new("pvc-1", 0).with(VolumeParameter::StoragePool, "pool1");
        assert_matches!(resolve(&backend, &empty), Err(Error::ApiValidation(_)));
    }

    #[test]
    fn test_capacity_rounding_overflow_is_rejected() {
        let san = backend(BackendFamily::OceanstorSan);
        let huge = VolumeRequest::new("pvc-1", u64::MAX).with(VolumeParameter::StoragePool, "pool1");
        assert_matches!(resolve(&san, &huge), Err(Error::ApiValidation(_)));

        let fusion = backend(BackendFamily::FusionstorageSan);
        let near_max = VolumeRequest::new("pvc-1", u64::MAX - (1 << 19))
            .with(VolumeParameter::StoragePool, "pool1");
        assert_matches!(resolve(&fusion, &near_max), Err(Error::ApiValidation(_)));

        // Largest whole number of sectors still resolves
        let aligned = u64::MAX / 512 * 512;
        let fits = VolumeRequest::new("pvc-1", aligned).with(VolumeParameter::StoragePool, "pool1");
        assert_eq!(resolve(&san, &fits).unwrap().capacity_bytes, aligned);
    }
}
