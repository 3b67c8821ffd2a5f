//! Volume Requests
//!
//! Typed form of the parameters a caller may attach to a create request.
//! Unknown keys are rejected here, before anything touches an array.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recognized volume parameter keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VolumeParameter {
    /// Pool name, mandatory
    StoragePool,
    /// `thick` or thin (anything else)
    AllocType,
    /// Name of the volume to clone
    CloneFrom,
    /// Clone copy priority, 1 to 4
    CloneSpeed,
    /// Family-specific QoS document
    Qos,
    /// Backend to provision on
    Backend,
}

impl VolumeParameter {
    pub const ALL: [VolumeParameter; 6] = [
        VolumeParameter::StoragePool,
        VolumeParameter::AllocType,
        VolumeParameter::CloneFrom,
        VolumeParameter::CloneSpeed,
        VolumeParameter::Qos,
        VolumeParameter::Backend,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            VolumeParameter::StoragePool => "storagepool",
            VolumeParameter::AllocType => "alloctype",
            VolumeParameter::CloneFrom => "clonefrom",
            VolumeParameter::CloneSpeed => "clonespeed",
            VolumeParameter::Qos => "qos",
            VolumeParameter::Backend => "backend",
        }
    }
}

impl std::fmt::Display for VolumeParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl std::str::FromStr for VolumeParameter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VolumeParameter::ALL
            .into_iter()
            .find(|param| param.key() == s)
            .ok_or_else(|| Error::UnknownParameter { key: s.to_string() })
    }
}

/// Parameter values as supplied, not yet resolved against a backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeParameters {
    pub storage_pool: Option<String>,
    pub alloc_type: Option<String>,
    pub clone_from: Option<String>,
    pub clone_speed: Option<String>,
    pub qos: Option<String>,
    pub backend: Option<String>,
}

impl VolumeParameters {
    /// Parse a raw key/value map, rejecting unknown keys
    pub fn from_map(raw: &BTreeMap<String, String>) -> Result<Self> {
        let mut params = Self::default();
        for (key, value) in raw {
            let param: VolumeParameter = key.parse()?;
            params.set(param, value.clone());
        }
        Ok(params)
    }

    /// Set a parameter; an empty value counts as absent
    pub fn set(&mut self, param: VolumeParameter, value: impl Into<String>) {
        let value = value.into();
        let value = if value.is_empty() { None } else { Some(value) };

        match param {
            VolumeParameter::StoragePool => self.storage_pool = value,
            VolumeParameter::AllocType => self.alloc_type = value,
            VolumeParameter::CloneFrom => self.clone_from = value,
            VolumeParameter::CloneSpeed => self.clone_speed = value,
            VolumeParameter::Qos => self.qos = value,
            VolumeParameter::Backend => self.backend = value,
        }
    }

    pub fn get(&self, param: VolumeParameter) -> Option<&str> {
        match param {
            VolumeParameter::StoragePool => self.storage_pool.as_deref(),
            VolumeParameter::AllocType => self.alloc_type.as_deref(),
            VolumeParameter::CloneFrom => self.clone_from.as_deref(),
            VolumeParameter::CloneSpeed => self.clone_speed.as_deref(),
            VolumeParameter::Qos => self.qos.as_deref(),
            VolumeParameter::Backend => self.backend.as_deref(),
        }
    }
}

/// A request to create one volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRequest {
    /// Name as supplied by the caller
    pub name: String,
    pub capacity_bytes: u64,
    #[serde(default)]
    pub parameters: VolumeParameters,
}

impl VolumeRequest {
    pub fn new(name: impl Into<String>, capacity_bytes: u64) -> Self {
        Self {
            name: name.into(),
            capacity_bytes,
            parameters: VolumeParameters::default(),
        }
    }

    /// Build a request from a raw parameter map
    pub fn from_parameters(
        name: impl Into<String>,
        capacity_bytes: u64,
        raw: &BTreeMap<String, String>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            capacity_bytes,
            parameters: VolumeParameters::from_map(raw)?,
        })
    }

    /// Builder-style parameter setter
    pub fn with(mut self, param: VolumeParameter, value: impl Into<String>) -> Self {
        self.parameters.set(param, value);
        self
    }
}
