//! QoS Parsing
//!
//! Each family takes QoS as a JSON object using the array's own attribute
//! names. Parsing validates the keys and values and produces a [`QosPolicy`].

use crate::domain::ports::{BackendFamily, QosPolicy};
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// OceanStor I/O type selector, 0 read, 1 write, 2 read/write
const OCEANSTOR_IOTYPE: &str = "IOTYPE";

/// OceanStor upper limits
const OCEANSTOR_UPPER_LIMITS: [&str; 2] = ["MAXBANDWIDTH", "MAXIOPS"];

/// OceanStor lower limits (protection policy)
const OCEANSTOR_LOWER_LIMITS: [&str; 3] = ["MINBANDWIDTH", "MINIOPS", "LATENCY"];

const FUSIONSTORAGE_LIMITS: [&str; 2] = ["maxMBPS", "maxIOPS"];

/// Parse a QoS document for `family`
pub fn parse_qos(family: BackendFamily, qos: &str) -> Result<QosPolicy> {
    let object: Map<String, Value> = serde_json::from_str(qos).map_err(|e| invalid(qos, e))?;

    match family {
        BackendFamily::OceanstorSan | BackendFamily::OceanstorNas => parse_oceanstor(qos, &object),
        BackendFamily::FusionstorageSan => parse_fusionstorage(qos, &object),
    }
}

fn parse_oceanstor(qos: &str, object: &Map<String, Value>) -> Result<QosPolicy> {
    let mut limits = BTreeMap::new();
    let mut upper = false;
    let mut lower = false;

    for (key, value) in object {
        let key = key.as_str();
        if key == OCEANSTOR_IOTYPE {
            let io_type = as_integer(qos, key, value)?;
            if io_type > 2 {
                return Err(invalid(qos, format!("{} must be 0, 1 or 2", key)));
            }
            limits.insert(key.to_string(), io_type);
            continue;
        }

        if OCEANSTOR_UPPER_LIMITS.contains(&key) {
            upper = true;
        } else if OCEANSTOR_LOWER_LIMITS.contains(&key) {
            lower = true;
        } else {
            return Err(invalid(qos, format!("unsupported key {}", key)));
        }
        limits.insert(key.to_string(), positive(qos, key, value)?);
    }

    if !upper && !lower {
        return Err(invalid(qos, "at least one limit is required"));
    }
    if upper && lower {
        return Err(invalid(qos, "upper and lower limits cannot be combined"));
    }

    Ok(QosPolicy { limits })
}

fn parse_fusionstorage(qos: &str, object: &Map<String, Value>) -> Result<QosPolicy> {
    let mut limits = BTreeMap::new();

    for (key, value) in object {
        if !FUSIONSTORAGE_LIMITS.contains(&key.as_str()) {
            return Err(invalid(qos, format!("unsupported key {}", key)));
        }
        limits.insert(key.clone(), positive(qos, key, value)?);
    }

    if limits.is_empty() {
        return Err(invalid(qos, "at least one limit is required"));
    }

    Ok(QosPolicy { limits })
}

fn as_integer(qos: &str, key: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| invalid(qos, format!("{} must be a non-negative integer", key)))
}

fn positive(qos: &str, key: &str, value: &Value) -> Result<u64> {
    match as_integer(qos, key, value)? {
        0 => Err(invalid(qos, format!("{} must be greater than 0", key))),
        n => Ok(n),
    }
}

fn invalid(qos: &str, reason: impl std::fmt::Display) -> Error {
    Error::InvalidQos {
        qos: qos.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_oceanstor_upper_limits() {
        let policy = parse_qos(
            BackendFamily::OceanstorSan,
            r#"{"IOTYPE": 2, "MAXIOPS": 1000, "MAXBANDWIDTH": 200}"#,
        )
        .unwrap();
        assert_eq!(policy.limits["IOTYPE"], 2);
        assert_eq!(policy.limits["MAXIOPS"], 1000);
        assert_eq!(policy.limits.len(), 3);
    }

    #[test]
    fn test_oceanstor_rejections() {
        for qos in [
            "not json",
            "[1, 2]",
            r#"{"IOTYPE": 2}"#,
            r#"{"IOTYPE": 3, "MAXIOPS": 10}"#,
            r#"{"MAXIOPS": 0}"#,
            r#"{"MAXIOPS": -5}"#,
            r#"{"MAXIOPS": "fast"}"#,
            r#"{"MAXIOPS": 10, "MINIOPS": 5}"#,
            r#"{"maxIOPS": 10}"#,
        ] {
            assert_matches!(
                parse_qos(BackendFamily::OceanstorNas, qos),
                Err(Error::InvalidQos { .. }),
                "{} should be rejected",
                qos
            );
        }
    }

    #[test]
    fn test_fusionstorage() {
        let policy = parse_qos(BackendFamily::FusionstorageSan, r#"{"maxMBPS": 50}"#).unwrap();
        assert_eq!(policy.limits["maxMBPS"], 50);

        assert_matches!(
            parse_qos(BackendFamily::FusionstorageSan, r#"{"MAXIOPS": 50}"#),
            Err(Error::InvalidQos { .. })
        );
        assert_matches!(
            parse_qos(BackendFamily::FusionstorageSan, "{}"),
            Err(Error::InvalidQos { .. })
        );
    }
}
