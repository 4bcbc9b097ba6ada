//! Resource identifiers
//!
//! Terraform keeps a single opaque id per resource. The cluster id, project
//! id and cluster name are packed into it as sorted `base64(key):base64(value)`
//! pairs joined by `-`. The standard base64 alphabet never produces `-` or
//! `:`, so the encoding is reversible.

use crate::error::{ProviderError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::BTreeMap;

/// Identity of a cluster within Atlas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIds {
    pub cluster_id: String,
    pub project_id: String,
    pub cluster_name: String,
}

pub fn encode_state_id(values: &BTreeMap<&str, &str>) -> String {
    values
        .iter()
        .map(|(key, value)| format!("{}:{}", STANDARD.encode(key), STANDARD.encode(value)))
        .collect::<Vec<_>>()
        .join("-")
}

pub fn decode_state_id(id: &str) -> Result<BTreeMap<String, String>> {
    let decode = |part: &str| -> Result<String> {
        let bytes = STANDARD
            .decode(part)
            .map_err(|_| ProviderError::InvalidId(id.to_string()))?;
        String::from_utf8(bytes).map_err(|_| ProviderError::InvalidId(id.to_string()))
    };

    id.split('-')
        .map(|pair| {
            let (key, value) = pair
                .split_once(':')
                .ok_or_else(|| ProviderError::InvalidId(id.to_string()))?;
            Ok((decode(key)?, decode(value)?))
        })
        .collect()
}

pub fn encode_cluster_id(ids: &ClusterIds) -> String {
    encode_state_id(&BTreeMap::from([
        ("cluster_id", ids.cluster_id.as_str()),
        ("project_id", ids.project_id.as_str()),
        ("cluster_name", ids.cluster_name.as_str()),
    ]))
}

pub fn decode_cluster_id(id: &str) -> Result<ClusterIds> {
    let mut values = decode_state_id(id)?;
    let mut take = |key: &str| {
        values
            .remove(key)
            .ok_or_else(|| ProviderError::InvalidId(id.to_string()))
    };

    Ok(ClusterIds {
        cluster_id: take("cluster_id")?,
        project_id: take("project_id")?,
        cluster_name: take("cluster_name")?,
    })
}

/// Split an import id of the form `{project_id}-{name}` at the first hyphen.
///
/// Project ids containing a hyphen cannot be expressed in this format.
pub fn parse_import_id(id: &str) -> Result<(String, String)> {
    match id.split_once('-') {
        Some((project_id, name)) if !project_id.is_empty() && !name.is_empty() => {
            Ok((project_id.to_string(), name.to_string()))
        }
        _ => Err(ProviderError::ImportFormat(id.to_string())),
    }
}
