//! Typed cluster records
//!
//! `ClusterSpec` is the desired state, parsed once from the attribute map
//! handed over by Terraform. `ClusterStatus` is what Atlas reports back.

use crate::error::{ProviderError, Result};
use crate::resources::{coerce_bool, coerce_i64, coerce_string, ResourceState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// Zone name Atlas gets when the configuration leaves it out
pub const DEFAULT_ZONE_NAME: &str = "ZoneName managed by Terraform";

/// Cluster lifecycle state as reported in `stateName`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Creating,
    Updating,
    Repairing,
    Deleting,
    Idle,
    Deleted,
}

impl ClusterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Updating => "UPDATING",
            Self::Repairing => "REPAIRING",
            Self::Deleting => "DELETING",
            Self::Idle => "IDLE",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterState {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATING" => Ok(Self::Creating),
            "UPDATING" => Ok(Self::Updating),
            "REPAIRING" => Ok(Self::Repairing),
            "DELETING" => Ok(Self::Deleting),
            "IDLE" => Ok(Self::Idle),
            "DELETED" => Ok(Self::Deleted),
            other => Err(ProviderError::type_coercion(
                "state_name",
                format!("unknown cluster state '{}'", other),
            )),
        }
    }
}

/// BI Connector settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BiConnectorSpec {
    pub enabled: Option<bool>,
    pub read_preference: Option<String>,
}

/// Per-region node counts and election priority
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionConfig {
    pub region_name: String,
    pub electable_nodes: Option<i64>,
    pub priority: Option<i64>,
    pub read_only_nodes: Option<i64>,
    pub analytics_nodes: Option<i64>,
}

/// A zone and the regions hosting its shards
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationSpec {
    pub id: Option<String>,
    pub num_shards: Option<i64>,
    pub zone_name: Option<String>,
    pub regions: Vec<RegionConfig>,
}

/// Desired cluster configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterSpec {
    pub project_id: String,
    pub name: String,
    pub auto_scaling_disk_gb_enabled: Option<bool>,
    pub backup_enabled: Option<bool>,
    pub bi_connector: Option<BiConnectorSpec>,
    pub cluster_type: Option<String>,
    pub disk_size_gb: Option<f64>,
    pub encryption_at_rest_provider: Option<String>,
    pub mongo_db_major_version: Option<String>,
    pub num_shards: Option<i64>,
    pub provider_backup_enabled: Option<bool>,
    pub provider_name: String,
    pub provider_instance_size_name: String,
    pub provider_region_name: Option<String>,
    pub backing_provider_name: Option<String>,
    pub provider_disk_iops: Option<i64>,
    pub provider_disk_type_name: Option<String>,
    pub provider_encrypt_ebs_volume: Option<bool>,
    pub provider_volume_type: Option<String>,
    pub replication_factor: Option<i64>,
    pub replication_specs: Vec<ReplicationSpec>,
}

impl ClusterSpec {
    /// Parse the desired state from Terraform attributes
    pub fn from_state(state: &ResourceState) -> Result<Self> {
        Ok(Self {
            project_id: state.required_string("project_id")?,
            name: state.required_string("name")?,
            auto_scaling_disk_gb_enabled: state.typed_bool("auto_scaling_disk_gb_enabled")?,
            backup_enabled: state.typed_bool("backup_enabled")?,
            bi_connector: parse_bi_connector(state.get("bi_connector"))?,
            cluster_type: state.typed_string("cluster_type")?,
            disk_size_gb: state.typed_f64("disk_size_gb")?,
            encryption_at_rest_provider: state.typed_string("encryption_at_rest_provider")?,
            mongo_db_major_version: state.typed_string("mongo_db_major_version")?,
            num_shards: state.typed_i64("num_shards")?,
            provider_backup_enabled: state.typed_bool("provider_backup_enabled")?,
            provider_name: state.required_string("provider_name")?,
            provider_instance_size_name: state.required_string("provider_instance_size_name")?,
            provider_region_name: state.typed_string("provider_region_name")?,
            backing_provider_name: state.typed_string("backing_provider_name")?,
            provider_disk_iops: state.typed_i64("provider_disk_iops")?,
            provider_disk_type_name: state.typed_string("provider_disk_type_name")?,
            provider_encrypt_ebs_volume: state.typed_bool("provider_encrypt_ebs_volume")?,
            provider_volume_type: state.typed_string("provider_volume_type")?,
            replication_factor: state.typed_i64("replication_factor")?,
            replication_specs: parse_replication_specs(state.get("replication_specs"))?,
        })
    }

    /// Write every configurable attribute into `state`
    pub fn write_into(&self, state: &mut ResourceState) {
        state.set("project_id", json!(self.project_id));
        state.set("name", json!(self.name));
        state.set(
            "auto_scaling_disk_gb_enabled",
            json!(self.auto_scaling_disk_gb_enabled),
        );
        state.set("backup_enabled", json!(self.backup_enabled));
        state.set("bi_connector", flatten_bi_connector(self.bi_connector.as_ref()));
        state.set("cluster_type", json!(self.cluster_type));
        state.set("disk_size_gb", json!(self.disk_size_gb));
        state.set(
            "encryption_at_rest_provider",
            json!(self.encryption_at_rest_provider),
        );
        state.set("mongo_db_major_version", json!(self.mongo_db_major_version));
        state.set("num_shards", json!(self.num_shards));
        state.set("provider_backup_enabled", json!(self.provider_backup_enabled));
        state.set("provider_name", json!(self.provider_name));
        state.set(
            "provider_instance_size_name",
            json!(self.provider_instance_size_name),
        );
        state.set("provider_region_name", json!(self.provider_region_name));
        state.set("backing_provider_name", json!(self.backing_provider_name));
        state.set("provider_disk_iops", json!(self.provider_disk_iops));
        state.set("provider_disk_type_name", json!(self.provider_disk_type_name));
        state.set(
            "provider_encrypt_ebs_volume",
            json!(self.provider_encrypt_ebs_volume),
        );
        state.set("provider_volume_type", json!(self.provider_volume_type));
        state.set("replication_factor", json!(self.replication_factor));
        state.set(
            "replication_specs",
            flatten_replication_specs(&self.replication_specs),
        );
    }
}

/// Observed cluster state
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterStatus {
    pub cluster_id: String,
    pub state: ClusterState,
    pub mongo_db_version: Option<String>,
    pub mongo_uri: Option<String>,
    pub mongo_uri_updated: Option<String>,
    pub mongo_uri_with_options: Option<String>,
    pub srv_address: Option<String>,
    pub paused: bool,
}

impl ClusterStatus {
    /// Write the computed attributes into `state`
    pub fn write_into(&self, state: &mut ResourceState) {
        state.set("cluster_id", json!(self.cluster_id));
        state.set("state_name", json!(self.state.as_str()));
        state.set("mongo_db_version", json!(self.mongo_db_version));
        state.set("mongo_uri", json!(self.mongo_uri));
        state.set("mongo_uri_updated", json!(self.mongo_uri_updated));
        state.set("mongo_uri_with_options", json!(self.mongo_uri_with_options));
        state.set("srv_address", json!(self.srv_address));
        state.set("paused", json!(self.paused));
    }
}

static NULL: Value = Value::Null;

fn field<'a>(map: &'a Map<String, Value>, key: &str) -> &'a Value {
    map.get(key).unwrap_or(&NULL)
}

fn parse_bi_connector(value: Option<&Value>) -> Result<Option<BiConnectorSpec>> {
    let map = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(ProviderError::type_coercion(
                "bi_connector",
                format!("expected map, got {}", other),
            ))
        }
    };

    Ok(Some(BiConnectorSpec {
        enabled: coerce_bool("bi_connector.enabled", field(map, "enabled"))?,
        read_preference: coerce_string(
            "bi_connector.read_preference",
            field(map, "read_preference"),
        )?,
    }))
}

/// Atlas-facing map form: values are strings and absent keys are left out
fn flatten_bi_connector(bi: Option<&BiConnectorSpec>) -> Value {
    let Some(bi) = bi else {
        return Value::Null;
    };

    let mut map = Map::new();
    if let Some(enabled) = bi.enabled {
        map.insert("enabled".to_string(), json!(enabled.to_string()));
    }
    if let Some(read_preference) = &bi.read_preference {
        map.insert("read_preference".to_string(), json!(read_preference));
    }
    Value::Object(map)
}

fn parse_replication_specs(value: Option<&Value>) -> Result<Vec<ReplicationSpec>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(ProviderError::type_coercion(
                "replication_specs",
                format!("expected list, got {}", other),
            ))
        }
    };

    items
        .iter()
        .map(|item| {
            let spec = item.as_object().ok_or_else(|| {
                ProviderError::type_coercion("replication_specs", "expected object entries")
            })?;

            Ok(ReplicationSpec {
                id: coerce_string("replication_specs.id", field(spec, "id"))?,
                num_shards: coerce_i64("replication_specs.num_shards", field(spec, "num_shards"))?,
                zone_name: coerce_string("replication_specs.zone_name", field(spec, "zone_name"))?,
                regions: parse_regions(field(spec, "regions_config"))?,
            })
        })
        .collect()
}

fn parse_regions(value: &Value) -> Result<Vec<RegionConfig>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(ProviderError::type_coercion(
                "regions_config",
                format!("expected set, got {}", other),
            ))
        }
    };

    items
        .iter()
        .map(|item| {
            let region = item.as_object().ok_or_else(|| {
                ProviderError::type_coercion("regions_config", "expected object entries")
            })?;

            let region_name = coerce_string("regions_config.region_name", field(region, "region_name"))?
                .ok_or_else(|| {
                    ProviderError::Validation(
                        "`region_name` must be set for every regions_config entry".to_string(),
                    )
                })?;

            Ok(RegionConfig {
                region_name,
                electable_nodes: coerce_i64("regions_config.electable_nodes", field(region, "electable_nodes"))?,
                priority: coerce_i64("regions_config.priority", field(region, "priority"))?,
                read_only_nodes: coerce_i64("regions_config.read_only_nodes", field(region, "read_only_nodes"))?,
                analytics_nodes: coerce_i64("regions_config.analytics_nodes", field(region, "analytics_nodes"))?,
            })
        })
        .collect()
}

fn flatten_replication_specs(specs: &[ReplicationSpec]) -> Value {
    let specs: Vec<Value> = specs
        .iter()
        .map(|spec| {
            let regions: Vec<Value> = spec
                .regions
                .iter()
                .map(|region| {
                    json!({
                        "region_name": region.region_name,
                        "electable_nodes": region.electable_nodes,
                        "priority": region.priority,
                        "read_only_nodes": region.read_only_nodes,
                        "analytics_nodes": region.analytics_nodes,
                    })
                })
                .collect();

            json!({
                "id": spec.id,
                "num_shards": spec.num_shards,
                "zone_name": spec.zone_name,
                "regions_config": regions,
            })
        })
        .collect();
    Value::Array(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_state() -> ResourceState {
        let mut state = ResourceState::new();
        state.set("project_id", json!("5cf5a45a9ccf6400e60981b5"));
        state.set("name", json!("orders"));
        state.set("provider_name", json!("AWS"));
        state.set("provider_instance_size_name", json!("M10"));
        state
    }

    #[test]
    fn test_cluster_state_parse() {
        assert_eq!("IDLE".parse::<ClusterState>().unwrap(), ClusterState::Idle);
        assert_eq!(ClusterState::Repairing.to_string(), "REPAIRING");

        let err = "PAUSING".parse::<ClusterState>().unwrap_err();
        assert!(matches!(err, ProviderError::TypeCoercion { .. }));
    }

    #[test]
    fn test_spec_from_minimal_state() {
        let spec = ClusterSpec::from_state(&base_state()).unwrap();

        assert_eq!(spec.name, "orders");
        assert_eq!(spec.provider_name, "AWS");
        assert_eq!(spec.backup_enabled, None);
        assert!(spec.replication_specs.is_empty());
        assert!(spec.bi_connector.is_none());
    }

    #[test]
    fn test_spec_requires_name() {
        let mut state = base_state();
        state.set("name", Value::Null);

        let err = ClusterSpec::from_state(&state).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[test]
    fn test_spec_rejects_wrong_types() {
        let mut state = base_state();
        state.set("disk_size_gb", json!(["40"]));

        let err = ClusterSpec::from_state(&state).unwrap_err();
        assert!(matches!(err, ProviderError::TypeCoercion { ref field, .. } if field == "disk_size_gb"));
    }

    #[test]
    fn test_spec_parses_topology_and_bi_connector() {
        let mut state = base_state();
        state.set("cluster_type", json!("GEOSHARDED"));
        state.set("num_shards", json!(2));
        state.set(
            "bi_connector",
            json!({"enabled": "true", "read_preference": "secondary"}),
        );
        state.set(
            "replication_specs",
            json!([{
                "num_shards": 2,
                "zone_name": "Zone 1",
                "regions_config": [
                    {"region_name": "US_EAST_1", "electable_nodes": 3, "priority": 7},
                    {"region_name": "US_WEST_2", "electable_nodes": 2, "priority": 6, "read_only_nodes": 1}
                ]
            }]),
        );

        let spec = ClusterSpec::from_state(&state).unwrap();
        let bi = spec.bi_connector.unwrap();
        assert_eq!(bi.enabled, Some(true));
        assert_eq!(bi.read_preference.as_deref(), Some("secondary"));

        let zone = &spec.replication_specs[0];
        assert_eq!(zone.num_shards, Some(2));
        assert_eq!(zone.regions.len(), 2);
        assert_eq!(zone.regions[1].region_name, "US_WEST_2");
        assert_eq!(zone.regions[1].read_only_nodes, Some(1));
    }

    #[test]
    fn test_bad_bi_connector_flag() {
        let mut state = base_state();
        state.set("bi_connector", json!({"enabled": "sometimes"}));

        let err = ClusterSpec::from_state(&state).unwrap_err();
        assert!(matches!(err, ProviderError::TypeCoercion { .. }));
    }

    #[test]
    fn test_write_into_then_parse() {
        let mut state = base_state();
        state.set("disk_size_gb", json!(40.5));
        state.set("provider_disk_iops", json!(3000));
        state.set("bi_connector", json!({"enabled": "false"}));
        let spec = ClusterSpec::from_state(&state).unwrap();

        let mut written = ResourceState::new();
        spec.write_into(&mut written);

        assert_eq!(written.get("bi_connector"), Some(&json!({"enabled": "false"})));
        assert_eq!(ClusterSpec::from_state(&written).unwrap(), spec);
    }
}
