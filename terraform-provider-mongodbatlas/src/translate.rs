//! Mapping between `ClusterSpec` and the Atlas cluster payload
//!
//! Regions inside a zone are submitted in descending priority order, since
//! Atlas derives election priority from the order it receives them in. The
//! API hands regions back as an unordered map, so that order cannot be
//! recovered when reading a cluster.

use crate::client::{
    AutoScaling, BiConnector, Cluster, ProviderSettings, RegionsConfig, RegionsConfigMap,
    ReplicationSpec as RemoteReplicationSpec,
};
use crate::cluster::{
    BiConnectorSpec, ClusterSpec, ClusterState, ClusterStatus, RegionConfig, ReplicationSpec,
};
use crate::error::{ProviderError, Result};
use std::collections::BTreeSet;

/// Fields an update request can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClusterField {
    AutoScalingDiskGbEnabled,
    BackupEnabled,
    BiConnector,
    ClusterType,
    DiskSizeGb,
    EncryptionAtRestProvider,
    MongoDbMajorVersion,
    NumShards,
    ProviderBackupEnabled,
    ProviderSettings,
    ReplicationFactor,
    ReplicationSpecs,
}

/// Partial update and the set of fields it changes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterUpdate {
    pub request: Cluster,
    pub changed: BTreeSet<ClusterField>,
}

impl ClusterUpdate {
    /// Nothing to send; the caller skips the API call
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

/// A replication topology needs an explicit cluster type and shard count
fn validate_topology(spec: &ClusterSpec) -> Result<()> {
    if spec.replication_specs.is_empty() {
        return Ok(());
    }
    if spec.cluster_type.is_none() {
        return Err(ProviderError::Validation(
            "`cluster_type` should be set when `replication_specs` is set".to_string(),
        ));
    }
    if spec.num_shards.is_none() {
        return Err(ProviderError::Validation(
            "`num_shards` should be set when `replication_specs` is set".to_string(),
        ));
    }
    Ok(())
}

/// Check a spec before anything is sent to Atlas
pub fn validate(spec: &ClusterSpec) -> Result<()> {
    validate_topology(spec)
}

/// Build the create payload. Fails before any network call on an invalid
/// field combination.
pub fn to_create_request(spec: &ClusterSpec) -> Result<Cluster> {
    validate_topology(spec)?;

    Ok(Cluster {
        group_id: Some(spec.project_id.clone()),
        name: Some(spec.name.clone()),
        auto_scaling: expand_auto_scaling(spec),
        backup_enabled: spec.backup_enabled,
        bi_connector: spec.bi_connector.as_ref().map(expand_bi_connector),
        cluster_type: spec.cluster_type.clone(),
        disk_size_gb: spec.disk_size_gb,
        encryption_at_rest_provider: spec.encryption_at_rest_provider.clone(),
        mongo_db_major_version: spec.mongo_db_major_version.clone(),
        num_shards: spec.num_shards,
        provider_backup_enabled: spec.provider_backup_enabled,
        provider_settings: Some(expand_provider_settings(spec)),
        replication_factor: spec.replication_factor,
        replication_specs: expand_replication_specs(&spec.replication_specs),
        ..Default::default()
    })
}

/// Build a partial update carrying only the fields `desired` changes.
///
/// A field left unset in `desired` keeps its server-side value. Provider
/// settings are sent as a whole block whenever one of them changes.
pub fn to_update_request(previous: &ClusterSpec, desired: &ClusterSpec) -> Result<ClusterUpdate> {
    let mut update = ClusterUpdate::default();
    let request = &mut update.request;
    let changed = &mut update.changed;

    if desired.auto_scaling_disk_gb_enabled.is_some()
        && desired.auto_scaling_disk_gb_enabled != previous.auto_scaling_disk_gb_enabled
    {
        request.auto_scaling = expand_auto_scaling(desired);
        changed.insert(ClusterField::AutoScalingDiskGbEnabled);
    }
    if desired.backup_enabled.is_some() && desired.backup_enabled != previous.backup_enabled {
        request.backup_enabled = desired.backup_enabled;
        changed.insert(ClusterField::BackupEnabled);
    }
    if desired.bi_connector.is_some() && desired.bi_connector != previous.bi_connector {
        request.bi_connector = desired.bi_connector.as_ref().map(expand_bi_connector);
        changed.insert(ClusterField::BiConnector);
    }
    if desired.cluster_type.is_some() && desired.cluster_type != previous.cluster_type {
        request.cluster_type = desired.cluster_type.clone();
        changed.insert(ClusterField::ClusterType);
    }
    if desired.disk_size_gb.is_some() && desired.disk_size_gb != previous.disk_size_gb {
        request.disk_size_gb = desired.disk_size_gb;
        changed.insert(ClusterField::DiskSizeGb);
    }
    if desired.encryption_at_rest_provider.is_some()
        && desired.encryption_at_rest_provider != previous.encryption_at_rest_provider
    {
        request.encryption_at_rest_provider = desired.encryption_at_rest_provider.clone();
        changed.insert(ClusterField::EncryptionAtRestProvider);
    }
    if desired.mongo_db_major_version.is_some()
        && desired.mongo_db_major_version != previous.mongo_db_major_version
    {
        request.mongo_db_major_version = desired.mongo_db_major_version.clone();
        changed.insert(ClusterField::MongoDbMajorVersion);
    }
    if desired.num_shards.is_some() && desired.num_shards != previous.num_shards {
        request.num_shards = desired.num_shards;
        changed.insert(ClusterField::NumShards);
    }
    if desired.provider_backup_enabled.is_some()
        && desired.provider_backup_enabled != previous.provider_backup_enabled
    {
        request.provider_backup_enabled = desired.provider_backup_enabled;
        changed.insert(ClusterField::ProviderBackupEnabled);
    }
    if provider_settings_changed(previous, desired) {
        request.provider_settings = Some(expand_provider_settings(desired));
        changed.insert(ClusterField::ProviderSettings);
    }
    if desired.replication_factor.is_some()
        && desired.replication_factor != previous.replication_factor
    {
        request.replication_factor = desired.replication_factor;
        changed.insert(ClusterField::ReplicationFactor);
    }
    if !desired.replication_specs.is_empty()
        && !same_topology(&previous.replication_specs, &desired.replication_specs)
    {
        validate_topology(desired)?;
        request.replication_specs = expand_replication_specs(&desired.replication_specs);
        changed.insert(ClusterField::ReplicationSpecs);
    }

    Ok(update)
}

fn provider_settings_changed(previous: &ClusterSpec, desired: &ClusterSpec) -> bool {
    fn differs<T: PartialEq>(previous: &Option<T>, desired: &Option<T>) -> bool {
        desired.is_some() && desired != previous
    }

    previous.provider_name != desired.provider_name
        || previous.provider_instance_size_name != desired.provider_instance_size_name
        || differs(&previous.provider_region_name, &desired.provider_region_name)
        || differs(&previous.backing_provider_name, &desired.backing_provider_name)
        || differs(&previous.provider_disk_iops, &desired.provider_disk_iops)
        || differs(&previous.provider_disk_type_name, &desired.provider_disk_type_name)
        || differs(
            &previous.provider_encrypt_ebs_volume,
            &desired.provider_encrypt_ebs_volume,
        )
        || differs(&previous.provider_volume_type, &desired.provider_volume_type)
}

/// Topologies compare equal regardless of region order within a zone
fn same_topology(a: &[ReplicationSpec], b: &[ReplicationSpec]) -> bool {
    fn normalized(specs: &[ReplicationSpec]) -> Vec<ReplicationSpec> {
        specs
            .iter()
            .map(|spec| {
                let mut spec = spec.clone();
                spec.regions
                    .sort_by(|x, y| x.region_name.cmp(&y.region_name));
                spec
            })
            .collect()
    }

    normalized(a) == normalized(b)
}

fn expand_auto_scaling(spec: &ClusterSpec) -> Option<AutoScaling> {
    spec.auto_scaling_disk_gb_enabled.map(|enabled| AutoScaling {
        disk_gb_enabled: Some(enabled),
    })
}

fn expand_bi_connector(bi: &BiConnectorSpec) -> BiConnector {
    BiConnector {
        enabled: bi.enabled,
        read_preference: bi.read_preference.clone(),
    }
}

fn expand_provider_settings(spec: &ClusterSpec) -> ProviderSettings {
    ProviderSettings {
        backing_provider_name: spec.backing_provider_name.clone(),
        disk_iops: spec.provider_disk_iops,
        disk_type_name: spec.provider_disk_type_name.clone(),
        encrypt_ebs_volume: spec.provider_encrypt_ebs_volume,
        instance_size_name: Some(spec.provider_instance_size_name.clone()),
        provider_name: Some(spec.provider_name.clone()),
        region_name: spec.provider_region_name.clone(),
        volume_type: spec.provider_volume_type.clone(),
    }
}

fn expand_replication_specs(specs: &[ReplicationSpec]) -> Option<Vec<RemoteReplicationSpec>> {
    if specs.is_empty() {
        return None;
    }

    Some(
        specs
            .iter()
            .map(|spec| RemoteReplicationSpec {
                id: spec.id.clone(),
                num_shards: spec.num_shards,
                zone_name: spec.zone_name.clone(),
                regions_config: Some(expand_regions(&spec.regions)),
            })
            .collect(),
    )
}

/// Regions by descending priority; ties keep their configured order
fn expand_regions(regions: &[RegionConfig]) -> RegionsConfigMap {
    let mut ordered: Vec<&RegionConfig> = regions.iter().collect();
    ordered.sort_by(|a, b| b.priority.unwrap_or(0).cmp(&a.priority.unwrap_or(0)));

    RegionsConfigMap(
        ordered
            .into_iter()
            .map(|region| {
                (
                    region.region_name.clone(),
                    RegionsConfig {
                        analytics_nodes: region.analytics_nodes,
                        electable_nodes: region.electable_nodes,
                        priority: region.priority,
                        read_only_nodes: region.read_only_nodes,
                    },
                )
            })
            .collect(),
    )
}

/// Rebuild the desired-state view of a cluster returned by Atlas
pub fn spec_from_remote(cluster: &Cluster) -> Result<ClusterSpec> {
    let project_id = cluster
        .group_id
        .clone()
        .ok_or_else(|| ProviderError::type_coercion("project_id", "missing groupId"))?;
    let name = cluster
        .name
        .clone()
        .ok_or_else(|| ProviderError::type_coercion("name", "missing cluster name"))?;
    let settings = cluster.provider_settings.clone().ok_or_else(|| {
        ProviderError::type_coercion("provider_settings", "missing providerSettings")
    })?;
    let provider_name = settings.provider_name.ok_or_else(|| {
        ProviderError::type_coercion("provider_name", "missing providerSettings.providerName")
    })?;
    let provider_instance_size_name = settings.instance_size_name.ok_or_else(|| {
        ProviderError::type_coercion(
            "provider_instance_size_name",
            "missing providerSettings.instanceSizeName",
        )
    })?;

    Ok(ClusterSpec {
        project_id,
        name,
        auto_scaling_disk_gb_enabled: cluster
            .auto_scaling
            .as_ref()
            .and_then(|a| a.disk_gb_enabled),
        backup_enabled: cluster.backup_enabled,
        bi_connector: cluster.bi_connector.as_ref().map(|bi| BiConnectorSpec {
            enabled: bi.enabled,
            read_preference: bi.read_preference.clone(),
        }),
        cluster_type: cluster.cluster_type.clone(),
        disk_size_gb: cluster.disk_size_gb,
        encryption_at_rest_provider: cluster.encryption_at_rest_provider.clone(),
        mongo_db_major_version: cluster.mongo_db_major_version.clone(),
        num_shards: cluster.num_shards,
        provider_backup_enabled: cluster.provider_backup_enabled,
        provider_name,
        provider_instance_size_name,
        provider_region_name: settings.region_name,
        backing_provider_name: settings.backing_provider_name,
        provider_disk_iops: settings.disk_iops,
        provider_disk_type_name: settings.disk_type_name,
        provider_encrypt_ebs_volume: settings.encrypt_ebs_volume,
        provider_volume_type: settings.volume_type,
        replication_factor: cluster.replication_factor,
        replication_specs: flatten_replication_specs(cluster.replication_specs.as_deref()),
    })
}

fn flatten_replication_specs(specs: Option<&[RemoteReplicationSpec]>) -> Vec<ReplicationSpec> {
    specs
        .unwrap_or_default()
        .iter()
        .map(|spec| ReplicationSpec {
            id: spec.id.clone(),
            num_shards: spec.num_shards,
            zone_name: spec.zone_name.clone(),
            regions: spec
                .regions_config
                .as_ref()
                .map(|regions| {
                    regions
                        .0
                        .iter()
                        .map(|(region_name, config)| RegionConfig {
                            region_name: region_name.clone(),
                            electable_nodes: config.electable_nodes,
                            priority: config.priority,
                            read_only_nodes: config.read_only_nodes,
                            analytics_nodes: config.analytics_nodes,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect()
}

/// Lifecycle state reported for a cluster
pub fn state_from_remote(cluster: &Cluster) -> Result<ClusterState> {
    cluster
        .state_name
        .as_deref()
        .ok_or_else(|| ProviderError::type_coercion("state_name", "missing stateName"))?
        .parse()
}

/// Computed attributes reported for a cluster
pub fn status_from_remote(cluster: &Cluster) -> Result<ClusterStatus> {
    Ok(ClusterStatus {
        cluster_id: cluster
            .id
            .clone()
            .ok_or_else(|| ProviderError::type_coercion("cluster_id", "missing cluster id"))?,
        state: state_from_remote(cluster)?,
        mongo_db_version: cluster.mongo_db_version.clone(),
        mongo_uri: cluster.mongo_uri.clone(),
        mongo_uri_updated: cluster.mongo_uri_updated.clone(),
        mongo_uri_with_options: cluster.mongo_uri_with_options.clone(),
        srv_address: cluster.srv_address.clone(),
        paused: cluster.paused.unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(name: &str, priority: i64, electable: i64) -> RegionConfig {
        RegionConfig {
            region_name: name.to_string(),
            electable_nodes: Some(electable),
            priority: Some(priority),
            read_only_nodes: Some(0),
            analytics_nodes: Some(0),
        }
    }

    fn full_spec() -> ClusterSpec {
        ClusterSpec {
            project_id: "5cf5a45a9ccf6400e60981b5".to_string(),
            name: "orders".to_string(),
            auto_scaling_disk_gb_enabled: Some(true),
            backup_enabled: Some(false),
            bi_connector: Some(BiConnectorSpec {
                enabled: Some(true),
                read_preference: Some("secondary".to_string()),
            }),
            cluster_type: Some("GEOSHARDED".to_string()),
            disk_size_gb: Some(100.0),
            encryption_at_rest_provider: Some("NONE".to_string()),
            mongo_db_major_version: Some("4.0".to_string()),
            num_shards: Some(1),
            provider_backup_enabled: Some(true),
            provider_name: "AWS".to_string(),
            provider_instance_size_name: "M30".to_string(),
            provider_region_name: None,
            backing_provider_name: None,
            provider_disk_iops: Some(300),
            provider_disk_type_name: None,
            provider_encrypt_ebs_volume: Some(false),
            provider_volume_type: Some("STANDARD".to_string()),
            replication_factor: None,
            replication_specs: vec![ReplicationSpec {
                id: None,
                num_shards: Some(1),
                zone_name: Some("Zone 1".to_string()),
                regions: vec![
                    region("EU_WEST_1", 5, 1),
                    region("US_EAST_1", 7, 3),
                    region("US_WEST_2", 6, 2),
                ],
            }],
        }
    }

    fn simple_spec() -> ClusterSpec {
        ClusterSpec {
            replication_specs: Vec::new(),
            cluster_type: None,
            num_shards: None,
            ..full_spec()
        }
    }

    #[test]
    fn test_topology_requires_cluster_type() {
        let spec = ClusterSpec {
            cluster_type: None,
            ..full_spec()
        };

        let err = to_create_request(&spec).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(ref msg) if msg.contains("cluster_type")));
    }

    #[test]
    fn test_topology_requires_num_shards() {
        let spec = ClusterSpec {
            num_shards: None,
            ..full_spec()
        };

        let err = to_create_request(&spec).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(ref msg) if msg.contains("num_shards")));
    }

    #[test]
    fn test_no_topology_needs_neither() {
        assert!(to_create_request(&simple_spec()).is_ok());
    }

    #[test]
    fn test_create_request_orders_regions_by_priority() {
        let request = to_create_request(&full_spec()).unwrap();
        let specs = request.replication_specs.unwrap();
        let regions: Vec<&str> = specs[0]
            .regions_config
            .as_ref()
            .unwrap()
            .0
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();

        assert_eq!(regions, vec!["US_EAST_1", "US_WEST_2", "EU_WEST_1"]);
    }

    #[test]
    fn test_create_request_omits_unset_fields() {
        let request = to_create_request(&simple_spec()).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("replicationFactor").is_none());
        assert!(json.get("replicationSpecs").is_none());
        assert!(json["providerSettings"].get("regionName").is_none());
        assert_eq!(json["backupEnabled"], serde_json::json!(false));
        assert_eq!(json["autoScaling"]["diskGBEnabled"], serde_json::json!(true));
    }

    #[test]
    fn test_round_trip_reproduces_scalars() {
        let spec = full_spec();
        let back = spec_from_remote(&to_create_request(&spec).unwrap()).unwrap();

        let scalars = |s: &ClusterSpec| ClusterSpec {
            replication_specs: Vec::new(),
            ..s.clone()
        };
        assert_eq!(scalars(&back), scalars(&spec));
        assert!(same_topology(&back.replication_specs, &spec.replication_specs));
    }

    #[test]
    fn test_read_back_loses_region_order() {
        let spec = full_spec();
        let request = to_create_request(&spec).unwrap();
        let body = serde_json::to_string(&request).unwrap();
        let remote: Cluster = serde_json::from_str(&body).unwrap();

        let back = spec_from_remote(&remote).unwrap();
        let mut names: Vec<String> = back.replication_specs[0]
            .regions
            .iter()
            .map(|r| r.region_name.clone())
            .collect();
        names.sort();

        // Only membership survives; the submitted order is gone
        assert_eq!(names, vec!["EU_WEST_1", "US_EAST_1", "US_WEST_2"]);
    }

    #[test]
    fn test_identical_update_is_empty() {
        let spec = full_spec();

        let first = to_update_request(&spec, &spec).unwrap();
        let second = to_update_request(&spec, &spec).unwrap();

        assert!(first.is_empty());
        assert!(second.is_empty());
        assert_eq!(first.request, Cluster::default());
    }

    #[test]
    fn test_region_reorder_is_not_a_change() {
        let previous = full_spec();
        let mut desired = full_spec();
        desired.replication_specs[0].regions.reverse();

        assert!(to_update_request(&previous, &desired).unwrap().is_empty());
    }

    #[test]
    fn test_update_carries_only_changed_fields() {
        let previous = full_spec();
        let desired = ClusterSpec {
            disk_size_gb: Some(200.0),
            backup_enabled: Some(true),
            ..full_spec()
        };

        let update = to_update_request(&previous, &desired).unwrap();
        assert_eq!(
            update.changed,
            BTreeSet::from([ClusterField::BackupEnabled, ClusterField::DiskSizeGb])
        );
        assert_eq!(update.request.disk_size_gb, Some(200.0));
        assert_eq!(update.request.backup_enabled, Some(true));
        assert!(update.request.provider_settings.is_none());
        assert!(update.request.replication_specs.is_none());
    }

    #[test]
    fn test_update_false_is_a_real_change() {
        let previous = ClusterSpec {
            provider_backup_enabled: Some(true),
            ..simple_spec()
        };
        let desired = ClusterSpec {
            provider_backup_enabled: Some(false),
            ..simple_spec()
        };

        let update = to_update_request(&previous, &desired).unwrap();
        assert_eq!(update.request.provider_backup_enabled, Some(false));
        assert!(update.changed.contains(&ClusterField::ProviderBackupEnabled));
    }

    #[test]
    fn test_update_sends_whole_provider_settings() {
        let previous = simple_spec();
        let desired = ClusterSpec {
            provider_instance_size_name: "M40".to_string(),
            ..simple_spec()
        };

        let update = to_update_request(&previous, &desired).unwrap();
        let settings = update.request.provider_settings.unwrap();
        assert_eq!(settings.instance_size_name.as_deref(), Some("M40"));
        assert_eq!(settings.provider_name.as_deref(), Some("AWS"));
        assert_eq!(settings.disk_iops, Some(300));
    }

    #[test]
    fn test_update_unset_field_keeps_server_value() {
        let previous = simple_spec();
        let desired = ClusterSpec {
            disk_size_gb: None,
            ..simple_spec()
        };

        assert!(to_update_request(&previous, &desired).unwrap().is_empty());
    }

    #[test]
    fn test_update_topology_without_cluster_type_fails() {
        let previous = simple_spec();
        let desired = ClusterSpec {
            cluster_type: None,
            ..full_spec()
        };

        assert!(matches!(
            to_update_request(&previous, &desired),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn test_status_from_remote() {
        let cluster = Cluster {
            id: Some("5cf5a45a9ccf6400e60981b6".to_string()),
            state_name: Some("UPDATING".to_string()),
            mongo_uri: Some("mongodb://orders.mongodb.net:27017".to_string()),
            paused: None,
            ..Default::default()
        };

        let status = status_from_remote(&cluster).unwrap();
        assert_eq!(status.state, ClusterState::Updating);
        assert!(!status.paused);
        assert_eq!(
            status.mongo_uri.as_deref(),
            Some("mongodb://orders.mongodb.net:27017")
        );
    }

    #[test]
    fn test_status_requires_state_name() {
        let cluster = Cluster {
            id: Some("abc".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            status_from_remote(&cluster),
            Err(ProviderError::TypeCoercion { .. })
        ));
    }
}
