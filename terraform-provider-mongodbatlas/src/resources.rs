//! Terraform Resources for MongoDB Atlas
//!
//! Defines the resources that can be managed via Terraform.

use crate::client::{ClientError, ClusterApi};
use crate::cluster::{ClusterSpec, DEFAULT_ZONE_NAME};
use crate::config::OperationTimeouts;
use crate::error::{operation_diagnostic, Operation, ProviderError};
use crate::poller::{PollSettings, StatusPoller};
use crate::schema::{
    AttributeType, Diagnostic, NestedBlock, NestingMode, ResourceSchema, SchemaAttribute,
    SchemaBlock,
};
use crate::state_id::{decode_cluster_id, encode_cluster_id, parse_import_id, ClusterIds};
use crate::translate::{
    spec_from_remote, status_from_remote, to_create_request, to_update_request, validate,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Result type for resource operations
pub type ResourceResult<T> = Result<T, Vec<Diagnostic>>;

/// Resource state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub values: HashMap<String, Value>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Whether the attribute holds a non-null value
    pub fn is_set(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn typed_string(&self, key: &str) -> crate::error::Result<Option<String>> {
        self.values
            .get(key)
            .map_or(Ok(None), |v| coerce_string(key, v))
    }

    pub fn typed_bool(&self, key: &str) -> crate::error::Result<Option<bool>> {
        self.values.get(key).map_or(Ok(None), |v| coerce_bool(key, v))
    }

    pub fn typed_i64(&self, key: &str) -> crate::error::Result<Option<i64>> {
        self.values.get(key).map_or(Ok(None), |v| coerce_i64(key, v))
    }

    pub fn typed_f64(&self, key: &str) -> crate::error::Result<Option<f64>> {
        self.values.get(key).map_or(Ok(None), |v| coerce_f64(key, v))
    }

    pub fn required_string(&self, key: &str) -> crate::error::Result<String> {
        self.typed_string(key)?
            .ok_or_else(|| ProviderError::Validation(format!("`{}` is required", key)))
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&serde_json::Map<String, Value>> for ResourceState {
    fn from(obj: &serde_json::Map<String, Value>) -> Self {
        Self {
            values: obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

pub(crate) fn coerce_string(field: &str, value: &Value) -> crate::error::Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(ProviderError::type_coercion(
            field,
            format!("expected string, got {}", other),
        )),
    }
}

pub(crate) fn coerce_bool(field: &str, value: &Value) -> crate::error::Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::String(s) => match s.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(ProviderError::type_coercion(
                field,
                format!("expected boolean, got \"{}\"", other),
            )),
        },
        other => Err(ProviderError::type_coercion(
            field,
            format!("expected boolean, got {}", other),
        )),
    }
}

pub(crate) fn coerce_i64(field: &str, value: &Value) -> crate::error::Result<Option<i64>> {
    let mismatch = || ProviderError::type_coercion(field, format!("expected integer, got {}", value));
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(Some(i)),
            (None, Some(f)) if f.fract() == 0.0 => Ok(Some(f as i64)),
            _ => Err(mismatch()),
        },
        Value::String(s) => s.parse().map(Some).map_err(|_| mismatch()),
        _ => Err(mismatch()),
    }
}

pub(crate) fn coerce_f64(field: &str, value: &Value) -> crate::error::Result<Option<f64>> {
    let mismatch = || ProviderError::type_coercion(field, format!("expected number, got {}", value));
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or_else(mismatch),
        Value::String(s) => s.parse().map(Some).map_err(|_| mismatch()),
        _ => Err(mismatch()),
    }
}

/// Planned state and the attributes whose change forces replacement
#[derive(Debug, Clone, Default)]
pub struct PlannedChange {
    pub state: ResourceState,
    pub requires_replace: Vec<String>,
}

/// Resource trait
#[async_trait]
pub trait Resource: Send + Sync {
    /// Resource type name
    fn type_name(&self) -> &str;

    /// Get the schema for this resource
    fn schema(&self) -> ResourceSchema;

    /// Check a configuration before anything reaches the remote API
    fn validate(&self, config: &ResourceState) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Create a new resource
    async fn create(
        &self,
        client: &dyn ClusterApi,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState>;

    /// Read an existing resource; an empty state means it is gone
    async fn read(
        &self,
        client: &dyn ClusterApi,
        current: &ResourceState,
    ) -> ResourceResult<ResourceState>;

    /// Update an existing resource
    async fn update(
        &self,
        client: &dyn ClusterApi,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState>;

    /// Delete a resource
    async fn delete(&self, client: &dyn ClusterApi, current: &ResourceState) -> ResourceResult<()>;

    /// Import an existing resource from a user supplied id
    async fn import(&self, client: &dyn ClusterApi, id: &str) -> ResourceResult<ResourceState>;

    /// Plan changes
    fn plan_change(
        &self,
        current: Option<&ResourceState>,
        proposed: &ResourceState,
    ) -> ResourceResult<PlannedChange> {
        // Default implementation: return proposed state
        let _ = current;
        Ok(PlannedChange {
            state: proposed.clone(),
            requires_replace: Vec::new(),
        })
    }
}

// ============================================================================
// Cluster Resource
// ============================================================================

/// `mongodbatlas_cluster`
pub struct ClusterResource {
    poll: PollSettings,
}

impl ClusterResource {
    pub fn new() -> Self {
        Self {
            poll: PollSettings::default(),
        }
    }

    /// Override poll timing, mostly useful to keep tests fast
    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    async fn create_cluster(
        &self,
        client: &dyn ClusterApi,
        planned: &ResourceState,
    ) -> crate::error::Result<ResourceState> {
        let spec = ClusterSpec::from_state(planned)?;
        let timeouts = OperationTimeouts::from_state(planned)?;
        let request = to_create_request(&spec)?;

        tracing::info!(cluster = %spec.name, project = %spec.project_id, "creating MongoDB cluster");
        let created = client.create_cluster(&spec.project_id, &request).await?;

        let outcome = StatusPoller::for_create(timeouts.create, self.poll)
            .wait(client, &spec.project_id, &spec.name)
            .await?;

        let cluster_id = created
            .id
            .or_else(|| outcome.cluster.and_then(|c| c.id))
            .ok_or_else(|| ProviderError::type_coercion("cluster_id", "missing cluster id"))?;

        let mut state = planned.clone();
        state.set(
            "id",
            json!(encode_cluster_id(&ClusterIds {
                cluster_id,
                project_id: spec.project_id.clone(),
                cluster_name: spec.name.clone(),
            })),
        );
        tracing::info!(cluster = %spec.name, "MongoDB cluster created");

        let state = self.read_cluster(client, &state).await?;
        if state.is_empty() {
            return Err(ClientError::NotFound(format!("cluster {} vanished after create", spec.name)).into());
        }
        Ok(state)
    }

    async fn read_cluster(
        &self,
        client: &dyn ClusterApi,
        current: &ResourceState,
    ) -> crate::error::Result<ResourceState> {
        let id = current
            .get_string("id")
            .ok_or_else(|| ProviderError::InvalidId(String::new()))?;
        let ids = decode_cluster_id(&id)?;

        let cluster = match client.get_cluster(&ids.project_id, &ids.cluster_name).await {
            Ok(cluster) => cluster,
            Err(ClientError::NotFound(_)) => {
                tracing::warn!(cluster = %ids.cluster_name, "MongoDB cluster not found, removing from state");
                return Ok(ResourceState::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut spec = spec_from_remote(&cluster)?;
        let status = status_from_remote(&cluster)?;

        // Global clusters do not report num_shards
        if spec.num_shards.is_none() {
            spec.num_shards = current.typed_i64("num_shards")?;
        }

        let mut state = ResourceState::new();
        state.set("id", json!(id));
        if let Some(timeouts) = current.get("timeouts") {
            state.set("timeouts", timeouts.clone());
        }
        spec.write_into(&mut state);
        status.write_into(&mut state);
        Ok(state)
    }

    async fn update_cluster(
        &self,
        client: &dyn ClusterApi,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> crate::error::Result<ResourceState> {
        let id = current
            .get_string("id")
            .ok_or_else(|| ProviderError::InvalidId(String::new()))?;
        let ids = decode_cluster_id(&id)?;
        let previous = ClusterSpec::from_state(current)?;
        let desired = ClusterSpec::from_state(planned)?;
        let timeouts = OperationTimeouts::from_state(planned)?;

        let update = to_update_request(&previous, &desired)?;
        if update.is_empty() {
            tracing::info!(cluster = %ids.cluster_name, "no cluster changes to apply");
        } else {
            tracing::info!(cluster = %ids.cluster_name, changed = ?update.changed, "updating MongoDB cluster");
            client
                .update_cluster(&ids.project_id, &ids.cluster_name, &update.request)
                .await?;

            StatusPoller::for_update(timeouts.update, self.poll)
                .wait(client, &ids.project_id, &ids.cluster_name)
                .await?;
        }

        let mut state = planned.clone();
        state.set("id", json!(id));
        self.read_cluster(client, &state).await
    }

    async fn delete_cluster(
        &self,
        client: &dyn ClusterApi,
        current: &ResourceState,
    ) -> crate::error::Result<()> {
        let id = current
            .get_string("id")
            .ok_or_else(|| ProviderError::InvalidId(String::new()))?;
        let ids = decode_cluster_id(&id)?;
        let timeouts = OperationTimeouts::from_state(current)?;

        match client.delete_cluster(&ids.project_id, &ids.cluster_name).await {
            Ok(()) => {}
            Err(ClientError::NotFound(_)) => {
                tracing::info!(cluster = %ids.cluster_name, "MongoDB cluster already gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let poller = StatusPoller::for_delete(timeouts.delete, self.poll);
        tracing::info!(
            cluster = %ids.cluster_name,
            target = %poller.target(),
            "waiting for MongoDB cluster to be destroyed"
        );
        poller
            .wait(client, &ids.project_id, &ids.cluster_name)
            .await?;
        Ok(())
    }

    async fn import_cluster(
        &self,
        client: &dyn ClusterApi,
        import_id: &str,
    ) -> crate::error::Result<ResourceState> {
        let (project_id, name) = parse_import_id(import_id)?;
        let cluster = client.get_cluster(&project_id, &name).await?;

        let cluster_id = cluster
            .id
            .clone()
            .ok_or_else(|| ProviderError::type_coercion("cluster_id", "missing cluster id"))?;
        let cluster_name = cluster.name.clone().unwrap_or_else(|| name.clone());

        let mut state = ResourceState::new();
        state.set(
            "id",
            json!(encode_cluster_id(&ClusterIds {
                cluster_id,
                project_id: project_id.clone(),
                cluster_name: cluster_name.clone(),
            })),
        );
        state.set("project_id", json!(cluster.group_id.unwrap_or(project_id)));
        state.set("name", json!(cluster_name));

        self.read_cluster(client, &state).await
    }
}

impl Default for ClusterResource {
    fn default() -> Self {
        Self::new()
    }
}

/// Attributes whose defaults are filled in at plan time
fn apply_defaults(state: &mut ResourceState) {
    for (key, default) in [
        ("auto_scaling_disk_gb_enabled", json!(true)),
        ("backup_enabled", json!(false)),
        ("provider_backup_enabled", json!(false)),
        ("num_shards", json!(1)),
    ] {
        if !state.is_set(key) {
            state.set(key, default);
        }
    }

    if let Some(Value::Array(specs)) = state.values.get_mut("replication_specs") {
        for spec in specs.iter_mut().filter_map(Value::as_object_mut) {
            if spec.get("zone_name").map_or(true, Value::is_null) {
                spec.insert("zone_name".to_string(), json!(DEFAULT_ZONE_NAME));
            }
            if let Some(Value::Array(regions)) = spec.get_mut("regions_config") {
                for region in regions.iter_mut().filter_map(Value::as_object_mut) {
                    for key in ["read_only_nodes", "analytics_nodes"] {
                        if region.get(key).map_or(true, Value::is_null) {
                            region.insert(key.to_string(), json!(0));
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Resource for ClusterResource {
    fn type_name(&self) -> &str {
        "mongodbatlas_cluster"
    }

    fn schema(&self) -> ResourceSchema {
        let region_block = SchemaBlock::new()
            .with_attribute(
                "region_name",
                SchemaAttribute::string().optional().computed(),
            )
            .with_attribute(
                "electable_nodes",
                SchemaAttribute::number().optional().computed(),
            )
            .with_attribute(
                "priority",
                SchemaAttribute::number()
                    .with_description("Election priority; higher priorities are submitted first")
                    .optional()
                    .computed(),
            )
            .with_attribute(
                "read_only_nodes",
                SchemaAttribute::number()
                    .optional()
                    .with_default(json!(0)),
            )
            .with_attribute(
                "analytics_nodes",
                SchemaAttribute::number()
                    .optional()
                    .with_default(json!(0)),
            );

        let replication_block = SchemaBlock::new()
            .with_attribute("id", SchemaAttribute::string().optional().computed())
            .with_attribute("num_shards", SchemaAttribute::number().required())
            .with_attribute(
                "zone_name",
                SchemaAttribute::string()
                    .optional()
                    .with_default(json!(DEFAULT_ZONE_NAME)),
            )
            .with_block(
                "regions_config",
                NestedBlock {
                    nesting_mode: NestingMode::Set,
                    block: region_block,
                    min_items: None,
                    max_items: None,
                },
            );

        let timeouts_block = SchemaBlock::new()
            .with_attribute("create", SchemaAttribute::string().optional())
            .with_attribute("update", SchemaAttribute::string().optional())
            .with_attribute("delete", SchemaAttribute::string().optional());

        let block = SchemaBlock::new()
            .with_attribute(
                "id",
                SchemaAttribute::string()
                    .with_description("Opaque resource identifier")
                    .computed(),
            )
            .with_attribute(
                "project_id",
                SchemaAttribute::string()
                    .with_description("Atlas project the cluster belongs to")
                    .required()
                    .force_new(),
            )
            .with_attribute(
                "name",
                SchemaAttribute::string()
                    .with_description("Cluster name")
                    .required()
                    .force_new(),
            )
            .with_attribute("cluster_id", SchemaAttribute::string().computed())
            .with_attribute(
                "auto_scaling_disk_gb_enabled",
                SchemaAttribute::bool()
                    .optional()
                    .with_default(json!(true)),
            )
            .with_attribute(
                "backup_enabled",
                SchemaAttribute::bool()
                    .optional()
                    .with_default(json!(false)),
            )
            .with_attribute(
                "bi_connector",
                SchemaAttribute::map(AttributeType::String)
                    .with_description("BI Connector settings: `enabled` and `read_preference`")
                    .optional()
                    .computed(),
            )
            .with_attribute(
                "cluster_type",
                SchemaAttribute::string()
                    .with_description("REPLICASET, SHARDED or GEOSHARDED")
                    .optional()
                    .computed(),
            )
            .with_attribute(
                "disk_size_gb",
                SchemaAttribute::number().optional().computed(),
            )
            .with_attribute(
                "encryption_at_rest_provider",
                SchemaAttribute::string().optional().computed(),
            )
            .with_attribute(
                "mongo_db_major_version",
                SchemaAttribute::string().optional().computed(),
            )
            .with_attribute(
                "num_shards",
                SchemaAttribute::number()
                    .optional()
                    .with_default(json!(1)),
            )
            .with_attribute(
                "provider_backup_enabled",
                SchemaAttribute::bool()
                    .optional()
                    .with_default(json!(false)),
            )
            .with_attribute(
                "provider_instance_size_name",
                SchemaAttribute::string()
                    .with_description("Instance size, e.g. M10")
                    .required(),
            )
            .with_attribute(
                "provider_name",
                SchemaAttribute::string()
                    .with_description("AWS, GCP, AZURE or TENANT")
                    .required(),
            )
            .with_attribute(
                "backing_provider_name",
                SchemaAttribute::string().optional().computed(),
            )
            .with_attribute(
                "provider_disk_iops",
                SchemaAttribute::number().optional().computed(),
            )
            .with_attribute(
                "provider_disk_type_name",
                SchemaAttribute::string().optional().computed(),
            )
            .with_attribute(
                "provider_encrypt_ebs_volume",
                SchemaAttribute::bool().optional().computed(),
            )
            .with_attribute(
                "provider_region_name",
                SchemaAttribute::string().optional().computed(),
            )
            .with_attribute(
                "provider_volume_type",
                SchemaAttribute::string().optional().computed(),
            )
            .with_attribute(
                "replication_factor",
                SchemaAttribute::number().optional().computed(),
            )
            .with_attribute("mongo_db_version", SchemaAttribute::string().computed())
            .with_attribute("mongo_uri", SchemaAttribute::string().computed())
            .with_attribute("mongo_uri_updated", SchemaAttribute::string().computed())
            .with_attribute(
                "mongo_uri_with_options",
                SchemaAttribute::string().computed(),
            )
            .with_attribute("paused", SchemaAttribute::bool().computed())
            .with_attribute("srv_address", SchemaAttribute::string().computed())
            .with_attribute("state_name", SchemaAttribute::string().computed())
            .with_block(
                "replication_specs",
                NestedBlock {
                    nesting_mode: NestingMode::List,
                    block: replication_block,
                    min_items: None,
                    max_items: None,
                },
            )
            .with_block(
                "timeouts",
                NestedBlock {
                    nesting_mode: NestingMode::Single,
                    block: timeouts_block,
                    min_items: None,
                    max_items: None,
                },
            )
            .with_description("Manages a MongoDB Atlas cluster");

        ResourceSchema::new(1, block)
    }

    fn validate(&self, config: &ResourceState) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if let Err(e) = ClusterSpec::from_state(config).and_then(|spec| validate(&spec)) {
            diagnostics.push(Diagnostic::error(&e.to_string()));
        }
        if let Err(e) = OperationTimeouts::from_state(config) {
            diagnostics.push(
                Diagnostic::error(&e.to_string()).with_attribute(vec!["timeouts".to_string()]),
            );
        }
        diagnostics
    }

    async fn create(
        &self,
        client: &dyn ClusterApi,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let name = planned.get_string("name").unwrap_or_default();
        self.create_cluster(client, planned)
            .await
            .map_err(|e| vec![operation_diagnostic(Operation::Create, &name, &e)])
    }

    async fn read(
        &self,
        client: &dyn ClusterApi,
        current: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let name = current.get_string("name").unwrap_or_default();
        self.read_cluster(client, current)
            .await
            .map_err(|e| vec![operation_diagnostic(Operation::Read, &name, &e)])
    }

    async fn update(
        &self,
        client: &dyn ClusterApi,
        current: &ResourceState,
        planned: &ResourceState,
    ) -> ResourceResult<ResourceState> {
        let name = current.get_string("name").unwrap_or_default();
        self.update_cluster(client, current, planned)
            .await
            .map_err(|e| vec![operation_diagnostic(Operation::Update, &name, &e)])
    }

    async fn delete(&self, client: &dyn ClusterApi, current: &ResourceState) -> ResourceResult<()> {
        let name = current.get_string("name").unwrap_or_default();
        self.delete_cluster(client, current)
            .await
            .map_err(|e| vec![operation_diagnostic(Operation::Delete, &name, &e)])
    }

    async fn import(&self, client: &dyn ClusterApi, id: &str) -> ResourceResult<ResourceState> {
        self.import_cluster(client, id)
            .await
            .map_err(|e| vec![operation_diagnostic(Operation::Import, id, &e)])
    }

    fn plan_change(
        &self,
        current: Option<&ResourceState>,
        proposed: &ResourceState,
    ) -> ResourceResult<PlannedChange> {
        let mut state = proposed.clone();
        apply_defaults(&mut state);

        let mut requires_replace = Vec::new();
        if let Some(current) = current {
            for key in ["project_id", "name"] {
                if current.get(key) != state.get(key) {
                    requires_replace.push(key.to_string());
                }
            }
            if let Some(id) = current.get("id") {
                state.set("id", id.clone());
            }
        }

        Ok(PlannedChange {
            state,
            requires_replace,
        })
    }
}

/// Get all available resources
pub fn get_all_resources() -> Vec<Box<dyn Resource>> {
    vec![Box::new(ClusterResource::new())]
}
