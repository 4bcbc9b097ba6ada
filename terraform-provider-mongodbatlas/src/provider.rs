//! Terraform Provider Implementation
//!
//! Implements the Terraform Plugin Protocol for MongoDB Atlas.

use crate::client::{AtlasClient, ClusterApi};
use crate::config::{Credentials, ProviderConfig};
use crate::resources::{get_all_resources, Resource, ResourceState};
use crate::schema::{
    Diagnostic, ProviderSchema, RpcRequest, RpcResponse, SchemaAttribute, SchemaBlock,
    INTERNAL_ERROR, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::runtime::Runtime;

/// MongoDB Atlas Terraform Provider
pub struct MongoDbAtlasProvider {
    client: RwLock<Option<Arc<dyn ClusterApi>>>,
    resources: HashMap<String, Box<dyn Resource>>,
    runtime: Runtime,
}

fn diagnostics_response(id: i64, diagnostics: Vec<Diagnostic>) -> RpcResponse {
    RpcResponse::success(id, json!({ "diagnostics": diagnostics }))
}

/// Serialize a response line, falling back to a JSON-RPC internal error
fn encode_response<T: Serialize>(id: i64, response: &T) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize response");
        serde_json::to_string(&RpcResponse::error(
            id,
            INTERNAL_ERROR,
            &format!("Serialization error: {}", e),
        ))
        .unwrap_or_default()
    })
}

/// Object-valued parameter as a resource state; null or absent yields `None`
fn state_param(params: &Value, key: &str) -> Option<ResourceState> {
    params.get(key).and_then(Value::as_object).map(ResourceState::from)
}

impl MongoDbAtlasProvider {
    /// Create a new provider
    pub fn new() -> std::io::Result<Self> {
        let resources = get_all_resources()
            .into_iter()
            .map(|r| (r.type_name().to_string(), r))
            .collect();

        Ok(Self {
            client: RwLock::new(None),
            resources,
            runtime: Runtime::new()?,
        })
    }

    /// Use an already configured API client
    pub fn with_client(self, client: Arc<dyn ClusterApi>) -> Self {
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
        self
    }

    /// Register or replace a resource implementation
    pub fn with_resource(mut self, resource: Box<dyn Resource>) -> Self {
        self.resources
            .insert(resource.type_name().to_string(), resource);
        self
    }

    /// Get provider schema
    fn get_schema(&self) -> ProviderSchema {
        let provider_block = SchemaBlock::new()
            .with_attribute(
                "base_url",
                SchemaAttribute::string()
                    .with_description("Atlas Administration API base URL")
                    .optional(),
            )
            .with_attribute(
                "access_token",
                SchemaAttribute::string()
                    .with_description("Bearer token for the Atlas API")
                    .optional()
                    .sensitive(),
            )
            .with_attribute(
                "client_id",
                SchemaAttribute::string()
                    .with_description("Service account client id")
                    .optional(),
            )
            .with_attribute(
                "client_secret",
                SchemaAttribute::string()
                    .with_description("Service account client secret")
                    .optional()
                    .sensitive(),
            )
            .with_description("MongoDB Atlas provider");

        self.resources
            .iter()
            .fold(ProviderSchema::new(provider_block), |schema, (name, resource)| {
                schema.with_resource(name, resource.schema())
            })
    }

    /// Configure the provider, filling unset values from the environment
    fn configure(&self, config: ProviderConfig) -> Vec<Diagnostic> {
        self.configure_from(config.with_env_defaults())
    }

    fn configure_from(&self, config: ProviderConfig) -> Vec<Diagnostic> {
        let credentials = match config.credentials() {
            Ok(c) => c,
            Err(e) => return vec![Diagnostic::error(&e.to_string())],
        };

        let client = match AtlasClient::new(config.base_url()) {
            Ok(c) => c,
            Err(e) => {
                return vec![Diagnostic::error(&format!(
                    "Failed to create Atlas client: {}",
                    e
                ))]
            }
        };

        let client = match credentials {
            Credentials::AccessToken(token) => client.with_token(&token),
            Credentials::ServiceAccount {
                client_id,
                client_secret,
            } => {
                let mut client = client;
                if let Err(e) = self
                    .runtime
                    .block_on(client.authenticate(&client_id, &client_secret))
                {
                    return vec![Diagnostic::error(&format!("Authentication failed: {}", e))];
                }
                client
            }
        };

        tracing::info!(base_url = %client.base_url(), "provider configured");
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(client));

        Vec::new()
    }

    /// Get the configured client
    fn get_client(&self) -> Result<Arc<dyn ClusterApi>, Diagnostic> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Diagnostic::error("Provider not configured"))
    }

    fn get_resource(&self, id: i64, params: &Value) -> Result<&dyn Resource, RpcResponse> {
        let type_name = params
            .get("type_name")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        self.resources
            .get(type_name)
            .map(|r| r.as_ref())
            .ok_or_else(|| {
                diagnostics_response(
                    id,
                    vec![Diagnostic::error(&format!(
                        "Unknown resource type: {}",
                        type_name
                    ))],
                )
            })
    }

    /// Handle an RPC request
    pub fn handle_request(&self, input: &str) -> String {
        let request: RpcRequest = match serde_json::from_str(input) {
            Ok(r) => r,
            Err(e) => {
                return serde_json::to_string(&RpcResponse::error(
                    0,
                    PARSE_ERROR,
                    &format!("Parse error: {}", e),
                ))
                .unwrap_or_default();
            }
        };

        tracing::debug!(method = %request.method, id = request.id, "handling request");

        let response = if !request.is_valid() {
            RpcResponse::error(
                request.id,
                INVALID_REQUEST,
                &format!("Unsupported jsonrpc version: {}", request.jsonrpc),
            )
        } else {
            match request.method.as_str() {
                "GetProviderSchema" => self.handle_get_schema(request.id),
                "ConfigureProvider" => self.handle_configure(request.id, &request.params),
                "ValidateResourceConfig" => {
                    self.handle_validate_resource(request.id, &request.params)
                }
                "PlanResourceChange" => self.handle_plan_resource(request.id, &request.params),
                "ApplyResourceChange" => self.handle_apply_resource(request.id, &request.params),
                "ReadResource" => self.handle_read_resource(request.id, &request.params),
                "ImportResourceState" => {
                    self.handle_import_resource(request.id, &request.params)
                }
                "StopProvider" => RpcResponse::success(request.id, json!({})),
                _ => RpcResponse::error(
                    request.id,
                    METHOD_NOT_FOUND,
                    &format!("Method not found: {}", request.method),
                ),
            }
        };

        encode_response(request.id, &response)
    }

    /// Handle GetProviderSchema
    fn handle_get_schema(&self, id: i64) -> RpcResponse {
        match serde_json::to_value(self.get_schema()) {
            Ok(schema) => RpcResponse::success(id, schema),
            Err(e) => diagnostics_response(id, vec![Diagnostic::error(&e.to_string())]),
        }
    }

    /// Handle ConfigureProvider
    fn handle_configure(&self, id: i64, params: &Value) -> RpcResponse {
        let config = match params.get("config") {
            None | Some(Value::Null) => ProviderConfig::default(),
            Some(raw) => match serde_json::from_value(raw.clone()) {
                Ok(config) => config,
                Err(e) => {
                    return diagnostics_response(
                        id,
                        vec![Diagnostic::error(&format!("Invalid provider config: {}", e))],
                    )
                }
            },
        };

        diagnostics_response(id, self.configure(config))
    }

    /// Handle ValidateResourceConfig
    fn handle_validate_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.get_resource(id, params) {
            Ok(r) => r,
            Err(response) => return response,
        };

        let config = state_param(params, "config").unwrap_or_default();
        diagnostics_response(id, resource.validate(&config))
    }

    /// Handle PlanResourceChange
    fn handle_plan_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.get_resource(id, params) {
            Ok(r) => r,
            Err(response) => return response,
        };

        // Destroy plans carry no proposed state
        let Some(proposed) = state_param(params, "proposed_new_state") else {
            return RpcResponse::success(
                id,
                json!({ "planned_state": null, "requires_replace": [], "diagnostics": [] }),
            );
        };
        let prior = state_param(params, "prior_state");

        match resource.plan_change(prior.as_ref(), &proposed) {
            Ok(planned) => {
                let diagnostics: Vec<Diagnostic> = planned
                    .requires_replace
                    .iter()
                    .map(|attr| {
                        Diagnostic::warning(&format!("changing `{}` forces a new resource", attr))
                            .with_attribute(vec![attr.clone()])
                    })
                    .collect();

                RpcResponse::success(
                    id,
                    json!({
                        "planned_state": planned.state.values,
                        "requires_replace": planned.requires_replace,
                        "diagnostics": diagnostics
                    }),
                )
            }
            Err(diagnostics) => diagnostics_response(id, diagnostics),
        }
    }

    /// Handle ApplyResourceChange
    fn handle_apply_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.get_resource(id, params) {
            Ok(r) => r,
            Err(response) => return response,
        };
        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };

        let planned = state_param(params, "planned_state");
        let prior = state_param(params, "prior_state");

        let result = self.runtime.block_on(async {
            match (prior, planned) {
                (Some(prior), None) => resource.delete(client.as_ref(), &prior).await.map(|_| None),
                (None, None) => Ok(None),
                (None, Some(planned)) => resource.create(client.as_ref(), &planned).await.map(Some),
                (Some(prior), Some(planned)) => resource
                    .update(client.as_ref(), &prior, &planned)
                    .await
                    .map(Some),
            }
        });

        match result {
            Ok(new_state) => RpcResponse::success(
                id,
                json!({
                    "new_state": new_state.map(|s| s.values),
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => diagnostics_response(id, diagnostics),
        }
    }

    /// Handle ReadResource
    fn handle_read_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.get_resource(id, params) {
            Ok(r) => r,
            Err(response) => return response,
        };
        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };

        let current = state_param(params, "current_state").unwrap_or_default();
        let result = self
            .runtime
            .block_on(resource.read(client.as_ref(), &current));

        match result {
            // Resource no longer exists
            Ok(state) if state.is_empty() => {
                RpcResponse::success(id, json!({ "new_state": null, "diagnostics": [] }))
            }
            Ok(state) => RpcResponse::success(
                id,
                json!({ "new_state": state.values, "diagnostics": [] }),
            ),
            Err(diagnostics) => diagnostics_response(id, diagnostics),
        }
    }

    /// Handle ImportResourceState
    fn handle_import_resource(&self, id: i64, params: &Value) -> RpcResponse {
        let resource = match self.get_resource(id, params) {
            Ok(r) => r,
            Err(response) => return response,
        };
        let client = match self.get_client() {
            Ok(c) => c,
            Err(diag) => return diagnostics_response(id, vec![diag]),
        };

        let import_id = params.get("id").and_then(|v| v.as_str()).unwrap_or("");
        let result = self
            .runtime
            .block_on(resource.import(client.as_ref(), import_id));

        match result {
            Ok(state) => RpcResponse::success(
                id,
                json!({
                    "imported_resources": [{
                        "type_name": resource.type_name(),
                        "state": state.values
                    }],
                    "diagnostics": []
                }),
            ),
            Err(diagnostics) => diagnostics_response(id, diagnostics),
        }
    }
}
