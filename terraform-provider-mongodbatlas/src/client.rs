//! MongoDB Atlas API Client for Terraform Provider

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default Atlas Administration API endpoint
pub const DEFAULT_BASE_URL: &str = "https://cloud.mongodb.com/api/atlas/v1.0";

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Transient transport failure that a status read may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionReset(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if is_connection_reset(&err) {
            ClientError::ConnectionReset(err.to_string())
        } else {
            ClientError::Http(err)
        }
    }
}

/// Walk an error chain looking for a peer connection reset
pub(crate) fn is_connection_reset(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionReset {
                return true;
            }
        }
        if e.to_string().contains("reset by peer") {
            return true;
        }
        current = e.source();
    }
    false
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Cluster operations the provider needs from Atlas
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_cluster(&self, project_id: &str, cluster: &Cluster) -> Result<Cluster>;

    async fn get_cluster(&self, project_id: &str, name: &str) -> Result<Cluster>;

    async fn update_cluster(&self, project_id: &str, name: &str, cluster: &Cluster)
        -> Result<Cluster>;

    async fn delete_cluster(&self, project_id: &str, name: &str) -> Result<()>;
}

/// MongoDB Atlas API Client
#[derive(Clone)]
pub struct AtlasClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl AtlasClient {
    /// Create a new client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange service account credentials for an access token
    pub async fn authenticate(&mut self, client_id: &str, client_secret: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let basic = STANDARD.encode(format!("{}:{}", client_id, client_secret));
        let response = self
            .client
            .post(self.oauth_token_url())
            .header(AUTHORIZATION, format!("Basic {}", basic))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await?;

        let token: TokenResponse = self.handle_response(response).await?;
        self.token = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    /// The token endpoint lives at the API origin, not under the versioned path
    fn oauth_token_url(&self) -> String {
        let origin = match self.base_url.find("/api/") {
            Some(idx) => &self.base_url[..idx],
            None => self.base_url.as_str(),
        };
        format!("{}/api/oauth/token", origin)
    }

    /// Build headers for requests
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    /// GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .headers(self.headers())
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "PATCH");
        let response = self
            .client
            .patch(&url)
            .headers(self.headers())
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// DELETE request
    pub async fn delete(&self, path: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%url, "DELETE");
        let response = self
            .client
            .delete(&url)
            .headers(self.headers())
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    /// Map a non-success status onto a `ClientError`
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 => ClientError::AuthFailed,
            404 => ClientError::NotFound(message),
            code => ClientError::Api {
                status: code,
                message,
            },
        })
    }

    /// Handle API response
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let body = Self::check_status(response).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ClusterApi for AtlasClient {
    async fn create_cluster(&self, project_id: &str, cluster: &Cluster) -> Result<Cluster> {
        self.post(&format!("/groups/{}/clusters", project_id), cluster)
            .await
    }

    async fn get_cluster(&self, project_id: &str, name: &str) -> Result<Cluster> {
        self.get(&format!("/groups/{}/clusters/{}", project_id, name))
            .await
    }

    async fn update_cluster(
        &self,
        project_id: &str,
        name: &str,
        cluster: &Cluster,
    ) -> Result<Cluster> {
        self.patch(&format!("/groups/{}/clusters/{}", project_id, name), cluster)
            .await
    }

    async fn delete_cluster(&self, project_id: &str, name: &str) -> Result<()> {
        self.delete(&format!("/groups/{}/clusters/{}", project_id, name))
            .await
    }
}

// ============================================================================
// API Data Types
// ============================================================================

/// Cluster payload, used both for requests and responses.
/// Absent fields are omitted so the server keeps their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_scaling: Option<AutoScaling>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bi_connector: Option<BiConnector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,
    #[serde(rename = "diskSizeGB", skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_at_rest_provider: Option<String>,
    #[serde(rename = "mongoDBMajorVersion", skip_serializing_if = "Option::is_none")]
    pub mongo_db_major_version: Option<String>,
    #[serde(rename = "mongoDBVersion", skip_serializing_if = "Option::is_none")]
    pub mongo_db_version: Option<String>,
    #[serde(rename = "mongoURI", skip_serializing_if = "Option::is_none")]
    pub mongo_uri: Option<String>,
    #[serde(rename = "mongoURIUpdated", skip_serializing_if = "Option::is_none")]
    pub mongo_uri_updated: Option<String>,
    #[serde(rename = "mongoURIWithOptions", skip_serializing_if = "Option::is_none")]
    pub mongo_uri_with_options: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_shards: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_backup_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_settings: Option<ProviderSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_specs: Option<Vec<ReplicationSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srv_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoScaling {
    #[serde(rename = "diskGBEnabled", skip_serializing_if = "Option::is_none")]
    pub disk_gb_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiConnector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_preference: Option<String>,
}

/// Cloud provider settings; Atlas replaces this block as a whole
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_provider_name: Option<String>,
    #[serde(rename = "diskIOPS", skip_serializing_if = "Option::is_none")]
    pub disk_iops: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_type_name: Option<String>,
    #[serde(rename = "encryptEBSVolume", skip_serializing_if = "Option::is_none")]
    pub encrypt_ebs_volume: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_size_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
}

/// One zone of a (possibly global) cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_shards: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions_config: Option<RegionsConfigMap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_nodes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub electable_nodes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_nodes: Option<i64>,
}

/// Region name to region settings.
///
/// Serialised as a JSON object in entry order: Atlas derives election
/// priority from submission order. Deserialised through a hash map, so the
/// order of entries read back from the API is arbitrary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionsConfigMap(pub Vec<(String, RegionsConfig)>);

impl Serialize for RegionsConfigMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (region, config) in &self.0 {
            map.serialize_entry(region, config)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RegionsConfigMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RegionsVisitor;

        impl<'de> Visitor<'de> for RegionsVisitor {
            type Value = RegionsConfigMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of region name to region config")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut regions: HashMap<String, RegionsConfig> = HashMap::new();
                while let Some((region, config)) = access.next_entry()? {
                    regions.insert(region, config);
                }
                Ok(RegionsConfigMap(regions.into_iter().collect()))
            }
        }

        deserializer.deserialize_map(RegionsVisitor)
    }
}
