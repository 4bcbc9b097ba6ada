//! Provider and operation configuration

use crate::client::DEFAULT_BASE_URL;
use crate::error::{ProviderError, Result};
use crate::resources::ResourceState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_BASE_URL: &str = "MONGODB_ATLAS_BASE_URL";
pub const ENV_ACCESS_TOKEN: &str = "MONGODB_ATLAS_ACCESS_TOKEN";
pub const ENV_CLIENT_ID: &str = "MONGODB_ATLAS_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "MONGODB_ATLAS_CLIENT_SECRET";

/// Provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// How the provider authenticates against Atlas
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    AccessToken(String),
    ServiceAccount {
        client_id: String,
        client_secret: String,
    },
}

impl ProviderConfig {
    /// Fill unset values from the process environment
    pub fn with_env_defaults(self) -> Self {
        self.with_defaults_from(|key| std::env::var(key).ok())
    }

    pub fn with_defaults_from(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let pick = |value: Option<String>, key: &str| {
            value.filter(|v| !v.is_empty()).or_else(|| lookup(key))
        };

        Self {
            base_url: pick(self.base_url, ENV_BASE_URL),
            access_token: pick(self.access_token, ENV_ACCESS_TOKEN),
            client_id: pick(self.client_id, ENV_CLIENT_ID),
            client_secret: pick(self.client_secret, ENV_CLIENT_SECRET),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// An access token wins over service account credentials
    pub fn credentials(&self) -> Result<Credentials> {
        if let Some(token) = &self.access_token {
            return Ok(Credentials::AccessToken(token.clone()));
        }
        match (&self.client_id, &self.client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(Credentials::ServiceAccount {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => Err(ProviderError::Validation(
                "either access_token or client_id/client_secret must be provided".to_string(),
            )),
        }
    }
}

/// Default budget for create and update polling
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(3 * 3600);

/// Default budget for delete polling
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Poll budgets per operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            create: DEFAULT_CREATE_TIMEOUT,
            update: DEFAULT_CREATE_TIMEOUT,
            delete: DEFAULT_DELETE_TIMEOUT,
        }
    }
}

impl OperationTimeouts {
    /// Read the optional `timeouts` block, e.g. `{ create = "90m" }`
    pub fn from_state(state: &ResourceState) -> Result<Self> {
        let mut timeouts = Self::default();
        let Some(block) = state.get("timeouts").and_then(|v| v.as_object()) else {
            return Ok(timeouts);
        };

        for (key, slot) in [
            ("create", &mut timeouts.create),
            ("update", &mut timeouts.update),
            ("delete", &mut timeouts.delete),
        ] {
            if let Some(raw) = block.get(key).and_then(|v| v.as_str()) {
                *slot = parse_duration(raw).ok_or_else(|| {
                    ProviderError::Validation(format!(
                        "invalid `timeouts.{}` duration `{}`",
                        key, raw
                    ))
                })?;
            }
        }
        Ok(timeouts)
    }
}

/// Parse durations such as `30s`, `45m`, `3h` or `1h30m`
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match c {
            's' | 'S' => 1,
            'm' | 'M' => 60,
            'h' | 'H' => 3600,
            _ => return None,
        };
        total = total.checked_add(n.checked_mul(unit)?)?;
    }
    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}
