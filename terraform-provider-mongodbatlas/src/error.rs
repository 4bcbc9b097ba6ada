//! Provider error taxonomy

use crate::client::ClientError;
use crate::schema::Diagnostic;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while translating, polling or importing clusters
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{0}")]
    Validation(String),
    #[error("unexpected value for `{field}`: {detail}")]
    TypeCoercion { field: String, detail: String },
    #[error("import format error: to import a cluster, use the format {{project_id}}-{{name}}, got `{0}`")]
    ImportFormat(String),
    #[error("invalid resource id `{0}`")]
    InvalidId(String),
    #[error("timeout while waiting for state to become '{target}' (last state: '{last_state}', timeout: {timeout:?})")]
    Timeout {
        target: String,
        last_state: String,
        timeout: Duration,
    },
    #[error("unexpected state '{state}', wanted target '{target}'")]
    UnexpectedState { state: String, target: String },
    #[error("provider not configured")]
    NotConfigured,
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ProviderError {
    pub fn type_coercion(field: &str, detail: impl Into<String>) -> Self {
        Self::TypeCoercion {
            field: field.to_string(),
            detail: detail.into(),
        }
    }

    /// True when the underlying API call answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Client(ClientError::NotFound(_)))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Resource operation, used to prefix user-facing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "creating"),
            Self::Read => write!(f, "reading"),
            Self::Update => write!(f, "updating"),
            Self::Delete => write!(f, "deleting"),
            Self::Import => write!(f, "importing"),
        }
    }
}

/// Wrap an error into a diagnostic naming the operation and the cluster
pub fn operation_diagnostic(op: Operation, cluster_name: &str, err: &ProviderError) -> Diagnostic {
    Diagnostic::error(&format!(
        "error {} MongoDB Cluster ({}): {}",
        op, cluster_name, err
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_diagnostic_names_operation_and_cluster() {
        let err = ProviderError::Validation("`cluster_type` should be set".to_string());
        let diag = operation_diagnostic(Operation::Create, "orders", &err);

        assert_eq!(
            diag.summary,
            "error creating MongoDB Cluster (orders): `cluster_type` should be set"
        );
    }

    #[test]
    fn test_timeout_message_carries_last_state() {
        let err = ProviderError::Timeout {
            target: "IDLE".to_string(),
            last_state: "UPDATING".to_string(),
            timeout: Duration::from_secs(60),
        };

        let message = err.to_string();
        assert!(message.contains("IDLE"));
        assert!(message.contains("last state: 'UPDATING'"));
    }

    #[test]
    fn test_is_not_found() {
        let err = ProviderError::Client(ClientError::NotFound("gone".to_string()));
        assert!(err.is_not_found());
        assert!(!ProviderError::NotConfigured.is_not_found());
    }
}
