use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use provisio_core::{Operation, ResourceConfig, ResourceType};

/// One outbound action against the provider, shaped exactly as the
/// orchestration layer hands it over.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub operation: Operation,
    pub resource_type: ResourceType,
    pub configuration: ResourceConfig,
    pub idempotency_key: String,
}

/// A resource as the provider reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResource {
    pub provider_id: String,
    pub resource_type: ResourceType,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Provider failures, split by whether a retry can help.
///
/// The split drives the executor: transient errors go through backoff,
/// permanent ones are surfaced immediately.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderApiError {
    #[error("provider throttled the request: {0}")]
    Throttled(String),
    #[error("provider request timed out: {0}")]
    Timeout(String),
    #[error("provider temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("resource not found: {0}")]
    NotFound(String),
}

impl ProviderApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Timeout(_) | Self::Unavailable(_))
    }

    /// Stable class name for records and structured logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Throttled(_) => "throttled",
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::PermissionDenied(_) => "permission_denied",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// Uniform interface to the cloud provider. One implementation per backend;
/// the shipped one is `InMemoryProvider`.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    async fn create(&self, request: &ActionRequest) -> Result<ProviderResource, ProviderApiError>;

    async fn delete(
        &self,
        resource_type: ResourceType,
        provider_id: &str,
    ) -> Result<(), ProviderApiError>;

    /// Look up a resource previously created under `idempotency_key`.
    /// Returning `Some` means the create already happened and must not be
    /// repeated.
    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<ProviderResource>, ProviderApiError>;
}
