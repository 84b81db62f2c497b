//! Retrying executor: the `NodeExecutor` the orchestration engine drives.
//!
//! Wraps any `ProviderApi` with idempotency pre-checks and bounded
//! exponential backoff. Outcomes come back as `ExecutionRecord`s — node
//! failure is data for the engine's policies, not an error to bubble up.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use provisio_core::{
    ExecutionContext, ExecutionRecord, NodeExecutor, Operation, PlanNode, RecordOutcome,
};

use crate::api::{ActionRequest, ProviderApi, ProviderApiError, ProviderResource};
use crate::retry::RetryPolicy;

pub struct RetryingExecutor<P> {
    provider: Arc<P>,
    policy: RetryPolicy,
}

impl<P> RetryingExecutor<P>
where
    P: ProviderApi,
{
    pub fn new(provider: Arc<P>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    async fn create_with_retry(
        &self,
        request: &ActionRequest,
    ) -> (Result<ProviderResource, ProviderApiError>, u32) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.provider.create(request).await {
                Ok(resource) => return (Ok(resource), attempts),
                Err(error) if error.is_transient() && attempts < self.policy.max_attempts => {
                    let delay = self.policy.delay_for_retry(attempts);
                    tracing::debug!(
                        event_name = "provider.create.retry",
                        idempotency_key = %request.idempotency_key,
                        error_class = error.class(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient provider error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return (Err(error), attempts),
            }
        }
    }

    async fn delete_with_retry(
        &self,
        resource_type: provisio_core::ResourceType,
        provider_id: &str,
    ) -> (Result<(), ProviderApiError>, u32) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.provider.delete(resource_type, provider_id).await {
                Ok(()) => return (Ok(()), attempts),
                // The resource being gone is what a delete wants.
                Err(ProviderApiError::NotFound(_)) => return (Ok(()), attempts),
                Err(error) if error.is_transient() && attempts < self.policy.max_attempts => {
                    tokio::time::sleep(self.policy.delay_for_retry(attempts)).await;
                }
                Err(error) => return (Err(error), attempts),
            }
        }
    }
}

#[async_trait]
impl<P> NodeExecutor for RetryingExecutor<P>
where
    P: ProviderApi,
{
    async fn execute(&self, context: &ExecutionContext, node: &PlanNode) -> ExecutionRecord {
        let started_at = Utc::now();
        let idempotency_key = context.idempotency_key(&node.id);

        // Idempotency pre-check: a resource that already exists under this
        // key counts as success, so retrying a partially-applied step is safe.
        match self.provider.find_by_idempotency_key(&idempotency_key).await {
            Ok(Some(existing)) => {
                tracing::info!(
                    event_name = "provider.create.idempotent_hit",
                    node_id = %node.id.0,
                    provider_id = %existing.provider_id,
                    "resource already exists for idempotency key, skipping create"
                );
                return ExecutionRecord {
                    node_id: node.id.clone(),
                    spec: node.spec.clone(),
                    operation: Operation::Create,
                    outcome: RecordOutcome::Succeeded,
                    provider_id: Some(existing.provider_id),
                    idempotency_key,
                    attempts: 0,
                    error: None,
                    estimated_monthly_cost: node.config.estimated_monthly_cost,
                    started_at,
                    finished_at: Utc::now(),
                };
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    event_name = "provider.idempotency_check.failed",
                    node_id = %node.id.0,
                    error_class = error.class(),
                    "idempotency pre-check failed, relying on keyed create"
                );
            }
        }

        let request = ActionRequest {
            operation: Operation::Create,
            resource_type: node.spec.resource_type,
            configuration: node.config.clone(),
            idempotency_key: idempotency_key.clone(),
        };

        let (result, attempts) = self.create_with_retry(&request).await;
        let finished_at = Utc::now();

        match result {
            Ok(resource) => ExecutionRecord {
                node_id: node.id.clone(),
                spec: node.spec.clone(),
                operation: Operation::Create,
                outcome: RecordOutcome::Succeeded,
                provider_id: Some(resource.provider_id),
                idempotency_key,
                attempts,
                error: None,
                estimated_monthly_cost: node.config.estimated_monthly_cost,
                started_at,
                finished_at,
            },
            Err(error) => ExecutionRecord {
                node_id: node.id.clone(),
                spec: node.spec.clone(),
                operation: Operation::Create,
                outcome: RecordOutcome::Failed,
                provider_id: None,
                idempotency_key,
                attempts,
                error: Some(format!("{}: {error}", error.class())),
                estimated_monthly_cost: node.config.estimated_monthly_cost,
                started_at,
                finished_at,
            },
        }
    }

    async fn rollback(
        &self,
        _context: &ExecutionContext,
        record: &ExecutionRecord,
    ) -> ExecutionRecord {
        let started_at = Utc::now();

        let Some(provider_id) = record.provider_id.as_deref() else {
            // Nothing was created, so there is nothing to delete.
            return ExecutionRecord {
                operation: Operation::Delete,
                outcome: RecordOutcome::Succeeded,
                attempts: 0,
                error: None,
                started_at,
                finished_at: Utc::now(),
                ..record.clone()
            };
        };

        let (result, attempts) =
            self.delete_with_retry(record.spec.resource_type, provider_id).await;
        let finished_at = Utc::now();

        match result {
            Ok(()) => ExecutionRecord {
                operation: Operation::Delete,
                outcome: RecordOutcome::Succeeded,
                attempts,
                error: None,
                started_at,
                finished_at,
                ..record.clone()
            },
            Err(error) => ExecutionRecord {
                operation: Operation::Delete,
                outcome: RecordOutcome::Failed,
                attempts,
                error: Some(format!("{}: {error}", error.class())),
                started_at,
                finished_at,
                ..record.clone()
            },
        }
    }
}
