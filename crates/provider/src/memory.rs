//! Deterministic in-memory provider.
//!
//! Stands in for the real cloud backend in tests and simulated operation.
//! Failure scripts let a test make any (resource type, operation) pair fail
//! permanently or a fixed number of times, which is how the engine's retry,
//! partial-success, and rollback paths are exercised.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use provisio_core::{Operation, ResourceType};

use crate::api::{ActionRequest, ProviderApi, ProviderApiError, ProviderResource};

/// Scripted failure behavior for one (resource type, operation) pair.
#[derive(Clone, Debug)]
pub enum FailureScript {
    Always(ProviderApiError),
    /// Fail the next `remaining` calls, then behave normally.
    Times { error: ProviderApiError, remaining: u32 },
}

#[derive(Default)]
struct ProviderState {
    resources: HashMap<String, ProviderResource>,
    scripts: HashMap<(ResourceType, Operation), FailureScript>,
    create_calls: u32,
    delete_calls: u32,
}

#[derive(Default)]
pub struct InMemoryProvider {
    state: Mutex<ProviderState>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create_always(&self, resource_type: ResourceType, error: ProviderApiError) {
        self.lock().scripts.insert((resource_type, Operation::Create), FailureScript::Always(error));
    }

    pub fn fail_create_times(&self, resource_type: ResourceType, error: ProviderApiError, times: u32) {
        self.lock()
            .scripts
            .insert((resource_type, Operation::Create), FailureScript::Times { error, remaining: times });
    }

    pub fn fail_delete_always(&self, resource_type: ResourceType, error: ProviderApiError) {
        self.lock().scripts.insert((resource_type, Operation::Delete), FailureScript::Always(error));
    }

    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn resources(&self) -> Vec<ProviderResource> {
        let mut resources: Vec<_> = self.lock().resources.values().cloned().collect();
        resources.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        resources
    }

    pub fn create_calls(&self) -> u32 {
        self.lock().create_calls
    }

    pub fn delete_calls(&self) -> u32 {
        self.lock().delete_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn scripted_failure(
        state: &mut ProviderState,
        resource_type: ResourceType,
        operation: Operation,
    ) -> Option<ProviderApiError> {
        match state.scripts.get_mut(&(resource_type, operation)) {
            Some(FailureScript::Always(error)) => Some(error.clone()),
            Some(FailureScript::Times { error, remaining }) => {
                if *remaining == 0 {
                    None
                } else {
                    *remaining -= 1;
                    Some(error.clone())
                }
            }
            None => None,
        }
    }
}

fn provider_id_for(resource_type: ResourceType) -> String {
    let prefix = match resource_type {
        ResourceType::Ec2Instance => "i-",
        ResourceType::LambdaFunction => "fn-",
        ResourceType::RdsDatabase => "db-",
        ResourceType::S3Bucket => "bkt-",
        ResourceType::IamRole => "role-",
        ResourceType::SecurityGroup => "sg-",
        ResourceType::LogGroup => "lg-",
        ResourceType::KeyPair => "key-",
    };
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}{}", &suffix[..12])
}

#[async_trait]
impl ProviderApi for InMemoryProvider {
    async fn create(&self, request: &ActionRequest) -> Result<ProviderResource, ProviderApiError> {
        let mut state = self.lock();
        state.create_calls += 1;

        if let Some(error) =
            Self::scripted_failure(&mut state, request.resource_type, Operation::Create)
        {
            return Err(error);
        }

        // Provider-side idempotency: a second create under the same key
        // returns the existing resource instead of making another one.
        if let Some(existing) = state.resources.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let resource = ProviderResource {
            provider_id: provider_id_for(request.resource_type),
            resource_type: request.resource_type,
            idempotency_key: request.idempotency_key.clone(),
            created_at: Utc::now(),
        };
        state.resources.insert(request.idempotency_key.clone(), resource.clone());
        Ok(resource)
    }

    async fn delete(
        &self,
        resource_type: ResourceType,
        provider_id: &str,
    ) -> Result<(), ProviderApiError> {
        let mut state = self.lock();
        state.delete_calls += 1;

        if let Some(error) = Self::scripted_failure(&mut state, resource_type, Operation::Delete) {
            return Err(error);
        }

        let key = state
            .resources
            .iter()
            .find(|(_, resource)| {
                resource.provider_id == provider_id && resource.resource_type == resource_type
            })
            .map(|(key, _)| key.clone());

        match key {
            Some(key) => {
                state.resources.remove(&key);
                Ok(())
            }
            None => Err(ProviderApiError::NotFound(format!(
                "{} {provider_id} does not exist",
                resource_type.as_str()
            ))),
        }
    }

    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<ProviderResource>, ProviderApiError> {
        Ok(self.lock().resources.get(idempotency_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use provisio_core::{Operation, ResourceConfig, ResourceType};

    use super::InMemoryProvider;
    use crate::api::{ActionRequest, ProviderApi, ProviderApiError};

    fn request(key: &str) -> ActionRequest {
        ActionRequest {
            operation: Operation::Create,
            resource_type: ResourceType::S3Bucket,
            configuration: ResourceConfig::default(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_per_key() {
        let provider = InMemoryProvider::new();

        let first = provider.create(&request("key-1")).await.expect("first create");
        let second = provider.create(&request("key-1")).await.expect("second create");

        assert_eq!(first.provider_id, second.provider_id);
        assert_eq!(provider.resource_count(), 1);
    }

    #[tokio::test]
    async fn delete_removes_and_missing_delete_is_not_found() {
        let provider = InMemoryProvider::new();
        let resource = provider.create(&request("key-2")).await.expect("create");

        provider
            .delete(ResourceType::S3Bucket, &resource.provider_id)
            .await
            .expect("delete");
        assert_eq!(provider.resource_count(), 0);

        let missing = provider.delete(ResourceType::S3Bucket, &resource.provider_id).await;
        assert!(matches!(missing, Err(ProviderApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn fail_times_script_expires() {
        let provider = InMemoryProvider::new();
        provider.fail_create_times(
            ResourceType::S3Bucket,
            ProviderApiError::Throttled("slow down".into()),
            2,
        );

        assert!(provider.create(&request("key-3")).await.is_err());
        assert!(provider.create(&request("key-3")).await.is_err());
        assert!(provider.create(&request("key-3")).await.is_ok());
        assert_eq!(provider.create_calls(), 3);
    }
}
