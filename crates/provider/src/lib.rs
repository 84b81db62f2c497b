//! Provider layer - outbound resource API behind a uniform interface
//!
//! This crate is the only place that talks to a cloud provider:
//! - **Provider API** (`api`) - the `ProviderApi` trait plus request/response
//!   and error-classification types
//! - **Retry** (`retry`) - bounded exponential backoff with jitter
//! - **Executor** (`executor`) - `RetryingExecutor`, the `NodeExecutor`
//!   implementation the orchestration engine drives
//! - **In-memory provider** (`memory`) - deterministic fake with failure
//!   injection, used by tests and simulated operation
//!
//! Every create call carries a deterministic idempotency key; the executor
//! checks for an existing resource under that key before creating, so
//! retrying a failed-but-partially-applied step never duplicates a resource.

pub mod api;
pub mod executor;
pub mod memory;
pub mod retry;

pub use api::{ActionRequest, ProviderApi, ProviderApiError, ProviderResource};
pub use executor::RetryingExecutor;
pub use memory::{FailureScript, InMemoryProvider};
pub use retry::RetryPolicy;
