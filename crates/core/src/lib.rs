pub mod catalog;
pub mod config;
pub mod domain;
pub mod engine;
pub mod executor;
pub mod ledger;
pub mod resolver;
pub mod suggestions;

pub use catalog::{Catalog, CatalogError, MANAGED_BY_TAG};
pub use domain::plan::{
    CreationPlan, NodeId, NodeStatus, PlanId, PlanNode, PlanStatus, SessionId,
};
pub use domain::record::{ExecutionRecord, Operation, RecordOutcome};
pub use domain::resource::{Mode, Purpose, ResourceConfig, ResourceSpec, ResourceType};
pub use engine::{
    CancellationHandle, CancellationToken, EngineConfig, EngineError, FailurePolicy,
    OrchestrationEngine, PlanReport,
};
pub use executor::{idempotency_key, ExecutionContext, NodeExecutor};
pub use ledger::{
    ChainVerification, LedgerDraft, LedgerEntry, LedgerEntryId, LedgerEntryKind, LedgerService,
};
pub use resolver::{CustomizeAnswers, PendingQuestion, PlanBuilder, PlanDraft, ResolveError};
pub use suggestions::suggest_next_steps;

// Re-export shared foundation crates so downstream crates stay on one version.
pub use chrono;
pub use rust_decimal;
