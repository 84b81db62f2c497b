//! Conversational-facing shell around the provisioning engine.
//!
//! The natural-language layer lives elsewhere; this crate consumes the
//! structured intents it produces and returns summary objects it can render:
//! - **Intents** (`intent`) - provision and maintenance request shapes
//! - **Service** (`service`) - resolve -> execute -> record -> summarize
//! - **Summaries** (`summary`) - what the caller reports back to the user
//! - **Sessions** (`sessions`) - per-session serialization of plan runs

pub mod intent;
pub mod service;
pub mod sessions;
pub mod summary;

pub use intent::{MaintenanceAction, MaintenanceIntent, ProvisionIntent};
pub use service::{MaintenanceResponse, MaintenanceService, ProvisioningService, ServiceError};
pub use summary::{
    ActiveResource, CleanupSummary, CreatedResource, FailedResource, InventorySummary,
    PendingQuestions, ProvisionResponse, ProvisionSummary, SkippedResource,
};
