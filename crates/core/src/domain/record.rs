use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::plan::NodeId;
use crate::domain::resource::ResourceSpec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Succeeded,
    Failed,
}

impl RecordOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Outcome of running one plan node (or of deleting what it created).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub node_id: NodeId,
    pub spec: ResourceSpec,
    pub operation: Operation,
    pub outcome: RecordOutcome,
    /// Provider-assigned identifier, present once the resource exists.
    pub provider_id: Option<String>,
    pub idempotency_key: String,
    pub attempts: u32,
    pub error: Option<String>,
    pub estimated_monthly_cost: Decimal,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome == RecordOutcome::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::{Operation, RecordOutcome};

    #[test]
    fn operation_round_trips_from_storage_encoding() {
        for operation in [Operation::Create, Operation::Delete] {
            assert_eq!(Operation::parse(operation.as_str()), Some(operation));
        }
    }

    #[test]
    fn outcome_round_trips_from_storage_encoding() {
        for outcome in [RecordOutcome::Succeeded, RecordOutcome::Failed] {
            assert_eq!(RecordOutcome::parse(outcome.as_str()), Some(outcome));
        }
    }
}
