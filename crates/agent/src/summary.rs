//! Summary objects returned to the conversational layer.
//!
//! Whatever happens, the caller gets a full partial inventory: what exists,
//! what failed, what was skipped, and what to do next — never a bare error.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use provisio_core::{
    ExecutionRecord, LedgerEntryId, NodeStatus, PlanDraft, PlanReport, PlanStatus,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResource {
    pub resource_type: String,
    pub purpose: String,
    pub provider_id: String,
    pub config: BTreeMap<String, String>,
    pub estimated_monthly_cost: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedResource {
    pub resource_type: String,
    pub purpose: String,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedResource {
    pub resource_type: String,
    pub purpose: String,
    /// The failed dependency that cut this node off.
    pub blocked_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionSummary {
    pub plan_status: PlanStatus,
    pub created_resources: Vec<CreatedResource>,
    pub failed_resources: Vec<FailedResource>,
    pub skipped_resources: Vec<SkippedResource>,
    pub next_steps: Vec<String>,
    pub rollback_failed: bool,
    pub ledger_entry_id: String,
}

/// Open customize-mode questions; the caller re-submits the same intent with
/// `customizeAnswers` filled in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuestions {
    pub plan_id: String,
    pub questions: Vec<QuestionSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSummary {
    pub node_id: String,
    pub setting: String,
    pub prompt: String,
    pub default_value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProvisionResponse {
    Summary(ProvisionSummary),
    Questions(PendingQuestions),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveResource {
    pub resource_type: String,
    pub purpose: String,
    pub provider_id: String,
    pub estimated_monthly_cost: Decimal,
}

/// Answer to a `findUnused` query: everything the session still pays for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub session_id: String,
    pub resources: Vec<ActiveResource>,
    pub total_monthly_cost: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub session_id: String,
    pub deleted_resources: Vec<ActiveResource>,
    pub failed_deletes: Vec<FailedResource>,
    pub ledger_entry_id: String,
}

impl ProvisionSummary {
    pub fn from_report(
        report: &PlanReport,
        next_steps: Vec<String>,
        ledger_entry_id: &LedgerEntryId,
    ) -> Self {
        let record_for = |node_id: &provisio_core::NodeId| {
            report.records.iter().find(|record| &record.node_id == node_id)
        };

        let mut created_resources = Vec::new();
        let mut failed_resources = Vec::new();
        let mut skipped_resources = Vec::new();

        for node in &report.plan.nodes {
            match node.status {
                NodeStatus::Created => {
                    let provider_id = record_for(&node.id)
                        .and_then(|record| record.provider_id.clone())
                        .unwrap_or_else(|| "unknown".to_string());
                    created_resources.push(CreatedResource {
                        resource_type: node.spec.resource_type.as_str().to_string(),
                        purpose: node.spec.purpose.as_str().to_string(),
                        provider_id,
                        config: node.config.settings.clone(),
                        estimated_monthly_cost: node.config.estimated_monthly_cost,
                    });
                }
                NodeStatus::Failed => {
                    let error = record_for(&node.id)
                        .and_then(|record| record.error.clone())
                        .unwrap_or_else(|| "unknown error".to_string());
                    failed_resources.push(FailedResource {
                        resource_type: node.spec.resource_type.as_str().to_string(),
                        purpose: node.spec.purpose.as_str().to_string(),
                        error,
                    });
                }
                NodeStatus::Skipped => {
                    let blocked_by = node
                        .depends_on
                        .iter()
                        .find(|dependency| {
                            report
                                .plan
                                .node(dependency)
                                .is_some_and(|dep| {
                                    matches!(dep.status, NodeStatus::Failed | NodeStatus::Skipped)
                                })
                        })
                        .map(|dependency| dependency.0.clone());
                    skipped_resources.push(SkippedResource {
                        resource_type: node.spec.resource_type.as_str().to_string(),
                        purpose: node.spec.purpose.as_str().to_string(),
                        blocked_by,
                    });
                }
                NodeStatus::RolledBack | NodeStatus::Pending | NodeStatus::InProgress => {}
            }
        }

        Self {
            plan_status: report.status,
            created_resources,
            failed_resources,
            skipped_resources,
            next_steps,
            rollback_failed: report.rollback_failed,
            ledger_entry_id: ledger_entry_id.0.clone(),
        }
    }
}

impl PendingQuestions {
    pub fn from_draft(draft: &PlanDraft) -> Self {
        Self {
            plan_id: draft.plan_id().0.clone(),
            questions: draft
                .questions()
                .iter()
                .map(|question| QuestionSummary {
                    node_id: question.node_id.0.clone(),
                    setting: question.setting.clone(),
                    prompt: question.prompt.clone(),
                    default_value: question.default_value.clone(),
                })
                .collect(),
        }
    }
}

impl ActiveResource {
    pub fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            resource_type: record.spec.resource_type.as_str().to_string(),
            purpose: record.spec.purpose.as_str().to_string(),
            provider_id: record.provider_id.clone().unwrap_or_else(|| "unknown".to_string()),
            estimated_monthly_cost: record.estimated_monthly_cost,
        }
    }
}

impl InventorySummary {
    pub fn from_records(session_id: &provisio_core::SessionId, records: &[ExecutionRecord]) -> Self {
        let resources: Vec<_> = records.iter().map(ActiveResource::from_record).collect();
        let total_monthly_cost =
            resources.iter().map(|resource| resource.estimated_monthly_cost).sum();
        Self { session_id: session_id.0.clone(), resources, total_monthly_cost }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use provisio_core::chrono::Utc;
    use provisio_core::{
        ExecutionRecord, NodeId, Operation, Purpose, RecordOutcome, ResourceSpec, ResourceType,
        SessionId,
    };

    use super::InventorySummary;

    fn active_record(node: &str, cost_cents: i64) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            node_id: NodeId(node.to_string()),
            spec: ResourceSpec::new(
                ResourceType::Ec2Instance,
                Purpose::new("web_server"),
                "default",
            ),
            operation: Operation::Create,
            outcome: RecordOutcome::Succeeded,
            provider_id: Some(format!("i-{node}")),
            idempotency_key: format!("key-{node}"),
            attempts: 1,
            error: None,
            estimated_monthly_cost: Decimal::new(cost_cents, 2),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn inventory_totals_monthly_cost() {
        let summary = InventorySummary::from_records(
            &SessionId("sess-sum".to_string()),
            &[active_record("a", 3_400), active_record("b", 800)],
        );

        assert_eq!(summary.resources.len(), 2);
        assert_eq!(summary.total_monthly_cost, Decimal::new(4_200, 2));
    }

    #[test]
    fn serialized_summary_uses_camel_case_keys() {
        let summary = InventorySummary::from_records(
            &SessionId("sess-sum".to_string()),
            &[active_record("a", 3_400)],
        );

        let json = serde_json::to_string(&summary).expect("serialize");
        assert!(json.contains("totalMonthlyCost"));
        assert!(json.contains("resourceType"));
    }
}
