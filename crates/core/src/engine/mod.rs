//! Orchestration Engine
//!
//! Walks a creation plan in dependency order, running independent branches
//! concurrently, and applies the partial-success or rollback policy when a
//! node fails. The engine exclusively owns node statuses while a plan
//! executes; callers get a read-only `PlanReport` back.
//!
//! Per-node state machine: `Pending -> InProgress -> {Created | Failed}`;
//! dependents of a failed node become `Skipped` without ever being
//! attempted; under rollback, `Created` nodes whose deletion succeeds
//! become `RolledBack`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{Id as TaskId, JoinSet};

use crate::domain::plan::{CreationPlan, NodeStatus, PlanStatus};
use crate::domain::record::{ExecutionRecord, Operation, RecordOutcome};
use crate::executor::{ExecutionContext, NodeExecutor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Keep executing branches that do not depend on the failed node;
    /// report a partial result.
    ContinueIndependent,
    /// Strict mode: any failure stops scheduling and deletes everything
    /// already created, in reverse topological order.
    RollbackAll,
}

#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Upper bound on simultaneously running provider calls.
    pub max_parallel: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_parallel: 4, failure_policy: FailurePolicy::ContinueIndependent }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("plan {0} is not topologically ordered or has dangling dependencies")]
    MalformedPlan(String),
    #[error("plan {0} has no nodes")]
    EmptyPlan(String),
}

/// Read-only outcome of executing one plan.
#[derive(Clone, Debug)]
pub struct PlanReport {
    pub plan: CreationPlan,
    pub status: PlanStatus,
    pub records: Vec<ExecutionRecord>,
    pub rollback_records: Vec<ExecutionRecord>,
    /// A rollback delete failed; the affected resources still exist and
    /// need manual intervention. Flagged prominently in the ledger.
    pub rollback_failed: bool,
    pub cancelled: bool,
}

impl PlanReport {
    pub fn created_records(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter().filter(|record| record.succeeded())
    }

    pub fn failed_records(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter().filter(|record| !record.succeeded())
    }
}

/// Cooperative cancellation for an in-flight plan. Cancelling stops the
/// scheduling of new nodes immediately; provider calls already in progress
/// are allowed to finish so no resource is left in an unknown state.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    receiver: watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct CancellationHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> (CancellationHandle, CancellationToken) {
        let (sender, receiver) = watch::channel(false);
        (CancellationHandle { sender: Arc::new(sender) }, CancellationToken { receiver })
    }

    /// A token that never fires.
    pub fn inert() -> CancellationToken {
        Self::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }
}

impl CancellationHandle {
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

#[derive(Clone, Debug)]
pub struct OrchestrationEngine {
    config: EngineConfig,
}

impl OrchestrationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        &self,
        plan: CreationPlan,
        executor: Arc<dyn NodeExecutor>,
    ) -> Result<PlanReport, EngineError> {
        self.run_with_cancellation(plan, executor, CancellationToken::inert()).await
    }

    pub async fn run_with_cancellation(
        &self,
        mut plan: CreationPlan,
        executor: Arc<dyn NodeExecutor>,
        cancel: CancellationToken,
    ) -> Result<PlanReport, EngineError> {
        if plan.nodes.is_empty() {
            return Err(EngineError::EmptyPlan(plan.id.0.clone()));
        }
        if !plan.is_well_ordered() {
            return Err(EngineError::MalformedPlan(plan.id.0.clone()));
        }

        let context =
            Arc::new(ExecutionContext::new(plan.session_id.clone(), plan.id.clone()));
        let node_count = plan.nodes.len();

        // Dependency bookkeeping by node index; readiness is recomputed
        // event-driven as each task completes, never polled.
        let index_of: HashMap<_, _> = plan
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id.clone(), index))
            .collect();
        let mut remaining_deps: Vec<usize> =
            plan.nodes.iter().map(|node| node.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); node_count];
        for (index, node) in plan.nodes.iter().enumerate() {
            for dependency in &node.depends_on {
                let dep_index = index_of[dependency];
                dependents[dep_index].push(index);
            }
        }

        let mut statuses = vec![NodeStatus::Pending; node_count];
        let mut records: Vec<Option<ExecutionRecord>> = vec![None; node_count];
        let mut ready: VecDeque<usize> = (0..node_count)
            .filter(|index| remaining_deps[*index] == 0)
            .collect();

        let mut tasks: JoinSet<(usize, ExecutionRecord)> = JoinSet::new();
        let mut inflight: HashMap<TaskId, usize> = HashMap::new();
        let mut halted = false;
        let mut any_failed = false;
        let mut was_cancelled = false;

        loop {
            if !was_cancelled && cancel.is_cancelled() {
                was_cancelled = true;
                halted = true;
                ready.clear();
                tracing::info!(
                    event_name = "engine.plan.cancelled",
                    plan_id = %plan.id.0,
                    session_id = %plan.session_id.0,
                    "plan cancelled; waiting for in-flight nodes"
                );
            }

            while !halted && tasks.len() < self.config.max_parallel.max(1) {
                let Some(node_index) = ready.pop_front() else { break };
                statuses[node_index] = NodeStatus::InProgress;

                let node = plan.nodes[node_index].clone();
                let executor = Arc::clone(&executor);
                let context = Arc::clone(&context);
                tracing::debug!(
                    event_name = "engine.node.started",
                    plan_id = %plan.id.0,
                    node_id = %node.id.0,
                    resource_type = %node.spec.resource_type,
                    "node execution started"
                );
                let handle = tasks
                    .spawn(async move { (node_index, executor.execute(&context, &node).await) });
                inflight.insert(handle.id(), node_index);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            let (node_index, record) = match joined {
                Ok((task_id, (node_index, record))) => {
                    inflight.remove(&task_id);
                    (node_index, record)
                }
                Err(join_error) => {
                    // A panicking executor is a wiring defect; fail the node
                    // rather than the whole engine loop.
                    let node_index = match inflight.remove(&join_error.id()) {
                        Some(node_index) => node_index,
                        None => continue,
                    };
                    let node = &plan.nodes[node_index];
                    let record = synthetic_failure(
                        node,
                        &context,
                        format!("executor task aborted: {join_error}"),
                    );
                    (node_index, record)
                }
            };

            if record.succeeded() {
                statuses[node_index] = NodeStatus::Created;
                tracing::info!(
                    event_name = "engine.node.created",
                    plan_id = %plan.id.0,
                    node_id = %plan.nodes[node_index].id.0,
                    provider_id = record.provider_id.as_deref().unwrap_or("unknown"),
                    "node created"
                );
                for dependent in &dependents[node_index] {
                    remaining_deps[*dependent] -= 1;
                    if remaining_deps[*dependent] == 0
                        && statuses[*dependent] == NodeStatus::Pending
                        && !halted
                    {
                        ready.push_back(*dependent);
                    }
                }
            } else {
                statuses[node_index] = NodeStatus::Failed;
                any_failed = true;
                tracing::warn!(
                    event_name = "engine.node.failed",
                    plan_id = %plan.id.0,
                    node_id = %plan.nodes[node_index].id.0,
                    error = record.error.as_deref().unwrap_or("unknown"),
                    "node failed permanently"
                );
                skip_dependents(node_index, &dependents, &mut statuses);
                if self.config.failure_policy == FailurePolicy::RollbackAll {
                    halted = true;
                    ready.clear();
                }
            }
            records[node_index] = Some(record);
        }

        // Anything still pending was cut off by a failure or cancellation.
        for status in statuses.iter_mut() {
            if *status == NodeStatus::Pending {
                *status = NodeStatus::Skipped;
            }
        }

        let mut rollback_records = Vec::new();
        let mut rollback_failed = false;
        let strict = self.config.failure_policy == FailurePolicy::RollbackAll;
        if strict && (any_failed || was_cancelled) {
            // Reverse topological order: dependents are deleted before the
            // resources they depend on.
            for node_index in (0..node_count).rev() {
                if statuses[node_index] != NodeStatus::Created {
                    continue;
                }
                let Some(record) = records[node_index].as_ref() else { continue };
                let delete_record = executor.rollback(&context, record).await;
                if delete_record.succeeded() {
                    statuses[node_index] = NodeStatus::RolledBack;
                } else {
                    // Deletion failed once; not retried, to avoid loops. The
                    // resource is orphaned and flagged for manual cleanup.
                    rollback_failed = true;
                    tracing::error!(
                        event_name = "engine.rollback.failed",
                        plan_id = %plan.id.0,
                        node_id = %plan.nodes[node_index].id.0,
                        "rollback delete failed; resource requires manual intervention"
                    );
                }
                rollback_records.push(delete_record);
            }
        }

        for (node, status) in plan.nodes.iter_mut().zip(&statuses) {
            node.status = *status;
        }

        let created = statuses.iter().filter(|status| **status == NodeStatus::Created).count();
        let rolled_back =
            statuses.iter().filter(|status| **status == NodeStatus::RolledBack).count();
        let status = if strict && (any_failed || (was_cancelled && rolled_back > 0)) {
            PlanStatus::Failed
        } else if created == node_count {
            PlanStatus::Succeeded
        } else if created > 0 {
            PlanStatus::Partial
        } else {
            PlanStatus::Failed
        };

        tracing::info!(
            event_name = "engine.plan.finished",
            plan_id = %plan.id.0,
            session_id = %plan.session_id.0,
            plan_status = status.as_str(),
            created,
            rollback_failed,
            "plan execution finished"
        );

        Ok(PlanReport {
            plan,
            status,
            records: records.into_iter().flatten().collect(),
            rollback_records,
            rollback_failed,
            cancelled: was_cancelled,
        })
    }
}

fn skip_dependents(
    failed_index: usize,
    dependents: &[Vec<usize>],
    statuses: &mut [NodeStatus],
) {
    let mut stack = vec![failed_index];
    while let Some(current) = stack.pop() {
        for dependent in &dependents[current] {
            if statuses[*dependent] == NodeStatus::Pending {
                statuses[*dependent] = NodeStatus::Skipped;
                stack.push(*dependent);
            }
        }
    }
}

fn synthetic_failure(
    node: &crate::domain::plan::PlanNode,
    context: &ExecutionContext,
    error: String,
) -> ExecutionRecord {
    let now = chrono::Utc::now();
    ExecutionRecord {
        node_id: node.id.clone(),
        spec: node.spec.clone(),
        operation: Operation::Create,
        outcome: RecordOutcome::Failed,
        provider_id: None,
        idempotency_key: context.idempotency_key(&node.id),
        attempts: 0,
        error: Some(error),
        estimated_monthly_cost: node.config.estimated_monthly_cost,
        started_at: now,
        finished_at: now,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::{
        CancellationToken, EngineConfig, EngineError, FailurePolicy, OrchestrationEngine,
    };
    use crate::catalog::Catalog;
    use crate::domain::plan::{NodeStatus, PlanStatus, SessionId};
    use crate::domain::record::{ExecutionRecord, Operation, RecordOutcome};
    use crate::domain::resource::{Purpose, ResourceSpec, ResourceType};
    use crate::executor::{ExecutionContext, NodeExecutor};
    use crate::resolver::PlanBuilder;

    /// Scripted executor: succeeds unless told otherwise, and records every
    /// create call so tests can assert what was never attempted.
    #[derive(Default)]
    struct StubExecutor {
        fail_create: HashMap<ResourceType, String>,
        fail_delete: HashMap<ResourceType, String>,
        create_calls: Mutex<Vec<ResourceType>>,
        delete_calls: Mutex<Vec<ResourceType>>,
    }

    impl StubExecutor {
        fn failing_create(resource_type: ResourceType, error: &str) -> Self {
            Self {
                fail_create: HashMap::from([(resource_type, error.to_string())]),
                ..Self::default()
            }
        }

        fn create_calls(&self) -> Vec<ResourceType> {
            self.create_calls.lock().expect("lock").clone()
        }

        fn delete_calls(&self) -> Vec<ResourceType> {
            self.delete_calls.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl NodeExecutor for StubExecutor {
        async fn execute(
            &self,
            context: &ExecutionContext,
            node: &crate::domain::plan::PlanNode,
        ) -> ExecutionRecord {
            self.create_calls.lock().expect("lock").push(node.spec.resource_type);
            let now = Utc::now();
            let failure = self.fail_create.get(&node.spec.resource_type);
            ExecutionRecord {
                node_id: node.id.clone(),
                spec: node.spec.clone(),
                operation: Operation::Create,
                outcome: if failure.is_some() {
                    RecordOutcome::Failed
                } else {
                    RecordOutcome::Succeeded
                },
                provider_id: failure.is_none().then(|| format!("res-{}", node.id.0)),
                idempotency_key: context.idempotency_key(&node.id),
                attempts: 1,
                error: failure.cloned(),
                estimated_monthly_cost: node.config.estimated_monthly_cost,
                started_at: now,
                finished_at: now,
            }
        }

        async fn rollback(
            &self,
            _context: &ExecutionContext,
            record: &ExecutionRecord,
        ) -> ExecutionRecord {
            self.delete_calls.lock().expect("lock").push(record.spec.resource_type);
            let failure = self.fail_delete.get(&record.spec.resource_type);
            let now = Utc::now();
            ExecutionRecord {
                operation: Operation::Delete,
                outcome: if failure.is_some() {
                    RecordOutcome::Failed
                } else {
                    RecordOutcome::Succeeded
                },
                error: failure.cloned(),
                started_at: now,
                finished_at: now,
                ..record.clone()
            }
        }
    }

    fn web_server_plan() -> crate::domain::plan::CreationPlan {
        let catalog = Catalog::builtin().expect("catalog");
        PlanBuilder::new(&catalog)
            .build_plan(
                ResourceSpec::new(ResourceType::Ec2Instance, Purpose::new("web_server"), "default"),
                &SessionId("sess-engine".to_string()),
            )
            .expect("plan")
    }

    #[tokio::test]
    async fn full_success_creates_every_node() {
        let engine = OrchestrationEngine::new(EngineConfig::default());
        let executor = Arc::new(StubExecutor::default());

        let report =
            engine.run(web_server_plan(), executor.clone()).await.expect("report");

        assert_eq!(report.status, PlanStatus::Succeeded);
        assert_eq!(report.records.len(), 5);
        assert!(report.plan.nodes.iter().all(|node| node.status == NodeStatus::Created));
        assert!(!report.rollback_failed);
        // target executes last: its provider call needs every companion first
        assert_eq!(executor.create_calls().last(), Some(&ResourceType::Ec2Instance));
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependents_and_reports_partial() {
        let engine = OrchestrationEngine::new(EngineConfig {
            failure_policy: FailurePolicy::ContinueIndependent,
            ..EngineConfig::default()
        });
        let executor =
            Arc::new(StubExecutor::failing_create(ResourceType::SecurityGroup, "quota exceeded"));

        let report = engine.run(web_server_plan(), executor.clone()).await.expect("report");

        assert_eq!(report.status, PlanStatus::Partial);

        let status_of = |resource_type| {
            report
                .plan
                .nodes
                .iter()
                .find(|node| node.spec.resource_type == resource_type)
                .map(|node| node.status)
                .expect("node present")
        };
        assert_eq!(status_of(ResourceType::SecurityGroup), NodeStatus::Failed);
        assert_eq!(status_of(ResourceType::Ec2Instance), NodeStatus::Skipped);
        assert_eq!(status_of(ResourceType::IamRole), NodeStatus::Created);
        assert_eq!(status_of(ResourceType::LogGroup), NodeStatus::Created);
        assert_eq!(status_of(ResourceType::KeyPair), NodeStatus::Created);

        // the skipped node's provider call is never issued
        assert!(!executor.create_calls().contains(&ResourceType::Ec2Instance));
    }

    #[tokio::test]
    async fn strict_mode_rolls_back_created_nodes_in_reverse_order() {
        let engine = OrchestrationEngine::new(EngineConfig {
            failure_policy: FailurePolicy::RollbackAll,
            max_parallel: 1,
        });
        let executor =
            Arc::new(StubExecutor::failing_create(ResourceType::KeyPair, "permission denied"));

        let report = engine.run(web_server_plan(), executor.clone()).await.expect("report");

        assert_eq!(report.status, PlanStatus::Failed);
        assert!(!report.rollback_failed);

        let rolled_back: Vec<_> = report
            .plan
            .nodes
            .iter()
            .filter(|node| node.status == NodeStatus::RolledBack)
            .map(|node| node.spec.resource_type)
            .collect();
        assert_eq!(rolled_back, vec![ResourceType::IamRole, ResourceType::SecurityGroup]);

        // reverse topological order: security group deleted before iam role
        assert_eq!(
            executor.delete_calls(),
            vec![ResourceType::SecurityGroup, ResourceType::IamRole]
        );
        assert!(report
            .plan
            .nodes
            .iter()
            .all(|node| node.status != NodeStatus::Created));
    }

    #[tokio::test]
    async fn rollback_delete_failure_is_flagged_not_retried() {
        let engine = OrchestrationEngine::new(EngineConfig {
            failure_policy: FailurePolicy::RollbackAll,
            max_parallel: 1,
        });
        let mut executor =
            StubExecutor::failing_create(ResourceType::KeyPair, "permission denied");
        executor
            .fail_delete
            .insert(ResourceType::IamRole, "delete conflict".to_string());
        let executor = Arc::new(executor);

        let report = engine.run(web_server_plan(), executor.clone()).await.expect("report");

        assert_eq!(report.status, PlanStatus::Failed);
        assert!(report.rollback_failed);

        // the orphaned node keeps its Created status so the ledger shows
        // what still exists
        let orphan = report
            .plan
            .nodes
            .iter()
            .find(|node| node.spec.resource_type == ResourceType::IamRole)
            .expect("iam role node");
        assert_eq!(orphan.status, NodeStatus::Created);

        // delete attempted exactly once
        let iam_deletes = executor
            .delete_calls()
            .iter()
            .filter(|resource_type| **resource_type == ResourceType::IamRole)
            .count();
        assert_eq!(iam_deletes, 1);
    }

    #[tokio::test]
    async fn cancellation_before_start_skips_everything() {
        let engine = OrchestrationEngine::new(EngineConfig::default());
        let executor = Arc::new(StubExecutor::default());
        let (handle, token) = CancellationToken::new();
        handle.cancel();

        let report = engine
            .run_with_cancellation(web_server_plan(), executor.clone(), token)
            .await
            .expect("report");

        assert!(report.cancelled);
        assert_eq!(report.status, PlanStatus::Failed);
        assert!(executor.create_calls().is_empty());
        assert!(report.plan.nodes.iter().all(|node| node.status == NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn empty_and_malformed_plans_are_rejected() {
        let engine = OrchestrationEngine::new(EngineConfig::default());
        let executor: Arc<StubExecutor> = Arc::new(StubExecutor::default());

        let mut empty = web_server_plan();
        empty.nodes.clear();
        assert!(matches!(
            engine.run(empty, executor.clone()).await,
            Err(EngineError::EmptyPlan(_))
        ));

        let mut inverted = web_server_plan();
        inverted.nodes.reverse();
        assert!(matches!(
            engine.run(inverted, executor).await,
            Err(EngineError::MalformedPlan(_))
        ));
    }
}
