//! Executor seam between the orchestration engine and the provider layer.
//!
//! The engine never talks to a cloud API directly; it hands plan nodes to a
//! `NodeExecutor` and gets `ExecutionRecord`s back. Node failure is data on
//! the record, not an `Err` — the engine's partial-success and rollback
//! policies need the failed record either way.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::plan::{NodeId, PlanId, PlanNode, SessionId};
use crate::domain::record::ExecutionRecord;

/// Identifies the plan a node execution belongs to. Idempotency keys are
/// derived from this plus the node id, so retries within one plan are safe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionContext {
    pub session_id: SessionId,
    pub plan_id: PlanId,
}

impl ExecutionContext {
    pub fn new(session_id: SessionId, plan_id: PlanId) -> Self {
        Self { session_id, plan_id }
    }

    pub fn idempotency_key(&self, node_id: &NodeId) -> String {
        idempotency_key(&self.session_id, &self.plan_id, node_id)
    }
}

/// Deterministic idempotency key for one node of one plan. Repeated calls
/// with the same (session, plan, node) always produce the same key.
pub fn idempotency_key(session_id: &SessionId, plan_id: &PlanId, node_id: &NodeId) -> String {
    let material = format!("{}|{}|{}", session_id.0, plan_id.0, node_id.0);
    let digest = Sha256::digest(material.as_bytes());
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// Executes a single plan node against the provider, and deletes what a
/// node created when the engine rolls back.
///
/// Implementations own retry, backoff, and idempotency handling; by the
/// time a record comes back its outcome is final for this attempt cycle.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, context: &ExecutionContext, node: &PlanNode) -> ExecutionRecord;

    /// Delete the resource a successful record points at. Used for strict
    /// rollback and for user-driven cleanup.
    async fn rollback(&self, context: &ExecutionContext, record: &ExecutionRecord)
        -> ExecutionRecord;
}
