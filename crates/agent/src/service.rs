//! Provisioning service: the core data path behind every intent.
//!
//! structured intent -> resolver (plan) -> orchestration engine (execute via
//! executor) -> ledger (record) -> summary back to the conversational layer.

use std::sync::Arc;

use secrecy::ExposeSecret;
use thiserror::Error;
use uuid::Uuid;

use provisio_core::config::AppConfig;
use provisio_core::{
    Catalog, ChainVerification, CreationPlan, EngineConfig, EngineError, ExecutionContext,
    FailurePolicy, LedgerDraft, LedgerEntryKind, LedgerService, Mode, NodeExecutor,
    OrchestrationEngine, PlanBuilder, PlanId, PlanStatus, ResolveError, SessionId,
    suggest_next_steps,
};
use provisio_db::{LedgerRepository, RepositoryError};

use crate::intent::{MaintenanceAction, MaintenanceIntent, ProvisionIntent};
use crate::sessions::SessionLocks;
use crate::summary::{
    ActiveResource, CleanupSummary, FailedResource, InventorySummary, PendingQuestions,
    ProvisionResponse, ProvisionSummary,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown resource type `{0}`")]
    UnknownResourceType(String),
    #[error("unknown mode `{0}` (expected easy|customize)")]
    UnknownMode(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("ledger persistence failed: {0}")]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    /// User-safe phrasing the conversational layer can relay verbatim.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UnknownResourceType(_) => {
                "I don't recognize that resource type. I can create EC2 instances, \
                 Lambda functions, RDS databases, and S3 buckets."
            }
            Self::UnknownMode(_) => "Choose a setup mode first: easy or customize.",
            Self::Resolve(_) => "That request could not be expanded into a creation plan.",
            Self::Engine(_) => "The provisioning engine rejected the plan.",
            Self::Repository(_) => {
                "The provisioning record could not be saved. Please retry shortly."
            }
        }
    }
}

pub struct ProvisioningService {
    catalog: Catalog,
    executor: Arc<dyn NodeExecutor>,
    repository: Arc<dyn LedgerRepository>,
    ledger: LedgerService,
    max_parallel: usize,
    strict_default: bool,
    locks: SessionLocks,
}

/// Alias kept for callers that only drive the audit/cleanup path.
pub type MaintenanceService = ProvisioningService;

impl ProvisioningService {
    pub fn new(
        catalog: Catalog,
        executor: Arc<dyn NodeExecutor>,
        repository: Arc<dyn LedgerRepository>,
        config: &AppConfig,
    ) -> Self {
        Self {
            catalog,
            executor,
            repository,
            ledger: LedgerService::new(config.ledger.signing_key.expose_secret()),
            max_parallel: config.engine.max_parallel as usize,
            strict_default: config.engine.strict_rollback,
            locks: SessionLocks::new(),
        }
    }

    /// Handle one provisioning intent end to end.
    ///
    /// Customize-mode intents without answers return the open questions
    /// instead of executing; the caller resumes with the answers filled in.
    pub async fn handle_provision(
        &self,
        intent: &ProvisionIntent,
    ) -> Result<ProvisionResponse, ServiceError> {
        let spec = intent.resource_spec()?;
        let mode = intent.mode()?;
        let session_id = intent.session_id();
        let builder = PlanBuilder::new(&self.catalog);

        let plan = match mode {
            Mode::Easy => builder.build_plan(spec, &session_id)?,
            Mode::Customize => {
                let draft = builder.begin_customize(spec, &session_id)?;
                match &intent.customize_answers {
                    None => {
                        return Ok(ProvisionResponse::Questions(PendingQuestions::from_draft(
                            &draft,
                        )))
                    }
                    Some(answers) => draft.finalize(answers)?,
                }
            }
        };

        tracing::info!(
            event_name = "agent.provision.plan_built",
            session_id = %session_id.0,
            plan_id = %plan.id.0,
            nodes = plan.nodes.len(),
            mode = mode.as_str(),
            "creation plan resolved"
        );

        // Serialize plans within a session; the guard also covers the ledger
        // append so chain versions cannot interleave.
        let _guard = self.locks.acquire(&session_id).await;

        let policy = if intent.strict || self.strict_default {
            FailurePolicy::RollbackAll
        } else {
            FailurePolicy::ContinueIndependent
        };
        let engine = OrchestrationEngine::new(EngineConfig {
            max_parallel: self.max_parallel,
            failure_policy: policy,
        });
        let report = engine.run(plan, Arc::clone(&self.executor)).await?;

        let next_steps = report
            .plan
            .target()
            .map(|target| suggest_next_steps(target.spec.resource_type, &target.spec.purpose))
            .unwrap_or_default();

        // Rollback deletes are part of the entry's record list, so the
        // active-inventory query sees them without special cases.
        let mut records = report.records.clone();
        records.extend(report.rollback_records.clone());

        let prev = self.repository.latest_entry(&session_id).await?;
        let entry = self.ledger.seal(
            LedgerDraft {
                session_id: session_id.clone(),
                kind: LedgerEntryKind::Provision,
                plan: report.plan.clone(),
                plan_status: report.status,
                rollback_failed: report.rollback_failed,
                records,
                next_steps: next_steps.clone(),
            },
            prev.as_ref(),
        );
        self.repository.append_entry(entry.clone()).await?;

        tracing::info!(
            event_name = "agent.provision.recorded",
            session_id = %session_id.0,
            ledger_entry_id = %entry.entry_id.0,
            plan_status = report.status.as_str(),
            "plan outcome recorded in session ledger"
        );

        Ok(ProvisionResponse::Summary(ProvisionSummary::from_report(
            &report,
            next_steps,
            &entry.entry_id,
        )))
    }

    pub async fn handle_maintenance(
        &self,
        intent: &MaintenanceIntent,
    ) -> Result<MaintenanceResponse, ServiceError> {
        match intent.action {
            MaintenanceAction::FindUnused => {
                Ok(MaintenanceResponse::Inventory(self.find_unused(&intent.session_id()).await?))
            }
            MaintenanceAction::Cleanup => {
                Ok(MaintenanceResponse::Cleanup(self.cleanup(&intent.session_id()).await?))
            }
        }
    }

    /// Everything the session still pays for, with the monthly total.
    pub async fn find_unused(
        &self,
        session_id: &SessionId,
    ) -> Result<InventorySummary, ServiceError> {
        let active = self.repository.list_active(session_id).await?;
        Ok(InventorySummary::from_records(session_id, &active))
    }

    /// Delete every active resource of the session, newest first, and append
    /// a cleanup entry. Deletion is a recorded action, never an edit.
    pub async fn cleanup(&self, session_id: &SessionId) -> Result<CleanupSummary, ServiceError> {
        let _guard = self.locks.acquire(session_id).await;

        let active = self.repository.list_active(session_id).await?;
        let context = ExecutionContext::new(
            session_id.clone(),
            PlanId(format!("cleanup-{}", Uuid::new_v4())),
        );

        let mut delete_records = Vec::with_capacity(active.len());
        for record in active.iter().rev() {
            delete_records.push(self.executor.rollback(&context, record).await);
        }

        let mut deleted_resources = Vec::new();
        let mut failed_deletes = Vec::new();
        for record in &delete_records {
            if record.succeeded() {
                deleted_resources.push(ActiveResource::from_record(record));
            } else {
                failed_deletes.push(FailedResource {
                    resource_type: record.spec.resource_type.as_str().to_string(),
                    purpose: record.spec.purpose.as_str().to_string(),
                    error: record.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                });
            }
        }

        let plan_status = if failed_deletes.is_empty() {
            PlanStatus::Succeeded
        } else if deleted_resources.is_empty() {
            PlanStatus::Failed
        } else {
            PlanStatus::Partial
        };

        // Cleanup entries carry an empty plan: nothing is being created,
        // the delete records are the content.
        let plan = CreationPlan {
            id: context.plan_id.clone(),
            session_id: session_id.clone(),
            mode: Mode::Easy,
            nodes: Vec::new(),
        };

        let prev = self.repository.latest_entry(session_id).await?;
        let entry = self.ledger.seal(
            LedgerDraft {
                session_id: session_id.clone(),
                kind: LedgerEntryKind::Cleanup,
                plan,
                plan_status,
                rollback_failed: !failed_deletes.is_empty(),
                records: delete_records,
                next_steps: Vec::new(),
            },
            prev.as_ref(),
        );
        self.repository.append_entry(entry.clone()).await?;

        tracing::info!(
            event_name = "agent.cleanup.recorded",
            session_id = %session_id.0,
            ledger_entry_id = %entry.entry_id.0,
            deleted = deleted_resources.len(),
            failed = failed_deletes.len(),
            "cleanup outcome recorded in session ledger"
        );

        Ok(CleanupSummary {
            session_id: session_id.0.clone(),
            deleted_resources,
            failed_deletes,
            ledger_entry_id: entry.entry_id.0.clone(),
        })
    }

    /// Re-derive every hash and signature in the session's ledger chain.
    pub async fn verify_session(
        &self,
        session_id: &SessionId,
    ) -> Result<ChainVerification, ServiceError> {
        let entries = self.repository.list_entries(session_id).await?;
        Ok(self.ledger.verify_chain(session_id, &entries))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaintenanceResponse {
    Inventory(InventorySummary),
    Cleanup(CleanupSummary),
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use provisio_core::config::AppConfig;
    use provisio_core::{Catalog, CustomizeAnswers, PlanStatus, ResourceType, SessionId};
    use provisio_db::repositories::LedgerRepository;
    use provisio_db::InMemoryLedgerRepository;
    use provisio_provider::{
        InMemoryProvider, ProviderApiError, RetryPolicy, RetryingExecutor,
    };

    use super::{ProvisioningService, ServiceError};
    use crate::intent::{MaintenanceAction, MaintenanceIntent, ProvisionIntent};
    use crate::summary::ProvisionResponse;

    struct Harness {
        provider: Arc<InMemoryProvider>,
        repository: Arc<InMemoryLedgerRepository>,
        service: ProvisioningService,
    }

    fn harness() -> Harness {
        let provider = Arc::new(InMemoryProvider::new());
        let repository = Arc::new(InMemoryLedgerRepository::new());
        let executor = Arc::new(RetryingExecutor::new(
            provider.clone(),
            RetryPolicy { max_attempts: 2, base_delay_ms: 1, multiplier: 1 },
        ));
        let service = ProvisioningService::new(
            Catalog::builtin().expect("catalog"),
            executor,
            repository.clone(),
            &AppConfig::default(),
        );
        Harness { provider, repository, service }
    }

    fn web_server_intent(session: &str) -> ProvisionIntent {
        ProvisionIntent {
            resource_type: "ec2-instance".to_string(),
            purpose: "web_server".to_string(),
            mode: "easy".to_string(),
            session_id: session.to_string(),
            customize_answers: None,
            strict: false,
        }
    }

    fn summary_of(response: ProvisionResponse) -> crate::summary::ProvisionSummary {
        match response {
            ProvisionResponse::Summary(summary) => summary,
            ProvisionResponse::Questions(_) => panic!("expected summary, got questions"),
        }
    }

    #[tokio::test]
    async fn easy_web_server_creates_full_dependency_set() {
        let harness = harness();

        let response = harness
            .service
            .handle_provision(&web_server_intent("conv-1"))
            .await
            .expect("provision");
        let summary = summary_of(response);

        assert_eq!(summary.plan_status, PlanStatus::Succeeded);
        assert_eq!(summary.created_resources.len(), 5);
        assert!(summary.failed_resources.is_empty());
        assert!(summary.next_steps.contains(&"install web server".to_string()));

        let types: Vec<_> = summary
            .created_resources
            .iter()
            .map(|resource| resource.resource_type.as_str())
            .collect();
        for expected in ["iam-role", "security-group", "log-group", "ec2-instance"] {
            assert!(types.contains(&expected), "missing {expected} in {types:?}");
        }
        // target is created last
        assert_eq!(types.last(), Some(&"ec2-instance"));

        assert_eq!(harness.provider.resource_count(), 5);

        let verification = harness
            .service
            .verify_session(&SessionId("conv-1".to_string()))
            .await
            .expect("verify");
        assert!(verification.valid);
    }

    #[tokio::test]
    async fn failed_security_group_skips_instance_and_reports_partial() {
        let harness = harness();
        harness.provider.fail_create_always(
            ResourceType::SecurityGroup,
            ProviderApiError::QuotaExceeded("security group limit reached".into()),
        );

        let response = harness
            .service
            .handle_provision(&web_server_intent("conv-2"))
            .await
            .expect("provision");
        let summary = summary_of(response);

        assert_eq!(summary.plan_status, PlanStatus::Partial);
        assert_eq!(summary.failed_resources.len(), 1);
        assert_eq!(summary.failed_resources[0].resource_type, "security-group");
        assert_eq!(summary.skipped_resources.len(), 1);
        assert_eq!(summary.skipped_resources[0].resource_type, "ec2-instance");

        let created: Vec<_> = summary
            .created_resources
            .iter()
            .map(|resource| resource.resource_type.as_str())
            .collect();
        assert!(created.contains(&"iam-role"));
        assert!(created.contains(&"log-group"));
        assert!(!created.contains(&"ec2-instance"));

        // the instance create was never attempted against the provider
        assert!(harness
            .provider
            .resources()
            .iter()
            .all(|resource| resource.resource_type != ResourceType::Ec2Instance));
    }

    #[tokio::test]
    async fn strict_mode_rolls_back_everything_on_failure() {
        let harness = harness();
        harness.provider.fail_create_always(
            ResourceType::SecurityGroup,
            ProviderApiError::QuotaExceeded("security group limit reached".into()),
        );

        let mut intent = web_server_intent("conv-3");
        intent.strict = true;

        let response = harness.service.handle_provision(&intent).await.expect("provision");
        let summary = summary_of(response);

        assert_eq!(summary.plan_status, PlanStatus::Failed);
        assert!(summary.created_resources.is_empty());
        assert!(!summary.rollback_failed);
        // nothing is left behind at the provider
        assert_eq!(harness.provider.resource_count(), 0);
    }

    #[tokio::test]
    async fn customize_mode_asks_then_applies_answers() {
        let harness = harness();

        let mut intent = web_server_intent("conv-4");
        intent.mode = "customize".to_string();

        let first = harness.service.handle_provision(&intent).await.expect("first round");
        let questions = match first {
            ProvisionResponse::Questions(questions) => questions,
            ProvisionResponse::Summary(_) => panic!("expected questions on first round"),
        };
        let instance_question = questions
            .questions
            .iter()
            .find(|question| question.setting == "instance_type")
            .expect("instance_type question");
        assert_eq!(instance_question.default_value, "t3.medium");

        let mut answers: CustomizeAnswers = BTreeMap::new();
        answers.insert(
            instance_question.node_id.clone(),
            BTreeMap::from([("instance_type".to_string(), "c5.xlarge".to_string())]),
        );
        intent.customize_answers = Some(answers);

        let second = harness.service.handle_provision(&intent).await.expect("second round");
        let summary = summary_of(second);
        assert_eq!(summary.plan_status, PlanStatus::Succeeded);

        let instance = summary
            .created_resources
            .iter()
            .find(|resource| resource.resource_type == "ec2-instance")
            .expect("instance");
        assert_eq!(instance.config.get("instance_type").map(String::as_str), Some("c5.xlarge"));
    }

    #[tokio::test]
    async fn cleanup_deletes_active_resources_and_appends_entry() {
        let harness = harness();
        let session = SessionId("conv-5".to_string());

        harness
            .service
            .handle_provision(&web_server_intent("conv-5"))
            .await
            .expect("provision");
        assert_eq!(harness.provider.resource_count(), 5);

        let cleanup = harness
            .service
            .handle_maintenance(&MaintenanceIntent {
                action: MaintenanceAction::Cleanup,
                session_id: "conv-5".to_string(),
            })
            .await
            .expect("cleanup");

        let cleanup_summary = match cleanup {
            super::MaintenanceResponse::Cleanup(summary) => summary,
            other => panic!("expected cleanup summary, got {other:?}"),
        };
        assert_eq!(cleanup_summary.deleted_resources.len(), 5);
        assert!(cleanup_summary.failed_deletes.is_empty());
        assert_eq!(harness.provider.resource_count(), 0);

        // history: two entries, chain intact, nothing active anymore
        let entries = harness.repository.list_entries(&session).await.expect("entries");
        assert_eq!(entries.len(), 2);
        let verification = harness.service.verify_session(&session).await.expect("verify");
        assert!(verification.valid);

        let inventory = harness.service.find_unused(&session).await.expect("inventory");
        assert!(inventory.resources.is_empty());
        assert_eq!(inventory.total_monthly_cost, rust_decimal::Decimal::ZERO);
    }

    #[tokio::test]
    async fn find_unused_reports_costed_inventory() {
        let harness = harness();

        harness
            .service
            .handle_provision(&web_server_intent("conv-6"))
            .await
            .expect("provision");

        let inventory = harness
            .service
            .find_unused(&SessionId("conv-6".to_string()))
            .await
            .expect("inventory");

        assert_eq!(inventory.resources.len(), 5);
        assert!(inventory.total_monthly_cost > rust_decimal::Decimal::ZERO);
    }

    #[tokio::test]
    async fn unknown_purpose_still_provisions_with_general_profile() {
        let harness = harness();
        let mut intent = web_server_intent("conv-7");
        intent.purpose = "quantum_mining".to_string();

        let summary = summary_of(
            harness.service.handle_provision(&intent).await.expect("provision"),
        );
        assert_eq!(summary.plan_status, PlanStatus::Succeeded);

        let instance = summary
            .created_resources
            .iter()
            .find(|resource| resource.resource_type == "ec2-instance")
            .expect("instance");
        assert_eq!(instance.config.get("instance_type").map(String::as_str), Some("t3.micro"));
    }

    #[tokio::test]
    async fn unknown_resource_type_has_a_user_safe_message() {
        let harness = harness();
        let mut intent = web_server_intent("conv-8");
        intent.resource_type = "mainframe".to_string();

        let error = harness.service.handle_provision(&intent).await.expect_err("must fail");
        assert!(matches!(error, ServiceError::UnknownResourceType(_)));
        assert!(error.user_message().contains("EC2"));
    }

    #[tokio::test]
    async fn concurrent_same_session_requests_serialize_into_one_chain() {
        let harness = harness();
        let service = Arc::new(harness.service);
        let session = SessionId("conv-9".to_string());

        let first = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service.handle_provision(&web_server_intent("conv-9")).await
            })
        };
        let second = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service.handle_provision(&web_server_intent("conv-9")).await
            })
        };

        first.await.expect("join").expect("first provision");
        second.await.expect("join").expect("second provision");

        let entries = harness.repository.list_entries(&session).await.expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].version, 1);
        assert_eq!(entries[1].version, 2);

        let verification = service.verify_session(&session).await.expect("verify");
        assert!(verification.valid, "{:?}", verification.failure_reason);
    }
}
