//! Dependency Resolver
//!
//! Expands a requested resource into a full, topologically sorted creation
//! plan using the catalog's dependency templates. Expansion is depth-first
//! with post-order emission, so every companion lands strictly before the
//! node that required it; companions shared by several parents are
//! deduplicated by logical key `(type, purpose, scope)` rather than object
//! identity. Ties among independent nodes follow catalog declaration order,
//! which makes plan ordering byte-identical for identical inputs.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogError};
use crate::domain::plan::{CreationPlan, NodeId, NodeStatus, PlanId, PlanNode, SessionId};
use crate::domain::resource::{Mode, ResourceSpec};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("customize answer references unknown node `{0}`")]
    UnknownAnswerNode(String),
    #[error("customize answer references unknown setting `{setting}` on node `{node}`")]
    UnknownAnswerSetting { node: String, setting: String },
}

/// Answers supplied by the caller to finalize a customize-mode draft:
/// node id -> setting key -> chosen value.
pub type CustomizeAnswers = BTreeMap<String, BTreeMap<String, String>>;

/// One open choice in a customize-mode draft.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingQuestion {
    pub node_id: NodeId,
    pub setting: String,
    pub prompt: String,
    pub default_value: String,
}

/// Customize-mode plan skeleton: the same node set as easy mode, plus the
/// open questions whose answers replace catalog defaults. A resumable value,
/// not a callback — the caller holds it, gathers answers, and finalizes.
#[derive(Clone, Debug)]
pub struct PlanDraft {
    plan: CreationPlan,
    questions: Vec<PendingQuestion>,
}

impl PlanDraft {
    pub fn questions(&self) -> &[PendingQuestion] {
        &self.questions
    }

    pub fn plan_id(&self) -> &PlanId {
        &self.plan.id
    }

    /// Apply caller answers over catalog defaults and seal the plan.
    /// Unanswered questions keep their defaults; answers that point at
    /// nodes or settings the draft never asked about are rejected.
    pub fn finalize(mut self, answers: &CustomizeAnswers) -> Result<CreationPlan, ResolveError> {
        for (node_key, chosen) in answers {
            let node = self
                .plan
                .nodes
                .iter_mut()
                .find(|node| node.id.0 == *node_key)
                .ok_or_else(|| ResolveError::UnknownAnswerNode(node_key.clone()))?;

            for (setting, value) in chosen {
                if !node.config.settings.contains_key(setting) {
                    return Err(ResolveError::UnknownAnswerSetting {
                        node: node_key.clone(),
                        setting: setting.clone(),
                    });
                }
                node.config.settings.insert(setting.clone(), value.clone());
            }
        }

        Ok(self.plan)
    }
}

/// Builds creation plans against an immutable, already-validated catalog.
#[derive(Clone, Debug)]
pub struct PlanBuilder<'a> {
    catalog: &'a Catalog,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Easy-mode resolution: catalog defaults all the way down.
    pub fn build_plan(
        &self,
        spec: ResourceSpec,
        session_id: &SessionId,
    ) -> Result<CreationPlan, ResolveError> {
        self.build(spec, session_id, Mode::Easy)
    }

    /// Customize-mode resolution: same expansion, but the result is a draft
    /// carrying one question per overridable setting.
    pub fn begin_customize(
        &self,
        spec: ResourceSpec,
        session_id: &SessionId,
    ) -> Result<PlanDraft, ResolveError> {
        let plan = self.build(spec, session_id, Mode::Customize)?;

        let mut questions = Vec::new();
        for node in &plan.nodes {
            for (setting, default_value) in &node.config.settings {
                if matches!(setting.as_str(), "managed_by" | "purpose") {
                    continue;
                }
                questions.push(PendingQuestion {
                    node_id: node.id.clone(),
                    setting: setting.clone(),
                    prompt: format!(
                        "Choose {} for {} ({})",
                        setting,
                        node.spec.resource_type.as_str(),
                        node.spec.purpose.as_str()
                    ),
                    default_value: default_value.clone(),
                });
            }
        }

        Ok(PlanDraft { plan, questions })
    }

    fn build(
        &self,
        spec: ResourceSpec,
        session_id: &SessionId,
        mode: Mode,
    ) -> Result<CreationPlan, ResolveError> {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();
        let mut visiting = Vec::new();
        self.expand(&spec, &mut nodes, &mut index, &mut visiting)?;

        Ok(CreationPlan {
            id: PlanId(Uuid::new_v4().to_string()),
            session_id: session_id.clone(),
            mode,
            nodes,
        })
    }

    fn expand(
        &self,
        spec: &ResourceSpec,
        nodes: &mut Vec<PlanNode>,
        index: &mut HashMap<String, NodeId>,
        visiting: &mut Vec<String>,
    ) -> Result<NodeId, ResolveError> {
        let key = spec.logical_key();

        if let Some(existing) = index.get(&key) {
            return Ok(existing.clone());
        }
        if visiting.contains(&key) {
            let mut chain = visiting.clone();
            chain.push(key);
            return Err(CatalogError::DependencyCycle { chain: chain.join(" -> ") }.into());
        }

        visiting.push(key.clone());
        let companions =
            self.catalog.dependencies(spec.resource_type, &spec.purpose, &spec.scope)?;

        let mut depends_on = Vec::with_capacity(companions.len());
        for companion in &companions {
            depends_on.push(self.expand(companion, nodes, index, visiting)?);
        }
        visiting.pop();

        let config = self.catalog.configuration(spec.resource_type, &spec.purpose)?;
        let id = NodeId(key.clone());
        nodes.push(PlanNode {
            id: id.clone(),
            spec: spec.clone(),
            config,
            depends_on,
            status: NodeStatus::Pending,
        });
        index.insert(key, id.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{CustomizeAnswers, PlanBuilder, ResolveError};
    use crate::catalog::Catalog;
    use crate::domain::plan::SessionId;
    use crate::domain::resource::{Mode, Purpose, ResourceSpec, ResourceType};

    fn session() -> SessionId {
        SessionId("sess-resolver".to_string())
    }

    fn web_server_spec() -> ResourceSpec {
        ResourceSpec::new(ResourceType::Ec2Instance, Purpose::new("web_server"), "default")
    }

    #[test]
    fn web_server_plan_contains_companions_with_target_last() {
        let catalog = Catalog::builtin().expect("catalog");
        let builder = PlanBuilder::new(&catalog);

        let plan = builder.build_plan(web_server_spec(), &session()).expect("plan");

        let kinds: Vec<_> = plan.nodes.iter().map(|node| node.spec.resource_type).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceType::IamRole,
                ResourceType::SecurityGroup,
                ResourceType::KeyPair,
                ResourceType::LogGroup,
                ResourceType::Ec2Instance,
            ]
        );
        assert!(plan.is_well_ordered());
        assert_eq!(plan.target().map(|node| node.spec.resource_type), Some(ResourceType::Ec2Instance));
    }

    #[test]
    fn build_plan_is_deterministic_for_identical_inputs() {
        let catalog = Catalog::builtin().expect("catalog");
        let builder = PlanBuilder::new(&catalog);

        let first = builder.build_plan(web_server_spec(), &session()).expect("first plan");
        let second = builder.build_plan(web_server_spec(), &session()).expect("second plan");

        let first_ids: Vec<_> = first.nodes.iter().map(|node| node.id.0.clone()).collect();
        let second_ids: Vec<_> = second.nodes.iter().map(|node| node.id.0.clone()).collect();
        assert_eq!(first_ids, second_ids);

        let first_configs: Vec<_> = first.nodes.iter().map(|node| node.config.clone()).collect();
        let second_configs: Vec<_> = second.nodes.iter().map(|node| node.config.clone()).collect();
        assert_eq!(first_configs, second_configs);
    }

    #[test]
    fn shared_companions_are_deduplicated_by_logical_key() {
        let catalog = Catalog::builtin().expect("catalog");
        let builder = PlanBuilder::new(&catalog);

        // lambda and ec2 with the same purpose+scope share iam-role/log-group.
        let plan = builder.build_plan(web_server_spec(), &session()).expect("plan");
        let role_nodes = plan
            .nodes
            .iter()
            .filter(|node| node.spec.resource_type == ResourceType::IamRole)
            .count();
        assert_eq!(role_nodes, 1);

        // every dependency edge resolves to a node in the plan
        for node in &plan.nodes {
            for dependency in &node.depends_on {
                assert!(plan.node(dependency).is_some(), "dangling dependency {dependency:?}");
            }
        }
    }

    #[test]
    fn customize_draft_exposes_questions_and_applies_answers() {
        let catalog = Catalog::builtin().expect("catalog");
        let builder = PlanBuilder::new(&catalog);

        let draft = builder.begin_customize(web_server_spec(), &session()).expect("draft");
        assert!(draft
            .questions()
            .iter()
            .any(|question| question.setting == "instance_type"
                && question.default_value == "t3.medium"));

        let instance_node = draft
            .questions()
            .iter()
            .find(|question| question.setting == "instance_type")
            .map(|question| question.node_id.0.clone())
            .expect("instance question");

        let mut answers: CustomizeAnswers = BTreeMap::new();
        answers.insert(
            instance_node.clone(),
            BTreeMap::from([("instance_type".to_string(), "c5.xlarge".to_string())]),
        );

        let plan = draft.finalize(&answers).expect("finalized plan");
        assert_eq!(plan.mode, Mode::Customize);

        let instance = plan
            .nodes
            .iter()
            .find(|node| node.id.0 == instance_node)
            .expect("instance node in plan");
        assert_eq!(instance.config.setting("instance_type"), Some("c5.xlarge"));
        // unanswered settings keep catalog defaults
        assert_eq!(instance.config.setting("image_id"), Some("ami-0abcdef1234567890"));
    }

    #[test]
    fn finalize_rejects_answers_for_unknown_targets() {
        let catalog = Catalog::builtin().expect("catalog");
        let builder = PlanBuilder::new(&catalog);

        let draft = builder.begin_customize(web_server_spec(), &session()).expect("draft");
        let mut answers: CustomizeAnswers = BTreeMap::new();
        answers.insert(
            "no-such-node".to_string(),
            BTreeMap::from([("instance_type".to_string(), "c5.xlarge".to_string())]),
        );
        assert!(matches!(
            draft.clone().finalize(&answers),
            Err(ResolveError::UnknownAnswerNode(_))
        ));

        let node_id = draft.questions()[0].node_id.0.clone();
        let mut bad_setting: CustomizeAnswers = BTreeMap::new();
        bad_setting.insert(
            node_id,
            BTreeMap::from([("warp_drive".to_string(), "enabled".to_string())]),
        );
        assert!(matches!(
            draft.finalize(&bad_setting),
            Err(ResolveError::UnknownAnswerSetting { .. })
        ));
    }
}
