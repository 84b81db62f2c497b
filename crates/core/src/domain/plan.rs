use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::resource::{Mode, ResourceConfig, ResourceSpec};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(pub String);

/// Node ids are the node's logical key, so identical requests produce
/// identical ids and idempotency keys derive deterministically.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Created,
    Failed,
    /// Dependent of a failed node; its provider call is never issued.
    Skipped,
    RolledBack,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Created => "created",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "created" => Some(Self::Created),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Succeeded,
    Partial,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "succeeded" => Some(Self::Succeeded),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One resource to be created, with its resolved configuration and the node
/// ids it depends on. Dependencies always appear earlier in the plan order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub spec: ResourceSpec,
    pub config: ResourceConfig,
    pub depends_on: Vec<NodeId>,
    pub status: NodeStatus,
}

/// Topologically sorted creation plan for one user request.
///
/// Owned exclusively by the orchestration engine while it executes;
/// read-only once execution completes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationPlan {
    pub id: PlanId,
    pub session_id: SessionId,
    pub mode: Mode,
    pub nodes: Vec<PlanNode>,
}

impl CreationPlan {
    pub fn node(&self, id: &NodeId) -> Option<&PlanNode> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// The originally requested resource: by construction the last node,
    /// since every companion precedes its dependents.
    pub fn target(&self) -> Option<&PlanNode> {
        self.nodes.last()
    }

    /// All nodes that transitively depend on `id`.
    pub fn transitive_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut direct: HashMap<&NodeId, Vec<&NodeId>> = HashMap::new();
        for node in &self.nodes {
            for dependency in &node.depends_on {
                direct.entry(dependency).or_default().push(&node.id);
            }
        }

        let mut dependents = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for dependent in direct.get(current).into_iter().flatten() {
                if dependents.insert((*dependent).clone()) {
                    stack.push(*dependent);
                }
            }
        }
        dependents
    }

    /// Topological-sort invariant: every dependency appears strictly before
    /// its dependents and references a node in the plan.
    pub fn is_well_ordered(&self) -> bool {
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if !node.depends_on.iter().all(|dependency| seen.contains(dependency)) {
                return false;
            }
            seen.insert(node.id.clone());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{CreationPlan, NodeId, NodeStatus, PlanId, PlanNode, PlanStatus, SessionId};
    use crate::domain::resource::{Mode, Purpose, ResourceConfig, ResourceSpec, ResourceType};

    fn node(id: &str, resource_type: ResourceType, depends_on: &[&str]) -> PlanNode {
        PlanNode {
            id: NodeId(id.to_string()),
            spec: ResourceSpec::new(resource_type, Purpose::new("web_server"), "default"),
            config: ResourceConfig::default(),
            depends_on: depends_on.iter().map(|dep| NodeId(dep.to_string())).collect(),
            status: NodeStatus::Pending,
        }
    }

    fn plan(nodes: Vec<PlanNode>) -> CreationPlan {
        CreationPlan {
            id: PlanId("plan-1".to_string()),
            session_id: SessionId("sess-1".to_string()),
            mode: Mode::Easy,
            nodes,
        }
    }

    #[test]
    fn node_status_round_trips_from_storage_encoding() {
        let cases = [
            NodeStatus::Pending,
            NodeStatus::InProgress,
            NodeStatus::Created,
            NodeStatus::Failed,
            NodeStatus::Skipped,
            NodeStatus::RolledBack,
        ];

        for status in cases {
            assert_eq!(NodeStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn plan_status_round_trips_from_storage_encoding() {
        for status in [PlanStatus::Succeeded, PlanStatus::Partial, PlanStatus::Failed] {
            assert_eq!(PlanStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn transitive_dependents_walks_the_whole_downstream_chain() {
        let plan = plan(vec![
            node("role", ResourceType::IamRole, &[]),
            node("sg", ResourceType::SecurityGroup, &[]),
            node("instance", ResourceType::Ec2Instance, &["role", "sg"]),
        ]);

        let dependents = plan.transitive_dependents(&NodeId("sg".to_string()));
        assert_eq!(dependents.len(), 1);
        assert!(dependents.contains(&NodeId("instance".to_string())));

        assert!(plan.transitive_dependents(&NodeId("instance".to_string())).is_empty());
    }

    #[test]
    fn well_ordered_detects_forward_references() {
        let ordered = plan(vec![
            node("role", ResourceType::IamRole, &[]),
            node("instance", ResourceType::Ec2Instance, &["role"]),
        ]);
        assert!(ordered.is_well_ordered());

        let inverted = plan(vec![
            node("instance", ResourceType::Ec2Instance, &["role"]),
            node("role", ResourceType::IamRole, &[]),
        ]);
        assert!(!inverted.is_well_ordered());
    }

    #[test]
    fn target_is_the_last_node() {
        let plan = plan(vec![
            node("role", ResourceType::IamRole, &[]),
            node("instance", ResourceType::Ec2Instance, &["role"]),
        ]);

        assert_eq!(plan.target().map(|node| node.spec.resource_type), Some(ResourceType::Ec2Instance));
    }
}
