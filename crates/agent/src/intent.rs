//! Structured intents handed over by the conversational layer.
//!
//! The shapes mirror what the NL layer emits after parsing free text, so
//! everything here is stringly-typed on the wire and validated on the way in.

use serde::{Deserialize, Serialize};

use provisio_core::{Mode, Purpose, ResourceSpec, ResourceType, SessionId};

use crate::service::ServiceError;

/// Request to create a resource (plus whatever it depends on).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionIntent {
    pub resource_type: String,
    pub purpose: String,
    pub mode: String,
    pub session_id: String,
    /// Present on the second round of a customize-mode conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customize_answers: Option<provisio_core::CustomizeAnswers>,
    /// Request strict rollback-on-failure for this plan.
    #[serde(default)]
    pub strict: bool,
}

impl ProvisionIntent {
    pub fn session_id(&self) -> SessionId {
        SessionId(self.session_id.clone())
    }

    pub fn mode(&self) -> Result<Mode, ServiceError> {
        Mode::parse(&self.mode).ok_or_else(|| ServiceError::UnknownMode(self.mode.clone()))
    }

    /// Validate and convert into the immutable spec the resolver consumes.
    /// The session id doubles as the companion-sharing scope, so plans in
    /// different sessions never deduplicate against each other.
    pub fn resource_spec(&self) -> Result<ResourceSpec, ServiceError> {
        let resource_type = ResourceType::parse(&self.resource_type)
            .ok_or_else(|| ServiceError::UnknownResourceType(self.resource_type.clone()))?;
        if resource_type.is_companion() {
            return Err(ServiceError::UnknownResourceType(self.resource_type.clone()));
        }

        Ok(ResourceSpec::new(resource_type, Purpose::new(&self.purpose), self.session_id.clone()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MaintenanceAction {
    FindUnused,
    Cleanup,
}

/// Cost-audit / cleanup request over a session's ledger. Works whether or
/// not the conversational session is still alive; only the id matters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceIntent {
    pub action: MaintenanceAction,
    pub session_id: String,
}

impl MaintenanceIntent {
    pub fn session_id(&self) -> SessionId {
        SessionId(self.session_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use provisio_core::{Mode, ResourceType};

    use super::{MaintenanceAction, MaintenanceIntent, ProvisionIntent};
    use crate::service::ServiceError;

    #[test]
    fn provision_intent_deserializes_from_conversational_payload() {
        let payload = r#"{
            "resourceType": "ec2-instance",
            "purpose": "web_server",
            "mode": "easy",
            "sessionId": "conv-42"
        }"#;

        let intent: ProvisionIntent = serde_json::from_str(payload).expect("deserialize");
        assert_eq!(intent.mode().expect("mode"), Mode::Easy);
        assert!(!intent.strict);

        let spec = intent.resource_spec().expect("spec");
        assert_eq!(spec.resource_type, ResourceType::Ec2Instance);
        assert_eq!(spec.purpose.as_str(), "web_server");
        assert_eq!(spec.scope, "conv-42");
    }

    #[test]
    fn unknown_resource_type_surfaces_for_clarification() {
        let intent = ProvisionIntent {
            resource_type: "mainframe".to_string(),
            purpose: "general".to_string(),
            mode: "easy".to_string(),
            session_id: "conv-1".to_string(),
            customize_answers: None,
            strict: false,
        };

        assert!(matches!(intent.resource_spec(), Err(ServiceError::UnknownResourceType(_))));
    }

    #[test]
    fn companion_types_cannot_be_requested_directly() {
        let intent = ProvisionIntent {
            resource_type: "iam-role".to_string(),
            purpose: "general".to_string(),
            mode: "easy".to_string(),
            session_id: "conv-1".to_string(),
            customize_answers: None,
            strict: false,
        };

        assert!(matches!(intent.resource_spec(), Err(ServiceError::UnknownResourceType(_))));
    }

    #[test]
    fn maintenance_intent_uses_camel_case_action_names() {
        let payload = r#"{"action": "findUnused", "sessionId": "conv-7"}"#;
        let intent: MaintenanceIntent = serde_json::from_str(payload).expect("deserialize");
        assert_eq!(intent.action, MaintenanceAction::FindUnused);
        assert_eq!(intent.session_id().0, "conv-7");
    }
}
