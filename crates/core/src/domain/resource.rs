use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Resource kinds the provisioning engine knows how to create.
///
/// The first four are user-requestable targets; the rest are companion
/// resources that only ever appear in a plan because a target requires them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Ec2Instance,
    LambdaFunction,
    RdsDatabase,
    S3Bucket,
    IamRole,
    SecurityGroup,
    LogGroup,
    KeyPair,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ec2Instance => "ec2-instance",
            Self::LambdaFunction => "lambda-function",
            Self::RdsDatabase => "rds-database",
            Self::S3Bucket => "s3-bucket",
            Self::IamRole => "iam-role",
            Self::SecurityGroup => "security-group",
            Self::LogGroup => "log-group",
            Self::KeyPair => "key-pair",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "ec2-instance" => Some(Self::Ec2Instance),
            "lambda-function" => Some(Self::LambdaFunction),
            "rds-database" => Some(Self::RdsDatabase),
            "s3-bucket" => Some(Self::S3Bucket),
            "iam-role" => Some(Self::IamRole),
            "security-group" => Some(Self::SecurityGroup),
            "log-group" => Some(Self::LogGroup),
            "key-pair" => Some(Self::KeyPair),
            _ => None,
        }
    }

    /// Companion resources are never requested directly by a user.
    pub fn is_companion(&self) -> bool {
        matches!(self, Self::IamRole | Self::SecurityGroup | Self::LogGroup | Self::KeyPair)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Purpose tag attached to a resource request (`web_server`, `api_endpoint`, ...).
///
/// Free-form on input; normalized to lowercase snake_case so catalog lookups
/// and logical keys are stable regardless of how the conversational layer
/// spells it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Purpose(pub String);

impl Purpose {
    pub fn new(value: impl AsRef<str>) -> Self {
        let normalized = value
            .as_ref()
            .trim()
            .to_ascii_lowercase()
            .replace([' ', '-'], "_")
            .split('_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        Self(normalized)
    }

    pub fn general() -> Self {
        Self("general".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Plan-building strategy selected by the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Easy,
    Customize,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Customize => "customize",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "customize" => Some(Self::Customize),
            _ => None,
        }
    }
}

/// Identity of one resource to be created. Immutable once a plan is built.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub resource_type: ResourceType,
    pub purpose: Purpose,
    /// Sharing boundary for companion deduplication. Two requests for an
    /// `iam-role` with the same purpose and scope resolve to one plan node.
    pub scope: String,
}

impl ResourceSpec {
    pub fn new(resource_type: ResourceType, purpose: Purpose, scope: impl Into<String>) -> Self {
        Self { resource_type, purpose, scope: scope.into() }
    }

    /// Stable logical identity used for deduplication and node ids.
    pub fn logical_key(&self) -> String {
        format!("{}:{}:{}", self.resource_type.as_str(), self.purpose.as_str(), self.scope)
    }
}

/// Resolved configuration for one plan node: the concrete settings the
/// provider call will carry, plus the catalog's recurring-cost estimate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub settings: BTreeMap<String, String>,
    pub estimated_monthly_cost: Decimal,
}

impl ResourceConfig {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}
