//! Resource Catalog
//!
//! Static, declarative knowledge of every supported resource type: which
//! companion resources it requires, and the purpose-keyed "easy" profiles
//! that turn a purpose tag into a concrete configuration. Pure data, no
//! side effects; validated once at load and shared read-only from there on.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::resource::{Purpose, ResourceConfig, ResourceSpec, ResourceType};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
    #[error("dependency cycle in catalog templates: {chain}")]
    DependencyCycle { chain: String },
}

/// Companion requirements for one resource type, in declaration order.
/// Declaration order is load-bearing: it breaks topological-sort ties, so
/// plan ordering stays reproducible for identical inputs.
#[derive(Clone, Debug)]
struct DependencyTemplate {
    resource_type: ResourceType,
    companions: &'static [ResourceType],
}

const DEPENDENCY_TEMPLATES: &[DependencyTemplate] = &[
    DependencyTemplate {
        resource_type: ResourceType::Ec2Instance,
        companions: &[
            ResourceType::IamRole,
            ResourceType::SecurityGroup,
            ResourceType::KeyPair,
            ResourceType::LogGroup,
        ],
    },
    DependencyTemplate {
        resource_type: ResourceType::LambdaFunction,
        companions: &[ResourceType::IamRole, ResourceType::LogGroup],
    },
    DependencyTemplate {
        resource_type: ResourceType::RdsDatabase,
        companions: &[ResourceType::SecurityGroup],
    },
    DependencyTemplate { resource_type: ResourceType::S3Bucket, companions: &[] },
    DependencyTemplate { resource_type: ResourceType::IamRole, companions: &[] },
    DependencyTemplate { resource_type: ResourceType::SecurityGroup, companions: &[] },
    DependencyTemplate { resource_type: ResourceType::LogGroup, companions: &[] },
    DependencyTemplate { resource_type: ResourceType::KeyPair, companions: &[] },
];

/// One "easy" profile: settings applied when the user picks a purpose and
/// lets the catalog choose the details.
#[derive(Clone, Debug)]
struct EasyProfile {
    resource_type: ResourceType,
    purpose: &'static str,
    settings: &'static [(&'static str, &'static str)],
    /// Estimated recurring cost in USD/month, scaled by 100 (cents).
    monthly_cost_cents: i64,
}

const EASY_PROFILES: &[EasyProfile] = &[
    EasyProfile {
        resource_type: ResourceType::Ec2Instance,
        purpose: "web_server",
        settings: &[
            ("instance_type", "t3.medium"),
            ("image_id", "ami-0abcdef1234567890"),
            ("open_ports", "80,443,22"),
        ],
        monthly_cost_cents: 3_400,
    },
    EasyProfile {
        resource_type: ResourceType::Ec2Instance,
        purpose: "database",
        settings: &[("instance_type", "m5.large"), ("image_id", "ami-0abcdef1234567890")],
        monthly_cost_cents: 7_000,
    },
    EasyProfile {
        resource_type: ResourceType::Ec2Instance,
        purpose: "development",
        settings: &[("instance_type", "t3.small"), ("image_id", "ami-0abcdef1234567890")],
        monthly_cost_cents: 1_500,
    },
    EasyProfile {
        resource_type: ResourceType::Ec2Instance,
        purpose: "general",
        settings: &[("instance_type", "t3.micro"), ("image_id", "ami-0abcdef1234567890")],
        monthly_cost_cents: 800,
    },
    EasyProfile {
        resource_type: ResourceType::LambdaFunction,
        purpose: "api_endpoint",
        settings: &[
            ("runtime", "python3.9"),
            ("memory_mb", "512"),
            ("timeout_secs", "60"),
            ("handler", "lambda_function.lambda_handler"),
        ],
        monthly_cost_cents: 120,
    },
    EasyProfile {
        resource_type: ResourceType::LambdaFunction,
        purpose: "data_processing",
        settings: &[
            ("runtime", "python3.9"),
            ("memory_mb", "1024"),
            ("timeout_secs", "300"),
            ("handler", "lambda_function.lambda_handler"),
        ],
        monthly_cost_cents: 340,
    },
    EasyProfile {
        resource_type: ResourceType::LambdaFunction,
        purpose: "general",
        settings: &[
            ("runtime", "python3.9"),
            ("memory_mb", "512"),
            ("timeout_secs", "60"),
            ("handler", "lambda_function.lambda_handler"),
        ],
        monthly_cost_cents: 100,
    },
    EasyProfile {
        resource_type: ResourceType::RdsDatabase,
        purpose: "ecommerce",
        settings: &[
            ("engine", "mysql8.0"),
            ("instance_class", "db.t3.medium"),
            ("storage_gb", "100"),
            ("multi_az", "true"),
            ("backup_retention_days", "7"),
        ],
        monthly_cost_cents: 9_800,
    },
    EasyProfile {
        resource_type: ResourceType::RdsDatabase,
        purpose: "analytics",
        settings: &[
            ("engine", "postgres16"),
            ("instance_class", "db.m5.large"),
            ("storage_gb", "200"),
            ("multi_az", "false"),
        ],
        monthly_cost_cents: 14_200,
    },
    EasyProfile {
        resource_type: ResourceType::RdsDatabase,
        purpose: "development",
        settings: &[
            ("engine", "mysql8.0"),
            ("instance_class", "db.t3.micro"),
            ("storage_gb", "20"),
            ("multi_az", "false"),
        ],
        monthly_cost_cents: 1_600,
    },
    EasyProfile {
        resource_type: ResourceType::RdsDatabase,
        purpose: "general",
        settings: &[
            ("engine", "mysql8.0"),
            ("instance_class", "db.t3.small"),
            ("storage_gb", "50"),
            ("multi_az", "false"),
        ],
        monthly_cost_cents: 3_200,
    },
    EasyProfile {
        resource_type: ResourceType::S3Bucket,
        purpose: "static_website",
        settings: &[("website_hosting", "true"), ("public_read", "true"), ("versioning", "false")],
        monthly_cost_cents: 120,
    },
    EasyProfile {
        resource_type: ResourceType::S3Bucket,
        purpose: "data_backup",
        settings: &[("storage_class", "STANDARD_IA"), ("versioning", "true")],
        monthly_cost_cents: 250,
    },
    EasyProfile {
        resource_type: ResourceType::S3Bucket,
        purpose: "logs",
        settings: &[("storage_class", "STANDARD_IA"), ("lifecycle_expire_days", "90")],
        monthly_cost_cents: 90,
    },
    EasyProfile {
        resource_type: ResourceType::S3Bucket,
        purpose: "general",
        settings: &[("storage_class", "STANDARD"), ("versioning", "false")],
        monthly_cost_cents: 100,
    },
    EasyProfile {
        resource_type: ResourceType::IamRole,
        purpose: "general",
        settings: &[("managed_policy", "service-role/BasicExecutionRole")],
        monthly_cost_cents: 0,
    },
    EasyProfile {
        resource_type: ResourceType::SecurityGroup,
        purpose: "web_server",
        settings: &[("ingress", "80,443,22")],
        monthly_cost_cents: 0,
    },
    EasyProfile {
        resource_type: ResourceType::SecurityGroup,
        purpose: "database",
        settings: &[("ingress", "3306")],
        monthly_cost_cents: 0,
    },
    EasyProfile {
        resource_type: ResourceType::SecurityGroup,
        purpose: "general",
        settings: &[("ingress", "22")],
        monthly_cost_cents: 0,
    },
    EasyProfile {
        resource_type: ResourceType::LogGroup,
        purpose: "general",
        settings: &[("retention_days", "30")],
        monthly_cost_cents: 50,
    },
    EasyProfile {
        resource_type: ResourceType::KeyPair,
        purpose: "general",
        settings: &[("key_type", "ed25519")],
        monthly_cost_cents: 0,
    },
];

/// Tag stamped on every resource the engine creates, so provider-side
/// inventory queries can distinguish managed resources from hand-made ones.
pub const MANAGED_BY_TAG: &str = "provisio";

/// Immutable catalog value, validated at load and passed explicitly to the
/// resolver (no mutable global state).
#[derive(Clone, Debug)]
pub struct Catalog {
    templates: BTreeMap<ResourceType, Vec<ResourceType>>,
}

impl Catalog {
    /// Load the built-in catalog. The acyclicity check runs here once;
    /// a failure is a catalog authoring defect, never a runtime condition.
    pub fn builtin() -> Result<Self, CatalogError> {
        let templates = DEPENDENCY_TEMPLATES
            .iter()
            .map(|template| (template.resource_type, template.companions.to_vec()))
            .collect();
        let catalog = Self { templates };
        catalog.validate()?;
        Ok(catalog)
    }

    #[cfg(test)]
    fn from_templates(entries: &[(ResourceType, &[ResourceType])]) -> Self {
        let templates = entries
            .iter()
            .map(|(resource_type, companions)| (*resource_type, companions.to_vec()))
            .collect();
        Self { templates }
    }

    /// Companion resources required by `resource_type`, in declaration
    /// order. Each companion derives its purpose and scope from the parent.
    pub fn dependencies(
        &self,
        resource_type: ResourceType,
        purpose: &Purpose,
        scope: &str,
    ) -> Result<Vec<ResourceSpec>, CatalogError> {
        let companions = self
            .templates
            .get(&resource_type)
            .ok_or_else(|| CatalogError::UnknownResourceType(resource_type.as_str().to_string()))?;

        Ok(companions
            .iter()
            .map(|companion| ResourceSpec::new(*companion, purpose.clone(), scope))
            .collect())
    }

    /// Resolved easy-mode configuration for a (type, purpose) pair.
    ///
    /// An unknown purpose falls back to the type's `general` profile rather
    /// than failing: easy mode must always produce a usable plan.
    pub fn configuration(
        &self,
        resource_type: ResourceType,
        purpose: &Purpose,
    ) -> Result<ResourceConfig, CatalogError> {
        if !self.templates.contains_key(&resource_type) {
            return Err(CatalogError::UnknownResourceType(resource_type.as_str().to_string()));
        }

        let profile = find_profile(resource_type, purpose.as_str())
            .or_else(|| find_profile(resource_type, "general"));

        let Some(profile) = profile else {
            return Ok(ResourceConfig::default());
        };

        let mut settings: BTreeMap<String, String> = profile
            .settings
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        settings.insert("managed_by".to_string(), MANAGED_BY_TAG.to_string());
        settings.insert("purpose".to_string(), purpose.as_str().to_string());

        Ok(ResourceConfig {
            settings,
            estimated_monthly_cost: Decimal::new(profile.monthly_cost_cents, 2),
        })
    }

    /// Validate that the companion graph is acyclic and every companion is
    /// itself registered.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for resource_type in self.templates.keys() {
            let mut trail = Vec::new();
            self.check_acyclic(*resource_type, &mut trail)?;
        }
        Ok(())
    }

    fn check_acyclic(
        &self,
        resource_type: ResourceType,
        trail: &mut Vec<ResourceType>,
    ) -> Result<(), CatalogError> {
        if trail.contains(&resource_type) {
            let mut chain: Vec<&str> = trail.iter().map(ResourceType::as_str).collect();
            chain.push(resource_type.as_str());
            return Err(CatalogError::DependencyCycle { chain: chain.join(" -> ") });
        }

        let companions = self
            .templates
            .get(&resource_type)
            .ok_or_else(|| CatalogError::UnknownResourceType(resource_type.as_str().to_string()))?;

        trail.push(resource_type);
        for companion in companions {
            self.check_acyclic(*companion, trail)?;
        }
        trail.pop();
        Ok(())
    }
}

fn find_profile(resource_type: ResourceType, purpose: &str) -> Option<&'static EasyProfile> {
    EASY_PROFILES
        .iter()
        .find(|profile| profile.resource_type == resource_type && profile.purpose == purpose)
}
