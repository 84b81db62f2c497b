//! Next-step suggestions
//!
//! Deterministic rule table keyed by (resource type, purpose). Suggestions
//! are looked up, never generated, so the same plan always yields the same
//! follow-up list — required for reproducible summaries and tests.

use crate::domain::resource::{Purpose, ResourceType};

struct SuggestionSeed {
    resource_type: ResourceType,
    purpose: &'static str,
    steps: &'static [&'static str],
}

const SUGGESTION_SEEDS: &[SuggestionSeed] = &[
    SuggestionSeed {
        resource_type: ResourceType::Ec2Instance,
        purpose: "web_server",
        steps: &[
            "install web server",
            "set up SSL certificate",
            "add database",
            "create a load balancer",
            "set up monitoring and alerts",
        ],
    },
    SuggestionSeed {
        resource_type: ResourceType::Ec2Instance,
        purpose: "database",
        steps: &[
            "prepare database schema",
            "set up connection pooling",
            "configure backup strategy",
            "restrict network access",
        ],
    },
    SuggestionSeed {
        resource_type: ResourceType::Ec2Instance,
        purpose: "development",
        steps: &[
            "connect over SSH",
            "set up auto-shutdown for nights and weekends",
            "create billing alerts",
        ],
    },
    SuggestionSeed {
        resource_type: ResourceType::LambdaFunction,
        purpose: "api_endpoint",
        steps: &[
            "connect to API gateway",
            "test the function with sample data",
            "add environment variables",
            "set up monitoring alerts",
        ],
    },
    SuggestionSeed {
        resource_type: ResourceType::LambdaFunction,
        purpose: "data_processing",
        steps: &[
            "set up S3 trigger for file uploads",
            "create a schedule",
            "increase memory and timeout",
            "add error handling and retries",
        ],
    },
    SuggestionSeed {
        resource_type: ResourceType::RdsDatabase,
        purpose: "ecommerce",
        steps: &[
            "prepare database schema",
            "connect the application",
            "configure backup strategy",
            "set up read replicas",
        ],
    },
    SuggestionSeed {
        resource_type: ResourceType::RdsDatabase,
        purpose: "analytics",
        steps: &[
            "load initial datasets",
            "set up query monitoring",
            "schedule maintenance windows",
        ],
    },
    SuggestionSeed {
        resource_type: ResourceType::S3Bucket,
        purpose: "static_website",
        steps: &[
            "upload website files",
            "configure custom domain",
            "set up SSL certificate",
        ],
    },
    SuggestionSeed {
        resource_type: ResourceType::S3Bucket,
        purpose: "data_backup",
        steps: &[
            "schedule automatic backups",
            "set lifecycle rules",
            "verify restore procedure",
        ],
    },
];

const DEFAULT_STEPS: &[&str] = &[
    "review the new resource configuration",
    "set up monitoring and alerts",
    "create billing alerts",
];

/// Ordered follow-up suggestions for a created resource. Unknown purposes
/// fall back to a generic list so the summary never comes back empty.
pub fn suggest_next_steps(resource_type: ResourceType, purpose: &Purpose) -> Vec<String> {
    let steps = SUGGESTION_SEEDS
        .iter()
        .find(|seed| seed.resource_type == resource_type && seed.purpose == purpose.as_str())
        .map(|seed| seed.steps)
        .unwrap_or(DEFAULT_STEPS);

    steps.iter().map(|step| (*step).to_string()).collect()
}
