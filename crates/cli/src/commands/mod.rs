pub mod audit;
pub mod cleanup;
pub mod doctor;
pub mod migrate;
pub mod provision;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use provisio_agent::{ProvisioningService, ServiceError};
use provisio_core::config::{AppConfig, LoadOptions};
use provisio_core::Catalog;
use provisio_db::{connect, DbPool, SqlLedgerRepository};
use provisio_provider::{InMemoryProvider, RetryPolicy, RetryingExecutor};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn success_with_data(command: &str, message: impl Into<String>, data: Value) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: Some(data),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

pub(crate) async fn open_pool(
    command: &str,
    config: &AppConfig,
) -> Result<DbPool, CommandResult> {
    let pool = connect(&config.database).await.map_err(|error| {
        CommandResult::failure(command, "db_connectivity", error.to_string(), 4)
    })?;
    provisio_db::migrations::run_pending(&pool).await.map_err(|error| {
        CommandResult::failure(command, "migration", error.to_string(), 5)
    })?;
    Ok(pool)
}

/// Wire the full stack behind the CLI: catalog, simulated provider with the
/// configured retry policy, sql ledger repository. The `ProviderApi` seam in
/// `provisio-provider` is where a real cloud backend would plug in instead.
pub(crate) fn build_service(
    command: &str,
    config: &AppConfig,
    pool: DbPool,
) -> Result<ProvisioningService, CommandResult> {
    let catalog = Catalog::builtin().map_err(|error| {
        CommandResult::failure(command, "catalog_validation", error.to_string(), 6)
    })?;

    let provider = Arc::new(InMemoryProvider::new());
    let executor = Arc::new(RetryingExecutor::new(
        provider,
        RetryPolicy::from_provider_settings(
            config.provider.max_retries,
            config.provider.retry_base_delay_ms,
            config.provider.retry_multiplier,
        ),
    ));
    let repository = Arc::new(SqlLedgerRepository::new(pool));

    Ok(ProvisioningService::new(catalog, executor, repository, config))
}

pub(crate) fn service_error_class(error: &ServiceError) -> &'static str {
    match error {
        ServiceError::UnknownResourceType(_) => "unknown_resource_type",
        ServiceError::UnknownMode(_) => "unknown_mode",
        ServiceError::Resolve(_) => "resolve",
        ServiceError::Engine(_) => "engine",
        ServiceError::Repository(_) => "persistence",
    }
}
