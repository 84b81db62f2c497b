use provisio_core::SessionId;

use crate::commands::{
    build_runtime, build_service, load_config, open_pool, service_error_class, CommandResult,
};

pub fn run(session: &str) -> CommandResult {
    let config = match load_config("cleanup") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("cleanup") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match open_pool("cleanup", &config).await {
            Ok(pool) => pool,
            Err(result) => return result,
        };
        let service = match build_service("cleanup", &config, pool.clone()) {
            Ok(service) => service,
            Err(result) => return result,
        };

        let result = match service.cleanup(&SessionId(session.to_string())).await {
            Ok(summary) => {
                let message = format!(
                    "deleted {} resources, {} failed; recorded as ledger entry {}",
                    summary.deleted_resources.len(),
                    summary.failed_deletes.len(),
                    summary.ledger_entry_id,
                );
                match serde_json::to_value(&summary) {
                    Ok(data) => CommandResult::success_with_data("cleanup", message, data),
                    Err(error) => {
                        CommandResult::failure("cleanup", "serialization", error.to_string(), 7)
                    }
                }
            }
            Err(error) => CommandResult::failure(
                "cleanup",
                service_error_class(&error),
                format!("{} ({error})", error.user_message()),
                8,
            ),
        };

        pool.close().await;
        result
    })
}
