use serde_json::json;

use provisio_core::SessionId;

use crate::commands::{
    build_runtime, build_service, load_config, open_pool, service_error_class, CommandResult,
};

pub fn run(session: &str) -> CommandResult {
    let config = match load_config("audit") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match build_runtime("audit") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match open_pool("audit", &config).await {
            Ok(pool) => pool,
            Err(result) => return result,
        };
        let service = match build_service("audit", &config, pool.clone()) {
            Ok(service) => service,
            Err(result) => return result,
        };

        let session_id = SessionId(session.to_string());
        let result = async {
            let inventory = service.find_unused(&session_id).await?;
            let verification = service.verify_session(&session_id).await?;
            Ok::<_, provisio_agent::ServiceError>((inventory, verification))
        }
        .await;

        let result = match result {
            Ok((inventory, verification)) => {
                let message = format!(
                    "{} active resources, {}/month; ledger chain {}",
                    inventory.resources.len(),
                    inventory.total_monthly_cost,
                    if verification.valid { "verified" } else { "NOT verified" },
                );
                let data = json!({
                    "inventory": inventory,
                    "chain": {
                        "valid": verification.valid,
                        "verifiedEntries": verification.verified_entries,
                        "failureReason": verification.failure_reason,
                    },
                });
                CommandResult::success_with_data("audit", message, data)
            }
            Err(error) => CommandResult::failure(
                "audit",
                service_error_class(&error),
                format!("{} ({error})", error.user_message()),
                8,
            ),
        };

        pool.close().await;
        result
    })
}
