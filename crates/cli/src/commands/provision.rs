use provisio_agent::intent::ProvisionIntent;
use provisio_agent::ProvisionResponse;
use provisio_core::CustomizeAnswers;

use crate::commands::{
    build_runtime, build_service, load_config, open_pool, service_error_class, CommandResult,
};

#[derive(Debug, Clone)]
pub struct ProvisionArgs {
    pub resource_type: String,
    pub purpose: String,
    pub mode: String,
    pub session: String,
    pub strict: bool,
    pub answers: Option<String>,
}

pub fn run(args: ProvisionArgs) -> CommandResult {
    let config = match load_config("provision") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let customize_answers: Option<CustomizeAnswers> = match &args.answers {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(answers) => Some(answers),
            Err(error) => {
                return CommandResult::failure(
                    "provision",
                    "invalid_answers",
                    format!("could not parse --answers JSON: {error}"),
                    2,
                );
            }
        },
        None => None,
    };

    let runtime = match build_runtime("provision") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        let pool = match open_pool("provision", &config).await {
            Ok(pool) => pool,
            Err(result) => return result,
        };
        let service = match build_service("provision", &config, pool.clone()) {
            Ok(service) => service,
            Err(result) => return result,
        };

        let intent = ProvisionIntent {
            resource_type: args.resource_type.clone(),
            purpose: args.purpose.clone(),
            mode: args.mode.clone(),
            session_id: args.session.clone(),
            customize_answers,
            strict: args.strict,
        };

        let result = match service.handle_provision(&intent).await {
            Ok(ProvisionResponse::Summary(summary)) => {
                let message = format!(
                    "plan {}: {} created, {} failed, {} skipped",
                    summary.plan_status.as_str(),
                    summary.created_resources.len(),
                    summary.failed_resources.len(),
                    summary.skipped_resources.len(),
                );
                match serde_json::to_value(&summary) {
                    Ok(data) => CommandResult::success_with_data("provision", message, data),
                    Err(error) => CommandResult::failure(
                        "provision",
                        "serialization",
                        error.to_string(),
                        7,
                    ),
                }
            }
            Ok(ProvisionResponse::Questions(questions)) => {
                let message = format!(
                    "customize mode: {} open questions; re-run with --answers",
                    questions.questions.len(),
                );
                match serde_json::to_value(&questions) {
                    Ok(data) => CommandResult::success_with_data("provision", message, data),
                    Err(error) => CommandResult::failure(
                        "provision",
                        "serialization",
                        error.to_string(),
                        7,
                    ),
                }
            }
            Err(error) => CommandResult::failure(
                "provision",
                service_error_class(&error),
                format!("{} ({error})", error.user_message()),
                8,
            ),
        };

        pool.close().await;
        result
    })
}
