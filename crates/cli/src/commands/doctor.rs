use serde_json::json;

use provisio_core::config::{AppConfig, LoadOptions};
use provisio_core::Catalog;
use provisio_db::connect;

use crate::commands::{build_runtime, CommandResult};

struct Check {
    name: &'static str,
    passed: bool,
    detail: String,
}

pub fn run(json_output: bool) -> CommandResult {
    let mut checks = Vec::new();

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(Check {
                name: "config",
                passed: true,
                detail: format!("region {}, database {}", config.provider.region, config.database.url),
            });
            Some(config)
        }
        Err(error) => {
            checks.push(Check { name: "config", passed: false, detail: error.to_string() });
            None
        }
    };

    match Catalog::builtin() {
        Ok(_) => checks.push(Check {
            name: "catalog",
            passed: true,
            detail: "dependency templates are acyclic".to_string(),
        }),
        Err(error) => {
            checks.push(Check { name: "catalog", passed: false, detail: error.to_string() })
        }
    }

    if let Some(config) = &config {
        match build_runtime("doctor") {
            Ok(runtime) => {
                let outcome: Result<(), String> = runtime.block_on(async {
                    let pool =
                        connect(&config.database).await.map_err(|error| error.to_string())?;
                    provisio_db::ping(&pool).await.map_err(|error| error.to_string())?;
                    pool.close().await;
                    Ok(())
                });
                match outcome {
                    Ok(()) => checks.push(Check {
                        name: "database",
                        passed: true,
                        detail: "connected and answered a probe query".to_string(),
                    }),
                    Err(error) => {
                        checks.push(Check { name: "database", passed: false, detail: error })
                    }
                }
            }
            Err(result) => return result,
        }
    }

    let all_passed = checks.iter().all(|check| check.passed);
    let data = json!({
        "checks": checks
            .iter()
            .map(|check| json!({
                "name": check.name,
                "passed": check.passed,
                "detail": check.detail,
            }))
            .collect::<Vec<_>>(),
    });

    let message = if json_output {
        format!("{}/{} checks passed", checks.iter().filter(|check| check.passed).count(), checks.len())
    } else {
        checks
            .iter()
            .map(|check| {
                format!(
                    "[{}] {}: {}",
                    if check.passed { "ok" } else { "fail" },
                    check.name,
                    check.detail,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    if all_passed {
        CommandResult::success_with_data("doctor", message, data)
    } else {
        let mut result = CommandResult::failure("doctor", "readiness", message, 6);
        // keep the structured check list on failures too
        if let Ok(mut value) = serde_json::from_str::<serde_json::Value>(&result.output) {
            value["data"] = data;
            if let Ok(output) = serde_json::to_string(&value) {
                result.output = output;
            }
        }
        result
    }
}
