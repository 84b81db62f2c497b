pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use provisio_core::config::{AppConfig, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "provisio",
    about = "Provisio operator CLI",
    long_about = "Operate the provisioning engine: run provisioning intents, audit and clean \
                  up session inventory, apply migrations, and check runtime readiness.",
    after_help = "Examples:\n  provisio provision --resource-type ec2-instance --purpose web_server --session dev\n  provisio audit --session dev\n  provisio cleanup --session dev\n  provisio doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Resolve and execute a provisioning intent, recording it in the ledger")]
    Provision {
        #[arg(long, help = "Target resource type (ec2-instance, lambda-function, ...)")]
        resource_type: String,
        #[arg(long, default_value = "general", help = "Purpose tag driving easy-mode defaults")]
        purpose: String,
        #[arg(long, default_value = "easy", help = "Plan-building mode: easy or customize")]
        mode: String,
        #[arg(long, help = "Conversation/session id the plan belongs to")]
        session: String,
        #[arg(long, help = "Roll back everything already created if any node fails")]
        strict: bool,
        #[arg(
            long,
            help = "Customize-mode answers as JSON: {\"node-id\": {\"setting\": \"value\"}}"
        )]
        answers: Option<String>,
    },
    #[command(about = "List a session's active resources with cost totals and verify its ledger chain")]
    Audit {
        #[arg(long, help = "Session id to audit")]
        session: String,
    },
    #[command(about = "Delete a session's active resources and append a cleanup ledger entry")]
    Cleanup {
        #[arg(long, help = "Session id to clean up")]
        session: String,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, catalog acyclicity, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    let builder = tracing_subscriber::fmt().with_target(false).with_max_level(log_level);
    let result = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    // A second init (tests, repeated run()) is harmless.
    let _ = result;
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Provision { resource_type, purpose, mode, session, strict, answers } => {
            commands::provision::run(commands::provision::ProvisionArgs {
                resource_type,
                purpose,
                mode,
                session,
                strict,
                answers,
            })
        }
        Command::Audit { session } => commands::audit::run(&session),
        Command::Cleanup { session } => commands::cleanup::run(&session),
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
