use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub engine: EngineSettings,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub region: String,
    pub access_key: Option<SecretString>,
    pub secret_key: Option<SecretString>,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: u32,
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub max_parallel: u32,
    /// Default failure policy; a request can still ask for strict rollback
    /// explicitly.
    pub strict_rollback: bool,
}

#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub signing_key: SecretString,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub region: Option<String>,
    pub signing_key: Option<String>,
    pub log_level: Option<String>,
    pub strict_rollback: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://provisio.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            provider: ProviderConfig {
                region: "us-east-1".to_string(),
                access_key: None,
                secret_key: None,
                max_retries: 3,
                retry_base_delay_ms: 200,
                retry_multiplier: 2,
            },
            engine: EngineSettings { max_parallel: 4, strict_rollback: false },
            ledger: LedgerConfig { signing_key: "provisio-dev-signing-key".to_string().into() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("provisio.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(provider) = patch.provider {
            if let Some(region) = provider.region {
                self.provider.region = region;
            }
            if let Some(access_key_value) = provider.access_key {
                self.provider.access_key = Some(access_key_value.into());
            }
            if let Some(secret_key_value) = provider.secret_key {
                self.provider.secret_key = Some(secret_key_value.into());
            }
            if let Some(max_retries) = provider.max_retries {
                self.provider.max_retries = max_retries;
            }
            if let Some(retry_base_delay_ms) = provider.retry_base_delay_ms {
                self.provider.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_multiplier) = provider.retry_multiplier {
                self.provider.retry_multiplier = retry_multiplier;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(max_parallel) = engine.max_parallel {
                self.engine.max_parallel = max_parallel;
            }
            if let Some(strict_rollback) = engine.strict_rollback {
                self.engine.strict_rollback = strict_rollback;
            }
        }

        if let Some(ledger) = patch.ledger {
            if let Some(signing_key_value) = ledger.signing_key {
                self.ledger.signing_key = signing_key_value.into();
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PROVISIO_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PROVISIO_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("PROVISIO_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PROVISIO_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PROVISIO_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PROVISIO_PROVIDER_REGION") {
            self.provider.region = value;
        }
        if let Some(value) = read_env("PROVISIO_PROVIDER_ACCESS_KEY") {
            self.provider.access_key = Some(value.into());
        }
        if let Some(value) = read_env("PROVISIO_PROVIDER_SECRET_KEY") {
            self.provider.secret_key = Some(value.into());
        }
        if let Some(value) = read_env("PROVISIO_PROVIDER_MAX_RETRIES") {
            self.provider.max_retries = parse_u32("PROVISIO_PROVIDER_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("PROVISIO_PROVIDER_RETRY_BASE_DELAY_MS") {
            self.provider.retry_base_delay_ms =
                parse_u64("PROVISIO_PROVIDER_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PROVISIO_PROVIDER_RETRY_MULTIPLIER") {
            self.provider.retry_multiplier =
                parse_u32("PROVISIO_PROVIDER_RETRY_MULTIPLIER", &value)?;
        }

        if let Some(value) = read_env("PROVISIO_ENGINE_MAX_PARALLEL") {
            self.engine.max_parallel = parse_u32("PROVISIO_ENGINE_MAX_PARALLEL", &value)?;
        }
        if let Some(value) = read_env("PROVISIO_ENGINE_STRICT_ROLLBACK") {
            self.engine.strict_rollback = parse_bool("PROVISIO_ENGINE_STRICT_ROLLBACK", &value)?;
        }

        if let Some(value) = read_env("PROVISIO_LEDGER_SIGNING_KEY") {
            self.ledger.signing_key = value.into();
        }

        let log_level = read_env("PROVISIO_LOGGING_LEVEL").or_else(|| read_env("PROVISIO_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PROVISIO_LOGGING_FORMAT").or_else(|| read_env("PROVISIO_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(region) = overrides.region {
            self.provider.region = region;
        }
        if let Some(signing_key_value) = overrides.signing_key {
            self.ledger.signing_key = signing_key_value.into();
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(strict_rollback) = overrides.strict_rollback {
            self.engine.strict_rollback = strict_rollback;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_provider(&self.provider)?;
        validate_engine(&self.engine)?;
        validate_ledger(&self.ledger)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("provisio.toml"), PathBuf::from("config/provisio.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_provider(provider: &ProviderConfig) -> Result<(), ConfigError> {
    if provider.region.trim().is_empty() {
        return Err(ConfigError::Validation("provider.region must not be empty".to_string()));
    }

    // Credentials travel together or not at all.
    if provider.access_key.is_some() != provider.secret_key.is_some() {
        return Err(ConfigError::Validation(
            "provider.access_key and provider.secret_key must be configured together".to_string(),
        ));
    }

    if provider.max_retries > 10 {
        return Err(ConfigError::Validation(
            "provider.max_retries must be at most 10".to_string(),
        ));
    }

    if provider.retry_base_delay_ms == 0 || provider.retry_base_delay_ms > 60_000 {
        return Err(ConfigError::Validation(
            "provider.retry_base_delay_ms must be in range 1..=60000".to_string(),
        ));
    }

    if provider.retry_multiplier == 0 {
        return Err(ConfigError::Validation(
            "provider.retry_multiplier must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineSettings) -> Result<(), ConfigError> {
    if engine.max_parallel == 0 || engine.max_parallel > 64 {
        return Err(ConfigError::Validation(
            "engine.max_parallel must be in range 1..=64".to_string(),
        ));
    }
    Ok(())
}

fn validate_ledger(ledger: &LedgerConfig) -> Result<(), ConfigError> {
    if ledger.signing_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "ledger.signing_key must not be empty; it signs the append-only session ledger"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    provider: Option<ProviderPatch>,
    engine: Option<EnginePatch>,
    ledger: Option<LedgerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderPatch {
    region: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_multiplier: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_parallel: Option<u32>,
    strict_rollback: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    signing_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
