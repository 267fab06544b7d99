use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::middleware_helpers::retry::RetryConfig;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CURRENCY: &str = "usd";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret used to verify bearer tokens (HS256)
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Expected `iss` claim
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// Expected `aud` claim
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Overall per-request timeout for the HTTP server (seconds)
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub request_timeout_secs: u64,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Settlement currency for every order (ISO 4217, lowercase)
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub payment_currency: String,

    /// Secret API key for the payment processor
    #[serde(default)]
    pub stripe_secret_key: String,

    /// Base URL of the payment processor API
    #[serde(default = "default_stripe_api_base")]
    #[validate(length(min = 1))]
    pub stripe_api_base: String,

    /// Per-call timeout for payment processor requests (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub gateway_timeout_secs: u64,

    /// Attempts per payment processor call, including the first
    #[serde(default = "default_gateway_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub gateway_max_attempts: u32,

    #[serde(default = "default_gateway_initial_backoff_ms")]
    pub gateway_initial_backoff_ms: u64,

    #[serde(default = "default_gateway_max_backoff_ms")]
    pub gateway_max_backoff_ms: u64,
}

impl AppConfig {
    /// Builds a configuration with defaults for everything except the essentials.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            jwt_secret,
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host: "0.0.0.0".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            request_timeout_secs: default_request_timeout_secs(),
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            payment_currency: default_currency(),
            stripe_secret_key: String::new(),
            stripe_api_base: default_stripe_api_base(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            gateway_max_attempts: default_gateway_max_attempts(),
            gateway_initial_backoff_ms: default_gateway_initial_backoff_ms(),
            gateway_max_backoff_ms: default_gateway_max_backoff_ms(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "development" | "dev" | "local" | "test"
        )
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| raw.split(',').any(|o| !o.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.cors_allow_any_origin || self.is_development()
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry schedule for payment processor calls
    pub fn gateway_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.gateway_max_attempts,
            initial_delay: Duration::from_millis(self.gateway_initial_backoff_ms),
            max_delay: Duration::from_millis(
                self.gateway_max_backoff_ms.max(self.gateway_initial_backoff_ms),
            ),
            ..RetryConfig::default()
        }
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if !self.is_development() && self.stripe_secret_key.trim().is_empty() {
            let mut err = ValidationError::new("stripe_secret_key_required");
            err.message = Some("Set APP__STRIPE_SECRET_KEY outside development".into());
            errors.add("stripe_secret_key", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    10
}
fn default_gateway_max_attempts() -> u32 {
    3
}
fn default_gateway_initial_backoff_ms() -> u64 {
    200
}
fn default_gateway_max_backoff_ms() -> u64 {
    2_000
}

fn default_auth_issuer() -> String {
    "storefront-auth".to_string()
}

fn default_auth_audience() -> String {
    "storefront-api".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_lowercase()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("payment_currency");
        err.message = Some("Must be a lowercase three-letter ISO 4217 code, e.g. usd".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 64 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must be at least 64 characters for adequate security".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    let weak_fragments = ["changeme", "password", "12345", "abcdef"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] but reading files from `config_dir`.
pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    // jwt_secret has no default and must come from a file or the environment.
    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(
            File::with_name(&config_dir.join("default").to_string_lossy()).required(false),
        )
        .add_source(File::with_name(&config_dir.join(&run_env).to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET environment variable with a secure random string (minimum 64 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;
    use tempfile::TempDir;

    const SECRET: &str =
        "k3Jd9xQz7LmN2pRt5VwY8bHc1FgS4uXe6AiO0oPqZyTrWvEsDlKjHgFdSaQwErTy";

    fn base_config() -> AppConfig {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".into(),
            SECRET.into(),
            "production".into(),
        );
        cfg.stripe_secret_key = "sk_test_123".into();
        cfg
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_requires_stripe_key() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.stripe_secret_key.clear();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("stripe_secret_key"));
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.stripe_secret_key.clear();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn rejects_weak_secret_and_bad_currency() {
        let mut cfg = base_config();
        cfg.jwt_secret = "a".repeat(80);
        cfg.payment_currency = "USD".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("jwt_secret"));
        assert!(errors.field_errors().contains_key("payment_currency"));
    }

    #[test]
    fn gateway_retry_respects_bounds() {
        let mut cfg = base_config();
        cfg.gateway_max_attempts = 4;
        cfg.gateway_initial_backoff_ms = 500;
        cfg.gateway_max_backoff_ms = 100;
        let retry = cfg.gateway_retry();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.max_delay, Duration::from_millis(500));
    }

    #[test]
    fn loads_layered_file_config() {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
            jwt_secret = "{SECRET}"
            environment = "development"
            payment_currency = "eur"
            gateway_max_attempts = 5
            "#
        )
        .unwrap();

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.payment_currency, "eur");
        assert_eq!(cfg.gateway_max_attempts, 5);
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn missing_secret_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("default.toml"), "environment = \"development\"\n")
            .unwrap();

        assert_matches!(load_config_from(dir.path()), Err(AppConfigError::Load(_)));
    }
}
