//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "emporium.toml",
    "./config/config.toml",
    "/etc/emporium/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_overrides(&mut config, |key| env::var(key).ok());

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("EMPORIUM_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Apply `EMPORIUM_*` overrides read through `lookup`.
    /// Unparseable numeric values are ignored.
    pub fn apply_overrides<F>(&self, config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // HTTP
        if let Some(port) = lookup("EMPORIUM_HTTP_PORT").and_then(|v| v.parse().ok()) {
            config.http.port = port;
        }
        if let Some(val) = lookup("EMPORIUM_HTTP_HOST") {
            config.http.host = val;
        }

        // Database
        if let Some(val) = lookup("EMPORIUM_DATABASE_URL") {
            config.database.url = val;
        }
        if let Some(max) = lookup("EMPORIUM_DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            config.database.max_connections = max;
        }

        // Queue
        if let Some(val) = lookup("EMPORIUM_QUEUE_TYPE") {
            config.queue.queue_type = val;
        }
        if let Some(val) = lookup("EMPORIUM_SQS_REGION") {
            config.queue.sqs.region = val;
        }
        if let Some(val) = lookup("EMPORIUM_SQS_ENDPOINT_URL") {
            config.queue.sqs.endpoint_url = val;
        }
        if let Some(val) = lookup("EMPORIUM_SQS_ACCOUNT_CREATED_QUEUE_URL") {
            config.queue.sqs.account_created_queue_url = val;
        }
        if let Some(val) = lookup("EMPORIUM_SQS_EMAIL_CONFIRMED_QUEUE_URL") {
            config.queue.sqs.email_confirmed_queue_url = val;
        }
        if let Some(val) = lookup("EMPORIUM_EMBEDDED_QUEUE_URL") {
            config.queue.embedded.database_url = val;
        }

        // Consumers
        if let Some(max) = lookup("EMPORIUM_CONSUMER_MAX_MESSAGES").and_then(|v| v.parse().ok()) {
            config.consumer.max_messages = max;
        }
        if let Some(wait) = lookup("EMPORIUM_CONSUMER_WAIT_TIME_SECONDS").and_then(|v| v.parse().ok()) {
            config.consumer.wait_time_seconds = wait;
        }
        if let Some(delay) = lookup("EMPORIUM_CONSUMER_RESTART_DELAY_SECONDS").and_then(|v| v.parse().ok()) {
            config.consumer.restart_delay_seconds = delay;
        }

        // Auth
        if let Some(val) = lookup("EMPORIUM_JWT_PRIVATE_KEY_PATH") {
            config.auth.jwt.private_key_path = val;
        }
        if let Some(val) = lookup("EMPORIUM_JWT_PUBLIC_KEY_PATH") {
            config.auth.jwt.public_key_path = val;
        }
        if let Some(secs) = lookup("EMPORIUM_ACCESS_TOKEN_EXPIRY_SECS").and_then(|v| v.parse().ok()) {
            config.auth.jwt.access_token_expiry_secs = secs;
        }
        if let Some(secs) = lookup("EMPORIUM_REFRESH_TOKEN_EXPIRY_SECS").and_then(|v| v.parse().ok()) {
            config.auth.jwt.refresh_token_expiry_secs = secs;
        }
        if let Some(val) = lookup("EMPORIUM_PASSWORD_PEPPER") {
            config.auth.password.pepper = val;
        }
        if let Some(max) = lookup("EMPORIUM_MAX_REFRESH_TOKENS").and_then(|v| v.parse().ok()) {
            config.auth.max_refresh_tokens = max;
        }

        // Email
        if let Some(val) = lookup("EMPORIUM_EMAIL_TRANSPORT") {
            config.email.transport = val;
        }
        if let Some(val) = lookup("EMPORIUM_EMAIL_FROM") {
            config.email.from = val;
        }
        if let Some(val) = lookup("EMPORIUM_SMTP_HOST") {
            config.email.smtp.host = val;
        }
        if let Some(port) = lookup("EMPORIUM_SMTP_PORT").and_then(|v| v.parse().ok()) {
            config.email.smtp.port = port;
        }
        if let Some(val) = lookup("EMPORIUM_SMTP_USERNAME") {
            config.email.smtp.username = val;
        }
        if let Some(val) = lookup("EMPORIUM_SMTP_PASSWORD") {
            config.email.smtp.password = val;
        }
        if let Some(val) = lookup("EMPORIUM_CONFIRMATION_MODE") {
            config.email.confirmation.mode = val;
        }
        if let Some(val) = lookup("EMPORIUM_CONFIRMATION_BASE_URL") {
            config.email.confirmation.base_url = val;
        }

        // General
        if let Some(val) = lookup("EMPORIUM_DEV_MODE") {
            config.dev_mode = val == "true" || val == "1";
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
