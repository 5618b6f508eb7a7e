use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::error::ChatError;

const APP_DIR: &str = "ticket-chat";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl From<ConfigLoadError> for ChatError {
    fn from(err: ConfigLoadError) -> Self {
        ChatError::Config(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub messages: MessageConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_min")]
    pub pool_min_connections: u32,

    #[serde(default = "default_pool_max")]
    pub pool_max_connections: u32,

    #[serde(default = "default_acquire_timeout")]
    pub pool_acquire_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    /// Upper bound on TEXT content, in characters.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_request_topic")]
    pub request_topic: String,

    #[serde(default = "default_result_topic")]
    pub result_topic: String,

    /// REST proxy base URL of the broker. Empty leaves file messages without
    /// OCR, since no extraction service can be reached.
    #[serde(default)]
    pub broker_url: String,

    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,

    /// Consumer group the result consumer joins on the broker.
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Pause between result polls when the last poll came back empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/ticket_chat_dev".to_string()
}

fn default_pool_min() -> u32 {
    1
}

fn default_pool_max() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_content_length() -> usize {
    8000
}

fn default_true() -> bool {
    true
}

fn default_request_topic() -> String {
    "ocr-requests".to_string()
}

fn default_result_topic() -> String {
    "ocr-results".to_string()
}

fn default_publish_timeout() -> u64 {
    10
}

fn default_consumer_group() -> String {
    "ticket-chat-ocr".to_string()
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_min_connections: default_pool_min(),
            pool_max_connections: default_pool_max(),
            pool_acquire_timeout_secs: default_acquire_timeout(),
            pool_idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_content_length: default_max_content_length(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            request_topic: default_request_topic(),
            result_topic: default_result_topic(),
            broker_url: String::new(),
            publish_timeout_secs: default_publish_timeout(),
            consumer_group: default_consumer_group(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl OcrConfig {
    pub fn uses_external_broker(&self) -> bool {
        !self.broker_url.trim().is_empty()
    }
}

impl ChatConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        // TICKET_CHAT_OCR__RESULT_TOPIC -> ocr.result_topic
        builder = builder.add_source(
            Environment::with_prefix("TICKET_CHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut chat_config: ChatConfig = builder.build()?.try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            chat_config.database.url = url;
        }

        if let Ok(level) = std::env::var("TICKET_CHAT_LOG_LEVEL") {
            chat_config.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            chat_config.logging.level = level;
        }

        chat_config.validate()?;

        Ok(chat_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.database.url.is_empty() {
            return Err(ConfigLoadError::MissingRequired("database.url".to_string()));
        }

        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            return Err(ConfigLoadError::InvalidValue {
                key: "database.url".to_string(),
                message:
                    "Must be a valid PostgreSQL URL starting with postgres:// or postgresql://"
                        .to_string(),
            });
        }

        if self.database.pool_min_connections > self.database.pool_max_connections {
            return Err(ConfigLoadError::InvalidValue {
                key: "database.pool_min_connections".to_string(),
                message: "Cannot be greater than pool_max_connections".to_string(),
            });
        }

        if self.messages.max_content_length == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "messages.max_content_length".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.ocr.request_topic.trim().is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "ocr.request_topic".to_string(),
            ));
        }

        if self.ocr.result_topic.trim().is_empty() {
            return Err(ConfigLoadError::MissingRequired("ocr.result_topic".to_string()));
        }

        if self.ocr.request_topic == self.ocr.result_topic {
            return Err(ConfigLoadError::InvalidValue {
                key: "ocr.result_topic".to_string(),
                message: "Must differ from ocr.request_topic".to_string(),
            });
        }

        if self.ocr.uses_external_broker()
            && !self.ocr.broker_url.starts_with("http://")
            && !self.ocr.broker_url.starts_with("https://")
        {
            return Err(ConfigLoadError::InvalidValue {
                key: "ocr.broker_url".to_string(),
                message: "Must start with http:// or https://".to_string(),
            });
        }

        if self.ocr.uses_external_broker() && self.ocr.consumer_group.trim().is_empty() {
            return Err(ConfigLoadError::MissingRequired("ocr.consumer_group".to_string()));
        }

        if self.ocr.poll_interval_ms == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "ocr.poll_interval_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    pub fn max_content_length(&self) -> usize {
        self.messages.max_content_length
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("ticket-chat.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    for path in get_dotenv_paths() {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

fn get_dotenv_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
        paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join(".env"));
    }

    paths
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}
