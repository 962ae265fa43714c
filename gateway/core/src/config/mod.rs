//! TOML Configuration File Support
//!
//! Typed configuration for the gateway, loaded from
//! `~/.config/translate-gateway/gateway.toml` by default.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (see [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! port = 5050
//!
//! [translation]
//! target_language = "simplified Chinese"
//! text_backend = "chat"
//! max_split_depth = 1
//!
//! [chat]
//! delete_conversation_on_shutdown = true
//! refresher_command = ["python3", "/opt/refresh_session.py"]
//!
//! [[accounts]]
//! email = "first@example.com"
//! password = "secret"
//!
//! [[api_keys]]
//! url = "https://api.openai.com/v1/chat/completions"
//! key = "sk-..."
//! use = false
//!
//! [[deepl.endpoints]]
//! url = "http://localhost:1188/translate"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Inbound HTTP endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Path of the completion-style endpoint
    pub route: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5050,
            route: "/v1/chat/completions".to_string(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which backend family serves paragraphs without inline markers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextBackend {
    /// Reverse-engineered chat web sessions
    #[default]
    Chat,
    /// Hosted completion APIs
    Completion,
}

impl std::fmt::Display for TextBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Completion => write!(f, "completion"),
        }
    }
}

impl std::str::FromStr for TextBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "completion" => Ok(Self::Completion),
            other => Err(ConfigError::ValidationError(format!(
                "unknown text backend '{other}' (expected 'chat' or 'completion')"
            ))),
        }
    }
}

/// Prompting, splitting and routing of paragraphs
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Language named in prompts
    pub target_language: String,
    /// Prepended to chat prompts; system message of completion requests
    pub system_prompt: String,
    /// Prepended to completion prompts
    pub user_prompt_add: String,
    /// Regex splitting inbound content into paragraphs
    pub split_pattern: String,
    /// Literal joining translated paragraphs
    pub join_delimiter: String,
    /// Regex of the inline marker that routes a paragraph to the DeepL pool
    pub marker_pattern: String,
    /// A paragraph is marked when it holds more than this many markers
    pub marker_threshold: usize,
    /// How many times a failing batch may be halved
    pub max_split_depth: usize,
    /// Family serving unmarked paragraphs
    pub text_backend: TextBackend,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            target_language: "simplified Chinese".to_string(),
            system_prompt: String::new(),
            user_prompt_add: String::new(),
            split_pattern: "\n\n%%\n\n".to_string(),
            join_delimiter: "\n\n%%\n\n".to_string(),
            marker_pattern: r"<b\d+></b\d+>".to_string(),
            marker_threshold: 2,
            max_split_depth: 1,
            text_backend: TextBackend::Chat,
        }
    }
}

/// Chat web session backend
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Origin of the chat web application
    pub base_url: String,
    /// Directory holding persisted tokens and cookies
    pub auth_dir: PathBuf,
    /// Model slug sent with each message
    pub model: String,
    /// How long to wait for a streamed reply
    pub reply_timeout_secs: u64,
    /// Per-request timeout of REST calls
    pub request_timeout_secs: u64,
    /// Pause before re-establishing a dropped side channel
    pub reconnect_backoff_secs: u64,
    /// Side channel ping interval
    pub heartbeat_secs: u64,
    /// Soft-delete the remote conversation on shutdown
    pub delete_conversation_on_shutdown: bool,
    /// Proxy URL for chat traffic
    pub proxy: Option<String>,
    /// Browser user agent presented to the backend
    pub user_agent: String,
    /// `Sec-Ch-Ua` header matching the user agent
    pub sec_ch_ua: String,
    /// External helper minting fresh credentials
    pub refresher_command: Option<Vec<String>>,
    /// Timezone offset reported with each message
    pub timezone_offset_min: i32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://chat.openai.com".to_string(),
            auth_dir: default_auth_dir(),
            model: "text-davinci-002-render-sha".to_string(),
            reply_timeout_secs: 45,
            request_timeout_secs: 40,
            reconnect_backoff_secs: 5,
            heartbeat_secs: 20,
            delete_conversation_on_shutdown: false,
            proxy: None,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            sec_ch_ua: "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\""
                .to_string(),
            refresher_command: None,
            timezone_offset_min: -480,
        }
    }
}

impl ChatConfig {
    /// Delivery wait deadline
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    /// REST request deadline
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Side channel reconnect pause
    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    /// Side channel ping interval
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// One chat web identity
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Login email, also the key of the persisted credential files
    pub email: String,
    /// Login password, handed to the session refresher only
    #[serde(default)]
    pub password: String,
    /// Whether the account joins the pool
    #[serde(default = "default_true", rename = "use")]
    pub enabled: bool,
}

/// Completion API backend
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Model name in the request body
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Proxy URL for keys with `need_proxy`
    pub proxy: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 1.0,
            timeout_secs: 15,
            proxy: None,
        }
    }
}

/// One completion endpoint and key
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// Full chat-completions URL
    pub url: String,
    /// Bearer key
    pub key: String,
    /// Route this key through the completion proxy
    #[serde(default)]
    pub need_proxy: bool,
    /// Whether the key joins the pool
    #[serde(default = "default_true", rename = "use")]
    pub enabled: bool,
}

/// DeepL-compatible backend
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepLConfig {
    /// Source language code
    pub source_lang: String,
    /// Target language code
    pub target_lang: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Proxy URL for endpoints with `need_proxy`
    pub proxy: Option<String>,
    /// Translation endpoints
    pub endpoints: Vec<DeepLEndpointConfig>,
}

impl Default for DeepLConfig {
    fn default() -> Self {
        Self {
            source_lang: "EN".to_string(),
            target_lang: "ZH".to_string(),
            timeout_secs: 15,
            proxy: None,
            endpoints: Vec::new(),
        }
    }
}

/// One DeepL-compatible endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeepLEndpointConfig {
    /// Translate URL
    pub url: String,
    /// Route through the DeepL proxy
    #[serde(default)]
    pub need_proxy: bool,
    /// Whether the endpoint joins the pool
    #[serde(default = "default_true", rename = "use")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_auth_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("translate-gateway")
        .join("auth")
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Complete gateway configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Inbound endpoint
    pub server: ServerConfig,
    /// Prompting and routing
    pub translation: TranslationConfig,
    /// Chat session backend
    pub chat: ChatConfig,
    /// Chat identities
    pub accounts: Vec<AccountConfig>,
    /// Completion backend
    pub completion: CompletionConfig,
    /// Completion keys
    pub api_keys: Vec<ApiKeyConfig>,
    /// DeepL-compatible backend
    pub deepl: DeepLConfig,

    /// Path to the config file that was loaded (if any)
    #[serde(skip)]
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    #[serde(skip, default = "default_source")]
    source: ConfigSource,
}

fn default_source() -> ConfigSource {
    ConfigSource::Default
}

impl GatewayConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: ConfigSource::Default,
            ..Self::default()
        }
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Accounts with `use = true`
    pub fn active_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.enabled)
    }

    /// Keys with `use = true`
    pub fn active_api_keys(&self) -> impl Iterator<Item = &ApiKeyConfig> {
        self.api_keys.iter().filter(|k| k.enabled)
    }

    /// DeepL endpoints with `use = true`
    pub fn active_deepl_endpoints(&self) -> impl Iterator<Item = &DeepLEndpointConfig> {
        self.deepl.endpoints.iter().filter(|e| e.enabled)
    }

    /// Check patterns and that the unmarked class has somewhere to go
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Regex::new(&self.translation.split_pattern).map_err(|e| {
            ConfigError::ValidationError(format!("split_pattern is not a valid regex: {e}"))
        })?;
        Regex::new(&self.translation.marker_pattern).map_err(|e| {
            ConfigError::ValidationError(format!("marker_pattern is not a valid regex: {e}"))
        })?;

        let text_clients = match self.translation.text_backend {
            TextBackend::Chat => self.active_accounts().count(),
            TextBackend::Completion => self.active_api_keys().count(),
        };
        if text_clients == 0 {
            return Err(ConfigError::ValidationError(format!(
                "text_backend is {:?} but no active entries are configured for it",
                self.translation.text_backend
            )));
        }
        if self.chat.reply_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "chat.reply_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.chat.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "chat.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/translate-gateway/gateway.toml` or
/// `~/.config/translate-gateway/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("translate-gateway").join("gateway.toml"))
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::new();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            config = toml::from_str(&toml_content)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                accounts = config.accounts.len(),
                api_keys = config.api_keys.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);

    Ok(config)
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut GatewayConfig) {
    if let Ok(host) = std::env::var("GATEWAY_HOST") {
        config.server.host = host;
        config.source = ConfigSource::Env;
    }
    if let Ok(port) = std::env::var("GATEWAY_PORT") {
        if let Ok(p) = port.parse::<u16>() {
            config.server.port = p;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(dir) = std::env::var("GATEWAY_AUTH_DIR") {
        config.chat.auth_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }
    if let Ok(backend) = std::env::var("GATEWAY_TEXT_BACKEND") {
        match backend.parse::<TextBackend>() {
            Ok(b) => {
                config.translation.text_backend = b;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring GATEWAY_TEXT_BACKEND"),
        }
    }
    if let Ok(delete) = std::env::var("GATEWAY_DELETE_CONVERSATION") {
        config.chat.delete_conversation_on_shutdown =
            delete != "0" && delete.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Bind host override
    pub host: Option<String>,
    /// Bind port override
    pub port: Option<u16>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set host override
    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    /// Set port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut GatewayConfig) {
        if self.host.is_some() || self.port.is_some() {
            config.source = ConfigSource::Cli;
        }
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
