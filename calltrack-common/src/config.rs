//! Bootstrap configuration
//!
//! Settings are resolved in priority order:
//!
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables (`CALLTRACK_*` plus the provider secrets)
//! 3. TOML configuration file
//! 4. Built-in defaults
//!
//! Secrets may be supplied through the environment only; the TOML file can
//! leave them out entirely.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default config file name looked up under the user config dir
pub const CONFIG_FILE_NAME: &str = "calltrack.toml";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Path to SQLite database file (defaults under the user data dir)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub twilio: TwilioConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub deepgram: DeepgramConfig,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// HTTP listener and externally visible base URL
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL the provider uses to reach us. Webhook signatures are
    /// computed over this value, so it must match the provider console.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: Option<String>,

    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,
}

/// Durable recording storage
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Folder holding stored objects (defaults under the user data dir)
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Secret used to sign read URLs
    #[serde(default)]
    pub signing_secret: Option<String>,

    /// Lifetime of signed read URLs
    #[serde(default = "default_read_url_ttl_secs")]
    pub read_url_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeepgramConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_deepgram_model")]
    pub model: String,

    #[serde(default = "default_deepgram_base_url")]
    pub base_url: String,
}

/// LLM settings. Without an API key the pipeline relies on heuristics only.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_model")]
    pub model: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

/// Recording pipeline tuning
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Attempts for fetching recording media from the provider
    #[serde(default = "default_media_fetch_attempts")]
    pub media_fetch_attempts: u32,

    /// Pipeline attempts recorded in the ledger before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Interval of the ledger retry sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Run the pipeline inside the webhook request instead of a spawned task
    #[serde(default)]
    pub inline: bool,

    /// Extra dealership names that identify the salesperson in a transcript
    #[serde(default)]
    pub dealership_names: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:5780".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_twilio_api_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_read_url_ttl_secs() -> u64 {
    30 * 60
}

fn default_deepgram_model() -> String {
    "nova-2-phonecall".to_string()
}

fn default_deepgram_base_url() -> String {
    "https://api.deepgram.com".to_string()
}

fn default_openai_model() -> String {
    "gpt-5-mini".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_media_fetch_attempts() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    5
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            api_base: default_twilio_api_base(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            signing_secret: None,
            read_url_ttl_secs: default_read_url_ttl_secs(),
        }
    }
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_deepgram_model(),
            base_url: default_deepgram_base_url(),
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_openai_model(),
            base_url: default_openai_base_url(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            media_fetch_attempts: default_media_fetch_attempts(),
            max_attempts: default_max_attempts(),
            sweep_interval_secs: default_sweep_interval_secs(),
            inline: false,
            dealership_names: Vec::new(),
        }
    }
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("{} ({})", e, path.display())))
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load an explicit file, else the default file if present, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            info!("Loading config from {}", path.display());
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => {
                info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Overlay environment variables onto the file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(bind) = env_string("CALLTRACK_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = env_string("CALLTRACK_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Ignoring invalid CALLTRACK_PORT value '{}'", port),
            }
        }
        if let Some(url) = env_string("CALLTRACK_PUBLIC_BASE_URL") {
            self.server.public_base_url = url;
        }
        if let Some(path) = env_string("CALLTRACK_DATABASE") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(level) = env_string("CALLTRACK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(sid) = env_string("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = Some(sid);
        }
        if let Some(token) = env_string("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = Some(token);
        }
        if let Some(root) = env_string("CALLTRACK_STORAGE_ROOT") {
            self.storage.root = Some(PathBuf::from(root));
        }
        if let Some(secret) = env_string("CALLTRACK_SIGNING_SECRET") {
            self.storage.signing_secret = Some(secret);
        }
        if let Some(key) = env_string("DEEPGRAM_API_KEY") {
            self.deepgram.api_key = Some(key);
        }
        if let Some(key) = env_string("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(inline) = env_string("CALLTRACK_PIPELINE_INLINE") {
            self.pipeline.inline = matches!(inline.as_str(), "1" | "true" | "yes");
        }
    }

    /// Check invariants and normalize the base URL
    pub fn validate(&mut self) -> Result<()> {
        let base = self.server.public_base_url.trim().trim_end_matches('/').to_string();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::Config(format!(
                "public_base_url must start with http:// or https://, got '{}'",
                base
            )));
        }
        self.server.public_base_url = base;

        if self.pipeline.media_fetch_attempts == 0 {
            return Err(Error::Config("pipeline.media_fetch_attempts must be at least 1".into()));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(Error::Config("pipeline.max_attempts must be at least 1".into()));
        }
        if self.pipeline.sweep_interval_secs == 0 {
            return Err(Error::Config("pipeline.sweep_interval_secs must be at least 1".into()));
        }

        require(&self.twilio.account_sid, "TWILIO_ACCOUNT_SID")?;
        require(&self.twilio.auth_token, "TWILIO_AUTH_TOKEN")?;
        require(&self.deepgram.api_key, "DEEPGRAM_API_KEY")?;
        require(&self.storage.signing_secret, "CALLTRACK_SIGNING_SECRET")?;

        if self.openai.api_key.is_none() {
            warn!("OPENAI_API_KEY not set, classification will use keyword heuristics only");
        }

        Ok(())
    }

    /// Database path, falling back to the user data dir
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| data_dir().join("calltrack.db"))
    }

    /// Object storage folder, falling back to the user data dir
    pub fn storage_root(&self) -> PathBuf {
        self.storage
            .root
            .clone()
            .unwrap_or_else(|| data_dir().join("recordings"))
    }
}

/// Return the configured secret or a config error naming its env var
pub fn require<'a>(value: &'a Option<String>, env_name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{} is not configured", env_name)))
}

/// Default location of the config file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("calltrack").join(CONFIG_FILE_NAME))
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("calltrack"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
