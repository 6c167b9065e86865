use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for glbak
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Directory that receives one bare mirror per repository
    #[serde(default = "default_archive_root")]
    pub archive_root: String,

    /// GitLab API connection settings
    #[serde(default)]
    pub gitlab: GitLabConfig,

    /// Group traversal settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Mirror synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Backoff applied to API pages and git operations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitLab configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GitLabConfig {
    /// Instance base URL, without the `/api/v4` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the access token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// HTTP timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,

    /// Verify TLS certificates
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// Items requested per listing page (server maximum is 100)
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

/// Discovery configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DiscoveryConfig {
    /// Maximum groups listed concurrently
    #[serde(default = "default_discovery_parallel")]
    pub max_parallel: usize,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncConfig {
    /// Maximum parallel mirror operations
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout for a single git operation in seconds
    #[serde(default = "default_git_timeout")]
    pub timeout: u64,

    /// git executable to invoke
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
}

/// Retry configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fraction of each delay added as random jitter
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact" | "full"
}

// Default value functions
fn default_archive_root() -> String {
    "./backups".to_string()
}
fn default_base_url() -> String {
    "https://gitlab.com".to_string()
}
fn default_token_env() -> String {
    "GITLAB_TOKEN".to_string()
}
fn default_http_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_per_page() -> u32 {
    100
}
fn default_discovery_parallel() -> usize {
    4
}
fn default_max_parallel() -> usize {
    8
}
fn default_git_timeout() -> u64 {
    3600
}
fn default_git_binary() -> String {
    "git".to_string()
}
fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.2
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

// Default implementations
impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            timeout: default_http_timeout(),
            verify_ssl: default_true(),
            per_page: default_per_page(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_discovery_parallel(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            timeout: default_git_timeout(),
            git_binary: default_git_binary(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive_root: default_archive_root(),
            gitlab: GitLabConfig::default(),
            discovery: DiscoveryConfig::default(),
            sync: SyncConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            tracing::info!("Created default configuration at: {:?}", config_path);

            config.apply_env_overrides()?;
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.apply_env_overrides()?;
        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("glbak").join("config.yml"))
    }

    /// Apply `GLBAK_*` environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(base_url) = env_value("GLBAK_BASE_URL") {
            self.gitlab.base_url = base_url;
        }
        if let Some(dest) = env_value("GLBAK_DEST_DIR") {
            self.archive_root = dest;
        }
        if let Some(concurrency) = env_value("GLBAK_CONCURRENCY") {
            self.sync.max_parallel = concurrency
                .parse()
                .with_context(|| format!("GLBAK_CONCURRENCY is not a number: {}", concurrency))?;
        }
        if let Some(timeout) = env_value("GLBAK_TIMEOUT") {
            self.gitlab.timeout = timeout
                .parse()
                .with_context(|| format!("GLBAK_TIMEOUT is not a number: {}", timeout))?;
        }
        if let Some(verify) = env_value("GLBAK_VERIFY_SSL") {
            self.gitlab.verify_ssl = parse_bool(&verify)
                .ok_or_else(|| anyhow!("GLBAK_VERIFY_SSL must be true or false, got {}", verify))?;
        }
        Ok(())
    }

    /// Expand `~` and environment variables in configured paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.archive_root = shellexpand::full(&self.archive_root)
            .context("Failed to expand archive_root path")?
            .into_owned();

        Ok(())
    }

    /// Read the API token from the configured environment variable
    pub fn token(&self) -> Result<String> {
        let name = &self.gitlab.token_env;
        match std::env::var(name) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            Ok(_) => Err(anyhow!("Environment variable {} is empty", name)),
            Err(_) => Err(anyhow!("Environment variable {} is required", name)),
        }
    }

    pub fn archive_root_path(&self) -> PathBuf {
        PathBuf::from(&self.archive_root)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.gitlab.timeout)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.timeout)
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
