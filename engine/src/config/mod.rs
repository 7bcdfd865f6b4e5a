//! Configuration management
//!
//! This module handles loading, validation, and management of the Maitre
//! configuration. Configuration is stored in TOML format at
//! ~/.maitre/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, log level
//! - **llm**: Inference provider settings and preferences
//! - **messaging**: Outbound gateway endpoint and fan-out width
//! - **memory**: Context snapshot sizing
//!
//! API keys are never stored in the config file; each cloud provider section
//! names the environment variable the key is read from at startup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use sdk::errors::EngineError;

/// Main configuration structure
///
/// This structure represents the complete Maitre configuration loaded from
/// ~/.maitre/config.toml. Every field has a default so a missing file is
/// replaced by a working local-provider setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Inference provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Outbound messaging configuration
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Memory snapshot configuration
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Inference provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Default provider (ollama, openai, anthropic)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Timeout for cloud provider calls, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for local provider calls, in seconds (model loading is slow)
    #[serde(default = "default_local_timeout")]
    pub local_timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,

    /// Anthropic provider settings
    #[serde(default)]
    pub anthropic: AnthropicConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for OpenAI API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

/// Anthropic provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// Base URL for Anthropic API
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_anthropic_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_anthropic_key_env")]
    pub api_key_env: String,
}

/// Outbound messaging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Webhook endpoint of the messaging gateway; when unset, sends are
    /// logged locally instead of delivered (dry-run mode)
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Timeout for a single send, in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Maximum number of in-flight sends per campaign execution
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
}

/// Memory snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// How many recent facts/turns a context snapshot carries
    #[serde(default = "default_recent_n")]
    pub recent_n: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.maitre")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_local_timeout() -> u64 {
    120
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_send_timeout() -> u64 {
    15
}

fn default_fan_out() -> usize {
    8
}

fn default_recent_n() -> usize {
    10
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            request_timeout_secs: default_request_timeout(),
            local_timeout_secs: default_local_timeout(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
            anthropic: AnthropicConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_key_env(),
        }
    }
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
            model: default_anthropic_model(),
            api_key_env: default_anthropic_key_env(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            send_timeout_secs: default_send_timeout(),
            fan_out: default_fan_out(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_n: default_recent_n(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            messaging: MessagingConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Config {
    /// Default config file path: ~/.maitre/config.toml
    pub fn default_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(".maitre").join("config.toml"))
    }

    /// Load configuration from the default location, writing a default
    /// config file on first run.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Load configuration from a specific path
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Invalid config: {}", e)))?;
        config.core.data_dir = expand_tilde(&config.core.data_dir)?;
        Ok(config)
    }

    /// Write configuration to a specific path, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Cannot serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Path of the SQLite database inside the data directory
    pub fn db_path(&self) -> PathBuf {
        self.core.data_dir.join("maitre.db")
    }
}

/// Expand a leading ~ to the user's home directory
fn expand_tilde(path: &Path) -> Result<PathBuf, EngineError> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Cannot determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.default_provider, "ollama");
        assert_eq!(config.llm.request_timeout_secs, 30);
        assert_eq!(config.messaging.fan_out, 8);
        assert_eq!(config.memory.recent_n, 10);
        assert!(config.messaging.webhook_url.is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
            [llm]
            default_provider = "anthropic"

            [messaging]
            webhook_url = "https://gateway.example.com/send"
            fan_out = 4
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.default_provider, "anthropic");
        assert_eq!(
            config.messaging.webhook_url.as_deref(),
            Some("https://gateway.example.com/send")
        );
        assert_eq!(config.messaging.fan_out, 4);
        // Untouched sections keep their defaults
        assert_eq!(config.llm.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.core.log_level, "info");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.llm.default_provider = "openai".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.llm.default_provider, "openai");
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        let p = expand_tilde(Path::new("/var/lib/maitre")).unwrap();
        assert_eq!(p, PathBuf::from("/var/lib/maitre"));
    }
}
