//! Configuration management with YAML support

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,
}

/// Budgets and limits for context assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget shared by system context and history
    #[serde(default = "default_total_budget")]
    pub total_budget: usize,

    /// Budget used when history is requested on its own
    #[serde(default = "default_history_budget")]
    pub history_budget: usize,

    #[serde(default = "default_user_context_max_chars")]
    pub user_context_max_chars: usize,

    #[serde(default = "default_section_max_chars")]
    pub section_max_chars: usize,

    /// Accessor cache lifetime; 0 disables caching
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// Extraction batching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Newest messages left raw when selecting a batch
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,

    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/ticketctx/ticketctx.db".to_string()
}

fn default_pool_size() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u32 {
    5_000
}

fn default_total_budget() -> usize {
    8_000
}

fn default_history_budget() -> usize {
    4_000
}

fn default_user_context_max_chars() -> usize {
    800
}

fn default_section_max_chars() -> usize {
    3_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_batch_size() -> usize {
    20
}

fn default_keep_recent() -> usize {
    6
}

fn default_summary_max_chars() -> usize {
    1_200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            total_budget: default_total_budget(),
            history_budget: default_history_budget(),
            user_context_max_chars: default_user_context_max_chars(),
            section_max_chars: default_section_max_chars(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            keep_recent: default_keep_recent(),
            summary_max_chars: default_summary_max_chars(),
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

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./ticketctx.yaml (current directory)
    /// 3. ~/.config/ticketctx/ticketctx.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "ticketctx.yaml".to_string(),
            shellexpand::tilde("~/.config/ticketctx/ticketctx.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.context.total_budget, 8_000);
        assert_eq!(config.extraction.keep_recent, 6);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
database:
  path: ~/.local/share/ticketctx/test.db
  pool_size: 2

context:
  total_budget: 12000
  cache_ttl_secs: 0

extraction:
  batch_size: 5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.path, "~/.local/share/ticketctx/test.db");
        assert_eq!(config.database.pool_size, 2);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.context.total_budget, 12_000);
        assert_eq!(config.context.history_budget, 4_000);
        assert_eq!(config.context.cache_ttl_secs, 0);
        assert_eq!(config.extraction.batch_size, 5);
        assert_eq!(config.extraction.summary_max_chars, 1_200);
    }

    #[test]
    fn test_database_path_expands_tilde() {
        let config = Config::default();
        assert!(!config.database_path().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        let config = Config::load(missing.to_str().unwrap()).unwrap();
        assert_eq!(config.context.history_budget, 4_000);
    }
}
