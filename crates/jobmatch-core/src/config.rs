use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{JobMatchError, Result};

/// Top-level configuration for the jobmatch application.
///
/// Loaded from `~/.jobmatch/config.toml` by default. Each section covers one
/// subsystem; every field has a default so partial files parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMatchConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub recommend: RecommendConfig,
}

impl JobMatchConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: JobMatchConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| JobMatchError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and index artifact.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.jobmatch/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file name, relative to the data directory.
    pub file: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file: "postings.db".to_string(),
        }
    }
}

/// Remote embedding API settings.
///
/// Any OpenAI-compatible `/embeddings` endpoint works; the base URL is
/// configurable for compatibility gateways. The API key is read from the
/// environment variable named here, never from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    /// Expected vector dimension. Responses of any other length are
    /// rejected as failures.
    pub dimension: usize,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-call timeout in seconds. A timeout counts as a per-record
    /// failure, never an abort.
    pub timeout_secs: u64,
    /// Maximum attempts per embedding call.
    pub max_attempts: u32,
    /// Base retry delay in milliseconds; the delay grows linearly with the
    /// attempt number.
    pub retry_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Embedding refresh pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// How many unembedded postings to fetch per scan. Bounds memory.
    pub batch_size: usize,
    /// Flush successful embeddings to the store after at most this many.
    /// Bounds the durability gap.
    pub commit_every: usize,
    /// Concurrent embedding calls within a batch.
    pub workers: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            commit_every: 50,
            workers: 4,
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Index artifact file name, relative to the data directory.
    pub file: String,
    /// Page size for the streaming scan during index build.
    pub page_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            file: "postings.index".to_string(),
            page_size: 1000,
        }
    }
}

/// Recommendation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    /// Candidate count for first-stage retrieval.
    pub candidate_k: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self { candidate_k: 20 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = JobMatchConfig::default();
        assert_eq!(config.general.data_dir, "~/.jobmatch/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.database.file, "postings.db");
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.embedding.max_attempts, 3);
        assert_eq!(config.refresh.batch_size, 100);
        assert_eq!(config.refresh.commit_every, 50);
        assert_eq!(config.index.file, "postings.index");
        assert_eq!(config.recommend.candidate_k, 20);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/var/lib/jobmatch"
log_level = "debug"

[embedding]
base_url = "https://generativelanguage.googleapis.com/v1beta/openai"
model = "text-embedding-004"
dimension = 768
timeout_secs = 10

[refresh]
batch_size = 25
commit_every = 10
workers = 2
"#;
        let file = create_temp_config(content);
        let config = JobMatchConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/var/lib/jobmatch");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.embedding.model, "text-embedding-004");
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.embedding.timeout_secs, 10);
        assert_eq!(config.refresh.batch_size, 25);
        assert_eq!(config.refresh.workers, 2);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "warn"
"#;
        let file = create_temp_config(content);
        let config = JobMatchConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.refresh.batch_size, 100);
        assert_eq!(config.embedding.dimension, 1536);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = JobMatchConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.database.file, "postings.db");
    }

    #[test]
    fn test_load_invalid_toml_errors() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(JobMatchConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let config = JobMatchConfig::default();
        config.save(&path).unwrap();

        let reloaded = JobMatchConfig::load(&path).unwrap();
        assert_eq!(reloaded.general.data_dir, config.general.data_dir);
        assert_eq!(reloaded.embedding.model, config.embedding.model);
        assert_eq!(reloaded.refresh.commit_every, config.refresh.commit_every);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = JobMatchConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let deserialized: JobMatchConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.index.page_size, config.index.page_size);
        assert_eq!(deserialized.recommend.candidate_k, config.recommend.candidate_k);
    }
}
