use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use extract::{FailurePolicy, RetryPolicy};
use index::GraphKind;
use query::LocalSearchConfig;

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV: &str = "GRAPHRAG_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub embeddings: EmbeddingsConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub indexing: IndexingSettings,
    pub search: LocalSearchConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // More parallelism, shorter timeouts, large cache
    Accurate,  // Fresh answers, more retries, wider context
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub artifacts_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Without embeddings, entities are scored by keyword overlap.
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent_extractions: usize,
    pub max_concurrent_summaries: usize,
    pub max_concurrent_embeddings: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingSettings {
    pub graph_kind: GraphKind,
    pub extraction_failure_policy: FailurePolicy,
    pub summarization_failure_policy: FailurePolicy,
    pub max_tokens_per_unit: usize,
    pub overlap_tokens: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            server: ServerConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
                artifacts_dir: PathBuf::from("data/artifacts"),
            },
            logging: LoggingConfig {
                format: LogFormat::Pretty,
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.1:8b".to_string(),
                request_timeout_secs: 60,
            },
            embeddings: EmbeddingsConfig {
                enabled: true,
                base_url: "http://localhost:11434".to_string(),
                model: "nomic-embed-text".to_string(),
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 5,
                max_concurrent_summaries: 3,
                max_concurrent_embeddings: 4,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1000,
                max_backoff_ms: 10000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
            indexing: IndexingSettings {
                graph_kind: GraphKind::Undirected,
                extraction_failure_policy: FailurePolicy::Abort,
                summarization_failure_policy: FailurePolicy::Abort,
                max_tokens_per_unit: 600,
                overlap_tokens: 100,
            },
            search: LocalSearchConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        let base = Self::default();
        Self {
            mode: OperationMode::Fast,
            llm: LlmConfig {
                request_timeout_secs: 30,
                ..base.llm
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 20,
                max_concurrent_summaries: 10,
                max_concurrent_embeddings: 16,
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 50000,
            },
            indexing: IndexingSettings {
                extraction_failure_policy: FailurePolicy::Skip,
                summarization_failure_policy: FailurePolicy::Skip,
                ..base.indexing
            },
            search: LocalSearchConfig {
                max_entities: 5,
                max_text_units: 3,
                ..base.search
            },
            ..base
        }
    }

    pub fn accurate_mode() -> Self {
        let base = Self::default();
        Self {
            mode: OperationMode::Accurate,
            llm: LlmConfig {
                request_timeout_secs: 120,
                ..base.llm
            },
            concurrency: ConcurrencyConfig {
                max_concurrent_extractions: 3,
                max_concurrent_summaries: 2,
                max_concurrent_embeddings: 4,
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
            },
            cache: CacheConfig {
                enabled: false,
                max_entries: 0,
            },
            search: LocalSearchConfig {
                max_entities: 20,
                max_text_units: 10,
                max_text_unit_tokens: 8000,
                max_relationships: 20,
                ..base.search
            },
            ..base
        }
    }

    pub fn preset(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    /// Load from the file named by `GRAPHRAG_CONFIG`, or the balanced defaults
    /// when it is unset.
    pub async fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)).await,
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse a TOML document layered over the preset its `mode` names.
    ///
    /// Sections and keys absent from the document keep the preset's values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let overrides: toml::Table = toml::from_str(text).context("Failed to parse TOML")?;

        let mode = match overrides.get("mode") {
            Some(value) => value
                .clone()
                .try_into::<OperationMode>()
                .context("Unknown operation mode")?,
            None => OperationMode::Balanced,
        };

        let toml::Value::Table(mut merged) =
            toml::Value::try_from(Self::preset(mode)).context("Failed to serialize preset")?
        else {
            anyhow::bail!("Preset did not serialize to a table");
        };
        merge_tables(&mut merged, overrides);

        let config: Self = toml::Value::Table(merged)
            .try_into()
            .context("Failed to deserialize config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let concurrency = [
            ("concurrency.max_concurrent_extractions", self.concurrency.max_concurrent_extractions),
            ("concurrency.max_concurrent_summaries", self.concurrency.max_concurrent_summaries),
            ("concurrency.max_concurrent_embeddings", self.concurrency.max_concurrent_embeddings),
            ("indexing.max_tokens_per_unit", self.indexing.max_tokens_per_unit),
        ];
        if let Some((name, _)) = concurrency.iter().find(|(_, value)| *value == 0) {
            anyhow::bail!("{name} must be greater than zero");
        }
        if self.indexing.overlap_tokens >= self.indexing.max_tokens_per_unit {
            anyhow::bail!("indexing.overlap_tokens must be smaller than indexing.max_tokens_per_unit");
        }
        if self.llm.request_timeout_secs == 0 {
            anyhow::bail!("llm.request_timeout_secs must be greater than zero");
        }
        self.search.validate().context("Invalid search settings")?;
        Ok(())
    }
}

fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(override_table)) => {
                merge_tables(base_table, override_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_balanced_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.mode, OperationMode::Balanced);
        assert_eq!(config.concurrency.max_concurrent_extractions, 5);
        assert_eq!(config.search.max_entities, 10);
    }

    #[test]
    fn mode_selects_preset_and_keys_override_it() {
        let config = AppConfig::from_toml_str(
            r#"
            mode = "fast"

            [search]
            max_entities = 7

            [indexing]
            graph_kind = "directed"
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, OperationMode::Fast);
        assert_eq!(config.concurrency.max_concurrent_extractions, 20);
        assert_eq!(config.search.max_entities, 7);
        assert_eq!(config.search.max_text_units, 3);
        assert_eq!(config.indexing.graph_kind, GraphKind::Directed);
        assert_eq!(config.indexing.extraction_failure_policy, FailurePolicy::Skip);
    }

    #[test]
    fn rejects_zero_concurrency_and_budgets() {
        let err = AppConfig::from_toml_str("[concurrency]\nmax_concurrent_summaries = 0").unwrap_err();
        assert!(format!("{err:#}").contains("max_concurrent_summaries"));

        let err = AppConfig::from_toml_str("[search]\nmax_relationships = 0").unwrap_err();
        assert!(format!("{err:#}").contains("max_relationships"));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(AppConfig::from_toml_str(r#"mode = "turbo""#).is_err());
    }

    #[test]
    fn presets_are_valid() {
        for mode in [OperationMode::Fast, OperationMode::Balanced, OperationMode::Accurate] {
            AppConfig::preset(mode).validate().unwrap();
        }
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphrag.toml");
        tokio::fs::write(&path, "[server]\nbind_addr = \"127.0.0.1:8080\"\n")
            .await
            .unwrap();

        let config = AppConfig::from_file(&path).await.unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.server.artifacts_dir, PathBuf::from("data/artifacts"));
    }
}
