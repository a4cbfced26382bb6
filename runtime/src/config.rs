use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;
use tracing::info;

use crate::pipeline::graph::MergeStrategy;

const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5-mini".to_string(),
            base_url: "https://api.openai.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Upper bound on chunk size in tokens.
    pub chunk_max_tokens: usize,
    /// Overlap used when a single paragraph must be window-split.
    pub chunk_overlap_tokens: usize,
    /// Max gleaning re-prompts after the initial extraction pass.
    pub max_gleanings: usize,
    /// Input token budget for one description-summarization prompt.
    pub summary_max_input_tokens: usize,
    /// How repeated entity descriptions combine before reporting.
    pub description_merge: MergeStrategy,
    /// Max levels of the abstraction tree.
    pub tree_max_depth: usize,
    /// Posterior probability above which an item joins a cluster.
    pub cluster_membership_threshold: f64,
    /// Seed for dimensionality reduction and mixture fitting.
    pub cluster_seed: u64,
    /// Concurrent per-chunk extraction requests.
    pub extraction_concurrency: usize,
    /// Rewrite each chunk into a denoised bullet form before indexing.
    pub denoise_chunks: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            chunk_max_tokens: 500,
            chunk_overlap_tokens: 50,
            max_gleanings: 1,
            summary_max_input_tokens: 4_000,
            description_merge: MergeStrategy::JoinDescriptions,
            tree_max_depth: 5,
            cluster_membership_threshold: 0.1,
            cluster_seed: 224,
            extraction_concurrency: 8,
            denoise_chunks: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Default number of evidence items pulled per query.
    pub top_k: usize,
    /// Token budget for one map-stage batch of evidence records.
    pub map_token_budget: usize,
    /// Token budget for points admitted into the reduce prompt.
    pub reduce_token_budget: usize,
    /// Wall-clock budget for a whole query.
    pub timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            map_token_budget: 6_000,
            reduce_token_budget: 4_000,
            timeout_secs: 240,
        }
    }
}

impl AppConfig {
    /// Load the YAML config, falling back to defaults when no file exists.
    pub async fn load() -> Result<Self> {
        let path = config_path();
        match fs::read_to_string(&path).await {
            Ok(contents) => {
                let config: AppConfig = serde_yaml::from_str(&contents)
                    .with_context(|| format!("failed to parse config file at {}", path.display()))?;
                info!(path = %path.display(), "configuration loaded from disk");
                Ok(config)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
            }
        }
    }
}

fn config_path() -> PathBuf {
    env::var("APP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let config = AppConfig::default();
        assert_eq!(config.index.chunk_max_tokens, 500);
        assert_eq!(config.index.tree_max_depth, 5);
        assert_eq!(config.index.cluster_seed, 224);
        assert_eq!(config.query.timeout_secs, 240);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: AppConfig =
            serde_yaml::from_str("index:\n  max_gleanings: 3\n").expect("parse");
        assert_eq!(config.index.max_gleanings, 3);
        assert_eq!(config.index.chunk_max_tokens, 500);
        assert_eq!(config.index.description_merge, MergeStrategy::JoinDescriptions);
    }

    #[test]
    fn merge_strategy_parses_from_yaml() {
        let config: AppConfig =
            serde_yaml::from_str("index:\n  description_merge: keep_longest\n").expect("parse");
        assert_eq!(config.index.description_merge, MergeStrategy::KeepLongest);
    }
}
