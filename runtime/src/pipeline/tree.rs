use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::{info, warn};

use crate::ai::prompts::{TREE_HEADING_PROMPT, TREE_REFINE_PROMPT, TREE_SUMMARY_PROMPT, fill};
use crate::ai::{EmbeddingClient, LlmClient};
use crate::pipeline::cluster::{ClusterConfig, split_into_clusters};
use crate::storage::{Collection, VectorStorage};

/// Metadata keys on summary records.
pub const META_GROUP_ID: &str = "group_id";
pub const META_CHILD_IDS: &str = "chunk_id_list";
pub const META_FROM_BASE_CHUNK: &str = "from_base_chunk";
pub const META_ROOT_SUMMARY: &str = "root_summary";

#[derive(Debug, Clone)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub cluster: ClusterConfig,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            cluster: ClusterConfig::default(),
        }
    }
}

/// One node at the frontier of the tree under construction: a base
/// chunk at level zero, a persisted summary above that.
struct TreeItem {
    id: u64,
    text: String,
}

/// Builds the recursive-summary tree for one group: cluster the current
/// level's items, summarize each cluster through a three-stage prompt
/// chain, persist the summaries, and repeat on the summaries until a
/// single root remains or the depth cap is hit.
pub struct TreeBuilder {
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbeddingClient>,
    storage: Arc<dyn VectorStorage>,
    config: TreeConfig,
}

impl TreeBuilder {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingClient>,
        storage: Arc<dyn VectorStorage>,
        config: TreeConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            storage,
            config,
        }
    }

    /// Returns the number of summary records created.
    pub async fn build_group(&self, group_id: u64, base_chunks: Vec<(u64, String)>) -> Result<usize> {
        if base_chunks.is_empty() {
            return Ok(0);
        }

        let mut items: Vec<TreeItem> = base_chunks
            .into_iter()
            .map(|(id, text)| TreeItem { id, text })
            .collect();
        let mut created = 0usize;

        for level in 0..self.config.max_depth {
            let from_base_chunk = level == 0;
            let summaries = self.summarize_level(&items).await?;
            let root_summary = summaries.len() == 1 || level == self.config.max_depth - 1;

            let mut next_items = Vec::with_capacity(summaries.len());
            for (text, children) in summaries {
                let children: BTreeSet<u64> = children.into_iter().collect();
                let metadata = [
                    (META_GROUP_ID.to_string(), json!(group_id)),
                    (
                        META_CHILD_IDS.to_string(),
                        json!(children.iter().copied().collect::<Vec<u64>>()),
                    ),
                    (META_FROM_BASE_CHUNK.to_string(), json!(from_base_chunk)),
                    (META_ROOT_SUMMARY.to_string(), json!(root_summary)),
                ]
                .into();
                let id = self
                    .storage
                    .put(Collection::Summary, text.clone(), metadata)
                    .await?;
                created += 1;
                next_items.push(TreeItem { id, text });
            }

            info!(
                group_id,
                level,
                summaries = next_items.len(),
                root = root_summary,
                "tree level built"
            );
            if root_summary {
                break;
            }
            items = next_items;
        }

        Ok(created)
    }

    /// Cluster the items and summarize each cluster. A failed cluster is
    /// skipped; a level that produces nothing is an error.
    async fn summarize_level(&self, items: &[TreeItem]) -> Result<Vec<(String, Vec<u64>)>> {
        let mut embeddings = Vec::with_capacity(items.len());
        for item in items {
            embeddings.push(self.embedder.embed(&item.text).await?);
        }
        let clusters = split_into_clusters(&embeddings, &self.config.cluster);

        let mut summaries = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let mut context = String::new();
            let mut children = Vec::with_capacity(cluster.len());
            for &index in &cluster {
                context.push_str(&items[index].text);
                context.push_str("\n\n");
                children.push(items[index].id);
            }

            match self.summarize_cluster(&context).await {
                Ok(summary) => summaries.push((summary, children)),
                Err(err) => {
                    warn!(error = %err, members = cluster.len(), "cluster summary failed, skipping");
                }
            }
        }

        if summaries.is_empty() {
            return Err(anyhow!("every cluster summary failed at this level"));
        }
        Ok(summaries)
    }

    /// Bullet summary, redundancy pass, then a heading.
    async fn summarize_cluster(&self, context: &str) -> Result<String> {
        let summary = self
            .llm
            .complete(&fill(TREE_SUMMARY_PROMPT, &[("text", context)]))
            .await?;
        let refined = self
            .llm
            .complete(&fill(TREE_REFINE_PROMPT, &[("text", &summary)]))
            .await?;
        let heading = self
            .llm
            .complete(&fill(TREE_HEADING_PROMPT, &[("text", &refined)]))
            .await?;
        Ok(format!("<heading>{}</heading>\n{}", heading.trim(), refined.trim()))
    }
}
