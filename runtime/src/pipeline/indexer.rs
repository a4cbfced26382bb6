use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::fs;
use tracing::{error, info, warn};

use crate::ai::prompts::{DENOISE_PROMPT, fill};
use crate::ai::{EmbeddingClient, LlmClient};
use crate::config::IndexConfig;
use crate::pipeline::chunker::{ChunkConfig, Chunker, ParagraphChunker};
use crate::pipeline::cluster::ClusterConfig;
use crate::pipeline::community::{CommunityReportGenerator, majority_group};
use crate::pipeline::extractor::{GleaningExtractor, RecordExtractor};
use crate::pipeline::graph::{EntityGraph, MergeStrategy};
use crate::pipeline::summarizer::DescriptionSummarizer;
use crate::pipeline::tree::{TreeBuilder, TreeConfig};
use crate::pipeline::types::{ChunkExtraction, ExtractionRecord};
use crate::pipeline::utils::{TiktokenTokenizer, Tokenizer, compute_mdhash_id};
use crate::storage::{Collection, VectorStorage};

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub enable_graph: bool,
    pub enable_tree: bool,
    /// When off, each document becomes a single chunk.
    pub enable_chunking: bool,
    pub denoise: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            enable_graph: true,
            enable_tree: true,
            enable_chunking: true,
            denoise: false,
        }
    }
}

/// Which derived artifacts a group deletion removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePartition {
    /// Everything the group owns, the group record included.
    All,
    /// Graph-path artifacts only: relationships and community reports.
    Graph,
    /// Tree-path artifacts only: summaries.
    Tree,
}

#[derive(Debug, Default, Clone)]
pub struct IndexStats {
    pub groups: usize,
    pub documents: usize,
    pub documents_skipped: usize,
    pub chunks: usize,
    pub relationships: usize,
    pub reports: usize,
    pub reports_discarded: usize,
    pub summaries: usize,
}

/// Drives ingestion and both index paths over a database.
///
/// The input directory holds one subdirectory per group, each containing
/// UTF-8 text documents. Documents already present (by content hash) are
/// skipped, so re-running over an unchanged corpus is a no-op.
pub struct Indexer {
    llm: Arc<dyn LlmClient>,
    storage: Arc<dyn VectorStorage>,
    tokenizer: Arc<dyn Tokenizer>,
    chunker: ParagraphChunker,
    extractor: GleaningExtractor,
    summarizer: DescriptionSummarizer,
    report_generator: CommunityReportGenerator,
    tree_builder: TreeBuilder,
    config: IndexConfig,
}

impl Indexer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingClient>,
        storage: Arc<dyn VectorStorage>,
        config: IndexConfig,
    ) -> Result<Self> {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(TiktokenTokenizer::new()?);
        let cluster = ClusterConfig {
            membership_threshold: config.cluster_membership_threshold,
            seed: config.cluster_seed,
        };
        Ok(Self {
            chunker: ParagraphChunker::new(tokenizer.clone()),
            extractor: GleaningExtractor::new(llm.clone(), config.max_gleanings),
            summarizer: DescriptionSummarizer::new(
                llm.clone(),
                tokenizer.clone(),
                config.summary_max_input_tokens,
            ),
            report_generator: CommunityReportGenerator::new(llm.clone(), config.description_merge),
            tree_builder: TreeBuilder::new(
                llm.clone(),
                embedder,
                storage.clone(),
                TreeConfig {
                    max_depth: config.tree_max_depth,
                    cluster,
                },
            ),
            llm,
            storage,
            tokenizer,
            config,
        })
    }

    pub async fn run(&self, input_dir: &Path, options: &IndexOptions) -> Result<IndexStats> {
        let track_id = uuid::Uuid::new_v4();
        info!(%track_id, input_dir = %input_dir.display(), "indexing run started");
        let mut stats = IndexStats::default();

        // New chunks per group, and every new chunk's group for report
        // attribution.
        let mut group_chunks: HashMap<u64, Vec<(u64, String)>> = HashMap::new();
        let mut chunk_groups: HashMap<u64, u64> = HashMap::new();

        let mut dir = fs::read_dir(input_dir)
            .await
            .with_context(|| format!("failed to read input dir {}", input_dir.display()))?;
        let mut group_dirs = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                group_dirs.push(entry.path());
            }
        }
        group_dirs.sort();

        let known_hashes = self.known_document_hashes().await?;

        for group_dir in group_dirs {
            let group_name = group_dir
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow!("unreadable group dir name"))?
                .to_string();
            let group_id = self.ensure_group(&group_name).await?;
            stats.groups += 1;

            let mut files = Vec::new();
            let mut entries = fs::read_dir(&group_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    files.push(entry.path());
                }
            }
            files.sort();

            for file in files {
                let content = fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("failed to read document {}", file.display()))?;
                if content.trim().is_empty() {
                    continue;
                }

                let hash = compute_mdhash_id(&content, "doc-");
                if known_hashes.contains(&hash) {
                    info!(file = %file.display(), "document already indexed, skipping");
                    stats.documents_skipped += 1;
                    continue;
                }

                let doc_name = file
                    .file_stem()
                    .and_then(|n| n.to_str())
                    .unwrap_or("document")
                    .to_string();
                let document_id = self
                    .storage
                    .put(
                        Collection::Document,
                        doc_name,
                        [
                            ("group_id".to_string(), json!(group_id)),
                            ("content_hash".to_string(), json!(hash)),
                            (
                                "created_at".to_string(),
                                json!(chrono::Utc::now().to_rfc3339()),
                            ),
                            ("track_id".to_string(), json!(track_id.to_string())),
                        ]
                        .into(),
                    )
                    .await?;
                stats.documents += 1;

                let chunks =
                    self.ingest_chunks(group_id, document_id, &content, options).await?;
                stats.chunks += chunks.len();
                for (chunk_id, _) in &chunks {
                    chunk_groups.insert(*chunk_id, group_id);
                }
                group_chunks.entry(group_id).or_default().extend(chunks);
            }
        }

        if options.enable_graph {
            let all_chunks: Vec<(u64, String)> =
                group_chunks.values().flatten().cloned().collect();
            self.graph_path(&all_chunks, &chunk_groups, &mut stats).await?;
        }

        if options.enable_tree {
            let mut group_ids: Vec<u64> = group_chunks.keys().copied().collect();
            group_ids.sort();
            for group_id in group_ids {
                let chunks = group_chunks.remove(&group_id).unwrap_or_default();
                // One group's tree failing must not stop the others.
                match self.tree_builder.build_group(group_id, chunks).await {
                    Ok(created) => stats.summaries += created,
                    Err(err) => {
                        warn!(group_id, error = %err, "tree build failed, skipping group");
                    }
                }
            }
        }

        self.storage.sync_if_dirty().await?;
        info!(
            documents = stats.documents,
            skipped = stats.documents_skipped,
            chunks = stats.chunks,
            relationships = stats.relationships,
            reports = stats.reports,
            summaries = stats.summaries,
            "indexing finished"
        );
        Ok(stats)
    }

    async fn known_document_hashes(&self) -> Result<std::collections::HashSet<String>> {
        Ok(self
            .storage
            .get_all(Collection::Document)
            .await?
            .into_iter()
            .filter_map(|r| {
                r.metadata
                    .get("content_hash")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .collect())
    }

    async fn ensure_group(&self, name: &str) -> Result<u64> {
        for record in self.storage.get_all(Collection::Group).await? {
            if record.text == name {
                return Ok(record.id);
            }
        }
        self.storage
            .put(Collection::Group, name.to_string(), HashMap::new())
            .await
    }

    /// Chunk one document and persist the chunks. Returns (id, text).
    async fn ingest_chunks(
        &self,
        group_id: u64,
        document_id: u64,
        content: &str,
        options: &IndexOptions,
    ) -> Result<Vec<(u64, String)>> {
        let pieces = if options.enable_chunking {
            self.chunker.chunk(
                content,
                &ChunkConfig {
                    max_tokens: self.config.chunk_max_tokens,
                    overlap_tokens: self.config.chunk_overlap_tokens,
                },
            )?
        } else {
            self.chunker.chunk(content, &ChunkConfig {
                max_tokens: usize::MAX / 2,
                overlap_tokens: 0,
            })?
        };

        let mut out = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let mut metadata: HashMap<String, serde_json::Value> = [
                ("group_id".to_string(), json!(group_id)),
                ("document_id".to_string(), json!(document_id)),
                ("order".to_string(), json!(piece.order)),
            ]
            .into();

            let text = if options.denoise || self.config.denoise_chunks {
                match self
                    .llm
                    .complete(&fill(DENOISE_PROMPT, &[("input_text", &piece.content)]))
                    .await
                {
                    Ok(denoised) if !denoised.trim().is_empty() => {
                        metadata.insert("raw_text".to_string(), json!(piece.content));
                        denoised.trim().to_string()
                    }
                    Ok(_) => piece.content,
                    Err(err) => {
                        warn!(error = %err, "denoise pass failed, keeping raw chunk text");
                        piece.content
                    }
                }
            } else {
                piece.content
            };

            let id = self
                .storage
                .put(Collection::Chunk, text.clone(), metadata)
                .await?;
            out.push((id, text));
        }
        Ok(out)
    }

    /// Extract, fold, condense, report, persist.
    async fn graph_path(
        &self,
        chunks: &[(u64, String)],
        chunk_groups: &HashMap<u64, u64>,
        stats: &mut IndexStats,
    ) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let extractions: Vec<ChunkExtraction> = stream::iter(chunks.iter())
            .map(|(chunk_id, text)| async move {
                (*chunk_id, text, self.extractor.extract(text).await)
            })
            .buffer_unordered(self.config.extraction_concurrency.max(1))
            .filter_map(|(chunk_id, text, result)| async move {
                match result {
                    Ok(records) => {
                        let mut extraction = ChunkExtraction {
                            chunk_id,
                            entities: Vec::new(),
                            relationships: Vec::new(),
                        };
                        for record in records {
                            match record {
                                ExtractionRecord::Entity(e) => extraction.entities.push(e),
                                ExtractionRecord::Relationship(r) => {
                                    extraction.relationships.push(r)
                                }
                            }
                        }
                        Some(extraction)
                    }
                    Err(err) => {
                        error!(
                            chunk_id,
                            text = %text.chars().take(120).collect::<String>(),
                            error = %err,
                            "chunk extraction failed, skipping"
                        );
                        None
                    }
                }
            })
            .collect()
            .await;

        let mut graph = EntityGraph::new();
        for extraction in &extractions {
            graph.absorb(extraction);
        }
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "entity graph assembled"
        );

        // Condense accumulated descriptions before reporting.
        let multi: Vec<(String, Vec<String>)> = {
            let mut out = Vec::new();
            for community in graph.communities() {
                for node in community {
                    if node.descriptions().len() > 1 {
                        out.push((
                            node.name.clone(),
                            node.descriptions().iter().cloned().collect(),
                        ));
                    }
                }
            }
            out
        };
        for (name, descriptions) in multi {
            match self.config.description_merge {
                MergeStrategy::KeepLongest => {
                    if let Some(longest) = descriptions.into_iter().max_by_key(String::len) {
                        graph.set_description(&name, longest);
                    }
                }
                MergeStrategy::JoinDescriptions => {
                    match self.summarizer.summarize(&name, &descriptions).await {
                        Ok(summary) if !summary.is_empty() => {
                            graph.set_description(&name, summary)
                        }
                        Ok(_) => {}
                        Err(err) => {
                            warn!(entity = %name, error = %err, "description summary failed, keeping merged text");
                        }
                    }
                }
            }
        }

        for (source, target, edge) in graph.edges() {
            let chunk_ids: Vec<u64> = edge.source_chunk_ids.iter().copied().collect();
            let mut metadata: HashMap<String, serde_json::Value> = [
                ("source_entity_name".to_string(), json!(source.name)),
                ("target_entity_name".to_string(), json!(target.name)),
                ("relationship_strength".to_string(), json!(edge.weight)),
                ("chunk_id_list".to_string(), json!(chunk_ids)),
            ]
            .into();
            if let Some(group_id) = majority_group(chunk_ids.iter().copied(), chunk_groups) {
                metadata.insert("group_id".to_string(), json!(group_id));
            }
            self.storage
                .put(Collection::Relationship, edge.description(), metadata)
                .await?;
            stats.relationships += 1;
        }

        for community in graph.communities() {
            let mut chunk_ids: Vec<u64> = community
                .iter()
                .flat_map(|node| node.source_chunk_ids.iter().copied())
                .collect();
            chunk_ids.sort_unstable();
            chunk_ids.dedup();

            let Some(group_id) = majority_group(chunk_ids.iter().copied(), chunk_groups) else {
                warn!(
                    members = community.len(),
                    "community group attribution ambiguous, discarding report"
                );
                stats.reports_discarded += 1;
                continue;
            };

            // Report generation failures stay local to the community.
            match self.report_generator.generate(&graph, &community).await {
                Ok(Some(report)) => {
                    let metadata = [
                        ("group_id".to_string(), json!(group_id)),
                        ("chunk_id_list".to_string(), json!(chunk_ids)),
                        ("title".to_string(), json!(report.title)),
                        ("rating".to_string(), json!(report.rating)),
                        ("report".to_string(), serde_json::to_value(&report)?),
                    ]
                    .into();
                    self.storage
                        .put(Collection::CommunityReport, report.render(), metadata)
                        .await?;
                    stats.reports += 1;
                }
                Ok(None) => {
                    warn!(
                        members = community.len(),
                        "community report unparseable after fallback, discarding"
                    );
                    stats.reports_discarded += 1;
                }
                Err(err) => {
                    warn!(
                        members = community.len(),
                        error = %err,
                        "community report generation failed, discarding"
                    );
                    stats.reports_discarded += 1;
                }
            }
        }

        Ok(())
    }

    /// Cascade-delete a group's artifacts.
    pub async fn delete_group(&self, group_id: u64, partition: DeletePartition) -> Result<()> {
        let collections: &[Collection] = match partition {
            DeletePartition::Graph => &[Collection::Relationship, Collection::CommunityReport],
            DeletePartition::Tree => &[Collection::Summary],
            DeletePartition::All => &[
                Collection::Relationship,
                Collection::CommunityReport,
                Collection::Summary,
                Collection::Chunk,
                Collection::Document,
            ],
        };

        for &collection in collections {
            let ids: Vec<u64> = self
                .storage
                .get_all(collection)
                .await?
                .into_iter()
                .filter(|r| r.metadata.get("group_id") == Some(&json!(group_id)))
                .map(|r| r.id)
                .collect();
            if !ids.is_empty() {
                info!(
                    collection = collection.name(),
                    count = ids.len(),
                    group_id,
                    "deleting group artifacts"
                );
                self.storage.delete(collection, &ids).await?;
            }
        }

        if partition == DeletePartition::All {
            self.storage.delete(Collection::Group, &[group_id]).await?;
        }
        self.storage.sync_if_dirty().await?;
        Ok(())
    }

    pub fn tokenizer(&self) -> Arc<dyn Tokenizer> {
        self.tokenizer.clone()
    }
}
