use std::collections::HashSet;

use anyhow::Result;
use tracing::warn;

use crate::ai::parser::tag_text;
use crate::storage::{Collection, MetadataFilter, VectorStorage};

/// Which index paths a query draws evidence from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Community reports plus tree summaries.
    GraphTree,
    /// Base chunks plus tree summaries.
    TreeOnly,
    /// Community reports only.
    GraphOnly,
    /// Base chunks only, plain retrieval.
    FlatOnly,
}

impl QueryMode {
    pub fn collections(&self) -> &'static [Collection] {
        match self {
            QueryMode::GraphTree => &[Collection::CommunityReport, Collection::Summary],
            QueryMode::TreeOnly => &[Collection::Chunk, Collection::Summary],
            QueryMode::GraphOnly => &[Collection::CommunityReport],
            QueryMode::FlatOnly => &[Collection::Chunk],
        }
    }
}

/// One retrieved record, resolved down to the base chunks that back it.
#[derive(Debug, Clone)]
pub struct EvidenceItem {
    /// Sequential id the map prompt's records and refs use.
    pub id: u64,
    pub collection: Collection,
    pub record_id: u64,
    pub title: String,
    pub text: String,
    /// Backing base chunk ids, for reference resolution.
    pub chunk_ids: Vec<u64>,
}

/// Pull the top-k nearest records across the mode's collections, merged
/// by distance, and resolve each one's backing chunks.
pub async fn retrieve_evidence(
    storage: &dyn VectorStorage,
    mode: QueryMode,
    question: &str,
    k: usize,
    group_id: Option<u64>,
) -> Result<Vec<EvidenceItem>> {
    let filter = group_id.map(|id| MetadataFilter::new("group_id", id));

    let mut matches = Vec::new();
    for &collection in mode.collections() {
        for m in storage.query(collection, question, k, filter.as_ref()).await? {
            matches.push((collection, m));
        }
    }
    matches.sort_by(|a, b| a.1.distance.total_cmp(&b.1.distance));
    matches.truncate(k);

    let mut items = Vec::with_capacity(matches.len());
    for (index, (collection, m)) in matches.into_iter().enumerate() {
        let chunk_ids = match collection {
            Collection::Chunk => vec![m.id],
            _ => resolve_chunk_ids(storage, collection, &m.metadata).await?,
        };
        let title = match collection {
            Collection::CommunityReport => m
                .metadata
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Community report")
                .to_string(),
            Collection::Summary => tag_text(&m.text, "heading")
                .unwrap_or("Summary")
                .to_string(),
            _ => format!("Source chunk {}", m.id),
        };
        items.push(EvidenceItem {
            id: index as u64 + 1,
            collection,
            record_id: m.id,
            title,
            text: m.text,
            chunk_ids,
        });
    }
    Ok(items)
}

/// Walk `chunk_id_list` metadata down to base chunk ids. Summary records
/// above level zero reference other summaries, so this recurses through
/// the summary collection until `from_base_chunk` levels are reached.
async fn resolve_chunk_ids(
    storage: &dyn VectorStorage,
    collection: Collection,
    metadata: &std::collections::HashMap<String, serde_json::Value>,
) -> Result<Vec<u64>> {
    let direct = id_list(metadata);
    if collection != Collection::Summary || is_from_base(metadata) {
        return Ok(direct);
    }

    let mut chunk_ids = Vec::new();
    let mut pending = direct;
    let mut visited: HashSet<u64> = HashSet::new();
    while let Some(summary_id) = pending.pop() {
        if !visited.insert(summary_id) {
            continue;
        }
        let Some(record) = storage
            .get(Collection::Summary, &[summary_id])
            .await?
            .pop()
            .flatten()
        else {
            warn!(summary_id, "dangling child reference while resolving summary");
            continue;
        };
        let children = id_list(&record.metadata);
        if is_from_base(&record.metadata) {
            chunk_ids.extend(children);
        } else {
            pending.extend(children);
        }
    }
    chunk_ids.sort_unstable();
    chunk_ids.dedup();
    Ok(chunk_ids)
}

fn id_list(metadata: &std::collections::HashMap<String, serde_json::Value>) -> Vec<u64> {
    metadata
        .get("chunk_id_list")
        .and_then(|v| v.as_array())
        .map(|ids| ids.iter().filter_map(|v| v.as_u64()).collect())
        .unwrap_or_default()
}

fn is_from_base(metadata: &std::collections::HashMap<String, serde_json::Value>) -> bool {
    metadata
        .get("from_base_chunk")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}
