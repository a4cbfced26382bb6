mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;

use common::{LetterFrequencyEmbedder, ScriptedLlm};
use hybridrag::pipeline::{TreeBuilder, TreeConfig};
use hybridrag::storage::{Collection, JsonVectorStorage, StoredRecord, VectorStorage};

const SUMMARY_PAT: &str = "Summarize the following text in bullet points";
const REFINE_PAT: &str = "eliminate any redundant";
const HEADING_PAT: &str = "concise and descriptive heading";

fn echo_llm() -> Arc<ScriptedLlm> {
    Arc::new(
        ScriptedLlm::new()
            .with_echo_text(SUMMARY_PAT)
            .with_echo_text(REFINE_PAT)
            .with_static(HEADING_PAT, "Overview"),
    )
}

async fn seed_chunks(
    storage: &JsonVectorStorage,
    group_id: u64,
    texts: &[&str],
) -> anyhow::Result<Vec<(u64, String)>> {
    let mut chunks = Vec::with_capacity(texts.len());
    for text in texts {
        let metadata = [("group_id".to_string(), serde_json::json!(group_id))].into();
        let id = storage
            .put(Collection::Chunk, text.to_string(), metadata)
            .await?;
        chunks.push((id, text.to_string()));
    }
    Ok(chunks)
}

fn id_list(record: &StoredRecord) -> Vec<u64> {
    record
        .metadata
        .get("chunk_id_list")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}

fn flag(record: &StoredRecord, key: &str) -> bool {
    record.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[tokio::test]
async fn two_chunks_collapse_into_a_single_root_summary() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = Arc::new(JsonVectorStorage::new(dir.path(), Arc::new(LetterFrequencyEmbedder)));
    storage.initialize().await?;

    let chunks = seed_chunks(&storage, 7, &["alpha facts", "beta facts"]).await?;
    let llm = echo_llm();
    let builder = TreeBuilder::new(llm, Arc::new(LetterFrequencyEmbedder), storage.clone(), TreeConfig::default());

    let created = builder.build_group(7, chunks.clone()).await?;
    assert_eq!(created, 1);

    let summaries = storage.get_all(Collection::Summary).await?;
    assert_eq!(summaries.len(), 1);
    let root = &summaries[0];
    assert!(flag(root, "from_base_chunk"));
    assert!(flag(root, "root_summary"));
    assert_eq!(
        root.metadata.get("group_id").and_then(Value::as_u64),
        Some(7)
    );

    let mut expected: Vec<u64> = chunks.iter().map(|(id, _)| *id).collect();
    expected.sort_unstable();
    assert_eq!(id_list(root), expected);

    assert!(root.text.starts_with("<heading>Overview</heading>\n"));
    assert!(root.text.contains("alpha facts"));
    assert!(root.text.contains("beta facts"));
    Ok(())
}

#[tokio::test]
async fn empty_group_builds_nothing() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = Arc::new(JsonVectorStorage::new(dir.path(), Arc::new(LetterFrequencyEmbedder)));
    storage.initialize().await?;

    let builder = TreeBuilder::new(
        echo_llm(),
        Arc::new(LetterFrequencyEmbedder),
        storage.clone(),
        TreeConfig::default(),
    );
    assert_eq!(builder.build_group(1, Vec::new()).await?, 0);
    assert_eq!(storage.count(Collection::Summary).await?, 0);
    Ok(())
}

#[tokio::test]
async fn depth_cap_marks_the_last_level_as_root() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = Arc::new(JsonVectorStorage::new(dir.path(), Arc::new(LetterFrequencyEmbedder)));
    storage.initialize().await?;

    let chunks = seed_chunks(
        &storage,
        3,
        &["aaaa aaaa", "abab abab", "zzzz zzzz", "zyzy zyzy"],
    )
    .await?;
    let config = TreeConfig {
        max_depth: 1,
        ..TreeConfig::default()
    };
    let builder = TreeBuilder::new(
        echo_llm(),
        Arc::new(LetterFrequencyEmbedder),
        storage.clone(),
        config,
    );

    builder.build_group(3, chunks).await?;

    let summaries = storage.get_all(Collection::Summary).await?;
    assert!(!summaries.is_empty());
    for summary in &summaries {
        assert!(flag(summary, "from_base_chunk"));
        assert!(flag(summary, "root_summary"));
    }
    Ok(())
}

#[tokio::test]
async fn every_base_chunk_stays_reachable_from_a_root() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = Arc::new(JsonVectorStorage::new(dir.path(), Arc::new(LetterFrequencyEmbedder)));
    storage.initialize().await?;

    // Two letter families so clustering may split the base level.
    let chunks = seed_chunks(
        &storage,
        5,
        &["aaaa aaaa aaaa", "aaab aaab aaab", "zzzz zzzz zzzz", "zzzy zzzy zzzy"],
    )
    .await?;
    let base_ids: BTreeSet<u64> = chunks.iter().map(|(id, _)| *id).collect();

    let builder = TreeBuilder::new(
        echo_llm(),
        Arc::new(LetterFrequencyEmbedder),
        storage.clone(),
        TreeConfig::default(),
    );
    builder.build_group(5, chunks).await?;

    let summaries = storage.get_all(Collection::Summary).await?;
    assert!(!summaries.is_empty());
    let roots: Vec<&StoredRecord> = summaries
        .iter()
        .filter(|s| flag(s, "root_summary"))
        .collect();
    assert!(!roots.is_empty());

    // Walk each root's child list down to base chunks.
    let mut reachable: BTreeSet<u64> = BTreeSet::new();
    let mut pending: Vec<&StoredRecord> = roots;
    while let Some(record) = pending.pop() {
        if flag(record, "from_base_chunk") {
            reachable.extend(id_list(record));
            continue;
        }
        for child_id in id_list(record) {
            if let Some(child) = summaries.iter().find(|s| s.id == child_id) {
                pending.push(child);
            }
        }
    }
    assert_eq!(reachable, base_ids);
    Ok(())
}
