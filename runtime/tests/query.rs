mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use common::{LetterFrequencyEmbedder, ScriptedLlm};
use hybridrag::config::QueryConfig;
use hybridrag::pipeline::utils::TiktokenTokenizer;
use hybridrag::query::aggregator::INSUFFICIENT_INFORMATION;
use hybridrag::query::{
    EvidenceItem, QueryAggregator, QueryMode, retrieve_evidence,
};
use hybridrag::storage::{Collection, JsonVectorStorage, VectorStorage};

const MAP_PAT: &str = "You are provided with a question and a data table";
const REDUCE_PAT: &str = "synthesizing perspectives from multiple analysts";

fn evidence(id: u64, title: &str, text: &str, chunk_ids: &[u64]) -> EvidenceItem {
    EvidenceItem {
        id,
        collection: Collection::Chunk,
        record_id: id,
        title: title.to_string(),
        text: text.to_string(),
        chunk_ids: chunk_ids.to_vec(),
    }
}

async fn storage_with_chunks(
    dir: &TempDir,
    chunks: &[(&str, u64)],
) -> anyhow::Result<Arc<JsonVectorStorage>> {
    let storage = Arc::new(JsonVectorStorage::new(dir.path(), Arc::new(LetterFrequencyEmbedder)));
    storage.initialize().await?;
    for (text, group_id) in chunks {
        storage
            .put(
                Collection::Chunk,
                text.to_string(),
                [("group_id".to_string(), json!(group_id))].into(),
            )
            .await?;
    }
    Ok(storage)
}

#[tokio::test]
async fn empty_evidence_short_circuits_without_llm_calls() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_with_chunks(&dir, &[]).await?;
    let llm = Arc::new(ScriptedLlm::new());
    let aggregator = QueryAggregator::new(
        llm.clone(),
        storage,
        Arc::new(TiktokenTokenizer::new()?),
        QueryConfig::default(),
    );

    let result = aggregator.answer("anything?", Vec::new()).await?;
    assert_eq!(result.answer, INSUFFICIENT_INFORMATION);
    assert!(result.references.is_empty());
    assert_eq!(llm.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn map_reduce_resolves_references_grouped_by_owner() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    // Chunk ids 1 and 2 belong to group 10, chunk 3 to group 20.
    let storage = storage_with_chunks(
        &dir,
        &[("first chunk", 10), ("second chunk", 10), ("third chunk", 20)],
    )
    .await?;

    let map_response = r#"<point>
<title>Widget output doubled</title>
<content>Acme doubled widget output last year.</content>
<ref>1, 2</ref>
<score>85</score>
</point>"#;
    let llm = Arc::new(
        ScriptedLlm::new()
            .with_static(MAP_PAT, map_response)
            .with_static(REDUCE_PAT, "Acme doubled its widget output."),
    );
    let aggregator = QueryAggregator::new(
        llm.clone(),
        storage,
        Arc::new(TiktokenTokenizer::new()?),
        QueryConfig::default(),
    );

    let items = vec![
        evidence(1, "Report A", "Acme output grew.", &[2, 1]),
        evidence(2, "Report B", "Doubling confirmed.", &[3]),
    ];
    let result = aggregator.answer("How did Acme's output change?", items).await?;

    assert_eq!(result.answer, "Acme doubled its widget output.");
    assert_eq!(result.references.len(), 2);
    assert_eq!(result.references[0].group_id, 10);
    assert_eq!(result.references[0].chunk_ids, vec![1, 2]);
    assert_eq!(result.references[1].group_id, 20);
    assert_eq!(result.references[1].chunk_ids, vec![3]);
    // One map batch and one reduce call.
    assert_eq!(llm.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn reduce_budget_cuts_low_scoring_points() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_with_chunks(&dir, &[("kept chunk", 10), ("dropped chunk", 20)]).await?;

    let oversized = "filler ".repeat(300);
    let map_response = format!(
        r#"<point>
<title>Kept</title>
<content>Short and important.</content>
<ref>1</ref>
<score>90</score>
</point>
<point>
<title>Dropped</title>
<content>{oversized}</content>
<ref>2</ref>
<score>40</score>
</point>"#
    );
    let llm = Arc::new(
        ScriptedLlm::new()
            .with_static(MAP_PAT, &map_response)
            .with_static(REDUCE_PAT, "Only the important point made it."),
    );
    let config = QueryConfig {
        reduce_token_budget: 50,
        ..QueryConfig::default()
    };
    let aggregator = QueryAggregator::new(
        llm,
        storage,
        Arc::new(TiktokenTokenizer::new()?),
        config,
    );

    let items = vec![
        evidence(1, "Report A", "short evidence", &[1]),
        evidence(2, "Report B", "long evidence", &[2]),
    ];
    let result = aggregator.answer("What matters?", items).await?;

    assert_eq!(result.answer, "Only the important point made it.");
    // Only the admitted point's chunk survives into the references.
    assert_eq!(result.references.len(), 1);
    assert_eq!(result.references[0].group_id, 10);
    assert_eq!(result.references[0].chunk_ids, vec![1]);
    Ok(())
}

#[tokio::test]
async fn retrieval_resolves_summary_chains_to_base_chunks() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage = storage_with_chunks(&dir, &[("aaaa base one", 5), ("aaab base two", 5)]).await?;

    // Leaf summary over both chunks, then a root summary over the leaf.
    let leaf_id = storage
        .put(
            Collection::Summary,
            "<heading>Leaf heading</heading>\naaaa and aaab together".to_string(),
            [
                ("group_id".to_string(), json!(5)),
                ("chunk_id_list".to_string(), json!([1, 2])),
                ("from_base_chunk".to_string(), json!(true)),
                ("root_summary".to_string(), json!(false)),
            ]
            .into(),
        )
        .await?;
    storage
        .put(
            Collection::Summary,
            "<heading>Root heading</heading>\neverything".to_string(),
            [
                ("group_id".to_string(), json!(5)),
                ("chunk_id_list".to_string(), json!([leaf_id])),
                ("from_base_chunk".to_string(), json!(false)),
                ("root_summary".to_string(), json!(true)),
            ]
            .into(),
        )
        .await?;

    let items = retrieve_evidence(storage.as_ref(), QueryMode::TreeOnly, "aaaa", 10, Some(5)).await?;
    assert_eq!(items.len(), 4);

    // Evidence ids are sequential regardless of source collection.
    let ids: Vec<u64> = items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    for item in &items {
        match item.collection {
            Collection::Chunk => {
                assert_eq!(item.chunk_ids, vec![item.record_id]);
                assert_eq!(item.title, format!("Source chunk {}", item.record_id));
            }
            Collection::Summary => {
                assert_eq!(item.chunk_ids, vec![1, 2]);
                assert!(item.title.ends_with("heading"));
            }
            other => panic!("unexpected collection {other:?}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn group_filter_restricts_retrieval() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let storage =
        storage_with_chunks(&dir, &[("shared topic", 1), ("shared topic too", 2)]).await?;

    let items =
        retrieve_evidence(storage.as_ref(), QueryMode::FlatOnly, "shared", 10, Some(2)).await?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].record_id, 2);
    Ok(())
}
