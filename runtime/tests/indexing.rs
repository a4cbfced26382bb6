mod common;

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use common::{LetterFrequencyEmbedder, ScriptedLlm};
use hybridrag::config::IndexConfig;
use hybridrag::pipeline::{IndexOptions, Indexer};
use hybridrag::storage::{Collection, JsonVectorStorage, VectorStorage};

const EXTRACT_PAT: &str = "Given a text document, first identify";
const GLEAN_PAT: &str = "If you are not able to identify any additional ones";
const FILTER_PAT: &str = "Identify all entities whose";

const EXTRACTION: &str = r#"<entity>
<entity_name>ALICE</entity_name>
<entity_type>PERSON</entity_type>
<entity_description>Alice runs Acme.</entity_description>
</entity>
<entity>
<entity_name>ACME</entity_name>
<entity_type>ORGANIZATION</entity_type>
<entity_description>Acme is a widget maker.</entity_description>
</entity>
<relationship>
<source_entity>ALICE</source_entity>
<target_entity>ACME</target_entity>
<relationship_description>Alice runs Acme.</relationship_description>
<relationship_strength>8</relationship_strength>
</relationship>"#;

const CONFIRM: &str = r#"<entity_name>ALICE</entity_name>
<entity_name>ACME</entity_name>"#;

fn input_dir_with_one_document() -> anyhow::Result<TempDir> {
    let input = TempDir::new()?;
    let group = input.path().join("contracts");
    fs::create_dir(&group)?;
    fs::write(group.join("intro.txt"), "Alice runs Acme, a widget maker.")?;
    Ok(input)
}

async fn storage(dir: &TempDir) -> anyhow::Result<Arc<JsonVectorStorage>> {
    let storage = Arc::new(JsonVectorStorage::new(dir.path(), Arc::new(LetterFrequencyEmbedder)));
    storage.initialize().await?;
    Ok(storage)
}

#[tokio::test]
async fn report_failure_discards_the_community_but_finishes_the_run() -> anyhow::Result<()> {
    let input = input_dir_with_one_document()?;
    let db = TempDir::new()?;
    let storage = storage(&db).await?;

    // No rule matches the report prompts, so report generation errors.
    let llm = Arc::new(
        ScriptedLlm::new()
            .with_static(EXTRACT_PAT, EXTRACTION)
            .with_static(GLEAN_PAT, "NOMORE")
            .with_static(FILTER_PAT, CONFIRM),
    );
    let indexer = Indexer::new(
        llm,
        Arc::new(LetterFrequencyEmbedder),
        storage.clone(),
        IndexConfig::default(),
    )?;

    let options = IndexOptions {
        enable_tree: false,
        ..IndexOptions::default()
    };
    let stats = indexer.run(input.path(), &options).await?;

    assert_eq!(stats.documents, 1);
    assert_eq!(stats.relationships, 1);
    assert_eq!(stats.reports, 0);
    assert_eq!(stats.reports_discarded, 1);

    // The graph artifacts that did succeed were persisted.
    assert_eq!(storage.count(Collection::Relationship).await?, 1);
    assert_eq!(storage.count(Collection::CommunityReport).await?, 0);
    assert_eq!(storage.count(Collection::Chunk).await?, 1);
    Ok(())
}

#[tokio::test]
async fn tree_failure_skips_the_group_but_finishes_the_run() -> anyhow::Result<()> {
    let input = input_dir_with_one_document()?;
    let db = TempDir::new()?;
    let storage = storage(&db).await?;

    // Every tree summary call fails; the run must still complete.
    let llm = Arc::new(ScriptedLlm::new());
    let indexer = Indexer::new(
        llm,
        Arc::new(LetterFrequencyEmbedder),
        storage.clone(),
        IndexConfig::default(),
    )?;

    let options = IndexOptions {
        enable_graph: false,
        ..IndexOptions::default()
    };
    let stats = indexer.run(input.path(), &options).await?;

    assert_eq!(stats.documents, 1);
    assert_eq!(stats.chunks, 1);
    assert_eq!(stats.summaries, 0);
    assert_eq!(storage.count(Collection::Summary).await?, 0);
    assert_eq!(storage.count(Collection::Chunk).await?, 1);
    Ok(())
}
