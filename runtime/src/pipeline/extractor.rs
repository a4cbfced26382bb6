use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::ai::parser::{parse_confirmed_entities, parse_extraction};
use crate::ai::prompts::{
    ENTITY_FILTER_PROMPT, GLEANING_DONE_SENTINEL, GLEANING_PROMPT, GRAPH_EXTRACTION_PROMPT, fill,
};
use crate::ai::LlmClient;
use crate::pipeline::types::{EntityRecord, ExtractionRecord, RelationshipRecord};

#[async_trait]
pub trait RecordExtractor: Send + Sync {
    async fn extract(&self, chunk_text: &str) -> Result<Vec<ExtractionRecord>>;
}

/// Extraction with bounded gleaning: after the initial pass the model is
/// re-prompted with its own output and asked for anything it missed,
/// until it answers with the done sentinel or the re-prompt budget runs
/// out. Gleaning only ever adds records. A final filter pass drops
/// entities the model cannot confirm against the source text, along with
/// any relationship that lost an endpoint.
pub struct GleaningExtractor {
    llm: Arc<dyn LlmClient>,
    max_gleanings: usize,
}

impl GleaningExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, max_gleanings: usize) -> Self {
        Self { llm, max_gleanings }
    }

    fn render_entities(entities: &[EntityRecord]) -> String {
        entities
            .iter()
            .map(|e| {
                format!(
                    "<entity>\n<entity_name>{}</entity_name>\n<entity_type>{}</entity_type>\n<entity_description>{}</entity_description>\n</entity>",
                    e.name, e.entity_type, e.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_relationships(relationships: &[RelationshipRecord]) -> String {
        relationships
            .iter()
            .map(|r| {
                format!(
                    "<relationship>\n<source_entity>{}</source_entity>\n<target_entity>{}</target_entity>\n<relationship_description>{}</relationship_description>\n<relationship_strength>{}</relationship_strength>\n</relationship>",
                    r.source, r.target, r.description, r.strength
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn confirm_entities(
        &self,
        chunk_text: &str,
        entities: &[EntityRecord],
    ) -> Result<HashSet<String>> {
        let prompt = fill(
            ENTITY_FILTER_PROMPT,
            &[
                ("input_text", chunk_text),
                ("entities", &Self::render_entities(entities)),
            ],
        );
        let response = self.llm.complete(&prompt).await?;
        Ok(parse_confirmed_entities(&response))
    }
}

#[async_trait]
impl RecordExtractor for GleaningExtractor {
    async fn extract(&self, chunk_text: &str) -> Result<Vec<ExtractionRecord>> {
        let prompt = fill(GRAPH_EXTRACTION_PROMPT, &[("input_text", chunk_text)]);
        let response = self.llm.complete(&prompt).await?;
        let (mut entities, mut relationships) = parse_extraction(&response);

        for round in 0..self.max_gleanings {
            let previous = format!(
                "{}\n{}",
                Self::render_entities(&entities),
                Self::render_relationships(&relationships)
            );
            let prompt = fill(
                GLEANING_PROMPT,
                &[("input_text", chunk_text), ("previous_output", &previous)],
            );
            let response = self.llm.complete(&prompt).await?;
            if response.trim() == GLEANING_DONE_SENTINEL {
                debug!(round, "gleaning finished early");
                break;
            }

            let (new_entities, new_relationships) = parse_extraction(&response);
            let known: HashSet<String> = entities.iter().map(|e| e.name.clone()).collect();
            entities.extend(new_entities.into_iter().filter(|e| !known.contains(&e.name)));
            let known_pairs: HashSet<(String, String)> = relationships
                .iter()
                .map(|r| (r.source.clone(), r.target.clone()))
                .collect();
            relationships.extend(
                new_relationships
                    .into_iter()
                    .filter(|r| !known_pairs.contains(&(r.source.clone(), r.target.clone()))),
            );
        }

        if !entities.is_empty() {
            let confirmed = self.confirm_entities(chunk_text, &entities).await?;
            entities.retain(|e| confirmed.contains(&e.name));
            let surviving: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
            relationships.retain(|r| {
                surviving.contains(r.source.as_str()) && surviving.contains(r.target.as_str())
            });
        }

        let mut records: Vec<ExtractionRecord> =
            entities.into_iter().map(ExtractionRecord::Entity).collect();
        records.extend(relationships.into_iter().map(ExtractionRecord::Relationship));
        Ok(records)
    }
}
