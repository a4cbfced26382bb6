use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::ai::LlmClient;
use crate::ai::parser::parse_community_report;
use crate::ai::prompts::{COMMUNITY_REPORT_FALLBACK_PROMPT, COMMUNITY_REPORT_PROMPT, fill};
use crate::pipeline::graph::{EntityGraph, EntityNode, MergeStrategy};
use crate::pipeline::types::CommunityReport;

/// Writes one structured report per entity community.
///
/// A malformed response gets exactly one retry with a stricter prompt;
/// if that also fails to parse the community is discarded rather than
/// persisted half-formed.
pub struct CommunityReportGenerator {
    llm: Arc<dyn LlmClient>,
    merge_strategy: MergeStrategy,
}

impl CommunityReportGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, merge_strategy: MergeStrategy) -> Self {
        Self { llm, merge_strategy }
    }

    pub async fn generate(
        &self,
        graph: &EntityGraph,
        members: &[&EntityNode],
    ) -> Result<Option<CommunityReport>> {
        let input = render_community(graph, members, self.merge_strategy);

        let response = self
            .llm
            .complete(&fill(COMMUNITY_REPORT_PROMPT, &[("input_text", &input)]))
            .await?;
        if let Some(report) = parse_community_report(&response) {
            return Ok(Some(report));
        }

        warn!("community report failed to parse, retrying with strict prompt");
        let response = self
            .llm
            .complete(&fill(
                COMMUNITY_REPORT_FALLBACK_PROMPT,
                &[("input_text", &input)],
            ))
            .await?;
        Ok(parse_community_report(&response))
    }
}

/// Serialize a community's entities and intra-community relationships
/// into the report prompt's input section.
pub fn render_community(
    graph: &EntityGraph,
    members: &[&EntityNode],
    merge_strategy: MergeStrategy,
) -> String {
    let mut out = String::from("Entities:\n");
    for node in members {
        out.push_str(&format!(
            "<entity>\n<entity_name>{}</entity_name>\n<entity_type>{}</entity_type>\n<entity_description>{}</entity_description>\n</entity>\n",
            node.name,
            node.entity_type,
            node.description(merge_strategy)
        ));
    }

    let member_names: Vec<&str> = members.iter().map(|n| n.name.as_str()).collect();
    out.push_str("\nRelationships:\n");
    for (source, target, edge) in graph.edges() {
        if member_names.contains(&source.name.as_str())
            && member_names.contains(&target.name.as_str())
        {
            out.push_str(&format!(
                "<relationship>\n<source_entity>{}</source_entity>\n<target_entity>{}</target_entity>\n<relationship_description>{}</relationship_description>\n<relationship_strength>{}</relationship_strength>\n</relationship>\n",
                source.name,
                target.name,
                edge.description(),
                edge.weight
            ));
        }
    }
    out
}

/// The group a community's report belongs to: strict majority vote over
/// the groups of its backing chunks. Ties and empty inputs yield `None`
/// and the report is discarded.
pub fn majority_group(
    chunk_ids: impl IntoIterator<Item = u64>,
    chunk_groups: &HashMap<u64, u64>,
) -> Option<u64> {
    let mut votes: HashMap<u64, usize> = HashMap::new();
    for chunk_id in chunk_ids {
        if let Some(&group) = chunk_groups.get(&chunk_id) {
            *votes.entry(group).or_default() += 1;
        }
    }

    let (&winner, &count) = votes.iter().max_by_key(|&(_, &count)| count)?;
    let tied = votes.values().filter(|&&c| c == count).count() > 1;
    if tied { None } else { Some(winner) }
}
