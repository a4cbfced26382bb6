use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::ai::LlmClient;
use crate::ai::parser::{CandidatePoint, parse_points};
use crate::ai::prompts::{QUERY_MAP_PROMPT, QUERY_REDUCE_PROMPT, fill};
use crate::config::QueryConfig;
use crate::pipeline::utils::Tokenizer;
use crate::query::dedup::dedup_points;
use crate::query::retrieval::EvidenceItem;
use crate::storage::{Collection, VectorStorage};

pub const INSUFFICIENT_INFORMATION: &str =
    "The indexed data does not contain sufficient information to answer this question.";

/// Chunk references backing the answer, grouped per owning group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub group_id: u64,
    pub chunk_ids: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct QueryAnswer {
    pub answer: String,
    pub references: Vec<Reference>,
}

/// Two-stage map-reduce over retrieved evidence.
///
/// Map batches evidence records under a token budget and asks for scored
/// points; points are deduplicated, ranked, and greedily admitted into
/// the reduce prompt until its budget fills; reduce synthesizes the
/// final answer. No evidence short-circuits to a fixed
/// insufficient-information answer without an LLM call.
pub struct QueryAggregator {
    llm: Arc<dyn LlmClient>,
    storage: Arc<dyn VectorStorage>,
    tokenizer: Arc<dyn Tokenizer>,
    config: QueryConfig,
}

impl QueryAggregator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        storage: Arc<dyn VectorStorage>,
        tokenizer: Arc<dyn Tokenizer>,
        config: QueryConfig,
    ) -> Self {
        Self {
            llm,
            storage,
            tokenizer,
            config,
        }
    }

    /// `answer` under the configured wall-clock budget.
    pub async fn answer_with_timeout(
        &self,
        question: &str,
        evidence: Vec<EvidenceItem>,
    ) -> Result<QueryAnswer> {
        let budget = Duration::from_secs(self.config.timeout_secs);
        tokio::time::timeout(budget, self.answer(question, evidence))
            .await
            .map_err(|_| anyhow!("query timed out after {}s", self.config.timeout_secs))?
    }

    pub async fn answer(
        &self,
        question: &str,
        evidence: Vec<EvidenceItem>,
    ) -> Result<QueryAnswer> {
        if evidence.is_empty() {
            return Ok(QueryAnswer {
                answer: INSUFFICIENT_INFORMATION.to_string(),
                references: Vec::new(),
            });
        }

        let points = self.map_stage(question, &evidence).await?;
        let points = dedup_points(points);
        let admitted = self.admit_points(&points);
        info!(
            candidates = points.len(),
            admitted = admitted.len(),
            "map stage complete"
        );

        let answer = if admitted.is_empty() {
            INSUFFICIENT_INFORMATION.to_string()
        } else {
            self.reduce_stage(question, admitted).await?
        };
        let references = self.resolve_references(admitted, &evidence).await?;

        Ok(QueryAnswer { answer, references })
    }

    /// Batch evidence records under the map token budget and collect
    /// points. A malformed map response contributes nothing but never
    /// fails the query.
    async fn map_stage(
        &self,
        question: &str,
        evidence: &[EvidenceItem],
    ) -> Result<Vec<CandidatePoint>> {
        let mut points = Vec::new();
        let mut batch = String::new();
        let mut batch_tokens = 0usize;

        for item in evidence {
            let record = format!(
                "<record>\n<id>{}</id>\n<title>{}</title>\n<content>{}</content>\n</record>\n",
                item.id, item.title, item.text
            );
            let record_tokens = self.tokenizer.count(&record);
            if !batch.is_empty() && batch_tokens + record_tokens > self.config.map_token_budget {
                points.extend(self.map_batch(question, &batch).await?);
                batch.clear();
                batch_tokens = 0;
            }
            batch.push_str(&record);
            batch_tokens += record_tokens;
        }
        if !batch.is_empty() {
            points.extend(self.map_batch(question, &batch).await?);
        }
        Ok(points)
    }

    async fn map_batch(&self, question: &str, records: &str) -> Result<Vec<CandidatePoint>> {
        let prompt = fill(
            QUERY_MAP_PROMPT,
            &[("query", question), ("input_text", records)],
        );
        let response = self.llm.complete(&prompt).await?;
        let points = parse_points(&response);
        if points.is_empty() {
            warn!("map batch produced no parseable points");
        }
        Ok(points)
    }

    /// Greedy budget admission over score-ranked points; stops at the
    /// first point that would overflow the reduce budget.
    fn admit_points<'a>(&self, points: &'a [CandidatePoint]) -> &'a [CandidatePoint] {
        let mut used = 0usize;
        let mut cutoff = 0usize;
        for point in points {
            let cost = self.tokenizer.count(&point.title) + self.tokenizer.count(&point.content);
            if used + cost > self.config.reduce_token_budget {
                break;
            }
            used += cost;
            cutoff += 1;
        }
        &points[..cutoff]
    }

    async fn reduce_stage(&self, question: &str, points: &[CandidatePoint]) -> Result<String> {
        let report_data: String = points
            .iter()
            .map(|p| {
                format!(
                    "<point>\n<title>{}</title>\n<content>{}</content>\n<score>{}</score>\n</point>\n",
                    p.title, p.content, p.score
                )
            })
            .collect();
        let prompt = fill(
            QUERY_REDUCE_PROMPT,
            &[("query", question), ("report_data", &report_data)],
        );
        Ok(self
            .llm
            .complete(&prompt)
            .await
            .context("reduce stage failed")?
            .trim()
            .to_string())
    }

    /// Admitted points' refs → evidence items → backing chunks → owning
    /// groups, deduplicated and sorted for deterministic citations.
    async fn resolve_references(
        &self,
        points: &[CandidatePoint],
        evidence: &[EvidenceItem],
    ) -> Result<Vec<Reference>> {
        let by_id: HashMap<u64, &EvidenceItem> = evidence.iter().map(|e| (e.id, e)).collect();
        let mut chunk_ids: BTreeSet<u64> = BTreeSet::new();
        for point in points {
            for evidence_id in &point.refs {
                match by_id.get(evidence_id) {
                    Some(item) => chunk_ids.extend(item.chunk_ids.iter().copied()),
                    None => warn!(evidence_id, "point cites an unknown evidence record"),
                }
            }
        }

        let ids: Vec<u64> = chunk_ids.into_iter().collect();
        let records = self.storage.get(Collection::Chunk, &ids).await?;

        let mut grouped: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();
        for (chunk_id, record) in ids.into_iter().zip(records) {
            let Some(record) = record else {
                warn!(chunk_id, "referenced chunk no longer exists");
                continue;
            };
            let Some(group_id) = record.metadata.get("group_id").and_then(|v| v.as_u64()) else {
                continue;
            };
            grouped.entry(group_id).or_default().insert(chunk_id);
        }

        Ok(grouped
            .into_iter()
            .map(|(group_id, chunk_ids)| Reference {
                group_id,
                chunk_ids: chunk_ids.into_iter().collect(),
            })
            .collect())
    }
}
