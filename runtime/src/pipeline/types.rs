use serde::{Deserialize, Serialize};

/// One entity mention pulled out of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Canonical name, uppercased and trimmed.
    pub name: String,
    pub entity_type: String,
    pub description: String,
}

/// One directed mention of a relationship between two entities. The
/// graph itself is undirected; direction only matters for merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub source: String,
    pub target: String,
    pub description: String,
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtractionRecord {
    Entity(EntityRecord),
    Relationship(RelationshipRecord),
}

/// Everything extracted from a single chunk, tagged with the chunk's
/// storage id so graph merges can track provenance.
#[derive(Debug, Clone)]
pub struct ChunkExtraction {
    pub chunk_id: u64,
    pub entities: Vec<EntityRecord>,
    pub relationships: Vec<RelationshipRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub summary: String,
    pub explanation: String,
}

/// Structured report for one entity community. Persisted as the JSON
/// metadata of a community_report record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    pub title: String,
    pub summary: String,
    /// Impact rating in [0, 10], rounded to one decimal place.
    pub rating: f64,
    pub rating_explanation: String,
    pub findings: Vec<Finding>,
}

impl CommunityReport {
    /// Flat text form used for embedding and as query evidence.
    pub fn render(&self) -> String {
        let mut out = format!("{}\n{}", self.title, self.summary);
        for finding in &self.findings {
            out.push_str("\n\n");
            out.push_str(&finding.summary);
            out.push('\n');
            out.push_str(&finding.explanation);
        }
        out
    }
}
