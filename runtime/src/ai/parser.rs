//! Defensive scanners for the tag grammars in [`crate::ai::prompts`].
//!
//! LLM output is never trusted to be well formed: unknown tags are
//! ignored, malformed blocks are dropped, and every accessor trims.
//! No full XML parse happens here, only paired-tag scanning, so stray
//! prose around the tags is harmless.

use std::collections::HashSet;

use crate::pipeline::types::{CommunityReport, EntityRecord, Finding, RelationshipRecord};

/// All `<tag>...</tag>` bodies, in order of appearance. Nested same-name
/// tags are not supported by any grammar we emit.
pub fn tag_blocks<'a>(input: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find(&open) {
        let body_start = start + open.len();
        let Some(len) = rest[body_start..].find(&close) else {
            break;
        };
        blocks.push(&rest[body_start..body_start + len]);
        rest = &rest[body_start + len + close.len()..];
    }
    blocks
}

/// First `<tag>` body, trimmed.
pub fn tag_text<'a>(input: &'a str, tag: &str) -> Option<&'a str> {
    tag_blocks(input, tag).first().map(|s| s.trim())
}

fn canonical_name(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Parse an extraction (or gleaning) response into entity and
/// relationship records. Blocks missing a usable name are dropped.
pub fn parse_extraction(output: &str) -> (Vec<EntityRecord>, Vec<RelationshipRecord>) {
    let mut entities = Vec::new();
    for block in tag_blocks(output, "entity") {
        let Some(name) = tag_text(block, "entity_name") else {
            continue;
        };
        let name = canonical_name(name);
        if name.is_empty() {
            continue;
        }
        entities.push(EntityRecord {
            name,
            entity_type: tag_text(block, "entity_type").unwrap_or_default().to_string(),
            description: tag_text(block, "entity_description")
                .unwrap_or_default()
                .to_string(),
        });
    }

    let mut relationships = Vec::new();
    for block in tag_blocks(output, "relationship") {
        let source = canonical_name(tag_text(block, "source_entity").unwrap_or_default());
        let target = canonical_name(tag_text(block, "target_entity").unwrap_or_default());
        if source.is_empty() || target.is_empty() {
            continue;
        }
        let strength = tag_text(block, "relationship_strength")
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(1.0);
        relationships.push(RelationshipRecord {
            source,
            target,
            description: tag_text(block, "relationship_description")
                .unwrap_or_default()
                .to_string(),
            strength,
        });
    }

    (entities, relationships)
}

/// Names confirmed by the entity-filter response. Scans every
/// `<entity_name>` tag regardless of surrounding structure.
pub fn parse_confirmed_entities(output: &str) -> HashSet<String> {
    tag_blocks(output, "entity_name")
        .into_iter()
        .map(canonical_name)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Parse a community report response. Returns `None` when any required
/// section is missing or no complete finding is present, which the
/// caller treats as a signal to retry with the fallback prompt.
pub fn parse_community_report(output: &str) -> Option<CommunityReport> {
    let title = tag_text(output, "title")?.to_string();
    let summary = tag_text(output, "summary")?.to_string();
    if title.is_empty() || summary.is_empty() {
        return None;
    }
    let rating = tag_text(output, "rating")?.parse::<f64>().ok()?;
    let rating = (rating * 10.0).round() / 10.0;
    let rating_explanation = tag_text(output, "rating_explanation")
        .unwrap_or_default()
        .to_string();

    let findings: Vec<Finding> = tag_blocks(output, "insight")
        .into_iter()
        .filter_map(|block| {
            let summary = tag_text(block, "insight_summary")?.to_string();
            let explanation = tag_text(block, "insight_explanation")?.to_string();
            if summary.is_empty() || explanation.is_empty() {
                return None;
            }
            Some(Finding { summary, explanation })
        })
        .collect();
    if findings.is_empty() {
        return None;
    }

    Some(CommunityReport {
        title,
        summary,
        rating,
        rating_explanation,
        findings,
    })
}

/// One analyst point from the query map stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePoint {
    pub title: String,
    pub content: String,
    /// Evidence record ids the point cites.
    pub refs: Vec<u64>,
    /// Importance in [0, 100].
    pub score: u32,
}

/// Parse map-stage output. Points without a title, content, or a
/// parseable score are dropped; scores clamp into [0, 100].
pub fn parse_points(output: &str) -> Vec<CandidatePoint> {
    tag_blocks(output, "point")
        .into_iter()
        .filter_map(|block| {
            let title = tag_text(block, "title")?.to_string();
            let content = tag_text(block, "content")?.to_string();
            if title.is_empty() || content.is_empty() {
                return None;
            }
            let score = tag_text(block, "score")?
                .parse::<i64>()
                .ok()?
                .clamp(0, 100) as u32;
            let refs = tag_text(block, "ref")
                .map(parse_id_list)
                .unwrap_or_default();
            Some(CandidatePoint {
                title,
                content,
                refs,
                score,
            })
        })
        .collect()
}

/// Pull every integer out of a free-form id list ("1, 2", "[3] [4]", ...).
fn parse_id_list(raw: &str) -> Vec<u64> {
    let mut ids = Vec::new();
    for piece in raw.split(|c: char| !c.is_ascii_digit()) {
        if piece.is_empty() {
            continue;
        }
        if let Ok(id) = piece.parse::<u64>() {
            ids.push(id);
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_entities_and_relationships() {
        let raw = "\
<entity>
  <entity_name> techglobal </entity_name>
  <entity_type>ORGANIZATION</entity_type>
  <entity_description>A listed company.</entity_description>
</entity>
<relationship>
  <source_entity>TECHGLOBAL</source_entity>
  <target_entity>VISION HOLDINGS</target_entity>
  <relationship_description>Former owner.</relationship_description>
  <relationship_strength>5</relationship_strength>
</relationship>";
        let (entities, relationships) = parse_extraction(raw);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "TECHGLOBAL");
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].strength, 5.0);
    }

    #[test]
    fn malformed_blocks_are_dropped() {
        let raw = "\
<entity><entity_type>X</entity_type></entity>
<relationship><source_entity>A</source_entity></relationship>
<entity><entity_name>KEPT</entity_name></entity>";
        let (entities, relationships) = parse_extraction(raw);
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "KEPT");
        assert!(relationships.is_empty());
    }

    #[test]
    fn missing_strength_defaults_to_one() {
        let raw = "<relationship><source_entity>A</source_entity><target_entity>B</target_entity></relationship>";
        let (_, relationships) = parse_extraction(raw);
        assert_eq!(relationships[0].strength, 1.0);
    }

    #[test]
    fn confirmed_entities_are_canonicalized() {
        let raw = "<entity><entity_name>alpha</entity_name></entity><entity_name>BETA</entity_name>";
        let names = parse_confirmed_entities(raw);
        assert!(names.contains("ALPHA"));
        assert!(names.contains("BETA"));
    }

    #[test]
    fn report_rating_rounds_to_one_decimal() {
        let raw = "\
<title>T</title><summary>S</summary><rating>7.46</rating>
<rating_explanation>E</rating_explanation>
<findings><insight><insight_summary>a</insight_summary><insight_explanation>b</insight_explanation></insight></findings>";
        let report = parse_community_report(raw).expect("report");
        assert_eq!(report.rating, 7.5);
        assert_eq!(report.findings.len(), 1);
    }

    #[test]
    fn report_without_findings_is_rejected() {
        let raw = "<title>T</title><summary>S</summary><rating>3</rating><rating_explanation>E</rating_explanation>";
        assert!(parse_community_report(raw).is_none());
    }

    #[test]
    fn points_parse_refs_and_clamp_scores() {
        let raw = "\
<point><title>P1</title><content>C1</content><ref>1, 2</ref><score>120</score></point>
<point><title>P2</title><content>C2</content><ref>[7]</ref><score>not a number</score></point>";
        let points = parse_points(raw);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].refs, vec![1, 2]);
        assert_eq!(points[0].score, 100);
    }

    #[test]
    fn unterminated_tag_is_ignored() {
        assert!(tag_blocks("<entity>open forever", "entity").is_empty());
        assert_eq!(tag_blocks("<x>a</x><x>b", "x"), vec!["a"]);
    }
}
