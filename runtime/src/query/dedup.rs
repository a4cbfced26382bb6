//! Near-duplicate collapsing of map-stage points.
//!
//! Two points are duplicates when their scores are identical and their
//! TF-IDF cosine similarity exceeds 0.9. Points are compared in
//! score-descending order and the first occurrence wins, so the output
//! order is the ranking the reduce stage consumes.

use std::collections::HashMap;

use crate::ai::parser::CandidatePoint;

const SIMILARITY_THRESHOLD: f64 = 0.9;

pub fn dedup_points(mut points: Vec<CandidatePoint>) -> Vec<CandidatePoint> {
    // Stable sort keeps earlier points first among equal scores.
    points.sort_by(|a, b| b.score.cmp(&a.score));

    let texts: Vec<String> = points
        .iter()
        .map(|p| format!("{} {}", p.title, p.content))
        .collect();
    let vectors = tfidf_vectors(&texts);

    let mut kept: Vec<(usize, CandidatePoint)> = Vec::new();
    for (index, point) in points.into_iter().enumerate() {
        let duplicate = kept.iter().any(|(kept_index, kept_point)| {
            kept_point.score == point.score
                && cosine(&vectors[*kept_index], &vectors[index]) > SIMILARITY_THRESHOLD
        });
        if !duplicate {
            kept.push((index, point));
        }
    }
    kept.into_iter().map(|(_, p)| p).collect()
}

/// Sparse TF-IDF vectors over whitespace/punctuation-split lowercase
/// terms, with smoothed idf.
fn tfidf_vectors(texts: &[String]) -> Vec<HashMap<String, f64>> {
    let n = texts.len() as f64;
    let token_lists: Vec<Vec<String>> = texts.iter().map(|t| tokenize(t)).collect();

    let mut document_frequency: HashMap<&str, f64> = HashMap::new();
    for tokens in &token_lists {
        let mut seen: Vec<&str> = tokens.iter().map(String::as_str).collect();
        seen.sort_unstable();
        seen.dedup();
        for term in seen {
            *document_frequency.entry(term).or_default() += 1.0;
        }
    }

    token_lists
        .iter()
        .map(|tokens| {
            let mut tf: HashMap<String, f64> = HashMap::new();
            for token in tokens {
                *tf.entry(token.clone()).or_default() += 1.0;
            }
            for (term, value) in tf.iter_mut() {
                let df = document_frequency.get(term.as_str()).copied().unwrap_or(1.0);
                *value *= ((1.0 + n) / (1.0 + df)).ln() + 1.0;
            }
            tf
        })
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(term, &va)| b.get(term).map(|&vb| va * vb))
        .sum();
    let norm_a: f64 = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
