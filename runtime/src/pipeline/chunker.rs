use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::pipeline::utils::Tokenizer;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub order: usize,
    pub token_count: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub max_tokens: usize,
    /// Overlap used only when a single paragraph exceeds `max_tokens`
    /// and has to be window-split.
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            overlap_tokens: 50,
        }
    }
}

pub trait Chunker: Send + Sync {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<Chunk>>;
}

/// Packs whole paragraphs (blank-line separated) greedily up to the
/// token limit, so chunk boundaries fall on paragraph boundaries
/// wherever the text allows it.
#[derive(Clone)]
pub struct ParagraphChunker {
    tokenizer: Arc<dyn Tokenizer>,
}

impl ParagraphChunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    fn window_split(&self, text: &str, config: &ChunkConfig) -> Result<Vec<(String, usize)>> {
        let tokens = self.tokenizer.encode(text);
        let step = config.max_tokens - config.overlap_tokens;
        let mut pieces = Vec::new();
        let mut start = 0usize;
        while start < tokens.len() {
            let end = (start + config.max_tokens).min(tokens.len());
            let piece = self.tokenizer.decode(&tokens[start..end])?;
            pieces.push((piece, end - start));
            if end == tokens.len() {
                break;
            }
            start += step;
        }
        Ok(pieces)
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<Chunk>> {
        if config.overlap_tokens >= config.max_tokens {
            return Err(anyhow!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                config.overlap_tokens,
                config.max_tokens
            ));
        }

        let mut packed: Vec<(String, usize)> = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;

        for paragraph in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let para_tokens = self.tokenizer.count(paragraph);

            if para_tokens > config.max_tokens {
                if !current.is_empty() {
                    packed.push((std::mem::take(&mut current), current_tokens));
                    current_tokens = 0;
                }
                packed.extend(self.window_split(paragraph, config)?);
                continue;
            }

            // Joining adds a separator, counted against the budget.
            let joined = if current.is_empty() {
                para_tokens
            } else {
                current_tokens + self.tokenizer.count("\n\n") + para_tokens
            };
            if !current.is_empty() && joined > config.max_tokens {
                packed.push((std::mem::take(&mut current), current_tokens));
                current = paragraph.to_string();
                current_tokens = para_tokens;
            } else {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(paragraph);
                current_tokens = joined;
            }
        }
        if !current.is_empty() {
            packed.push((current, current_tokens));
        }

        Ok(packed
            .into_iter()
            .enumerate()
            .map(|(order, (content, token_count))| Chunk {
                content: content.trim().to_string(),
                order,
                token_count,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::utils::TiktokenTokenizer;

    fn chunker() -> ParagraphChunker {
        ParagraphChunker::new(Arc::new(TiktokenTokenizer::new().expect("tokenizer")))
    }

    #[test]
    fn packs_paragraphs_under_the_limit() {
        let text = "First paragraph about apples.\n\nSecond paragraph about pears.";
        let chunks = chunker()
            .chunk(text, &ChunkConfig::default())
            .expect("chunks");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("apples"));
        assert!(chunks[0].content.contains("pears"));
    }

    #[test]
    fn splits_at_paragraph_boundary_when_full() {
        let config = ChunkConfig {
            max_tokens: 12,
            overlap_tokens: 2,
        };
        let text = "one two three four five six seven.\n\neight nine ten eleven twelve thirteen.";
        let chunks = chunker().chunk(text, &config).expect("chunks");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.ends_with("seven."));
        assert!(chunks[1].content.starts_with("eight"));
    }

    #[test]
    fn window_splits_an_oversize_paragraph_with_overlap() {
        let config = ChunkConfig {
            max_tokens: 8,
            overlap_tokens: 3,
        };
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let chunks = chunker().chunk(text, &config).expect("chunks");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= config.max_tokens);
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunks = chunker()
            .chunk("\n\n  \n\n", &ChunkConfig::default())
            .expect("chunks");
        assert!(chunks.is_empty());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_max() {
        let config = ChunkConfig {
            max_tokens: 10,
            overlap_tokens: 10,
        };
        assert!(chunker().chunk("text", &config).is_err());
    }
}
