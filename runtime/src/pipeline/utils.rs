use anyhow::Result;
use sha2::{Digest, Sha256};
use tiktoken_rs::{CoreBPE, o200k_base};

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = o200k_base()?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_with_special_tokens(text)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.bpe.decode(tokens.to_vec())
    }
}

/// Content-addressed id: prefix plus the hex SHA-256 of the trimmed text.
/// Used to dedupe documents across ingestion runs.
pub fn compute_mdhash_id(content: &str, prefix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.trim().as_bytes());
    format!("{prefix}{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_id_is_stable_and_prefixed() {
        let a = compute_mdhash_id("  same text  ", "doc-");
        let b = compute_mdhash_id("same text", "doc-");
        assert_eq!(a, b);
        assert!(a.starts_with("doc-"));
        assert_ne!(a, compute_mdhash_id("other text", "doc-"));
    }
}
