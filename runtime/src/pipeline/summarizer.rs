use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::ai::LlmClient;
use crate::ai::prompts::{SUMMARIZE_DESCRIPTIONS_PROMPT, fill};
use crate::pipeline::utils::Tokenizer;

/// Condenses the accumulated description set of an entity into a single
/// coherent description.
///
/// Zero descriptions yield an empty string and a single description is
/// returned verbatim, neither touching the LLM. Larger sets are folded
/// left to right under a prompt token budget: when the buffer fills, it
/// is summarized and the summary becomes the first element of the next
/// buffer, so arbitrarily many descriptions compress in bounded prompts.
pub struct DescriptionSummarizer {
    llm: Arc<dyn LlmClient>,
    tokenizer: Arc<dyn Tokenizer>,
    max_input_tokens: usize,
}

impl DescriptionSummarizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tokenizer: Arc<dyn Tokenizer>,
        max_input_tokens: usize,
    ) -> Self {
        Self {
            llm,
            tokenizer,
            max_input_tokens,
        }
    }

    pub async fn summarize(&self, entity_name: &str, descriptions: &[String]) -> Result<String> {
        match descriptions.len() {
            0 => return Ok(String::new()),
            1 => return Ok(descriptions[0].clone()),
            _ => {}
        }

        let mut sorted: Vec<&str> = descriptions.iter().map(String::as_str).collect();
        sorted.sort_unstable();

        let template_tokens = self.tokenizer.count(SUMMARIZE_DESCRIPTIONS_PROMPT);
        let mut usable = self.max_input_tokens as i64 - template_tokens as i64;
        let mut collected: Vec<String> = Vec::new();
        let mut result = String::new();

        for (i, description) in sorted.iter().enumerate() {
            usable -= self.tokenizer.count(description) as i64;
            collected.push(description.to_string());

            let last = i == sorted.len() - 1;
            if (usable < 0 && collected.len() > 1) || last {
                debug!(entity = entity_name, batch = collected.len(), "condensing descriptions");
                result = self.summarize_batch(entity_name, &collected).await?;
                if !last {
                    usable = self.max_input_tokens as i64
                        - template_tokens as i64
                        - self.tokenizer.count(&result) as i64;
                    collected = vec![result.clone()];
                }
            }
        }

        Ok(result)
    }

    async fn summarize_batch(&self, entity_name: &str, descriptions: &[String]) -> Result<String> {
        let mut batch: Vec<&str> = descriptions.iter().map(String::as_str).collect();
        batch.sort_unstable();
        let prompt = fill(
            SUMMARIZE_DESCRIPTIONS_PROMPT,
            &[
                ("entity_name", entity_name),
                ("description_list", &batch.join("\n")),
            ],
        );
        Ok(self.llm.complete(&prompt).await?.trim().to_string())
    }
}
