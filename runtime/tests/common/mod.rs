//! Shared in-memory fakes for integration tests: a scripted LLM that
//! routes on prompt substrings and a deterministic embedder.
#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use hybridrag::ai::{EmbeddingClient, LlmClient};

pub enum Behavior {
    /// Always reply with the same text.
    Static(String),
    /// Reply with the next queued text; the last one repeats.
    Sequence(Mutex<Vec<String>>),
    /// Echo back whatever sits between `<text>` and `</text>`.
    EchoText,
}

pub struct Rule {
    pattern: String,
    behavior: Behavior,
}

/// LLM fake: the first rule whose pattern occurs in the prompt answers.
pub struct ScriptedLlm {
    rules: Vec<Rule>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_static(mut self, pattern: &str, response: &str) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            behavior: Behavior::Static(response.to_string()),
        });
        self
    }

    pub fn with_sequence(mut self, pattern: &str, responses: &[&str]) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            behavior: Behavior::Sequence(Mutex::new(
                responses.iter().rev().map(|s| s.to_string()).collect(),
            )),
        });
        self
    }

    pub fn with_echo_text(mut self, pattern: &str) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            behavior: Behavior::EchoText,
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for rule in &self.rules {
            if !prompt.contains(&rule.pattern) {
                continue;
            }
            return match &rule.behavior {
                Behavior::Static(response) => Ok(response.clone()),
                Behavior::Sequence(queue) => {
                    let mut queue = queue.lock().expect("queue lock");
                    if queue.len() > 1 {
                        Ok(queue.pop().expect("nonempty queue"))
                    } else {
                        Ok(queue.last().cloned().unwrap_or_default())
                    }
                }
                Behavior::EchoText => {
                    let start = prompt.find("<text>").map(|i| i + "<text>".len());
                    let end = prompt.find("</text>");
                    match (start, end) {
                        (Some(start), Some(end)) if start <= end => {
                            Ok(prompt[start..end].trim().to_string())
                        }
                        _ => Err(anyhow!("echo rule matched a prompt without a text block")),
                    }
                }
            };
        }
        Err(anyhow!("no scripted response for prompt: {prompt:.120}"))
    }
}

/// Deterministic embedding from letter frequencies: texts sharing
/// vocabulary land close together, disjoint texts far apart.
pub struct LetterFrequencyEmbedder;

#[async_trait]
impl EmbeddingClient for LetterFrequencyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut counts = [0.0f32; 26];
        for c in text.to_lowercase().chars() {
            if c.is_ascii_lowercase() {
                counts[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        let norm: f32 = counts.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut counts {
                *v /= norm;
            }
        } else {
            counts[0] = 1.0;
        }
        Ok(counts.to_vec())
    }
}
