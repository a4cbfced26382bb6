pub mod client;
pub mod parser;
pub mod prompts;

pub use client::{ChatCompletionsClient, EmbeddingClient, HttpEmbeddingClient, LlmClient};
