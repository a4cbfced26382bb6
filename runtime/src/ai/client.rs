use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};

/// Plain completion interface: prompt in, text out. All structured-output
/// parsing happens on our side (see [`crate::ai::parser`]).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// OpenAI-compatible chat completions client with bounded retry on
/// rate limits and server errors.
pub struct ChatCompletionsClient {
    http: Client,
    api_key: String,
    base: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(api_key: String, base: Option<String>, model: String) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(600))
            .build()
            .expect("client");
        Self {
            http,
            api_key,
            base: base.unwrap_or_else(|| "https://api.openai.com".into()),
            model,
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> reqwest::Result<reqwest::Response> {
        self.http
            .post(format!("{}/v1{}", self.base, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
    }

    async fn post_with_retry(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let mut delay = Duration::from_millis(300);
        for attempt in 0..5 {
            let resp = self.post_json(path, body).await?;
            if resp.status().is_success() {
                return resp
                    .json()
                    .await
                    .with_context(|| format!("error decoding response from {path}"));
            }

            if matches!(resp.status(), StatusCode::TOO_MANY_REQUESTS)
                || resp.status().is_server_error()
            {
                if attempt < 4 {
                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as f64 * 1.8) as u64)
                        + Duration::from_millis(fastrand::u64(0..250));
                    continue;
                }
            }

            let status = resp.status();
            let err_txt = resp.text().await.unwrap_or_default();
            anyhow::bail!("API error {}: {}", status, err_txt);
        }
        anyhow::bail!("retries exhausted for {path}")
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let v = self.post_with_retry("/chat/completions", &body).await?;
        let content = v
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("completion content missing in response"))?;

        Ok(strip_reasoning_preamble(content).to_string())
    }
}

/// Reasoning models may prefix their answer with a `<think>...</think>`
/// block; only the text after it is the usable output.
fn strip_reasoning_preamble(output: &str) -> &str {
    match output.rsplit_once("</think>") {
        Some((_, rest)) => rest.trim(),
        None => output.trim(),
    }
}

/// OpenAI-compatible embeddings client.
pub struct HttpEmbeddingClient {
    http: Client,
    api_key: String,
    base: String,
    model: String,
}

impl HttpEmbeddingClient {
    pub fn new(api_key: String, base: Option<String>, model: String) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("client");
        Self {
            http,
            api_key,
            base: base.unwrap_or_else(|| "https://api.openai.com".into()),
            model,
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let body = json!({ "model": self.model, "input": [text] });
        let resp = self
            .http
            .post(format!("{}/v1/embeddings", self.base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err_txt = resp.text().await.unwrap_or_default();
            anyhow::bail!("embeddings API error {}: {}", status, err_txt);
        }

        let v: Value = resp.json().await.context("error decoding embeddings response")?;
        let embedding = v
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("embedding vector missing in response"))?
            .iter()
            .filter_map(Value::as_f64)
            .map(|f| f as f32)
            .collect::<Vec<_>>();

        if embedding.is_empty() {
            anyhow::bail!("embedding vector empty in response");
        }
        Ok(embedding)
    }
}
