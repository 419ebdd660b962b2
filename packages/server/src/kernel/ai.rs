// AI implementation using Anthropic Claude
//
// This is the infrastructure implementation of BaseAI.
// Business logic (what to prompt for) lives in domain layers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::anthropic;

use super::llm_request::extract_json_object;
use super::BaseAI;

/// Extraction runs on sparse pantry pages; the preamble keeps the model from
/// padding answers with caveats.
const PREAMBLE: &str =
    "You extract structured data about food assistance sites. Be terse and factual.";

const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Anthropic Claude implementation of AI capabilities.
///
/// Extraction responses are JSON, so `complete_json` pre-trims the model's
/// habit of wrapping the object in prose or code fences before handing the
/// text to callers.
pub struct ClaudeClient {
    client: anthropic::Client,
    model: String,
    max_tokens: u64,
}

impl ClaudeClient {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, anthropic::CLAUDE_3_5_SONNET)
    }

    pub fn with_model(api_key: String, model: &str) -> Self {
        let client = anthropic::ClientBuilder::new(&api_key).build();
        Self {
            client,
            model: model.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[async_trait]
impl BaseAI for ClaudeClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(PREAMBLE)
            .max_tokens(self.max_tokens)
            .build();

        agent
            .prompt(prompt)
            .await
            .with_context(|| format!("Claude completion failed (model {})", self.model))
    }

    async fn complete_json(&self, prompt: &str) -> Result<String> {
        let raw = self.complete(prompt).await?;
        Ok(tidy_json_response(raw))
    }
}

/// Reduce a response to its first balanced JSON object when one is present;
/// otherwise hand back the raw text for the caller's parse-retry loop.
fn tidy_json_response(raw: String) -> String {
    match extract_json_object(&raw) {
        Some(json) => json.to_string(),
        None => raw,
    }
}

/// No-op AI for environments without an API key. Every call fails, which the
/// ingestion pipeline treats as a per-candidate extraction failure.
pub struct NoopAI;

#[async_trait]
impl BaseAI for NoopAI {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        tracing::warn!("NoopAI: completion requested but no ANTHROPIC_API_KEY configured");
        anyhow::bail!("no LLM configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tidy_strips_surrounding_prose() {
        let raw = "Here is the record:\n```json\n{\"status\": \"OPEN\"}\n```".to_string();
        assert_eq!(tidy_json_response(raw), r#"{"status": "OPEN"}"#);
    }

    #[test]
    fn tidy_passes_bare_objects_through() {
        let raw = r#"{"status": "CLOSED", "confidence": 2}"#.to_string();
        assert_eq!(tidy_json_response(raw.clone()), raw);
    }

    #[test]
    fn tidy_leaves_non_json_for_the_retry_loop() {
        let raw = "No pantry information found on this page.".to_string();
        assert_eq!(tidy_json_response(raw.clone()), raw);
    }

    #[tokio::test]
    async fn noop_ai_always_fails() {
        let result = NoopAI.complete("anything").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires API key
    async fn test_complete() {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .expect("ANTHROPIC_API_KEY must be set for integration tests");

        let client = ClaudeClient::new(api_key);

        let response = client
            .complete("Say 'Hello, World!' and nothing else.")
            .await
            .expect("AI completion should succeed");

        assert!(response.contains("Hello"));
    }
}
