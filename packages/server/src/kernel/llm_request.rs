// Fluent LLM request builder with automatic retry on parse failures
//
// Usage:
// ```rust
// let fields: ExtractedFields = ai
//     .request()
//     .system("You extract pantry details from websites")
//     .user(&format!("Extract from:\n{}", markdown))
//     .output::<ExtractedFields>()
//     .await?;
// ```

use serde::de::DeserializeOwned;
use std::fmt::Write;

use super::BaseAI;

/// Typed failure for LLM requests, so callers can distinguish an unreachable
/// model from one that produced garbage.
#[derive(Debug, thiserror::Error)]
pub enum LlmRequestError {
    #[error("LLM API call failed: {0}")]
    Api(#[source] anyhow::Error),
    #[error("LLM returned an empty response")]
    EmptyResponse,
    #[error("failed to parse LLM response after {attempts} attempts: {last_error}")]
    Parse { attempts: u32, last_error: String },
}

/// Builder for LLM requests with automatic JSON parsing and retry
pub struct LlmRequest<'a> {
    ai: &'a dyn BaseAI,
    system_prompt: Option<String>,
    user_message: Option<String>,
    max_retries: u32,
    /// Optional schema hint to include in retry prompts
    schema_hint: Option<String>,
}

impl<'a> LlmRequest<'a> {
    pub fn new(ai: &'a dyn BaseAI) -> Self {
        Self {
            ai,
            system_prompt: None,
            user_message: None,
            max_retries: 2,
            schema_hint: None,
        }
    }

    /// Set the system prompt (instructions for the AI)
    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the user message (the actual content/question)
    pub fn user(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Set maximum retry attempts (default: 2)
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Provide a schema hint for retry error messages
    /// This helps the AI understand the expected structure
    pub fn schema_hint(mut self, hint: impl Into<String>) -> Self {
        self.schema_hint = Some(hint.into());
        self
    }

    /// Execute the request and parse the response as JSON
    ///
    /// Real responses sometimes wrap the JSON in prose or code fences, so the
    /// first balanced `{...}` block is extracted before parsing. Parse
    /// failures are retried with the error message included so the model can
    /// fix its output.
    pub async fn output<T: DeserializeOwned>(self) -> Result<T, LlmRequestError> {
        let system = self.system_prompt.clone().unwrap_or_default();
        let user = self
            .user_message
            .clone()
            .ok_or_else(|| LlmRequestError::Api(anyhow::anyhow!("User message is required")))?;

        let mut last_response = String::new();
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            let prompt = if attempt == 1 {
                self.build_initial_prompt(&system, &user)
            } else {
                self.build_retry_prompt(&last_response, &last_error)
            };

            tracing::debug!(attempt, prompt_length = prompt.len(), "LLM request attempt");

            let response = self
                .ai
                .complete_json(&prompt)
                .await
                .map_err(LlmRequestError::Api)?;

            if response.trim().is_empty() {
                return Err(LlmRequestError::EmptyResponse);
            }

            last_response = response.clone();

            let candidate = extract_json_object(&response).unwrap_or(response.as_str());

            match serde_json::from_str::<T>(candidate) {
                Ok(parsed) => {
                    tracing::debug!(attempt, "Successfully parsed LLM response");
                    return Ok(parsed);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        attempt,
                        error = %e,
                        response_preview = %response.chars().take(200).collect::<String>(),
                        "Failed to parse LLM response as JSON"
                    );

                    if attempt == self.max_retries {
                        return Err(LlmRequestError::Parse {
                            attempts: self.max_retries,
                            last_error: last_error.clone(),
                        });
                    }
                }
            }
        }

        unreachable!()
    }

    fn build_initial_prompt(&self, system: &str, user: &str) -> String {
        let mut prompt = String::new();

        if !system.is_empty() {
            let _ = writeln!(prompt, "{}\n", system);
        }

        let _ = writeln!(prompt, "{}", user);

        // Add JSON output instructions - be extremely explicit
        let _ = writeln!(
            prompt,
            r#"

CRITICAL: Your response will be parsed directly by a JSON parser.

DO NOT include:
- Markdown code fences (```)
- The word "json" before the data
- Any text before the opening {{
- Any text after the closing }}
- Explanations or commentary

DO:
- Start your response with {{ immediately
- End your response with }} immediately
- Return syntactically valid JSON only"#
        );

        prompt
    }

    fn build_retry_prompt(&self, last_response: &str, error: &str) -> String {
        let response_preview: String = last_response.chars().take(500).collect();

        let mut prompt = format!(
            r#"JSON PARSE FAILED. Your previous response could not be parsed.

ERROR: {error}

Your response was:
{response_preview}

This failed because your response is not valid JSON.
"#
        );

        // Include schema hint if provided
        if let Some(hint) = &self.schema_hint {
            let _ = writeln!(prompt, "\nEXPECTED FORMAT:\n{}", hint);
        }

        let _ = writeln!(
            prompt,
            r#"
RESPOND WITH RAW JSON ONLY:
- First character must be {{
- Last character must be }}
- No ``` markdown fences
- No "json" prefix
- No explanation text
- Properly escape special characters in strings
- Use null for missing values, not undefined"#
        );

        prompt
    }
}

/// Extract the first balanced `{...}` block from a response.
///
/// Tracks string literals and escapes so braces inside JSON strings don't
/// unbalance the scan. Returns None when no complete object is present.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extension trait to add fluent request builder to BaseAI
///
/// Works with both concrete types and trait objects via the blanket impl.
pub trait LlmRequestExt {
    fn request(&self) -> LlmRequest<'_>;
}

impl<T: BaseAI> LlmRequestExt for T {
    fn request(&self) -> LlmRequest<'_> {
        LlmRequest::new(self)
    }
}

// Also implement for trait objects explicitly (with lifetime bounds)
impl LlmRequestExt for dyn BaseAI + '_ {
    fn request(&self) -> LlmRequest<'_> {
        LlmRequest::new(self)
    }
}

impl LlmRequestExt for dyn BaseAI + Send + Sync + '_ {
    fn request(&self) -> LlmRequest<'_> {
        LlmRequest::new(self)
    }
}
