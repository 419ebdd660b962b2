//! LLM field extraction from scraped markdown.
//!
//! Stateless: each call builds a prompt with the current date interpolated
//! and parses the JSON response. Safe under concurrent invocation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::kernel::{BaseAI, LlmRequestError, LlmRequestExt};

/// Partial pantry record produced by the LLM. Every field optional; the
/// validator fills gaps and clamps ranges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub hours_notes: Option<String>,
    #[serde(default)]
    pub hours_today: Option<String>,
    #[serde(default)]
    pub eligibility_rules: Option<Vec<String>>,
    #[serde(default)]
    pub is_id_required: Option<bool>,
    #[serde(default)]
    pub residency_req: Option<String>,
    #[serde(default)]
    pub special_notes: Option<String>,
    #[serde(default)]
    pub confidence: Option<i32>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractionFailure {
    #[error("llm_error")]
    LlmError,
    #[error("invalid_json")]
    InvalidJson,
    #[error("empty_response")]
    EmptyResponse,
}

/// Cap on prompt content so one huge site cannot blow the token budget.
const MAX_MARKDOWN_CHARS: usize = 24_000;

const SCHEMA_HINT: &str = r#"{
  "status": "OPEN" | "CLOSED" | "WAITLIST" | "UNKNOWN",
  "hours_notes": string | null,
  "hours_today": string | null,
  "eligibility_rules": [string],
  "is_id_required": boolean,
  "residency_req": string | null,
  "special_notes": string | null,
  "confidence": integer 1-10
}"#;

/// Extract pantry fields from scraped markdown.
///
/// Empty content never reaches the model: it deterministically yields the
/// low-confidence unknown record the prompt would have produced anyway.
pub async fn extract_pantry_fields(
    ai: &dyn BaseAI,
    markdown: &str,
    today: NaiveDate,
) -> Result<ExtractedFields, ExtractionFailure> {
    if markdown.trim().is_empty() {
        return Ok(empty_content_fields());
    }

    let content: String = markdown.chars().take(MAX_MARKDOWN_CHARS).collect();

    let result = ai
        .request()
        .system(system_prompt(today))
        .user(format!(
            "Extract the food pantry details from this website content. \
             Sections separated by `---` headers come from different pages of the same site.\n\n{content}"
        ))
        .schema_hint(SCHEMA_HINT)
        .output::<ExtractedFields>()
        .await;

    match result {
        Ok(fields) => Ok(fields),
        Err(LlmRequestError::Api(_)) => Err(ExtractionFailure::LlmError),
        Err(LlmRequestError::EmptyResponse) => Err(ExtractionFailure::EmptyResponse),
        Err(LlmRequestError::Parse { .. }) => Err(ExtractionFailure::InvalidJson),
    }
}

/// What the extractor reports when the source says nothing.
fn empty_content_fields() -> ExtractedFields {
    ExtractedFields {
        status: Some("UNKNOWN".to_string()),
        eligibility_rules: Some(vec![
            "Open to all - no restrictions listed".to_string(),
        ]),
        is_id_required: Some(false),
        confidence: Some(1),
        ..ExtractedFields::default()
    }
}

fn system_prompt(today: NaiveDate) -> String {
    format!(
        r#"You extract structured data about food pantries from website text.
Today's date is {today} (use it to resolve phrases like "open today" or "closed this week").

Rules:
- Report only what the text states. Never invent hours, rules, or requirements.
- status: OPEN if currently operating, CLOSED if shut down or paused, WAITLIST if intake is waitlisted, otherwise UNKNOWN.
- hours_notes: full schedule as written. hours_today: today's hours if derivable, else null.
- eligibility_rules: each stated requirement as its own string. If none are stated, use ["Open to all - no restrictions listed"].
- is_id_required: true only if the text requires identification; otherwise false.
- residency_req: any stated geographic restriction, else null.
- special_notes: anything a visitor should know (drive-through, appointment links, languages), else null.
- confidence: 1-10 for how well the text supports these fields. Sparse or off-topic pages score 1-2.

Respond with a JSON object matching:
{SCHEMA_HINT}"#
    )
}
