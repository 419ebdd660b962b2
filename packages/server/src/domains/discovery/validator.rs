//! Normalization of merged places + extracted records.
//!
//! Validation never rejects: every rule clamps or defaults, so the output is
//! always storable. Structural rejection (missing name or coordinates) is the
//! orchestrator's job before anything reaches this point.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domains::pantries::models::{PantryDraft, PantryStatus, OPEN_TO_ALL};

/// Longest stored string field, to bound document size.
pub const MAX_FIELD_LEN: usize = 2048;

/// Confidence floor for records with no scraped source.
const PLACES_ONLY_CONFIDENCE: i32 = 3;
/// Confidence floor for scraped records that came back without one.
const SCRAPED_CONFIDENCE: i32 = 5;

/// Unvalidated merge of places data and extracted fields.
#[derive(Debug, Clone, Default)]
pub struct RawPantry {
    pub place_id: Option<String>,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub status: Option<String>,
    pub hours_notes: Option<String>,
    pub hours_today: Option<String>,
    pub eligibility_rules: Vec<String>,
    pub is_id_required: Option<bool>,
    pub residency_req: Option<String>,
    pub special_notes: Option<String>,
    pub confidence: Option<i32>,
    pub source_url: Option<String>,
    pub scrape_method: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
}

/// Apply the normalization rules and emit a storable draft.
pub fn validate(raw: RawPantry) -> PantryDraft {
    let confidence_floor = if raw.source_url.is_none() {
        PLACES_ONLY_CONFIDENCE
    } else {
        SCRAPED_CONFIDENCE
    };
    let confidence = match raw.confidence {
        Some(c) if (1..=10).contains(&c) => c,
        Some(c) => {
            debug!(confidence = c, name = %raw.name, "Clamping out-of-range confidence");
            c.clamp(1, 10)
        }
        None => confidence_floor,
    };

    let status = raw
        .status
        .as_deref()
        .map(PantryStatus::parse)
        .unwrap_or(PantryStatus::Unknown);

    let mut eligibility_rules: Vec<String> = raw
        .eligibility_rules
        .iter()
        .map(|r| clean_string(r))
        .filter(|r| !r.is_empty())
        .collect();
    if eligibility_rules.is_empty() {
        eligibility_rules.push(OPEN_TO_ALL.to_string());
    }

    PantryDraft {
        place_id: raw.place_id,
        name: clean_string(&raw.name),
        address: clean_opt(raw.address),
        city: clean_opt(raw.city),
        state: clean_opt(raw.state),
        latitude: raw.latitude,
        longitude: raw.longitude,
        status,
        hours_notes: clean_opt(raw.hours_notes),
        hours_today: clean_opt(raw.hours_today),
        eligibility_rules,
        is_id_required: raw.is_id_required.unwrap_or(false),
        residency_req: clean_opt(raw.residency_req),
        special_notes: clean_opt(raw.special_notes),
        confidence,
        source_url: clean_opt(raw.source_url),
        scrape_method: raw.scrape_method,
        scraped_at: raw.scraped_at,
    }
}

/// Strip control characters and truncate to the field limit.
fn clean_string(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.len() <= MAX_FIELD_LEN {
        return trimmed.to_string();
    }
    // Truncate on a char boundary.
    let mut end = MAX_FIELD_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

fn clean_opt(value: Option<String>) -> Option<String> {
    value
        .map(|v| clean_string(&v))
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawPantry {
        RawPantry {
            place_id: Some("p1".to_string()),
            name: "Community Pantry".to_string(),
            latitude: 39.7,
            longitude: -105.0,
            ..RawPantry::default()
        }
    }

    #[test]
    fn out_of_range_confidence_is_clamped() {
        let mut record = raw();
        record.confidence = Some(15);
        assert_eq!(validate(record).confidence, 10);

        let mut record = raw();
        record.confidence = Some(-3);
        assert_eq!(validate(record).confidence, 1);
    }

    #[test]
    fn missing_confidence_floors_on_source() {
        let mut record = raw();
        record.source_url = None;
        record.confidence = None;
        assert_eq!(validate(record).confidence, 3);

        let mut record = raw();
        record.source_url = Some("https://pantry.org".to_string());
        record.confidence = None;
        assert_eq!(validate(record).confidence, 5);
    }

    #[test]
    fn unknown_status_strings_coerce_to_unknown() {
        let mut record = raw();
        record.status = Some("probably open?".to_string());
        assert_eq!(validate(record).status, PantryStatus::Unknown);

        let mut record = raw();
        record.status = None;
        assert_eq!(validate(record).status, PantryStatus::Unknown);

        let mut record = raw();
        record.status = Some("waitlist".to_string());
        assert_eq!(validate(record).status, PantryStatus::Waitlist);
    }

    #[test]
    fn missing_id_requirement_defaults_false() {
        let mut record = raw();
        record.is_id_required = None;
        assert!(!validate(record).is_id_required);
    }

    #[test]
    fn empty_eligibility_gets_default_rule() {
        let record = raw();
        assert_eq!(validate(record).eligibility_rules, vec![OPEN_TO_ALL.to_string()]);

        let mut record = raw();
        record.eligibility_rules = vec!["  ".to_string()];
        assert_eq!(validate(record).eligibility_rules, vec![OPEN_TO_ALL.to_string()]);
    }

    #[test]
    fn control_characters_are_stripped() {
        let mut record = raw();
        record.hours_notes = Some("Mon\u{0000} 9-11\u{0007}am\nTue 1-3pm".to_string());
        let draft = validate(record);
        assert_eq!(draft.hours_notes.as_deref(), Some("Mon 9-11am\nTue 1-3pm"));
    }

    #[test]
    fn oversized_fields_are_truncated() {
        let mut record = raw();
        record.special_notes = Some("x".repeat(MAX_FIELD_LEN * 2));
        let draft = validate(record);
        assert_eq!(draft.special_notes.unwrap().len(), MAX_FIELD_LEN);
    }

    #[test]
    fn validated_record_always_satisfies_invariants() {
        // A deliberately messy record still comes out storable.
        let record = RawPantry {
            place_id: None,
            name: "  Pantry \u{0002}With Noise  ".to_string(),
            latitude: 40.0,
            longitude: -105.0,
            status: Some("???".to_string()),
            eligibility_rules: vec![],
            is_id_required: None,
            confidence: Some(99),
            ..RawPantry::default()
        };
        let draft = validate(record);

        assert!((1..=10).contains(&draft.confidence));
        assert!(!draft.eligibility_rules.is_empty());
        assert_eq!(draft.name, "Pantry With Noise");
        assert_eq!(draft.status, PantryStatus::Unknown);
    }
}
