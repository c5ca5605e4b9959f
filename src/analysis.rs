//! Incremental audio-analysis protocol pieces.
//!
//! The copilot cycle is stateless on the server side: the caller supplies
//! the previous cycle's `updated_summary` as `context`, the prompt embeds it
//! verbatim, and the reply carries the next summary for the caller to store.
//! Parsing is best-effort throughout — a malformed model response degrades
//! to a raw-text result, never an error.

use crate::extract::{extract_json_object, string_field, strip_fence_lines};
use serde::{Deserialize, Serialize};

/// A question the assistant suggests asking next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestedQuestion {
    pub question: String,
    pub reason: String,
}

/// A technical term, name, or topic worth surfacing, with brief context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConcept {
    pub term: String,
    pub context: String,
}

/// Structured result of one audio-analysis cycle.
///
/// Every field defaults independently so a partially compliant model
/// response still yields a usable value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisResult {
    pub new_content: String,
    pub updated_summary: String,
    pub key_points: Vec<String>,
    pub decisions: Vec<String>,
    pub action_items: Vec<String>,
    pub open_questions: Vec<String>,
    pub suggested_questions: Vec<SuggestedQuestion>,
    pub key_concepts: Vec<KeyConcept>,
}

impl AnalysisResult {
    /// Pass-through result for an empty audio segment: the running summary
    /// is returned unchanged and no inference happens.
    #[must_use]
    pub fn passthrough(context: &str) -> Self {
        Self {
            updated_summary: context.to_owned(),
            ..Self::default()
        }
    }

    /// Degraded result preserving raw model text when parsing fails.
    #[must_use]
    pub fn degraded(raw: &str) -> Self {
        Self {
            new_content: raw.to_owned(),
            updated_summary: raw.to_owned(),
            ..Self::default()
        }
    }
}

/// Parse a model response into an [`AnalysisResult`].
///
/// Strips code fences, then attempts a strict parse with per-field
/// defaults; on failure the fence-stripped text lands in both `new_content`
/// and `updated_summary`.
#[must_use]
pub fn parse_analysis_response(raw: &str) -> AnalysisResult {
    let text = strip_fence_lines(raw);
    match serde_json::from_str::<AnalysisResult>(&text) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(error = %e, "analysis response was not valid JSON, degrading");
            AnalysisResult::degraded(&text)
        }
    }
}

/// Structured result of transcript generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptResult {
    pub language: String,
    pub transcript: String,
}

impl TranscriptResult {
    /// Result for an empty audio segment.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            language: "unknown".to_owned(),
            transcript: String::new(),
        }
    }
}

/// Parse a model response into a [`TranscriptResult`].
///
/// On a successful object parse, missing fields default (`language` to
/// `"unknown"`, `transcript` to the full response text). On parse failure
/// the fence-stripped text becomes the transcript.
#[must_use]
pub fn parse_transcript_response(raw: &str) -> TranscriptResult {
    let text = strip_fence_lines(raw);
    match extract_json_object(&text) {
        Some(map) => TranscriptResult {
            language: string_field(&map, "language", "unknown"),
            transcript: string_field(&map, "transcript", &text).trim().to_owned(),
        },
        None => TranscriptResult {
            language: "unknown".to_owned(),
            transcript: text.trim().to_owned(),
        },
    }
}

/// Prompt for the first cycle of a conversation (no prior context).
#[must_use]
pub fn initial_analysis_prompt() -> String {
    r#"This is the start of a conversation. Analyze the audio and provide:
1. What was discussed
2. Summary of the conversation
3. Key points mentioned
4. Any decisions made
5. Action items identified
6. Open questions raised
7. Suggested questions to ask next (with reasons)
8. Key concepts (technical terms, names, topics) with brief context

Respond in JSON format with these exact fields:
{"new_content": "...", "updated_summary": "...", "key_points": [...], "decisions": [...], "action_items": [...], "open_questions": [...], "suggested_questions": [{"question": "...", "reason": "..."}], "key_concepts": [{"term": "...", "context": "..."}]}"#
        .to_owned()
}

/// Prompt for a continuation cycle, embedding the prior summary verbatim.
#[must_use]
pub fn continuation_analysis_prompt(context: &str) -> String {
    format!(
        r#"Previous conversation summary:
{context}

Analyze the new audio segment and provide:
1. What new content was discussed
2. Updated summary of the entire conversation so far
3. Key points mentioned
4. Any decisions made
5. Action items identified
6. Open questions raised
7. Suggested questions to ask next (with reasons)
8. Key concepts (technical terms, names, topics) with brief context

Respond in JSON format with these exact fields:
{{"new_content": "...", "updated_summary": "...", "key_points": [...], "decisions": [...], "action_items": [...], "open_questions": [...], "suggested_questions": [{{"question": "...", "reason": "..."}}], "key_concepts": [{{"term": "...", "context": "..."}}]}}"#
    )
}

/// Select the analysis prompt for the given running context.
#[must_use]
pub fn analysis_prompt(context: &str) -> String {
    if context.is_empty() {
        initial_analysis_prompt()
    } else {
        continuation_analysis_prompt(context)
    }
}

/// Prompt for single-shot transcription with language detection.
#[must_use]
pub fn transcript_prompt() -> String {
    r#"Detect the language spoken. Transcribe word for word in the detected language. Do NOT translate. Respond in JSON: {"language": "...", "transcript": "..."}"#
        .to_owned()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn parses_complete_analysis_json() {
        let raw = r#"{
            "new_content": "Discussed rollout timing",
            "updated_summary": "Team agreed to ship in May",
            "key_points": ["rollout", "timing"],
            "decisions": ["ship in May"],
            "action_items": ["book release window"],
            "open_questions": ["who owns QA?"],
            "suggested_questions": [{"question": "Which regions first?", "reason": "rollout order unclear"}],
            "key_concepts": [{"term": "canary", "context": "gradual rollout technique"}]
        }"#;
        let result = parse_analysis_response(raw);
        assert_eq!(result.updated_summary, "Team agreed to ship in May");
        assert_eq!(result.suggested_questions[0].question, "Which regions first?");
        assert_eq!(result.key_concepts[0].term, "canary");
    }

    #[test]
    fn missing_fields_default_independently() {
        let raw = r#"{"updated_summary": "short"}"#;
        let result = parse_analysis_response(raw);
        assert_eq!(result.updated_summary, "short");
        assert_eq!(result.new_content, "");
        assert!(result.key_points.is_empty());
        assert!(result.suggested_questions.is_empty());
    }

    #[test]
    fn fenced_analysis_json_parses() {
        let raw = "```json\n{\"updated_summary\": \"fenced\"}\n```";
        assert_eq!(parse_analysis_response(raw).updated_summary, "fenced");
    }

    #[test]
    fn malformed_analysis_degrades_to_raw_text() {
        let raw = "The meeting was mostly about hiring.";
        let result = parse_analysis_response(raw);
        assert_eq!(result.new_content, raw);
        assert_eq!(result.updated_summary, raw);
        assert!(result.key_points.is_empty());
    }

    #[test]
    fn passthrough_keeps_context_unchanged() {
        let result = AnalysisResult::passthrough("prior summary");
        assert_eq!(result.updated_summary, "prior summary");
        assert_eq!(result.new_content, "");
        assert!(result.decisions.is_empty());
    }

    #[test]
    fn continuation_prompt_embeds_context_verbatim() {
        let context = "Alice will demo the prototype on Friday.";
        let prompt = continuation_analysis_prompt(context);
        assert!(prompt.contains(context));
        assert!(prompt.starts_with("Previous conversation summary:"));
    }

    #[test]
    fn prompt_selection_branches_on_context_emptiness() {
        assert!(analysis_prompt("").starts_with("This is the start"));
        assert!(analysis_prompt("x").starts_with("Previous conversation summary:"));
    }

    #[test]
    fn transcript_parses_fenced_object() {
        let raw = "```json\n{\"language\":\"en\",\"transcript\":\"hi\"}\n```";
        let result = parse_transcript_response(raw);
        assert_eq!(result.language, "en");
        assert_eq!(result.transcript, "hi");
    }

    #[test]
    fn transcript_fallback_preserves_raw_text() {
        let result = parse_transcript_response("not json at all");
        assert_eq!(result.language, "unknown");
        assert_eq!(result.transcript, "not json at all");
    }

    #[test]
    fn transcript_missing_field_defaults_to_full_text() {
        let raw = r#"{"language": "fr"}"#;
        let result = parse_transcript_response(raw);
        assert_eq!(result.language, "fr");
        assert_eq!(result.transcript, raw);
    }
}
