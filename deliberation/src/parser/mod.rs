//! Structured output parsing — turns free-form model text into a
//! validated, typed phase payload.
//!
//! Extraction policy, in order:
//! 1. the first fenced JSON block (triple backticks, optional tag)
//! 2. the entire body parsed as JSON
//! 3. the first balanced-braces object found in the text

pub mod schemas;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use schemas::{AnalysisPayload, CritiquePayload, PhaseOutput, SynthesisPayload};

use crate::session::records::Phase;

/// Parse failure carrying the offending raw text for diagnostics and
/// strict-JSON reprompting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseError {
    pub reason: String,
    pub raw: String,
}

impl ParseError {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error: {}", self.reason)
    }
}

impl std::error::Error for ParseError {}

/// Extract the first JSON value from model text using the three-step
/// fallback policy.
pub fn extract_json(text: &str) -> Result<serde_json::Value, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::new("empty output", text));
    }

    // 1. Fenced block.
    if let Some(block) = first_fenced_block(trimmed) {
        match serde_json::from_str(block.trim()) {
            Ok(value) => return Ok(value),
            Err(e) => {
                // A fence was present but unparseable; fall through to the
                // permissive extractors before giving up.
                tracing::debug!(error = %e, "fenced block did not parse as JSON");
            }
        }
    }

    // 2. Whole body.
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // 3. First balanced-braces object.
    if let Some(candidate) = first_balanced_object(trimmed) {
        if let Ok(value) = serde_json::from_str(candidate) {
            return Ok(value);
        }
    }

    Err(ParseError::new("no parseable JSON object found", text))
}

/// Parse and validate model text against the schema for `phase`.
pub fn parse_phase(phase: Phase, text: &str) -> Result<PhaseOutput, ParseError> {
    let value = extract_json(text)?;
    let output = match phase {
        Phase::Analyze => serde_json::from_value::<AnalysisPayload>(value)
            .map(PhaseOutput::Analysis)
            .map_err(|e| ParseError::new(format!("analysis schema: {}", e), text))?,
        Phase::Critique => serde_json::from_value::<CritiquePayload>(value)
            .map(PhaseOutput::Critique)
            .map_err(|e| ParseError::new(format!("critique schema: {}", e), text))?,
        Phase::Synthesize => serde_json::from_value::<SynthesisPayload>(value)
            .map(PhaseOutput::Synthesis)
            .map_err(|e| ParseError::new(format!("synthesis schema: {}", e), text))?,
    };
    output
        .validate()
        .map_err(|reason| ParseError::new(reason, text))?;
    Ok(output)
}

/// Content of the first triple-backtick fence, if any.
fn first_fenced_block(text: &str) -> Option<&str> {
    // Lazy-compiled per call is fine here; parsing is not on a hot path.
    let fence = Regex::new(r"(?s)```[a-zA-Z]*\r?\n(.*?)```").expect("static regex");
    fence.captures(text).map(|c| c.get(1).unwrap().as_str())
}

/// The first balanced `{ ... }` span, honoring strings and escapes.
fn first_balanced_object(text: &str) -> Option<&str> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here is my analysis:\n```json\n{\"confidence\": 0.8}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["confidence"], 0.8);
    }

    #[test]
    fn test_extract_fenced_without_tag() {
        let text = "```\n{\"score\": 7}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["score"], 7);
    }

    #[test]
    fn test_extract_whole_body() {
        let value = extract_json("{\"summary\": \"ok\"}").unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn test_extract_embedded_object() {
        let text = "I think the answer is {\"analysis\": \"solid\", \"confidence\": 0.6} overall.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["confidence"], 0.6);
    }

    #[test]
    fn test_balanced_braces_inside_strings() {
        let text = "prefix {\"note\": \"a } inside\", \"n\": 1} suffix";
        let value = extract_json(text).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_extract_nested_objects() {
        let text = "out {\"a\": {\"b\": 2}} trailing { junk";
        let value = extract_json(text).unwrap();
        assert_eq!(value["a"]["b"], 2);
    }

    #[test]
    fn test_empty_output_fails() {
        let err = extract_json("   ").unwrap_err();
        assert!(err.reason.contains("empty"));
    }

    #[test]
    fn test_prose_only_fails_with_raw() {
        let err = extract_json("Let me think about this carefully.").unwrap_err();
        assert!(err.raw.contains("carefully"));
    }

    #[test]
    fn test_bad_fence_falls_through_to_embedded() {
        // Fence contains prose, but a valid object follows it.
        let text = "```\nnot json\n```\nresult: {\"x\": 1}";
        let value = extract_json(text).unwrap();
        assert_eq!(value["x"], 1);
    }

    #[test]
    fn test_parse_phase_analysis() {
        let text = r#"{"analysis": "detail", "confidence": 0.7, "key_points": ["a"], "risks": [], "assumptions": []}"#;
        match parse_phase(Phase::Analyze, text).unwrap() {
            PhaseOutput::Analysis(payload) => {
                assert_eq!(payload.confidence, Some(0.7));
                assert_eq!(payload.key_points, vec!["a"]);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_phase_rejects_out_of_domain() {
        let text = r#"{"analysis": "detail", "confidence": 1.5}"#;
        let err = parse_phase(Phase::Analyze, text).unwrap_err();
        assert!(err.reason.contains("confidence"));
    }

    #[test]
    fn test_parse_phase_critique() {
        let text = r#"{"critique": "weak evidence", "score": 6.5, "weaknesses": ["w"], "strengths": ["s"]}"#;
        match parse_phase(Phase::Critique, text).unwrap() {
            PhaseOutput::Critique(payload) => assert_eq!(payload.score, 6.5),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_phase_critique_score_bounds() {
        let text = r#"{"critique": "x", "score": 11.0}"#;
        assert!(parse_phase(Phase::Critique, text).is_err());
    }

    #[test]
    fn test_parse_phase_synthesis() {
        let text = r#"{
            "summary": "the market entry is viable",
            "conclusions": [{"statement": "viable", "probability": 0.8}],
            "recommendations": ["start small"],
            "consensus_level": 0.85
        }"#;
        match parse_phase(Phase::Synthesize, text).unwrap() {
            PhaseOutput::Synthesis(payload) => {
                assert_eq!(payload.consensus_level, 0.85);
                assert_eq!(payload.conclusions.len(), 1);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_phase_missing_required_field() {
        // Critique without a score fails at the schema step.
        let text = r#"{"critique": "text only"}"#;
        let err = parse_phase(Phase::Critique, text).unwrap_err();
        assert!(err.reason.contains("critique schema"));
    }
}
