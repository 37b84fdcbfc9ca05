use serde::Deserialize;
use tracing::warn;

use crate::types::{AnalysisMode, AnalysisRequest, AnalysisResult, ChangeKind, Impact};

const SYSTEM_PROMPT: &str = "\
You are a change analyst. You compare two versions of a piece of text \
(documentation, configuration, or code) and explain what changed and why it matters.

Rules:
- Describe only what the two versions actually show
- Do not speculate about intent you cannot see
- Prefer short, concrete statements

Respond with a JSON object:
{
  \"summary\": \"One sentence describing the change\",
  \"change_kind\": \"feature\" | \"fix\" | \"docs\" | \"refactor\" | \"security\" | \"breaking\" | \"cleanup\" | \"performance\" | \"test\" | \"config\",
  \"impact\": \"low\" | \"medium\" | \"high\",
  \"details\": \"Longer explanation (deep analysis only)\",
  \"risks\": [\"...\"],
  \"recommendations\": [\"...\"],
  \"confidence\": 0-100
}";

/// Characters of each version included in a prompt.
const MAX_SIDE_CHARS: usize = 6000;

/// Characters of an unparseable response kept as the summary.
const FALLBACK_SUMMARY_CHARS: usize = 200;

/// Confidence assigned when the response could not be parsed.
const FALLBACK_CONFIDENCE: f64 = 0.2;

/// Build the system prompt for the analysis model.
///
/// # Examples
///
/// ```
/// use lineage_analysis::prompt::build_system_prompt;
///
/// let prompt = build_system_prompt();
/// assert!(prompt.contains("JSON"));
/// ```
pub fn build_system_prompt() -> String {
    SYSTEM_PROMPT.to_string()
}

/// Build the user prompt holding both versions.
///
/// Brief mode asks for summary, kind, and impact only; deep mode asks for
/// every field.
///
/// # Examples
///
/// ```
/// use lineage_analysis::prompt::build_analysis_prompt;
/// use lineage_analysis::types::{AnalysisMode, AnalysisRequest};
///
/// let request = AnalysisRequest::new("old text", "new text", "README.md");
/// let prompt = build_analysis_prompt(&request, AnalysisMode::Deep);
/// assert!(prompt.contains("new text"));
/// assert!(prompt.contains("README.md"));
/// ```
pub fn build_analysis_prompt(request: &AnalysisRequest, mode: AnalysisMode) -> String {
    let mut prompt = match mode {
        AnalysisMode::Deep => String::from(
            "Analyze the following change in depth. Fill in every field, \
             including details, risks, and recommendations.\n",
        ),
        _ => String::from(
            "Briefly analyze the following change. Fill in summary, change_kind, \
             impact, and confidence; leave the other fields empty.\n",
        ),
    };
    if !request.context.is_empty() {
        prompt.push_str(&format!("\nContext: {}\n", request.context));
    }
    prompt.push_str(&format!(
        "\nBefore:\n```\n{}\n```\n\nAfter:\n```\n{}\n```\n",
        clip(&request.old_text, MAX_SIDE_CHARS),
        clip(&request.new_text, MAX_SIDE_CHARS)
    ));
    prompt
}

#[derive(Deserialize)]
struct ModelAnalysis {
    summary: Option<String>,
    change_kind: Option<String>,
    impact: Option<String>,
    details: Option<String>,
    #[serde(default)]
    risks: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    confidence: Option<serde_json::Value>,
}

/// Turn a model response into an [`AnalysisResult`].
///
/// Handles markdown code fences around JSON. Output that is not the
/// expected JSON degrades to a low-confidence result whose summary is the
/// start of the raw text, rather than an error.
///
/// # Examples
///
/// ```
/// use lineage_analysis::prompt::parse_analysis_response;
/// use lineage_analysis::types::Impact;
///
/// let json = r#"{"summary":"Adds install steps","impact":"medium","confidence":80}"#;
/// let result = parse_analysis_response(json, "ollama");
/// assert_eq!(result.impact, Impact::Medium);
/// assert!((result.confidence - 0.8).abs() < 1e-9);
/// ```
pub fn parse_analysis_response(response: &str, provider: &str) -> AnalysisResult {
    let cleaned = strip_code_fences(response);

    let parsed: ModelAnalysis = match serde_json::from_str(cleaned) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "failed to parse model response");
            let mut result = AnalysisResult::new(clip(cleaned, FALLBACK_SUMMARY_CHARS), provider);
            result.confidence = FALLBACK_CONFIDENCE;
            return result;
        }
    };

    let confidence = match &parsed.confidence {
        Some(serde_json::Value::Number(n)) => {
            let v = n.as_f64().unwrap_or(0.0);
            let v = if v > 1.0 { v / 100.0 } else { v };
            v.clamp(0.0, 1.0)
        }
        _ => 0.5,
    };

    AnalysisResult {
        summary: parsed
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "No summary provided".to_string()),
        change_kind: parsed
            .change_kind
            .as_deref()
            .map_or(ChangeKind::Unknown, ChangeKind::parse_loose),
        impact: parsed
            .impact
            .as_deref()
            .map_or(Impact::Low, Impact::parse_loose),
        details: parsed.details.filter(|d| !d.trim().is_empty()),
        risks: parsed.risks,
        recommendations: parsed.recommendations,
        confidence,
        provider: provider.to_string(),
    }
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

/// First `max` characters of `s`, never splitting a character.
fn clip(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brief_prompt_limits_fields() {
        let request = AnalysisRequest::new("a", "b", "");
        let prompt = build_analysis_prompt(&request, AnalysisMode::Brief);
        assert!(prompt.contains("Briefly"));
        assert!(!prompt.contains("Context:"));
    }

    #[test]
    fn long_sides_are_clipped() {
        let long = "x".repeat(MAX_SIDE_CHARS + 100);
        let request = AnalysisRequest::new(long.clone(), long, "");
        let prompt = build_analysis_prompt(&request, AnalysisMode::Deep);
        assert!(prompt.len() < 2 * MAX_SIDE_CHARS + 500);
    }

    #[test]
    fn parse_full_response() {
        let json = r#"{
            "summary": "Tightens token handling",
            "change_kind": "security",
            "impact": "high",
            "details": "Tokens are no longer logged.",
            "risks": ["Old clients may still log tokens"],
            "recommendations": ["Rotate tokens"],
            "confidence": 0.9
        }"#;
        let result = parse_analysis_response(json, "openai");
        assert_eq!(result.change_kind, ChangeKind::Security);
        assert_eq!(result.impact, Impact::High);
        assert_eq!(result.risks.len(), 1);
        assert_eq!(result.details.as_deref(), Some("Tokens are no longer logged."));
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert_eq!(result.provider, "openai");
    }

    #[test]
    fn parse_with_code_fences() {
        let fenced = "```json\n{\"summary\":\"ok\"}\n```";
        let result = parse_analysis_response(fenced, "p");
        assert_eq!(result.summary, "ok");
    }

    #[test]
    fn malformed_degrades_to_low_confidence() {
        let result = parse_analysis_response("The change adds a paragraph.", "p");
        assert_eq!(result.summary, "The change adds a paragraph.");
        assert_eq!(result.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(result.change_kind, ChangeKind::Unknown);
    }

    #[test]
    fn confidence_is_clamped() {
        let result = parse_analysis_response(r#"{"summary":"s","confidence":150}"#, "p");
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé...");
        assert_eq!(clip("hi", 5), "hi");
    }
}
