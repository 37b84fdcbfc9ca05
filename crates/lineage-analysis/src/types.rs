use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lineage_core::LineageError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Depth of an analysis. Also the `mode` half of a cache key.
///
/// # Examples
///
/// ```
/// use lineage_analysis::types::AnalysisMode;
///
/// assert_eq!(AnalysisMode::Brief.as_str(), "brief");
/// assert_eq!("deep".parse::<AnalysisMode>().unwrap(), AnalysisMode::Deep);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Local keyword and size heuristics, no external calls.
    #[default]
    Pattern,
    /// Short model-backed summary.
    Brief,
    /// Model-backed analysis with details, risks, and recommendations.
    Deep,
}

impl AnalysisMode {
    /// Lowercase name used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisMode::Pattern => "pattern",
            AnalysisMode::Brief => "brief",
            AnalysisMode::Deep => "deep",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pattern" => Ok(AnalysisMode::Pattern),
            "brief" => Ok(AnalysisMode::Brief),
            "deep" => Ok(AnalysisMode::Deep),
            other => Err(LineageError::Parse(format!("unknown analysis mode: {other}"))),
        }
    }
}

/// Identifies one logical analysis: a subject (region id, commit, any
/// caller-chosen string) at a given mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// What was analyzed.
    pub subject: String,
    /// How deeply.
    pub mode: AnalysisMode,
}

impl CacheKey {
    /// Build a key.
    pub fn new(subject: impl Into<String>, mode: AnalysisMode) -> Self {
        Self {
            subject: subject.into(),
            mode,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject, self.mode)
    }
}

/// Input handed to an analyzer.
///
/// # Examples
///
/// ```
/// use lineage_analysis::types::AnalysisRequest;
///
/// let a = AnalysisRequest::new("old", "new", "notes.md");
/// let b = AnalysisRequest::new("old", "new", "notes.md");
/// assert_eq!(a.fingerprint(), b.fingerprint());
/// assert_eq!(a.fingerprint().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    /// Content before the change.
    pub old_text: String,
    /// Content after the change.
    pub new_text: String,
    /// Free-form context: resource name, commit message, region snippet.
    pub context: String,
}

impl AnalysisRequest {
    /// Build a request.
    pub fn new(
        old_text: impl Into<String>,
        new_text: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            old_text: old_text.into(),
            new_text: new_text.into(),
            context: context.into(),
        }
    }

    /// SHA-256 of the three fields, usable as a cache subject when the
    /// caller has no natural identifier.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.old_text.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.new_text.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.context.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Broad category of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// New content or behavior.
    Feature,
    /// Correction of a defect.
    Fix,
    /// Documentation only.
    Docs,
    /// Restructuring without new behavior.
    Refactor,
    /// Touches authentication, secrets, or permissions.
    Security,
    /// Incompatible with what came before.
    Breaking,
    /// Mostly removal.
    Cleanup,
    /// Speed or memory related.
    Performance,
    /// Tests.
    Test,
    /// Configuration.
    Config,
    /// Could not be classified.
    #[default]
    Unknown,
}

impl ChangeKind {
    /// Lenient parse of a model-provided label. Unrecognized labels map to
    /// [`ChangeKind::Unknown`].
    pub fn parse_loose(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "feature" | "feat" | "addition" => ChangeKind::Feature,
            "fix" | "bugfix" | "bug fix" | "bug" => ChangeKind::Fix,
            "docs" | "doc" | "documentation" => ChangeKind::Docs,
            "refactor" | "refactoring" => ChangeKind::Refactor,
            "security" => ChangeKind::Security,
            "breaking" | "breaking change" => ChangeKind::Breaking,
            "cleanup" | "removal" => ChangeKind::Cleanup,
            "performance" | "perf" => ChangeKind::Performance,
            "test" | "tests" => ChangeKind::Test,
            "config" | "configuration" => ChangeKind::Config,
            _ => ChangeKind::Unknown,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Feature => "Feature",
            ChangeKind::Fix => "Fix",
            ChangeKind::Docs => "Docs",
            ChangeKind::Refactor => "Refactor",
            ChangeKind::Security => "Security",
            ChangeKind::Breaking => "Breaking",
            ChangeKind::Cleanup => "Cleanup",
            ChangeKind::Performance => "Performance",
            ChangeKind::Test => "Test",
            ChangeKind::Config => "Config",
            ChangeKind::Unknown => "Change",
        };
        f.write_str(label)
    }
}

/// How much a change matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    /// Small or cosmetic.
    #[default]
    Low,
    /// Noticeable.
    Medium,
    /// Large or risky.
    High,
}

impl Impact {
    /// Lenient parse of a model-provided label.
    pub fn parse_loose(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "high" | "critical" | "major" => Impact::High,
            "medium" | "moderate" => Impact::Medium,
            _ => Impact::Low,
        }
    }
}

/// What an analyzer returns. Stored as the cache payload.
///
/// # Examples
///
/// ```
/// use lineage_analysis::types::{AnalysisResult, ChangeKind};
///
/// let result = AnalysisResult::new("Adds a section", "heuristic");
/// assert_eq!(result.change_kind, ChangeKind::Unknown);
/// assert!(result.risks.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// One-line description.
    pub summary: String,
    /// Category.
    #[serde(default)]
    pub change_kind: ChangeKind,
    /// Severity.
    #[serde(default)]
    pub impact: Impact,
    /// Longer explanation (deep mode).
    #[serde(default)]
    pub details: Option<String>,
    /// Things that could go wrong.
    #[serde(default)]
    pub risks: Vec<String>,
    /// Suggested follow-ups.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// 0.0–1.0.
    #[serde(default)]
    pub confidence: f64,
    /// Name of the analyzer that produced this.
    pub provider: String,
}

impl AnalysisResult {
    /// A result with only a summary and a provider.
    pub fn new(summary: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            change_kind: ChangeKind::Unknown,
            impact: Impact::Low,
            details: None,
            risks: Vec::new(),
            recommendations: Vec::new(),
            confidence: 0.5,
            provider: provider.into(),
        }
    }
}

/// A stored analysis. Rows are immutable; re-analysis adds a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRow {
    /// Subject and mode.
    pub key: CacheKey,
    /// 1 for the first row of a key, then +1 per `put`.
    pub version: i64,
    /// The stored result.
    pub payload: AnalysisResult,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [AnalysisMode::Pattern, AnalysisMode::Brief, AnalysisMode::Deep] {
            assert_eq!(mode.as_str().parse::<AnalysisMode>().unwrap(), mode);
        }
        assert!("shallow".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn fingerprint_separates_fields() {
        let a = AnalysisRequest::new("ab", "c", "");
        let b = AnalysisRequest::new("a", "bc", "");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn cache_key_display() {
        let key = CacheKey::new("abc123", AnalysisMode::Deep);
        assert_eq!(key.to_string(), "abc123:deep");
    }

    #[test]
    fn loose_labels() {
        assert_eq!(ChangeKind::parse_loose(" Bug Fix "), ChangeKind::Fix);
        assert_eq!(ChangeKind::parse_loose("whatever"), ChangeKind::Unknown);
        assert_eq!(Impact::parse_loose("Moderate"), Impact::Medium);
        assert_eq!(Impact::parse_loose(""), Impact::Low);
    }

    #[test]
    fn result_tolerates_missing_fields() {
        let json = r#"{"summary":"s","provider":"p"}"#;
        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.impact, Impact::Low);
        assert!(result.details.is_none());
    }
}
