//! The analyzer seam and the offline heuristic implementation.

use std::collections::HashSet;

use lineage_core::LineageError;

use crate::types::{AnalysisMode, AnalysisRequest, AnalysisResult, ChangeKind, Impact};

/// Produces an [`AnalysisResult`] for a change.
///
/// Implementations are opaque blocking calls. The queue runs them on a
/// helper thread and bounds them with a timeout, so they need not enforce
/// one themselves. `status` receives human-readable progress messages.
pub trait Analyzer: Send + Sync {
    /// Provider name recorded with cached results.
    fn name(&self) -> &str;

    /// Analyze one change.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Analyzer`] (or any other variant) when the
    /// analysis cannot be produced.
    fn analyze(
        &self,
        request: &AnalysisRequest,
        mode: AnalysisMode,
        status: &dyn Fn(&str),
    ) -> Result<AnalysisResult, LineageError>;
}

const SECURITY_WORDS: &[&str] = &[
    "security",
    "vuln",
    "cve",
    "auth",
    "password",
    "token",
    "secret",
    "permission",
];

const BREAKING_WORDS: &[&str] = &[
    "breaking change",
    "incompatible",
    "deprecated",
    "major version",
    "api change",
];

const PERFORMANCE_WORDS: &[&str] = &[
    "performance",
    "optimiz",
    "slow",
    "memory leak",
    "caching",
];

const FIX_WORDS: &[&str] = &["fix", "bug", "patch", "hotfix"];

const DOC_SUFFIXES: &[&str] = &[".md", ".rst", ".txt", ".adoc"];

/// Changed lines above which a change counts as high impact.
const HIGH_IMPACT_LINES: usize = 50;
/// Changed lines above which a change counts as medium impact.
const MEDIUM_IMPACT_LINES: usize = 10;

/// Keyword and size heuristics. Never calls out of process.
///
/// # Examples
///
/// ```
/// use lineage_analysis::analyzer::{Analyzer, HeuristicAnalyzer};
/// use lineage_analysis::types::{AnalysisMode, AnalysisRequest, ChangeKind};
///
/// let request = AnalysisRequest::new("", "new paragraph", "notes");
/// let result = HeuristicAnalyzer
///     .analyze(&request, AnalysisMode::Pattern, &|_: &str| {})
///     .unwrap();
/// assert_eq!(result.change_kind, ChangeKind::Feature);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

impl Analyzer for HeuristicAnalyzer {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn analyze(
        &self,
        request: &AnalysisRequest,
        mode: AnalysisMode,
        status: &dyn Fn(&str),
    ) -> Result<AnalysisResult, LineageError> {
        status("comparing lines");
        let old: HashSet<&str> = non_blank(&request.old_text).collect();
        let new: HashSet<&str> = non_blank(&request.new_text).collect();
        let added: Vec<&str> = non_blank(&request.new_text)
            .filter(|l| !old.contains(l))
            .collect();
        let removed: Vec<&str> = non_blank(&request.old_text)
            .filter(|l| !new.contains(l))
            .collect();

        status("matching keywords");
        let haystack = format!("{}\n{}", added.join("\n"), request.context).to_lowercase();
        let security = mentions(&haystack, SECURITY_WORDS);
        let breaking = mentions(&haystack, BREAKING_WORDS);
        let performance = mentions(&haystack, PERFORMANCE_WORDS);

        let change_kind = if breaking {
            ChangeKind::Breaking
        } else if security {
            ChangeKind::Security
        } else if performance {
            ChangeKind::Performance
        } else if mentions(&request.context.to_lowercase(), FIX_WORDS) {
            ChangeKind::Fix
        } else if DOC_SUFFIXES.iter().any(|s| request.context.ends_with(s)) {
            ChangeKind::Docs
        } else {
            match (added.is_empty(), removed.is_empty()) {
                (true, true) => ChangeKind::Unknown,
                (false, true) => ChangeKind::Feature,
                (true, false) => ChangeKind::Cleanup,
                (false, false) => ChangeKind::Refactor,
            }
        };

        let changed = added.len() + removed.len();
        let mut impact = if changed > HIGH_IMPACT_LINES {
            Impact::High
        } else if changed > MEDIUM_IMPACT_LINES {
            Impact::Medium
        } else {
            Impact::Low
        };
        if breaking || security {
            impact = Impact::High;
        }

        let mut risks = Vec::new();
        let mut recommendations = Vec::new();
        if breaking {
            risks.push("Change may break existing consumers".to_string());
            recommendations.push("Document the incompatibility and migration path".to_string());
        }
        if security {
            risks.push("Touches security-sensitive content".to_string());
            recommendations.push("Have the change reviewed for secret or permission handling".to_string());
        }
        if performance {
            risks.push("May affect performance characteristics".to_string());
        }
        if changed > HIGH_IMPACT_LINES {
            recommendations.push("Consider splitting the change into smaller steps".to_string());
        }

        let details = (mode == AnalysisMode::Deep).then(|| {
            format!(
                "{} line(s) added, {} removed, {} unchanged",
                added.len(),
                removed.len(),
                new.len().saturating_sub(added.len())
            )
        });

        Ok(AnalysisResult {
            summary: format!(
                "{change_kind}: {} line(s) added, {} removed",
                added.len(),
                removed.len()
            ),
            change_kind,
            impact,
            details,
            risks,
            recommendations,
            confidence: 0.6,
            provider: self.name().to_string(),
        })
    }
}

fn non_blank(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim_end).filter(|l| !l.trim().is_empty())
}

fn mentions(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(old: &str, new: &str, context: &str, mode: AnalysisMode) -> AnalysisResult {
        HeuristicAnalyzer
            .analyze(&AnalysisRequest::new(old, new, context), mode, &|_: &str| {})
            .unwrap()
    }

    #[test]
    fn pure_removal_is_cleanup() {
        let result = run("a\nb", "", "notes", AnalysisMode::Pattern);
        assert_eq!(result.change_kind, ChangeKind::Cleanup);
        assert_eq!(result.impact, Impact::Low);
    }

    #[test]
    fn security_words_raise_impact() {
        let result = run("x", "x\nrotate the API token", "config", AnalysisMode::Pattern);
        assert_eq!(result.change_kind, ChangeKind::Security);
        assert_eq!(result.impact, Impact::High);
        assert!(!result.risks.is_empty());
    }

    #[test]
    fn breaking_beats_security() {
        let result = run("", "breaking change to auth", "", AnalysisMode::Pattern);
        assert_eq!(result.change_kind, ChangeKind::Breaking);
    }

    #[test]
    fn docs_by_context_suffix() {
        let result = run("a", "b", "guide.md", AnalysisMode::Brief);
        assert_eq!(result.change_kind, ChangeKind::Docs);
    }

    #[test]
    fn deep_mode_adds_details() {
        assert!(run("a", "b", "", AnalysisMode::Pattern).details.is_none());
        let deep = run("a", "b", "", AnalysisMode::Deep);
        assert_eq!(deep.details.as_deref(), Some("1 line(s) added, 1 removed, 0 unchanged"));
    }

    #[test]
    fn large_change_is_high_impact() {
        let new: String = (0..60).map(|i| format!("line {i}\n")).collect();
        let result = run("", &new, "", AnalysisMode::Pattern);
        assert_eq!(result.impact, Impact::High);
        assert_eq!(result.recommendations.len(), 1);
    }

    #[test]
    fn status_messages_are_reported() {
        let seen = std::cell::RefCell::new(Vec::new());
        HeuristicAnalyzer
            .analyze(
                &AnalysisRequest::new("a", "b", ""),
                AnalysisMode::Pattern,
                &|msg: &str| seen.borrow_mut().push(msg.to_string()),
            )
            .unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }
}
