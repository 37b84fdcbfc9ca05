use std::fmt;

use serde::{Deserialize, Serialize};

/// One version of a tracked document, as supplied by a version source.
///
/// The core never mutates versions; it only reads their body.
///
/// # Examples
///
/// ```
/// use lineage_core::{Version, VersionBody};
///
/// let v = Version::text("v1", 0, "# Title\n\nBody");
/// assert_eq!(v.id, "v1");
/// assert!(matches!(v.body, VersionBody::Text(_)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    /// Identifier (tag, commit hash, file stem).
    pub id: String,
    /// Position in the version sequence; lower is older.
    pub ordinal: u32,
    /// Full text, a diff against an earlier version, or nothing.
    pub body: VersionBody,
}

impl Version {
    /// Build a full-text version.
    pub fn text(id: impl Into<String>, ordinal: u32, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ordinal,
            body: VersionBody::Text(text.into()),
        }
    }

    /// Build a version described by a unified diff against `base`.
    pub fn diff(
        id: impl Into<String>,
        ordinal: u32,
        base: impl Into<String>,
        diff: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ordinal,
            body: VersionBody::Diff {
                base: base.into(),
                diff: diff.into(),
            },
        }
    }

    /// Build a version whose content could not be read.
    pub fn unavailable(id: impl Into<String>, ordinal: u32, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ordinal,
            body: VersionBody::Unavailable(reason.into()),
        }
    }
}

/// Content carried by a [`Version`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum VersionBody {
    /// Complete document text.
    Text(String),
    /// Unified diff from `base` to this version.
    Diff {
        /// Version the diff starts from.
        base: String,
        /// Unified diff text.
        diff: String,
    },
    /// The source could not provide content; the reason is kept for reporting.
    Unavailable(String),
}

/// Role of a line inside a diff hunk.
///
/// # Examples
///
/// ```
/// use lineage_core::LineTag;
///
/// assert_eq!(LineTag::from_marker('+'), Some(LineTag::Added));
/// assert_eq!(LineTag::from_marker('x'), None);
/// assert_eq!(LineTag::Removed.marker(), '-');
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineTag {
    /// Unchanged line present on both sides.
    Context,
    /// Line only in the new version.
    Added,
    /// Line only in the old version.
    Removed,
}

impl LineTag {
    /// Map a unified-diff line marker to a tag.
    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            ' ' => Some(LineTag::Context),
            '+' => Some(LineTag::Added),
            '-' => Some(LineTag::Removed),
            _ => None,
        }
    }

    /// The unified-diff marker for this tag.
    pub fn marker(self) -> char {
        match self {
            LineTag::Context => ' ',
            LineTag::Added => '+',
            LineTag::Removed => '-',
        }
    }
}

/// A diff line with its marker stripped and kept as a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedLine {
    /// Whether the line is context, added, or removed.
    pub tag: LineTag,
    /// Line text without the leading marker.
    pub text: String,
}

impl TaggedLine {
    /// Build a tagged line.
    pub fn new(tag: LineTag, text: impl Into<String>) -> Self {
        Self {
            tag,
            text: text.into(),
        }
    }
}

impl fmt::Display for TaggedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag.marker(), self.text)
    }
}

/// A single hunk from a unified diff.
///
/// Hunks are transient: the parser produces them and the tracker consumes
/// them immediately.
///
/// # Examples
///
/// ```
/// use lineage_core::{Hunk, LineTag, TaggedLine};
///
/// let hunk = Hunk {
///     old_start: 3,
///     old_count: 2,
///     new_start: 3,
///     new_count: 2,
///     heading: String::new(),
///     lines: vec![
///         TaggedLine::new(LineTag::Context, "keep"),
///         TaggedLine::new(LineTag::Removed, "old"),
///         TaggedLine::new(LineTag::Added, "new"),
///     ],
/// };
/// assert_eq!(hunk.added_lines(), vec!["new"]);
/// assert_eq!(hunk.removed_lines(), vec!["old"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    /// Starting line in the old version.
    pub old_start: u32,
    /// Number of lines in the old version.
    pub old_count: u32,
    /// Starting line in the new version.
    pub new_start: u32,
    /// Number of lines in the new version.
    pub new_count: u32,
    /// Text after the closing `@@`, trimmed (often a function or section name).
    pub heading: String,
    /// Body lines in order.
    pub lines: Vec<TaggedLine>,
}

impl Hunk {
    /// Texts of the added lines.
    pub fn added_lines(&self) -> Vec<&str> {
        self.lines_tagged(LineTag::Added)
    }

    /// Texts of the removed lines.
    pub fn removed_lines(&self) -> Vec<&str> {
        self.lines_tagged(LineTag::Removed)
    }

    fn lines_tagged(&self, tag: LineTag) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.tag == tag)
            .map(|l| l.text.as_str())
            .collect()
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )?;
        if !self.heading.is_empty() {
            write!(f, " {}", self.heading)?;
        }
        Ok(())
    }
}
