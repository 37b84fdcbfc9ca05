//! Read-only access to version content.
//!
//! The tracker consumes one of two shapes: full text per version, or a
//! unified diff between two refs for one path. Sources never write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lineage_core::{LineageError, Version};
use tracing::warn;

/// Provides the full text of a version.
pub trait TextSource {
    /// Full text of `version_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::MissingVersion`] when the content is unavailable.
    fn full_text(&self, version_id: &str) -> Result<String, LineageError>;
}

/// Provides unified-diff text between two refs for one path.
pub trait DiffSource {
    /// Unified diff of `path` from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::MissingVersion`] when either side is unavailable.
    fn diff_text(&self, from: &str, to: &str, path: &str) -> Result<String, LineageError>;
}

/// In-memory source holding texts and diffs, supporting both shapes.
///
/// # Examples
///
/// ```
/// use lineage_regions::source::{MemorySource, TextSource};
///
/// let mut source = MemorySource::new();
/// source.insert_text("v1", "hello");
/// assert_eq!(source.full_text("v1").unwrap(), "hello");
/// assert!(source.full_text("v2").is_err());
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    texts: HashMap<String, String>,
    diffs: HashMap<(String, String, String), String>,
}

impl MemorySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the full text of a version.
    pub fn insert_text(&mut self, version_id: impl Into<String>, text: impl Into<String>) {
        self.texts.insert(version_id.into(), text.into());
    }

    /// Store the diff of `path` between two refs.
    pub fn insert_diff(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        path: impl Into<String>,
        diff: impl Into<String>,
    ) {
        self.diffs
            .insert((from.into(), to.into(), path.into()), diff.into());
    }
}

impl TextSource for MemorySource {
    fn full_text(&self, version_id: &str) -> Result<String, LineageError> {
        self.texts
            .get(version_id)
            .cloned()
            .ok_or_else(|| LineageError::MissingVersion {
                version: version_id.to_string(),
                reason: "not present in memory source".into(),
            })
    }
}

impl DiffSource for MemorySource {
    fn diff_text(&self, from: &str, to: &str, path: &str) -> Result<String, LineageError> {
        let key = (from.to_string(), to.to_string(), path.to_string());
        self.diffs
            .get(&key)
            .cloned()
            .ok_or_else(|| LineageError::MissingVersion {
                version: format!("{from}..{to}"),
                reason: format!("no diff recorded for {path}"),
            })
    }
}

/// Reads each version from `<dir>/<version>.<extension>`.
///
/// # Examples
///
/// ```no_run
/// use lineage_regions::source::{DirectorySource, TextSource};
///
/// let source = DirectorySource::new("docs/versions");
/// let text = source.full_text("v1").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    extension: String,
}

impl DirectorySource {
    /// Source over `.txt` files in `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            extension: "txt".into(),
        }
    }

    /// Use a different file extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    fn path_for(&self, version_id: &str) -> PathBuf {
        self.dir.join(format!("{version_id}.{}", self.extension))
    }
}

impl TextSource for DirectorySource {
    fn full_text(&self, version_id: &str) -> Result<String, LineageError> {
        let path = self.path_for(version_id);
        std::fs::read_to_string(&path).map_err(|e| LineageError::MissingVersion {
            version: version_id.to_string(),
            reason: format!("failed to read {}: {e}", path.display()),
        })
    }
}

/// Load `ids` in order, turning unreadable versions into
/// [`lineage_core::VersionBody::Unavailable`] instead of failing.
pub fn load_versions(source: &dyn TextSource, ids: &[&str]) -> Vec<Version> {
    ids.iter()
        .enumerate()
        .map(|(ordinal, id)| match source.full_text(id) {
            Ok(text) => Version::text(*id, ordinal as u32, text),
            Err(e) => {
                warn!(version = id, error = %e, "version unavailable");
                Version::unavailable(*id, ordinal as u32, e.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_core::VersionBody;

    #[test]
    fn load_versions_marks_missing_as_unavailable() {
        let mut source = MemorySource::new();
        source.insert_text("v1", "one");
        source.insert_text("v3", "three");

        let versions = load_versions(&source, &["v1", "v2", "v3"]);
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[1].ordinal, 1);
        assert!(matches!(versions[0].body, VersionBody::Text(_)));
        assert!(matches!(versions[1].body, VersionBody::Unavailable(_)));
        assert!(matches!(versions[2].body, VersionBody::Text(_)));
    }

    #[test]
    fn directory_source_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v1.txt"), "first").unwrap();
        std::fs::write(dir.path().join("v1.md"), "markdown").unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.full_text("v1").unwrap(), "first");

        let md = DirectorySource::new(dir.path()).with_extension("md");
        assert_eq!(md.full_text("v1").unwrap(), "markdown");
    }

    #[test]
    fn directory_source_missing_file_is_missing_version() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path());
        let err = source.full_text("nope").unwrap_err();
        assert!(matches!(err, LineageError::MissingVersion { .. }));
    }

    #[test]
    fn memory_diff_lookup() {
        let mut source = MemorySource::new();
        source.insert_diff("a", "b", "doc.md", "@@ -1 +1 @@\n-x\n+y\n");
        assert!(source.diff_text("a", "b", "doc.md").is_ok());
        assert!(source.diff_text("b", "a", "doc.md").is_err());
    }
}
