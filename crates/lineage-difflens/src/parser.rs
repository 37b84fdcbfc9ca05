use std::fmt;
use std::path::PathBuf;

use lineage_core::{Hunk, LineTag, LineageError, TaggedLine};
use tracing::debug;

/// A complete diff for a single file, containing one or more hunks.
///
/// # Examples
///
/// ```
/// use lineage_difflens::parser::split_files;
///
/// let diff = "diff --git a/notes.md b/notes.md\n\
///             --- a/notes.md\n\
///             +++ b/notes.md\n\
///             @@ -1,2 +1,3 @@\n\
///              # Notes\n\
///             +first point\n\
///              end\n";
/// let files = split_files(diff);
/// assert_eq!(files.len(), 1);
/// assert_eq!(files[0].hunks.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct FileDiff {
    /// Path in the old version.
    pub old_path: PathBuf,
    /// Path in the new version.
    pub new_path: PathBuf,
    /// Parsed hunks for this file.
    pub hunks: Vec<Hunk>,
    /// Whether this is a newly created file.
    pub is_new_file: bool,
    /// Whether this file was deleted.
    pub is_deleted_file: bool,
    /// Whether this file was renamed.
    pub is_rename: bool,
}

impl FileDiff {
    fn empty() -> Self {
        Self {
            old_path: PathBuf::new(),
            new_path: PathBuf::new(),
            hunks: Vec::new(),
            is_new_file: false,
            is_deleted_file: false,
            is_rename: false,
        }
    }

    /// The path regions of this file are tracked under.
    ///
    /// Deleted files keep their old path; everything else uses the new one.
    pub fn resource(&self) -> String {
        let path = if self.is_deleted_file {
            &self.old_path
        } else {
            &self.new_path
        };
        path.to_string_lossy().into_owned()
    }
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} hunks)",
            self.new_path.display(),
            self.hunks.len()
        )
    }
}

/// Parse the hunks of a unified diff for one resource.
///
/// Lines before the first `@@` header (file headers, index lines) are
/// ignored. Every line after a header up to the next header or the end of
/// input belongs to that hunk, tagged by its leading `+`, `-` or space.
/// Counts omitted from a header default to 1.
///
/// This never fails: a malformed header is skipped together with the body
/// lines that follow it, and empty input yields an empty list.
///
/// # Examples
///
/// ```
/// use lineage_difflens::parser::parse_hunks;
///
/// let hunks = parse_hunks("@@ -5 +5 @@\n-old\n+new\n");
/// assert_eq!(hunks.len(), 1);
/// assert_eq!(hunks[0].old_count, 1);
/// assert_eq!(hunks[0].new_count, 1);
///
/// assert!(parse_hunks("").is_empty());
/// ```
pub fn parse_hunks(input: &str) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in input.lines() {
        if line.starts_with("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            match parse_hunk_header(line) {
                Ok(header) => {
                    current = Some(Hunk {
                        old_start: header.old_start,
                        old_count: header.old_count,
                        new_start: header.new_start,
                        new_count: header.new_count,
                        heading: header.heading,
                        lines: Vec::new(),
                    });
                }
                Err(e) => debug!(error = %e, "skipping malformed hunk header"),
            }
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            continue;
        };

        if line.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        }

        // Some tools strip the single space of an empty context line.
        if line.is_empty() {
            hunk.lines.push(TaggedLine::new(LineTag::Context, ""));
            continue;
        }

        let mut chars = line.chars();
        let tag = chars.next().and_then(LineTag::from_marker);
        match tag {
            Some(tag) => hunk.lines.push(TaggedLine::new(tag, chars.as_str())),
            None => debug!(line, "ignoring untagged line inside hunk"),
        }
    }

    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }

    hunks
}

/// Split a multi-file unified diff (as produced by `git diff`) into per-file
/// [`FileDiff`] entries.
///
/// A file starts at a `diff --git` line, or at a `--- ` line directly
/// followed by a `+++ ` line for patches without git headers. Binary files
/// are skipped.
///
/// # Examples
///
/// ```
/// use lineage_difflens::parser::split_files;
///
/// assert!(split_files("").is_empty());
/// ```
pub fn split_files(input: &str) -> Vec<FileDiff> {
    let lines: Vec<&str> = input.lines().collect();
    let mut files = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut body = String::new();
    let mut in_header = false;
    let mut is_binary = false;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let next = lines.get(i + 1).copied().unwrap_or("");
        i += 1;

        let starts_file = line.starts_with("diff --git ")
            || (!in_header && line.starts_with("--- ") && next.starts_with("+++ "));
        if starts_file {
            finish_file(&mut files, current.take(), &body, is_binary);
            body.clear();
            is_binary = false;
            in_header = true;
            current = Some(FileDiff::empty());
            if line.starts_with("diff --git ") {
                continue;
            }
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if in_header {
            if line.starts_with("@@") {
                in_header = false;
            } else {
                apply_header_line(file, line, &mut is_binary);
                continue;
            }
        }

        body.push_str(line);
        body.push('\n');
    }

    finish_file(&mut files, current.take(), &body, is_binary);
    files
}

fn apply_header_line(file: &mut FileDiff, line: &str, is_binary: &mut bool) {
    if line.starts_with("Binary files ") && line.ends_with(" differ") {
        *is_binary = true;
    } else if line.starts_with("new file mode") {
        file.is_new_file = true;
    } else if line.starts_with("deleted file mode") {
        file.is_deleted_file = true;
    } else if line.starts_with("rename from ") || line.starts_with("rename to ") {
        file.is_rename = true;
    } else if let Some(path) = line.strip_prefix("--- ") {
        file.old_path = parse_path(path);
        if path == "/dev/null" {
            file.is_new_file = true;
        }
    } else if let Some(path) = line.strip_prefix("+++ ") {
        file.new_path = parse_path(path);
        if path == "/dev/null" {
            file.is_deleted_file = true;
        }
    }
}

fn finish_file(files: &mut Vec<FileDiff>, file: Option<FileDiff>, body: &str, is_binary: bool) {
    let Some(mut file) = file else {
        return;
    };
    if is_binary {
        debug!(path = %file.new_path.display(), "skipping binary file");
        return;
    }
    file.hunks = parse_hunks(body);
    files.push(file);
}

fn parse_path(raw: &str) -> PathBuf {
    let normalized = raw.trim_matches('"');

    if normalized == "/dev/null" {
        return PathBuf::from("/dev/null");
    }

    let stripped = normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized);

    PathBuf::from(stripped)
}

struct HunkHeader {
    old_start: u32,
    old_count: u32,
    new_start: u32,
    new_count: u32,
    heading: String,
}

fn parse_hunk_header(line: &str) -> Result<HunkHeader, LineageError> {
    let (inner, heading) = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some((&s[..end], &s[end + 3..]))
        })
        .ok_or_else(|| LineageError::Parse(format!("invalid hunk header: {line}")))?;

    let parts: Vec<&str> = inner.split(' ').collect();
    if parts.len() != 2 {
        return Err(LineageError::Parse(format!("invalid hunk header: {line}")));
    }

    let old = parts[0]
        .strip_prefix('-')
        .ok_or_else(|| LineageError::Parse(format!("invalid old range in hunk: {line}")))?;
    let new = parts[1]
        .strip_prefix('+')
        .ok_or_else(|| LineageError::Parse(format!("invalid new range in hunk: {line}")))?;

    let (old_start, old_count) = parse_range(old, line)?;
    let (new_start, new_count) = parse_range(new, line)?;

    Ok(HunkHeader {
        old_start,
        old_count,
        new_start,
        new_count,
        heading: heading.trim().to_string(),
    })
}

fn parse_range(range: &str, context: &str) -> Result<(u32, u32), LineageError> {
    if let Some((start, count)) = range.split_once(',') {
        let s = start
            .parse()
            .map_err(|_| LineageError::Parse(format!("invalid range number in: {context}")))?;
        let c = count
            .parse()
            .map_err(|_| LineageError::Parse(format!("invalid range count in: {context}")))?;
        Ok((s, c))
    } else {
        let s = range
            .parse()
            .map_err(|_| LineageError::Parse(format!("invalid range number in: {context}")))?;
        Ok((s, 1))
    }
}
