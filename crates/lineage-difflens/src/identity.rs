//! Content-hash identity for regions.
//!
//! A region id is `SHA1(context || 0x00 || signature)`, where the context is
//! the resource name and the signature is the region's lines with diff
//! markers stripped, joined by `\n`. Because markers are stripped, the same
//! text hashes identically whether it shows up as context, addition, or
//! removal.
//!
//! The signature is the literal text of the whole slice, so any edit inside
//! it yields a new id. An edited region is therefore observed as the old id
//! going away and a new id appearing.

use std::fmt;

use lineage_core::Hunk;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Hex-encoded SHA-1 identity of a region.
///
/// # Examples
///
/// ```
/// use lineage_difflens::identity::region_id;
///
/// let a = region_id("notes.md", &["hello", "world"]);
/// let b = region_id("notes.md", &["hello", "world"]);
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 40);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    /// Wrap an already computed hex digest (e.g. loaded from storage).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs and listings.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical signature: lines joined by newline.
pub fn signature<S: AsRef<str>>(lines: &[S]) -> String {
    let mut sig = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            sig.push('\n');
        }
        sig.push_str(line.as_ref());
    }
    sig
}

/// Identity of a slice of already-unmarked lines under `context`.
pub fn region_id<S: AsRef<str>>(context: &str, lines: &[S]) -> RegionId {
    digest(context, &signature(lines))
}

/// Identity of a diff hunk: every body line, tag markers stripped.
///
/// # Examples
///
/// ```
/// use lineage_core::{Hunk, LineTag, TaggedLine};
/// use lineage_difflens::identity::{hunk_region_id, region_id};
///
/// let hunk = Hunk {
///     old_start: 1, old_count: 1, new_start: 1, new_count: 2,
///     heading: String::new(),
///     lines: vec![
///         TaggedLine::new(LineTag::Context, "intro"),
///         TaggedLine::new(LineTag::Added, "detail"),
///     ],
/// };
/// assert_eq!(hunk_region_id("doc.md", &hunk), region_id("doc.md", &["intro", "detail"]));
/// ```
pub fn hunk_region_id(context: &str, hunk: &Hunk) -> RegionId {
    let lines: Vec<&str> = hunk.lines.iter().map(|l| l.text.as_str()).collect();
    region_id(context, &lines)
}

fn digest(context: &str, signature: &str) -> RegionId {
    let mut hasher = Sha1::new();
    hasher.update(context.as_bytes());
    hasher.update([0u8]);
    hasher.update(signature.as_bytes());
    RegionId(format!("{:x}", hasher.finalize()))
}
