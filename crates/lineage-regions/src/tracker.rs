//! Folds a version sequence into the region store.
//!
//! Two input shapes are supported. Full-text versions are chunked and
//! aligned pairwise with the previous readable text version using an LCS
//! diff over chunk sequences. Diff versions are parsed into hunks and each
//! hunk becomes one region. Every version yields a [`VersionOutcome`]; a
//! bad version never aborts the batch.
//!
//! A chunk whose id appears on both sides of a step keeps its region
//! untouched, wherever it moved to. An unavailable version contributes a
//! placeholder region of its own and is otherwise invisible to the
//! alignment; the placeholder is retired by the next readable version.

use std::collections::HashSet;

use lineage_core::{Hunk, TrackerConfig, Version, VersionBody};
use lineage_difflens::identity::{hunk_region_id, region_id, RegionId};
use lineage_difflens::parser::{parse_hunks, split_files};
use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffTag};
use tracing::{debug, info, warn};

use crate::chunker::{split_chunks, Chunk};
use crate::source::{load_versions, DiffSource, TextSource};
use crate::store::{Change, RegionHistoryEntry, RegionStore, Transition};

/// Lines of a hunk used as its snippet when it has no heading.
const SNIPPET_LINES: usize = 3;

/// How one version (or one file of a patch) was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum VersionStatus {
    /// Content was read and folded in.
    Indexed,
    /// Content was missing; a placeholder stood in for it.
    Placeholder {
        /// Why the content was unavailable.
        reason: String,
    },
    /// This step was indexed before and was left alone.
    Skipped,
    /// Folding failed part way; earlier entries for this version remain and
    /// the step is retried on the next run.
    Failed {
        /// Error message.
        error: String,
    },
}

/// Per-version result of an indexing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionOutcome {
    /// Resource the version belongs to.
    pub resource: String,
    /// Version identifier.
    pub version: String,
    /// What happened.
    pub status: VersionStatus,
    /// Regions created by this version.
    pub created: usize,
    /// Existing regions that gained a history entry.
    pub updated: usize,
}

/// Result of an indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    /// One outcome per processed version, in processing order.
    pub outcomes: Vec<VersionOutcome>,
}

impl IndexReport {
    /// Total regions created.
    pub fn created(&self) -> usize {
        self.outcomes.iter().map(|o| o.created).sum()
    }

    /// Total history entries appended to existing regions.
    pub fn updated(&self) -> usize {
        self.outcomes.iter().map(|o| o.updated).sum()
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &VersionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, VersionStatus::Failed { .. }))
    }

    /// Whether nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    fn merge(&mut self, other: IndexReport) {
        self.outcomes.extend(other.outcomes);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    created: usize,
    updated: usize,
}

/// Builds and updates regions in a [`RegionStore`].
///
/// # Examples
///
/// ```
/// use lineage_core::{TrackerConfig, Version};
/// use lineage_regions::store::RegionStore;
/// use lineage_regions::tracker::RegionTracker;
///
/// let mut store = RegionStore::new();
/// let versions = vec![
///     Version::text("v1", 0, "intro\n\nbody"),
///     Version::text("v2", 1, "intro\n\nbody, revised"),
/// ];
/// let report = RegionTracker::new(&mut store, TrackerConfig::default())
///     .index("doc.md", &versions);
/// assert!(report.is_clean());
/// assert_eq!(store.len(), 3);
/// ```
pub struct RegionTracker<'s> {
    store: &'s mut RegionStore,
    config: TrackerConfig,
}

impl<'s> RegionTracker<'s> {
    /// Create a tracker writing into `store`.
    pub fn new(store: &'s mut RegionStore, config: TrackerConfig) -> Self {
        Self { store, config }
    }

    /// Index `versions` of `resource`, processed in ordinal order.
    ///
    /// Text versions align against the previous readable text version; the
    /// first one (and any text version following a diff version) is a
    /// baseline snapshot. Diff versions fold their hunks in against their
    /// base. Re-indexing steps already in the store is a no-op.
    pub fn index(&mut self, resource: &str, versions: &[Version]) -> IndexReport {
        let mut ordered: Vec<&Version> = versions.iter().collect();
        ordered.sort_by_key(|v| v.ordinal);

        let mut report = IndexReport::default();
        let mut previous: Option<(String, Vec<Chunk>)> = None;
        let mut placeholders: Vec<(String, Chunk)> = Vec::new();

        for version in ordered {
            let outcome = match &version.body {
                VersionBody::Text(text) => {
                    self.store.register_version(&version.id);
                    let chunks = split_chunks(text, &self.config);
                    let outcome = self.fold_text(
                        resource,
                        previous.as_ref(),
                        &version.id,
                        &chunks,
                        &placeholders,
                    );
                    placeholders.clear();
                    previous = Some((version.id.clone(), chunks));
                    outcome
                }
                VersionBody::Unavailable(reason) => {
                    warn!(
                        resource,
                        version = %version.id,
                        reason = %reason,
                        "version content missing, using placeholder"
                    );
                    self.store.register_version(&version.id);
                    let chunk = Chunk::placeholder(self.config.placeholder_for(&version.id));
                    let from = previous.as_ref().map(|(id, _)| id.as_str());
                    let outcome =
                        self.fold_placeholder(resource, from, &version.id, &chunk, reason);
                    placeholders.push((version.id.clone(), chunk));
                    outcome
                }
                VersionBody::Diff { base, diff } => {
                    self.store.register_version(base);
                    self.store.register_version(&version.id);
                    let hunks = parse_hunks(diff);
                    previous = None;
                    self.fold_hunks(resource, base, &version.id, &hunks)
                }
            };
            report.outcomes.push(outcome);
        }

        info!(
            resource,
            versions = report.outcomes.len(),
            created = report.created(),
            updated = report.updated(),
            regions = self.store.len(),
            "indexed versions"
        );
        report
    }

    /// Fold one diff of `resource` from `from` to `to`.
    pub fn index_diff(&mut self, resource: &str, from: &str, to: &str, diff: &str) -> IndexReport {
        self.store.register_version(from);
        self.store.register_version(to);
        let hunks = parse_hunks(diff);
        IndexReport {
            outcomes: vec![self.fold_hunks(resource, from, to, &hunks)],
        }
    }

    /// Fold a multi-file patch; each file is its own resource.
    pub fn index_patch(&mut self, from: &str, to: &str, patch: &str) -> IndexReport {
        self.store.register_version(from);
        self.store.register_version(to);
        let files = split_files(patch);
        debug!(files = files.len(), from, to, "split patch");
        let outcomes = files
            .iter()
            .map(|file| self.fold_hunks(&file.resource(), from, to, &file.hunks))
            .collect();
        IndexReport { outcomes }
    }

    /// Read `ids` from a text source (in order) and index them.
    pub fn index_text_source(
        &mut self,
        resource: &str,
        source: &dyn TextSource,
        ids: &[&str],
    ) -> IndexReport {
        let versions = load_versions(source, ids);
        self.index(resource, &versions)
    }

    /// Walk consecutive pairs of `refs` through a diff source for `path`.
    ///
    /// A pair whose diff cannot be read is reported as a placeholder and
    /// contributes no entries.
    pub fn index_diff_source(
        &mut self,
        source: &dyn DiffSource,
        path: &str,
        refs: &[&str],
    ) -> IndexReport {
        for r in refs {
            self.store.register_version(r);
        }

        let mut report = IndexReport::default();
        for pair in refs.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            match source.diff_text(from, to, path) {
                Ok(diff) => report.merge(self.index_diff(path, from, to, &diff)),
                Err(e) => {
                    warn!(path, from, to, error = %e, "diff unavailable");
                    report.outcomes.push(VersionOutcome {
                        resource: path.to_string(),
                        version: to.to_string(),
                        status: VersionStatus::Placeholder {
                            reason: e.to_string(),
                        },
                        created: 0,
                        updated: 0,
                    });
                }
            }
        }
        report
    }

    fn fold_text(
        &mut self,
        resource: &str,
        previous: Option<&(String, Vec<Chunk>)>,
        version: &str,
        chunks: &[Chunk],
        placeholders: &[(String, Chunk)],
    ) -> VersionOutcome {
        let from = previous.map(|(id, _)| id.as_str());
        let transition = Transition::new(resource, from, version);
        if self.store.has_transition(&transition) {
            debug!(resource, version, "step already indexed");
            return skipped(resource, version);
        }

        let result = match previous {
            None => self.baseline(resource, version, chunks),
            Some((prev_id, prev_chunks)) => {
                self.align(resource, prev_id, prev_chunks, version, chunks)
            }
        }
        .and_then(|mut counts| {
            for (held_at, chunk) in placeholders {
                self.remove(resource, held_at, version, chunk, &mut counts)?;
            }
            Ok(counts)
        });
        self.commit(transition, resource, version, VersionStatus::Indexed, result)
    }

    /// Record the stand-in chunk for an unreadable version without touching
    /// any real region.
    fn fold_placeholder(
        &mut self,
        resource: &str,
        from: Option<&str>,
        version: &str,
        chunk: &Chunk,
        reason: &str,
    ) -> VersionOutcome {
        let transition = Transition::new(resource, from, version);
        if self.store.has_transition(&transition) {
            debug!(resource, version, "step already indexed");
            return skipped(resource, version);
        }

        let mut counts = Counts::default();
        let result = self
            .observe(resource, None, version, chunk, &mut counts)
            .map(|()| counts);
        let status = VersionStatus::Placeholder {
            reason: reason.to_string(),
        };
        self.commit(transition, resource, version, status, result)
    }

    /// Remember the step only when it folded cleanly, so a failed step is
    /// retried by the next run.
    fn commit(
        &mut self,
        transition: Transition,
        resource: &str,
        version: &str,
        status: VersionStatus,
        result: lineage_core::Result<Counts>,
    ) -> VersionOutcome {
        if result.is_ok() {
            self.store.record_transition(transition);
        }
        finish(resource, version, status, result)
    }

    fn fold_hunks(&mut self, resource: &str, from: &str, to: &str, hunks: &[Hunk]) -> VersionOutcome {
        let transition = Transition::new(resource, Some(from), to);
        if self.store.has_transition(&transition) {
            debug!(resource, from, to, "step already indexed");
            return skipped(resource, to);
        }

        let result = self.apply_hunks(resource, from, to, hunks);
        self.commit(transition, resource, to, VersionStatus::Indexed, result)
    }

    fn baseline(
        &mut self,
        resource: &str,
        version: &str,
        chunks: &[Chunk],
    ) -> lineage_core::Result<Counts> {
        let mut counts = Counts::default();
        for chunk in chunks {
            self.observe(resource, None, version, chunk, &mut counts)?;
        }
        Ok(counts)
    }

    fn align(
        &mut self,
        resource: &str,
        prev_version: &str,
        prev_chunks: &[Chunk],
        version: &str,
        chunks: &[Chunk],
    ) -> lineage_core::Result<Counts> {
        let old: Vec<String> = prev_chunks.iter().map(Chunk::text).collect();
        let new: Vec<String> = chunks.iter().map(Chunk::text).collect();
        let old_ids: HashSet<RegionId> = prev_chunks
            .iter()
            .map(|c| region_id(resource, &c.lines))
            .collect();
        let new_ids: HashSet<RegionId> = chunks
            .iter()
            .map(|c| region_id(resource, &c.lines))
            .collect();
        // present on both sides: moved or duplicated, never removed
        let kept = |c: &Chunk| new_ids.contains(&region_id(resource, &c.lines));
        let known = |c: &Chunk| old_ids.contains(&region_id(resource, &c.lines));
        let mut counts = Counts::default();

        for op in capture_diff_slices(Algorithm::Lcs, &old, &new) {
            let (tag, old_range, new_range) = op.as_tag_tuple();
            let (gone, arrived) = match tag {
                DiffTag::Equal => continue,
                DiffTag::Delete => (&prev_chunks[old_range], &chunks[0..0]),
                DiffTag::Insert => (&prev_chunks[0..0], &chunks[new_range]),
                DiffTag::Replace => (&prev_chunks[old_range], &chunks[new_range]),
            };

            let paired = gone.len().min(arrived.len());
            for (old_chunk, new_chunk) in gone.iter().zip(arrived) {
                match (kept(old_chunk), known(new_chunk)) {
                    (true, true) => {}
                    (true, false) => {
                        self.observe(resource, Some(prev_version), version, new_chunk, &mut counts)?
                    }
                    (false, true) => {
                        self.remove(resource, prev_version, version, old_chunk, &mut counts)?
                    }
                    (false, false) => self.modify(
                        resource,
                        prev_version,
                        version,
                        old_chunk,
                        new_chunk,
                        &mut counts,
                    )?,
                }
            }
            for chunk in gone[paired..].iter().filter(|c| !kept(*c)) {
                self.remove(resource, prev_version, version, chunk, &mut counts)?;
            }
            for chunk in arrived[paired..].iter().filter(|c| !known(*c)) {
                self.observe(resource, Some(prev_version), version, chunk, &mut counts)?;
            }
        }
        Ok(counts)
    }

    /// Register `chunk` as present at `to`: create it, or record a recurrence.
    fn observe(
        &mut self,
        resource: &str,
        from: Option<&str>,
        to: &str,
        chunk: &Chunk,
        counts: &mut Counts,
    ) -> lineage_core::Result<()> {
        let id = region_id(resource, &chunk.lines);
        let entry = match from {
            None => RegionHistoryEntry::baseline(to, chunk.lines.clone()),
            Some(from) => RegionHistoryEntry::transition(
                from,
                to,
                Change::Created {
                    added: chunk.lines.clone(),
                },
            ),
        };

        let Some(region) = self.store.get(&id) else {
            self.store
                .insert_region(id, resource, &chunk.text(), to, entry)?;
            counts.created += 1;
            return Ok(());
        };

        let recorded_here = region
            .latest()
            .is_some_and(|latest| latest.effective_version() == to);
        let still_present = from.is_none() && !region.is_removed();
        if recorded_here || still_present {
            return Ok(());
        }

        debug!(region = id.short(), version = to, "region recurred");
        self.store.append(&id, entry)?;
        self.store.set_snippet(&id, &chunk.text())?;
        counts.updated += 1;
        Ok(())
    }

    fn modify(
        &mut self,
        resource: &str,
        from: &str,
        to: &str,
        old: &Chunk,
        new: &Chunk,
        counts: &mut Counts,
    ) -> lineage_core::Result<()> {
        let old_id = region_id(resource, &old.lines);
        if self.store.contains(&old_id) && !self.recorded_at(&old_id, to) {
            self.store.append(
                &old_id,
                RegionHistoryEntry::transition(
                    from,
                    to,
                    Change::Modified {
                        removed: old.lines.clone(),
                        added: new.lines.clone(),
                    },
                ),
            )?;
            self.store.set_snippet(&old_id, &new.text())?;
            counts.updated += 1;
        }
        self.observe(resource, Some(from), to, new, counts)
    }

    fn remove(
        &mut self,
        resource: &str,
        from: &str,
        to: &str,
        chunk: &Chunk,
        counts: &mut Counts,
    ) -> lineage_core::Result<()> {
        let id = region_id(resource, &chunk.lines);
        if !self.store.contains(&id) {
            debug!(region = id.short(), "removed chunk was never tracked");
            return Ok(());
        }
        if self.recorded_at(&id, to) {
            return Ok(());
        }
        self.store.append(
            &id,
            RegionHistoryEntry::transition(
                from,
                to,
                Change::Removed {
                    removed: chunk.lines.clone(),
                },
            ),
        )?;
        counts.updated += 1;
        Ok(())
    }

    /// Whether the region already has its entry for the step ending at `to`.
    fn recorded_at(&self, id: &RegionId, to: &str) -> bool {
        self.store
            .get(id)
            .and_then(|region| region.latest())
            .is_some_and(|latest| latest.effective_version() == to)
    }

    fn apply_hunks(
        &mut self,
        resource: &str,
        from: &str,
        to: &str,
        hunks: &[Hunk],
    ) -> lineage_core::Result<Counts> {
        let mut counts = Counts::default();
        for hunk in hunks {
            let id = hunk_region_id(resource, hunk);
            let entry = RegionHistoryEntry::transition(from, to, classify(hunk));
            if self.store.contains(&id) {
                self.store.append(&id, entry)?;
                counts.updated += 1;
            } else {
                self.store
                    .insert_region(id.clone(), resource, &hunk_snippet(hunk), to, entry)?;
                counts.created += 1;
            }
            log_hunk(&id, hunk);
        }
        Ok(counts)
    }
}

fn classify(hunk: &Hunk) -> Change {
    let added: Vec<String> = hunk.added_lines().into_iter().map(str::to_string).collect();
    let removed: Vec<String> = hunk
        .removed_lines()
        .into_iter()
        .map(str::to_string)
        .collect();
    match (added.is_empty(), removed.is_empty()) {
        (false, false) => Change::Modified { removed, added },
        (true, false) => Change::Removed { removed },
        _ => Change::Created { added },
    }
}

fn hunk_snippet(hunk: &Hunk) -> String {
    if !hunk.heading.is_empty() {
        return hunk.heading.clone();
    }
    let added = hunk.added_lines();
    let lines = if added.is_empty() {
        hunk.removed_lines()
    } else {
        added
    };
    lines
        .into_iter()
        .take(SNIPPET_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

fn log_hunk(id: &RegionId, hunk: &Hunk) {
    debug!(region = id.short(), hunk = %hunk, "folded hunk");
}

fn skipped(resource: &str, version: &str) -> VersionOutcome {
    VersionOutcome {
        resource: resource.to_string(),
        version: version.to_string(),
        status: VersionStatus::Skipped,
        created: 0,
        updated: 0,
    }
}

fn finish(
    resource: &str,
    version: &str,
    status: VersionStatus,
    result: lineage_core::Result<Counts>,
) -> VersionOutcome {
    match result {
        Ok(counts) => VersionOutcome {
            resource: resource.to_string(),
            version: version.to_string(),
            status,
            created: counts.created,
            updated: counts.updated,
        },
        Err(e) => {
            warn!(resource, version, error = %e, "failed to fold version");
            VersionOutcome {
                resource: resource.to_string(),
                version: version.to_string(),
                status: VersionStatus::Failed {
                    error: e.to_string(),
                },
                created: 0,
                updated: 0,
            }
        }
    }
}
