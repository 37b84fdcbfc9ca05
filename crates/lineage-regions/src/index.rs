//! Read-only volatility and stability views over a [`RegionStore`].
//!
//! Nothing here is cached: every figure is recomputed from the region
//! histories on each call, so it always agrees with the store.

use std::cmp::Ordering;
use std::collections::HashSet;

use lineage_difflens::identity::{region_id, RegionId};
use serde::{Deserialize, Serialize};

use crate::store::{Action, Change, Region, RegionHistoryEntry, RegionStore};

/// Characters of the canonical snippet kept in a summary.
const PREVIEW_CHARS: usize = 100;

/// Change statistics for one region.
///
/// # Examples
///
/// ```
/// use lineage_difflens::identity::region_id;
/// use lineage_regions::index::RegionSummary;
///
/// let summary = RegionSummary {
///     id: region_id("doc.md", &["intro"]),
///     resource: "doc.md".into(),
///     snippet_preview: "intro".into(),
///     first_seen: "v1".into(),
///     versions_modified: 1,
///     total_additions: 3,
///     total_deletions: 1,
///     stability_score: 0.75,
/// };
/// assert!(summary.stability_score <= 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSummary {
    /// Region identity.
    pub id: RegionId,
    /// Resource the region belongs to.
    pub resource: String,
    /// Start of the canonical snippet.
    pub snippet_preview: String,
    /// Version the region first appeared in.
    pub first_seen: String,
    /// Distinct versions in which the region was changed.
    pub versions_modified: usize,
    /// Lines added over the whole history.
    pub total_additions: usize,
    /// Lines removed over the whole history.
    pub total_deletions: usize,
    /// `1 - versions_modified / total_versions`, clamped to 0.0–1.0.
    pub stability_score: f64,
}

/// Query surface over the store.
///
/// # Examples
///
/// ```
/// use lineage_core::{Granularity, TrackerConfig, Version};
/// use lineage_regions::index::RegionIndex;
/// use lineage_regions::store::RegionStore;
/// use lineage_regions::tracker::RegionTracker;
///
/// let config = TrackerConfig { granularity: Granularity::Line, ..TrackerConfig::default() };
/// let mut store = RegionStore::new();
/// RegionTracker::new(&mut store, config).index("doc", &[
///     Version::text("v1", 0, "A\nB"),
///     Version::text("v2", 1, "A\nC"),
/// ]);
///
/// let index = RegionIndex::new(&store);
/// assert_eq!(index.total_versions(), 2);
/// // "B" was rewritten into "C", which is tracked on its own
/// assert_eq!(index.active_at("v2").len(), 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RegionIndex<'a> {
    store: &'a RegionStore,
}

impl<'a> RegionIndex<'a> {
    /// Wrap a store.
    pub fn new(store: &'a RegionStore) -> Self {
        Self { store }
    }

    /// Number of versions indexed so far.
    pub fn total_versions(&self) -> usize {
        self.store.version_count()
    }

    /// Summary for one region.
    pub fn summary(&self, id: &RegionId) -> Option<RegionSummary> {
        self.store.get(id).map(|region| self.summarize(region))
    }

    /// Summaries of every region, oldest first.
    pub fn summaries(&self) -> Vec<RegionSummary> {
        let mut regions: Vec<&Region> = self.store.regions().collect();
        regions.sort_by(|a, b| self.by_age(a, b));
        regions.iter().map(|r| self.summarize(r)).collect()
    }

    /// Regions whose latest entry at or before `version` is not a removal.
    ///
    /// A `Modified` entry whose new content is tracked as a region of its
    /// own counts as the end of the old region, since identity is the
    /// content hash. Unknown versions have no active regions.
    pub fn active_at(&self, version: &str) -> Vec<&'a Region> {
        let Some(at) = self.store.ordinal(version) else {
            return Vec::new();
        };

        let mut active: Vec<&'a Region> = self
            .store
            .regions()
            .filter(|region| {
                region
                    .history()
                    .iter()
                    .rev()
                    .find(|entry| self.effective_ordinal(entry).is_some_and(|o| o <= at))
                    .is_some_and(|entry| {
                        entry.action() != Action::Removed && !self.superseded(region, entry)
                    })
            })
            .collect();
        active.sort_by(|a, b| self.by_age(a, b));
        active
    }

    /// The `limit` regions changed in the most versions.
    pub fn most_volatile(&self, limit: usize) -> Vec<RegionSummary> {
        let mut summaries = self.summaries();
        summaries.sort_by(|a, b| b.versions_modified.cmp(&a.versions_modified));
        summaries.truncate(limit);
        summaries
    }

    /// The `limit` regions with the highest stability score.
    pub fn most_stable(&self, limit: usize) -> Vec<RegionSummary> {
        let mut summaries = self.summaries();
        summaries.sort_by(|a, b| {
            b.stability_score
                .partial_cmp(&a.stability_score)
                .unwrap_or(Ordering::Equal)
        });
        summaries.truncate(limit);
        summaries
    }

    /// History of one region.
    pub fn history(&self, id: &RegionId) -> Option<&'a [RegionHistoryEntry]> {
        self.store.get(id).map(Region::history)
    }

    /// Regions belonging to `resource`, oldest first.
    pub fn regions_in(&self, resource: &str) -> Vec<&'a Region> {
        let mut regions: Vec<&'a Region> = self
            .store
            .regions()
            .filter(|r| r.resource() == resource)
            .collect();
        regions.sort_by(|a, b| self.by_age(a, b));
        regions
    }

    fn summarize(&self, region: &Region) -> RegionSummary {
        let history = region.history();
        let versions_modified = history
            .iter()
            .filter_map(|entry| entry.to_version.as_deref())
            .collect::<HashSet<_>>()
            .len();
        let total_additions = history.iter().map(|e| e.change.added().len()).sum();
        let total_deletions = history.iter().map(|e| e.change.removed().len()).sum();

        RegionSummary {
            id: region.id().clone(),
            resource: region.resource().to_string(),
            snippet_preview: region
                .canonical_snippet()
                .chars()
                .take(PREVIEW_CHARS)
                .collect(),
            first_seen: region.first_seen().to_string(),
            versions_modified,
            total_additions,
            total_deletions,
            stability_score: stability(versions_modified, self.total_versions()),
        }
    }

    fn superseded(&self, region: &Region, entry: &RegionHistoryEntry) -> bool {
        let Change::Modified { added, .. } = &entry.change else {
            return false;
        };
        let successor = region_id(region.resource(), added.as_slice());
        &successor != region.id() && self.store.contains(&successor)
    }

    fn effective_ordinal(&self, entry: &RegionHistoryEntry) -> Option<usize> {
        self.store.ordinal(entry.effective_version())
    }

    /// Order by first-seen version, then id. Sorting is stable, so this is
    /// also the tie-break for the ranked views.
    fn by_age(&self, a: &Region, b: &Region) -> Ordering {
        let oa = self.store.ordinal(a.first_seen());
        let ob = self.store.ordinal(b.first_seen());
        oa.cmp(&ob).then_with(|| a.id().cmp(b.id()))
    }
}

/// `1 - modified / total`, clamped. An empty index counts as fully stable.
fn stability(versions_modified: usize, total_versions: usize) -> f64 {
    if total_versions == 0 {
        return 1.0;
    }
    (1.0 - versions_modified as f64 / total_versions as f64).clamp(0.0, 1.0)
}
