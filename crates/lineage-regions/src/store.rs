//! In-memory region store with append-only histories.
//!
//! The store owns every [`Region`] and the ordered list of versions the
//! tracker has seen. Regions are never deleted and history entries are never
//! rewritten; a region that disappears gets a `removed` entry instead.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use lineage_core::LineageError;
use lineage_difflens::identity::RegionId;
use serde::{Deserialize, Serialize};

/// Kind of change recorded in a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// The region appeared.
    Created,
    /// The region's content was replaced by an edit.
    Modified,
    /// The region disappeared.
    Removed,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Created => write!(f, "created"),
            Action::Modified => write!(f, "modified"),
            Action::Removed => write!(f, "removed"),
        }
    }
}

/// What changed, with the lines involved.
///
/// # Examples
///
/// ```
/// use lineage_regions::store::{Action, Change};
///
/// let change = Change::Modified {
///     removed: vec!["old".into()],
///     added: vec!["new".into(), "newer".into()],
/// };
/// assert_eq!(change.action(), Action::Modified);
/// assert_eq!(change.added().len(), 2);
/// assert_eq!(change.removed().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Change {
    /// Lines that appeared.
    Created {
        /// Added lines.
        added: Vec<String>,
    },
    /// Lines replaced in place.
    Modified {
        /// Lines that went away.
        removed: Vec<String>,
        /// Lines that replaced them.
        added: Vec<String>,
    },
    /// Lines that went away.
    Removed {
        /// Removed lines.
        removed: Vec<String>,
    },
}

impl Change {
    /// The action tag.
    pub fn action(&self) -> Action {
        match self {
            Change::Created { .. } => Action::Created,
            Change::Modified { .. } => Action::Modified,
            Change::Removed { .. } => Action::Removed,
        }
    }

    /// Added lines (empty for removals).
    pub fn added(&self) -> &[String] {
        match self {
            Change::Created { added } | Change::Modified { added, .. } => added,
            Change::Removed { .. } => &[],
        }
    }

    /// Removed lines (empty for creations).
    pub fn removed(&self) -> &[String] {
        match self {
            Change::Modified { removed, .. } | Change::Removed { removed } => removed,
            Change::Created { .. } => &[],
        }
    }
}

/// One step in a region's history.
///
/// Entries recorded from a full-text baseline carry no `to_version`; entries
/// recorded from a version transition carry both ends.
///
/// # Examples
///
/// ```
/// use lineage_regions::store::{Change, RegionHistoryEntry};
///
/// let base = RegionHistoryEntry::baseline("v1", vec!["hello".into()]);
/// assert_eq!(base.effective_version(), "v1");
///
/// let step = RegionHistoryEntry::transition("v1", "v2", Change::Removed {
///     removed: vec!["hello".into()],
/// });
/// assert_eq!(step.effective_version(), "v2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionHistoryEntry {
    /// Version the change starts from (or the snapshot version for baselines).
    pub from_version: String,
    /// Version the change lands in; absent for baseline snapshots.
    pub to_version: Option<String>,
    /// The change itself.
    pub change: Change,
}

impl RegionHistoryEntry {
    /// A region observed in a single full-text snapshot.
    pub fn baseline(version: impl Into<String>, added: Vec<String>) -> Self {
        Self {
            from_version: version.into(),
            to_version: None,
            change: Change::Created { added },
        }
    }

    /// A change observed between two versions.
    pub fn transition(from: impl Into<String>, to: impl Into<String>, change: Change) -> Self {
        Self {
            from_version: from.into(),
            to_version: Some(to.into()),
            change,
        }
    }

    /// The version this entry describes the region *at*.
    pub fn effective_version(&self) -> &str {
        self.to_version.as_deref().unwrap_or(&self.from_version)
    }

    /// Shorthand for `self.change.action()`.
    pub fn action(&self) -> Action {
        self.change.action()
    }
}

/// A tracked span of content with a stable identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    id: RegionId,
    resource: String,
    canonical_snippet: String,
    first_seen: String,
    history: Vec<RegionHistoryEntry>,
}

impl Region {
    /// Content hash identity.
    pub fn id(&self) -> &RegionId {
        &self.id
    }

    /// The document or file this region belongs to.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Representative text of the region's latest content.
    pub fn canonical_snippet(&self) -> &str {
        &self.canonical_snippet
    }

    /// Version in which the region first appeared. Never changes.
    pub fn first_seen(&self) -> &str {
        &self.first_seen
    }

    /// History in recording order.
    pub fn history(&self) -> &[RegionHistoryEntry] {
        &self.history
    }

    /// Most recent history entry.
    pub fn latest(&self) -> Option<&RegionHistoryEntry> {
        self.history.last()
    }

    /// Whether the latest entry removed the region.
    pub fn is_removed(&self) -> bool {
        self.latest()
            .is_some_and(|entry| entry.action() == Action::Removed)
    }
}

/// A version step that has already been folded into the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    /// Resource the step applies to.
    pub resource: String,
    /// Previous version, absent for a baseline snapshot.
    pub from: Option<String>,
    /// Version reached.
    pub to: String,
}

impl Transition {
    /// Build a transition key.
    pub fn new(resource: impl Into<String>, from: Option<&str>, to: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            from: from.map(str::to_string),
            to: to.into(),
        }
    }
}

/// Owner of all regions, the version order, and the set of indexed steps.
///
/// # Examples
///
/// ```
/// use lineage_difflens::identity::region_id;
/// use lineage_regions::store::{RegionHistoryEntry, RegionStore};
///
/// let mut store = RegionStore::new();
/// store.register_version("v1");
/// let id = region_id("doc.md", &["hello"]);
/// store
///     .insert_region(id.clone(), "doc.md", "hello", "v1",
///         RegionHistoryEntry::baseline("v1", vec!["hello".into()]))
///     .unwrap();
/// assert_eq!(store.get(&id).unwrap().first_seen(), "v1");
/// ```
#[derive(Debug, Default, Clone)]
pub struct RegionStore {
    regions: BTreeMap<RegionId, Region>,
    versions: Vec<String>,
    ordinals: HashMap<String, usize>,
    transitions: BTreeSet<Transition>,
}

impl RegionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `version` to the version order if it is new and return its ordinal.
    pub fn register_version(&mut self, version: &str) -> usize {
        if let Some(&ordinal) = self.ordinals.get(version) {
            return ordinal;
        }
        let ordinal = self.versions.len();
        self.versions.push(version.to_string());
        self.ordinals.insert(version.to_string(), ordinal);
        ordinal
    }

    /// Position of `version` in the order, if registered.
    pub fn ordinal(&self, version: &str) -> Option<usize> {
        self.ordinals.get(version).copied()
    }

    /// Registered versions, oldest first.
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// Number of registered versions.
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Look up a region by id.
    pub fn get(&self, id: &RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    /// Whether a region with this id exists.
    pub fn contains(&self, id: &RegionId) -> bool {
        self.regions.contains_key(id)
    }

    /// All regions, ordered by id.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the store holds no regions.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Create a region with its first history entry.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] if the id already exists, or
    /// [`LineageError::MissingVersion`] if the entry names an unregistered
    /// version.
    pub fn insert_region(
        &mut self,
        id: RegionId,
        resource: &str,
        snippet: &str,
        first_seen: &str,
        entry: RegionHistoryEntry,
    ) -> Result<(), LineageError> {
        if self.regions.contains_key(&id) {
            return Err(LineageError::Database(format!(
                "region {} already exists",
                id.short()
            )));
        }
        self.require_version(first_seen)?;
        self.check_entry(&id, None, &entry)?;

        let region = Region {
            id: id.clone(),
            resource: resource.to_string(),
            canonical_snippet: snippet.to_string(),
            first_seen: first_seen.to_string(),
            history: vec![entry],
        };
        self.regions.insert(id, region);
        Ok(())
    }

    /// Append an entry to an existing region's history.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::HistoryOrder`] if the entry would place the
    /// region earlier than its latest entry, [`LineageError::MissingVersion`]
    /// for unregistered versions, and [`LineageError::Database`] for an
    /// unknown region.
    pub fn append(&mut self, id: &RegionId, entry: RegionHistoryEntry) -> Result<(), LineageError> {
        let latest = self
            .regions
            .get(id)
            .ok_or_else(|| unknown_region(id))?
            .latest()
            .cloned();
        self.check_entry(id, latest.as_ref(), &entry)?;

        if let Some(region) = self.regions.get_mut(id) {
            region.history.push(entry);
        }
        Ok(())
    }

    /// Replace a region's representative snippet.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::Database`] for an unknown region.
    pub fn set_snippet(&mut self, id: &RegionId, snippet: &str) -> Result<(), LineageError> {
        let region = self.regions.get_mut(id).ok_or_else(|| unknown_region(id))?;
        region.canonical_snippet = snippet.to_string();
        Ok(())
    }

    /// Remember that a step was indexed. Returns `false` if it already was.
    pub fn record_transition(&mut self, transition: Transition) -> bool {
        self.transitions.insert(transition)
    }

    /// Whether a step was indexed before.
    pub fn has_transition(&self, transition: &Transition) -> bool {
        self.transitions.contains(transition)
    }

    /// Indexed steps, ordered by resource then versions.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }

    /// Put back a region loaded from an archive.
    ///
    /// The history is re-validated entry by entry against the registered
    /// version order.
    pub(crate) fn restore_region(
        &mut self,
        id: RegionId,
        resource: String,
        canonical_snippet: String,
        first_seen: String,
        history: Vec<RegionHistoryEntry>,
    ) -> Result<(), LineageError> {
        self.require_version(&first_seen)?;
        let mut latest: Option<&RegionHistoryEntry> = None;
        for entry in &history {
            self.check_entry(&id, latest, entry)?;
            latest = Some(entry);
        }
        self.regions.insert(
            id.clone(),
            Region {
                id,
                resource,
                canonical_snippet,
                first_seen,
                history,
            },
        );
        Ok(())
    }

    fn require_version(&self, version: &str) -> Result<usize, LineageError> {
        self.ordinal(version)
            .ok_or_else(|| LineageError::MissingVersion {
                version: version.to_string(),
                reason: "not registered with the region store".into(),
            })
    }

    fn check_entry(
        &self,
        id: &RegionId,
        latest: Option<&RegionHistoryEntry>,
        entry: &RegionHistoryEntry,
    ) -> Result<(), LineageError> {
        let from = self.require_version(&entry.from_version)?;
        let effective = match &entry.to_version {
            Some(to) => {
                let to_ordinal = self.require_version(to)?;
                if to_ordinal < from {
                    return Err(LineageError::HistoryOrder {
                        region: id.short().to_string(),
                        detail: format!(
                            "transition {} -> {to} runs backwards",
                            entry.from_version
                        ),
                    });
                }
                to_ordinal
            }
            None => from,
        };

        if let Some(latest) = latest {
            let previous = self.require_version(latest.effective_version())?;
            if effective < previous {
                return Err(LineageError::HistoryOrder {
                    region: id.short().to_string(),
                    detail: format!(
                        "entry at {} precedes latest entry at {}",
                        entry.effective_version(),
                        latest.effective_version()
                    ),
                });
            }
        }
        Ok(())
    }
}

fn unknown_region(id: &RegionId) -> LineageError {
    LineageError::Database(format!("unknown region {}", id.short()))
}
