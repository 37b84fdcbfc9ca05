use lineage_core::{Granularity, TrackerConfig, Version};
use lineage_difflens::identity::region_id;
use lineage_regions::archive::{decode_history, encode_history, RegionArchive};
use lineage_regions::index::{RegionIndex, RegionSummary};
use lineage_regions::source::MemorySource;
use lineage_regions::store::{Action, RegionStore, Transition};
use lineage_regions::tracker::{RegionTracker, VersionStatus};

fn line_config() -> TrackerConfig {
    TrackerConfig {
        granularity: Granularity::Line,
        ..TrackerConfig::default()
    }
}

fn scenario_versions() -> Vec<Version> {
    vec![
        Version::text("v1", 0, "A\nB\nC"),
        Version::text("v2", 1, "A\nB2\nC"),
        Version::text("v3", 2, "A\nB2\nC\nD"),
    ]
}

fn indexed(versions: &[Version], config: TrackerConfig) -> RegionStore {
    let mut store = RegionStore::new();
    let report = RegionTracker::new(&mut store, config).index("doc", versions);
    assert!(report.is_clean());
    store
}

#[test]
fn three_version_walkthrough() {
    let store = indexed(&scenario_versions(), line_config());
    let index = RegionIndex::new(&store);
    assert_eq!(index.total_versions(), 3);

    let a = index.summary(&region_id("doc", &["A"])).unwrap();
    assert_eq!(a.stability_score, 1.0);
    let c = index.summary(&region_id("doc", &["C"])).unwrap();
    assert_eq!(c.stability_score, 1.0);

    let b = store.get(&region_id("doc", &["B"])).unwrap();
    let last = b.latest().unwrap();
    assert_eq!(last.to_version.as_deref(), Some("v2"));
    assert!(matches!(last.action(), Action::Modified | Action::Removed));

    let b2 = store.get(&region_id("doc", &["B2"])).unwrap();
    assert_eq!(b2.first_seen(), "v2");

    let d = index.summary(&region_id("doc", &["D"])).unwrap();
    assert_eq!(d.first_seen, "v3");
    assert_eq!(d.versions_modified, 1);
    assert!((d.stability_score - (1.0 - 1.0 / 3.0)).abs() < 1e-9);

    for version in ["v1", "v2", "v3"] {
        let active: Vec<_> = index.active_at(version).iter().map(|r| r.id().clone()).collect();
        assert!(active.contains(&region_id("doc", &["A"])));
        assert!(active.contains(&region_id("doc", &["C"])));
    }
    let at_v2: Vec<_> = index.active_at("v2").iter().map(|r| r.id().clone()).collect();
    assert!(!at_v2.contains(&region_id("doc", &["D"])));
    // "B" lives on as "B2", listed once
    assert!(!at_v2.contains(&region_id("doc", &["B"])));
    assert!(at_v2.contains(&region_id("doc", &["B2"])));
    assert_eq!(at_v2.len(), 3);
    assert_eq!(index.active_at("v3").len(), 4);
}

#[test]
fn paragraph_mode_walkthrough() {
    let versions = vec![
        Version::text("v1", 0, "A\n\nB\n\nC"),
        Version::text("v2", 1, "A\n\nB2\n\nC"),
    ];
    let store = indexed(&versions, TrackerConfig::default());
    assert_eq!(store.len(), 4);
    let b2 = store.get(&region_id("doc", &["B2"])).unwrap();
    assert_eq!(b2.first_seen(), "v2");
}

#[test]
fn indexing_is_deterministic() {
    let summarize = |store: &RegionStore| -> Vec<(RegionSummary, usize)> {
        let index = RegionIndex::new(store);
        index
            .summaries()
            .into_iter()
            .map(|s| {
                let len = index.history(&s.id).map_or(0, <[_]>::len);
                (s, len)
            })
            .collect()
    };

    let first = indexed(&scenario_versions(), line_config());
    let second = indexed(&scenario_versions(), line_config());
    assert_eq!(summarize(&first), summarize(&second));
}

#[test]
fn reindexing_same_store_is_skipped() {
    let mut store = RegionStore::new();
    let versions = scenario_versions();
    RegionTracker::new(&mut store, line_config()).index("doc", &versions);
    let before: Vec<usize> = store.regions().map(|r| r.history().len()).collect();

    let report = RegionTracker::new(&mut store, line_config()).index("doc", &versions);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.status == VersionStatus::Skipped));
    let after: Vec<usize> = store.regions().map(|r| r.history().len()).collect();
    assert_eq!(before, after);
}

#[test]
fn unchanged_chunk_keeps_identity_in_every_version() {
    let versions: Vec<Version> = (0..5)
        .map(|i| Version::text(format!("v{i}"), i, format!("stable line\nchurn {i}")))
        .collect();
    let store = indexed(&versions, line_config());
    let index = RegionIndex::new(&store);
    let stable = region_id("doc", &["stable line"]);
    for i in 0..5 {
        let active: Vec<_> = index
            .active_at(&format!("v{i}"))
            .iter()
            .map(|r| r.id().clone())
            .collect();
        assert!(active.contains(&stable), "missing at v{i}");
    }
}

fn active_snippets(store: &RegionStore, version: &str) -> Vec<String> {
    RegionIndex::new(store)
        .active_at(version)
        .iter()
        .map(|r| r.canonical_snippet().to_string())
        .collect()
}

#[test]
fn swapped_chunks_keep_their_regions() {
    let versions = vec![
        Version::text("v1", 0, "A\nB"),
        Version::text("v2", 1, "B\nA"),
    ];
    let store = indexed(&versions, line_config());
    assert_eq!(store.len(), 2);

    let mut active = active_snippets(&store, "v2");
    active.sort();
    assert_eq!(active, ["A", "B"]);
    for region in store.regions() {
        assert_eq!(region.history().len(), 1, "{} gained entries", region.canonical_snippet());
    }
}

#[test]
fn moved_paragraph_is_not_removed() {
    let versions = vec![
        Version::text("v1", 0, "# Title\n\nfirst\n\nsecond\n\nthird"),
        Version::text("v2", 1, "# Title\n\nthird\n\nfirst\n\nsecond"),
    ];
    let store = indexed(&versions, TrackerConfig::default());
    let third = store.get(&region_id("doc", &["third"])).unwrap();
    assert!(!third.is_removed());
    assert_eq!(third.first_seen(), "v1");
    assert_eq!(active_snippets(&store, "v2").len(), 4);
}

#[test]
fn dropping_one_copy_of_a_duplicate_keeps_the_region() {
    let versions = vec![
        Version::text("v1", 0, "A\nX\nA"),
        Version::text("v2", 1, "A\nX"),
        Version::text("v3", 2, "X"),
    ];
    let store = indexed(&versions, line_config());
    let a = store.get(&region_id("doc", &["A"])).unwrap();
    assert!(active_snippets(&store, "v2").contains(&"A".to_string()));
    assert_eq!(a.history().len(), 2);
    assert_eq!(a.latest().unwrap().to_version.as_deref(), Some("v3"));
    assert!(a.is_removed());
}

#[test]
fn history_never_goes_backwards() {
    let versions = vec![
        Version::text("v1", 0, "x\ny\nz"),
        Version::text("v2", 1, "x\nz"),
        Version::text("v3", 2, "x\ny\nz"),
        Version::text("v4", 3, "y"),
    ];
    let store = indexed(&versions, line_config());
    for region in store.regions() {
        let ordinals: Vec<usize> = region
            .history()
            .iter()
            .map(|e| store.ordinal(e.effective_version()).unwrap())
            .collect();
        assert!(ordinals.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            store.ordinal(region.first_seen()),
            ordinals.first().copied()
        );
    }
    let y = store.get(&region_id("doc", &["y"])).unwrap();
    assert_eq!(y.first_seen(), "v1");
}

#[test]
fn history_round_trips_through_storage() {
    let store = indexed(&scenario_versions(), line_config());
    for region in store.regions() {
        let blob = encode_history(region.history()).unwrap();
        assert_eq!(decode_history(&blob).unwrap(), region.history());
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("regions.db");
    RegionArchive::open(&path).unwrap().save(&store).unwrap();
    let loaded = RegionArchive::open(&path).unwrap().load().unwrap();
    assert_eq!(loaded.len(), store.len());
    for region in store.regions() {
        assert_eq!(loaded.get(region.id()), Some(region));
    }
}

#[test]
fn missing_version_uses_placeholder_and_continues() {
    let mut source = MemorySource::new();
    source.insert_text("v1", "A\nB");
    source.insert_text("v3", "A\nB\nC");

    let mut store = RegionStore::new();
    let config = line_config();
    let placeholder = config.placeholder_for("v2");
    let report =
        RegionTracker::new(&mut store, config).index_text_source("doc", &source, &["v1", "v2", "v3"]);

    assert_eq!(report.outcomes.len(), 3);
    assert!(matches!(
        report.outcomes[1].status,
        VersionStatus::Placeholder { .. }
    ));
    assert!(report.is_clean());

    let held = store.get(&region_id("doc", &[placeholder.as_str()])).unwrap();
    assert_eq!(held.first_seen(), "v2");
    assert_eq!(held.latest().unwrap().to_version.as_deref(), Some("v3"));
    assert!(held.is_removed());
    assert!(!active_snippets(&store, "v3").contains(&placeholder));
    assert_eq!(
        store.get(&region_id("doc", &["C"])).unwrap().first_seen(),
        "v3"
    );
}

#[test]
fn missing_version_leaves_real_regions_alone() {
    let mut source = MemorySource::new();
    source.insert_text("v1", "A\nB\nC");
    source.insert_text("v3", "A\nB\nC");

    let mut store = RegionStore::new();
    let report = RegionTracker::new(&mut store, line_config())
        .index_text_source("doc", &source, &["v1", "v2", "v3"]);
    assert!(report.is_clean());

    let index = RegionIndex::new(&store);
    for line in ["A", "B", "C"] {
        let id = region_id("doc", &[line]);
        let summary = index.summary(&id).unwrap();
        assert_eq!(summary.snippet_preview, line);
        assert_eq!(summary.versions_modified, 0);
        assert_eq!(summary.stability_score, 1.0);
        assert_eq!(store.get(&id).unwrap().history().len(), 1);
    }
    let mut active = active_snippets(&store, "v3");
    active.sort();
    assert_eq!(active, ["A", "B", "C"]);
}

#[test]
fn recurring_content_gets_its_snippet_back() {
    let versions = vec![
        Version::text("v1", 0, "A\nB"),
        Version::text("v2", 1, "A\nC"),
        Version::text("v3", 2, "A\nB"),
    ];
    let store = indexed(&versions, line_config());
    let b = store.get(&region_id("doc", &["B"])).unwrap();
    assert_eq!(b.canonical_snippet(), "B");
    assert_eq!(b.first_seen(), "v1");
    assert_eq!(b.latest().unwrap().action(), Action::Created);
}

#[test]
fn failed_step_is_retried() {
    let diff = "@@ -1 +1 @@\n-a\n+b\n";
    let mut store = RegionStore::new();
    let first = RegionTracker::new(&mut store, line_config()).index_diff("doc", "v1", "v2", diff);
    assert!(first.is_clean());

    // v0 is registered after v1, so v0 -> v1 runs backwards
    for _ in 0..2 {
        let report =
            RegionTracker::new(&mut store, line_config()).index_diff("doc", "v0", "v1", diff);
        assert!(matches!(
            report.outcomes[0].status,
            VersionStatus::Failed { .. }
        ));
    }
    assert!(!store.has_transition(&Transition::new("doc", Some("v0"), "v1")));
    assert!(store.has_transition(&Transition::new("doc", Some("v1"), "v2")));
}

#[test]
fn patch_regions_are_per_file() {
    let patch = "\
diff --git a/one.md b/one.md
--- a/one.md
+++ b/one.md
@@ -1,2 +1,2 @@ Intro
 keep
-old
+new
diff --git a/two.md b/two.md
--- a/two.md
+++ b/two.md
@@ -3 +3,0 @@
-gone
";
    let mut store = RegionStore::new();
    let report = RegionTracker::new(&mut store, TrackerConfig::default()).index_patch("r1", "r2", patch);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.created(), 2);

    let index = RegionIndex::new(&store);
    let one = index.regions_in("one.md");
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].canonical_snippet(), "Intro");
    assert_eq!(one[0].latest().unwrap().action(), Action::Modified);

    let two = index.regions_in("two.md");
    assert_eq!(two[0].latest().unwrap().action(), Action::Removed);
    assert!(index.active_at("r2").iter().all(|r| r.resource() == "one.md"));
}

#[test]
fn diff_source_walks_consecutive_refs() {
    let mut source = MemorySource::new();
    source.insert_diff("a", "b", "doc.md", "@@ -1 +1,2 @@\n line\n+added\n");
    // b..c missing on purpose

    let mut store = RegionStore::new();
    let report = RegionTracker::new(&mut store, TrackerConfig::default()).index_diff_source(
        &source,
        "doc.md",
        &["a", "b", "c"],
    );
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].status, VersionStatus::Indexed);
    assert!(matches!(
        report.outcomes[1].status,
        VersionStatus::Placeholder { .. }
    ));
    assert_eq!(store.version_count(), 3);
    assert_eq!(store.len(), 1);
}
