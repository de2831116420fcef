//! Testable properties 4, 5, 7, 8, 9 from spec.md §8: clustering
//! determinism/cover, the overlap threshold, lifecycle drain, compounding
//! source-tracking, and unprocessed-diary exclusion.

use chrono::{Duration, Utc};
use michimem_core::{group_by_overlap, run_compounding, run_lifecycle, Config, Memory, MemoryInput, MemoryType, Store};
use uuid::Uuid;

fn test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    (store, dir)
}

fn memory_with(title: &str, summary: &str, tags: &[&str]) -> Memory {
    let now = Utc::now();
    Memory {
        id: Uuid::new_v4(),
        memory_type: MemoryType::Diary,
        priority: 2,
        title: title.to_string(),
        summary: summary.to_string(),
        content: String::new(),
        tags: tags.iter().map(|s| s.to_string()).collect(),
        agent_id: String::new(),
        source_ids: Vec::new(),
        created_at: now,
        updated_at: now,
        expires_at: None,
    }
}

/// Property 4: clustering is deterministic and a cover of the input.
#[test]
fn clustering_is_deterministic_and_a_cover() {
    let memories = vec![
        memory_with("Session: deploy pipeline alpha", "deploy pipeline work", &["deployment"]),
        memory_with("Session: deploy pipeline beta", "deploy pipeline work", &["deployment"]),
        memory_with("Session: cooking notes", "recipe ideas", &["cooking"]),
        memory_with("Session: another deploy", "deploy pipeline work", &["deployment"]),
    ];

    let first = group_by_overlap(&memories);
    let second = group_by_overlap(&memories);

    let ids = |groups: &[Vec<Memory>]| -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = groups.iter().flatten().map(|m| m.id).collect();
        ids.sort();
        ids
    };
    assert_eq!(ids(&first), ids(&second), "same input must cluster identically across calls");

    let mut expected: Vec<Uuid> = memories.iter().map(|m| m.id).collect();
    expected.sort();
    assert_eq!(ids(&first), expected, "every input memory must appear in exactly one group");
}

/// Property 5: overlap >= 0.15 on words longer than 3 chars clusters two
/// memories together; strictly below keeps them apart (first seed is their
/// only neighbor candidate).
#[test]
fn overlap_threshold_gates_clustering() {
    let similar_a = memory_with("Working on deployment automation", "deployment automation work", &["deployment"]);
    let similar_b = memory_with("Working on deployment scripts", "deployment automation details", &["deployment"]);
    let groups = group_by_overlap(&[similar_a.clone(), similar_b.clone()]);
    assert_eq!(groups.len(), 1, "sufficiently overlapping memories should cluster together");

    let dissimilar_a = memory_with("Working on deployment automation", "deployment automation work", &["deployment"]);
    let dissimilar_b = memory_with("Cooking pasta tonight", "recipe for dinner", &["cooking"]);
    let groups = group_by_overlap(&[dissimilar_a, dissimilar_b]);
    assert_eq!(groups.len(), 2, "non-overlapping memories should not cluster");
}

/// Property 7: after run_lifecycle, no expired record remains; archived
/// count never exceeds expired count; surviving files parse as markdown
/// with the expected header.
#[test]
fn lifecycle_drain_leaves_no_expired_records() {
    let (store, _dir) = test_store();

    for i in 0..3 {
        let mut input = MemoryInput::new(MemoryType::Diary, 2, format!("Session: expiring {i}"));
        input.expires_at = Some(Utc::now() - Duration::seconds(1));
        store.insert(input).unwrap();
    }
    let mut keep = MemoryInput::new(MemoryType::Diary, 2, "Session: still alive");
    keep.expires_at = Some(Utc::now() + Duration::days(1));
    store.insert(keep).unwrap();

    let summary = run_lifecycle(&store, &Config::default()).unwrap();
    assert_eq!(summary.expired, 3);
    assert!(summary.archived <= summary.expired);
    assert!(store.get_expired().unwrap().is_empty());

    let archive_dir = store.data_dir().join("archive");
    for entry in std::fs::read_dir(&archive_dir).unwrap() {
        let contents = std::fs::read_to_string(entry.unwrap().path()).unwrap();
        assert!(contents.starts_with("# Session: expiring"));
        assert!(contents.contains("Type: diary"));
    }
}

/// Property 8 + 9: every synthesized insight names >= diary_threshold unique
/// diary ids, and all consumed diaries drop out of get_unprocessed_diaries.
#[test]
fn compounding_tracks_sources_and_clears_unprocessed() {
    let (store, _dir) = test_store();
    let config = Config::default();

    let mut diary_ids = Vec::new();
    for i in 0..config.compounding.diary_threshold + 1 {
        let mut input = MemoryInput::new(MemoryType::Diary, 2, format!("Session: rollout {i}"));
        input.summary = "rollout automation notes".to_string();
        input.tags = vec!["rollout".to_string(), "automation".to_string()];
        diary_ids.push(store.insert(input).unwrap().id);
    }

    let before = store.get_unprocessed_diaries(50).unwrap();
    assert_eq!(before.len(), diary_ids.len());

    run_compounding(&store, &config).unwrap();

    let insights = store.get_by_type(MemoryType::Insight, 10).unwrap();
    assert_eq!(insights.len(), 1);
    let unique_sources: std::collections::HashSet<_> = insights[0].source_ids.iter().collect();
    assert!(unique_sources.len() >= config.compounding.diary_threshold);

    let after = store.get_unprocessed_diaries(50).unwrap();
    for id in &diary_ids {
        assert!(!after.iter().any(|m| &m.id == id), "consumed diary should no longer be unprocessed");
    }
}
