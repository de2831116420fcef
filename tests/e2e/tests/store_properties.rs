//! Black-box properties of the Store and Extractor that don't need a live
//! tool server: FTS coherence, case-insensitive dedup, TTL conformance, and
//! the L0 token budget.

use chrono::{Duration, Utc};
use michimem_core::{Config, MemoryInput, MemoryType, Store};

fn test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    (store, dir)
}

#[test]
fn fts_reflects_insert_update_delete_round_trip() {
    let (store, _dir) = test_store();

    let mut input = MemoryInput::new(MemoryType::Knowledge, 0, "Use tabs");
    input.summary = "prefer tabs over spaces".to_string();
    let memory = store.insert(input).unwrap();

    let hits = store.search("tabs", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.id, memory.id);

    store
        .update(
            memory.id,
            michimem_core::MemoryUpdate {
                title: Some("Use spaces instead".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(store.search("tabs", 5).unwrap().is_empty());
    assert_eq!(store.search("spaces", 5).unwrap().len(), 1);

    store.delete(memory.id).unwrap();
    assert!(store.search("spaces", 5).unwrap().is_empty());
}

#[test]
fn extractor_dedups_corrections_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("transcript.jsonl");
    std::fs::write(
        &transcript,
        [
            r#"{"role":"user","content":"actually, please always format with two-space indent"}"#,
            r#"{"role":"assistant","content":"ok"}"#,
            r#"{"role":"user","content":"ACTUALLY, please always format with two-space indent"}"#,
            r#"{"role":"assistant","content":"got it"}"#,
        ]
        .join("\n"),
    )
    .unwrap();

    let extraction = michimem_core::extract(&transcript, &Config::default());
    assert_eq!(extraction.corrections.len(), 1);
}

#[test]
fn ttl_conformance_by_priority() {
    let (store, _dir) = test_store();
    let config = Config::default();
    let before = Utc::now();

    let mut diary = MemoryInput::new(MemoryType::Diary, 2, "diary");
    diary.expires_at = Some(before + Duration::days(config.ttl.diary_days));
    let diary = store.insert(diary).unwrap();
    let diary_expiry = diary.expires_at.unwrap();
    let expected_diary = before + Duration::days(config.ttl.diary_days);
    assert!((diary_expiry - expected_diary).num_seconds().abs() < 5);

    let mut insight = MemoryInput::new(MemoryType::Insight, 1, "insight");
    insight.expires_at = Some(before + Duration::days(config.ttl.insight_days));
    let insight = store.insert(insight).unwrap();
    let insight_expiry = insight.expires_at.unwrap();
    let expected_insight = before + Duration::days(config.ttl.insight_days);
    assert!((insight_expiry - expected_insight).num_seconds().abs() < 5);

    let knowledge = store
        .insert(MemoryInput::new(MemoryType::Knowledge, 0, "knowledge"))
        .unwrap();
    assert!(knowledge.expires_at.is_none());
}

#[test]
fn build_l0_never_exceeds_configured_budget() {
    let (store, _dir) = test_store();
    let config = Config {
        tokens: michimem_core::config::TokensConfig {
            l0_budget: 40,
            ..Default::default()
        },
        ..Default::default()
    };

    for i in 0..20 {
        let mut input = MemoryInput::new(MemoryType::Knowledge, 0, format!("Fact {i}"));
        input.summary = "x".repeat(80);
        store.insert(input).unwrap();
    }

    let items = michimem_core::build_l0(&store, &config).unwrap();
    let total: usize = items.iter().map(|item| michimem_core::estimate_tokens(&item.text)).sum();
    assert!(total <= config.tokens.l0_budget);
}
