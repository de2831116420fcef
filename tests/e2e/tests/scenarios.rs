//! The six end-to-end scenarios named in spec.md §8 (S1-S6), each exercised
//! against the public `michimem-core` API without a live tool server.

use chrono::{Duration, Utc};
use michimem_core::{
    build_l0_context, config::TokensConfig, create_checkpoint, get_latest_checkpoint, run_lifecycle,
    Config, MemoryInput, MemoryType, MemoryUpdate, Store,
};

fn test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    (store, dir)
}

/// S1 Store+search: insert a knowledge record, then search finds exactly it
/// with a rank present.
#[test]
fn s1_store_and_search() {
    let (store, _dir) = test_store();

    let mut input = MemoryInput::new(MemoryType::Knowledge, 0, "Use tabs");
    input.summary = "prefer tabs".to_string();
    input.content = "indentation convention for this repo".to_string();
    store.insert(input).unwrap();

    let hits = store.search("tabs", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.title, "Use tabs");
}

/// S2 Dedup update: `mem_store`-equivalent semantics via direct Store calls —
/// a second write with the same (title, type) updates the existing record.
#[test]
fn s2_dedup_update() {
    let (store, _dir) = test_store();

    let mut first = MemoryInput::new(MemoryType::Insight, 1, "Auth flow");
    first.summary = "s1".to_string();
    first.content = "c1".to_string();
    let memory = store.insert(first).unwrap();

    let existing = store
        .get_by_type(MemoryType::Insight, 10)
        .unwrap()
        .into_iter()
        .find(|m| m.title.eq_ignore_ascii_case("auth flow"));
    assert_eq!(existing.as_ref().map(|m| m.id), Some(memory.id));

    store
        .update(
            memory.id,
            MemoryUpdate {
                summary: Some("s2".to_string()),
                content: Some("c2".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let insights = store.get_by_type(MemoryType::Insight, 10).unwrap();
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].summary, "s2");
    assert_eq!(insights[0].content, "c2");
}

/// S3 Compact restore: a checkpoint written for session `abc` is reloaded
/// and renders a `<michimem-restore>` block naming the current task.
#[test]
fn s3_compact_restore() {
    let dir = tempfile::tempdir().unwrap();
    let transcript = dir.path().join("transcript.jsonl");
    std::fs::write(
        &transcript,
        [
            r#"{"role":"user","content":"fix login"}"#,
            r#"{"role":"assistant","content":"decided to use sessions instead of JWTs"}"#,
            r#"{"role":"user","content":"actually, let's also check /src/auth/login.rs"}"#,
        ]
        .join("\n"),
    )
    .unwrap();

    create_checkpoint(dir.path(), "abc", &transcript).unwrap();

    let checkpoint = get_latest_checkpoint(dir.path(), "abc").expect("checkpoint should reload");
    let restored = michimem_core::build_restore_context(&checkpoint);
    assert!(restored.contains("<michimem-restore>"));
    assert!(restored.contains("Current task**: fix login"));
}

/// S4 Compounding: six diaries sharing the word "deployment" cluster into
/// exactly one insight with >= diary_threshold source ids and the
/// `auto-insight` tag.
#[test]
fn s4_compounding_creates_one_insight() {
    let (store, _dir) = test_store();
    let config = Config::default();

    for i in 0..6 {
        let mut input = MemoryInput::new(MemoryType::Diary, 2, format!("Session: deployment day {i}"));
        input.summary = "working through the deployment pipeline".to_string();
        input.tags = vec!["deployment".to_string(), "pipeline".to_string()];
        store.insert(input).unwrap();
    }

    let summary = michimem_core::run_compounding(&store, &config).unwrap();
    assert_eq!(summary.insights_created, 1);

    let insights = store.get_by_type(MemoryType::Insight, 10).unwrap();
    assert_eq!(insights.len(), 1);
    assert!(insights[0].source_ids.len() >= config.compounding.diary_threshold);
    assert!(insights[0].tags.contains(&"auto-insight".to_string()));
}

/// S5 Lifecycle: an already-expired diary is drained, archived, and gone
/// from the store, and the archive file carries the original title.
#[test]
fn s5_lifecycle_drains_and_archives() {
    let (store, _dir) = test_store();

    let mut input = MemoryInput::new(MemoryType::Diary, 2, "Session: to be archived");
    input.content = "body of the archived session".to_string();
    input.expires_at = Some(Utc::now() - Duration::seconds(1));
    let inserted = store.insert(input).unwrap();

    let summary = run_lifecycle(&store, &Config::default()).unwrap();
    assert_eq!(summary.expired, 1);
    assert_eq!(summary.archived, 1);
    assert!(store.get_by_id(inserted.id).unwrap().is_none());

    let archive_dir = store.data_dir().join("archive");
    let entries: Vec<_> = std::fs::read_dir(&archive_dir).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(entries.len(), 1);
    let contents = std::fs::read_to_string(entries[0].path()).unwrap();
    assert!(contents.contains("Session: to be archived"));
}

/// S6 L0 budget: 30 priority-0 records whose rendered line is ~300 chars
/// each, under an l0_budget of 200 tokens, yields at most 2 items wrapped in
/// `<michimem-context>`.
#[test]
fn s6_l0_budget_caps_context() {
    let (store, _dir) = test_store();
    let config = Config {
        tokens: TokensConfig {
            l0_budget: 200,
            ..Default::default()
        },
        ..Default::default()
    };

    for i in 0..30 {
        let mut input = MemoryInput::new(MemoryType::Knowledge, 0, format!("Fact {i}"));
        input.summary = "x".repeat(290);
        store.insert(input).unwrap();
    }

    let items = michimem_core::build_l0(&store, &config).unwrap();
    assert!(items.len() <= 2);

    let context = build_l0_context(&store, &config).unwrap();
    assert!(context.starts_with("<michimem-context>"));
    assert!(context.ends_with("</michimem-context>"));
}
