//! Lifecycle & Compounding (C5): expires and archives records, and
//! synthesizes higher-tier memories (diary→insight→knowledge) by clustering.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::model::{Memory, MemoryInput, MemoryType};
use crate::store::Store;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w]+").unwrap());

/// Result of one `run_lifecycle` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LifecycleSummary {
    pub expired: usize,
    pub archived: usize,
}

fn render_archive_markdown(memory: &Memory) -> String {
    let mut lines = vec![
        format!("# {}", memory.title),
        format!("Type: {}", memory.memory_type),
        format!("Priority: {}", memory.priority),
        format!("Created: {}", memory.created_at.to_rfc3339()),
    ];
    if let Some(expires_at) = memory.expires_at {
        lines.push(format!("Expired: {}", expires_at.to_rfc3339()));
    }
    if !memory.tags.is_empty() {
        lines.push(format!("Tags: {}", memory.tags.join(", ")));
    }
    lines.push(String::new());
    lines.push(memory.summary.clone());
    lines.push(String::new());
    lines.push(memory.content.clone());
    lines.push(String::new());
    lines.join("\n")
}

fn write_archive(archive_dir: &Path, memory: &Memory) -> std::io::Result<()> {
    let date = memory
        .expires_at
        .unwrap_or(memory.updated_at)
        .format("%Y-%m-%d");
    let id_prefix = &memory.id.simple().to_string()[..8];
    let path = archive_dir.join(format!("{date}-{id_prefix}.md"));
    std::fs::write(path, render_archive_markdown(memory))
}

/// Archive every expired record to `archive/<date>-<id_prefix>.md`, then
/// delete it from the store regardless of whether the archive write
/// succeeded. Archive failures are tolerated; only the delete is load-bearing.
pub fn run_lifecycle(store: &Store, _config: &Config) -> Result<LifecycleSummary> {
    let expired = store.get_expired()?;
    let archive_dir = store.data_dir().join("archive");
    std::fs::create_dir_all(&archive_dir)?;

    let mut summary = LifecycleSummary::default();
    for memory in &expired {
        let archived = write_archive(&archive_dir, memory).is_ok();
        if archived {
            summary.archived += 1;
        }
        store.delete(memory.id)?;
        store.record_metric(
            "lifecycle_expire",
            &serde_json::json!({
                "id": memory.id,
                "type": memory.memory_type.as_str(),
                "archived": archived,
            }),
        );
        summary.expired += 1;
    }
    Ok(summary)
}

/// Result of one `run_compounding` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompoundingSummary {
    pub insights_created: usize,
    pub knowledge_created: usize,
    pub diaries_processed: usize,
}

fn words_of(memory: &Memory) -> HashSet<String> {
    let joined = format!("{} {} {}", memory.title, memory.summary, memory.tags.join(" "));
    NON_WORD
        .split(&joined)
        .filter(|token| token.len() > 3)
        .map(|token| token.to_lowercase())
        .collect()
}

fn jaccard_over_min(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let denom = a.len().min(b.len());
    intersection as f64 / denom as f64
}

/// Deterministic first-fit clustering by word overlap (Jaccard-over-min on
/// words longer than 3 chars, threshold 0.15). Input order is preserved and
/// drives both seed selection and candidate scan order; output is a cover
/// of the input (every item appears in exactly one group).
pub fn group_by_overlap(memories: &[Memory]) -> Vec<Vec<Memory>> {
    let words: Vec<HashSet<String>> = memories.iter().map(words_of).collect();
    let mut assigned = vec![false; memories.len()];
    let mut groups = Vec::new();

    for seed in 0..memories.len() {
        if assigned[seed] {
            continue;
        }
        let mut members = vec![seed];
        assigned[seed] = true;
        for candidate in 0..memories.len() {
            if assigned[candidate] {
                continue;
            }
            if jaccard_over_min(&words[seed], &words[candidate]) >= 0.15 {
                members.push(candidate);
                assigned[candidate] = true;
            }
        }
        groups.push(members.into_iter().map(|i| memories[i].clone()).collect());
    }
    groups
}

/// Distinct tags across `cluster`, ranked by frequency (ties broken
/// alphabetically for determinism), capped at `cap`.
fn top_tags(cluster: &[Memory], cap: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for memory in cluster {
        for tag in &memory.tags {
            if !counts.contains_key(tag) {
                order.push(tag.clone());
            }
            *counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }
    order.sort_by(|a, b| counts[b].cmp(&counts[a]).then_with(|| a.cmp(b)));
    order.truncate(cap);
    order
}

fn synthesize(
    cluster: &[Memory],
    memory_type: MemoryType,
    priority: u8,
    expires_at: Option<DateTime<Utc>>,
    auto_tag: &str,
) -> MemoryInput {
    let n = cluster.len();
    let top5 = top_tags(cluster, 5);
    let tag_str = top5.join(", ");

    let earliest = cluster.iter().map(|m| m.created_at).min().unwrap();
    let latest = cluster.iter().map(|m| m.created_at).max().unwrap();

    let mut content_lines: Vec<String> = cluster
        .iter()
        .map(|m| format!("- {}: {}", m.title, m.summary))
        .collect();
    content_lines.push(format!(
        "Date range: {} to {}",
        earliest.to_rfc3339(),
        latest.to_rfc3339()
    ));

    let mut tags = top5;
    if !tags.iter().any(|t| t == auto_tag) {
        tags.push(auto_tag.to_string());
    }

    let mut input = MemoryInput::new(
        memory_type,
        priority,
        format!("Pattern: {tag_str} (from {n} sessions)"),
    );
    input.summary = format!("Recurring pattern across {n} sessions involving {tag_str}");
    input.content = content_lines.join("\n");
    input.tags = tags;
    input.source_ids = cluster.iter().map(|m| m.id).collect();
    input.expires_at = expires_at;
    input
}

/// Stage 1 (diary→insight) then stage 2 (insight→knowledge), each gated by
/// its own threshold and each clustered independently via
/// [`group_by_overlap`].
pub fn run_compounding(store: &Store, config: &Config) -> Result<CompoundingSummary> {
    let mut summary = CompoundingSummary::default();

    let diaries = store.get_unprocessed_diaries(50)?;
    if diaries.len() >= config.compounding.diary_threshold {
        for cluster in group_by_overlap(&diaries) {
            if cluster.len() < config.compounding.diary_threshold {
                continue;
            }
            let expires_at = Utc::now() + Duration::days(config.ttl.insight_days);
            let insight = synthesize(&cluster, MemoryType::Insight, 1, Some(expires_at), "auto-insight");
            store.insert(insight)?;
            summary.insights_created += 1;
            summary.diaries_processed += cluster.len();
        }
        store.record_metric(
            "compounding_diary_to_insight",
            &serde_json::json!({
                "insights_created": summary.insights_created,
                "diaries_processed": summary.diaries_processed,
            }),
        );
    }

    let insights = store.get_by_type(MemoryType::Insight, 50)?;
    if insights.len() >= config.compounding.insight_threshold {
        for cluster in group_by_overlap(&insights) {
            if cluster.len() < config.compounding.insight_threshold {
                continue;
            }
            let knowledge = synthesize(&cluster, MemoryType::Knowledge, 0, None, "auto-knowledge");
            store.insert(knowledge)?;
            summary.knowledge_created += 1;
        }
        store.record_metric(
            "compounding_insight_to_knowledge",
            &serde_json::json!({ "knowledge_created": summary.knowledge_created }),
        );
    }

    Ok(summary)
}
