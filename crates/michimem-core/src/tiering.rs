//! The Tiering pipeline (C4): composes token-budgeted L0/L1/L2 views and the
//! markdown blocks the Event Dispatcher injects into the host's context.

use crate::config::Config;
use crate::error::Result;
use crate::model::{Checkpoint, Memory, MemoryType, TieredResult};
use crate::store::Store;

/// `ceil(len(text) / 4)` — the byte-length token estimator used uniformly
/// across the pipeline. Precision is not a contract; the formula is.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

fn render_l0_line(memory: &Memory) -> String {
    format!("{}: {}", memory.title, memory.summary)
}

/// Fill greedily from `memories` while the running estimate (shared across
/// all three L0 groups via `used`) fits `budget`; stop (don't
/// skip-and-continue) on the first item that would overflow it.
fn greedy_fill(memories: Vec<Memory>, budget: usize, used: &mut usize) -> Vec<TieredResult> {
    let mut out = Vec::new();
    for memory in memories {
        let text = render_l0_line(&memory);
        let tokens = estimate_tokens(&text);
        if *used + tokens > budget {
            break;
        }
        *used += tokens;
        out.push(TieredResult { id: memory.id, text });
    }
    out
}

struct L0Groups {
    core: Vec<TieredResult>,
    insights: Vec<TieredResult>,
    shared: Vec<TieredResult>,
}

/// One running token estimate carried across core, insights, and shared so
/// the combined L0 view never exceeds `tokens.l0_budget` (spec §4.4: "same
/// budget" means one cumulative budget, not one per group).
fn build_l0_groups(store: &Store, config: &Config) -> Result<L0Groups> {
    let budget = config.tokens.l0_budget;
    let mut used = 0usize;
    let core = greedy_fill(store.get_by_priority(0, 20)?, budget, &mut used);
    let insights = greedy_fill(store.get_by_type(MemoryType::Insight, 10)?, budget, &mut used);
    let shared = greedy_fill(store.get_by_type(MemoryType::Shared, 5)?, budget, &mut used);
    Ok(L0Groups { core, insights, shared })
}

/// Up to 20 priority-0 records, then up to 10 insights, then up to 5 shared
/// records, greedily filled against one cumulative `tokens.l0_budget`.
pub fn build_l0(store: &Store, config: &Config) -> Result<Vec<TieredResult>> {
    let groups = build_l0_groups(store, config)?;
    let mut out = groups.core;
    out.extend(groups.insights);
    out.extend(groups.shared);
    Ok(out)
}

fn render_l1_paragraph(memory: &Memory) -> String {
    let mut text = format!(
        "**{}** ({}/P{}) [id:{}]\n{}",
        memory.title, memory.memory_type, memory.priority, memory.id, memory.summary
    );
    if !memory.tags.is_empty() {
        text.push_str(&format!("\n[Tags: {}]", memory.tags.join(", ")));
    }
    text
}

/// Render `memories` (in the given order) as paragraphs, accumulating until
/// `tokens.l1_budget` would be exceeded.
pub fn build_l1(memories: &[Memory], config: &Config) -> Vec<TieredResult> {
    let mut out = Vec::new();
    let mut used = 0usize;
    for memory in memories {
        let text = render_l1_paragraph(memory);
        let tokens = estimate_tokens(&text);
        if used + tokens > config.tokens.l1_budget {
            break;
        }
        used += tokens;
        out.push(TieredResult { id: memory.id, text });
    }
    out
}

/// Full single-record render: title, type/priority, tags, timestamps,
/// optional expiry, and complete content.
pub fn build_l2(memory: &Memory) -> TieredResult {
    let mut lines = vec![
        format!("# {}", memory.title),
        format!("Type: {} / Priority {}", memory.memory_type, memory.priority),
    ];
    if !memory.tags.is_empty() {
        lines.push(format!("Tags: {}", memory.tags.join(", ")));
    }
    lines.push(format!("Created: {}", memory.created_at.to_rfc3339()));
    lines.push(format!("Updated: {}", memory.updated_at.to_rfc3339()));
    if let Some(expires_at) = memory.expires_at {
        lines.push(format!("Expires: {}", expires_at.to_rfc3339()));
    }
    lines.push(String::new());
    lines.push(memory.content.clone());

    TieredResult {
        id: memory.id,
        text: lines.join("\n"),
    }
}

fn render_section(out: &mut String, heading: &str, items: &[TieredResult]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("## {heading}\n"));
    for item in items {
        out.push_str(&format!("- {}\n", item.text));
    }
    out.push('\n');
}

/// The auto-injected session-start overview: L0 partitioned into Core
/// Knowledge / Recent Insights / Shared Memories, wrapped in a
/// `<michimem-context>` block. Empty string if there is nothing to show.
pub fn build_l0_context(store: &Store, config: &Config) -> Result<String> {
    let groups = build_l0_groups(store, config)?;
    if groups.core.is_empty() && groups.insights.is_empty() && groups.shared.is_empty() {
        return Ok(String::new());
    }

    let mut body = String::new();
    render_section(&mut body, "Core Knowledge", &groups.core);
    render_section(&mut body, "Recent Insights", &groups.insights);
    render_section(&mut body, "Shared Memories", &groups.shared);

    Ok(format!("<michimem-context>\n{body}</michimem-context>"))
}

/// The session-resume block appended on `SessionStart` when the host
/// resumed from a compaction event.
pub fn build_restore_context(checkpoint: &Checkpoint) -> String {
    let mut body = String::new();

    if !checkpoint.current_task.trim().is_empty() {
        body.push_str(&format!("**Current task**: {}\n\n", checkpoint.current_task));
    }
    if !checkpoint.decisions.is_empty() {
        body.push_str("**Decisions made**:\n");
        for decision in &checkpoint.decisions {
            body.push_str(&format!("- {decision}\n"));
        }
        body.push('\n');
    }
    if !checkpoint.files_modified.is_empty() {
        body.push_str("**Files modified**:\n");
        for file in &checkpoint.files_modified {
            body.push_str(&format!("- {file}\n"));
        }
        body.push('\n');
    }
    if !checkpoint.corrections.is_empty() {
        body.push_str("**User corrections**:\n");
        for correction in &checkpoint.corrections {
            body.push_str(&format!("- {correction}\n"));
        }
        body.push('\n');
    }
    if !checkpoint.context_summary.trim().is_empty() {
        body.push_str(&format!("**Recent context**: {}\n", checkpoint.context_summary));
    }

    format!("<michimem-restore>\n{body}</michimem-restore>")
}
