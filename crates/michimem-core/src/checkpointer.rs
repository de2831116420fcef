//! The Checkpointer (C3): captures a session-resume snapshot before
//! compaction, and reloads the latest one for a session on resume.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use crate::model::Checkpoint;
use crate::transcript::{collapse_newlines, parse_transcript, truncate_chars, Message};

static DECISION_A: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(decided|choosing|going with|using|picked|selected)\s+(.{10,80})").unwrap()
});
static DECISION_B: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(approach|strategy|plan):\s*(.{10,80})").unwrap());
static CHECKPOINT_CORRECTION_A: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(actually|no,|wrong|instead|correction|fix|should be)\s+(.{10,100})").unwrap()
});
static CHECKPOINT_CORRECTION_B: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(don't|do not|never|always|prefer|avoid)\s+(.{10,80})").unwrap()
});
static FILE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[\w/.-]+/)?[\w.-]+\.\w{1,6}").unwrap());

fn checkpoints_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("checkpoints")
}

fn find_decisions(messages: &[Message]) -> Vec<String> {
    let mut decisions = Vec::new();
    for message in messages.iter().filter(|m| m.role != "user").rev() {
        for re in [&*DECISION_A, &*DECISION_B] {
            for caps in re.captures_iter(&message.text) {
                decisions.push(truncate_chars(caps.get(0).unwrap().as_str().trim(), 120));
                if decisions.len() >= 5 {
                    return decisions;
                }
            }
        }
    }
    decisions
}

fn find_corrections(messages: &[Message]) -> Vec<String> {
    let mut corrections = Vec::new();
    for message in messages.iter().filter(|m| m.role == "user").rev() {
        for re in [&*CHECKPOINT_CORRECTION_A, &*CHECKPOINT_CORRECTION_B] {
            for caps in re.captures_iter(&message.text) {
                corrections.push(truncate_chars(caps.get(0).unwrap().as_str().trim(), 120));
                if corrections.len() >= 5 {
                    return corrections;
                }
            }
        }
    }
    corrections
}

fn find_files(messages: &[Message]) -> Vec<String> {
    let mut files = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for message in messages {
        let serialized = serde_json::json!({ "role": message.role, "content": message.text }).to_string();
        for mat in FILE_PATH.find_iter(&serialized) {
            let candidate = mat.as_str();
            if !candidate.contains('/')
                || candidate.starts_with("http")
                || candidate.contains("node_modules")
            {
                continue;
            }
            if seen.insert(candidate.to_string()) {
                files.push(candidate.to_string());
            }
            if files.len() >= 10 {
                return files;
            }
        }
    }
    files
}

fn current_task(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user" && !m.text.trim().is_empty())
        .map(|m| truncate_chars(&collapse_newlines(&m.text), 200))
        .unwrap_or_default()
}

fn context_summary(messages: &[Message]) -> String {
    let start = messages.len().saturating_sub(10);
    let joined = messages[start..]
        .iter()
        .map(|m| format!("{}: {}", m.role, collapse_newlines(&m.text)))
        .collect::<Vec<_>>()
        .join(" | ");
    truncate_chars(&joined, 500)
}

fn build_checkpoint(session_id: &str, messages: &[Message]) -> Checkpoint {
    Checkpoint {
        session_id: session_id.to_string(),
        timestamp: Utc::now(),
        current_task: current_task(messages),
        decisions: find_decisions(messages),
        files_modified: find_files(messages),
        corrections: find_corrections(messages),
        context_summary: context_summary(messages),
    }
}

/// Parse the transcript, build a Checkpoint, and write it to
/// `checkpoints/<session_id>-<epoch_ms>.json`. Returns `None` ("no
/// checkpoint") on transcript parse failure, matching the Extractor's soft
/// failure contract.
pub fn create_checkpoint(
    data_dir: &Path,
    session_id: &str,
    transcript_path: &Path,
) -> std::io::Result<Option<Checkpoint>> {
    let messages = parse_transcript(transcript_path);
    if messages.is_empty() {
        return Ok(None);
    }

    let checkpoint = build_checkpoint(session_id, &messages);

    let dir = checkpoints_dir(data_dir);
    std::fs::create_dir_all(&dir)?;
    let epoch_ms = Utc::now().timestamp_millis();
    let path = dir.join(format!("{session_id}-{epoch_ms}.json"));
    let json = serde_json::to_string_pretty(&checkpoint)?;
    std::fs::write(path, json)?;

    Ok(Some(checkpoint))
}

/// Lexicographic descending scan of `checkpoints/<session_id>-*.json`,
/// returning the first one that parses. The epoch-millisecond suffix makes
/// filename order equivalent to creation order within a session.
pub fn get_latest_checkpoint(data_dir: &Path, session_id: &str) -> Option<Checkpoint> {
    let dir = checkpoints_dir(data_dir);
    let prefix = format!("{session_id}-");

    let mut candidates: Vec<_> = std::fs::read_dir(&dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(&prefix) && name.ends_with(".json"))
        .collect();
    candidates.sort_unstable_by(|a, b| b.cmp(a));

    for name in candidates {
        let Ok(contents) = std::fs::read_to_string(dir.join(&name)) else {
            continue;
        };
        if let Ok(checkpoint) = serde_json::from_str(&contents) {
            return Some(checkpoint);
        }
    }
    None
}
