//! The Extractor (C2): turns a raw line-delimited transcript into candidate
//! diary, correction, and preference records. Best-effort — unreadable
//! files and unparseable lines yield empty output, never an error.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use chrono::{Duration, Utc};
use regex::Regex;

use crate::config::Config;
use crate::model::{MemoryInput, MemoryType};
use crate::transcript::{collapse_newlines, context_window, parse_transcript, truncate_chars, Message};

// Regex catalogs, authoritative per the external interface contract.
static TOPIC_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(working on|implementing|building|fixing|debugging|creating)\s+([\w\s-]{5,30})").unwrap()
});
static TOPIC_NOUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(the\s+)([\w-]+(?:\s+[\w-]+){0,2})\s+(module|service|component|function|class|file)").unwrap()
});
static FILE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:[\w/.-]+/)?[\w.-]+\.\w{1,6}").unwrap());
static CORRECTION_A: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(actually|no,\s*|wrong|instead|correction)[,:]?\s+(.{15,150})").unwrap()
});
static CORRECTION_B: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(don't|do not|never|stop)\s+([\w\s]{10,80})").unwrap());
static PREFERENCE_A: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(always|prefer|I like|I want|I use|please always)\s+(.{10,100})").unwrap()
});
static PREFERENCE_B: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(my preferred|my favorite|I typically|I usually)\s+(.{10,100})").unwrap()
});

fn extract_topics(messages: &[Message]) -> Vec<String> {
    let mut topics = Vec::new();
    let mut seen = HashSet::new();

    for message in messages.iter().take(10) {
        for caps in TOPIC_VERB.captures_iter(&message.text) {
            let topic = caps.get(2).unwrap().as_str().trim().to_lowercase();
            if seen.insert(topic.clone()) {
                topics.push(topic);
            }
            if topics.len() >= 5 {
                return topics;
            }
        }
        for caps in TOPIC_NOUN.captures_iter(&message.text) {
            let noun = caps.get(2).unwrap().as_str().trim();
            let kind = caps.get(3).unwrap().as_str().trim();
            let topic = format!("{noun} {kind}").to_lowercase();
            if seen.insert(topic.clone()) {
                topics.push(topic);
            }
            if topics.len() >= 5 {
                return topics;
            }
        }
    }

    topics
}

fn extract_files(messages: &[Message]) -> Vec<String> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();

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

fn build_diary_title(first_user_text: &str) -> String {
    let collapsed = collapse_newlines(first_user_text);
    if collapsed.is_empty() {
        format!("Session: {}", Utc::now().format("%Y-%m-%d %H:%M UTC"))
    } else {
        format!("Session: {}", truncate_chars(&collapsed, 100))
    }
}

fn build_diary_summary(user_count: usize, assistant_count: usize, topics: &[String]) -> String {
    let mut summary = format!("{user_count} user msgs, {assistant_count} assistant msgs.");
    if !topics.is_empty() {
        summary.push_str(&format!(" Topics: {}", topics.join(", ")));
    }
    summary
}

fn build_diary_content(messages: &[Message], files: &[String]) -> String {
    let start = messages.len().saturating_sub(20);
    let mut lines = Vec::new();
    for message in &messages[start..] {
        let speaker = if message.role == "user" { "**User**" } else { "**Assistant**" };
        lines.push(format!("{speaker}: {}", truncate_chars(&message.text, 200)));
    }
    if !files.is_empty() {
        lines.push(format!("Files referenced: {}", files.join(", ")));
    }
    lines.join("\n")
}

/// Build the single candidate diary for a transcript, if any (requires at
/// least 4 messages).
fn build_diary(messages: &[Message], config: &Config) -> Option<MemoryInput> {
    if messages.len() < 4 {
        return None;
    }

    let user_count = messages.iter().filter(|m| m.role == "user").count();
    let assistant_count = messages.iter().filter(|m| m.role != "user").count();
    let first_user_text = messages
        .iter()
        .find(|m| m.role == "user")
        .map(|m| m.text.as_str())
        .unwrap_or("");

    let topics = extract_topics(messages);
    let files = extract_files(&messages[messages.len().saturating_sub(20)..]);

    let mut input = MemoryInput::new(MemoryType::Diary, 2, build_diary_title(first_user_text));
    input.summary = build_diary_summary(user_count, assistant_count, &topics);
    input.content = build_diary_content(messages, &files);
    input.tags = topics;
    input.expires_at = Some(Utc::now() + Duration::days(config.ttl.diary_days));
    Some(input)
}

fn dedup_by_title(candidates: Vec<MemoryInput>) -> Vec<MemoryInput> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.title.to_lowercase()))
        .collect()
}

fn extract_corrections(messages: &[Message]) -> Vec<MemoryInput> {
    let mut out = Vec::new();
    for message in messages.iter().filter(|m| m.role == "user") {
        for caps in CORRECTION_A.captures_iter(&message.text) {
            let subtype = caps.get(1).unwrap().as_str().trim().to_lowercase();
            out.push(make_correction(&message.text, caps.get(0).unwrap(), &subtype));
        }
        for caps in CORRECTION_B.captures_iter(&message.text) {
            out.push(make_correction(&message.text, caps.get(0).unwrap(), "prohibition"));
        }
    }
    dedup_by_title(out)
}

fn make_correction(text: &str, whole: regex::Match<'_>, subtype: &str) -> MemoryInput {
    let matched = whole.as_str();
    let mut input = MemoryInput::new(
        MemoryType::Knowledge,
        0,
        format!("Correction: {}", truncate_chars(matched, 60)),
    );
    input.summary = truncate_chars(matched, 150);
    input.content = context_window(text, whole.start(), whole.end());
    input.tags = vec!["correction".to_string(), subtype.to_string()];
    input
}

fn extract_preferences(messages: &[Message]) -> Vec<MemoryInput> {
    let mut out = Vec::new();
    for message in messages.iter().filter(|m| m.role == "user") {
        for caps in PREFERENCE_A.captures_iter(&message.text) {
            out.push(make_preference(&message.text, caps.get(0).unwrap()));
        }
        for caps in PREFERENCE_B.captures_iter(&message.text) {
            out.push(make_preference(&message.text, caps.get(0).unwrap()));
        }
    }
    dedup_by_title(out)
}

fn make_preference(text: &str, whole: regex::Match<'_>) -> MemoryInput {
    let matched = whole.as_str();
    let mut input = MemoryInput::new(
        MemoryType::Knowledge,
        0,
        format!("Preference: {}", truncate_chars(matched, 60)),
    );
    input.summary = truncate_chars(matched, 150);
    input.content = context_window(text, whole.start(), whole.end());
    input.tags = vec!["preference".to_string()];
    input
}

/// The three candidate streams the Extractor produces from one transcript.
pub struct Extraction {
    pub diary: Option<MemoryInput>,
    pub corrections: Vec<MemoryInput>,
    pub preferences: Vec<MemoryInput>,
}

pub fn extract(path: &Path, config: &Config) -> Extraction {
    let messages = parse_transcript(path);
    Extraction {
        diary: build_diary(&messages, config),
        corrections: extract_corrections(&messages),
        preferences: extract_preferences(&messages),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_transcript(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[test]
    fn missing_file_yields_empty_extraction() {
        let extraction = extract(Path::new("/nonexistent/transcript.jsonl"), &Config::default());
        assert!(extraction.diary.is_none());
        assert!(extraction.corrections.is_empty());
        assert!(extraction.preferences.is_empty());
    }

    #[test]
    fn fewer_than_four_messages_yields_no_diary() {
        let file = write_transcript(&[
            r#"{"role":"user","content":"hi"}"#,
            r#"{"role":"assistant","content":"hello"}"#,
        ]);
        let extraction = extract(file.path(), &Config::default());
        assert!(extraction.diary.is_none());
    }

    #[test]
    fn four_or_more_messages_yields_one_diary() {
        let file = write_transcript(&[
            r#"{"role":"user","content":"working on the auth module today"}"#,
            r#"{"role":"assistant","content":"sounds good"}"#,
            r#"{"role":"user","content":"actually, let's use sessions instead of tokens for this case"}"#,
            r#"{"role":"assistant","content":"updating now"}"#,
        ]);
        let extraction = extract(file.path(), &Config::default());
        let diary = extraction.diary.expect("expected a diary");
        assert!(diary.title.starts_with("Session: "));
        assert_eq!(diary.priority, 2);
        assert!(diary.expires_at.is_some());
    }

    #[test]
    fn content_blocks_array_extracts_only_text_blocks() {
        let file = write_transcript(&[
            r#"{"role":"user","content":[{"type":"text","text":"working on the search feature"},{"type":"image","source":"x"}]}"#,
            r#"{"role":"assistant","content":"ok"}"#,
            r#"{"role":"user","content":"prefer using snake_case for this project"}"#,
            r#"{"role":"assistant","content":"noted"}"#,
        ]);
        let extraction = extract(file.path(), &Config::default());
        assert!(extraction.diary.is_some());
        assert!(!extraction.preferences.is_empty());
    }

    #[test]
    fn corrections_dedup_case_insensitively() {
        let file = write_transcript(&[
            r#"{"role":"user","content":"actually, please use tabs for indentation in this repo"}"#,
            r#"{"role":"assistant","content":"ok"}"#,
            r#"{"role":"user","content":"ACTUALLY, please use tabs for indentation in this repo"}"#,
            r#"{"role":"assistant","content":"got it"}"#,
        ]);
        let extraction = extract(file.path(), &Config::default());
        assert_eq!(extraction.corrections.len(), 1);
    }

    #[test]
    fn unparseable_lines_are_skipped_not_fatal() {
        let file = write_transcript(&[
            "not json at all",
            r#"{"role":"user","content":"working on the api module"}"#,
            r#"{"role":"assistant","content":"sure"}"#,
            r#"{"role":"user","content":"always use four spaces for this codebase please"}"#,
            r#"{"role":"assistant","content":"will do"}"#,
        ]);
        let extraction = extract(file.path(), &Config::default());
        assert!(extraction.diary.is_some());
    }
}
