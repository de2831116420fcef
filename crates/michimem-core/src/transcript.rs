//! Shared line-delimited transcript parsing, used by both the Extractor and
//! the Checkpointer. Soft failure throughout: a missing file or an
//! unparseable line is simply absent from the result.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawMessage {
    role: String,
    #[serde(default)]
    content: Value,
}

/// A single content block inside a message's `content` array. Only `text`
/// blocks contribute text; anything else is structurally recognized and
/// discarded (see design notes: content is a sum type over `{Text | Other}`).
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: String,
    pub text: String,
}

fn extract_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| serde_json::from_value::<ContentBlock>(item.clone()).ok())
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

pub fn parse_transcript(path: &Path) -> Vec<Message> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<RawMessage>(line).ok())
        .map(|raw| Message {
            text: extract_text(&raw.content),
            role: raw.role,
        })
        .collect()
}

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

pub fn collapse_newlines(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn context_window(text: &str, start: usize, end: usize) -> String {
    const RADIUS: usize = 100;
    let lower = text[..start]
        .char_indices()
        .rev()
        .nth(RADIUS)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let upper = text[end..]
        .char_indices()
        .nth(RADIUS)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    text[lower..upper].trim().to_string()
}
