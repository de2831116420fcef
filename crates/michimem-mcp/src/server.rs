//! MCP Server Core (Tool Server)
//!
//! Speaks the MCP tool-invocation protocol over stdio, exposing the five
//! tools of the external interface contract: `mem_search`, `mem_recall`,
//! `mem_store`, `mem_stats`, `mem_restore`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use michimem_core::{build_l2, build_restore_context, get_latest_checkpoint, Config, MemoryInput, MemoryType, MemoryUpdate, Store};

use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerInfo, ToolDescription,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};

/// One long-lived tool server acquires the Store for its lifetime and
/// services `tools/call` requests sequentially over stdio.
pub struct McpServer {
    store: Arc<Store>,
    config: Config,
    initialized: bool,
}

impl McpServer {
    pub fn new(store: Arc<Store>, config: Config) -> Self {
        Self {
            store,
            config,
            initialized: false,
        }
    }

    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling request");

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!(method = %request.method, "rejecting request before initialize");
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params),
            "ping" => Ok(serde_json::json!({})),
            other => {
                warn!(method = other, "unknown method");
                Err(JsonRpcError::method_not_found())
            }
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => {
                serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?
            }
            None => InitializeRequest::default(),
        };

        // Claude Desktop rejects servers advertising a newer protocol
        // version than the client requested.
        let negotiated = if request.protocol_version.as_str() < MCP_VERSION {
            request.protocol_version.clone()
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;

        let mut tools_cap = HashMap::new();
        tools_cap.insert("listChanged".to_string(), serde_json::json!(false));

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "michimem".to_string(),
                version: michimem_core::VERSION.to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(tools_cap),
            },
            instructions: Some(
                "MichiMem is a persistent memory store. Use mem_search to find prior knowledge, \
                 mem_recall for the full record behind a search hit, mem_store to save a new fact \
                 or insight (re-using the title updates it in place), mem_stats for store health, \
                 and mem_restore to recover session state after a compaction."
                    .to_string(),
            ),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tools = vec![
            ToolDescription {
                name: "mem_search".to_string(),
                description: Some(
                    "Full-text search over stored memories (FTS5 syntax: phrases, boolean operators, prefix *)."
                        .to_string(),
                ),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "FTS5 query expression" },
                        "limit": { "type": "integer", "description": "Max results", "default": 10, "minimum": 1, "maximum": 100 }
                    },
                    "required": ["query"]
                }),
            },
            ToolDescription {
                name: "mem_recall".to_string(),
                description: Some(
                    "Full record render (title, type/priority, tags, timestamps, content) for a memory id."
                        .to_string(),
                ),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "id": { "type": "string", "description": "Memory id" } },
                    "required": ["id"]
                }),
            },
            ToolDescription {
                name: "mem_store".to_string(),
                description: Some(
                    "Save or update a memory. A matching (title, type) pair updates the existing record in place."
                        .to_string(),
                ),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "summary": { "type": "string" },
                        "content": { "type": "string" },
                        "type": { "type": "string", "enum": ["diary", "insight", "knowledge", "shared"], "default": "insight" },
                        "priority": { "type": "integer", "enum": [0, 1, 2], "default": 1 },
                        "tags": { "type": "array", "items": { "type": "string" }, "default": [] }
                    },
                    "required": ["title", "summary", "content"]
                }),
            },
            ToolDescription {
                name: "mem_stats".to_string(),
                description: Some("Aggregate counts: total, by type, by priority, expired.".to_string()),
                input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            },
            ToolDescription {
                name: "mem_restore".to_string(),
                description: Some(
                    "The latest session-resume checkpoint for a session id, rendered as a restore block."
                        .to_string(),
                ),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": { "session_id": { "type": "string" } },
                    "required": ["session_id"]
                }),
            },
        ];

        serde_json::to_value(ListToolsResult { tools })
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => {
                serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?
            }
            None => return Err(JsonRpcError::invalid_params("missing tool call parameters")),
        };

        let result = match request.name.as_str() {
            "mem_search" => self.tool_mem_search(request.arguments),
            "mem_recall" => self.tool_mem_recall(request.arguments),
            "mem_store" => self.tool_mem_store(request.arguments),
            "mem_stats" => self.tool_mem_stats(),
            "mem_restore" => self.tool_mem_restore(request.arguments),
            other => CallToolResult::error(format!("unknown tool: {other}")),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn tool_mem_search(&self, args: Option<Value>) -> CallToolResult {
        #[derive(Deserialize)]
        struct Args {
            query: String,
            #[serde(default = "default_limit")]
            limit: usize,
        }
        fn default_limit() -> usize {
            10
        }

        let args: Args = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return CallToolResult::error(e),
        };

        let hits = match self.store.search(&args.query, args.limit) {
            Ok(hits) => hits,
            Err(e) => return CallToolResult::error(e.to_string()),
        };

        if hits.is_empty() {
            return CallToolResult::text("No memories found.");
        }

        let body = hits
            .iter()
            .map(|hit| {
                format!(
                    "**{}** ({}/P{}) [id:{}]\n{}",
                    hit.memory.title, hit.memory.memory_type, hit.memory.priority, hit.memory.id, hit.memory.summary
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        CallToolResult::text(body)
    }

    fn tool_mem_recall(&self, args: Option<Value>) -> CallToolResult {
        #[derive(Deserialize)]
        struct Args {
            id: String,
        }

        let args: Args = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return CallToolResult::error(e),
        };

        let Ok(id) = Uuid::parse_str(&args.id) else {
            return CallToolResult::error(format!("Memory not found: {}", args.id));
        };

        match self.store.get_by_id(id) {
            Ok(Some(memory)) => CallToolResult::text(build_l2(&memory).text),
            Ok(None) => CallToolResult::error(format!("Memory not found: {}", args.id)),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }

    fn tool_mem_store(&self, args: Option<Value>) -> CallToolResult {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Args {
            title: String,
            summary: String,
            content: String,
            #[serde(default = "default_type", rename = "type")]
            memory_type: String,
            #[serde(default = "default_priority")]
            priority: u8,
            #[serde(default)]
            tags: Vec<String>,
        }
        fn default_type() -> String {
            "insight".to_string()
        }
        fn default_priority() -> u8 {
            1
        }

        let args: Args = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return CallToolResult::error(e),
        };

        let memory_type: MemoryType = match args.memory_type.parse() {
            Ok(t) => t,
            Err(_) => return CallToolResult::error(format!("unknown memory type: {}", args.memory_type)),
        };

        let existing = match self.store.get_by_type(memory_type, 10_000) {
            Ok(rows) => rows.into_iter().find(|m| m.title.eq_ignore_ascii_case(&args.title)),
            Err(e) => return CallToolResult::error(e.to_string()),
        };

        if let Some(existing) = existing {
            let update = MemoryUpdate {
                summary: Some(args.summary),
                content: Some(args.content),
                ..Default::default()
            };
            if let Err(e) = self.store.update(existing.id, update) {
                return CallToolResult::error(e.to_string());
            }
            return CallToolResult::text(
                serde_json::json!({ "id": existing.id.to_string(), "updated": true }).to_string(),
            );
        }

        let expires_at = match args.priority {
            1 => Some(Utc::now() + Duration::days(self.config.ttl.insight_days)),
            2 => Some(Utc::now() + Duration::days(self.config.ttl.diary_days)),
            _ => None,
        };

        let mut input = MemoryInput::new(memory_type, args.priority, args.title);
        input.summary = args.summary;
        input.content = args.content;
        input.tags = args.tags;
        input.expires_at = expires_at;

        match self.store.insert(input) {
            Ok(memory) => CallToolResult::text(
                serde_json::json!({ "id": memory.id.to_string(), "updated": false }).to_string(),
            ),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }

    fn tool_mem_stats(&self) -> CallToolResult {
        match self.store.stats() {
            Ok(stats) => {
                let mut lines = vec![format!("**Total**: {}", stats.total), "**By type**:".to_string()];
                for (kind, count) in &stats.by_type {
                    lines.push(format!("- {kind}: {count}"));
                }
                lines.push("**By priority**:".to_string());
                for (priority, count) in &stats.by_priority {
                    lines.push(format!("- P{priority}: {count}"));
                }
                lines.push(format!("**Expired**: {}", stats.expired));
                CallToolResult::text(lines.join("\n"))
            }
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }

    fn tool_mem_restore(&self, args: Option<Value>) -> CallToolResult {
        #[derive(Deserialize)]
        struct Args {
            session_id: String,
        }

        let args: Args = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return CallToolResult::error(e),
        };

        match get_latest_checkpoint(self.store.data_dir(), &args.session_id) {
            Some(checkpoint) => CallToolResult::text(build_restore_context(&checkpoint)),
            None => CallToolResult::error(format!("no checkpoint found for session: {}", args.session_id)),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Option<Value>) -> Result<T, String> {
    match args {
        Some(v) => serde_json::from_value(v).map_err(|e| format!("invalid arguments: {e}")),
        None => Err("missing arguments".to_string()),
    }
}
