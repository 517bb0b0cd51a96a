use std::time::Duration;

use serde_json::{json, Value};

use crate::{truncate_text, KnowledgeConfig, ToolContext, ToolExecutor, ToolInvocation};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "mcp-session-id";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const RAW_EXCERPT_CHARS: usize = 400;
const DEFAULT_SEARCH_LIMIT: u64 = 5;

/// JSON-RPC client for the remote knowledge service. Sessions are
/// established lazily: the first tool call performs the initialize handshake
/// and captures the session token from the response headers.
pub(crate) struct KnowledgeClient {
    url: String,
    agent: ureq::Agent,
    session: Option<String>,
    ready: bool,
    next_id: i64,
}

impl KnowledgeClient {
    pub(crate) fn new(config: &KnowledgeConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        KnowledgeClient {
            url: config.url.clone(),
            agent,
            session: None,
            ready: false,
            next_id: 0,
        }
    }

    fn next_request_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn post(&mut self, payload: Value) -> Result<String, String> {
        let mut request = self
            .agent
            .post(&self.url)
            .set("content-type", "application/json")
            .set("accept", "application/json, text/event-stream");
        if let Some(session) = &self.session {
            request = request.set(SESSION_HEADER, session);
        }
        match request.send_json(payload) {
            Ok(response) => {
                if self.session.is_none() {
                    if let Some(sid) = response.header(SESSION_HEADER) {
                        self.session = Some(sid.to_string());
                    }
                }
                response
                    .into_string()
                    .map_err(|e| format!("knowledge response read failed: {e}"))
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(format!(
                    "knowledge service returned {code}: {}",
                    truncate_text(body.trim(), RAW_EXCERPT_CHARS)
                ))
            }
            Err(ureq::Error::Transport(t)) => Err(format!("knowledge transport: {t}")),
        }
    }

    fn ensure_ready(&mut self) -> Result<(), String> {
        if self.ready {
            return Ok(());
        }
        let id = self.next_request_id();
        let body = self.post(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "toolrelay",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }
        }))?;
        if let Some(parsed) = parse_response_body(&body) {
            if let Some(error) = parsed.get("error") {
                return Err(format!(
                    "knowledge initialize failed: {}",
                    rpc_error_text(error)
                ));
            }
        }
        if self.session.is_none() {
            return Err("knowledge service issued no session id".to_string());
        }
        self.post(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))?;
        self.ready = true;
        eprintln!("[knowledge] session established with {}", self.url);
        Ok(())
    }

    pub(crate) fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String, String> {
        self.ensure_ready()?;
        let id = self.next_request_id();
        let body = self.post(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }))?;
        render_tool_result(&body)
    }
}

/// Pull a JSON-RPC payload out of a response body. Streaming responses frame
/// the payload in `data:` lines; plain responses are bare JSON.
pub(crate) fn parse_response_body(body: &str) -> Option<Value> {
    for line in body.lines() {
        if let Some(rest) = line.trim_start().strip_prefix("data:") {
            if let Ok(value) = serde_json::from_str::<Value>(rest.trim()) {
                return Some(value);
            }
        }
    }
    serde_json::from_str(body.trim()).ok()
}

fn rpc_error_text(error: &Value) -> String {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    format!("error {code}: {message}")
}

/// Turn a tools/call response body into display text. Bodies that parse as
/// neither SSE frames nor JSON come back as a marked raw excerpt so callers
/// can tell an unreadable reply from an empty one.
pub(crate) fn render_tool_result(body: &str) -> Result<String, String> {
    let Some(parsed) = parse_response_body(body) else {
        return Ok(format!(
            "[unparsed response] {}",
            truncate_text(body.trim(), RAW_EXCERPT_CHARS)
        ));
    };
    if let Some(error) = parsed.get("error") {
        return Err(format!("knowledge {}", rpc_error_text(error)));
    }
    let Some(result) = parsed.get("result") else {
        return Err("knowledge response missing 'result'".to_string());
    };

    // MCP-style content arrays carry the text payload per item.
    if let Some(items) = result.get("content").and_then(Value::as_array) {
        let texts: Vec<&str> = items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect();
        if !texts.is_empty() {
            return Ok(texts.join("\n"));
        }
    }
    serde_json::to_string_pretty(result).map_err(|e| format!("knowledge result render: {e}"))
}

// === executors ===

pub(crate) struct KnowledgeSearchTool;

impl ToolExecutor for KnowledgeSearchTool {
    fn name(&self) -> &'static str {
        "knowledge_search"
    }

    fn description(&self) -> &'static str {
        "Search the remote knowledge service."
    }

    fn usage(&self) -> &'static str {
        r#"query="what to look for" limit="5""#
    }

    fn run(&self, inv: &ToolInvocation, ctx: &mut ToolContext) -> String {
        let Some(query) = inv.attr("query") else {
            return "[ERROR] knowledge_search requires a query attribute".to_string();
        };
        let limit = inv
            .attr("limit")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SEARCH_LIMIT);
        let client = match ctx.knowledge() {
            Ok(client) => client,
            Err(e) => return format!("[ERROR] {e}"),
        };
        match client.call_tool("recall_search", json!({ "query": query, "top_k": limit })) {
            Ok(text) => text,
            Err(e) => format!("[ERROR] {e}"),
        }
    }
}

pub(crate) struct KnowledgeSourcesTool;

impl ToolExecutor for KnowledgeSourcesTool {
    fn name(&self) -> &'static str {
        "knowledge_sources"
    }

    fn description(&self) -> &'static str {
        "List the sources available in the remote knowledge service."
    }

    fn usage(&self) -> &'static str {
        "(no attributes)"
    }

    fn run(&self, _inv: &ToolInvocation, ctx: &mut ToolContext) -> String {
        let client = match ctx.knowledge() {
            Ok(client) => client,
            Err(e) => return format!("[ERROR] {e}"),
        };
        match client.call_tool("list_sources", json!({})) {
            Ok(text) => text,
            Err(e) => format!("[ERROR] {e}"),
        }
    }
}
