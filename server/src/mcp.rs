//! MCP tool protocol: JSON-RPC 2.0 dispatch shared by the stdio and
//! HTTP transports, plus the stdio server loop.
//!
//! Exposes four tools: `list_projects`, `search`, `get_dependencies`,
//! and `get_dependents`. Unknown methods answer -32601, bad tool
//! parameters -32602, unparsable frames -32700.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::info;

use crate::error::Error;
use crate::store::SearchQuery;
use crate::supervisor::Supervisor;
use crate::types::SymbolKind;

// ---------------------------------------------------------------------------
// Protocol version negotiation
// ---------------------------------------------------------------------------

pub(crate) const SUPPORTED_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26"];
pub(crate) const LATEST_VERSION: &str = "2025-06-18";

/// Echo the client's version if supported, else offer the latest.
pub(crate) fn negotiate_version(client_version: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .find(|&&v| v == client_version)
        .copied()
        .unwrap_or(LATEST_VERSION)
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

fn tool_definitions() -> serde_json::Value {
    serde_json::json!([
        {
            "name": "list_projects",
            "description": "List registered projects with index statistics (document count, file count, branch, watcher state).",
            "inputSchema": {
                "type": "object",
                "properties": {}
            }
        },
        {
            "name": "search",
            "description": "Full-text symbol search over a project's code index. Ranks by combined relevance across symbol name, signature, doc comment, and body.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project_id": { "type": "string", "description": "Project id (optional when exactly one project is registered)" },
                    "query": { "type": "string", "description": "Search terms (e.g. 'greeter', 'parse config')" },
                    "limit": { "type": "integer", "description": "Max results (default: 10, max: 1000)" },
                    "kind": { "type": "string", "description": "Filter by symbol kind (function, method, struct, interface, ...)" },
                    "path": { "type": "string", "description": "File path prefix filter (e.g. 'internal/store')" }
                },
                "required": ["query"]
            }
        },
        {
            "name": "get_dependencies",
            "description": "Forward dependency lookup: everything a symbol calls, imports, uses, or embeds.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project_id": { "type": "string", "description": "Project id (optional when exactly one project is registered)" },
                    "symbol": { "type": "string", "description": "Symbol name (e.g. 'Provision') or full node id (e.g. 'app.Provision')" }
                },
                "required": ["symbol"]
            }
        },
        {
            "name": "get_dependents",
            "description": "Reverse dependency lookup: everything that calls, imports, uses, or embeds a symbol.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "project_id": { "type": "string", "description": "Project id (optional when exactly one project is registered)" },
                    "symbol": { "type": "string", "description": "Symbol name or full node id" }
                },
                "required": ["symbol"]
            }
        }
    ])
}

// ---------------------------------------------------------------------------
// Tool execution
// ---------------------------------------------------------------------------

/// Error returned to the JSON-RPC layer for bad tool parameters.
struct InvalidParams(String);

fn resolve_project_id(
    supervisor: &Supervisor,
    args: &serde_json::Value,
) -> Result<String, InvalidParams> {
    if let Some(id) = args["project_id"].as_str() {
        return Ok(id.to_string());
    }
    let projects = supervisor.list_projects();
    match projects.len() {
        1 => Ok(projects[0].id.clone()),
        0 => Err(InvalidParams("no projects registered".into())),
        _ => Err(InvalidParams(
            "project_id is required when multiple projects are registered".into(),
        )),
    }
}

fn tool_list_projects(supervisor: &Supervisor) -> serde_json::Value {
    let projects: Vec<serde_json::Value> = supervisor
        .list_projects()
        .into_iter()
        .map(|p| {
            let stats = supervisor.get_indexer(&p.id).ok().and_then(|i| i.stats().ok());
            serde_json::json!({
                "id": p.id,
                "name": p.name,
                "path": p.path,
                "registered_at": p.registered_at,
                "document_count": stats.as_ref().map(|s| s.document_count),
                "file_count": stats.as_ref().map(|s| s.file_count),
                "branch": stats.as_ref().map(|s| s.branch.clone()),
                "watcher_running": stats.as_ref().map(|s| s.watcher_running),
            })
        })
        .collect();
    serde_json::json!({ "projects": projects })
}

fn tool_search(
    supervisor: &Supervisor,
    args: &serde_json::Value,
) -> Result<Result<serde_json::Value, Error>, InvalidParams> {
    let query = args["query"]
        .as_str()
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| InvalidParams("query is required".into()))?;
    let kind = match args["kind"].as_str() {
        Some(raw) => Some(
            SymbolKind::parse(raw)
                .ok_or_else(|| InvalidParams(format!("unknown kind: {raw}")))?,
        ),
        None => None,
    };
    let project_id = resolve_project_id(supervisor, args)?;

    Ok((|| {
        let indexer = supervisor.get_indexer(&project_id)?;
        let hits = indexer.search(&SearchQuery {
            query: query.to_string(),
            limit: args["limit"].as_u64().map(|l| l as usize),
            kind,
            path_prefix: args["path"].as_str().map(|p| p.to_string()),
            branch: None,
        })?;
        let results: Vec<serde_json::Value> = hits
            .iter()
            .map(|h| {
                serde_json::json!({
                    "symbol_name": h.chunk.symbol_name,
                    "symbol_kind": h.chunk.symbol_kind.map(|k| k.label()),
                    "file_path": h.chunk.file_path,
                    "start_line": h.chunk.start_line,
                    "end_line": h.chunk.end_line,
                    "signature": h.chunk.signature,
                    "score": h.score,
                })
            })
            .collect();
        Ok(serde_json::json!({ "query": query, "total": results.len(), "results": results }))
    })())
}

fn tool_relations(
    supervisor: &Supervisor,
    args: &serde_json::Value,
    dependents: bool,
) -> Result<Result<serde_json::Value, Error>, InvalidParams> {
    let symbol = args["symbol"]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| InvalidParams("symbol is required".into()))?;
    let project_id = resolve_project_id(supervisor, args)?;

    Ok((|| {
        let indexer = supervisor.get_indexer(&project_id)?;
        let matches =
            if dependents { indexer.dependents(symbol)? } else { indexer.dependencies(symbol)? };
        let view: Vec<serde_json::Value> = matches
            .into_iter()
            .map(|(node, edges)| {
                let edge_views: Vec<serde_json::Value> = edges
                    .into_iter()
                    .map(|e| {
                        serde_json::json!({
                            "symbol": if dependents { e.source } else { e.target },
                            "kind": e.kind.label(),
                            "file_path": e.file_path,
                            "line": e.line,
                        })
                    })
                    .collect();
                serde_json::json!({
                    "id": node.id,
                    "name": node.name,
                    "kind": node.kind.label(),
                    "file_path": node.file_path,
                    "edges": edge_views,
                })
            })
            .collect();
        Ok(serde_json::json!({ "symbol": symbol, "matches": view }))
    })())
}

// ---------------------------------------------------------------------------
// JSON-RPC dispatch (shared by stdio and HTTP transports)
// ---------------------------------------------------------------------------

fn rpc_error(id: serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Process a single JSON-RPC request. Returns `None` for notifications.
pub fn dispatch_jsonrpc(
    supervisor: &Arc<Supervisor>,
    msg: &serde_json::Value,
) -> Option<serde_json::Value> {
    let method = msg["method"].as_str().unwrap_or("");
    let id = msg.get("id").cloned();

    // Notifications have no id and produce no response.
    if id.is_none() || method.starts_with("notifications/") {
        return None;
    }
    let id = id.unwrap();

    let response = match method {
        "initialize" => {
            let client_version = msg["params"]["protocolVersion"].as_str().unwrap_or("");
            let negotiated = negotiate_version(client_version);
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": negotiated,
                    "capabilities": {
                        "tools": { "listChanged": false }
                    },
                    "serverInfo": {
                        "name": "codescout",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "instructions": "Codescout: live code indexes for registered projects. Use list_projects to discover projects, search for ranked symbol search, and get_dependencies / get_dependents to walk the code graph."
                }
            })
        }
        // Usually a notification; answered only when a client sends it
        // with an id.
        "initialized" => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        "ping" => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        "tools/list" => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "tools": tool_definitions() }
        }),
        "tools/call" => {
            let tool_name = msg["params"]["name"].as_str().unwrap_or("");
            let args = msg["params"].get("arguments").cloned().unwrap_or(serde_json::json!({}));

            let outcome: Result<Result<serde_json::Value, Error>, InvalidParams> = match tool_name {
                "list_projects" => Ok(Ok(tool_list_projects(supervisor))),
                "search" => tool_search(supervisor, &args),
                "get_dependencies" => tool_relations(supervisor, &args, false),
                "get_dependents" => tool_relations(supervisor, &args, true),
                other => Err(InvalidParams(format!("unknown tool: {other}"))),
            };

            match outcome {
                Err(InvalidParams(message)) => rpc_error(id, -32602, &message),
                Ok(result) => {
                    // Execution failures stay inside the tool result so the
                    // model can read and react to them.
                    let (text, is_error) = match result {
                        Ok(value) => {
                            (serde_json::to_string_pretty(&value).unwrap_or_default(), false)
                        }
                        Err(e) => (format!("error ({}): {e}", e.tag()), true),
                    };
                    serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "content": [{ "type": "text", "text": text }],
                            "isError": is_error
                        }
                    })
                }
            }
        }
        _ => rpc_error(id, -32601, "Method not found"),
    };

    Some(response)
}

// ---------------------------------------------------------------------------
// MCP stdio server loop
// ---------------------------------------------------------------------------

/// Read JSON-RPC frames from stdin, write responses to stdout. Blocks
/// until stdin closes.
pub fn run_stdio(supervisor: Arc<Supervisor>) {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let reader = stdin.lock();
    let mut initialized = false;

    info!(projects = supervisor.project_count(), "MCP stdio server ready");

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                let err = rpc_error(serde_json::Value::Null, -32700, "Parse error");
                let mut out = stdout.lock();
                let _ = writeln!(out, "{err}");
                let _ = out.flush();
                continue;
            }
        };

        let method = msg["method"].as_str().unwrap_or("");
        if method.starts_with("notifications/") {
            continue;
        }

        // Init ordering: everything except initialize/ping waits.
        if !initialized && method != "initialize" && method != "ping" {
            if let Some(id) = msg.get("id").cloned() {
                let err = rpc_error(id, -32002, "Server not initialized. Send 'initialize' first.");
                let mut out = stdout.lock();
                let _ = writeln!(out, "{}", serde_json::to_string(&err).unwrap_or_default());
                let _ = out.flush();
            }
            continue;
        }

        if let Some(response) = dispatch_jsonrpc(&supervisor, &msg) {
            if method == "initialize" {
                initialized = true;
            }
            let mut out = stdout.lock();
            let _ = writeln!(out, "{}", serde_json::to_string(&response).unwrap_or_default());
            let _ = out.flush();
        }
    }
}
