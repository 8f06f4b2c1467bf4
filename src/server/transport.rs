//! Newline-delimited JSON-RPC 2.0 over stdio.
//!
//! Handles `initialize`, `ping`, `tools/list` and `tools/call`. Tool calls run
//! as independent tasks so a slow call never blocks the reader; every
//! response goes through a single writer task, one JSON object per line.
//! Notifications (messages without an `id`) are accepted and ignored.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::manager::RequestContext;

use super::dispatcher::{TodoServer, ToolOutcome};
use super::tools::tool_specs;

/// Protocol revision announced when the client does not request one.
pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SERVER_NAME: &str = "todo-mcp";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Keys accepted for the working-directory hint, in lookup order.
const WORKING_DIR_KEYS: [&str; 3] = ["working-directory", "workingDirectory", "working_directory"];

/// What to do with one incoming message.
#[derive(Debug)]
enum Route {
    Reply(Value),
    Call {
        id: Value,
        name: String,
        args: Value,
        ctx: RequestContext,
    },
    Ignore,
}

fn response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn tool_result(outcome: &ToolOutcome) -> Value {
    json!({
        "content": [{"type": "text", "text": outcome.text}],
        "isError": outcome.is_error,
    })
}

/// Working-directory hint of a `tools/call`, from `_meta` or the params.
fn working_directory(params: &Value) -> Option<&str> {
    [params.get("_meta"), Some(params)]
        .into_iter()
        .flatten()
        .flat_map(|scope| WORKING_DIR_KEYS.iter().filter_map(move |key| scope.get(*key)))
        .find_map(Value::as_str)
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
}

fn route(server: &TodoServer, msg: Value) -> Route {
    let Some(method) = msg.get("method").and_then(Value::as_str) else {
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        return Route::Reply(error_response(id, INVALID_REQUEST, "missing method"));
    };
    let Some(id) = msg.get("id").cloned() else {
        debug!(method, "Ignoring notification");
        return Route::Ignore;
    };
    let params = msg.get("params").cloned().unwrap_or(Value::Null);

    match method {
        "initialize" => {
            let protocol = params
                .get("protocolVersion")
                .and_then(Value::as_str)
                .unwrap_or(PROTOCOL_VERSION);
            Route::Reply(response(
                id,
                json!({
                    "protocolVersion": protocol,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
                }),
            ))
        }
        "ping" => Route::Reply(response(id, json!({}))),
        "tools/list" => Route::Reply(response(id, json!({"tools": tool_specs()}))),
        "tools/call" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
            if name.is_empty() {
                return Route::Reply(error_response(id, INVALID_PARAMS, "tools/call requires a tool name"));
            }
            let mut ctx = server.context();
            if let Some(dir) = working_directory(&params) {
                ctx = ctx.with_working_directory(dir);
            }
            Route::Call {
                id,
                name: name.to_string(),
                args: params.get("arguments").cloned().unwrap_or_else(|| json!({})),
                ctx,
            }
        }
        other => Route::Reply(error_response(id, METHOD_NOT_FOUND, &format!("unknown method '{other}'"))),
    }
}

/// Serve requests from `input` until EOF, writing responses to `output`.
/// In-flight tool calls are awaited before returning.
///
/// # Errors
///
/// Fails when reading the input or writing the output fails.
pub async fn serve<R, W>(server: TodoServer, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(msg) = rx.recv().await {
            let mut line = serde_json::to_vec(&msg).context("Failed to encode response")?;
            line.push(b'\n');
            output.write_all(&line).await.context("Failed to write response")?;
            output.flush().await.context("Failed to flush response")?;
        }
        output.shutdown().await.context("Failed to close output")?;
        anyhow::Ok(())
    });

    let mut lines = BufReader::new(input).lines();
    let mut calls = JoinSet::new();
    let mut handled = 0u64;
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        handled += 1;

        let msg: Value = match serde_json::from_str(line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Malformed request: {}", e);
                let _ = tx.send(error_response(Value::Null, PARSE_ERROR, &format!("parse error: {e}")));
                continue;
            }
        };

        match route(&server, msg) {
            Route::Reply(reply) => {
                let _ = tx.send(reply);
            }
            Route::Call { id, name, args, ctx } => {
                let (server, tx) = (server.clone(), tx.clone());
                calls.spawn(async move {
                    let outcome = server.call_tool(&name, &args, ctx).await;
                    let _ = tx.send(response(id, tool_result(&outcome)));
                });
            }
            Route::Ignore => {}
        }

        while let Some(done) = calls.try_join_next() {
            if let Err(e) = done {
                warn!("Tool call task failed: {}", e);
            }
        }
    }

    while let Some(done) = calls.join_next().await {
        if let Err(e) = done {
            warn!("Tool call task failed: {}", e);
        }
    }
    drop(tx);
    writer.await.context("Response writer panicked")??;
    info!(messages = handled, "Input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::manager::ManagerFactory;
    use crate::testing::MockIndexerFactory;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn server(dir: &TempDir) -> TodoServer {
        let config = ServerConfig::new(dir.path());
        let factory = ManagerFactory::new(&config, Arc::new(MockIndexerFactory::new()))
            .await
            .unwrap();
        TodoServer::new(factory, &config)
    }

    async fn run(server: TodoServer, input: &str) -> Vec<Value> {
        let (mut client, server_end) = tokio::io::duplex(1 << 20);
        serve(server, input.as_bytes(), server_end).await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        out.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[test]
    fn test_working_directory_lookup() {
        let params = json!({"_meta": {"working-directory": " /tmp/a "}, "workingDirectory": "/tmp/b"});
        assert_eq!(working_directory(&params), Some("/tmp/a"));
        let params = json!({"workingDirectory": "/tmp/b"});
        assert_eq!(working_directory(&params), Some("/tmp/b"));
        assert_eq!(working_directory(&json!({"_meta": {"working-directory": ""}})), None);
    }

    #[tokio::test]
    async fn test_initialize_list_and_ping() {
        let dir = TempDir::new().unwrap();
        let input = [
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05"}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
        ]
        .join("\n");
        let replies = run(server(&dir).await, &input).await;
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(replies[0]["result"]["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(replies[1]["result"]["tools"].as_array().unwrap().len(), 13);
        assert_eq!(replies[2]["id"], 3);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let call = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {
                "name": "todo_create",
                "arguments": {"task": "Remote task"},
                "_meta": {"working-directory": other.path()}
            }
        });
        let replies = run(server(&dir).await, &call.to_string()).await;
        assert_eq!(replies[0]["id"], 7);
        assert_eq!(replies[0]["result"]["isError"], false);
        assert!(other.path().join(".claude/todos/remote-task.md").is_file());
        assert!(!dir.path().join(".claude/todos/remote-task.md").exists());
    }

    #[tokio::test]
    async fn test_errors_are_reported() {
        let dir = TempDir::new().unwrap();
        let input = [
            "not json",
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{}}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"todo_read","arguments":{"id":"ghost"}}}"#,
        ]
        .join("\n");
        let replies = run(server(&dir).await, &input).await;
        assert_eq!(replies.len(), 4);

        let by_id = |id: i64| replies.iter().find(|r| r["id"] == id).unwrap();
        assert!(replies.iter().any(|r| r["error"]["code"] == PARSE_ERROR));
        assert_eq!(by_id(1)["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(by_id(2)["error"]["code"], INVALID_PARAMS);
        assert_eq!(by_id(3)["result"]["isError"], true);
        assert_eq!(by_id(3)["result"]["content"][0]["text"], "Todo not found");
    }
}
