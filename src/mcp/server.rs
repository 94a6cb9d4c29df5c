//! MCP server over line-delimited JSON-RPC.
//!
//! The read loop answers cheap methods inline and spawns a task per
//! `tools/call`, so a long `run_command` on one pane does not hold up calls on
//! another. Every response goes through a single writer task, so output lines
//! never interleave. The server stops at EOF once in-flight calls finish.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{self, Request, RequestId, Response, RpcError};
use super::types::{ToolDefinition, ToolResult};

const SERVER_NAME: &str = "tmux-agent";
const PROTOCOL_VERSION: &str = "2024-11-05";
const INSTRUCTIONS: &str = "Control tmux terminal panes. You can read screen contents, \
execute commands and wait for their output, send text and control characters, \
watch output for a pattern, and manage sessions (list, create, split, close, focus).";

#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    fn tools(&self) -> Vec<ToolDefinition>;

    /// Run one tool. `Err` becomes a JSON-RPC error; failures the agent should
    /// see as tool output belong in the returned [`ToolResult`].
    async fn call(&self, name: &str, arguments: Value) -> Result<ToolResult, RpcError>;
}

/// What the read loop does with one incoming line.
enum Dispatch {
    Reply(Response),
    Call { id: RequestId, params: Value },
    Ignore,
}

pub struct McpServer<H: ToolHandler> {
    handler: Arc<H>,
}

impl<H: ToolHandler> McpServer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        McpServer { handler }
    }

    /// Serve on the process's stdin/stdout.
    pub async fn run(&self) -> Result<()> {
        info!("starting MCP server on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Response>();
        let writer_task = tokio::spawn(write_responses(rx, writer));

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.context("failed to read from stdin")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            debug!(message = %line, "received");

            match self.dispatch(line) {
                Dispatch::Reply(response) => {
                    if tx.send(response).is_err() {
                        break;
                    }
                }
                Dispatch::Call { id, params } => {
                    let handler = Arc::clone(&self.handler);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let response = handle_tools_call(handler.as_ref(), id, params).await;
                        // receiver only goes away if the writer failed
                        let _ = tx.send(response);
                    });
                }
                Dispatch::Ignore => {}
            }
        }
        info!("EOF received, shutting down");

        // The writer drains until the last spawned call drops its sender.
        drop(tx);
        writer_task.await.context("response writer panicked")?
    }

    fn dispatch(&self, message: &str) -> Dispatch {
        let request = match protocol::parse_request_str(message) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "rejecting malformed message");
                return Dispatch::Reply(Response::from_error(RequestId::Null, err));
            }
        };
        self.dispatch_request(request)
    }

    fn dispatch_request(&self, request: Request) -> Dispatch {
        let Some(id) = request.id else {
            debug!(method = %request.method, "notification");
            return Dispatch::Ignore;
        };
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => Dispatch::Reply(self.handle_initialize(id)),
            "ping" => Dispatch::Reply(Response::success(id, json!({}))),
            "tools/list" => Dispatch::Reply(self.handle_tools_list(id)),
            "tools/call" => Dispatch::Call { id, params },
            method => {
                warn!(%method, "unknown method");
                Dispatch::Reply(Response::from_error(
                    id,
                    RpcError::MethodNotFound(method.to_string()),
                ))
            }
        }
    }

    fn handle_initialize(&self, id: RequestId) -> Response {
        info!("MCP client initialized");
        Response::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "instructions": INSTRUCTIONS,
            }),
        )
    }

    fn handle_tools_list(&self, id: RequestId) -> Response {
        Response::success(id, json!({ "tools": self.handler.tools() }))
    }
}

async fn handle_tools_call<H: ToolHandler>(handler: &H, id: RequestId, params: Value) -> Response {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return Response::from_error(id, RpcError::InvalidParams("missing 'name' field".to_string()));
    };
    if !handler.tools().iter().any(|tool| tool.name == name) {
        return Response::from_error(id, RpcError::InvalidParams(format!("unknown tool: {name}")));
    }

    let arguments = params
        .get("arguments")
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| json!({}));

    debug!(tool = %name, "calling tool");
    match handler.call(name, arguments).await {
        Ok(result) => match serde_json::to_value(&result) {
            Ok(value) => Response::success(id, value),
            Err(e) => Response::from_error(id, RpcError::InternalError(e.to_string())),
        },
        Err(err) => Response::from_error(id, err),
    }
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<Response>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let json = match protocol::serialize_response_string(&response) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "dropping unserializable response");
                continue;
            }
        };
        debug!(message = %json, "sending");
        writer.write_all(json.as_bytes()).await.context("failed to write response")?;
        writer.write_all(b"\n").await.context("failed to write response")?;
        writer.flush().await.context("failed to flush stdout")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    struct TestHandler;

    #[async_trait]
    impl ToolHandler for TestHandler {
        fn tools(&self) -> Vec<ToolDefinition> {
            vec![
                ToolDefinition::new("echo", "Echo", json!({ "type": "object" })),
                ToolDefinition::new("slow", "Sleep, then answer", json!({ "type": "object" })),
                ToolDefinition::new("strict", "Needs arguments", json!({ "type": "object" })),
            ]
        }

        async fn call(&self, name: &str, arguments: Value) -> Result<ToolResult, RpcError> {
            match name {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(ToolResult::text("slow done"))
                }
                "strict" => Err(RpcError::InvalidParams("missing field `text`".to_string())),
                _ => Ok(ToolResult::text(arguments.to_string())),
            }
        }
    }

    /// Feed `input` through a server and collect every response line.
    async fn run_session(input: &str) -> Vec<Value> {
        let server = McpServer::new(Arc::new(TestHandler));
        let (writer, mut client) = tokio::io::duplex(1 << 20);
        server.serve(input.as_bytes(), writer).await.unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        out.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    fn request(id: i64, method: &str, params: Value) -> String {
        json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }).to_string()
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let responses = run_session(&request(1, "initialize", json!({}))).await;
        assert_eq!(responses.len(), 1);
        let result = &responses[0]["result"];
        assert_eq!(result["serverInfo"]["name"], "tmux-agent");
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let input = format!(
            "{}\n{}\n",
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            request(2, "ping", json!({}))
        );
        let responses = run_session(&input).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 2);
        assert_eq!(responses[0]["result"], json!({}));
    }

    #[tokio::test]
    async fn tools_list_comes_from_handler() {
        let responses = run_session(&request(1, "tools/list", json!({}))).await;
        let tools = responses[0]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 3);
        assert_eq!(tools[0]["name"], "echo");
    }

    #[tokio::test]
    async fn unknown_method_and_garbage() {
        let input = format!("{}\nnot json at all\n", request(7, "resources/list", json!({})));
        let responses = run_session(&input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], -32601);
        assert_eq!(responses[1]["error"]["code"], -32700);
        assert!(responses[1]["id"].is_null());
    }

    #[tokio::test]
    async fn tools_call_errors() {
        let input = [
            request(1, "tools/call", json!({ "arguments": {} })),
            request(2, "tools/call", json!({ "name": "nope" })),
            request(3, "tools/call", json!({ "name": "strict" })),
        ]
        .join("\n");
        let mut responses = run_session(&input).await;
        responses.sort_by_key(|r| r["id"].as_i64());
        for response in &responses {
            assert_eq!(response["error"]["code"], -32602, "{response}");
        }
    }

    #[tokio::test]
    async fn tools_call_passes_arguments() {
        let input = request(4, "tools/call", json!({ "name": "echo", "arguments": { "x": 1 } }));
        let responses = run_session(&input).await;
        assert_eq!(responses[0]["result"]["content"][0]["text"], r#"{"x":1}"#);
        assert!(responses[0]["result"].get("isError").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_does_not_block_later_calls() {
        let input = [
            request(1, "tools/call", json!({ "name": "slow" })),
            request(2, "tools/call", json!({ "name": "echo", "arguments": {} })),
            request(3, "ping", json!({})),
        ]
        .join("\n");
        let responses = run_session(&input).await;

        let ids: Vec<i64> = responses.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.last(), Some(&1), "slow call should answer last: {ids:?}");
        assert_eq!(responses[2]["result"]["content"][0]["text"], "slow done");
    }
}
