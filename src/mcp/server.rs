use crate::app::App;
use crate::config::AppConfig;
use crate::errors::{ErrorCode, McpError, ToolError};
use crate::mcp::catalog::{tool_catalog, validate_tool_args};
use crate::mcp::protocol::{cancelled_request_id, request_key, JsonRpcRequest, JsonRpcResponse};
use crate::services::logger::Logger;
use crate::services::tool_executor::{ToolExecutor, ToolOutput};
use crate::utils::tool_errors::unknown_tool_error;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "m365-mgmt";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// API failures are results with `isError` set, not protocol errors.
pub fn tool_call_result(output: &ToolOutput) -> Value {
    let text = serde_json::to_string(&output.payload).unwrap_or_else(|_| "{}".to_string());
    json!({
        "content": [ { "type": "text", "text": text } ],
        "structuredContent": output.payload,
        "isError": output.is_error,
    })
}

pub struct McpServer {
    logger: Logger,
    executor: Arc<ToolExecutor>,
    tool_call_timeout: Duration,
    in_flight: DashMap<String, CancellationToken>,
}

impl McpServer {
    pub fn new(logger: Logger, executor: Arc<ToolExecutor>, tool_call_timeout: Duration) -> Self {
        Self {
            logger: logger.child("mcp"),
            executor,
            tool_call_timeout,
            in_flight: DashMap::new(),
        }
    }

    pub fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
        })
    }

    pub fn handle_tools_list(&self) -> Value {
        json!({ "tools": tool_catalog() })
    }

    pub async fn handle_tools_call(
        &self,
        name: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> Result<Value, McpError> {
        if !self.executor.has_tool(name) {
            return Err(McpError::from_tool_error(
                name,
                &unknown_tool_error(name, &self.executor.tool_names()),
            ));
        }
        let args = if args.is_null() { json!({}) } else { args };
        validate_tool_args(name, &args)?;

        let call = self.executor.execute(name, args, cancel.clone());
        match tokio::time::timeout(self.tool_call_timeout, call).await {
            Ok(Ok(output)) => Ok(tool_call_result(&output)),
            Ok(Err(err)) => Err(McpError::from_tool_error(name, &err)),
            Err(_) => {
                cancel.cancel();
                let err = ToolError::timeout(format!(
                    "Tool call exceeded {} ms",
                    self.tool_call_timeout.as_millis()
                ));
                Err(McpError::from_tool_error(name, &err))
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn cancel_request(&self, params: &Value) {
        let Some(id) = cancelled_request_id(params) else {
            return;
        };
        if let Some(entry) = self.in_flight.get(&request_key(id)) {
            entry.value().cancel();
            self.logger.info("Cancelling tool call", Some(&json!({"id": id})));
        }
    }

    fn spawn_tool_call(self: &Arc<Self>, id: Value, params: Value, out: mpsc::UnboundedSender<JsonRpcResponse>) {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("").to_string();
        if name.is_empty() {
            let _ = out.send(JsonRpcResponse::failure(
                id,
                ErrorCode::InvalidParams.as_i32(),
                "Missing tool name".to_string(),
            ));
            return;
        }
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        let key = request_key(&id);
        let cancel = CancellationToken::new();
        self.in_flight.insert(key.clone(), cancel.clone());

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let result = server.handle_tools_call(&name, args, cancel.clone()).await;
            server.in_flight.remove(&key);
            let response = match result {
                Ok(value) => JsonRpcResponse::success(id, value),
                // The client already gave up on a request it cancelled.
                Err(err) if cancel.is_cancelled() && err.code == ErrorCode::RequestCancelled => return,
                Err(err) => JsonRpcResponse::failure(id, err.code.as_i32(), err.message),
            };
            let _ = out.send(response);
        });
    }

    // Tool calls run on their own task; everything else answers inline.
    fn dispatch(self: &Arc<Self>, request: JsonRpcRequest, out: &mpsc::UnboundedSender<JsonRpcResponse>) {
        let response = match request.method.as_str() {
            "notifications/cancelled" => {
                self.cancel_request(&request.params);
                None
            }
            "notifications/initialized" => request.id.map(|id| JsonRpcResponse::success(id, json!({}))),
            _ if request.method.starts_with("notifications/") && request.is_notification() => None,
            "initialize" => request
                .id
                .map(|id| JsonRpcResponse::success(id, self.handle_initialize())),
            "tools/list" => request
                .id
                .map(|id| JsonRpcResponse::success(id, self.handle_tools_list())),
            "ping" => request.id.map(|id| JsonRpcResponse::success(id, json!({}))),
            "tools/call" => {
                if let Some(id) = request.id {
                    self.spawn_tool_call(id, request.params, out.clone());
                }
                None
            }
            _ => request.id.map(|id| {
                JsonRpcResponse::failure(
                    id,
                    ErrorCode::MethodNotFound.as_i32(),
                    "Method not found".to_string(),
                )
            }),
        };
        if let Some(response) = response {
            let _ = out.send(response);
        }
    }

    /// Serves newline-delimited JSON-RPC until `input` closes, then waits for
    /// in-flight tool calls to answer.
    pub async fn serve<R, W>(self: Arc<Self>, input: R, output: W) -> Result<(), ToolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(async move {
            let mut writer = BufWriter::new(output);
            while let Some(response) = rx.recv().await {
                let payload = serde_json::to_string(&response).unwrap_or_default();
                writer.write_all(payload.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut lines = input.lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|err| ToolError::internal(err.to_string()))?
        {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(_) => {
                    let _ = tx.send(JsonRpcResponse::failure(
                        Value::Null,
                        ErrorCode::ParseError.as_i32(),
                        "Parse error".to_string(),
                    ));
                    continue;
                }
            };
            match serde_json::from_value::<JsonRpcRequest>(parsed) {
                Ok(request) => self.dispatch(request, &tx),
                Err(_) => {
                    let _ = tx.send(JsonRpcResponse::failure(
                        Value::Null,
                        ErrorCode::InvalidRequest.as_i32(),
                        "Invalid request".to_string(),
                    ));
                }
            }
        }

        drop(tx);
        writer_task
            .await
            .map_err(|err| ToolError::internal(err.to_string()))??;
        Ok(())
    }
}

pub async fn run_stdio(config: AppConfig, logger: Logger) -> Result<(), ToolError> {
    let app = App::initialize(config, logger.clone())?;
    let server = Arc::new(app.server());
    logger.info("Serving MCP on stdio", Some(&json!({"tools": tool_catalog().len()})));
    let result = server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;
    logger.info("Input closed, shutting down", Some(&logger.stats()));
    result
}
