use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::{ApiError, ToolError};
use crate::services::logger::Logger;
use crate::services::resources::error_result;
use crate::utils::redact::redact_object;
use crate::utils::tool_errors::unknown_tool_error;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    pub is_error: bool,
    pub retryable: bool,
}

impl ToolOutput {
    pub fn ok(payload: Value) -> Self {
        Self {
            payload,
            is_error: false,
            retryable: false,
        }
    }

    pub fn failure(payload: Value) -> Self {
        Self {
            payload,
            is_error: true,
            retryable: false,
        }
    }

    // Cancellation surfaces as a tool error, never as a payload.
    pub fn from_api(result: Result<Value, ApiError>) -> Result<Self, ToolError> {
        match result {
            Ok(payload) => Ok(Self::ok(payload)),
            Err(ApiError::Cancelled) => Err(ToolError::cancelled("Tool call was cancelled")),
            Err(err) => {
                let mut output = Self::failure(error_result(&err));
                output.retryable = err.is_retryable();
                Ok(output)
            }
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, tool: &str, args: Value, cancel: CancellationToken) -> Result<ToolOutput, ToolError>;
}

#[derive(Clone)]
pub struct ToolExecutor {
    logger: Logger,
    handlers: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolExecutor {
    pub fn new(logger: Logger, handlers: HashMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            logger: logger.child("executor"),
            handlers: Arc::new(handlers),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.handlers.contains_key(tool)
    }

    pub async fn execute(&self, tool: &str, args: Value, cancel: CancellationToken) -> Result<ToolOutput, ToolError> {
        let Some(handler) = self.handlers.get(tool) else {
            return Err(unknown_tool_error(tool, &self.tool_names()));
        };
        let trace_id = uuid::Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now().timestamp_millis();
        self.logger.debug(
            "Tool call started",
            Some(&json!({"tool": tool, "trace_id": trace_id, "args": redact_object(&args, 256)})),
        );

        let result = handler.handle(tool, args, cancel).await;
        let duration_ms = chrono::Utc::now().timestamp_millis() - started_at;
        match &result {
            Ok(output) if output.is_error => self.logger.warn(
                "Tool call returned an API error",
                Some(&json!({
                    "tool": tool,
                    "trace_id": trace_id,
                    "duration_ms": duration_ms,
                    "status_code": output.payload.get("status_code"),
                    "retryable": output.retryable,
                })),
            ),
            Ok(_) => self.logger.info(
                "Tool call finished",
                Some(&json!({"tool": tool, "trace_id": trace_id, "duration_ms": duration_ms})),
            ),
            Err(err) => self.logger.warn(
                "Tool call failed",
                Some(&json!({
                    "tool": tool,
                    "trace_id": trace_id,
                    "duration_ms": duration_ms,
                    "code": err.code,
                    "message": err.message,
                })),
            ),
        }
        result
    }
}
