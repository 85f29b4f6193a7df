use crate::errors::{ToolError, ToolErrorKind};
use serde::Serialize;
use thiserror::Error;

/// JSON-RPC error codes used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    RequestCancelled = -32800,
    RequestTimeout = -32001,
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<ToolErrorKind> for ErrorCode {
    fn from(kind: ToolErrorKind) -> Self {
        match kind {
            ToolErrorKind::InvalidParams | ToolErrorKind::NotFound => ErrorCode::InvalidParams,
            ToolErrorKind::Timeout => ErrorCode::RequestTimeout,
            ToolErrorKind::Cancelled => ErrorCode::RequestCancelled,
            ToolErrorKind::Internal => ErrorCode::InternalError,
        }
    }
}

#[derive(Debug, Clone, Serialize, Error)]
#[error("{message}")]
pub struct McpError {
    pub code: ErrorCode,
    pub message: String,
}

impl McpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Protocol error for a failed `tools/call`. The message names the tool
    /// and carries the hint, one `key: value` per line.
    pub fn from_tool_error(tool: &str, error: &ToolError) -> Self {
        let mut message = format!("tool: {}\ncode: {}\nmessage: {}", tool, error.code, error.message);
        if let Some(hint) = &error.hint {
            message.push_str("\nhint: ");
            message.push_str(hint);
        }
        McpError::new(error.kind.into(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_request_timeout() {
        let err = McpError::from_tool_error("list_users", &ToolError::timeout("Tool call exceeded 10 ms"));
        assert_eq!(err.code, ErrorCode::RequestTimeout);
        assert!(err.message.starts_with("tool: list_users\ncode: TIMEOUT"));
    }

    #[test]
    fn hint_is_appended() {
        let err = McpError::from_tool_error(
            "read_csv_file",
            &ToolError::invalid_params("bad").with_hint("use onedrive"),
        );
        assert_eq!(err.code.as_i32(), -32602);
        assert!(err.message.ends_with("hint: use onedrive"));
    }
}
