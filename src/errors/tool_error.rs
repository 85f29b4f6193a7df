use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;

/// Remote API failures are not tool errors; they become payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidParams,
    NotFound,
    Timeout,
    Cancelled,
    Internal,
}

impl ToolErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ToolErrorKind::InvalidParams => "INVALID_PARAMS",
            ToolErrorKind::NotFound => "NOT_FOUND",
            ToolErrorKind::Timeout => "TIMEOUT",
            ToolErrorKind::Cancelled => "CANCELLED",
            ToolErrorKind::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Error)]
#[error("{message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolError {
    fn of(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code().to_string(),
            message: message.into(),
            hint: None,
            details: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::of(ToolErrorKind::InvalidParams, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::of(ToolErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::of(ToolErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::of(ToolErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::of(ToolErrorKind::Internal, message)
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::internal(err.to_string())
    }
}

impl From<ConfigError> for ToolError {
    fn from(err: ConfigError) -> Self {
        ToolError::invalid_params(err.to_string())
            .with_hint("Check AUTH_MODE, AZURE_* and GRAPH_* environment variables.")
    }
}
