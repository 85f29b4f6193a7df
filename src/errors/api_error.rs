use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    Other,
}

impl ClientErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ClientErrorKind::BadRequest,
            403 => ClientErrorKind::Forbidden,
            404 => ClientErrorKind::NotFound,
            409 => ClientErrorKind::Conflict,
            _ => ClientErrorKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientErrorKind::BadRequest => "bad_request",
            ClientErrorKind::Forbidden => "forbidden",
            ClientErrorKind::NotFound => "not_found",
            ClientErrorKind::Conflict => "conflict",
            ClientErrorKind::Other => "client_error",
        }
    }
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retryable conditions never escape the request executor.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("authentication failed: {message}")]
    Auth {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },
    #[error("request throttled after {attempts} attempts (status {status})")]
    Throttled {
        status: u16,
        body: String,
        attempts: usize,
    },
    #[error("request rejected with status {status} ({kind})")]
    Client {
        kind: ClientErrorKind,
        status: u16,
        body: String,
    },
    #[error("server error after {attempts} attempts: {message}")]
    Server {
        status: Option<u16>,
        message: String,
        body: String,
        attempts: usize,
    },
    #[error("invalid response body (status {status}): {message}")]
    Decode { status: u16, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request cancelled")]
    Cancelled,
}

impl ApiError {
    pub fn auth(message: impl Into<String>) -> Self {
        ApiError::Auth {
            message: message.into(),
            status: None,
            body: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        ApiError::InvalidRequest(message.into())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ApiError::Auth { .. } => "auth_error",
            ApiError::Throttled { .. } => "throttled_error",
            ApiError::Client { kind, .. } => kind.as_str(),
            ApiError::Server { .. } => "server_error",
            ApiError::Decode { .. } => "decode_error",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Cancelled => "cancelled",
        }
    }

    // Failures without an HTTP status still report an integer.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Auth { status, .. } => status.unwrap_or(401),
            ApiError::Throttled { status, .. } => *status,
            ApiError::Client { status, .. } => *status,
            ApiError::Server { status, .. } => status.unwrap_or(503),
            ApiError::Decode { .. } => 502,
            ApiError::InvalidRequest(_) => 400,
            ApiError::Cancelled => 499,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Auth { body, .. } => body.as_deref(),
            ApiError::Throttled { body, .. }
            | ApiError::Client { body, .. }
            | ApiError::Server { body, .. } => Some(body.as_str()),
            _ => None,
        }
        .filter(|body| !body.is_empty())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Throttled { .. } | ApiError::Server { .. })
    }
}
