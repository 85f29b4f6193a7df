use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::AppConfig;
use crate::constants::{limits, retry};
use crate::errors::{ApiError, ClientErrorKind};
use crate::services::logger::Logger;
use crate::services::token_cache::{Token, TokenCache};
use crate::services::transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};
use crate::utils::text::body_preview;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1,
    Beta,
}

impl ApiVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1.0",
            ApiVersion::Beta => "beta",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RequestTarget {
    Api { version: ApiVersion, segments: Vec<String> },
    Absolute(Url),
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Bytes { data: Bytes, content_type: String },
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub target: RequestTarget,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
}

impl ApiRequest {
    pub fn new<I, S>(method: Method, version: ApiVersion, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            target: RequestTarget::Api {
                version,
                segments: segments.into_iter().map(Into::into).collect(),
            },
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get<I, S>(version: ApiVersion, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, version, segments)
    }

    pub fn post_json<I, S>(version: ApiVersion, segments: I, body: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = Self::new(Method::POST, version, segments);
        request.body = Some(RequestBody::Json(body));
        request
    }

    pub fn put_bytes<I, S>(version: ApiVersion, segments: I, data: Bytes, content_type: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut request = Self::new(Method::PUT, version, segments);
        request.body = Some(RequestBody::Bytes {
            data,
            content_type: content_type.to_string(),
        });
        request
    }

    pub fn follow(link: Url) -> Self {
        Self {
            method: Method::GET,
            target: RequestTarget::Absolute(link),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    /// An empty body reads as `null`.
    pub fn json(&self) -> Result<Value, ApiError> {
        if self.body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body).map_err(|err| ApiError::Decode {
            status: self.status,
            message: err.to_string(),
        })
    }

    pub fn json_object(&self) -> Result<serde_json::Map<String, Value>, ApiError> {
        match self.json()? {
            Value::Object(map) => Ok(map),
            other => Err(ApiError::Decode {
                status: self.status,
                message: format!("expected a JSON object, got {}", json_type_name(&other)),
            }),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub max_retry_after: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            base_delay: Duration::from_millis(retry::BASE_DELAY_MS),
            factor: retry::FACTOR,
            max_delay: Duration::from_millis(retry::MAX_DELAY_MS),
            max_retry_after: Duration::from_millis(retry::MAX_RETRY_AFTER_MS),
            jitter: retry::JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        let base = self.base_delay.as_millis() as f64;
        let mut delay = base * self.factor.powi(attempt.saturating_sub(1) as i32);
        let cap = self.max_delay.as_millis() as f64;
        if delay > cap {
            delay = cap;
        }
        if self.jitter > 0.0 {
            let delta = delay * self.jitter;
            delay = delay - delta + rand::random::<f64>() * delta * 2.0;
        }
        Duration::from_millis(delay.max(0.0) as u64)
    }

    // Retry-After wins over backoff.
    pub fn delay(&self, attempt: usize, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(wait) => wait.min(self.max_retry_after),
            None => self.backoff(attempt),
        }
    }
}

/// Reads `Retry-After` as delta-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
    Some(wait)
}

enum Failure {
    Retryable { throttled: bool, status: Option<u16>, message: String, body: String },
    Terminal(ApiError),
}

pub struct GraphClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenCache>,
    base_url: Url,
    scope: String,
    policy: RetryPolicy,
    request_timeout: Duration,
    logger: Logger,
}

impl GraphClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenCache>,
        base_url: Url,
        scope: impl Into<String>,
        logger: Logger,
    ) -> Self {
        Self {
            transport,
            tokens,
            base_url,
            scope: scope.into(),
            policy: RetryPolicy::default(),
            request_timeout: Duration::from_millis(crate::constants::network::TIMEOUT_API_REQUEST_MS),
            logger: logger.child("graph"),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenCache>,
        logger: Logger,
    ) -> Self {
        Self::new(transport, tokens, config.graph_base_url.clone(), config.scope.clone(), logger)
            .with_policy(RetryPolicy::default().with_max_attempts(config.max_attempts))
            .with_request_timeout(config.request_timeout)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn resolve_url(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let mut url = match &request.target {
            RequestTarget::Api { version, segments } => {
                let mut url = self.base_url.clone();
                url.set_query(None);
                url.path_segments_mut()
                    .map_err(|_| ApiError::invalid_request("API base URL cannot carry a path"))?
                    .pop_if_empty()
                    .push(version.as_str())
                    .extend(segments.iter().map(String::as_str));
                url
            }
            RequestTarget::Absolute(link) => {
                if link.origin() != self.base_url.origin() {
                    return Err(ApiError::invalid_request(format!(
                        "refusing to follow link outside the API origin: {}",
                        link.origin().ascii_serialization()
                    )));
                }
                link.clone()
            }
        };
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub async fn execute(&self, request: &ApiRequest, cancel: &CancellationToken) -> Result<ApiResponse, ApiError> {
        self.execute_scoped(request, &self.scope, cancel).await
    }

    pub async fn execute_scoped(
        &self,
        request: &ApiRequest,
        scope: &str,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.resolve_url(request)?;
        let (body, content_type) = match &request.body {
            None => (None, None),
            Some(RequestBody::Json(value)) => (
                Some(Bytes::from(serde_json::to_vec(value).map_err(|err| {
                    ApiError::invalid_request(format!("request body is not serializable: {}", err))
                })?)),
                Some("application/json".to_string()),
            ),
            Some(RequestBody::Bytes { data, content_type }) => (Some(data.clone()), Some(content_type.clone())),
        };
        let mut base_headers = request.headers.clone();
        if !base_headers.contains_key(ACCEPT) {
            base_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }
        if let Some(content_type) = content_type {
            let value = HeaderValue::from_str(&content_type)
                .map_err(|_| ApiError::invalid_request(format!("invalid content type: {}", content_type)))?;
            base_headers.insert(CONTENT_TYPE, value);
        }

        let mut token = self.acquire_token(scope, None, cancel).await?;
        let mut attempt = 0usize;
        let mut refreshed_after_401 = false;

        loop {
            attempt += 1;
            let mut headers = base_headers.clone();
            let bearer = HeaderValue::from_str(&format!("Bearer {}", token.value()))
                .map_err(|_| ApiError::auth("token contains characters not allowed in a header"))?;
            headers.insert(AUTHORIZATION, bearer);
            let outgoing = TransportRequest {
                method: request.method.clone(),
                url: url.clone(),
                headers,
                body: body.clone(),
                timeout: self.request_timeout,
            };

            self.logger.debug(
                "Sending request",
                Some(&json!({"method": request.method.as_str(), "path": url.path(), "attempt": attempt})),
            );
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                result = tokio::time::timeout(self.request_timeout, self.transport.send(outgoing)) => {
                    result.unwrap_or(Err(TransportError::Timeout))
                }
            };

            let (failure, retry_after) = match sent {
                Ok(response) if (200..300).contains(&response.status) => {
                    return Ok(ApiResponse {
                        status: response.status,
                        headers: response.headers,
                        body: response.body,
                    });
                }
                Ok(response) if response.status == 401 => {
                    let body = body_preview(&response.body, limits::ERROR_BODY_MAX_BYTES);
                    if refreshed_after_401 {
                        return Err(ApiError::Auth {
                            message: "request still unauthorized after token refresh".to_string(),
                            status: Some(401),
                            body: Some(body),
                        });
                    }
                    refreshed_after_401 = true;
                    self.logger.info(
                        "Unauthorized response, refreshing token",
                        Some(&json!({"path": url.path()})),
                    );
                    token = self.acquire_token(scope, Some(&token), cancel).await?;
                    // The refresh retry does not count against the attempt cap.
                    attempt -= 1;
                    continue;
                }
                Ok(response) => (
                    classify(&response),
                    parse_retry_after(&response.headers, Utc::now()),
                ),
                Err(err) => (
                    Failure::Retryable {
                        throttled: false,
                        status: None,
                        message: err.to_string(),
                        body: String::new(),
                    },
                    None,
                ),
            };

            let (throttled, status, message, body_text) = match failure {
                Failure::Terminal(err) => return Err(err),
                Failure::Retryable { throttled, status, message, body } => (throttled, status, message, body),
            };

            if attempt >= self.policy.max_attempts {
                self.logger.warn(
                    "Retries exhausted",
                    Some(&json!({"path": url.path(), "attempts": attempt, "status": status})),
                );
                return Err(match (throttled, status) {
                    (true, Some(status)) => ApiError::Throttled {
                        status,
                        body: body_text,
                        attempts: attempt,
                    },
                    _ => ApiError::Server {
                        status,
                        message,
                        body: body_text,
                        attempts: attempt,
                    },
                });
            }

            let delay = self.policy.delay(attempt, retry_after);
            self.logger.warn(
                "Retrying request",
                Some(&json!({
                    "path": url.path(),
                    "attempt": attempt,
                    "status": status,
                    "delay_ms": delay.as_millis() as u64,
                    "reason": message,
                })),
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    pub async fn get_object(&self, request: &ApiRequest, cancel: &CancellationToken) -> Result<Value, ApiError> {
        let response = self.execute(request, cancel).await?;
        response.json_object().map(Value::Object)
    }

    async fn acquire_token(
        &self,
        scope: &str,
        stale: Option<&Token>,
        cancel: &CancellationToken,
    ) -> Result<Token, ApiError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            token = async {
                match stale {
                    Some(stale) => self.tokens.refresh(scope, stale).await,
                    None => self.tokens.get_token(scope).await,
                }
            } => token,
        }
    }
}

fn classify(response: &TransportResponse) -> Failure {
    let status = response.status;
    let body = body_preview(&response.body, limits::ERROR_BODY_MAX_BYTES);
    match status {
        429 | 503 => Failure::Retryable {
            throttled: true,
            status: Some(status),
            message: format!("throttled with status {}", status),
            body,
        },
        500..=599 => Failure::Retryable {
            throttled: false,
            status: Some(status),
            message: format!("server responded with status {}", status),
            body,
        },
        _ => Failure::Terminal(ApiError::Client {
            kind: ClientErrorKind::from_status(status),
            status,
            body,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy_without_jitter();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.backoff(2).as_millis();
            assert!((1600..=2400).contains(&delay), "delay {}", delay);
        }
    }

    #[test]
    fn retry_after_wins_and_is_capped() {
        let policy = policy_without_jitter();
        assert_eq!(policy.delay(1, Some(Duration::from_secs(7))), Duration::from_secs(7));
        assert_eq!(policy.delay(1, Some(Duration::from_secs(900))), Duration::from_secs(120));
        assert_eq!(policy.delay(1, None), Duration::from_secs(1));
    }

    #[test]
    fn retry_after_parses_seconds_and_http_dates() {
        let now = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .expect("date")
            .with_timezone(&Utc);
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(3)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 01 May 2024 10:00:05 GMT"));
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(5)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 01 May 2024 09:59:00 GMT"));
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::ZERO));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers, now), None);
    }

    #[test]
    fn non_object_body_is_a_decode_error() {
        let response = ApiResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"[1,2]"),
        };
        assert!(matches!(response.json_object(), Err(ApiError::Decode { status: 200, .. })));
    }
}
