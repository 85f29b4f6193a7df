#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use m365_mgmt::app::App;
use m365_mgmt::config::AppConfig;
use m365_mgmt::errors::ApiError;
use m365_mgmt::services::credential::{Credential, CredentialKind};
use m365_mgmt::services::graph_client::GraphClient;
use m365_mgmt::services::logger::Logger;
use m365_mgmt::services::token_cache::{Token, TokenCache};
use m365_mgmt::services::transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

pub static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const BASE_URL: &str = "https://graph.test";

/// One scripted answer of the fake transport.
#[derive(Clone)]
pub enum Scripted {
    Reply {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Bytes,
    },
    Fail(TransportError),
    /// Never answers; only cancellation or a timeout ends the send.
    Hang,
}

impl Scripted {
    pub fn json(status: u16, body: Value) -> Self {
        Scripted::Reply {
            status,
            headers: Vec::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Scripted::Reply {
            status,
            headers: Vec::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn bytes(status: u16, body: &'static [u8]) -> Self {
        Scripted::Reply {
            status,
            headers: Vec::new(),
            body: Bytes::from_static(body),
        }
    }

    pub fn with_header(self, name: &'static str, value: &str) -> Self {
        match self {
            Scripted::Reply {
                status,
                mut headers,
                body,
            } => {
                headers.push((name, value.to_string()));
                Scripted::Reply { status, headers, body }
            }
            other => other,
        }
    }
}

/// Request as the fake saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub key: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<Bytes>,
}

impl RecordedCall {
    pub fn path(&self) -> &str {
        self.key.split('?').next().unwrap_or(&self.key)
    }

    pub fn body_json(&self) -> Value {
        self.body
            .as_ref()
            .and_then(|body| serde_json::from_slice(body).ok())
            .unwrap_or(Value::Null)
    }
}

/// Route key: path plus the raw query, if any.
pub fn route_key(url: &url::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Scripted transport keyed by `METHOD key`. Each route answers from its
/// queue in order and keeps repeating its last answer.
#[derive(Default)]
pub struct FakeTransport {
    routes: StdMutex<HashMap<String, VecDeque<Scripted>>>,
    calls: StdMutex<Vec<RecordedCall>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, method: &str, key: &str, answers: Vec<Scripted>) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(format!("{} {}", method, key), answers.into());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_to(&self, method: &str, key: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.method == method && call.key == key)
            .count()
    }

    /// Exact `path?query` routes win; a route registered with the bare path
    /// answers any query on that path.
    fn next_answer(&self, method: &str, key: &str) -> Option<Scripted> {
        let mut routes = self.routes.lock().expect("routes lock");
        let exact = format!("{} {}", method, key);
        let route = if routes.contains_key(&exact) {
            exact
        } else {
            format!("{} {}", method, key.split('?').next().unwrap_or(key))
        };
        let queue = routes.get_mut(&route)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let key = route_key(&request.url);
        let header = |name: &str| {
            request
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        self.calls.lock().expect("calls lock").push(RecordedCall {
            method: request.method.as_str().to_string(),
            key: key.clone(),
            authorization: header("authorization"),
            content_type: header("content-type"),
            body: request.body.clone(),
        });

        let answer = self.next_answer(request.method.as_str(), &key);
        match answer {
            Some(Scripted::Reply { status, headers, body }) => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    if let (Ok(name), Ok(value)) =
                        (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value))
                    {
                        map.insert(name, value);
                    }
                }
                Ok(TransportResponse {
                    status,
                    headers: map,
                    body,
                })
            }
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Ok(TransportResponse {
                status: 404,
                headers: HeaderMap::new(),
                body: Bytes::from(format!("no scripted route for {} {}", request.method, key)),
            }),
        }
    }
}

/// Credential that mints `token-1`, `token-2`, ... and counts its calls.
pub struct CountingCredential {
    mints: AtomicU64,
    lifetime: chrono::Duration,
    delay: Duration,
}

impl CountingCredential {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mints: AtomicU64::new(0),
            lifetime: chrono::Duration::hours(1),
            delay,
        })
    }

    pub fn with_lifetime(lifetime: chrono::Duration) -> Arc<Self> {
        Arc::new(Self {
            mints: AtomicU64::new(0),
            lifetime,
            delay: Duration::ZERO,
        })
    }

    pub fn mints(&self) -> u64 {
        self.mints.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Credential for CountingCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::ServicePrincipal
    }

    async fn mint(&self, scope: &str) -> Result<Token, ApiError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.mints.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Token::new(
            format!("token-{}", n),
            scope,
            chrono::Utc::now() + self.lifetime,
        ))
    }
}

pub fn test_config() -> AppConfig {
    AppConfig::from_lookup(|key| match key {
        "GRAPH_BASE_URL" => Some(BASE_URL.to_string()),
        _ => None,
    })
    .expect("test config")
}

pub fn test_client(transport: Arc<FakeTransport>, credential: Arc<CountingCredential>) -> Arc<GraphClient> {
    let config = test_config();
    let logger = Logger::new("test");
    let tokens = Arc::new(TokenCache::new(credential, config.token_skew, logger.clone()));
    Arc::new(GraphClient::from_config(&config, transport, tokens, logger))
}

pub fn test_app(transport: Arc<FakeTransport>) -> App {
    App::with_parts(test_config(), Logger::new("test"), transport, CountingCredential::new())
        .expect("app wiring")
}
