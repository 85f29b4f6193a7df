use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

use crate::config::{AppConfig, AuthConfig, AuthMode, ConfigError};
use crate::constants::{device_code, limits, managed_identity, network, token};
use crate::errors::ApiError;
use crate::services::logger::Logger;
use crate::services::token_cache::Token;
use crate::services::transport::{HttpTransport, TransportRequest, TransportResponse};
use crate::utils::text::body_preview;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    ServicePrincipal,
    InteractiveUser,
    Ambient,
}

impl CredentialKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::ServicePrincipal => "service_principal",
            CredentialKind::InteractiveUser => "interactive_user",
            CredentialKind::Ambient => "ambient",
        }
    }
}

/// Implementations never cache.
#[async_trait]
pub trait Credential: Send + Sync {
    fn kind(&self) -> CredentialKind;

    async fn mint(&self, scope: &str) -> Result<Token, ApiError>;
}

#[derive(Debug, Deserialize)]
struct GrantResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    expires_on: Option<Value>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

fn value_as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse::<i64>().ok()))
}

fn grant_expiry(grant: &GrantResponse) -> DateTime<Utc> {
    if let Some(epoch) = grant.expires_on.as_ref().and_then(value_as_i64) {
        if let Some(at) = Utc.timestamp_opt(epoch, 0).single() {
            return at;
        }
    }
    let lifetime = grant
        .expires_in
        .as_ref()
        .and_then(value_as_i64)
        .unwrap_or(token::DEFAULT_LIFETIME_SECS);
    Utc::now() + chrono::Duration::seconds(lifetime)
}

fn parse_grant(response: &TransportResponse) -> Result<GrantResponse, ApiError> {
    serde_json::from_slice::<GrantResponse>(&response.body).map_err(|err| ApiError::Auth {
        message: format!("Token response could not be parsed: {}", err),
        status: Some(response.status),
        body: None,
    })
}

fn oauth_error_code(response: &TransportResponse) -> Option<String> {
    serde_json::from_slice::<OAuthErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.error)
}

fn oauth_failure(context: &str, response: &TransportResponse) -> ApiError {
    let parsed: OAuthErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
    let detail = parsed
        .error_description
        .or(parsed.error)
        .unwrap_or_else(|| format!("status {}", response.status));
    ApiError::Auth {
        message: format!("{}: {}", context, detail),
        status: Some(response.status),
        body: Some(body_preview(&response.body, limits::ERROR_BODY_MAX_BYTES)),
    }
}

fn is_success(response: &TransportResponse) -> bool {
    (200..300).contains(&response.status)
}

async fn post_form(
    http: &dyn HttpTransport,
    url: &Url,
    form: &[(&str, &str)],
) -> Result<TransportResponse, ApiError> {
    let body = serde_urlencoded::to_string(form)
        .map_err(|err| ApiError::auth(format!("Failed to encode token request: {}", err)))?;
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    http.send(TransportRequest {
        method: Method::POST,
        url: url.clone(),
        headers,
        body: Some(Bytes::from(body)),
        timeout: Duration::from_millis(network::TIMEOUT_IDENTITY_REQUEST_MS),
    })
    .await
    .map_err(|err| ApiError::auth(format!("Identity endpoint unreachable: {}", err)))
}

fn authority_endpoint(host: &Url, tenant: &str, leaf: &str) -> Result<Url, ConfigError> {
    let mut url = host.clone();
    url.path_segments_mut()
        .map_err(|_| ConfigError::InvalidUrl {
            key: "AZURE_AUTHORITY_HOST",
            value: host.to_string(),
        })?
        .pop_if_empty()
        .extend([tenant, "oauth2", "v2.0", leaf]);
    Ok(url)
}

pub struct ClientSecretCredential {
    http: Arc<dyn HttpTransport>,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl ClientSecretCredential {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        authority_host: &Url,
        tenant_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            http,
            token_url: authority_endpoint(authority_host, tenant_id, "token")?,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }
}

#[async_trait]
impl Credential for ClientSecretCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::ServicePrincipal
    }

    async fn mint(&self, scope: &str) -> Result<Token, ApiError> {
        let response = post_form(
            self.http.as_ref(),
            &self.token_url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ],
        )
        .await?;
        if !is_success(&response) {
            return Err(oauth_failure("Client credentials grant failed", &response));
        }
        let grant = parse_grant(&response)?;
        let expires_at = grant_expiry(&grant);
        Ok(Token::new(grant.access_token, scope, expires_at))
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeGrant {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    interval: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Device-code sign-in for a public client. The first mint prompts through
/// the log; later mints reuse the refresh token until it stops working.
pub struct DeviceCodeCredential {
    http: Arc<dyn HttpTransport>,
    device_code_url: Url,
    token_url: Url,
    client_id: String,
    refresh_token: Mutex<Option<String>>,
    logger: Logger,
}

impl DeviceCodeCredential {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        authority_host: &Url,
        tenant_id: &str,
        client_id: &str,
        logger: &Logger,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            http,
            device_code_url: authority_endpoint(authority_host, tenant_id, "devicecode")?,
            token_url: authority_endpoint(authority_host, tenant_id, "token")?,
            client_id: client_id.to_string(),
            refresh_token: Mutex::new(None),
            logger: logger.child("device_code"),
        })
    }

    fn request_scope(scope: &str) -> String {
        format!("{} offline_access", scope)
    }

    async fn redeem_refresh_token(&self, scope: &str, refresh_token: &str) -> Result<Token, ApiError> {
        let scopes = Self::request_scope(scope);
        let response = post_form(
            self.http.as_ref(),
            &self.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("refresh_token", refresh_token),
                ("scope", scopes.as_str()),
            ],
        )
        .await?;
        if !is_success(&response) {
            return Err(oauth_failure("Refresh token rejected", &response));
        }
        self.accept_grant(scope, &response).await
    }

    async fn accept_grant(&self, scope: &str, response: &TransportResponse) -> Result<Token, ApiError> {
        let grant = parse_grant(response)?;
        let expires_at = grant_expiry(&grant);
        if let Some(refresh) = grant.refresh_token.clone() {
            *self.refresh_token.lock().await = Some(refresh);
        }
        Ok(Token::new(grant.access_token, scope, expires_at))
    }

    async fn device_flow(&self, scope: &str) -> Result<Token, ApiError> {
        let scopes = Self::request_scope(scope);
        let response = post_form(
            self.http.as_ref(),
            &self.device_code_url,
            &[("client_id", self.client_id.as_str()), ("scope", scopes.as_str())],
        )
        .await?;
        if !is_success(&response) {
            return Err(oauth_failure("Device code request failed", &response));
        }
        let grant: DeviceCodeGrant = serde_json::from_slice(&response.body).map_err(|err| {
            ApiError::auth(format!("Device code response could not be parsed: {}", err))
        })?;

        let prompt = grant.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                grant.verification_uri, grant.user_code
            )
        });
        self.logger.warn(
            &prompt,
            Some(&json!({"verification_uri": grant.verification_uri, "user_code": grant.user_code})),
        );

        let lifetime = grant.expires_in.as_ref().and_then(value_as_i64).unwrap_or(900).max(1);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(lifetime as u64);
        let mut interval = Duration::from_secs(
            grant
                .interval
                .as_ref()
                .and_then(value_as_i64)
                .map(|secs| secs.max(1) as u64)
                .unwrap_or(device_code::DEFAULT_POLL_INTERVAL_SECS),
        );

        loop {
            tokio::time::sleep(interval).await;
            if tokio::time::Instant::now() >= deadline {
                return Err(ApiError::auth("Device code expired before sign-in completed"));
            }
            let response = post_form(
                self.http.as_ref(),
                &self.token_url,
                &[
                    ("grant_type", device_code::GRANT_TYPE),
                    ("client_id", self.client_id.as_str()),
                    ("device_code", grant.device_code.as_str()),
                ],
            )
            .await?;
            if is_success(&response) {
                self.logger.info("Interactive sign-in completed", None);
                return self.accept_grant(scope, &response).await;
            }
            match oauth_error_code(&response).as_deref() {
                Some("authorization_pending") => continue,
                Some("slow_down") => {
                    interval += Duration::from_secs(device_code::SLOW_DOWN_STEP_SECS);
                }
                Some("authorization_declined") => {
                    return Err(oauth_failure("Sign-in was declined", &response));
                }
                Some("expired_token") => {
                    return Err(oauth_failure("Device code expired", &response));
                }
                _ => return Err(oauth_failure("Device code sign-in failed", &response)),
            }
        }
    }
}

#[async_trait]
impl Credential for DeviceCodeCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::InteractiveUser
    }

    async fn mint(&self, scope: &str) -> Result<Token, ApiError> {
        let stored = self.refresh_token.lock().await.clone();
        if let Some(refresh_token) = stored {
            match self.redeem_refresh_token(scope, &refresh_token).await {
                Ok(token) => return Ok(token),
                Err(err) => {
                    self.logger.warn(
                        "Refresh token no longer usable, starting a new sign-in",
                        Some(&json!({"error": err.to_string()})),
                    );
                    *self.refresh_token.lock().await = None;
                }
            }
        }
        self.device_flow(scope).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<Value>,
}

pub struct AzureCliCredential {
    program: PathBuf,
    tenant_id: Option<String>,
    timeout: Duration,
}

impl AzureCliCredential {
    pub fn new(program: PathBuf, tenant_id: Option<String>) -> Self {
        Self {
            program,
            tenant_id,
            timeout: Duration::from_millis(network::TIMEOUT_CLI_TOKEN_MS),
        }
    }

    fn expiry(token: &CliToken) -> DateTime<Utc> {
        if let Some(epoch) = token.expires_on_epoch.as_ref().and_then(value_as_i64) {
            if let Some(at) = Utc.timestamp_opt(epoch, 0).single() {
                return at;
            }
        }
        token
            .expires_on
            .as_deref()
            .and_then(|raw| NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f").ok())
            .and_then(|naive| Local.from_local_datetime(&naive).single())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(token::DEFAULT_LIFETIME_SECS))
    }
}

#[async_trait]
impl Credential for AzureCliCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Ambient
    }

    async fn mint(&self, scope: &str) -> Result<Token, ApiError> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(["account", "get-access-token", "--output", "json", "--scope", scope])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(tenant) = &self.tenant_id {
            command.args(["--tenant", tenant.as_str()]);
        }
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ApiError::auth("Azure CLI timed out"))?
            .map_err(|err| ApiError::auth(format!("Azure CLI could not be started: {}", err)))?;
        if !output.status.success() {
            let stderr = body_preview(&output.stderr, limits::LOG_BODY_PREVIEW_BYTES);
            return Err(ApiError::auth(format!("Azure CLI failed: {}", stderr.trim())));
        }
        let parsed: CliToken = serde_json::from_slice(&output.stdout)
            .map_err(|err| ApiError::auth(format!("Azure CLI output could not be parsed: {}", err)))?;
        let expires_at = Self::expiry(&parsed);
        Ok(Token::new(parsed.access_token, scope, expires_at))
    }
}

#[derive(Clone)]
pub enum ManagedIdentityEndpoint {
    /// App Service / Functions style endpoint with its shared secret header.
    AppService { endpoint: Url, secret: String },
    /// VM instance metadata service.
    Imds,
}

pub struct ManagedIdentityCredential {
    http: Arc<dyn HttpTransport>,
    endpoint: ManagedIdentityEndpoint,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        endpoint: ManagedIdentityEndpoint,
        client_id: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint,
            client_id,
        }
    }

    fn build_request(&self, scope: &str) -> Result<TransportRequest, ApiError> {
        let resource = scope.trim_end_matches("/.default");
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let (mut url, api_version) = match &self.endpoint {
            ManagedIdentityEndpoint::AppService { endpoint, secret } => {
                let value = HeaderValue::from_str(secret)
                    .map_err(|_| ApiError::auth("IDENTITY_HEADER contains invalid characters"))?;
                headers.insert(HeaderName::from_static("x-identity-header"), value);
                (endpoint.clone(), managed_identity::APP_SERVICE_API_VERSION)
            }
            ManagedIdentityEndpoint::Imds => {
                headers.insert(HeaderName::from_static("metadata"), HeaderValue::from_static("true"));
                let url = Url::parse(managed_identity::IMDS_ENDPOINT)
                    .map_err(|err| ApiError::auth(format!("Invalid IMDS endpoint: {}", err)))?;
                (url, managed_identity::IMDS_API_VERSION)
            }
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", api_version);
            query.append_pair("resource", resource);
            if let Some(client_id) = &self.client_id {
                query.append_pair("client_id", client_id);
            }
        }
        Ok(TransportRequest {
            method: Method::GET,
            url,
            headers,
            body: None,
            timeout: Duration::from_millis(network::TIMEOUT_IDENTITY_REQUEST_MS),
        })
    }
}

#[async_trait]
impl Credential for ManagedIdentityCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Ambient
    }

    async fn mint(&self, scope: &str) -> Result<Token, ApiError> {
        let request = self.build_request(scope)?;
        let response = self
            .http
            .send(request)
            .await
            .map_err(|err| ApiError::auth(format!("Managed identity endpoint unreachable: {}", err)))?;
        if !is_success(&response) {
            return Err(oauth_failure("Managed identity token request failed", &response));
        }
        let grant = parse_grant(&response)?;
        let expires_at = grant_expiry(&grant);
        Ok(Token::new(grant.access_token, scope, expires_at))
    }
}

#[derive(Clone, Default)]
pub struct AmbientEnvironment {
    pub az_cli: Option<PathBuf>,
    pub identity_endpoint: Option<(Url, String)>,
    pub imds_enabled: bool,
}

impl AmbientEnvironment {
    pub fn detect(config: &AppConfig) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), config.imds_enabled)
    }

    pub fn from_lookup<F>(lookup: F, imds_enabled: bool) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let az_cli = lookup("PATH").and_then(|path| find_executable(&path, &["az", "az.cmd"]));
        let identity_endpoint = match (lookup("IDENTITY_ENDPOINT"), lookup("IDENTITY_HEADER")) {
            (Some(endpoint), Some(secret)) if !secret.trim().is_empty() => Url::parse(endpoint.trim())
                .ok()
                .map(|url| (url, secret.trim().to_string())),
            _ => None,
        };
        Self {
            az_cli,
            identity_endpoint,
            imds_enabled,
        }
    }

    pub fn has_any_source(&self) -> bool {
        self.az_cli.is_some() || self.identity_endpoint.is_some() || self.imds_enabled
    }
}

fn find_executable(path: &str, names: &[&str]) -> Option<PathBuf> {
    std::env::split_paths(path).find_map(|dir| {
        names
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

// First source that mints wins.
pub struct AmbientCredential {
    sources: Vec<(&'static str, Arc<dyn Credential>)>,
}

impl AmbientCredential {
    pub fn new(sources: Vec<(&'static str, Arc<dyn Credential>)>) -> Self {
        Self { sources }
    }

    pub fn from_environment(
        env: &AmbientEnvironment,
        auth: &AuthConfig,
        http: Arc<dyn HttpTransport>,
    ) -> Option<Self> {
        let mut sources: Vec<(&'static str, Arc<dyn Credential>)> = Vec::new();
        if let Some(program) = &env.az_cli {
            sources.push((
                "azure_cli",
                Arc::new(AzureCliCredential::new(program.clone(), auth.tenant_id.clone())),
            ));
        }
        if let Some((endpoint, secret)) = &env.identity_endpoint {
            sources.push((
                "managed_identity",
                Arc::new(ManagedIdentityCredential::new(
                    http.clone(),
                    ManagedIdentityEndpoint::AppService {
                        endpoint: endpoint.clone(),
                        secret: secret.clone(),
                    },
                    auth.client_id.clone(),
                )),
            ));
        } else if env.imds_enabled {
            sources.push((
                "managed_identity",
                Arc::new(ManagedIdentityCredential::new(
                    http,
                    ManagedIdentityEndpoint::Imds,
                    auth.client_id.clone(),
                )),
            ));
        }
        if sources.is_empty() {
            None
        } else {
            Some(Self::new(sources))
        }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|(name, _)| *name).collect()
    }
}

#[async_trait]
impl Credential for AmbientCredential {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Ambient
    }

    async fn mint(&self, scope: &str) -> Result<Token, ApiError> {
        let mut failures = Vec::new();
        for (name, source) in &self.sources {
            match source.mint(scope).await {
                Ok(token) => return Ok(token),
                Err(err) => failures.push(format!("{}: {}", name, err)),
            }
        }
        Err(ApiError::auth(format!(
            "No ambient credential source succeeded ({})",
            failures.join("; ")
        )))
    }
}

pub fn resolve_credential(
    config: &AppConfig,
    http: Arc<dyn HttpTransport>,
    env: &AmbientEnvironment,
    logger: &Logger,
) -> Result<Arc<dyn Credential>, ConfigError> {
    let auth = &config.auth;
    let logger = logger.child("credential");

    let interactive = |tenant: &str, client: &str, http: Arc<dyn HttpTransport>| {
        DeviceCodeCredential::new(http, &auth.authority_host, tenant, client, &logger)
            .map(|credential| Arc::new(credential) as Arc<dyn Credential>)
    };

    if auth.mode == AuthMode::User {
        let credential = match (&auth.tenant_id, &auth.client_id) {
            (Some(tenant), Some(client)) => {
                logger.info(
                    "Using interactive sign-in for configured app registration",
                    Some(&json!({"tenant_id": tenant, "client_id": client})),
                );
                interactive(tenant.as_str(), client.as_str(), http)?
            }
            _ => {
                logger.info("Using interactive sign-in with the public client", None);
                interactive(device_code::DEFAULT_TENANT, device_code::PUBLIC_CLIENT_ID, http)?
            }
        };
        return Ok(credential);
    }

    if let (Some(tenant), Some(client), Some(secret)) =
        (&auth.tenant_id, &auth.client_id, &auth.client_secret)
    {
        logger.info(
            "Using service principal credential",
            Some(&json!({"tenant_id": tenant, "client_id": client})),
        );
        let credential =
            ClientSecretCredential::new(http, &auth.authority_host, tenant, client, secret)?;
        return Ok(Arc::new(credential));
    }

    if let Some(ambient) = AmbientCredential::from_environment(env, auth, http.clone()) {
        logger.info(
            "Using ambient credential chain",
            Some(&json!({"sources": ambient.source_names()})),
        );
        return Ok(Arc::new(ambient));
    }

    logger.warn(
        "No ambient credential source available, falling back to interactive sign-in",
        None,
    );
    interactive(device_code::DEFAULT_TENANT, device_code::PUBLIC_CLIENT_ID, http)
}
