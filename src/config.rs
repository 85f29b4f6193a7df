use crate::constants::{graph, network, retry, token};
use crate::utils::feature_flags::{is_truthy, non_empty};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AUTH_MODE must be 'app' or 'user', got '{0}'")]
    InvalidAuthMode(String),
    #[error("{key} is not a valid URL: {value}")]
    InvalidUrl { key: &'static str, value: String },
    #[error("{key} must be an integer between 1 and {max}, got '{value}'")]
    InvalidNumber { key: &'static str, value: String, max: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    App,
    User,
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "app" => Ok(AuthMode::App),
            "user" => Ok(AuthMode::User),
            _ => Err(ConfigError::InvalidAuthMode(raw.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub authority_host: Url,
}

impl AuthConfig {
    pub fn new(mode: AuthMode) -> Self {
        Self {
            mode,
            tenant_id: None,
            client_id: None,
            client_secret: None,
            authority_host: default_url(graph::AUTHORITY_HOST),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("mode", &self.mode)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("authority_host", &self.authority_host.as_str())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub graph_base_url: Url,
    pub scope: String,
    pub request_timeout: Duration,
    pub max_attempts: usize,
    pub token_skew: chrono::Duration,
    pub tool_call_timeout: Duration,
    pub imds_enabled: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| non_empty(lookup(key));

        let mode = match read("AUTH_MODE") {
            Some(raw) => raw.parse()?,
            None => AuthMode::App,
        };
        let auth = AuthConfig {
            mode,
            tenant_id: read("AZURE_TENANT_ID"),
            client_id: read("AZURE_CLIENT_ID"),
            client_secret: read("AZURE_CLIENT_SECRET"),
            authority_host: parse_url(
                "AZURE_AUTHORITY_HOST",
                read("AZURE_AUTHORITY_HOST"),
                graph::AUTHORITY_HOST,
            )?,
        };

        Ok(Self {
            auth,
            graph_base_url: parse_url("GRAPH_BASE_URL", read("GRAPH_BASE_URL"), graph::BASE_URL)?,
            scope: read("GRAPH_SCOPE").unwrap_or_else(|| graph::DEFAULT_SCOPE.to_string()),
            request_timeout: Duration::from_millis(parse_bounded(
                "GRAPH_TIMEOUT_MS",
                read("GRAPH_TIMEOUT_MS"),
                network::TIMEOUT_API_REQUEST_MS,
                network::MAX_TIMEOUT_MS,
            )?),
            max_attempts: parse_bounded(
                "GRAPH_MAX_ATTEMPTS",
                read("GRAPH_MAX_ATTEMPTS"),
                retry::MAX_ATTEMPTS as u64,
                retry::ATTEMPTS_LIMIT,
            )? as usize,
            token_skew: chrono::Duration::seconds(parse_bounded(
                "GRAPH_TOKEN_SKEW_SECS",
                read("GRAPH_TOKEN_SKEW_SECS"),
                token::EXPIRY_SKEW_SECS as u64,
                token::MAX_EXPIRY_SKEW_SECS,
            )? as i64),
            tool_call_timeout: Duration::from_millis(parse_bounded(
                "GRAPH_TOOL_TIMEOUT_MS",
                read("GRAPH_TOOL_TIMEOUT_MS"),
                network::TIMEOUT_TOOL_CALL_MS,
                network::MAX_TIMEOUT_MS,
            )?),
            imds_enabled: read("GRAPH_IMDS").map(is_truthy).unwrap_or(false),
        })
    }
}

fn default_url(raw: &str) -> Url {
    Url::parse(raw).expect("built-in URL constant")
}

fn parse_url(key: &'static str, raw: Option<String>, fallback: &str) -> Result<Url, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default_url(fallback));
    };
    let url = Url::parse(&raw).map_err(|_| ConfigError::InvalidUrl {
        key,
        value: raw.clone(),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl { key, value: raw });
    }
    Ok(url)
}

fn parse_bounded(key: &'static str, raw: Option<String>, fallback: u64, max: u64) -> Result<u64, ConfigError> {
    let Some(raw) = raw else {
        return Ok(fallback);
    };
    match raw.parse::<u64>() {
        Ok(value) if (1..=max).contains(&value) => Ok(value),
        _ => Err(ConfigError::InvalidNumber { key, value: raw, max }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_to_app_mode_against_public_graph() {
        let config = config_from(&[]).expect("config");
        assert_eq!(config.auth.mode, AuthMode::App);
        assert_eq!(config.graph_base_url.as_str(), "https://graph.microsoft.com/");
        assert_eq!(config.scope, "https://graph.microsoft.com/.default");
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.token_skew, chrono::Duration::seconds(120));
        assert!(!config.imds_enabled);
    }

    #[test]
    fn reads_identity_settings_and_ignores_blank_values() {
        let config = config_from(&[
            ("AUTH_MODE", "User"),
            ("AZURE_TENANT_ID", "contoso"),
            ("AZURE_CLIENT_ID", "  "),
            ("GRAPH_IMDS", "yes"),
        ])
        .expect("config");
        assert_eq!(config.auth.mode, AuthMode::User);
        assert_eq!(config.auth.tenant_id.as_deref(), Some("contoso"));
        assert!(config.auth.client_id.is_none());
        assert!(config.imds_enabled);
    }

    #[test]
    fn rejects_unknown_auth_mode() {
        let err = config_from(&[("AUTH_MODE", "robot")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAuthMode(_)));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = config_from(&[("GRAPH_MAX_ATTEMPTS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn rejects_skew_beyond_one_day() {
        let err = config_from(&[("GRAPH_TOKEN_SKEW_SECS", "86401")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { key: "GRAPH_TOKEN_SKEW_SECS", max: 86_400, .. }));

        let err = config_from(&[("GRAPH_TOKEN_SKEW_SECS", "18446744073709551615")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));

        let config = config_from(&[("GRAPH_TOKEN_SKEW_SECS", "86400")]).expect("config");
        assert_eq!(config.token_skew, chrono::Duration::days(1));
    }

    #[test]
    fn debug_output_hides_client_secret() {
        let config = config_from(&[("AZURE_CLIENT_SECRET", "super-secret-value")]).expect("config");
        let rendered = format!("{:?}", config.auth);
        assert!(!rendered.contains("super-secret-value"));
    }
}
